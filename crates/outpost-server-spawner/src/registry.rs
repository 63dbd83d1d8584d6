// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory map from service key to its live lifecycle object.
//!
//! Construction is single-flight per key: concurrent callers for the same key
//! wait on one [`OnceCell`] and share the result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use outpost_server_flavors::Flavor;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::backend::{BackendContext, BackendFactory};
use crate::certs::CertStore;
use crate::error::{Result, SpawnerError};
use crate::hooks::OverrideRequest;
use crate::key::ServiceKey;
use crate::lifecycle::{LifecycleDeps, LifecycleObject};
use crate::request::ServiceBody;

type Slot = Arc<OnceCell<Arc<LifecycleObject>>>;

/// Inputs for building a lifecycle object.
#[derive(Debug, Clone, Default)]
pub struct LifecycleArgs {
	pub body: ServiceBody,
	pub auth_state: HashMap<String, String>,
	pub flavor: Option<Flavor>,
	/// Backend state to restore right after construction.
	pub state: Option<Value>,
}

pub struct Registry {
	entries: Mutex<HashMap<ServiceKey, Slot>>,
	certs: CertStore,
	factory: Arc<dyn BackendFactory>,
	deps: LifecycleDeps,
}

impl Registry {
	pub fn new(certs: CertStore, factory: Arc<dyn BackendFactory>, deps: LifecycleDeps) -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			certs,
			factory,
			deps,
		}
	}

	fn entries(&self) -> MutexGuard<'_, HashMap<ServiceKey, Slot>> {
		self.entries.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn get(&self, key: &ServiceKey) -> Option<Arc<LifecycleObject>> {
		self.entries().get(key).and_then(|slot| slot.get().cloned())
	}

	pub fn contains(&self, key: &ServiceKey) -> bool {
		self.get(key).is_some()
	}

	pub fn len(&self) -> usize {
		self.entries().values().filter(|slot| slot.initialized()).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Return the cached object for `key`, building it from `args` if absent.
	/// `args` is ignored when another caller already built the object.
	pub async fn get_or_create(&self, key: &ServiceKey, args: LifecycleArgs) -> Result<Arc<LifecycleObject>> {
		let slot = self.entries().entry(key.clone()).or_default().clone();
		let user_name = args.body.user_name();

		let result = slot
			.get_or_try_init(|| self.construct(key, args))
			.await
			.cloned();

		if let Err(e) = &result {
			tracing::warn!(key = %key, error = %e, "could not create lifecycle object");
			{
				let mut entries = self.entries();
				if entries
					.get(key)
					.is_some_and(|current| Arc::ptr_eq(current, &slot) && !current.initialized())
				{
					entries.remove(key);
				}
			}
			self.certs.remove(key, &user_name).await;
		}
		result
	}

	async fn construct(&self, key: &ServiceKey, args: LifecycleArgs) -> Result<Arc<LifecycleObject>> {
		if !args.body.misc.is_empty() {
			let request = OverrideRequest {
				hub: key.hub.clone(),
				misc: args.body.misc.clone(),
			};
			if !self.deps.hooks.allow_override.resolve(&request).await {
				return Err(SpawnerError::AuthorizationDenied {
					hub: key.hub.clone(),
					keys: request.misc.keys().cloned().collect(),
				});
			}
		}

		let material = self.certs.write(key, &args.body).await?;
		let ctx = BackendContext {
			key: key.clone(),
			body: args.body.persisted(),
			auth_state: args.auth_state,
			cert_paths: material.cert_paths.clone(),
			trust_bundles: material.trust_bundles,
			flavor: args.flavor,
		};

		let mut backend = self
			.factory
			.create(&ctx)
			.map_err(|e| SpawnerError::backend(key, e))?;
		if let Some(state) = &args.state {
			backend
				.load_state(state)
				.map_err(|e| SpawnerError::backend(key, e))?;
		}

		tracing::debug!(key = %key, backend = self.factory.name(), "created lifecycle object");
		Ok(Arc::new(LifecycleObject::new(
			ctx.key,
			ctx.body,
			ctx.flavor,
			material.cert_paths,
			backend,
			self.deps.clone(),
		)))
	}

	/// Evict `key` and delete its certificate material.
	pub async fn remove(&self, key: &ServiceKey) {
		let slot = self.entries().remove(key);
		let user_name = slot
			.as_ref()
			.and_then(|slot| slot.get())
			.map(|object| object.user_name())
			.unwrap_or_default();
		self.certs.remove(key, &user_name).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hooks::{Constant, FnResolver, Hooks};
	use crate::notifier::HubNotifier;
	use crate::testing::ScriptedBackendFactory;
	use outpost_common_secret::SecretString;
	use outpost_server_crypt::{generate_key, Cipher};
	use outpost_server_db::testing::create_test_pool;
	use outpost_server_db::ServiceRepository;
	use serde_json::json;
	use std::time::Duration;

	async fn registry(hooks: Hooks, factory: ScriptedBackendFactory, certs: &std::path::Path) -> Registry {
		let deps = LifecycleDeps {
			services: ServiceRepository::new(create_test_pool().await),
			cipher: Cipher::from_base64(&SecretString::new(generate_key())).unwrap(),
			notifier: HubNotifier::new(Duration::from_secs(1)),
			hooks: Arc::new(hooks),
		};
		Registry::new(CertStore::new(certs), Arc::new(factory), deps)
	}

	fn args(misc: Value) -> LifecycleArgs {
		LifecycleArgs {
			body: serde_json::from_value(json!({
				"name": "svc",
				"misc": misc,
				"env": { "JUPYTERHUB_USER": "alice" },
				"certs": { "keyfile": "k", "certfile": "c", "cafile": "ca" }
			}))
			.unwrap(),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_object() {
		let dir = tempfile::tempdir().unwrap();
		let factory = ScriptedBackendFactory::default();
		let registry = registry(Hooks::default(), factory.clone(), dir.path()).await;
		let key = ServiceKey::new("hub", "svc", "0");

		let (a, b) = tokio::join!(
			registry.get_or_create(&key, args(json!({}))),
			registry.get_or_create(&key, args(json!({})))
		);
		assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
		assert_eq!(factory.world().constructions(), 1);
		assert_eq!(registry.len(), 1);
	}

	#[tokio::test]
	async fn denied_override_is_not_cached() {
		let dir = tempfile::tempdir().unwrap();
		let factory = ScriptedBackendFactory::default();
		let hooks = Hooks {
			allow_override: Arc::new(FnResolver(|req: &OverrideRequest| req.hub == "trusted")),
			..Default::default()
		};
		let registry = registry(hooks, factory.clone(), dir.path()).await;
		let key = ServiceKey::new("other", "svc", "0");

		let err = registry
			.get_or_create(&key, args(json!({ "image": "custom" })))
			.await
			.err()
			.unwrap();
		assert_eq!(
			err.to_string(),
			r#"other is not allowed to override the configuration. Used keys: ["image"]"#
		);
		assert!(registry.is_empty());
		assert_eq!(factory.world().constructions(), 0);

		// Without overrides the hook is not consulted.
		registry.get_or_create(&key, args(json!({}))).await.unwrap();
		assert!(registry.contains(&key));
	}

	#[tokio::test]
	async fn failed_construction_removes_certificates() {
		let dir = tempfile::tempdir().unwrap();
		let factory = ScriptedBackendFactory::default();
		factory.script(|s| s.fail_create = true);
		let hooks = Hooks {
			allow_override: Arc::new(Constant(true)),
			..Default::default()
		};
		let registry = registry(hooks, factory, dir.path()).await;
		let key = ServiceKey::new("hub", "svc", "0");

		assert!(registry.get_or_create(&key, args(json!({}))).await.is_err());
		assert!(!dir.path().join(key.dir_name()).exists());
		assert!(registry.is_empty());
	}

	#[tokio::test]
	async fn remove_evicts_and_cleans_up() {
		let dir = tempfile::tempdir().unwrap();
		let registry = registry(Hooks::default(), ScriptedBackendFactory::default(), dir.path()).await;
		let key = ServiceKey::new("hub", "svc", "0");

		registry.get_or_create(&key, args(json!({}))).await.unwrap();
		assert!(dir.path().join(key.dir_name()).join("alice.key").exists());

		registry.remove(&key).await;
		assert!(!registry.contains(&key));
		assert!(!dir.path().join(key.dir_name()).exists());
	}
}
