// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Admission, start, poll and stop as seen by the HTTP boundary and sweepers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use outpost_common_secret::SecretString;
use outpost_server_crypt::Cipher;
use outpost_server_db::{DbError, HubRepository, NewService, ServiceRecord, ServiceRepository, ServiceSummary};
use outpost_server_flavors::{FlavorLedger, UsageAdjustment, UsageMap};
use serde_json::{json, Map, Value};
use tokio_util::task::TaskTracker;

use crate::backend::BackendFactory;
use crate::certs::CertStore;
use crate::error::{Result, SpawnerError};
use crate::hooks::Hooks;
use crate::key::ServiceKey;
use crate::lifecycle::{LifecycleDeps, LifecycleObject, PollOutcome, StopOutcome};
use crate::notifier::HubNotifier;
use crate::registry::{LifecycleArgs, Registry};
use crate::request::{
	ServiceBody, ENV_API_TOKEN, ENV_FLAVORS_UPDATE_TOKEN, ENV_FLAVORS_UPDATE_URL, ENV_SETUPTUNNEL_URL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
	/// Respond once the backend has started.
	#[default]
	Sync,
	/// Respond immediately and run the work in the background.
	Async,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
	Started(Value),
	Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDisposition {
	Stopped(StopOutcome),
	/// Another stop already owns the record; it was deleted.
	AlreadyStopping,
	Missing,
	/// Running in the background.
	Accepted,
}

/// A start request after it left the HTTP layer.
#[derive(Debug, Clone)]
pub struct StartRequest {
	pub hub: String,
	pub body: ServiceBody,
	pub auth_state: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelReport {
	pub sent: usize,
	pub skipped: usize,
	pub failed: usize,
}

/// Where quota-usage updates for one service go.
#[derive(Debug, Clone, Default)]
struct UpdateTarget {
	url: Option<String>,
	token: Option<SecretString>,
}

impl UpdateTarget {
	fn from_body(body: &ServiceBody) -> Self {
		Self {
			url: body.env_non_empty(ENV_FLAVORS_UPDATE_URL),
			token: body.env_non_empty(ENV_FLAVORS_UPDATE_TOKEN).map(SecretString::new),
		}
	}
}

#[derive(Debug, Clone)]
pub struct OutpostSettings {
	pub flavors_path: PathBuf,
	pub certs_dir: PathBuf,
	/// `-1` disables the per-user cap.
	pub global_max_per_user: i64,
	pub request_timeout: Duration,
}

pub struct OutpostParts {
	pub hubs: HubRepository,
	pub services: ServiceRepository,
	pub cipher: Cipher,
	pub factory: Arc<dyn BackendFactory>,
	pub hooks: Hooks,
	pub settings: OutpostSettings,
}

#[derive(Clone)]
pub struct Outpost {
	hubs: HubRepository,
	services: ServiceRepository,
	ledger: FlavorLedger,
	registry: Arc<Registry>,
	deps: LifecycleDeps,
	tasks: TaskTracker,
}

impl Outpost {
	pub fn new(parts: OutpostParts) -> Self {
		let deps = LifecycleDeps {
			services: parts.services.clone(),
			cipher: parts.cipher,
			notifier: HubNotifier::new(parts.settings.request_timeout),
			hooks: Arc::new(parts.hooks),
		};
		let registry = Registry::new(CertStore::new(parts.settings.certs_dir), parts.factory, deps.clone());
		Self {
			hubs: parts.hubs,
			ledger: FlavorLedger::new(
				parts.settings.flavors_path,
				parts.services.clone(),
				parts.settings.global_max_per_user,
			),
			services: parts.services,
			registry: Arc::new(registry),
			deps,
			tasks: TaskTracker::new(),
		}
	}

	pub fn services(&self) -> &ServiceRepository {
		&self.services
	}

	pub fn hubs(&self) -> &HubRepository {
		&self.hubs
	}

	pub fn ledger(&self) -> &FlavorLedger {
		&self.ledger
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn notifier(&self) -> &HubNotifier {
		&self.deps.notifier
	}

	pub fn hooks(&self) -> &Hooks {
		&self.deps.hooks
	}

	/// Admit and start a service.
	#[tracing::instrument(skip(self, request), fields(hub = %request.hub, service = %request.body.name, start_id = %request.body.start_id()))]
	pub async fn create_service(&self, request: StartRequest, mode: ExecutionMode) -> Result<StartOutcome> {
		let StartRequest {
			hub,
			body,
			auth_state,
		} = request;
		let key = ServiceKey::new(&hub, &body.name, body.start_id());
		key.validate().inspect_err(|e| tracing::info!(error = %e, "start rejected"))?;
		self.hubs.get_or_create(&hub).await?;

		let authentication = match body.authentication.clone() {
			Some(auth) => Some(self.deps.hooks.user_authentication(auth).await),
			None => None,
		};
		let new = NewService {
			hub: hub.clone(),
			name: body.name.clone(),
			start_id: key.start_id.clone(),
			owner_user_id: body.user_id(),
			flavor: body.flavor(),
			body: self.deps.cipher.seal_json(&body.persisted())?,
		};
		let admitted = self.ledger.admit(&new, authentication.as_ref()).await?;
		tracing::info!(flavor = %new.flavor, "service admitted");

		let update = UpdateTarget::from_body(&body);
		self.registry.remove(&key).await;
		let args = LifecycleArgs {
			body,
			auth_state,
			flavor: Some(admitted.flavor),
			state: None,
		};
		let lifecycle = match self.registry.get_or_create(&key, args).await {
			Ok(lifecycle) => lifecycle,
			Err(e) => {
				if let Err(err) = self.services.delete(&key.hub, &key.name, &key.start_id).await {
					tracing::error!(error = %err, "could not delete record of unstartable service");
				}
				self.send_flavor_update(&key, &update).await;
				return Err(e);
			}
		};

		// Tracked either way so a dropped sync caller does not abandon the start.
		let this = self.clone();
		let task = self
			.tasks
			.spawn(async move { this.run_start(&key, lifecycle, &update, mode).await });
		match mode {
			ExecutionMode::Sync => task
				.await
				.map_err(|e| SpawnerError::Internal(format!("start task failed: {e}")))?
				.map(StartOutcome::Started),
			ExecutionMode::Async => Ok(StartOutcome::Accepted),
		}
	}

	async fn run_start(
		&self,
		key: &ServiceKey,
		lifecycle: Arc<LifecycleObject>,
		update: &UpdateTarget,
		mode: ExecutionMode,
	) -> Result<Value> {
		match lifecycle.start().await {
			Ok(response) => {
				if let Err(e) = self.services.finish_start(&key.hub, &key.name, &key.start_id).await {
					tracing::warn!(key = %key, error = %e, "could not clear start_pending");
				}
				self.send_flavor_update(key, update).await;
				Ok(response)
			}
			Err(e) => {
				tracing::error!(key = %key, error = %e, "could not start service");
				if mode == ExecutionMode::Async {
					lifecycle.send_event(&failed_event(&e)).await;
				}
				if let Err(err) = self.stop_service(key, HashMap::new()).await {
					tracing::error!(key = %key, error = %err, "cleanup after failed start failed");
				}
				Err(e)
			}
		}
	}

	/// Poll a service. Errors with `NotFound` when no record exists.
	///
	/// A record whose start has not stored state yet is reported as unknown
	/// without touching the registry, so the start keeps its own lifecycle.
	#[tracing::instrument(skip(self, auth_state), fields(key = %key))]
	pub async fn poll_service(&self, key: &ServiceKey, auth_state: HashMap<String, String>) -> Result<PollOutcome> {
		let record = self.record(key).await?;
		if !record.state_stored {
			tracing::debug!("start has not stored state, status unknown");
			return Ok(PollOutcome::Unknown);
		}
		let lifecycle = self.lifecycle_for(key, &record, auth_state).await?;
		lifecycle.poll(&record).await
	}

	/// Stop a service, delete its record and push a usage update.
	///
	/// A missing record is a no-op. A record already being stopped by
	/// someone else is deleted without touching the backend again.
	#[tracing::instrument(skip(self, auth_state), fields(key = %key))]
	pub async fn stop_service(&self, key: &ServiceKey, auth_state: HashMap<String, String>) -> Result<StopDisposition> {
		let Some(record) = self.services.get(&key.hub, &key.name, &key.start_id).await? else {
			tracing::info!("no record, nothing to stop");
			return Ok(StopDisposition::Missing);
		};

		match self.services.mark_stop_pending(&key.hub, &key.name, &key.start_id).await {
			Ok(true) => {}
			Ok(false) => {
				tracing::info!("stop already in progress, removing record");
				self.services.delete(&key.hub, &key.name, &key.start_id).await?;
				return Ok(StopDisposition::AlreadyStopping);
			}
			Err(DbError::NotFound(_)) => return Ok(StopDisposition::Missing),
			Err(e) => return Err(e.into()),
		}

		let body = self.body_of(&record)?;
		let update = UpdateTarget::from_body(&body);
		let args = LifecycleArgs {
			body,
			auth_state,
			..Default::default()
		};
		let stopped = match self.registry.get_or_create(key, args).await {
			Ok(lifecycle) => Ok(lifecycle.stop(Some(&record), false).await),
			Err(e) => Err(e),
		};
		self.registry.remove(key).await;
		let outcome = stopped?;

		self.send_flavor_update(key, &update).await;
		tracing::info!(backend_error = ?outcome.backend_error, "service stopped");
		Ok(StopDisposition::Stopped(outcome))
	}

	/// [`Outpost::stop_service`] in the background.
	pub fn stop_service_detached(&self, key: ServiceKey, auth_state: HashMap<String, String>) -> StopDisposition {
		let this = self.clone();
		self.tasks.spawn(async move {
			if let Err(e) = this.stop_service(&key, auth_state).await {
				tracing::error!(key = %key, error = %e, "background stop failed");
			}
		});
		StopDisposition::Accepted
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_services(&self, hub: &str) -> Result<Vec<ServiceSummary>> {
		let records = self.services.list_for_hub(hub).await?;
		Ok(records.iter().map(ServiceRecord::summary).collect())
	}

	/// Flavor usage for a hub, narrowed to a user when `authentication` is given.
	pub async fn flavor_usage(&self, hub: &str, authentication: Option<Map<String, Value>>) -> Result<UsageMap> {
		let authentication = match authentication {
			Some(auth) => Some(self.deps.hooks.user_authentication(auth).await),
			None => None,
		};
		Ok(self
			.ledger
			.usage(hub, authentication.as_ref(), &UsageAdjustment::None)
			.await?)
	}

	/// Push the hub's flavor usage to the URL the service was started with.
	async fn send_flavor_update(&self, key: &ServiceKey, update: &UpdateTarget) {
		let Some(url) = &update.url else {
			tracing::debug!(key = %key, "no flavor update url, skipping update");
			return;
		};
		let token = match &update.token {
			Some(token) => Some(token.clone()),
			None => self.deps.hooks.flavors_update_token.resolve(&key.hub).await,
		};
		let Some(token) = token.filter(|t| !t.is_empty()) else {
			tracing::debug!(key = %key, "no flavor update token, skipping update");
			return;
		};

		match self.ledger.usage(&key.hub, None, &UsageAdjustment::None).await {
			Ok(usage) => {
				self.deps
					.notifier
					.send_flavor_update(url, token.expose(), &usage)
					.await
			}
			Err(e) => tracing::warn!(key = %key, error = %e, "could not compute flavor usage"),
		}
	}

	/// Replay stored start responses to each hub's tunnel endpoint.
	#[tracing::instrument(skip(self))]
	pub async fn recreate_tunnels(&self) -> Result<TunnelReport> {
		let mut report = TunnelReport::default();
		for record in self.services.list_all().await? {
			if record.stop_pending || !record.state_stored {
				report.skipped += 1;
				continue;
			}
			if !self.deps.hooks.recreate_tunnels_at_start.resolve(&record.hub).await {
				report.skipped += 1;
				continue;
			}

			let body: ServiceBody = self.deps.cipher.open_json_or_default(record.body.as_deref());
			let (Some(url), Some(token)) = (
				body.env_non_empty(ENV_SETUPTUNNEL_URL),
				body.env_non_empty(ENV_API_TOKEN),
			) else {
				report.skipped += 1;
				continue;
			};
			let response: Value = self.deps.cipher.open_json_or_default(record.start_response.as_deref());
			if response.is_null() {
				report.skipped += 1;
				continue;
			}

			match self.deps.notifier.setup_tunnel(&url, &token, &response).await {
				Ok(()) => report.sent += 1,
				Err(e) => {
					tracing::warn!(hub = %record.hub, service = %record.name, error = %e, "could not recreate tunnel");
					report.failed += 1;
				}
			}
		}
		tracing::info!(?report, "recreated tunnels");
		Ok(report)
	}

	/// Wait for background starts and stops, at most `grace`.
	pub async fn shutdown(&self, grace: Duration) {
		self.tasks.close();
		if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
			tracing::warn!(pending = self.tasks.len(), "background tasks still running at shutdown");
		}
	}

	async fn record(&self, key: &ServiceKey) -> Result<ServiceRecord> {
		self.services
			.get(&key.hub, &key.name, &key.start_id)
			.await?
			.ok_or_else(|| SpawnerError::NotFound(key.clone()))
	}

	fn body_of(&self, record: &ServiceRecord) -> Result<ServiceBody> {
		match record.body.as_deref() {
			Some(blob) => Ok(self.deps.cipher.open_json(blob)?),
			None => Ok(ServiceBody {
				name: record.name.clone(),
				start_id: Some(record.start_id.clone()),
				..Default::default()
			}),
		}
	}

	async fn lifecycle_for(
		&self,
		key: &ServiceKey,
		record: &ServiceRecord,
		auth_state: HashMap<String, String>,
	) -> Result<Arc<LifecycleObject>> {
		if let Some(lifecycle) = self.registry.get(key) {
			return Ok(lifecycle);
		}
		let args = LifecycleArgs {
			body: self.body_of(record)?,
			auth_state,
			..Default::default()
		};
		self.registry.get_or_create(key, args).await
	}
}

fn failed_event(error: &SpawnerError) -> Value {
	let now = Utc::now().format("%Y_%m_%d %H:%M:%S");
	let details = serde_json::to_string(&error.details()).unwrap_or_default();
	json!({
		"failed": true,
		"progress": 100,
		"html_message": format!(
			"<details><summary>{now}: Outpost could not start service: {error}</summary>{details}</details>"
		),
	})
}
