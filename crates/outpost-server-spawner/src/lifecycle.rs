// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The live object driving one service through start, poll and stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use outpost_server_crypt::Cipher;
use outpost_server_db::{ServiceRecord, ServiceRepository};
use outpost_server_flavors::Flavor;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, CertPaths, ProgressStream};
use crate::error::{Result, SpawnerError};
use crate::hooks::Hooks;
use crate::key::ServiceKey;
use crate::notifier::HubNotifier;
use crate::request::{ServiceBody, ENV_API_TOKEN, ENV_EVENTS_URL};

/// Collaborators shared by every lifecycle object.
#[derive(Clone)]
pub struct LifecycleDeps {
	pub services: ServiceRepository,
	pub cipher: Cipher,
	pub notifier: HubNotifier,
	pub hooks: Arc<Hooks>,
}

/// Result of polling a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
	/// Start has not stored state yet, or the state could not be loaded.
	Unknown,
	Running,
	Exited(i32),
}

impl PollOutcome {
	/// The status reported to hubs: `null` unless the service has exited.
	pub fn status_code(self) -> Option<i32> {
		match self {
			PollOutcome::Exited(code) => Some(code),
			PollOutcome::Unknown | PollOutcome::Running => None,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOutcome {
	/// Set when the backend stop failed. Cleanup ran regardless.
	pub backend_error: Option<String>,
	pub record_deleted: bool,
}

struct Inner {
	backend: Box<dyn Backend>,
	cert_paths: Option<CertPaths>,
}

pub struct LifecycleObject {
	key: ServiceKey,
	body: ServiceBody,
	flavor: Option<Flavor>,
	inner: Mutex<Inner>,
	start_task: std::sync::Mutex<Option<AbortHandle>>,
	stopped: AtomicBool,
	deps: LifecycleDeps,
}

impl LifecycleObject {
	pub(crate) fn new(
		key: ServiceKey,
		body: ServiceBody,
		flavor: Option<Flavor>,
		cert_paths: Option<CertPaths>,
		backend: Box<dyn Backend>,
		deps: LifecycleDeps,
	) -> Self {
		Self {
			key,
			body,
			flavor,
			inner: Mutex::new(Inner { backend, cert_paths }),
			start_task: std::sync::Mutex::new(None),
			stopped: AtomicBool::new(false),
			deps,
		}
	}

	pub fn key(&self) -> &ServiceKey {
		&self.key
	}

	pub fn body(&self) -> &ServiceBody {
		&self.body
	}

	pub fn user_name(&self) -> String {
		self.body.user_name()
	}

	fn set_start_task(&self, handle: Option<AbortHandle>) {
		*self.start_task.lock().unwrap_or_else(|e| e.into_inner()) = handle;
	}

	/// Abort an in-flight start. Returns whether one was running.
	pub fn cancel_start(&self) -> bool {
		let handle = self.start_task.lock().unwrap_or_else(|e| e.into_inner()).take();
		match handle {
			Some(handle) => {
				handle.abort();
				true
			}
			None => false,
		}
	}

	/// Start the backend and persist its state. Returns the value reported
	/// to the hub as the service location.
	#[tracing::instrument(skip(self), fields(hub = %self.key.hub, service = %self.key.name, start_id = %self.key.start_id))]
	pub async fn start(self: &Arc<Self>) -> Result<Value> {
		let this = Arc::clone(self);
		let task = tokio::spawn(async move { this.run_start().await });
		self.set_start_task(Some(task.abort_handle()));
		let joined = task.await;
		self.set_start_task(None);

		match joined {
			Ok(result) => result,
			Err(e) if e.is_cancelled() => {
				tracing::warn!("start was cancelled");
				Err(SpawnerError::StartCancelled {
					key: self.key.clone(),
				})
			}
			Err(e) => Err(SpawnerError::Internal(format!("start task failed: {e}"))),
		}
	}

	async fn run_start(&self) -> Result<Value> {
		tracing::info!("starting service");
		let mut guard = self.inner.lock().await;
		if self.stopped.load(Ordering::SeqCst) {
			return Err(SpawnerError::StartCancelled {
				key: self.key.clone(),
			});
		}
		let inner = &mut *guard;
		let backend = inner.backend.as_mut();

		backend.clear_state();
		backend
			.pre_start()
			.await
			.map_err(|e| SpawnerError::backend(&self.key, e))?;

		if let Some(paths) = inner.cert_paths.take() {
			let moved = backend
				.move_certs(paths)
				.await
				.map_err(|e| SpawnerError::backend(&self.key, e))?;
			inner.cert_paths = Some(moved);
		}

		let forwarding = CancellationToken::new();
		let _stop_forwarding = forwarding.clone().drop_guard();
		let forwarder = match self.event_target().await {
			Some((url, token)) => backend.progress().map(|events| {
				tokio::spawn(forward_events(
					events,
					self.deps.notifier.clone(),
					url,
					token,
					forwarding.clone(),
				))
			}),
			None => None,
		};

		let result = backend.start().await;
		forwarding.cancel();
		if let Some(forwarder) = forwarder {
			let _ = forwarder.await;
		}

		let response = match result {
			Ok(response) => response,
			Err(e) => {
				tracing::error!(error = %e, "start failed");
				return Err(SpawnerError::backend(&self.key, e));
			}
		};
		let response = self.deps.hooks.sanitize(&self.key, response).await.into_value();

		let end_date = match self.flavor.as_ref().and_then(|f| f.runtime.as_ref()) {
			Some(runtime) => Some(runtime.end_date(Utc::now()).ok_or_else(|| {
				SpawnerError::Internal(format!("runtime {runtime:?} does not fit a timestamp"))
			})?),
			None => None,
		};
		if let Some(end_date) = end_date {
			tracing::info!(%end_date, "service will expire");
		}

		let state = self.deps.cipher.seal_json(&backend.get_state())?;
		let start_response = self.deps.cipher.seal_json(&json!({ "service": response }))?;
		self.deps
			.services
			.store_start_result(
				&self.key.hub,
				&self.key.name,
				&self.key.start_id,
				&state,
				&start_response,
				end_date,
			)
			.await?;

		tracing::info!(%response, "service started");
		Ok(response)
	}

	/// Events URL and token when the hub wants progress events.
	async fn event_target(&self) -> Option<(String, String)> {
		let url = self.body.env_non_empty(ENV_EVENTS_URL)?;
		if !self.deps.hooks.send_events.resolve(&self.key.hub).await {
			return None;
		}
		Some((url, self.body.env_str(ENV_API_TOKEN).unwrap_or_default()))
	}

	/// Push one event to the hub's events endpoint, if it has one.
	pub async fn send_event(&self, event: &Value) {
		let Some(url) = self.body.env_non_empty(ENV_EVENTS_URL) else {
			return;
		};
		let token = self.body.env_str(ENV_API_TOKEN).unwrap_or_default();
		self.deps.notifier.send_event(&url, &token, event).await;
	}

	#[tracing::instrument(skip(self, record), fields(hub = %self.key.hub, service = %self.key.name, start_id = %self.key.start_id))]
	pub async fn poll(&self, record: &ServiceRecord) -> Result<PollOutcome> {
		if !record.state_stored {
			tracing::debug!("start has not finished, status unknown");
			return Ok(PollOutcome::Unknown);
		}

		let state: Value = match record.state.as_deref().map(|blob| self.deps.cipher.open_json(blob)) {
			Some(Ok(state)) => state,
			Some(Err(e)) => {
				tracing::warn!(error = %e, "could not decrypt state, status unknown");
				return Ok(PollOutcome::Unknown);
			}
			None => return Ok(PollOutcome::Unknown),
		};

		let mut inner = self.inner.lock().await;
		if let Err(e) = inner.backend.load_state(&state) {
			tracing::warn!(error = %e, "could not load state, status unknown");
			return Ok(PollOutcome::Unknown);
		}
		let status = inner
			.backend
			.poll()
			.await
			.map_err(|e| SpawnerError::backend(&self.key, e))?;
		drop(inner);

		self.deps
			.services
			.touch(&self.key.hub, &self.key.name, &self.key.start_id)
			.await?;

		Ok(match status {
			None => PollOutcome::Running,
			Some(code) => PollOutcome::Exited(code),
		})
	}

	/// Stop the backend and delete `record`. Backend failures are logged and
	/// reported in the outcome; cleanup always runs.
	#[tracing::instrument(skip(self, record), fields(hub = %self.key.hub, service = %self.key.name, start_id = %self.key.start_id))]
	pub async fn stop(&self, record: Option<&ServiceRecord>, immediate: bool) -> StopOutcome {
		tracing::info!("stopping service");
		self.stopped.store(true, Ordering::SeqCst);
		if self.cancel_start() {
			tracing::info!("cancelled in-flight start");
		}

		let mut inner = self.inner.lock().await;
		match record.and_then(|r| r.state.as_deref().filter(|_| r.state_stored)) {
			Some(blob) => match self.deps.cipher.open_json::<Value>(blob) {
				Ok(state) => {
					if let Err(e) = inner.backend.load_state(&state) {
						tracing::warn!(error = %e, "could not load state before stop");
					}
				}
				Err(e) => tracing::warn!(error = %e, "could not decrypt state before stop"),
			},
			None => tracing::debug!("no stored state"),
		}

		let backend_error = match inner.backend.stop(immediate).await {
			Ok(()) => None,
			Err(e) => {
				tracing::error!(error = %e, "stop failed");
				Some(e.to_string())
			}
		};
		if let Err(e) = inner.backend.post_stop().await {
			tracing::warn!(error = %e, "post-stop hook failed");
		}
		inner.backend.clear_state();
		drop(inner);

		let record_deleted = match record {
			Some(r) => match self.deps.services.delete(&r.hub, &r.name, &r.start_id).await {
				Ok(deleted) => deleted,
				Err(e) => {
					tracing::error!(error = %e, "could not delete service record");
					false
				}
			},
			None => false,
		};

		StopOutcome {
			backend_error,
			record_deleted,
		}
	}
}

async fn forward_events(
	mut events: ProgressStream,
	notifier: HubNotifier,
	url: String,
	token: String,
	done: CancellationToken,
) {
	loop {
		tokio::select! {
			biased;
			event = events.next() => match event {
				Some(event) => send_progress(&notifier, &url, &token, event).await,
				None => return,
			},
			_ = done.cancelled() => break,
		}
	}

	// Deliver whatever the backend emitted before start returned.
	while let Some(Some(event)) = events.next().now_or_never() {
		send_progress(&notifier, &url, &token, event).await;
	}
}

async fn send_progress(notifier: &HubNotifier, url: &str, token: &str, mut event: serde_json::Map<String, Value>) {
	// Readiness is decided by the start result, never by an event.
	event.remove("ready");
	notifier.send_event(url, token, &Value::Object(event)).await;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_exited_services_report_a_status_code() {
		assert_eq!(PollOutcome::Unknown.status_code(), None);
		assert_eq!(PollOutcome::Running.status_code(), None);
		assert_eq!(PollOutcome::Exited(3).status_code(), Some(3));
	}
}
