// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The capability interface provisioning backends implement.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;
use outpost_server_flavors::Flavor;
use serde_json::Value;

use crate::key::ServiceKey;
use crate::request::ServiceBody;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
	#[error("backend configuration rejected: {0}")]
	Config(String),

	#[error("start failed: {0}")]
	Start(String),

	#[error("poll failed: {0}")]
	Poll(String),

	#[error("stop failed: {0}")]
	Stop(String),

	#[error("invalid backend state: {0}")]
	State(String),

	#[error("hook failed: {0}")]
	Hook(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// What a backend reports once the workload is up.
#[derive(Debug, Clone, PartialEq)]
pub enum StartResponse {
	/// Reported to hubs as `"host:port"`.
	Address { host: String, port: u16 },
	Value(Value),
}

impl StartResponse {
	pub fn into_value(self) -> Value {
		match self {
			StartResponse::Address { host, port } => Value::String(format!("{host}:{port}")),
			StartResponse::Value(value) => value,
		}
	}
}

/// File locations of the service's TLS material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
	pub keyfile: PathBuf,
	pub certfile: PathBuf,
	pub cafile: PathBuf,
}

/// Everything a backend is constructed from.
#[derive(Debug, Clone)]
pub struct BackendContext {
	pub key: ServiceKey,
	pub body: ServiceBody,
	/// Collected from `auth-state-*` request headers.
	pub auth_state: HashMap<String, String>,
	pub cert_paths: Option<CertPaths>,
	pub trust_bundles: HashMap<String, PathBuf>,
	/// The flavor the service was admitted under, when known.
	pub flavor: Option<Flavor>,
}

/// Progress events produced while a backend starts.
pub type ProgressStream = BoxStream<'static, serde_json::Map<String, Value>>;

/// A provisioning backend bound to a single service.
#[async_trait]
pub trait Backend: Send + Sync {
	async fn pre_start(&mut self) -> BackendResult<()> {
		Ok(())
	}

	/// Move TLS material to where the workload expects it.
	async fn move_certs(&mut self, paths: CertPaths) -> BackendResult<CertPaths> {
		Ok(paths)
	}

	/// Events to forward to the hub while `start` runs. Taken before `start`.
	fn progress(&mut self) -> Option<ProgressStream> {
		None
	}

	async fn start(&mut self) -> BackendResult<StartResponse>;

	/// `None` while running, the exit status once stopped.
	async fn poll(&mut self) -> BackendResult<Option<i32>>;

	async fn stop(&mut self, immediate: bool) -> BackendResult<()>;

	async fn post_stop(&mut self) -> BackendResult<()> {
		Ok(())
	}

	/// Serializable state needed to rebuild this backend after a restart.
	fn get_state(&self) -> Value;

	fn load_state(&mut self, state: &Value) -> BackendResult<()>;

	fn clear_state(&mut self);
}

/// Builds backends. Selected once when the server starts.
pub trait BackendFactory: Send + Sync {
	fn name(&self) -> &str;

	fn create(&self, ctx: &BackendContext) -> BackendResult<Box<dyn Backend>>;
}
