// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use outpost_server_crypt::CryptError;
use outpost_server_db::DbError;
use outpost_server_flavors::{AdmissionError, FlavorError};
use serde::Serialize;

use crate::backend::BackendError;
use crate::key::{InvalidKeyPart, ServiceKey};

#[derive(Debug, thiserror::Error)]
pub enum SpawnerError {
	#[error(transparent)]
	Admission(#[from] AdmissionError),

	#[error(transparent)]
	InvalidKey(#[from] InvalidKeyPart),

	#[error("{hub} is not allowed to override the configuration. Used keys: {keys:?}")]
	AuthorizationDenied { hub: String, keys: Vec<String> },

	#[error("{key} - {source}")]
	Backend {
		key: ServiceKey,
		#[source]
		source: BackendError,
	},

	#[error("Start of {key} was cancelled.")]
	StartCancelled { key: ServiceKey },

	#[error("service not found: {0}")]
	NotFound(ServiceKey),

	#[error(transparent)]
	Catalog(#[from] FlavorError),

	#[error(transparent)]
	Crypt(#[from] CryptError),

	#[error(transparent)]
	Db(#[from] DbError),

	#[error("certificate material: {0}")]
	Io(#[from] std::io::Error),

	#[error("internal error: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, SpawnerError>;

/// Machine-readable error description returned to hubs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
	pub module: &'static str,
	pub class: &'static str,
	pub kind: &'static str,
	pub message: String,
	pub args: Vec<String>,
}

impl SpawnerError {
	pub fn backend(key: &ServiceKey, source: BackendError) -> Self {
		SpawnerError::Backend {
			key: key.clone(),
			source,
		}
	}

	/// Variant name, stable for callers matching on categories.
	pub fn kind(&self) -> &'static str {
		match self {
			SpawnerError::Admission(e) if e.is_rejection() => "AdmissionRejected",
			SpawnerError::Admission(_) => "AdmissionFailed",
			SpawnerError::InvalidKey(_) => "InvalidKey",
			SpawnerError::AuthorizationDenied { .. } => "AuthorizationDenied",
			SpawnerError::Backend { .. } => "BackendFailed",
			SpawnerError::StartCancelled { .. } => "StartCancelled",
			SpawnerError::NotFound(_) => "RecordNotFound",
			SpawnerError::Catalog(_) => "CatalogError",
			SpawnerError::Crypt(_) => "CryptError",
			SpawnerError::Db(_) => "DatabaseError",
			SpawnerError::Io(_) => "IoError",
			SpawnerError::Internal(_) => "Internal",
		}
	}

	/// Failures reported to hubs as a refused or failed start, rather than
	/// as a server fault.
	pub fn is_user_facing(&self) -> bool {
		match self {
			SpawnerError::Admission(e) => e.is_rejection(),
			SpawnerError::InvalidKey(_)
			| SpawnerError::AuthorizationDenied { .. }
			| SpawnerError::Backend { .. }
			| SpawnerError::StartCancelled { .. } => true,
			_ => false,
		}
	}

	pub fn details(&self) -> ErrorDetails {
		let (module, class) = match self {
			SpawnerError::Admission(_) | SpawnerError::Catalog(_) => ("outpost_server_flavors", "AdmissionError"),
			SpawnerError::InvalidKey(_) => ("outpost_server_spawner::key", "SpawnerError"),
			SpawnerError::AuthorizationDenied { .. } => ("outpost_server_spawner::registry", "SpawnerError"),
			SpawnerError::Backend { .. } | SpawnerError::StartCancelled { .. } => {
				("outpost_server_spawner::lifecycle", "BackendError")
			}
			SpawnerError::Crypt(_) => ("outpost_server_crypt", "CryptError"),
			SpawnerError::Db(_) => ("outpost_server_db", "DbError"),
			_ => ("outpost_server_spawner", "SpawnerError"),
		};
		let message = self.to_string();
		ErrorDetails {
			module,
			class,
			kind: self.kind(),
			args: vec![message.clone()],
			message,
		}
	}
}
