// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The start request body sent by a hub.

use std::collections::HashMap;

use outpost_server_db::UNDEFINED_FLAVOR;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::key::DEFAULT_START_ID;

pub const ENV_USER_ID: &str = "JUPYTERHUB_USER_ID";
pub const ENV_USER_NAME: &str = "JUPYTERHUB_USER";
pub const ENV_API_TOKEN: &str = "JUPYTERHUB_API_TOKEN";
pub const ENV_EVENTS_URL: &str = "JUPYTERHUB_EVENTS_URL";
pub const ENV_FLAVORS_UPDATE_URL: &str = "JUPYTERHUB_FLAVORS_UPDATE_URL";
pub const ENV_FLAVORS_UPDATE_TOKEN: &str = "JUPYTERHUB_FLAVORS_UPDATE_TOKEN";
pub const ENV_SETUPTUNNEL_URL: &str = "JUPYTERHUB_SETUPTUNNEL_URL";

/// TLS material for the service's internal endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CertBundle {
	#[serde(default)]
	pub keyfile: String,
	#[serde(default)]
	pub certfile: String,
	#[serde(default)]
	pub cafile: String,
}

/// Start request body. `certs` and `internal_trust_bundles` are written to
/// disk and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceBody {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub start_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub flavor: Option<String>,
	#[serde(default)]
	pub env: Map<String, Value>,
	#[serde(default)]
	pub user_options: Map<String, Value>,
	/// Backend configuration overrides, subject to `allow_override`.
	#[serde(default)]
	pub misc: Map<String, Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub certs: Option<CertBundle>,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub internal_trust_bundles: HashMap<String, String>,
	/// End-user attributes used to narrow the flavor catalog.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authentication: Option<Map<String, Value>>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl ServiceBody {
	pub fn start_id(&self) -> &str {
		self.start_id.as_deref().unwrap_or(DEFAULT_START_ID)
	}

	/// Explicit flavor, then `user_options.flavor`, then the undefined sentinel.
	pub fn flavor(&self) -> String {
		self.flavor
			.clone()
			.or_else(|| {
				self.user_options
					.get("flavor")
					.and_then(Value::as_str)
					.map(str::to_string)
			})
			.filter(|f| !f.is_empty())
			.unwrap_or_else(|| UNDEFINED_FLAVOR.to_string())
	}

	/// An environment value as a string. Non-string values are rendered as JSON.
	pub fn env_str(&self, key: &str) -> Option<String> {
		match self.env.get(key)? {
			Value::Null => None,
			Value::String(s) => Some(s.clone()),
			other => Some(other.to_string()),
		}
	}

	/// Non-empty environment value.
	pub fn env_non_empty(&self, key: &str) -> Option<String> {
		self.env_str(key).filter(|v| !v.is_empty())
	}

	/// Owning user id from `JUPYTERHUB_USER_ID`, `0` when absent or invalid.
	pub fn user_id(&self) -> i64 {
		self.env_str(ENV_USER_ID)
			.and_then(|v| v.trim().parse().ok())
			.unwrap_or(0)
	}

	pub fn user_name(&self) -> String {
		self.env_str(ENV_USER_NAME).unwrap_or_default()
	}

	/// Environment rendered as strings, as handed to backends.
	pub fn env_strings(&self) -> HashMap<String, String> {
		self.env
			.keys()
			.filter_map(|k| self.env_str(k).map(|v| (k.clone(), v)))
			.collect()
	}

	/// The body as stored: transient TLS material removed.
	pub fn persisted(&self) -> ServiceBody {
		ServiceBody {
			certs: None,
			internal_trust_bundles: HashMap::new(),
			..self.clone()
		}
	}
}

/// Collect `auth-state-*` headers into a map keyed by the suffix.
pub fn auth_state_from_headers<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> HashMap<String, String> {
	headers
		.into_iter()
		.filter_map(|(name, value)| {
			let name = name.to_ascii_lowercase();
			name.strip_prefix("auth-state-")
				.map(|key| (key.to_string(), value.to_string()))
		})
		.collect()
}
