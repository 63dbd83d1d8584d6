// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core outpost settings: payload key, flavor catalog, certificates and
//! hub notification defaults.

use std::path::PathBuf;

use outpost_common_config::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct OutpostConfig {
	/// Base64 encoded 32-byte key used to encrypt persisted payloads.
	pub crypt_key: SecretString,
	pub flavors_path: PathBuf,
	/// Parent of the per-service certificate directories.
	pub certs_dir: PathBuf,
	/// Services one user may run across all flavors; `-1` is unlimited.
	pub global_max_per_user: i64,
	pub send_events: bool,
	/// Fallback token for flavor usage updates when a request carries none.
	pub flavors_update_token: Option<SecretString>,
	pub request_timeout_secs: u64,
	pub recreate_tunnels_at_start: bool,
	pub backend: String,
}

impl Default for OutpostConfig {
	fn default() -> Self {
		Self {
			crypt_key: SecretString::default(),
			flavors_path: PathBuf::from("/mnt/flavors/flavors.yaml"),
			certs_dir: PathBuf::from("/tmp/outpost-certs"),
			global_max_per_user: -1,
			send_events: true,
			flavors_update_token: None,
			request_timeout_secs: 10,
			recreate_tunnels_at_start: false,
			backend: "local".to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutpostConfigLayer {
	pub crypt_key: Option<SecretString>,
	pub flavors_path: Option<String>,
	pub certs_dir: Option<String>,
	pub global_max_per_user: Option<i64>,
	pub send_events: Option<bool>,
	pub flavors_update_token: Option<SecretString>,
	pub request_timeout_secs: Option<u64>,
	pub recreate_tunnels_at_start: Option<bool>,
	pub backend: Option<String>,
}

impl OutpostConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.crypt_key.is_some() {
			self.crypt_key = other.crypt_key;
		}
		if other.flavors_path.is_some() {
			self.flavors_path = other.flavors_path;
		}
		if other.certs_dir.is_some() {
			self.certs_dir = other.certs_dir;
		}
		if other.global_max_per_user.is_some() {
			self.global_max_per_user = other.global_max_per_user;
		}
		if other.send_events.is_some() {
			self.send_events = other.send_events;
		}
		if other.flavors_update_token.is_some() {
			self.flavors_update_token = other.flavors_update_token;
		}
		if other.request_timeout_secs.is_some() {
			self.request_timeout_secs = other.request_timeout_secs;
		}
		if other.recreate_tunnels_at_start.is_some() {
			self.recreate_tunnels_at_start = other.recreate_tunnels_at_start;
		}
		if other.backend.is_some() {
			self.backend = other.backend;
		}
	}

	pub fn finalize(self) -> Result<OutpostConfig, ConfigError> {
		let crypt_key = self
			.crypt_key
			.filter(|k| !k.is_empty())
			.ok_or_else(|| {
				ConfigError::Validation(
					"outpost.crypt_key is required (set OUTPOST_SERVER_CRYPT_KEY or OUTPOST_SERVER_CRYPT_KEY_FILE)"
						.to_string(),
				)
			})?;

		let defaults = OutpostConfig::default();
		Ok(OutpostConfig {
			crypt_key,
			flavors_path: self
				.flavors_path
				.map(PathBuf::from)
				.unwrap_or(defaults.flavors_path),
			certs_dir: self.certs_dir.map(PathBuf::from).unwrap_or(defaults.certs_dir),
			global_max_per_user: self
				.global_max_per_user
				.unwrap_or(defaults.global_max_per_user),
			send_events: self.send_events.unwrap_or(defaults.send_events),
			flavors_update_token: self.flavors_update_token.filter(|t| !t.is_empty()),
			request_timeout_secs: self
				.request_timeout_secs
				.unwrap_or(defaults.request_timeout_secs),
			recreate_tunnels_at_start: self
				.recreate_tunnels_at_start
				.unwrap_or(defaults.recreate_tunnels_at_start),
			backend: self.backend.unwrap_or(defaults.backend),
		})
	}
}
