// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML files and environment variables.

use std::path::PathBuf;

use outpost_common_config::load_secret_env;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	AuthConfigLayer, DatabaseConfigLayer, HttpConfigLayer, LogFormat, LoggingConfigLayer,
	OutpostConfigLayer, SweepersConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/outpost/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: OUTPOST_SERVER_<FIELD>. List-valued settings (hub credentials,
/// upstream hubs) are JSON arrays and may be supplied through `*_FILE`.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			http: Some(load_http_from_env()?),
			database: Some(load_database_from_env()),
			outpost: Some(load_outpost_from_env()?),
			sweepers: Some(load_sweepers_from_env()?),
			auth: Some(load_auth_from_env()?),
			logging: Some(load_logging_from_env()),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {kind} value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_secret(name: &str) -> Result<Option<outpost_common_config::SecretString>, ConfigError> {
	load_secret_env(name).map_err(|e| ConfigError::Secret(e.to_string()))
}

fn env_json_list<T: DeserializeOwned>(name: &str) -> Result<Option<Vec<T>>, ConfigError> {
	let Some(raw) = env_secret(name)? else {
		return Ok(None);
	};
	serde_json::from_str(raw.expose())
		.map(Some)
		.map_err(|e| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("expected a JSON array: {e}"),
		})
}

fn load_http_from_env() -> Result<HttpConfigLayer, ConfigError> {
	Ok(HttpConfigLayer {
		host: env_var("OUTPOST_SERVER_HOST"),
		port: env_parse("OUTPOST_SERVER_PORT", "u16")?,
	})
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("OUTPOST_SERVER_DATABASE_URL"),
	}
}

fn load_outpost_from_env() -> Result<OutpostConfigLayer, ConfigError> {
	Ok(OutpostConfigLayer {
		crypt_key: env_secret("OUTPOST_SERVER_CRYPT_KEY")?,
		flavors_path: env_var("OUTPOST_SERVER_FLAVORS_PATH"),
		certs_dir: env_var("OUTPOST_SERVER_CERTS_DIR"),
		global_max_per_user: env_parse("OUTPOST_SERVER_GLOBAL_MAX_PER_USER", "i64")?,
		send_events: env_bool("OUTPOST_SERVER_SEND_EVENTS"),
		flavors_update_token: env_secret("OUTPOST_SERVER_FLAVORS_UPDATE_TOKEN")?,
		request_timeout_secs: env_parse("OUTPOST_SERVER_REQUEST_TIMEOUT_SECS", "u64")?,
		recreate_tunnels_at_start: env_bool("OUTPOST_SERVER_RECREATE_TUNNELS_AT_START"),
		backend: env_var("OUTPOST_SERVER_BACKEND"),
	})
}

fn load_sweepers_from_env() -> Result<SweepersConfigLayer, ConfigError> {
	Ok(SweepersConfigLayer {
		expiry_enabled: env_bool("OUTPOST_SERVER_EXPIRY_SWEEP_ENABLED"),
		expiry_interval_secs: env_parse("OUTPOST_SERVER_EXPIRY_SWEEP_INTERVAL_SECS", "u64")?,
		orphan_enabled: env_bool("OUTPOST_SERVER_ORPHAN_SWEEP_ENABLED"),
		orphan_interval_secs: env_parse("OUTPOST_SERVER_ORPHAN_SWEEP_INTERVAL_SECS", "u64")?,
		orphan_grace_secs: env_parse("OUTPOST_SERVER_ORPHAN_GRACE_SECS", "u64")?,
		upstream_hubs: env_json_list("OUTPOST_SERVER_UPSTREAM_HUBS")?,
	})
}

fn load_auth_from_env() -> Result<AuthConfigLayer, ConfigError> {
	Ok(AuthConfigLayer {
		credentials: env_json_list("OUTPOST_SERVER_AUTH_CREDENTIALS")?,
	})
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("OUTPOST_SERVER_LOG_LEVEL"),
		format: env_var("OUTPOST_SERVER_LOG_FORMAT").and_then(|v| LogFormat::parse(&v)),
	}
}
