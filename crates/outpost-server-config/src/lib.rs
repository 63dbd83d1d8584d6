// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration management for the outpost server.
//!
//! Layered configuration from defaults, a TOML file and environment
//! variables (`OUTPOST_SERVER_*`), resolved into a typed [`ServerConfig`].
//!
//! # Usage
//!
//! ```ignore
//! use outpost_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("Outpost listening on {}", config.socket_addr());
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub outpost: OutpostConfig,
	pub sweepers: SweepersConfig,
	pub auth: AuthConfig,
	pub logging: LoggingConfig,
}

impl ServerConfig {
	/// Get the socket address string for binding.
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`OUTPOST_SERVER_*`)
/// 2. Config file (`/etc/outpost/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let http = layer.http.unwrap_or_default().finalize();
	let database = layer.database.unwrap_or_default().finalize();
	let outpost = layer.outpost.unwrap_or_default().finalize()?;
	let sweepers = layer.sweepers.unwrap_or_default().finalize();
	let auth = layer.auth.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	validate_config(&sweepers)?;

	info!(
		host = %http.host,
		port = http.port,
		database = %database.url,
		flavors_path = %outpost.flavors_path.display(),
		backend = %outpost.backend,
		hubs = auth.credentials.len(),
		upstream_hubs = sweepers.upstream_hubs.len(),
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		http,
		database,
		outpost,
		sweepers,
		auth,
		logging,
	})
}

/// Validate cross-field configuration rules.
fn validate_config(sweepers: &SweepersConfig) -> Result<(), ConfigError> {
	if sweepers.expiry_enabled && sweepers.expiry_interval_secs == 0 {
		return Err(ConfigError::Validation(
			"sweepers.expiry_interval_secs must be greater than zero".to_string(),
		));
	}
	if sweepers.orphan_enabled && sweepers.orphan_interval_secs == 0 {
		return Err(ConfigError::Validation(
			"sweepers.orphan_interval_secs must be greater than zero".to_string(),
		));
	}
	Ok(())
}
