// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Expiry and orphan sweeper configuration.

use outpost_common_config::SecretString;
use serde::Deserialize;

/// A hub the orphan sweeper asks for its list of running services.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamHub {
	pub name: String,
	pub url: String,
	pub token: SecretString,
}

#[derive(Debug, Clone)]
pub struct SweepersConfig {
	pub expiry_enabled: bool,
	pub expiry_interval_secs: u64,
	pub orphan_enabled: bool,
	pub orphan_interval_secs: u64,
	/// Records younger than this are never treated as orphans.
	pub orphan_grace_secs: u64,
	pub upstream_hubs: Vec<UpstreamHub>,
}

impl Default for SweepersConfig {
	fn default() -> Self {
		Self {
			expiry_enabled: true,
			expiry_interval_secs: 30,
			orphan_enabled: true,
			orphan_interval_secs: 30,
			orphan_grace_secs: 1800,
			upstream_hubs: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepersConfigLayer {
	pub expiry_enabled: Option<bool>,
	pub expiry_interval_secs: Option<u64>,
	pub orphan_enabled: Option<bool>,
	pub orphan_interval_secs: Option<u64>,
	pub orphan_grace_secs: Option<u64>,
	pub upstream_hubs: Option<Vec<UpstreamHub>>,
}

impl SweepersConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.expiry_enabled.is_some() {
			self.expiry_enabled = other.expiry_enabled;
		}
		if other.expiry_interval_secs.is_some() {
			self.expiry_interval_secs = other.expiry_interval_secs;
		}
		if other.orphan_enabled.is_some() {
			self.orphan_enabled = other.orphan_enabled;
		}
		if other.orphan_interval_secs.is_some() {
			self.orphan_interval_secs = other.orphan_interval_secs;
		}
		if other.orphan_grace_secs.is_some() {
			self.orphan_grace_secs = other.orphan_grace_secs;
		}
		if other.upstream_hubs.is_some() {
			self.upstream_hubs = other.upstream_hubs;
		}
	}

	pub fn finalize(self) -> SweepersConfig {
		let defaults = SweepersConfig::default();
		SweepersConfig {
			expiry_enabled: self.expiry_enabled.unwrap_or(defaults.expiry_enabled),
			expiry_interval_secs: self
				.expiry_interval_secs
				.unwrap_or(defaults.expiry_interval_secs),
			orphan_enabled: self.orphan_enabled.unwrap_or(defaults.orphan_enabled),
			orphan_interval_secs: self
				.orphan_interval_secs
				.unwrap_or(defaults.orphan_interval_secs),
			orphan_grace_secs: self.orphan_grace_secs.unwrap_or(defaults.orphan_grace_secs),
			upstream_hubs: self.upstream_hubs.unwrap_or_default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = SweepersConfigLayer::default().finalize();
		assert!(config.expiry_enabled);
		assert_eq!(config.expiry_interval_secs, 30);
		assert_eq!(config.orphan_grace_secs, 1800);
		assert!(config.upstream_hubs.is_empty());
	}

	#[test]
	fn test_deserialize_upstream_hubs() {
		let layer: SweepersConfigLayer = toml::from_str(
			r#"
orphan_interval_secs = 60

[[upstream_hubs]]
name = "jupyter"
url = "https://hub.example.org/hub/api/outpostspawner/running"
token = "abc"
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.orphan_interval_secs, 60);
		assert_eq!(config.upstream_hubs.len(), 1);
		assert_eq!(config.upstream_hubs[0].name, "jupyter");
		assert_eq!(config.upstream_hubs[0].token.expose(), "abc");
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = SweepersConfigLayer {
			expiry_enabled: Some(true),
			orphan_grace_secs: Some(1800),
			..Default::default()
		};
		base.merge(SweepersConfigLayer {
			expiry_enabled: Some(false),
			..Default::default()
		});
		assert_eq!(base.expiry_enabled, Some(false));
		assert_eq!(base.orphan_grace_secs, Some(1800));
	}
}
