// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hub credentials for HTTP basic auth.

use outpost_common_config::SecretString;
use serde::Deserialize;

/// One hub allowed to talk to this outpost. The username is the hub name.
#[derive(Debug, Clone, Deserialize)]
pub struct HubCredential {
	pub username: String,
	pub password: SecretString,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
	pub credentials: Vec<HubCredential>,
}

impl AuthConfig {
	pub fn find(&self, username: &str) -> Option<&HubCredential> {
		self.credentials.iter().find(|c| c.username == username)
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfigLayer {
	#[serde(default)]
	pub credentials: Option<Vec<HubCredential>>,
}

impl AuthConfigLayer {
	pub fn merge(&mut self, other: AuthConfigLayer) {
		if other.credentials.is_some() {
			self.credentials = other.credentials;
		}
	}

	pub fn finalize(self) -> AuthConfig {
		AuthConfig {
			credentials: self.credentials.unwrap_or_default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_deserialize_credentials() {
		let layer: AuthConfigLayer = toml::from_str(
			r#"
[[credentials]]
username = "jupyter"
password = "s3cret"
"#,
		)
		.unwrap();
		let config = layer.finalize();
		let cred = config.find("jupyter").unwrap();
		assert_eq!(cred.password.expose(), "s3cret");
		assert!(config.find("other").is_none());
	}

	#[test]
	fn test_debug_redacts_password() {
		let config = AuthConfig {
			credentials: vec![HubCredential {
				username: "jupyter".to_string(),
				password: SecretString::from("s3cret"),
			}],
		};
		let rendered = format!("{config:?}");
		assert!(!rendered.contains("s3cret"));
		assert!(rendered.contains("jupyter"));
	}
}
