// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP basic auth for hubs. The username is the hub name.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use base64::Engine;
use outpost_server_config::AuthConfig;

use crate::api::AppState;
use crate::error::ServerError;

/// The authenticated hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hub(pub String);

impl FromRequestParts<AppState> for Hub {
	type Rejection = ServerError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		match authenticate(&parts.headers, &state.auth) {
			Some(hub) => Ok(Hub(hub)),
			None => {
				tracing::debug!(path = %parts.uri.path(), "rejected unauthenticated request");
				Err(ServerError::Unauthorized)
			}
		}
	}
}

/// Hub name for valid basic-auth credentials.
pub fn authenticate(headers: &HeaderMap, auth: &AuthConfig) -> Option<String> {
	let (username, password) = basic_credentials(headers)?;
	let credential = auth.find(&username)?;
	(credential.password.expose() == &password).then_some(username)
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
	let encoded = value.strip_prefix("Basic ")?;
	let decoded = base64::engine::general_purpose::STANDARD
		.decode(encoded.trim())
		.ok()?;
	let credentials = String::from_utf8(decoded).ok()?;
	let (username, password) = credentials.split_once(':')?;
	Some((username.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::HeaderValue;
	use outpost_server_config::HubCredential;

	fn config() -> AuthConfig {
		AuthConfig {
			credentials: vec![HubCredential {
				username: "hub1".to_string(),
				password: "secret".into(),
			}],
		}
	}

	fn headers(user: &str, password: &str) -> HeaderMap {
		let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
		let mut headers = HeaderMap::new();
		headers.insert(
			header::AUTHORIZATION,
			HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
		);
		headers
	}

	#[test]
	fn valid_credentials_name_the_hub() {
		assert_eq!(authenticate(&headers("hub1", "secret"), &config()), Some("hub1".to_string()));
	}

	#[test]
	fn wrong_password_is_rejected() {
		assert_eq!(authenticate(&headers("hub1", "nope"), &config()), None);
	}

	#[test]
	fn unknown_hub_is_rejected() {
		assert_eq!(authenticate(&headers("hub2", "secret"), &config()), None);
	}

	#[test]
	fn missing_or_malformed_header_is_rejected() {
		assert_eq!(authenticate(&HeaderMap::new(), &config()), None);

		let mut bearer = HeaderMap::new();
		bearer.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
		assert_eq!(authenticate(&bearer, &config()), None);

		let mut garbage = HeaderMap::new();
		garbage.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
		assert_eq!(authenticate(&garbage, &config()), None);
	}

	#[test]
	fn passwords_may_contain_colons() {
		let auth = AuthConfig {
			credentials: vec![HubCredential {
				username: "hub1".to_string(),
				password: "a:b".into(),
			}],
		};
		assert_eq!(authenticate(&headers("hub1", "a:b"), &auth), Some("hub1".to_string()));
	}
}
