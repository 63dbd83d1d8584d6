// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mapping of core errors onto HTTP responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use outpost_server_spawner::{ErrorDetails, SpawnerError};
use serde_json::json;

/// Status used for failures a hub should show to its user.
pub const USER_FACING_STATUS: u16 = 419;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error(transparent)]
	Spawner(#[from] SpawnerError),

	#[error("authentication required")]
	Unauthorized,

	#[error("service not found: {0}")]
	NotFound(String),
}

impl ServerError {
	pub fn status(&self) -> StatusCode {
		match self {
			ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
			ServerError::NotFound(_) => StatusCode::NOT_FOUND,
			ServerError::Spawner(SpawnerError::NotFound(_)) => StatusCode::NOT_FOUND,
			ServerError::Spawner(e) if e.is_user_facing() => {
				StatusCode::from_u16(USER_FACING_STATUS).unwrap_or(StatusCode::BAD_REQUEST)
			}
			ServerError::Spawner(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let status = self.status();
		match self {
			ServerError::Unauthorized => (
				status,
				[(header::WWW_AUTHENTICATE, "Basic realm=\"outpost\"")],
				Json(json!({ "error": "unauthorized", "message": "authentication required" })),
			)
				.into_response(),
			ServerError::NotFound(message) => {
				(status, Json(json!({ "error": "not_found", "message": message }))).into_response()
			}
			ServerError::Spawner(e) => {
				if status.is_server_error() {
					tracing::error!(error = %e, "request failed");
				} else {
					tracing::info!(error = %e, kind = e.kind(), "request rejected");
				}
				let details: ErrorDetails = e.details();
				(status, Json(details)).into_response()
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use outpost_server_flavors::AdmissionError;
	use outpost_server_spawner::ServiceKey;

	#[test]
	fn admission_rejections_use_the_user_facing_status() {
		let err = ServerError::from(SpawnerError::Admission(AdmissionError::FlavorLimit {
			service: "svc".to_string(),
			flavor: "small".to_string(),
			hub: "hub".to_string(),
			max: 1,
		}));
		assert_eq!(err.status().as_u16(), USER_FACING_STATUS);
	}

	#[test]
	fn missing_services_are_not_found() {
		let err = ServerError::from(SpawnerError::NotFound(ServiceKey::new("hub", "svc", "0")));
		assert_eq!(err.status(), StatusCode::NOT_FOUND);
	}

	#[test]
	fn internal_failures_are_server_errors() {
		let err = ServerError::from(SpawnerError::Internal("boom".to_string()));
		assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(ServerError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
	}
}
