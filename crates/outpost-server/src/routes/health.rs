// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Liveness and health handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use outpost_server_jobs::{HealthState, JobsHealthStatus};
use serde_json::{json, Value};

use crate::api::AppState;
use crate::auth::Hub;

/// GET /ping - unauthenticated liveness probe.
pub async fn ping() -> Json<Value> {
	Json(json!({ "ping": "pong!" }))
}

/// GET /health - background job health.
pub async fn health_check(_hub: Hub, State(state): State<AppState>) -> impl IntoResponse {
	let health = match &state.job_scheduler {
		Some(scheduler) => scheduler.health_status(),
		None => JobsHealthStatus {
			status: HealthState::Healthy,
			jobs: Vec::new(),
		},
	};
	let status = match health.status {
		HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
		HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
	};
	(status, Json(health))
}
