// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Service start, poll, stop and listing handlers.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use outpost_server_db::ServiceSummary;
use outpost_server_spawner::{
	auth_state_from_headers, ExecutionMode, ServiceBody, ServiceKey, StartOutcome, StartRequest, StopDisposition,
	DEFAULT_START_ID,
};
use serde_json::json;

use crate::api::AppState;
use crate::auth::Hub;
use crate::error::ServerError;

const EXECUTION_TYPE: &str = "execution-type";

fn execution_mode(headers: &HeaderMap) -> ExecutionMode {
	let is_async = headers
		.get(EXECUTION_TYPE)
		.and_then(|v| v.to_str().ok())
		.is_some_and(|v| v.eq_ignore_ascii_case("async"));
	if is_async {
		ExecutionMode::Async
	} else {
		ExecutionMode::Sync
	}
}

fn auth_state(headers: &HeaderMap) -> HashMap<String, String> {
	auth_state_from_headers(
		headers
			.iter()
			.filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
	)
}

/// GET /services - services the hub has on this outpost.
pub async fn list_services(
	Hub(hub): Hub,
	State(state): State<AppState>,
) -> Result<Json<Vec<ServiceSummary>>, ServerError> {
	Ok(Json(state.outpost.list_services(&hub).await?))
}

/// POST /services - admit and start a service.
pub async fn create_service(
	Hub(hub): Hub,
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<ServiceBody>,
) -> Result<Response, ServerError> {
	let request = StartRequest {
		hub,
		body,
		auth_state: auth_state(&headers),
	};
	let outcome = state
		.outpost
		.create_service(request, execution_mode(&headers))
		.await?;

	Ok(match outcome {
		StartOutcome::Started(service) => (StatusCode::OK, Json(json!({ "service": service }))).into_response(),
		StartOutcome::Accepted => (StatusCode::ACCEPTED, Json(json!({}))).into_response(),
	})
}

/// GET /services/{name}
pub async fn poll_service(
	hub: Hub,
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(name): Path<String>,
) -> Result<Response, ServerError> {
	poll(hub, state, headers, name, DEFAULT_START_ID.to_string()).await
}

/// GET /services/{name}/{start_id}
pub async fn poll_service_with_id(
	hub: Hub,
	State(state): State<AppState>,
	headers: HeaderMap,
	Path((name, start_id)): Path<(String, String)>,
) -> Result<Response, ServerError> {
	poll(hub, state, headers, name, start_id).await
}

async fn poll(
	Hub(hub): Hub,
	state: AppState,
	headers: HeaderMap,
	name: String,
	start_id: String,
) -> Result<Response, ServerError> {
	let key = ServiceKey::new(hub, name, start_id);
	let outcome = state.outpost.poll_service(&key, auth_state(&headers)).await?;
	Ok(Json(json!({ "status": outcome.status_code() })).into_response())
}

/// DELETE /services/{name}
pub async fn stop_service(
	hub: Hub,
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(name): Path<String>,
) -> Result<Response, ServerError> {
	stop(hub, state, headers, name, DEFAULT_START_ID.to_string()).await
}

/// DELETE /services/{name}/{start_id}
pub async fn stop_service_with_id(
	hub: Hub,
	State(state): State<AppState>,
	headers: HeaderMap,
	Path((name, start_id)): Path<(String, String)>,
) -> Result<Response, ServerError> {
	stop(hub, state, headers, name, start_id).await
}

async fn stop(
	Hub(hub): Hub,
	state: AppState,
	headers: HeaderMap,
	name: String,
	start_id: String,
) -> Result<Response, ServerError> {
	let key = ServiceKey::new(hub, name, start_id);
	let auth_state = auth_state(&headers);

	let disposition = match execution_mode(&headers) {
		ExecutionMode::Async => {
			let exists = state
				.outpost
				.services()
				.get(&key.hub, &key.name, &key.start_id)
				.await
				.map_err(|e| ServerError::Spawner(e.into()))?
				.is_some();
			if !exists {
				return Err(ServerError::NotFound(key.to_string()));
			}
			state.outpost.stop_service_detached(key.clone(), auth_state)
		}
		ExecutionMode::Sync => state.outpost.stop_service(&key, auth_state).await?,
	};

	match disposition {
		StopDisposition::Missing => Err(ServerError::NotFound(key.to_string())),
		StopDisposition::Accepted => Ok((StatusCode::ACCEPTED, Json(json!({}))).into_response()),
		StopDisposition::Stopped(_) | StopDisposition::AlreadyStopping => Ok(Json(json!({})).into_response()),
	}
}
