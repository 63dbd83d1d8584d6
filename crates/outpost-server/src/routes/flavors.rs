// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flavor usage handlers.

use axum::extract::State;
use axum::Json;
use outpost_server_flavors::UsageMap;
use serde_json::{Map, Value};

use crate::api::AppState;
use crate::auth::Hub;
use crate::error::ServerError;

/// GET /flavors - usage of every flavor available to the hub.
pub async fn get_flavors(Hub(hub): Hub, State(state): State<AppState>) -> Result<Json<UsageMap>, ServerError> {
	Ok(Json(state.outpost.flavor_usage(&hub, None).await?))
}

/// POST /userflavors - usage narrowed to the user described by the body.
pub async fn get_user_flavors(
	Hub(hub): Hub,
	State(state): State<AppState>,
	Json(authentication): Json<Map<String, Value>>,
) -> Result<Json<UsageMap>, ServerError> {
	Ok(Json(state.outpost.flavor_usage(&hub, Some(authentication)).await?))
}
