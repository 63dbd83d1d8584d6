// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Application state and router.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use outpost_server_config::AuthConfig;
use outpost_server_jobs::JobScheduler;
use outpost_server_spawner::Outpost;

use crate::routes;

#[derive(Clone)]
pub struct AppState {
	pub outpost: Outpost,
	pub auth: Arc<AuthConfig>,
	pub job_scheduler: Option<Arc<JobScheduler>>,
}

impl AppState {
	pub fn new(outpost: Outpost, auth: AuthConfig) -> Self {
		Self {
			outpost,
			auth: Arc::new(auth),
			job_scheduler: None,
		}
	}
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/ping", get(routes::health::ping))
		.route("/health", get(routes::health::health_check))
		.route("/flavors", get(routes::flavors::get_flavors))
		.route("/userflavors", post(routes::flavors::get_user_flavors))
		.route(
			"/services",
			get(routes::services::list_services).post(routes::services::create_service),
		)
		.route(
			"/services/{name}",
			get(routes::services::poll_service).delete(routes::services::stop_service),
		)
		.route(
			"/services/{name}/{start_id}",
			get(routes::services::poll_service_with_id).delete(routes::services::stop_service_with_id),
		)
		.with_state(state)
}
