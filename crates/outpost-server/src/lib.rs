// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outpost HTTP server.
//!
//! Hubs start, poll and stop notebook services through this API. Requests
//! are authenticated per hub with HTTP Basic credentials and handed to the
//! [`outpost_server_spawner::Outpost`] pipeline.

pub mod api;
pub mod auth;
pub mod backends;
pub mod error;
pub mod jobs;
pub mod routes;

pub use api::{create_router, AppState};
pub use error::ServerError;
pub use outpost_server_config::ServerConfig;
