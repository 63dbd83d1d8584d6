// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod auth;
mod database;
mod http;
mod logging;
mod outpost;
mod sweepers;

pub use auth::{AuthConfig, AuthConfigLayer, HubCredential};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use http::{HttpConfig, HttpConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use outpost::{OutpostConfig, OutpostConfigLayer};
pub use sweepers::{SweepersConfig, SweepersConfigLayer, UpstreamHub};
