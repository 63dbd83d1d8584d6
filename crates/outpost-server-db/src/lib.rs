// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for hubs and service records.

pub mod error;
pub mod hub;
pub mod pool;
pub mod schema;
pub mod service;
pub mod testing;
pub mod types;

pub use error::{DbError, Result};
pub use hub::HubRepository;
pub use pool::create_pool;
pub use schema::run_migrations;
pub use service::ServiceRepository;
pub use types::{AdmissionCounts, NewService, ServiceRecord, ServiceSummary, UNDEFINED_FLAVOR};
