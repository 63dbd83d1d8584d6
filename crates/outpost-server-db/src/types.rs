// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Flavor stored for services started without one.
pub const UNDEFINED_FLAVOR: &str = "_undefined";

/// One persisted workload lifecycle. Payload columns are opaque ciphertext.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRecord {
	pub id: i64,
	pub hub: String,
	pub name: String,
	pub start_id: String,
	pub owner_user_id: i64,
	pub flavor: String,
	pub body: Option<Vec<u8>>,
	pub state: Option<Vec<u8>>,
	pub start_response: Option<Vec<u8>>,
	pub state_stored: bool,
	pub start_pending: bool,
	pub stop_pending: bool,
	pub start_date: DateTime<Utc>,
	pub last_update: DateTime<Utc>,
	/// `None` means the service never expires.
	pub end_date: Option<DateTime<Utc>>,
}

impl ServiceRecord {
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		matches!(self.end_date, Some(end) if end < now)
	}

	pub fn summary(&self) -> ServiceSummary {
		ServiceSummary {
			name: self.name.clone(),
			start_id: self.start_id.clone(),
			owner_user_id: self.owner_user_id,
			flavor: self.flavor.clone(),
			start_pending: self.start_pending,
			stop_pending: self.stop_pending,
			start_date: self.start_date,
			last_update: self.last_update,
			end_date: self.end_date,
		}
	}
}

/// Fields written when a service is admitted.
#[derive(Debug, Clone)]
pub struct NewService {
	pub hub: String,
	pub name: String,
	pub start_id: String,
	pub owner_user_id: i64,
	pub flavor: String,
	pub body: Vec<u8>,
}

/// Usage counts read inside the admission transaction. Stopping services are
/// excluded from all three.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionCounts {
	/// Services of the requested flavor on the hub.
	pub flavor_current: i64,
	/// Services of the requested flavor owned by the requesting user.
	pub user_flavor_current: i64,
	/// All services owned by the requesting user on the hub.
	pub user_total: i64,
}

/// Record metadata without payloads, as listed to hubs.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
	pub name: String,
	pub start_id: String,
	pub owner_user_id: i64,
	pub flavor: String,
	pub start_pending: bool,
	pub stop_pending: bool,
	pub start_date: DateTime<Utc>,
	pub last_update: DateTime<Utc>,
	pub end_date: Option<DateTime<Utc>>,
}
