// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background jobs: reconciliation sweepers and startup tasks.

mod expiry_sweep;
mod orphan_sweep;
mod recreate_tunnels;

pub use expiry_sweep::ExpirySweepJob;
pub use orphan_sweep::{orphan_key, OrphanSweepJob};
pub use recreate_tunnels::RecreateTunnelsJob;

use outpost_server_jobs::JobOutput;

/// Tally of one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepCounts {
	pub stopped: usize,
	pub failed: usize,
}

impl SweepCounts {
	fn into_output(self, what: &str, extra: serde_json::Value) -> JobOutput {
		let mut metadata = serde_json::json!({
			"stopped": self.stopped,
			"failed": self.failed,
		});
		if let (Some(target), Some(extra)) = (metadata.as_object_mut(), extra.as_object()) {
			target.extend(extra.clone());
		}
		JobOutput {
			message: format!("Stopped {} {what} services, {} failed", self.stopped, self.failed),
			metadata: Some(metadata),
		}
	}
}
