// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use outpost_server_jobs::{Job, JobContext, JobError, JobOutput};
use outpost_server_spawner::{Outpost, ServiceKey, StopDisposition};
use tracing::instrument;

use super::SweepCounts;

/// Stops services whose runtime has run out.
pub struct ExpirySweepJob {
	outpost: Outpost,
}

impl ExpirySweepJob {
	pub fn new(outpost: Outpost) -> Self {
		Self { outpost }
	}
}

#[async_trait]
impl Job for ExpirySweepJob {
	fn id(&self) -> &str {
		"expiry-sweep"
	}

	fn name(&self) -> &str {
		"Expiry Sweep"
	}

	fn description(&self) -> &str {
		"Stop services past their flavor runtime"
	}

	#[instrument(skip(self, ctx), fields(job_id = "expiry-sweep"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let expired = self
			.outpost
			.services()
			.list_expired(Utc::now())
			.await
			.map_err(|e| JobError::retryable(e.to_string()))?;

		let mut counts = SweepCounts::default();
		for record in expired {
			if ctx.is_cancelled() {
				return Err(JobError::Cancelled);
			}
			let key = ServiceKey::new(&record.hub, &record.name, &record.start_id);
			tracing::info!(key = %key, end_date = ?record.end_date, "service expired");
			match self.outpost.stop_service(&key, HashMap::new()).await {
				Ok(StopDisposition::Stopped(_)) | Ok(StopDisposition::AlreadyStopping) => counts.stopped += 1,
				Ok(_) => {}
				Err(e) => {
					tracing::error!(key = %key, error = %e, "could not stop expired service");
					counts.failed += 1;
				}
			}
		}

		if counts.stopped > 0 || counts.failed > 0 {
			tracing::info!(stopped = counts.stopped, failed = counts.failed, "expiry sweep completed");
		}
		Ok(counts.into_output("expired", serde_json::json!({})))
	}
}
