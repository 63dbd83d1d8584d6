// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use outpost_server_jobs::{Job, JobContext, JobError, JobOutput};
use outpost_server_spawner::Outpost;
use tracing::instrument;

/// Replays stored start responses to hub tunnel endpoints. Run once at startup.
pub struct RecreateTunnelsJob {
	outpost: Outpost,
}

impl RecreateTunnelsJob {
	pub fn new(outpost: Outpost) -> Self {
		Self { outpost }
	}
}

#[async_trait]
impl Job for RecreateTunnelsJob {
	fn id(&self) -> &str {
		"recreate-tunnels"
	}

	fn name(&self) -> &str {
		"Recreate Tunnels"
	}

	fn description(&self) -> &str {
		"Ask hubs to rebuild tunnels to services started before a restart"
	}

	#[instrument(skip(self, ctx), fields(job_id = "recreate-tunnels"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let report = self
			.outpost
			.recreate_tunnels()
			.await
			.map_err(|e| JobError::retryable(e.to_string()))?;

		Ok(JobOutput {
			message: format!("Recreated {} tunnels, {} failed", report.sent, report.failed),
			metadata: Some(serde_json::json!({
				"sent": report.sent,
				"skipped": report.skipped,
				"failed": report.failed,
			})),
		})
	}
}
