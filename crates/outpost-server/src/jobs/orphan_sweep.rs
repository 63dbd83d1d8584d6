// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use outpost_server_config::UpstreamHub;
use outpost_server_db::ServiceRecord;
use outpost_server_jobs::{Job, JobContext, JobError, JobOutput};
use outpost_server_spawner::{Outpost, ServiceKey, StopDisposition};
use tracing::instrument;

use super::SweepCounts;

/// Identifier hubs use for a running service.
pub fn orphan_key(record: &ServiceRecord) -> String {
	format!("{}_{}_{}", record.owner_user_id, record.name, record.start_id)
}

/// Stops services their hub no longer knows about.
pub struct OrphanSweepJob {
	outpost: Outpost,
	hubs: Vec<UpstreamHub>,
	grace: chrono::Duration,
}

impl OrphanSweepJob {
	pub fn new(outpost: Outpost, hubs: Vec<UpstreamHub>, grace: std::time::Duration) -> Self {
		Self {
			outpost,
			hubs,
			grace: chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::weeks(52)),
		}
	}

	async fn sweep_hub(&self, hub: &UpstreamHub, counts: &mut SweepCounts) -> Result<(), String> {
		let running: HashSet<String> = self
			.outpost
			.notifier()
			.fetch_running(&hub.url, hub.token.expose())
			.await
			.map_err(|e| e.to_string())?
			.into_iter()
			.collect();
		let records = self
			.outpost
			.services()
			.list_for_hub(&hub.name)
			.await
			.map_err(|e| e.to_string())?;

		let Some(cutoff) = Utc::now().checked_sub_signed(self.grace) else {
			return Ok(());
		};
		for record in records {
			if record.stop_pending || record.start_date > cutoff || running.contains(&orphan_key(&record)) {
				continue;
			}
			let key = ServiceKey::new(&record.hub, &record.name, &record.start_id);
			tracing::info!(key = %key, "service is not running on its hub, stopping");
			match self.outpost.stop_service(&key, HashMap::new()).await {
				Ok(StopDisposition::Stopped(_)) | Ok(StopDisposition::AlreadyStopping) => counts.stopped += 1,
				Ok(_) => {}
				Err(e) => {
					tracing::error!(key = %key, error = %e, "could not stop orphaned service");
					counts.failed += 1;
				}
			}
		}
		Ok(())
	}
}

#[async_trait]
impl Job for OrphanSweepJob {
	fn id(&self) -> &str {
		"orphan-sweep"
	}

	fn name(&self) -> &str {
		"Orphan Sweep"
	}

	fn description(&self) -> &str {
		"Stop services that are no longer running on their hub"
	}

	#[instrument(skip(self, ctx), fields(job_id = "orphan-sweep"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		let mut counts = SweepCounts::default();
		let mut unreachable = Vec::new();

		for hub in &self.hubs {
			if ctx.is_cancelled() {
				return Err(JobError::Cancelled);
			}
			if let Err(e) = self.sweep_hub(hub, &mut counts).await {
				tracing::warn!(hub = %hub.name, error = %e, "could not check hub for orphaned services");
				unreachable.push(hub.name.clone());
			}
		}

		Ok(counts.into_output("orphaned", serde_json::json!({ "unreachable_hubs": unreachable })))
	}
}
