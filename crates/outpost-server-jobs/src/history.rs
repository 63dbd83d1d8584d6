// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process record of job runs, kept for health reporting.

use crate::types::{JobRun, JobStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

/// Runs kept per job.
const MAX_RUNS_PER_JOB: usize = 20;

#[derive(Default)]
pub struct RunHistory {
	runs: Mutex<HashMap<String, Vec<JobRun>>>,
}

impl RunHistory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record_run_start(&self, run: &JobRun) {
		let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
		let job_runs = runs.entry(run.job_id.clone()).or_default();
		job_runs.push(run.clone());
		if job_runs.len() > MAX_RUNS_PER_JOB {
			let excess = job_runs.len() - MAX_RUNS_PER_JOB;
			job_runs.drain(..excess);
		}
	}

	pub fn record_run_complete(
		&self,
		job_id: &str,
		run_id: &str,
		status: JobStatus,
		error_message: Option<String>,
		metadata: Option<serde_json::Value>,
	) {
		let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
		let Some(run) = runs
			.get_mut(job_id)
			.and_then(|r| r.iter_mut().rev().find(|r| r.id == run_id))
		else {
			tracing::warn!(job_id, run_id, "completing unknown job run");
			return;
		};
		let now = Utc::now();
		run.status = status;
		run.completed_at = Some(now);
		run.duration_ms = Some((now - run.started_at).num_milliseconds());
		run.error_message = error_message;
		run.metadata = metadata;
	}

	/// Note a retry on the still-running run.
	pub fn record_retry(&self, job_id: &str, run_id: &str, retry_count: u32) {
		let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(run) = runs
			.get_mut(job_id)
			.and_then(|r| r.iter_mut().rev().find(|r| r.id == run_id))
		{
			run.retry_count = retry_count;
		}
	}

	pub fn get_last_run(&self, job_id: &str) -> Option<JobRun> {
		let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
		runs.get(job_id).and_then(|r| r.last().cloned())
	}

	/// Failed runs since the last run that did not fail.
	pub fn count_consecutive_failures(&self, job_id: &str) -> u32 {
		let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
		runs.get(job_id).map_or(0, |r| {
			r.iter()
				.rev()
				.filter(|r| r.status != JobStatus::Running)
				.take_while(|r| r.status == JobStatus::Failed)
				.count() as u32
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::TriggerSource;

	fn run(id: &str) -> JobRun {
		JobRun {
			id: id.to_string(),
			job_id: "sweep".to_string(),
			status: JobStatus::Running,
			started_at: Utc::now(),
			completed_at: None,
			duration_ms: None,
			error_message: None,
			retry_count: 0,
			triggered_by: TriggerSource::Schedule,
			metadata: None,
		}
	}

	#[test]
	fn counts_failures_since_last_success() {
		let history = RunHistory::new();
		for (id, status) in [
			("1", JobStatus::Failed),
			("2", JobStatus::Succeeded),
			("3", JobStatus::Failed),
			("4", JobStatus::Failed),
		] {
			history.record_run_start(&run(id));
			history.record_run_complete("sweep", id, status, None, None);
		}
		history.record_run_start(&run("5"));

		assert_eq!(history.count_consecutive_failures("sweep"), 2);
		assert_eq!(history.get_last_run("sweep").unwrap().status, JobStatus::Running);
	}

	#[test]
	fn unknown_job_has_no_history() {
		let history = RunHistory::new();
		assert!(history.get_last_run("nope").is_none());
		assert_eq!(history.count_consecutive_failures("nope"), 0);
	}

	#[test]
	fn keeps_a_bounded_number_of_runs() {
		let history = RunHistory::new();
		for i in 0..(MAX_RUNS_PER_JOB + 5) {
			let id = i.to_string();
			history.record_run_start(&run(&id));
			history.record_run_complete("sweep", &id, JobStatus::Failed, Some("boom".into()), None);
		}
		assert_eq!(
			history.count_consecutive_failures("sweep"),
			MAX_RUNS_PER_JOB as u32
		);
	}

	#[test]
	fn completion_records_duration_and_metadata() {
		let history = RunHistory::new();
		history.record_run_start(&run("1"));
		history.record_run_complete(
			"sweep",
			"1",
			JobStatus::Succeeded,
			None,
			Some(serde_json::json!({"stopped": 2})),
		);
		let last = history.get_last_run("sweep").unwrap();
		assert!(last.completed_at.is_some());
		assert!(last.duration_ms.unwrap() >= 0);
		assert_eq!(last.metadata.unwrap()["stopped"], 2);
	}
}
