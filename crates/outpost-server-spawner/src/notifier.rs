// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Calls back into hubs: progress events, quota-usage updates, tunnel setup
//! and the running-services list used by the orphan sweeper.

use std::time::Duration;

use outpost_common_http::{new_client_with_timeout, retry, RetryConfig};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
#[error("request to {url} failed: {source}")]
pub struct NotifyError {
	pub url: String,
	#[source]
	pub source: reqwest::Error,
}

#[derive(Clone)]
pub struct HubNotifier {
	client: reqwest::Client,
	retry: RetryConfig,
}

impl HubNotifier {
	pub fn new(timeout: Duration) -> Self {
		Self {
			client: new_client_with_timeout(timeout),
			retry: RetryConfig::default(),
		}
	}

	pub fn with_retry(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;
		self
	}

	async fn post_json<T: Serialize + ?Sized>(&self, url: &str, token: &str, body: &T) -> Result<(), NotifyError> {
		self.client
			.post(url)
			.header(reqwest::header::AUTHORIZATION, format!("token {token}"))
			.header(reqwest::header::ACCEPT, "application/json")
			.json(body)
			.send()
			.await
			.and_then(|r| r.error_for_status())
			.map(|_| ())
			.map_err(|source| NotifyError {
				url: url.to_string(),
				source,
			})
	}

	/// Best-effort progress event push.
	#[tracing::instrument(skip(self, token, event))]
	pub async fn send_event(&self, url: &str, token: &str, event: &Value) {
		if let Err(e) = self.post_json(url, token, event).await {
			let message = event
				.get("html_message")
				.or_else(|| event.get("message"))
				.and_then(Value::as_str)
				.unwrap_or_default();
			tracing::warn!(error = %e, message, "could not send event to hub");
		}
	}

	/// Best-effort quota-usage push.
	#[tracing::instrument(skip(self, token, usage))]
	pub async fn send_flavor_update<T: Serialize + ?Sized + Sync>(&self, url: &str, token: &str, usage: &T) {
		match self.post_json(url, token, usage).await {
			Ok(()) => tracing::debug!("sent flavor update"),
			Err(e) => tracing::warn!(error = %e, "could not send flavor update"),
		}
	}

	/// Replay a stored start response so the hub can rebuild its tunnel.
	#[tracing::instrument(skip(self, token, start_response))]
	pub async fn setup_tunnel(&self, url: &str, token: &str, start_response: &Value) -> Result<(), NotifyError> {
		self.post_json(url, token, start_response).await
	}

	/// Services the hub believes are running, retried on transient failure.
	#[tracing::instrument(skip(self, token))]
	pub async fn fetch_running(&self, url: &str, token: &str) -> Result<Vec<String>, NotifyError> {
		retry(&self.retry, || async {
			self.client
				.get(url)
				.header(reqwest::header::AUTHORIZATION, format!("token {token}"))
				.header(reqwest::header::ACCEPT, "application/json")
				.send()
				.await?
				.error_for_status()?
				.json::<Vec<String>>()
				.await
		})
		.await
		.map_err(|source| NotifyError {
			url: url.to_string(),
			source,
		})
	}
}
