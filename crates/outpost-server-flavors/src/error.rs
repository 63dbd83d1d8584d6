// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use outpost_server_db::DbError;

/// Failures reading or applying the flavor catalog.
#[derive(Debug, thiserror::Error)]
pub enum FlavorError {
	#[error("failed to read flavor catalog {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse flavor catalog {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("invalid override for flavor {flavor}: {source}")]
	Override {
		flavor: String,
		#[source]
		source: serde_json::Error,
	},

	#[error(transparent)]
	Db(#[from] DbError),
}

/// Reasons a start request is refused before anything is created.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
	#[error("{service} - Start with flavor {flavor} not allowed. Allowed values for user: {allowed:?}")]
	FlavorNotAllowed {
		service: String,
		flavor: String,
		allowed: Vec<String>,
	},

	#[error("{service} - Start with flavor {flavor} not allowed. Each user may only start {limit} of {flavor}")]
	PerUserLimit {
		service: String,
		flavor: String,
		limit: i64,
	},

	#[error("{service} - Start with {flavor} for {hub} not allowed. Maximum ({max}) already reached.")]
	FlavorLimit {
		service: String,
		flavor: String,
		hub: String,
		max: i64,
	},

	#[error("{service} - User with user id {user_id} of {hub} has reached the maximum limit of services ({limit})")]
	GlobalUserLimit {
		service: String,
		user_id: i64,
		hub: String,
		limit: i64,
	},

	#[error("{service} - Runtime of flavor {flavor} is out of range")]
	RuntimeOutOfRange {
		service: String,
		flavor: String,
	},

	#[error("{service} - A service with start id {start_id} already exists for {hub}")]
	AlreadyExists {
		service: String,
		start_id: String,
		hub: String,
	},

	#[error(transparent)]
	Catalog(#[from] FlavorError),

	#[error(transparent)]
	Db(#[from] DbError),
}

impl AdmissionError {
	/// True for quota rejections, false for infrastructure failures.
	pub fn is_rejection(&self) -> bool {
		!matches!(self, AdmissionError::Catalog(_) | AdmissionError::Db(_))
	}
}

pub type Result<T> = std::result::Result<T, FlavorError>;
