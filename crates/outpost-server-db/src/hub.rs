// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Clone)]
pub struct HubRepository {
	pool: SqlitePool,
}

impl HubRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Idempotently register a hub.
	#[tracing::instrument(skip(self))]
	pub async fn get_or_create(&self, name: &str) -> Result<()> {
		sqlx::query("INSERT OR IGNORE INTO hubs (name, created_at) VALUES (?, ?)")
			.bind(name)
			.bind(Utc::now())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list(&self) -> Result<Vec<String>> {
		let rows = sqlx::query_as::<_, (String,)>("SELECT name FROM hubs ORDER BY name")
			.fetch_all(&self.pool)
			.await?;
		Ok(rows.into_iter().map(|(name,)| name).collect())
	}
}
