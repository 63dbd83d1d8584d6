// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::error::Result;

const STATEMENTS: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS hubs (
		name TEXT PRIMARY KEY NOT NULL,
		created_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS services (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		hub TEXT NOT NULL REFERENCES hubs(name),
		name TEXT NOT NULL,
		start_id TEXT NOT NULL,
		owner_user_id INTEGER NOT NULL DEFAULT 0,
		flavor TEXT NOT NULL DEFAULT '_undefined',
		body BLOB,
		state BLOB,
		start_response BLOB,
		state_stored INTEGER NOT NULL DEFAULT 0,
		start_pending INTEGER NOT NULL DEFAULT 1,
		stop_pending INTEGER NOT NULL DEFAULT 0,
		start_date TEXT NOT NULL,
		last_update TEXT NOT NULL,
		end_date TEXT,
		UNIQUE (hub, name, start_id)
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_services_usage ON services(hub, stop_pending, flavor)",
	"CREATE INDEX IF NOT EXISTS idx_services_owner ON services(hub, owner_user_id)",
];

/// Create the outpost tables if they do not exist yet.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	for statement in STATEMENTS {
		sqlx::query(statement).execute(pool).await?;
	}
	tracing::debug!("schema up to date");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn migrations_are_idempotent() {
		let pool = create_test_pool().await;
		run_migrations(&pool).await.unwrap();
		run_migrations(&pool).await.unwrap();
	}
}
