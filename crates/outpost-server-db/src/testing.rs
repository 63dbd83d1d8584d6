// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// In-memory database with the outpost schema.
///
/// A single connection so every query sees the same memory database.
pub async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.unwrap();
	crate::schema::run_migrations(&pool).await.unwrap();
	pool
}

/// File database under `dir` with the production pool settings, for tests
/// where several connections write at once.
pub async fn create_file_test_pool(dir: &Path) -> SqlitePool {
	let url = format!("sqlite:{}", dir.join("outpost.db").display());
	let pool = crate::pool::create_pool(&url).await.unwrap();
	crate::schema::run_migrations(&pool).await.unwrap();
	pool
}
