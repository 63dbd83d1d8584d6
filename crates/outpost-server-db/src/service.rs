// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, Result};
use crate::types::{AdmissionCounts, NewService, ServiceRecord};

const SELECT_COLUMNS: &str = "SELECT id, hub, name, start_id, owner_user_id, flavor, body, state, \
	start_response, state_stored, start_pending, stop_pending, start_date, last_update, end_date \
	FROM services";

fn describe(hub: &str, name: &str, start_id: &str) -> String {
	format!("service {hub}/{name}/{start_id}")
}

fn map_insert_error(e: sqlx::Error, new: &NewService) -> DbError {
	match &e {
		sqlx::Error::Database(db) if db.is_unique_violation() => {
			DbError::Conflict(describe(&new.hub, &new.name, &new.start_id))
		}
		_ => DbError::Sqlx(e),
	}
}

#[derive(Clone)]
pub struct ServiceRepository {
	pool: SqlitePool,
}

impl ServiceRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert without an admission check.
	#[tracing::instrument(skip(self, new), fields(hub = %new.hub, service = %new.name, start_id = %new.start_id))]
	pub async fn insert(&self, new: &NewService) -> Result<ServiceRecord> {
		let mut conn = self.pool.acquire().await?;
		insert_row(&mut conn, new).await
	}

	/// Count current usage and insert in one write transaction so that two
	/// admissions racing for the last slot of a flavor cannot both commit.
	/// The write lock is taken up front: a deferred transaction that reads
	/// first cannot be upgraded once another writer commits under WAL.
	///
	/// `check` sees the counts for `new.flavor` and `new.owner_user_id`;
	/// its value is returned with the record, and an error rolls the
	/// transaction back.
	#[tracing::instrument(skip(self, new, check), fields(hub = %new.hub, service = %new.name, start_id = %new.start_id, flavor = %new.flavor))]
	pub async fn insert_admitted<T, E, F>(
		&self,
		new: &NewService,
		check: F,
	) -> std::result::Result<(ServiceRecord, T), E>
	where
		E: From<DbError>,
		F: FnOnce(&AdmissionCounts) -> std::result::Result<T, E>,
	{
		let mut tx = self
			.pool
			.begin_with("BEGIN IMMEDIATE")
			.await
			.map_err(DbError::from)?;

		let counts = admission_counts(&mut tx, new).await?;
		tracing::debug!(?counts, "admission counts");
		let admitted = check(&counts)?;

		let record = insert_row(&mut tx, new).await?;
		tx.commit().await.map_err(DbError::from)?;
		Ok((record, admitted))
	}

	#[tracing::instrument(skip(self))]
	pub async fn get(&self, hub: &str, name: &str, start_id: &str) -> Result<Option<ServiceRecord>> {
		let sql = format!("{SELECT_COLUMNS} WHERE hub = ? AND name = ? AND start_id = ?");
		let record = sqlx::query_as::<_, ServiceRecord>(&sql)
			.bind(hub)
			.bind(name)
			.bind(start_id)
			.fetch_optional(&self.pool)
			.await?;
		Ok(record)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_all(&self) -> Result<Vec<ServiceRecord>> {
		let sql = format!("{SELECT_COLUMNS} ORDER BY id");
		Ok(sqlx::query_as::<_, ServiceRecord>(&sql)
			.fetch_all(&self.pool)
			.await?)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_for_hub(&self, hub: &str) -> Result<Vec<ServiceRecord>> {
		let sql = format!("{SELECT_COLUMNS} WHERE hub = ? ORDER BY id");
		Ok(sqlx::query_as::<_, ServiceRecord>(&sql)
			.bind(hub)
			.fetch_all(&self.pool)
			.await?)
	}

	/// Services that are not already stopping and whose end date has passed.
	#[tracing::instrument(skip(self))]
	pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ServiceRecord>> {
		let sql = format!("{SELECT_COLUMNS} WHERE stop_pending = 0 AND end_date IS NOT NULL ORDER BY id");
		let records = sqlx::query_as::<_, ServiceRecord>(&sql)
			.fetch_all(&self.pool)
			.await?;
		Ok(records.into_iter().filter(|r| r.is_expired(now)).collect())
	}

	/// Persist the outcome of a successful backend start.
	#[tracing::instrument(skip(self, state, start_response))]
	pub async fn store_start_result(
		&self,
		hub: &str,
		name: &str,
		start_id: &str,
		state: &[u8],
		start_response: &[u8],
		end_date: Option<DateTime<Utc>>,
	) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE services
			SET state = ?, state_stored = 1, start_response = ?, end_date = ?, last_update = ?
			WHERE hub = ? AND name = ? AND start_id = ?
			"#,
		)
		.bind(state)
		.bind(start_response)
		.bind(end_date)
		.bind(Utc::now())
		.bind(hub)
		.bind(name)
		.bind(start_id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(describe(hub, name, start_id)));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn finish_start(&self, hub: &str, name: &str, start_id: &str) -> Result<()> {
		let result = sqlx::query(
			"UPDATE services SET start_pending = 0, last_update = ? WHERE hub = ? AND name = ? AND start_id = ?",
		)
		.bind(Utc::now())
		.bind(hub)
		.bind(name)
		.bind(start_id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(describe(hub, name, start_id)));
		}
		Ok(())
	}

	/// Set `stop_pending`. Returns `true` if this call made the transition
	/// and `false` if the record was already stopping. The flag is never
	/// cleared again.
	#[tracing::instrument(skip(self))]
	pub async fn mark_stop_pending(&self, hub: &str, name: &str, start_id: &str) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE services SET stop_pending = 1, last_update = ?
			WHERE hub = ? AND name = ? AND start_id = ? AND stop_pending = 0
			"#,
		)
		.bind(Utc::now())
		.bind(hub)
		.bind(name)
		.bind(start_id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 1 {
			return Ok(true);
		}
		match self.get(hub, name, start_id).await? {
			Some(_) => Ok(false),
			None => Err(DbError::NotFound(describe(hub, name, start_id))),
		}
	}

	#[tracing::instrument(skip(self))]
	pub async fn touch(&self, hub: &str, name: &str, start_id: &str) -> Result<()> {
		sqlx::query("UPDATE services SET last_update = ? WHERE hub = ? AND name = ? AND start_id = ?")
			.bind(Utc::now())
			.bind(hub)
			.bind(name)
			.bind(start_id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Returns whether a row was deleted.
	#[tracing::instrument(skip(self))]
	pub async fn delete(&self, hub: &str, name: &str, start_id: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM services WHERE hub = ? AND name = ? AND start_id = ?")
			.bind(hub)
			.bind(name)
			.bind(start_id)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	/// Non-stopping services on `hub`, grouped by flavor.
	#[tracing::instrument(skip(self))]
	pub async fn count_by_flavor(&self, hub: &str) -> Result<HashMap<String, i64>> {
		let rows = sqlx::query_as::<_, (String, i64)>(
			r#"
			SELECT flavor, COUNT(*) FROM services
			WHERE hub = ? AND stop_pending = 0
			GROUP BY flavor
			"#,
		)
		.bind(hub)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.into_iter().collect())
	}
}

async fn admission_counts(conn: &mut SqliteConnection, new: &NewService) -> Result<AdmissionCounts> {
	let (flavor_current,) = sqlx::query_as::<_, (i64,)>(
		"SELECT COUNT(*) FROM services WHERE hub = ? AND flavor = ? AND stop_pending = 0",
	)
	.bind(&new.hub)
	.bind(&new.flavor)
	.fetch_one(&mut *conn)
	.await?;

	let (user_flavor_current,) = sqlx::query_as::<_, (i64,)>(
		r#"
		SELECT COUNT(*) FROM services
		WHERE hub = ? AND flavor = ? AND owner_user_id = ? AND stop_pending = 0
		"#,
	)
	.bind(&new.hub)
	.bind(&new.flavor)
	.bind(new.owner_user_id)
	.fetch_one(&mut *conn)
	.await?;

	let (user_total,) = sqlx::query_as::<_, (i64,)>(
		"SELECT COUNT(*) FROM services WHERE hub = ? AND owner_user_id = ? AND stop_pending = 0",
	)
	.bind(&new.hub)
	.bind(new.owner_user_id)
	.fetch_one(&mut *conn)
	.await?;

	Ok(AdmissionCounts {
		flavor_current,
		user_flavor_current,
		user_total,
	})
}

async fn insert_row(conn: &mut SqliteConnection, new: &NewService) -> Result<ServiceRecord> {
	let now = Utc::now();
	let id = sqlx::query(
		r#"
		INSERT INTO services (hub, name, start_id, owner_user_id, flavor, body, start_date, last_update)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(&new.hub)
	.bind(&new.name)
	.bind(&new.start_id)
	.bind(new.owner_user_id)
	.bind(&new.flavor)
	.bind(&new.body)
	.bind(now)
	.bind(now)
	.execute(&mut *conn)
	.await
	.map_err(|e| map_insert_error(e, new))?
	.last_insert_rowid();

	Ok(ServiceRecord {
		id,
		hub: new.hub.clone(),
		name: new.name.clone(),
		start_id: new.start_id.clone(),
		owner_user_id: new.owner_user_id,
		flavor: new.flavor.clone(),
		body: Some(new.body.clone()),
		state: None,
		start_response: None,
		state_stored: false,
		start_pending: true,
		stop_pending: false,
		start_date: now,
		last_update: now,
		end_date: None,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hub::HubRepository;
	use crate::testing::create_test_pool;
	use chrono::Duration;

	async fn setup() -> ServiceRepository {
		let pool = create_test_pool().await;
		HubRepository::new(pool.clone())
			.get_or_create("jupyter")
			.await
			.unwrap();
		ServiceRepository::new(pool)
	}

	fn new_service(name: &str, flavor: &str, user: i64) -> NewService {
		NewService {
			hub: "jupyter".to_string(),
			name: name.to_string(),
			start_id: "0".to_string(),
			owner_user_id: user,
			flavor: flavor.to_string(),
			body: vec![1, 2, 3],
		}
	}

	#[tokio::test]
	async fn insert_and_get() {
		let repo = setup().await;
		repo.insert(&new_service("nb1", "small", 1)).await.unwrap();

		let record = repo.get("jupyter", "nb1", "0").await.unwrap().unwrap();
		assert_eq!(record.flavor, "small");
		assert_eq!(record.body.as_deref(), Some([1u8, 2, 3].as_slice()));
		assert!(record.start_pending);
		assert!(!record.stop_pending);
		assert!(!record.state_stored);
		assert!(record.end_date.is_none());
	}

	#[tokio::test]
	async fn duplicate_key_conflicts() {
		let repo = setup().await;
		repo.insert(&new_service("nb1", "small", 1)).await.unwrap();
		let result = repo.insert(&new_service("nb1", "small", 1)).await;
		assert!(matches!(result, Err(DbError::Conflict(_))));
	}

	#[tokio::test]
	async fn same_name_different_start_id_coexist() {
		let repo = setup().await;
		repo.insert(&new_service("nb1", "small", 1)).await.unwrap();
		let mut second = new_service("nb1", "small", 1);
		second.start_id = "1".to_string();
		repo.insert(&second).await.unwrap();
		assert_eq!(repo.list_for_hub("jupyter").await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn store_start_result_sets_state_stored() {
		let repo = setup().await;
		repo.insert(&new_service("nb1", "small", 1)).await.unwrap();
		let end = Utc::now() + Duration::hours(2);
		repo
			.store_start_result("jupyter", "nb1", "0", b"state", b"response", Some(end))
			.await
			.unwrap();

		let record = repo.get("jupyter", "nb1", "0").await.unwrap().unwrap();
		assert!(record.state_stored);
		assert_eq!(record.state.as_deref(), Some(b"state".as_slice()));
		assert_eq!(record.start_response.as_deref(), Some(b"response".as_slice()));
		assert!(record.end_date.is_some());
	}

	#[tokio::test]
	async fn store_start_result_on_missing_record_is_not_found() {
		let repo = setup().await;
		let result = repo
			.store_start_result("jupyter", "ghost", "0", b"s", b"r", None)
			.await;
		assert!(matches!(result, Err(DbError::NotFound(_))));
	}

	#[tokio::test]
	async fn mark_stop_pending_transitions_once() {
		let repo = setup().await;
		repo.insert(&new_service("nb1", "small", 1)).await.unwrap();

		assert!(repo.mark_stop_pending("jupyter", "nb1", "0").await.unwrap());
		assert!(!repo.mark_stop_pending("jupyter", "nb1", "0").await.unwrap());
		let missing = repo.mark_stop_pending("jupyter", "ghost", "0").await;
		assert!(matches!(missing, Err(DbError::NotFound(_))));
	}

	#[tokio::test]
	async fn stopping_services_are_not_counted() {
		let repo = setup().await;
		repo.insert(&new_service("nb1", "small", 1)).await.unwrap();
		repo.insert(&new_service("nb2", "small", 2)).await.unwrap();
		repo.insert(&new_service("nb3", "large", 1)).await.unwrap();
		repo.mark_stop_pending("jupyter", "nb2", "0").await.unwrap();

		let counts = repo.count_by_flavor("jupyter").await.unwrap();
		assert_eq!(counts.get("small"), Some(&1));
		assert_eq!(counts.get("large"), Some(&1));
	}

	#[tokio::test]
	async fn insert_admitted_passes_counts_to_check() {
		let repo = setup().await;
		repo.insert(&new_service("nb1", "small", 1)).await.unwrap();
		repo.insert(&new_service("nb2", "small", 2)).await.unwrap();
		repo.insert(&new_service("nb3", "large", 1)).await.unwrap();

		let mut seen = None;
		let result: std::result::Result<_, DbError> = repo
			.insert_admitted(&new_service("nb4", "small", 1), |counts| {
				seen = Some(*counts);
				Ok(())
			})
			.await;
		result.unwrap();

		assert_eq!(
			seen,
			Some(AdmissionCounts {
				flavor_current: 2,
				user_flavor_current: 1,
				user_total: 2,
			})
		);
	}

	#[tokio::test]
	async fn insert_admitted_rejection_rolls_back() {
		let repo = setup().await;
		let result: std::result::Result<_, DbError> = repo
			.insert_admitted(&new_service("nb1", "small", 1), |_| {
				Err::<(), _>(DbError::Conflict("full".to_string()))
			})
			.await;
		assert!(result.is_err());
		assert!(repo.get("jupyter", "nb1", "0").await.unwrap().is_none());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_admissions_on_file_database_serialize() {
		let dir = tempfile::tempdir().unwrap();
		let pool = crate::testing::create_file_test_pool(dir.path()).await;
		HubRepository::new(pool.clone())
			.get_or_create("jupyter")
			.await
			.unwrap();
		let repo = ServiceRepository::new(pool);

		let mut handles = Vec::new();
		for i in 0..16 {
			let repo = repo.clone();
			handles.push(tokio::spawn(async move {
				repo.insert_admitted(&new_service(&format!("nb{i}"), "small", i), |counts| {
					if counts.flavor_current >= 3 {
						return Err(DbError::Conflict("full".to_string()));
					}
					Ok(())
				})
				.await
			}));
		}

		let mut admitted = 0;
		let mut full = 0;
		for handle in handles {
			match handle.await.unwrap() {
				Ok(_) => admitted += 1,
				Err(DbError::Conflict(reason)) if reason == "full" => full += 1,
				Err(e) => panic!("admission failed instead of queueing: {e}"),
			}
		}
		assert_eq!((admitted, full), (3, 13));
		let counts = repo.count_by_flavor("jupyter").await.unwrap();
		assert_eq!(counts.get("small"), Some(&3));
	}

	#[tokio::test]
	async fn list_expired_skips_open_ended_and_stopping() {
		let repo = setup().await;
		for name in ["past", "future", "open", "stopping"] {
			repo.insert(&new_service(name, "small", 1)).await.unwrap();
		}
		let past = Utc::now() - Duration::minutes(5);
		let future = Utc::now() + Duration::hours(1);
		repo
			.store_start_result("jupyter", "past", "0", b"", b"", Some(past))
			.await
			.unwrap();
		repo
			.store_start_result("jupyter", "future", "0", b"", b"", Some(future))
			.await
			.unwrap();
		repo
			.store_start_result("jupyter", "stopping", "0", b"", b"", Some(past))
			.await
			.unwrap();
		repo.mark_stop_pending("jupyter", "stopping", "0").await.unwrap();

		let expired = repo.list_expired(Utc::now()).await.unwrap();
		let names: Vec<_> = expired.iter().map(|r| r.name.as_str()).collect();
		assert_eq!(names, vec!["past"]);
	}

	#[tokio::test]
	async fn delete_reports_whether_row_existed() {
		let repo = setup().await;
		repo.insert(&new_service("nb1", "small", 1)).await.unwrap();
		assert!(repo.delete("jupyter", "nb1", "0").await.unwrap());
		assert!(!repo.delete("jupyter", "nb1", "0").await.unwrap());
	}
}
