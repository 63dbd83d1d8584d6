// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flavor usage accounting and admission control.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use outpost_server_db::{AdmissionCounts, DbError, NewService, ServiceRecord, ServiceRepository};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::catalog::{Flavor, FlavorCatalog, Flavors};
use crate::error::{AdmissionError, Result};
use crate::named::Named;

/// A flavor as reported to hubs, with its current usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlavorUsage {
	#[serde(flatten)]
	pub flavor: Flavor,
	pub current: i64,
}

pub type UsageMap = Named<FlavorUsage>;

/// Preview a start or stop that has not reached the database yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UsageAdjustment {
	#[default]
	None,
	/// Count one more, unless the flavor is already at its maximum.
	AddOne(String),
	/// Count one less, never below zero.
	SubtractOne(String),
}

/// Combine a resolved flavor set with live counts.
pub fn compute_usage(
	flavors: &Flavors,
	counts: &HashMap<String, i64>,
	adjustment: &UsageAdjustment,
) -> UsageMap {
	let mut usage: UsageMap = flavors
		.iter()
		.map(|(name, flavor)| {
			let current = counts.get(name).copied().unwrap_or(0);
			(
				name.to_string(),
				FlavorUsage {
					flavor: flavor.clone(),
					current,
				},
			)
		})
		.collect();

	match adjustment {
		UsageAdjustment::None => {}
		UsageAdjustment::AddOne(name) => {
			if let Some(entry) = usage.get_mut(name) {
				if entry.flavor.is_unlimited() || entry.current < entry.flavor.max {
					entry.current += 1;
				}
			}
		}
		UsageAdjustment::SubtractOne(name) => {
			if let Some(entry) = usage.get_mut(name) {
				if entry.current > 0 {
					entry.current -= 1;
				}
			}
		}
	}
	usage
}

/// What an admission is checked for.
#[derive(Debug, Clone)]
pub struct AdmissionCheck<'a> {
	pub service: &'a str,
	pub hub: &'a str,
	pub flavor: &'a str,
	pub user_id: i64,
	/// Services one user may run on a hub across flavors; `-1` is unlimited.
	pub global_max_per_user: i64,
}

/// The independent admission gates. Returns the admitted flavor.
///
/// A flavor must be in `flavors`; an outpost without a catalog admits nothing.
pub fn check_admission(
	check: &AdmissionCheck<'_>,
	flavors: &Flavors,
	counts: &AdmissionCounts,
) -> std::result::Result<Flavor, AdmissionError> {
	let Some(flavor) = flavors.get(check.flavor) else {
		return Err(AdmissionError::FlavorNotAllowed {
			service: check.service.to_string(),
			flavor: check.flavor.to_string(),
			allowed: flavors.keys().map(str::to_string).collect(),
		});
	};

	if let Some(runtime) = &flavor.runtime {
		if runtime.end_date(Utc::now()).is_none() {
			return Err(AdmissionError::RuntimeOutOfRange {
				service: check.service.to_string(),
				flavor: check.flavor.to_string(),
			});
		}
	}

	if let Some(limit) = flavor.max_per_user.filter(|l| *l > 0) {
		if counts.user_flavor_current >= limit {
			return Err(AdmissionError::PerUserLimit {
				service: check.service.to_string(),
				flavor: check.flavor.to_string(),
				limit,
			});
		}
	}

	if !flavor.is_unlimited() && counts.flavor_current >= flavor.max {
		return Err(AdmissionError::FlavorLimit {
			service: check.service.to_string(),
			flavor: check.flavor.to_string(),
			hub: check.hub.to_string(),
			max: flavor.max,
		});
	}

	if check.global_max_per_user != -1 && counts.user_total >= check.global_max_per_user {
		return Err(AdmissionError::GlobalUserLimit {
			service: check.service.to_string(),
			user_id: check.user_id,
			hub: check.hub.to_string(),
			limit: check.global_max_per_user,
		});
	}

	Ok(flavor.clone())
}

/// A freshly inserted record and the flavor it was admitted under.
#[derive(Debug, Clone)]
pub struct Admitted {
	pub record: ServiceRecord,
	pub flavor: Flavor,
}

/// Reads the catalog from disk on every call so edits apply without a restart.
///
/// Clones share one admission lock, so admissions through the same ledger
/// run one at a time.
#[derive(Clone)]
pub struct FlavorLedger {
	catalog_path: PathBuf,
	services: ServiceRepository,
	global_max_per_user: i64,
	admissions: Arc<Mutex<()>>,
}

impl FlavorLedger {
	pub fn new(catalog_path: impl Into<PathBuf>, services: ServiceRepository, global_max_per_user: i64) -> Self {
		Self {
			catalog_path: catalog_path.into(),
			services,
			global_max_per_user,
			admissions: Arc::new(Mutex::new(())),
		}
	}

	pub async fn catalog(&self) -> Result<FlavorCatalog> {
		FlavorCatalog::load(&self.catalog_path).await
	}

	fn resolve(&self, catalog: &FlavorCatalog, hub: &str, authentication: Option<&Map<String, Value>>) -> Result<Flavors> {
		match authentication {
			Some(auth) => catalog.flavors_for_user(hub, auth),
			None => catalog.flavors_for_hub(hub),
		}
	}

	/// Flavor usage for a hub, optionally narrowed to one user's groups.
	#[tracing::instrument(skip(self, authentication))]
	pub async fn usage(
		&self,
		hub: &str,
		authentication: Option<&Map<String, Value>>,
		adjustment: &UsageAdjustment,
	) -> Result<UsageMap> {
		let catalog = self.catalog().await?;
		let flavors = self.resolve(&catalog, hub, authentication)?;
		let counts = self.services.count_by_flavor(hub).await?;
		let usage = compute_usage(&flavors, &counts, adjustment);
		tracing::debug!(flavors = usage.len(), "computed flavor usage");
		Ok(usage)
	}

	/// Check every limit and insert the record in one transaction.
	#[tracing::instrument(skip(self, new, authentication), fields(hub = %new.hub, service = %new.name, flavor = %new.flavor))]
	pub async fn admit(
		&self,
		new: &NewService,
		authentication: Option<&Map<String, Value>>,
	) -> std::result::Result<Admitted, AdmissionError> {
		let catalog = self.catalog().await?;
		let flavors = self.resolve(&catalog, &new.hub, authentication)?;
		let check = AdmissionCheck {
			service: &new.name,
			hub: &new.hub,
			flavor: &new.flavor,
			user_id: new.owner_user_id,
			global_max_per_user: self.global_max_per_user,
		};

		let inserted = {
			let _guard = self.admissions.lock().await;
			self.services
				.insert_admitted(new, |counts| check_admission(&check, &flavors, counts))
				.await
		};
		let (record, flavor) = inserted
			.map_err(|e| match e {
				AdmissionError::Db(DbError::Conflict(_)) => AdmissionError::AlreadyExists {
					service: new.name.clone(),
					start_id: new.start_id.clone(),
					hub: new.hub.clone(),
				},
				other => other,
			})
			.inspect_err(|e| {
				if e.is_rejection() {
					tracing::info!(error = %e, "admission rejected");
				}
			})?;

		Ok(Admitted { record, flavor })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::Runtime;
	use outpost_server_db::testing::{create_file_test_pool, create_test_pool};
	use outpost_server_db::HubRepository;
	use serde_json::json;
	use std::path::Path;

	fn flavor(max: i64) -> Flavor {
		Flavor {
			max,
			..Default::default()
		}
	}

	fn flavors(entries: &[(&str, Flavor)]) -> Flavors {
		entries
			.iter()
			.map(|(n, f)| (n.to_string(), f.clone()))
			.collect()
	}

	fn catalog_with(entries: &[(&str, Flavor)]) -> FlavorCatalog {
		FlavorCatalog {
			flavors: flavors(entries),
			..Default::default()
		}
	}

	fn check<'a>(flavor: &'a str, global: i64) -> AdmissionCheck<'a> {
		AdmissionCheck {
			service: "nb1",
			hub: "jupyter",
			flavor,
			user_id: 7,
			global_max_per_user: global,
		}
	}

	#[test]
	fn usage_includes_configured_flavors_only() {
		let set = flavors(&[("small", flavor(5)), ("large", flavor(1))]);
		let counts = HashMap::from([("small".to_string(), 2), ("retired".to_string(), 4)]);
		let usage = compute_usage(&set, &counts, &UsageAdjustment::None);
		assert_eq!(usage.keys().collect::<Vec<_>>(), vec!["small", "large"]);
		assert_eq!(usage.get("small").unwrap().current, 2);
		assert_eq!(usage.get("large").unwrap().current, 0);
	}

	#[test]
	fn add_one_stops_at_max() {
		let set = flavors(&[("small", flavor(2)), ("any", flavor(-1))]);
		let counts = HashMap::from([("small".to_string(), 2), ("any".to_string(), 9)]);

		let full = compute_usage(&set, &counts, &UsageAdjustment::AddOne("small".into()));
		assert_eq!(full.get("small").unwrap().current, 2);

		let unlimited = compute_usage(&set, &counts, &UsageAdjustment::AddOne("any".into()));
		assert_eq!(unlimited.get("any").unwrap().current, 10);
	}

	#[test]
	fn subtract_one_never_goes_negative() {
		let set = flavors(&[("small", flavor(2))]);
		let usage = compute_usage(&set, &HashMap::new(), &UsageAdjustment::SubtractOne("small".into()));
		assert_eq!(usage.get("small").unwrap().current, 0);
	}

	#[test]
	fn usage_serializes_flavor_fields_with_current() {
		let set = flavors(&[(
			"small",
			Flavor {
				max: 3,
				display_name: Some("Small".to_string()),
				..Default::default()
			},
		)]);
		let usage = compute_usage(&set, &HashMap::new(), &UsageAdjustment::None);
		let json = serde_json::to_value(&usage).unwrap();
		assert_eq!(
			json,
			json!({"small": {"max": 3, "weight": 0, "display_name": "Small", "current": 0}})
		);
	}

	#[test]
	fn unknown_flavor_is_rejected_with_allowed_list() {
		let catalog = catalog_with(&[("small", flavor(5))]);
		let err = check_admission(&check("gpu", -1), &catalog.flavors, &AdmissionCounts::default())
			.unwrap_err();
		assert_eq!(
			err.to_string(),
			r#"nb1 - Start with flavor gpu not allowed. Allowed values for user: ["small"]"#
		);
	}

	#[test]
	fn flavor_maximum_is_enforced() {
		let catalog = catalog_with(&[("small", flavor(5))]);
		let counts = AdmissionCounts {
			flavor_current: 5,
			..Default::default()
		};
		let err = check_admission(&check("small", -1), &catalog.flavors, &counts).unwrap_err();
		assert!(err.to_string().contains("Maximum (5) already reached"));
	}

	#[test]
	fn max_zero_rejects_everything() {
		let catalog = catalog_with(&[("small", flavor(0))]);
		let err = check_admission(&check("small", -1), &catalog.flavors, &AdmissionCounts::default())
			.unwrap_err();
		assert!(matches!(err, AdmissionError::FlavorLimit { max: 0, .. }));
	}

	#[test]
	fn per_user_cap_is_independent_of_flavor_cap() {
		let catalog = catalog_with(&[(
			"small",
			Flavor {
				max: 5,
				max_per_user: Some(1),
				..Default::default()
			},
		)]);
		let counts = AdmissionCounts {
			flavor_current: 1,
			user_flavor_current: 1,
			user_total: 1,
		};
		let err = check_admission(&check("small", -1), &catalog.flavors, &counts).unwrap_err();
		assert_eq!(
			err.to_string(),
			"nb1 - Start with flavor small not allowed. Each user may only start 1 of small"
		);
	}

	#[test]
	fn global_per_user_cap_spans_flavors() {
		let catalog = catalog_with(&[("small", flavor(-1))]);
		let counts = AdmissionCounts {
			user_total: 2,
			..Default::default()
		};
		let err = check_admission(&check("small", 2), &catalog.flavors, &counts).unwrap_err();
		assert_eq!(
			err.to_string(),
			"nb1 - User with user id 7 of jupyter has reached the maximum limit of services (2)"
		);
		let ok = check_admission(&check("small", 3), &catalog.flavors, &counts).unwrap();
		assert!(ok.is_unlimited());
	}

	#[test]
	fn empty_catalog_admits_nothing() {
		let catalog = FlavorCatalog::default();
		let err = check_admission(&check("_undefined", -1), &catalog.flavors, &AdmissionCounts::default())
			.unwrap_err();
		assert!(matches!(err, AdmissionError::FlavorNotAllowed { ref allowed, .. } if allowed.is_empty()));
		assert!(err.is_rejection());
	}

	#[test]
	fn runtime_past_the_last_timestamp_is_rejected() {
		let catalog = catalog_with(&[(
			"forever",
			Flavor {
				max: 5,
				runtime: Some(Runtime {
					weeks: Some(i64::MAX),
					..Default::default()
				}),
				..Default::default()
			},
		)]);
		let err = check_admission(&check("forever", -1), &catalog.flavors, &AdmissionCounts::default())
			.unwrap_err();
		assert_eq!(err.to_string(), "nb1 - Runtime of flavor forever is out of range");
		assert!(err.is_rejection());
	}

	#[test]
	fn user_without_flavors_is_rejected() {
		let catalog = catalog_with(&[("small", flavor(5))]);
		let err = check_admission(&check("small", -1), &Flavors::new(), &AdmissionCounts::default())
			.unwrap_err();
		assert!(matches!(err, AdmissionError::FlavorNotAllowed { .. }));
	}

	#[test]
	fn admitted_flavor_carries_runtime() {
		let catalog = catalog_with(&[(
			"small",
			Flavor {
				max: 5,
				runtime: Some(Runtime {
					hours: Some(2),
					..Default::default()
				}),
				..Default::default()
			},
		)]);
		let admitted = check_admission(&check("small", -1), &catalog.flavors, &AdmissionCounts::default())
			.unwrap();
		assert_eq!(admitted.runtime.unwrap().duration(), Some(chrono::Duration::hours(2)));
	}

	async fn ledger_with_catalog(yaml: &str) -> (FlavorLedger, ServiceRepository, tempfile::TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("flavors.yaml");
		std::fs::write(&path, yaml).unwrap();
		let pool = create_test_pool().await;
		HubRepository::new(pool.clone())
			.get_or_create("jupyter")
			.await
			.unwrap();
		let services = ServiceRepository::new(pool);
		(FlavorLedger::new(&path, services.clone(), -1), services, dir)
	}

	fn new_service(name: &str, flavor: &str, user: i64) -> NewService {
		NewService {
			hub: "jupyter".to_string(),
			name: name.to_string(),
			start_id: "0".to_string(),
			owner_user_id: user,
			flavor: flavor.to_string(),
			body: Vec::new(),
		}
	}

	#[tokio::test]
	async fn quota_round_trip() {
		let (ledger, services, _dir) = ledger_with_catalog("flavors:\n  small:\n    max: 5\n").await;

		for i in 0..5 {
			ledger
				.admit(&new_service(&format!("nb{i}"), "small", i), None)
				.await
				.unwrap();
		}
		let err = ledger.admit(&new_service("nb5", "small", 5), None).await.unwrap_err();
		assert!(err.to_string().contains("Maximum (5) already reached"));
		assert!(services.get("jupyter", "nb5", "0").await.unwrap().is_none());

		services.mark_stop_pending("jupyter", "nb0", "0").await.unwrap();
		ledger.admit(&new_service("nb5", "small", 5), None).await.unwrap();
	}

	#[tokio::test]
	async fn usage_reads_catalog_changes_without_restart() {
		let (ledger, _services, dir) = ledger_with_catalog("flavors:\n  small:\n    max: 5\n").await;
		ledger.admit(&new_service("nb1", "small", 1), None).await.unwrap();

		let usage = ledger.usage("jupyter", None, &UsageAdjustment::None).await.unwrap();
		assert_eq!(usage.get("small").unwrap().current, 1);

		std::fs::write(
			dir.path().join("flavors.yaml"),
			"flavors:\n  small:\n    max: 5\n  large:\n    max: 1\n",
		)
		.unwrap();
		let usage = ledger.usage("jupyter", None, &UsageAdjustment::None).await.unwrap();
		assert_eq!(usage.keys().collect::<Vec<_>>(), vec!["small", "large"]);
	}

	#[tokio::test]
	async fn user_groups_narrow_usage() {
		let yaml = r#"
flavors:
  small: { max: 5 }
  large: { max: 1 }
users:
  students:
    authentication: { groups: [students] }
    flavors: [small]
"#;
		let (ledger, _services, _dir) = ledger_with_catalog(yaml).await;
		let auth = json!({"groups": ["students"]});
		let usage = ledger
			.usage("jupyter", auth.as_object(), &UsageAdjustment::None)
			.await
			.unwrap();
		assert_eq!(usage.keys().collect::<Vec<_>>(), vec!["small"]);
	}

	#[tokio::test]
	async fn missing_catalog_rejects_every_flavor() {
		let pool = create_test_pool().await;
		HubRepository::new(pool.clone())
			.get_or_create("jupyter")
			.await
			.unwrap();
		let services = ServiceRepository::new(pool);
		let ledger = FlavorLedger::new(
			Path::new("/nonexistent/outpost/flavors.yaml"),
			services.clone(),
			-1,
		);
		for flavor in ["_undefined", "small"] {
			let err = ledger.admit(&new_service("nb1", flavor, 1), None).await.unwrap_err();
			assert!(matches!(err, AdmissionError::FlavorNotAllowed { .. }));
		}
		assert!(services.get("jupyter", "nb1", "0").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn duplicate_start_is_a_rejection() {
		let (ledger, _services, _dir) = ledger_with_catalog("flavors:\n  small:\n    max: 5\n").await;
		ledger.admit(&new_service("nb1", "small", 1), None).await.unwrap();

		let err = ledger.admit(&new_service("nb1", "small", 1), None).await.unwrap_err();
		assert!(matches!(err, AdmissionError::AlreadyExists { .. }));
		assert!(err.is_rejection());
		assert_eq!(
			err.to_string(),
			"nb1 - A service with start id 0 already exists for jupyter"
		);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_admits_share_the_last_slots() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("flavors.yaml");
		std::fs::write(&path, "flavors:\n  small:\n    max: 3\n  wide:\n    max: 100\n").unwrap();
		let pool = create_file_test_pool(dir.path()).await;
		HubRepository::new(pool.clone())
			.get_or_create("jupyter")
			.await
			.unwrap();
		let services = ServiceRepository::new(pool);
		let ledger = FlavorLedger::new(&path, services.clone(), -1);

		let mut handles = Vec::new();
		for i in 0..16 {
			let ledger = ledger.clone();
			handles.push(tokio::spawn(async move {
				ledger.admit(&new_service(&format!("wide{i}"), "wide", i), None).await
			}));
		}
		for handle in handles {
			handle.await.unwrap().unwrap();
		}

		let mut handles = Vec::new();
		for i in 0..16 {
			let ledger = ledger.clone();
			handles.push(tokio::spawn(async move {
				ledger.admit(&new_service(&format!("small{i}"), "small", i), None).await
			}));
		}
		let mut admitted = 0;
		for handle in handles {
			match handle.await.unwrap() {
				Ok(_) => admitted += 1,
				Err(AdmissionError::FlavorLimit { .. }) => {}
				Err(e) => panic!("admission failed instead of queueing: {e}"),
			}
		}
		assert_eq!(admitted, 3);

		let counts = services.count_by_flavor("jupyter").await.unwrap();
		assert_eq!(counts.get("wide"), Some(&16));
		assert_eq!(counts.get("small"), Some(&3));
	}
}
