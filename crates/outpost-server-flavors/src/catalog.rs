// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The flavor catalog file and its hub and user group resolution.
//!
//! ```yaml
//! flavors:
//!   small: { max: 10, maxPerUser: 2, weight: 1, runtime: { hours: 2 } }
//! hubs:
//!   staging: { jupyterhub_name: "staging-.*", weight: 5, flavors: [small] }
//! users:
//!   students:
//!     authentication: { groups: [students] }
//!     flavors: [small]
//!     flavorsOverride: { small: { max: 2 } }
//! ```

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlavorError, Result};
use crate::matching::matches_pattern;
use crate::named::Named;

pub type Flavors = Named<Flavor>;

fn unlimited() -> i64 {
	-1
}

/// One resource class. Unknown keys are kept and reported back to hubs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
	/// Services of this flavor allowed per hub; `-1` is unlimited.
	#[serde(default = "unlimited")]
	pub max: i64,
	#[serde(rename = "maxPerUser", default, skip_serializing_if = "Option::is_none")]
	pub max_per_user: Option<i64>,
	#[serde(default)]
	pub weight: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub display_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub runtime: Option<Runtime>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl Default for Flavor {
	fn default() -> Self {
		Self {
			max: -1,
			max_per_user: None,
			weight: 0,
			display_name: None,
			description: None,
			runtime: None,
			extra: Map::new(),
		}
	}
}

impl Flavor {
	/// Apply a `flavorsOverride` entry key by key.
	pub fn with_overrides(&self, name: &str, overrides: &Map<String, Value>) -> Result<Flavor> {
		let to_err = |source| FlavorError::Override {
			flavor: name.to_string(),
			source,
		};
		let Value::Object(mut fields) = serde_json::to_value(self).map_err(to_err)? else {
			return Ok(self.clone());
		};
		for (key, value) in overrides {
			fields.insert(key.clone(), value.clone());
		}
		serde_json::from_value(Value::Object(fields)).map_err(to_err)
	}

	pub fn is_unlimited(&self) -> bool {
		self.max == -1
	}
}

/// Maximum lifetime of a service, added to its start time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub weeks: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub days: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub hours: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub minutes: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub seconds: Option<i64>,
}

impl Runtime {
	/// `None` when the parts do not fit a [`Duration`].
	pub fn duration(&self) -> Option<Duration> {
		[
			Duration::try_weeks(self.weeks.unwrap_or(0))?,
			Duration::try_days(self.days.unwrap_or(0))?,
			Duration::try_hours(self.hours.unwrap_or(0))?,
			Duration::try_minutes(self.minutes.unwrap_or(0))?,
			Duration::try_seconds(self.seconds.unwrap_or(0))?,
		]
		.into_iter()
		.try_fold(Duration::zero(), |total, part| total.checked_add(&part))
	}

	/// When a service started at `from` expires.
	pub fn end_date(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
		from.checked_add_signed(self.duration()?)
	}
}

/// Hub names a hub group applies to.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HubNames {
	/// Exact membership.
	List(Vec<String>),
	/// Regex, glob or plain name.
	Pattern(String),
	Other(Value),
}

impl HubNames {
	fn matches(&self, hub: &str) -> bool {
		match self {
			HubNames::List(names) => names.iter().any(|n| n == hub),
			HubNames::Pattern(pattern) => matches_pattern(pattern, hub),
			HubNames::Other(value) => {
				tracing::warn!(%value, "jupyterhub_name must be a list or a string");
				false
			}
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubGroup {
	#[serde(default)]
	pub jupyterhub_name: Option<HubNames>,
	#[serde(default)]
	pub weight: i64,
	/// `None` keeps every flavor, `Some` restricts to the listed ones.
	#[serde(default)]
	pub flavors: Option<Vec<String>>,
	#[serde(rename = "flavorsOverride", default)]
	pub flavors_override: Named<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserGroup {
	/// Limit the group to these hubs.
	#[serde(default)]
	pub hubs: Option<Vec<String>>,
	#[serde(default)]
	pub authentication: Named<Value>,
	/// Apply the group to users who do *not* match `authentication`.
	#[serde(default)]
	pub negate_authentication: bool,
	#[serde(default)]
	pub weight: i64,
	/// Users in a forbidden group may not start any flavor.
	#[serde(default)]
	pub forbidden: bool,
	#[serde(default)]
	pub flavors: Option<Vec<String>>,
	#[serde(rename = "flavorsOverride", default)]
	pub flavors_override: Named<Map<String, Value>>,
}

impl UserGroup {
	fn applies_to_hub(&self, hub: &str) -> bool {
		match &self.hubs {
			Some(hubs) => hubs.iter().any(|h| h == hub),
			None => true,
		}
	}

	/// True if any configured authentication key matches any of the user's
	/// values for that key.
	fn authentication_matches(&self, group: &str, authentication: &Map<String, Value>) -> bool {
		let mut matched = false;
		for (key, expected) in self.authentication.iter() {
			let Some(actual) = authentication.get(key) else {
				continue;
			};
			let actual: Vec<&Value> = match actual {
				Value::Array(values) => values.iter().collect(),
				other => vec![other],
			};
			match expected {
				Value::String(pattern) => {
					if actual
						.iter()
						.any(|v| matches_pattern(pattern, &value_as_string(v)))
					{
						matched = true;
					}
				}
				Value::Array(allowed) => {
					if actual.iter().any(|v| allowed.contains(v)) {
						matched = true;
					}
				}
				other => {
					tracing::warn!(
						group,
						key,
						value = %other,
						"users.<group>.authentication values must be a list or a string"
					);
				}
			}
		}
		matched
	}

	fn selects(&self, group: &str, authentication: &Map<String, Value>) -> bool {
		self.authentication_matches(group, authentication) != self.negate_authentication
	}
}

fn value_as_string(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

/// Parsed flavor catalog file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlavorCatalog {
	#[serde(default)]
	pub flavors: Flavors,
	#[serde(default)]
	pub hubs: Named<HubGroup>,
	#[serde(default)]
	pub users: Named<UserGroup>,
}

/// Pick the highest weight; the first candidate wins ties.
fn pick_heaviest<'a, T>(candidates: impl Iterator<Item = (&'a str, &'a T, i64)>) -> Option<(&'a str, &'a T)> {
	let mut best: Option<(&str, &T, i64)> = None;
	for (name, group, weight) in candidates {
		if best.map_or(true, |(_, _, w)| weight > w) {
			best = Some((name, group, weight));
		}
	}
	best.map(|(name, group, _)| (name, group))
}

fn restrict(
	all: &Flavors,
	kind: &str,
	group: &str,
	keep: Option<&Vec<String>>,
	overrides: &Named<Map<String, Value>>,
) -> Result<Flavors> {
	let mut selected: Flavors = all
		.iter()
		.filter(|(name, _)| keep.map_or(true, |k| k.iter().any(|n| n == name)))
		.map(|(name, flavor)| (name.to_string(), flavor.clone()))
		.collect();

	for (name, fields) in overrides.iter() {
		let Some(flavor) = selected.get(name) else {
			tracing::warn!(kind, group, flavor = name, "not overriding a flavor outside the group's flavors");
			continue;
		};
		let updated = flavor.with_overrides(name, fields)?;
		selected.insert(name, updated);
	}
	Ok(selected)
}

impl FlavorCatalog {
	/// Read the catalog. A missing file is an empty catalog.
	pub async fn load(path: &Path) -> Result<FlavorCatalog> {
		let content = match tokio::fs::read_to_string(path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				tracing::debug!(path = %path.display(), "no flavor catalog, using an empty one");
				return Ok(FlavorCatalog::default());
			}
			Err(source) => {
				return Err(FlavorError::Read {
					path: path.to_path_buf(),
					source,
				})
			}
		};
		Self::parse(path, &content)
	}

	pub fn parse(path: &Path, content: &str) -> Result<FlavorCatalog> {
		if content.trim().is_empty() {
			return Ok(FlavorCatalog::default());
		}
		serde_yaml::from_str(content).map_err(|source| FlavorError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Flavors available to a hub after hub group selection.
	pub fn flavors_for_hub(&self, hub: &str) -> Result<Flavors> {
		let candidates = self.hubs.iter().filter_map(|(name, group)| {
			let matched = group
				.jupyterhub_name
				.as_ref()
				.is_some_and(|names| names.matches(hub));
			matched.then_some((name, group, group.weight))
		});

		let Some((group_name, group)) = pick_heaviest(candidates) else {
			tracing::trace!(hub, "no hub group matched, using all flavors");
			return Ok(self.flavors.clone());
		};
		tracing::debug!(hub, group = group_name, "using hub group");
		restrict(
			&self.flavors,
			"hubs",
			group_name,
			group.flavors.as_ref(),
			&group.flavors_override,
		)
	}

	/// Flavors available to one user of a hub. Without authentication
	/// attributes, or when no user group selects the user, this is the hub's
	/// set. A selected group starts from the global flavors.
	pub fn flavors_for_user(&self, hub: &str, authentication: &Map<String, Value>) -> Result<Flavors> {
		if authentication.is_empty() || self.users.is_empty() {
			return self.flavors_for_hub(hub);
		}

		let candidates = self.users.iter().filter_map(|(name, group)| {
			if !group.applies_to_hub(hub) {
				tracing::trace!(hub, group = name, "user group does not apply to hub");
				return None;
			}
			group
				.selects(name, authentication)
				.then_some((name, group, group.weight))
		});

		let Some((group_name, group)) = pick_heaviest(candidates) else {
			tracing::debug!(hub, "no user group matched, using hub flavors");
			return self.flavors_for_hub(hub);
		};

		if group.forbidden {
			tracing::info!(hub, group = group_name, "user group is forbidden from all flavors");
			return Ok(Flavors::new());
		}
		tracing::debug!(hub, group = group_name, "using user group");
		restrict(
			&self.flavors,
			"users",
			group_name,
			group.flavors.as_ref(),
			&group.flavors_override,
		)
	}
}
