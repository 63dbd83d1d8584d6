// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

/// Start id used when a request does not carry one.
pub const DEFAULT_START_ID: &str = "0";

/// A key part that cannot be used as part of a file name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{part} {value:?} is not allowed: it may not be empty or contain '/', '\\' or '..'")]
pub struct InvalidKeyPart {
	pub part: &'static str,
	pub value: String,
}

/// True when `value` could name a path outside the directory it is joined to.
pub fn has_path_syntax(value: &str) -> bool {
	value.contains(['/', '\\', '\0']) || value.contains("..")
}

fn check_part(part: &'static str, value: &str) -> Result<(), InvalidKeyPart> {
	if value.is_empty() || has_path_syntax(value) {
		return Err(InvalidKeyPart {
			part,
			value: value.to_string(),
		});
	}
	Ok(())
}

/// Identifies one workload lifecycle: (hub, service name, start id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
	pub hub: String,
	pub name: String,
	pub start_id: String,
}

impl ServiceKey {
	pub fn new(hub: impl Into<String>, name: impl Into<String>, start_id: impl Into<String>) -> Self {
		Self {
			hub: hub.into(),
			name: name.into(),
			start_id: start_id.into(),
		}
	}

	/// Every part must be usable inside a single file name.
	pub fn validate(&self) -> Result<(), InvalidKeyPart> {
		check_part("hub", &self.hub)?;
		check_part("name", &self.name)?;
		check_part("start_id", &self.start_id)
	}

	/// Directory name for per-lifecycle files. Only meaningful for keys
	/// that pass [`ServiceKey::validate`].
	pub fn dir_name(&self) -> String {
		format!("{}-{}-{}", self.hub, self.name, self.start_id)
	}
}

impl fmt::Display for ServiceKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{} ({})", self.hub, self.name, self.start_id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plain_keys_are_valid() {
		assert!(ServiceKey::new("jupyter", "nb-1.lab", "0").validate().is_ok());
		assert!(ServiceKey::new("jupyter", "", DEFAULT_START_ID).validate().is_err());
	}

	#[test]
	fn traversal_in_any_part_is_rejected() {
		let cases = [
			ServiceKey::new("jupyter", "x/../../victim", "0"),
			ServiceKey::new("jupyter", "..", "0"),
			ServiceKey::new("jupyter", "nb1", "../0"),
			ServiceKey::new("jupyter", "nb1", "a\\b"),
			ServiceKey::new("../hub", "nb1", "0"),
			ServiceKey::new("jupyter", "nb\01", "0"),
		];
		for key in cases {
			assert!(key.validate().is_err(), "{key:?} should be rejected");
		}
	}

	#[test]
	fn rejection_names_the_part() {
		let err = ServiceKey::new("jupyter", "nb1", "1/2").validate().unwrap_err();
		assert_eq!(err.part, "start_id");
		assert_eq!(err.value, "1/2");
	}
}
