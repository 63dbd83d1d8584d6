// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Secret loading from the environment.
//!
//! A secret named `FOO` is read from `FOO` directly, or from the file named
//! by `FOO_FILE`. Setting both is an error. Trailing newlines are stripped
//! from file contents so mounted Kubernetes secrets work unchanged.

use std::path::PathBuf;

use crate::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretEnvError {
	#[error("both {name} and {name}_FILE are set; use only one")]
	BothSet { name: String },

	#[error("failed to read {name}_FILE at {path}: {source}")]
	FileRead {
		name: String,
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

#[derive(Debug, thiserror::Error)]
pub enum RequiredSecretError {
	#[error("required secret {0} is not set (set {0} or {0}_FILE)")]
	Missing(String),

	#[error(transparent)]
	Env(#[from] SecretEnvError),
}

/// Load an optional secret from `name` or `name_FILE`.
pub fn load_secret_env(name: &str) -> Result<Option<SecretString>, SecretEnvError> {
	let direct = std::env::var(name).ok().filter(|v| !v.is_empty());
	let file_var = format!("{name}_FILE");
	let file = std::env::var(&file_var).ok().filter(|v| !v.is_empty());

	match (direct, file) {
		(Some(_), Some(_)) => Err(SecretEnvError::BothSet {
			name: name.to_string(),
		}),
		(Some(value), None) => Ok(Some(SecretString::new(value))),
		(None, Some(path)) => {
			let path = PathBuf::from(path);
			let contents =
				std::fs::read_to_string(&path).map_err(|source| SecretEnvError::FileRead {
					name: name.to_string(),
					path: path.clone(),
					source,
				})?;
			let trimmed = contents.trim_end_matches(['\n', '\r']).to_string();
			Ok(Some(SecretString::new(trimmed)))
		}
		(None, None) => Ok(None),
	}
}

/// Like [`load_secret_env`] but fails when neither variable is set.
pub fn require_secret_env(name: &str) -> Result<SecretString, RequiredSecretError> {
	load_secret_env(name)?.ok_or_else(|| RequiredSecretError::Missing(name.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	// Each test uses its own variable names; the process environment is shared.

	#[test]
	fn unset_returns_none() {
		let result = load_secret_env("OUTPOST_TEST_SECRET_UNSET").unwrap();
		assert!(result.is_none());
	}

	#[test]
	fn direct_value_is_loaded() {
		std::env::set_var("OUTPOST_TEST_SECRET_DIRECT", "abc");
		let result = load_secret_env("OUTPOST_TEST_SECRET_DIRECT").unwrap().unwrap();
		assert_eq!(result.expose(), "abc");
		std::env::remove_var("OUTPOST_TEST_SECRET_DIRECT");
	}

	#[test]
	fn file_value_is_loaded_and_trimmed() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "from-file").unwrap();
		std::env::set_var("OUTPOST_TEST_SECRET_FILE_FILE", file.path());
		let result = load_secret_env("OUTPOST_TEST_SECRET_FILE").unwrap().unwrap();
		assert_eq!(result.expose(), "from-file");
		std::env::remove_var("OUTPOST_TEST_SECRET_FILE_FILE");
	}

	#[test]
	fn both_set_is_an_error() {
		std::env::set_var("OUTPOST_TEST_SECRET_BOTH", "a");
		std::env::set_var("OUTPOST_TEST_SECRET_BOTH_FILE", "/nonexistent");
		let result = load_secret_env("OUTPOST_TEST_SECRET_BOTH");
		assert!(matches!(result, Err(SecretEnvError::BothSet { .. })));
		std::env::remove_var("OUTPOST_TEST_SECRET_BOTH");
		std::env::remove_var("OUTPOST_TEST_SECRET_BOTH_FILE");
	}

	#[test]
	fn missing_file_is_an_error() {
		std::env::set_var("OUTPOST_TEST_SECRET_MISSING_FILE", "/nonexistent/outpost/secret");
		let result = load_secret_env("OUTPOST_TEST_SECRET_MISSING");
		assert!(matches!(result, Err(SecretEnvError::FileRead { .. })));
		std::env::remove_var("OUTPOST_TEST_SECRET_MISSING_FILE");
	}

	#[test]
	fn require_reports_missing() {
		let result = require_secret_env("OUTPOST_TEST_SECRET_REQUIRED_UNSET");
		assert!(matches!(result, Err(RequiredSecretError::Missing(_))));
	}
}
