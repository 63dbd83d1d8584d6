// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pattern matching for hub names and user authentication values.

use regex::Regex;

/// True if `value` matches `pattern` as a full-string regex, as a glob, or
/// by plain equality. Invalid regexes and globs simply do not match.
pub fn matches_pattern(pattern: &str, value: &str) -> bool {
	if let Ok(re) = Regex::new(&format!("^(?:{pattern})$")) {
		if re.is_match(value) {
			tracing::trace!(pattern, value, "regex match");
			return true;
		}
	}

	if let Ok(glob) = glob::Pattern::new(pattern) {
		if glob.matches(value) {
			tracing::trace!(pattern, value, "glob match");
			return true;
		}
	}

	value == pattern
}
