// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backends selectable through `outpost.backend`.

pub mod local;

use std::sync::Arc;

use outpost_server_spawner::BackendFactory;

pub use local::LocalProcessFactory;

/// Factory for a configured backend name.
pub fn factory_for(name: &str) -> Option<Arc<dyn BackendFactory>> {
	match name {
		"local" => Some(Arc::new(LocalProcessFactory::default())),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn known_backends_resolve() {
		assert_eq!(factory_for("local").map(|f| f.name().to_string()), Some("local".to_string()));
		assert!(factory_for("kubernetes").is_none());
	}
}
