// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Quota ledger for the outpost.
//!
//! Resolves which flavors a hub (and optionally one of its users) may use,
//! reports current usage per flavor, and admits new services against the
//! per-flavor, per-user and global per-user limits.

pub mod catalog;
pub mod error;
pub mod ledger;
pub mod matching;
pub mod named;

pub use catalog::{Flavor, FlavorCatalog, Flavors, HubGroup, Runtime, UserGroup};
pub use error::{AdmissionError, FlavorError, Result};
pub use ledger::{
	check_admission, compute_usage, AdmissionCheck, Admitted, FlavorLedger, FlavorUsage,
	UsageAdjustment, UsageMap,
};
pub use matching::matches_pattern;
pub use named::Named;
