// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Service lifecycle orchestration for the outpost.
//!
//! A start request is admitted against the flavor ledger, turned into a
//! [`LifecycleObject`] by the [`Registry`] and driven through its backend.
//! [`Outpost`] ties these together for the HTTP layer and the sweepers.

pub mod backend;
pub mod certs;
pub mod error;
pub mod hooks;
pub mod key;
pub mod lifecycle;
pub mod notifier;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod testing;

pub use backend::{
	Backend, BackendContext, BackendError, BackendFactory, BackendResult, CertPaths, ProgressStream, StartResponse,
};
pub use certs::{CertMaterial, CertStore, TRUST_BUNDLES};
pub use error::{ErrorDetails, Result, SpawnerError};
pub use hooks::{Constant, FnResolver, Hooks, OverrideRequest, Resolver, StartedService};
pub use key::{InvalidKeyPart, ServiceKey, DEFAULT_START_ID};
pub use lifecycle::{LifecycleDeps, LifecycleObject, PollOutcome, StopOutcome};
pub use notifier::{HubNotifier, NotifyError};
pub use pipeline::{
	ExecutionMode, Outpost, OutpostParts, OutpostSettings, StartOutcome, StartRequest, StopDisposition, TunnelReport,
};
pub use registry::{LifecycleArgs, Registry};
pub use request::{auth_state_from_headers, CertBundle, ServiceBody};
