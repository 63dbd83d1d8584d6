// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Common configuration primitives for the outpost.
//!
//! - [`Secret<T>`]: keeps hub tokens and keys out of logs (re-exported from
//!   [`outpost_common_secret`])
//! - [`load_secret_env`]: loads a secret from an environment variable, with
//!   `*_FILE` support

pub mod env;

pub use outpost_common_secret::{Secret, SecretString, REDACTED};

pub use env::{load_secret_env, require_secret_env, RequiredSecretError, SecretEnvError};
