// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! At-rest encryption for service bodies, backend state and start responses.
//!
//! Every persisted payload is JSON sealed with AES-256-GCM under one
//! process-wide key. The stored blob is `nonce || ciphertext`.

mod cipher;
mod error;

pub use cipher::{generate_key, Cipher, KEY_SIZE, NONCE_SIZE};
pub use error::{CryptError, CryptResult};
