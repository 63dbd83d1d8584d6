// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum CryptError {
	#[error("invalid key encoding: {0}")]
	InvalidKeyEncoding(#[from] base64::DecodeError),

	#[error("invalid key size: expected {expected}, got {actual}")]
	InvalidKeySize { expected: usize, actual: usize },

	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("decryption failed: {0}")]
	Decryption(String),

	#[error("ciphertext too short: {0} bytes")]
	Truncated(usize),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type CryptResult<T> = Result<T, CryptError>;
