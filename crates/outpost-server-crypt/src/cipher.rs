// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use outpost_common_secret::SecretString;
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptError, CryptResult};

/// Size of the encryption key in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Generate a random key, base64 encoded as the config expects it.
pub fn generate_key() -> String {
	let mut key = Zeroizing::new([0u8; KEY_SIZE]);
	OsRng.fill_bytes(key.as_mut());
	STANDARD.encode(key.as_slice())
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
	let mut nonce = [0u8; NONCE_SIZE];
	OsRng.fill_bytes(&mut nonce);
	nonce
}

/// Seals and opens persisted payloads.
#[derive(Clone)]
pub struct Cipher {
	key: Zeroizing<[u8; KEY_SIZE]>,
}

impl std::fmt::Debug for Cipher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Cipher").field("key", &"[REDACTED]").finish()
	}
}

impl Cipher {
	/// Build a cipher from a base64-encoded 32-byte key.
	pub fn from_base64(key: &SecretString) -> CryptResult<Self> {
		let decoded = Zeroizing::new(STANDARD.decode(key.expose().trim())?);
		if decoded.len() != KEY_SIZE {
			return Err(CryptError::InvalidKeySize {
				expected: KEY_SIZE,
				actual: decoded.len(),
			});
		}
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		key.copy_from_slice(&decoded);
		Ok(Self { key })
	}

	pub fn seal(&self, plaintext: &[u8]) -> CryptResult<Vec<u8>> {
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()));
		let nonce_bytes = generate_nonce();
		let ciphertext = cipher
			.encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
			.map_err(|e| CryptError::Encryption(e.to_string()))?;

		let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
		out.extend_from_slice(&nonce_bytes);
		out.extend_from_slice(&ciphertext);
		Ok(out)
	}

	pub fn open(&self, blob: &[u8]) -> CryptResult<Zeroizing<Vec<u8>>> {
		if blob.len() < NONCE_SIZE {
			return Err(CryptError::Truncated(blob.len()));
		}
		let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()));
		let plaintext = cipher
			.decrypt(Nonce::from_slice(nonce), ciphertext)
			.map_err(|e| CryptError::Decryption(e.to_string()))?;
		Ok(Zeroizing::new(plaintext))
	}

	pub fn seal_json<T: Serialize>(&self, value: &T) -> CryptResult<Vec<u8>> {
		let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
		self.seal(&plaintext)
	}

	/// Strict read path: any failure is an error.
	pub fn open_json<T: DeserializeOwned>(&self, blob: &[u8]) -> CryptResult<T> {
		let plaintext = self.open(blob)?;
		Ok(serde_json::from_slice(&plaintext)?)
	}

	/// Lenient read path: missing or unreadable payloads become `T::default()`.
	pub fn open_json_or_default<T: DeserializeOwned + Default>(&self, blob: Option<&[u8]>) -> T {
		let Some(blob) = blob else {
			return T::default();
		};
		match self.open_json(blob) {
			Ok(value) => value,
			Err(e) => {
				tracing::warn!(error = %e, "could not decrypt stored payload, treating it as empty");
				T::default()
			}
		}
	}
}
