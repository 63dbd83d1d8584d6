// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-lifecycle TLS material on local disk.
//!
//! Each lifecycle key gets a private directory `{certs_dir}/{hub}-{name}-{start_id}`
//! so concurrent lifecycles never share files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::backend::CertPaths;
use crate::key::{has_path_syntax, ServiceKey};
use crate::request::ServiceBody;

/// Trust bundles written next to the service certificate.
pub const TRUST_BUNDLES: [&str; 5] = ["hub-ca", "proxy-api-ca", "proxy-client-ca", "notebooks-ca", "services-ca"];

const CA_TRUST_FILE: &str = "notebooks-ca_trust.crt";

/// Files written for one lifecycle.
#[derive(Debug, Clone, Default)]
pub struct CertMaterial {
	pub cert_paths: Option<CertPaths>,
	pub trust_bundles: HashMap<String, PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CertStore {
	base: PathBuf,
}

impl CertStore {
	pub fn new(base: impl Into<PathBuf>) -> Self {
		Self { base: base.into() }
	}

	/// Refuses keys whose parts would leave `base`.
	pub fn dir_for(&self, key: &ServiceKey) -> std::io::Result<PathBuf> {
		key.validate()
			.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
		Ok(self.base.join(key.dir_name()))
	}

	/// Write the request's TLS material. Requests without `certs` write nothing.
	#[tracing::instrument(skip(self, body), fields(hub = %key.hub, service = %key.name, start_id = %key.start_id))]
	pub async fn write(&self, key: &ServiceKey, body: &ServiceBody) -> std::io::Result<CertMaterial> {
		let Some(certs) = &body.certs else {
			return Ok(CertMaterial::default());
		};

		let dir = self.dir_for(key)?;
		let user = body.user_name();
		if has_path_syntax(&user) {
			return Err(std::io::Error::new(
				std::io::ErrorKind::InvalidInput,
				format!("user name {user:?} cannot be used as a file name"),
			));
		}

		if tokio::fs::try_exists(&dir).await? {
			tokio::fs::remove_dir_all(&dir).await?;
		}
		create_private_dir(&dir).await?;

		let paths = CertPaths {
			keyfile: dir.join(format!("{user}.key")),
			certfile: dir.join(format!("{user}.crt")),
			cafile: dir.join(CA_TRUST_FILE),
		};
		tokio::fs::write(&paths.keyfile, &certs.keyfile).await?;
		tokio::fs::write(&paths.certfile, &certs.certfile).await?;
		tokio::fs::write(&paths.cafile, &certs.cafile).await?;

		let mut trust_bundles = HashMap::new();
		for name in TRUST_BUNDLES {
			let path = dir.join(format!("{name}.crt"));
			let content = body
				.internal_trust_bundles
				.get(name)
				.map(String::as_str)
				.unwrap_or_default();
			tokio::fs::write(&path, content).await?;
			trust_bundles.insert(name.to_string(), path);
		}

		tracing::debug!(dir = %dir.display(), "wrote certificate material");
		Ok(CertMaterial {
			cert_paths: Some(paths),
			trust_bundles,
		})
	}

	/// Remove everything written for `key`. Each removal is best-effort.
	#[tracing::instrument(skip(self), fields(hub = %key.hub, service = %key.name, start_id = %key.start_id))]
	pub async fn remove(&self, key: &ServiceKey, user_name: &str) {
		let dir = match self.dir_for(key) {
			Ok(dir) => dir,
			Err(e) => {
				tracing::warn!(error = %e, "refusing to remove certificate material");
				return;
			}
		};
		let mut files = vec![
			format!("{}.key", key.name),
			format!("{}.crt", key.name),
			CA_TRUST_FILE.to_string(),
		];
		files.extend(TRUST_BUNDLES.iter().map(|b| format!("{b}.crt")));
		if !user_name.is_empty() && !has_path_syntax(user_name) {
			files.push(format!("{user_name}.key"));
			files.push(format!("{user_name}.crt"));
		}

		for file in files {
			remove_file_logged(&dir.join(file)).await;
		}

		match tokio::fs::remove_dir(&dir).await {
			Ok(()) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => {
				tracing::warn!(dir = %dir.display(), error = %e, "could not remove certificate directory");
			}
		}
	}
}

async fn remove_file_logged(path: &Path) {
	match tokio::fs::remove_file(path).await {
		Ok(()) => {}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
		Err(e) => {
			tracing::warn!(path = %path.display(), error = %e, "could not remove certificate file");
		}
	}
}

#[cfg(unix)]
async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
	let mut builder = tokio::fs::DirBuilder::new();
	builder.recursive(true).mode(0o700);
	builder.create(dir).await
}

#[cfg(not(unix))]
async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
	tokio::fs::create_dir_all(dir).await
}
