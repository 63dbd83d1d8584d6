// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operator hooks. Each hook is a [`Resolver`]: a plain value becomes a
//! [`Constant`], logic becomes a closure or a custom implementation.

use std::sync::Arc;

use async_trait::async_trait;
use outpost_common_secret::SecretString;
use serde_json::{Map, Value};

use crate::backend::StartResponse;
use crate::key::ServiceKey;

#[async_trait]
pub trait Resolver<C: ?Sized + Sync, T>: Send + Sync {
	async fn resolve(&self, ctx: &C) -> T;
}

/// Always resolves to the same value.
#[derive(Debug, Clone)]
pub struct Constant<T>(pub T);

#[async_trait]
impl<C, T> Resolver<C, T> for Constant<T>
where
	C: ?Sized + Sync,
	T: Clone + Send + Sync,
{
	async fn resolve(&self, _ctx: &C) -> T {
		self.0.clone()
	}
}

/// Resolves by calling a synchronous closure.
pub struct FnResolver<F>(pub F);

#[async_trait]
impl<C, T, F> Resolver<C, T> for FnResolver<F>
where
	C: ?Sized + Sync,
	T: Send,
	F: Fn(&C) -> T + Send + Sync,
{
	async fn resolve(&self, ctx: &C) -> T {
		(self.0)(ctx)
	}
}

/// Input to `allow_override`.
#[derive(Debug, Clone)]
pub struct OverrideRequest {
	pub hub: String,
	pub misc: Map<String, Value>,
}

/// Input to `sanitize_start_response`.
#[derive(Debug, Clone)]
pub struct StartedService {
	pub key: ServiceKey,
	pub response: StartResponse,
}

type Hook<C, T> = Arc<dyn Resolver<C, T>>;

#[derive(Clone)]
pub struct Hooks {
	/// May a hub override backend configuration through `misc`?
	pub allow_override: Hook<OverrideRequest, bool>,
	/// Forward progress events to this hub?
	pub send_events: Hook<str, bool>,
	/// Token for quota-usage pushes when the request carries none.
	pub flavors_update_token: Hook<str, Option<SecretString>>,
	pub update_user_authentication: Option<Hook<Map<String, Value>, Map<String, Value>>>,
	pub sanitize_start_response: Option<Hook<StartedService, StartResponse>>,
	/// Replay start responses to this hub's tunnel endpoint at startup?
	pub recreate_tunnels_at_start: Hook<str, bool>,
}

impl Default for Hooks {
	fn default() -> Self {
		Self {
			allow_override: Arc::new(Constant(true)),
			send_events: Arc::new(Constant(true)),
			flavors_update_token: Arc::new(Constant(None)),
			update_user_authentication: None,
			sanitize_start_response: None,
			recreate_tunnels_at_start: Arc::new(Constant(false)),
		}
	}
}

impl Hooks {
	pub async fn user_authentication(&self, authentication: Map<String, Value>) -> Map<String, Value> {
		match &self.update_user_authentication {
			Some(hook) => hook.resolve(&authentication).await,
			None => authentication,
		}
	}

	pub async fn sanitize(&self, key: &ServiceKey, response: StartResponse) -> StartResponse {
		match &self.sanitize_start_response {
			Some(hook) => {
				hook.resolve(&StartedService {
					key: key.clone(),
					response,
				})
				.await
			}
			None => response,
		}
	}
}
