// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! A scripted in-memory backend for tests.
//!
//! Started workloads live in a shared [`ScriptedWorld`] that outlives any
//! single backend object, the way real processes outlive a restart.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};

use crate::backend::{
	Backend, BackendContext, BackendError, BackendFactory, BackendResult, ProgressStream, StartResponse,
};

/// Behaviour of every backend the factory creates. Read at call time.
#[derive(Debug, Clone)]
pub struct Script {
	pub host: String,
	pub port: u16,
	pub start_delay: Duration,
	pub fail_create: bool,
	pub fail_start: bool,
	pub fail_stop: bool,
	pub events: Vec<Map<String, Value>>,
}

impl Default for Script {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 8888,
			start_delay: Duration::ZERO,
			fail_create: false,
			fail_start: false,
			fail_stop: false,
			events: Vec::new(),
		}
	}
}

#[derive(Debug, Default)]
struct WorldState {
	running: HashSet<String>,
	constructions: u32,
	starts: u32,
	stops: u32,
}

/// Workloads started by scripted backends.
#[derive(Debug, Default)]
pub struct ScriptedWorld {
	state: Mutex<WorldState>,
}

impl ScriptedWorld {
	fn state(&self) -> MutexGuard<'_, WorldState> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn constructions(&self) -> u32 {
		self.state().constructions
	}

	pub fn starts(&self) -> u32 {
		self.state().starts
	}

	pub fn stops(&self) -> u32 {
		self.state().stops
	}

	pub fn running(&self) -> usize {
		self.state().running.len()
	}

	pub fn is_running(&self, instance: &str) -> bool {
		self.state().running.contains(instance)
	}

	/// Simulate a workload dying on its own.
	pub fn kill(&self, instance: &str) {
		self.state().running.remove(instance);
	}
}

#[derive(Clone, Default)]
pub struct ScriptedBackendFactory {
	world: Arc<ScriptedWorld>,
	script: Arc<Mutex<Script>>,
}

impl ScriptedBackendFactory {
	pub fn world(&self) -> &ScriptedWorld {
		&self.world
	}

	pub fn script(&self, edit: impl FnOnce(&mut Script)) {
		edit(&mut self.script.lock().unwrap_or_else(|e| e.into_inner()));
	}
}

impl BackendFactory for ScriptedBackendFactory {
	fn name(&self) -> &str {
		"scripted"
	}

	fn create(&self, ctx: &BackendContext) -> BackendResult<Box<dyn Backend>> {
		if current(&self.script).fail_create {
			return Err(BackendError::Config("scripted construction failure".to_string()));
		}
		self.world.state().constructions += 1;
		Ok(Box::new(ScriptedBackend {
			id: ctx.key.dir_name(),
			instance: None,
			world: Arc::clone(&self.world),
			script: Arc::clone(&self.script),
		}))
	}
}

fn current(script: &Mutex<Script>) -> Script {
	script.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

struct ScriptedBackend {
	id: String,
	instance: Option<String>,
	world: Arc<ScriptedWorld>,
	script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Backend for ScriptedBackend {
	fn progress(&mut self) -> Option<ProgressStream> {
		let events = current(&self.script).events;
		if events.is_empty() {
			return None;
		}
		Some(futures::stream::iter(events).boxed())
	}

	async fn start(&mut self) -> BackendResult<StartResponse> {
		let script = current(&self.script);
		if !script.start_delay.is_zero() {
			tokio::time::sleep(script.start_delay).await;
		}
		if script.fail_start {
			return Err(BackendError::Start("scripted start failure".to_string()));
		}
		{
			let mut world = self.world.state();
			world.starts += 1;
			world.running.insert(self.id.clone());
		}
		self.instance = Some(self.id.clone());
		Ok(StartResponse::Address {
			host: script.host,
			port: script.port,
		})
	}

	async fn poll(&mut self) -> BackendResult<Option<i32>> {
		match &self.instance {
			Some(instance) if self.world.is_running(instance) => Ok(None),
			_ => Ok(Some(0)),
		}
	}

	async fn stop(&mut self, _immediate: bool) -> BackendResult<()> {
		self.world.state().stops += 1;
		if current(&self.script).fail_stop {
			return Err(BackendError::Stop("scripted stop failure".to_string()));
		}
		if let Some(instance) = &self.instance {
			self.world.kill(instance);
		}
		Ok(())
	}

	fn get_state(&self) -> Value {
		match &self.instance {
			Some(instance) => json!({ "instance": instance }),
			None => json!({}),
		}
	}

	fn load_state(&mut self, state: &Value) -> BackendResult<()> {
		let Some(state) = state.as_object() else {
			return Err(BackendError::State(format!("expected an object, got {state}")));
		};
		self.instance = state
			.get("instance")
			.and_then(Value::as_str)
			.map(str::to_string);
		Ok(())
	}

	fn clear_state(&mut self) {
		self.instance = None;
	}
}
