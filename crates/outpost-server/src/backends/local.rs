// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runs each service as a local child process on a free port.
//!
//! State is `{"pid": .., "port": ..}` so a restarted outpost can still poll
//! and stop processes it did not spawn itself.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use outpost_server_spawner::{
	Backend, BackendContext, BackendError, BackendFactory, BackendResult, ServiceBody, StartResponse,
};
use serde_json::{json, Value};
use tokio::process::{Child, Command};

const DEFAULT_COMMAND: &str = "jupyterhub-singleuser";
const LOCAL_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone)]
pub struct LocalProcessFactory {
	/// Time between SIGTERM and SIGKILL on a graceful stop.
	pub grace_period: Duration,
}

impl Default for LocalProcessFactory {
	fn default() -> Self {
		Self {
			grace_period: Duration::from_secs(5),
		}
	}
}

impl BackendFactory for LocalProcessFactory {
	fn name(&self) -> &str {
		"local"
	}

	fn create(&self, ctx: &BackendContext) -> BackendResult<Box<dyn Backend>> {
		let argv = command_from_misc(&ctx.body)?;
		let mut env = ctx.body.env_strings();
		if let Some(paths) = &ctx.cert_paths {
			env.insert("JUPYTERHUB_SSL_KEYFILE".to_string(), paths.keyfile.display().to_string());
			env.insert("JUPYTERHUB_SSL_CERTFILE".to_string(), paths.certfile.display().to_string());
			env.insert("JUPYTERHUB_SSL_CLIENT_CA".to_string(), paths.cafile.display().to_string());
		}
		Ok(Box::new(LocalProcess {
			argv,
			env,
			grace_period: self.grace_period,
			child: None,
			pid: None,
			port: None,
		}))
	}
}

/// `misc.cmd` as a string or list, otherwise the default single-user server.
fn command_from_misc(body: &ServiceBody) -> BackendResult<Vec<String>> {
	let argv = match body.misc.get("cmd") {
		None | Some(Value::Null) => vec![DEFAULT_COMMAND.to_string()],
		Some(Value::String(cmd)) => cmd.split_whitespace().map(str::to_string).collect(),
		Some(Value::Array(parts)) => parts
			.iter()
			.map(|p| {
				p.as_str()
					.map(str::to_string)
					.ok_or_else(|| BackendError::Config(format!("cmd entries must be strings, got {p}")))
			})
			.collect::<BackendResult<Vec<_>>>()?,
		Some(other) => return Err(BackendError::Config(format!("cmd must be a string or list, got {other}"))),
	};
	if argv.is_empty() {
		return Err(BackendError::Config("cmd is empty".to_string()));
	}
	Ok(argv)
}

fn free_port() -> std::io::Result<u16> {
	let listener = std::net::TcpListener::bind((LOCAL_HOST, 0))?;
	Ok(listener.local_addr()?.port())
}

struct LocalProcess {
	argv: Vec<String>,
	env: HashMap<String, String>,
	grace_period: Duration,
	child: Option<Child>,
	pid: Option<i32>,
	port: Option<u16>,
}

#[async_trait]
impl Backend for LocalProcess {
	async fn start(&mut self) -> BackendResult<StartResponse> {
		let port = free_port()?;
		let mut command = Command::new(&self.argv[0]);
		command
			.args(&self.argv[1..])
			.arg(format!("--ip={LOCAL_HOST}"))
			.arg(format!("--port={port}"))
			.env_clear()
			.envs(&self.env)
			.env("PATH", std::env::var("PATH").unwrap_or_default())
			.env("JUPYTERHUB_SERVICE_URL", format!("http://{LOCAL_HOST}:{port}/"))
			.stdin(std::process::Stdio::null())
			.kill_on_drop(false);
		#[cfg(unix)]
		command.process_group(0);

		let child = command
			.spawn()
			.map_err(|e| BackendError::Start(format!("could not run {}: {e}", self.argv[0])))?;
		let pid = child
			.id()
			.and_then(|id| i32::try_from(id).ok())
			.ok_or_else(|| BackendError::Start("process exited before it reported a pid".to_string()))?;

		tracing::info!(pid, port, command = %self.argv[0], "started local process");
		self.child = Some(child);
		self.pid = Some(pid);
		self.port = Some(port);
		Ok(StartResponse::Address {
			host: LOCAL_HOST.to_string(),
			port,
		})
	}

	async fn poll(&mut self) -> BackendResult<Option<i32>> {
		if let Some(child) = self.child.as_mut() {
			return match child.try_wait()? {
				Some(status) => Ok(Some(status.code().unwrap_or(1))),
				None => Ok(None),
			};
		}
		match self.pid {
			Some(pid) if process_alive(pid) => Ok(None),
			_ => Ok(Some(0)),
		}
	}

	async fn stop(&mut self, immediate: bool) -> BackendResult<()> {
		let Some(pid) = self.pid else {
			return Ok(());
		};

		if immediate {
			signal(pid, Signal::Kill);
		} else {
			signal(pid, Signal::Term);
			if !self.wait_for_exit(pid, self.grace_period).await {
				tracing::warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
				signal(pid, Signal::Kill);
			}
		}
		self.wait_for_exit(pid, Duration::from_secs(2)).await;
		Ok(())
	}

	fn get_state(&self) -> Value {
		match (self.pid, self.port) {
			(Some(pid), port) => json!({ "pid": pid, "port": port }),
			(None, _) => json!({}),
		}
	}

	fn load_state(&mut self, state: &Value) -> BackendResult<()> {
		let Some(state) = state.as_object() else {
			return Err(BackendError::State(format!("expected an object, got {state}")));
		};
		self.pid = state
			.get("pid")
			.and_then(Value::as_i64)
			.and_then(|p| i32::try_from(p).ok());
		self.port = state
			.get("port")
			.and_then(Value::as_u64)
			.and_then(|p| u16::try_from(p).ok());
		Ok(())
	}

	fn clear_state(&mut self) {
		self.child = None;
		self.pid = None;
		self.port = None;
	}
}

impl LocalProcess {
	/// Returns whether the process is gone within `timeout`.
	async fn wait_for_exit(&mut self, pid: i32, timeout: Duration) -> bool {
		if let Some(child) = self.child.as_mut() {
			return tokio::time::timeout(timeout, child.wait()).await.is_ok();
		}
		let deadline = tokio::time::Instant::now() + timeout;
		while process_alive(pid) {
			if tokio::time::Instant::now() >= deadline {
				return false;
			}
			tokio::time::sleep(Duration::from_millis(100)).await;
		}
		true
	}
}

#[derive(Debug, Clone, Copy)]
enum Signal {
	Term,
	Kill,
}

#[cfg(unix)]
fn signal(pid: i32, sig: Signal) {
	use nix::sys::signal::{self, killpg, Signal as NixSignal};
	use nix::unistd::Pid;

	let sig = match sig {
		Signal::Term => NixSignal::SIGTERM,
		Signal::Kill => NixSignal::SIGKILL,
	};
	let pid = Pid::from_raw(pid);
	if let Err(e) = killpg(pid, sig).or_else(|_| signal::kill(pid, sig)) {
		tracing::debug!(pid = pid.as_raw(), error = %e, "could not signal process");
	}
}

#[cfg(not(unix))]
fn signal(pid: i32, _sig: Signal) {
	tracing::warn!(pid, "signals are not supported on this platform");
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
	use nix::errno::Errno;
	use nix::sys::signal::kill;
	use nix::unistd::Pid;

	match kill(Pid::from_raw(pid), None) {
		Ok(()) => true,
		Err(Errno::EPERM) => true,
		Err(_) => false,
	}
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use outpost_server_spawner::ServiceKey;

	fn context(misc: Value) -> BackendContext {
		BackendContext {
			key: ServiceKey::new("hub", "svc", "0"),
			body: serde_json::from_value(json!({ "name": "svc", "misc": misc })).unwrap(),
			auth_state: HashMap::new(),
			cert_paths: None,
			trust_bundles: HashMap::new(),
			flavor: None,
		}
	}

	#[test]
	fn command_defaults_to_single_user_server() {
		let argv = command_from_misc(&context(json!({})).body).unwrap();
		assert_eq!(argv, vec![DEFAULT_COMMAND.to_string()]);
	}

	#[test]
	fn command_accepts_string_and_list() {
		let argv = command_from_misc(&context(json!({ "cmd": "python -m http.server" })).body).unwrap();
		assert_eq!(argv, ["python", "-m", "http.server"]);
		let argv = command_from_misc(&context(json!({ "cmd": ["sleep", "60"] })).body).unwrap();
		assert_eq!(argv, ["sleep", "60"]);
	}

	#[test]
	fn invalid_commands_are_rejected() {
		assert!(command_from_misc(&context(json!({ "cmd": [1, 2] })).body).is_err());
		assert!(command_from_misc(&context(json!({ "cmd": "" })).body).is_err());
		assert!(command_from_misc(&context(json!({ "cmd": 5 })).body).is_err());
	}

	#[test]
	fn state_round_trips_through_json() {
		let factory = LocalProcessFactory::default();
		let mut backend = factory.create(&context(json!({}))).unwrap();
		assert_eq!(backend.get_state(), json!({}));

		backend.load_state(&json!({ "pid": 4242, "port": 9000 })).unwrap();
		assert_eq!(backend.get_state(), json!({ "pid": 4242, "port": 9000 }));

		backend.clear_state();
		assert_eq!(backend.get_state(), json!({}));
		assert!(backend.load_state(&json!("nope")).is_err());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn starts_polls_and_stops_a_process() {
		let factory = LocalProcessFactory {
			grace_period: Duration::from_secs(2),
		};
		// `sleep` rejects the appended flags, so wrap it in a shell.
		let mut backend = factory
			.create(&context(json!({ "cmd": ["sh", "-c", "sleep 30", "outpost"] })))
			.unwrap();

		let response = backend.start().await.unwrap();
		assert!(matches!(response, StartResponse::Address { ref host, .. } if host == LOCAL_HOST));
		assert_eq!(backend.poll().await.unwrap(), None);

		// A fresh object restored from state sees the same process.
		let state = backend.get_state();
		let mut restored = factory.create(&context(json!({}))).unwrap();
		restored.load_state(&state).unwrap();
		assert_eq!(restored.poll().await.unwrap(), None);

		restored.stop(false).await.unwrap();
		assert!(backend.poll().await.unwrap().is_some());
	}
}
