// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outpost server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use outpost_server::jobs::{ExpirySweepJob, OrphanSweepJob, RecreateTunnelsJob};
use outpost_server::{backends, create_router, AppState};
use outpost_server_config::LogFormat;
use outpost_server_crypt::Cipher;
use outpost_server_db::{HubRepository, ServiceRepository};
use outpost_server_jobs::{JobScheduler, TriggerSource};
use outpost_server_spawner::{Constant, Hooks, Outpost, OutpostParts, OutpostSettings};
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time running starts and stops get to finish once shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Outpost server - runs notebook services on behalf of remote hubs.
#[derive(Parser, Debug)]
#[command(name = "outpost-server", about = "Outpost service spawner", version)]
struct Args {
	/// Config file to use instead of /etc/outpost/server.toml
	#[arg(long, env = "OUTPOST_SERVER_CONFIG")]
	config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => outpost_server_config::load_config_with_file(path)?,
		None => outpost_server_config::load_config()?,
	};

	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	match config.logging.format {
		LogFormat::Json => tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer().json())
			.init(),
		LogFormat::Pretty => tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer())
			.init(),
	}

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		backend = %config.outpost.backend,
		"starting outpost-server"
	);

	let factory = backends::factory_for(&config.outpost.backend)
		.ok_or_else(|| format!("unknown backend: {}", config.outpost.backend))?;
	let cipher = Cipher::from_base64(&config.outpost.crypt_key)?;

	let pool = outpost_server_db::create_pool(&config.database.url).await?;
	outpost_server_db::run_migrations(&pool).await?;

	let hooks = Hooks {
		send_events: Arc::new(Constant(config.outpost.send_events)),
		flavors_update_token: Arc::new(Constant(config.outpost.flavors_update_token.clone())),
		recreate_tunnels_at_start: Arc::new(Constant(config.outpost.recreate_tunnels_at_start)),
		..Hooks::default()
	};

	let outpost = Outpost::new(OutpostParts {
		hubs: HubRepository::new(pool.clone()),
		services: ServiceRepository::new(pool.clone()),
		cipher,
		factory,
		hooks,
		settings: OutpostSettings {
			flavors_path: config.outpost.flavors_path.clone(),
			certs_dir: config.outpost.certs_dir.clone(),
			global_max_per_user: config.outpost.global_max_per_user,
			request_timeout: Duration::from_secs(config.outpost.request_timeout_secs),
		},
	});

	let mut scheduler = JobScheduler::new();

	if config.sweepers.expiry_enabled {
		scheduler.register_periodic(
			Arc::new(ExpirySweepJob::new(outpost.clone())),
			Duration::from_secs(config.sweepers.expiry_interval_secs),
		);
		tracing::info!(interval_secs = config.sweepers.expiry_interval_secs, "registered expiry sweeper");
	}

	if config.sweepers.orphan_enabled && !config.sweepers.upstream_hubs.is_empty() {
		scheduler.register_periodic(
			Arc::new(OrphanSweepJob::new(
				outpost.clone(),
				config.sweepers.upstream_hubs.clone(),
				Duration::from_secs(config.sweepers.orphan_grace_secs),
			)),
			Duration::from_secs(config.sweepers.orphan_interval_secs),
		);
		tracing::info!(
			hubs = config.sweepers.upstream_hubs.len(),
			interval_secs = config.sweepers.orphan_interval_secs,
			"registered orphan sweeper"
		);
	}

	let recreate_tunnels = RecreateTunnelsJob::new(outpost.clone());
	let recreate_tunnels_id = outpost_server_jobs::Job::id(&recreate_tunnels).to_string();
	scheduler.register_one_shot(Arc::new(recreate_tunnels));

	let scheduler = Arc::new(scheduler);
	scheduler.start().await;

	if config.outpost.recreate_tunnels_at_start {
		if let Err(e) = scheduler.spawn_job(&recreate_tunnels_id, TriggerSource::Startup).await {
			tracing::error!(error = %e, "failed to schedule tunnel recreation");
		}
	}

	let mut state = AppState::new(outpost.clone(), config.auth.clone());
	state.job_scheduler = Some(Arc::clone(&scheduler));

	let app = create_router(state)
		.layer(TraceLayer::new_for_http())
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		);

	let addr = config.socket_addr();
	tracing::info!("listening on {}", addr);

	let listener = tokio::net::TcpListener::bind(&addr).await?;

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "Server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("Received shutdown signal");
		}
	}

	tracing::info!("Shutting down job scheduler...");
	scheduler.shutdown().await;
	outpost.shutdown(SHUTDOWN_GRACE).await;

	tracing::info!("Server shutdown complete");
	Ok(())
}
