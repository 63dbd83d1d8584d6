// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine;
use outpost_common_secret::SecretString;
use outpost_server::{create_router, AppState};
use outpost_server_config::{AuthConfig, HubCredential};
use outpost_server_crypt::{generate_key, Cipher};
use outpost_server_db::testing::create_test_pool;
use outpost_server_db::{HubRepository, ServiceRepository};
use outpost_server_spawner::testing::ScriptedBackendFactory;
use outpost_server_spawner::{Hooks, Outpost, OutpostParts, OutpostSettings};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const FLAVORS: &str = r#"
flavors:
  small:
    max: 1
    display_name: Small
    runtime:
      hours: 1
  large:
    max: -1
"#;

struct TestApp {
	router: Router,
	factory: ScriptedBackendFactory,
	_dir: TempDir,
}

async fn setup() -> TestApp {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("flavors.yaml"), FLAVORS).unwrap();
	let pool = create_test_pool().await;
	let factory = ScriptedBackendFactory::default();
	factory.script(|s| s.port = 4567);

	let outpost = Outpost::new(OutpostParts {
		hubs: HubRepository::new(pool.clone()),
		services: ServiceRepository::new(pool.clone()),
		cipher: Cipher::from_base64(&SecretString::new(generate_key())).unwrap(),
		factory: Arc::new(factory.clone()),
		hooks: Hooks::default(),
		settings: OutpostSettings {
			flavors_path: dir.path().join("flavors.yaml"),
			certs_dir: dir.path().join("certs"),
			global_max_per_user: -1,
			request_timeout: Duration::from_secs(2),
		},
	});
	let auth = AuthConfig {
		credentials: vec![
			HubCredential {
				username: "hub1".to_string(),
				password: "secret1".into(),
			},
			HubCredential {
				username: "hub2".to_string(),
				password: "secret2".into(),
			},
		],
	};

	TestApp {
		router: create_router(AppState::new(outpost, auth)),
		factory,
		_dir: dir,
	}
}

fn basic(user: &str, password: &str) -> String {
	let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
	format!("Basic {encoded}")
}

fn request(method: &str, uri: &str, body: Option<Value>) -> axum::http::request::Builder {
	let builder = Request::builder()
		.method(method)
		.uri(uri)
		.header(header::AUTHORIZATION, basic("hub1", "secret1"));
	match body {
		Some(_) => builder.header(header::CONTENT_TYPE, "application/json"),
		None => builder,
	}
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
	let resp = app.router.clone().oneshot(req).await.unwrap();
	let status = resp.status();
	let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
	let body = if bytes.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&bytes).unwrap()
	};
	(status, body)
}

async fn call(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
	let payload = body.as_ref().map(Value::to_string).unwrap_or_default();
	let req = request(method, uri, body).body(Body::from(payload)).unwrap();
	send(app, req).await
}

fn start_body(name: &str, flavor: &str) -> Value {
	json!({
		"name": name,
		"flavor": flavor,
		"env": {
			"JUPYTERHUB_USER": "alice",
			"JUPYTERHUB_USER_ID": "7",
		},
	})
}

#[tokio::test]
async fn ping_needs_no_credentials() {
	let app = setup().await;
	let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
	let (status, body) = send(&app, req).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "ping": "pong!" }));
}

#[tokio::test]
async fn services_require_valid_credentials() {
	let app = setup().await;

	let req = Request::builder().uri("/services").body(Body::empty()).unwrap();
	let resp = app.router.clone().oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
	assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));

	let req = Request::builder()
		.uri("/services")
		.header(header::AUTHORIZATION, basic("hub1", "wrong"))
		.body(Body::empty())
		.unwrap();
	let (status, _) = send(&app, req).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn start_limit_stop_and_restart() {
	let app = setup().await;

	let (status, body) = call(&app, "POST", "/services", Some(start_body("first", "small"))).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "service": "127.0.0.1:4567" }));

	let (status, body) = call(&app, "POST", "/services", Some(start_body("second", "small"))).await;
	assert_eq!(status.as_u16(), 419);
	let message = body["message"].as_str().unwrap();
	assert!(message.contains("Maximum (1) already reached"), "{message}");

	let (status, body) = call(&app, "DELETE", "/services/first", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({}));
	assert_eq!(app.factory.world().running(), 0);

	let (status, body) = call(&app, "POST", "/services", Some(start_body("second", "small"))).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "service": "127.0.0.1:4567" }));
}

#[tokio::test]
async fn poll_reports_running_then_exit_code() {
	let app = setup().await;
	call(&app, "POST", "/services", Some(start_body("svc", "large"))).await;

	let (status, body) = call(&app, "GET", "/services/svc", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body, json!({ "status": null }));

	app.factory.world().kill("hub1-svc-0");
	let (_, body) = call(&app, "GET", "/services/svc/0", None).await;
	assert_eq!(body, json!({ "status": 0 }));
}

#[tokio::test]
async fn unknown_service_is_not_found() {
	let app = setup().await;

	let (status, _) = call(&app, "GET", "/services/missing", None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);

	let (status, _) = call(&app, "DELETE", "/services/missing", None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn async_start_and_stop_are_accepted() {
	let app = setup().await;

	let req = request("POST", "/services", Some(json!({})))
		.header("execution-type", "async")
		.body(Body::from(start_body("svc", "large").to_string()))
		.unwrap();
	let (status, body) = send(&app, req).await;
	assert_eq!(status, StatusCode::ACCEPTED);
	assert_eq!(body, json!({}));

	let req = request("DELETE", "/services/svc", None)
		.header("execution-type", "async")
		.body(Body::empty())
		.unwrap();
	let (status, _) = send(&app, req).await;
	assert_eq!(status, StatusCode::ACCEPTED);

	for _ in 0..50 {
		let (status, _) = call(&app, "GET", "/services/svc", None).await;
		if status == StatusCode::NOT_FOUND {
			return;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	panic!("detached stop never removed the service");
}

#[tokio::test]
async fn hubs_only_see_their_own_services() {
	let app = setup().await;
	call(&app, "POST", "/services", Some(start_body("svc", "large"))).await;

	let (status, body) = call(&app, "GET", "/services", None).await;
	assert_eq!(status, StatusCode::OK);
	let services = body.as_array().unwrap();
	assert_eq!(services.len(), 1);
	assert_eq!(services[0]["name"], "svc");

	let req = Request::builder()
		.uri("/services")
		.header(header::AUTHORIZATION, basic("hub2", "secret2"))
		.body(Body::empty())
		.unwrap();
	let (_, body) = send(&app, req).await;
	assert_eq!(body, json!([]));

	let req = Request::builder()
		.uri("/services/svc")
		.header(header::AUTHORIZATION, basic("hub2", "secret2"))
		.body(Body::empty())
		.unwrap();
	let (status, _) = send(&app, req).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn flavors_report_current_usage() {
	let app = setup().await;
	call(&app, "POST", "/services", Some(start_body("svc", "small"))).await;

	let (status, body) = call(&app, "GET", "/flavors", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["small"]["max"], 1);
	assert_eq!(body["small"]["current"], 1);
	assert_eq!(body["small"]["display_name"], "Small");
	assert_eq!(body["large"]["current"], 0);

	let (status, body) = call(&app, "POST", "/userflavors", Some(json!({}))).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["small"]["current"], 1);
}

#[tokio::test]
async fn unknown_flavor_is_user_facing() {
	let app = setup().await;
	let (status, body) = call(&app, "POST", "/services", Some(start_body("svc", "huge"))).await;
	assert_eq!(status.as_u16(), 419);
	assert!(body["message"].as_str().is_some());
	assert_eq!(app.factory.world().starts(), 0);
}

#[tokio::test]
async fn duplicate_start_is_user_facing() {
	let app = setup().await;
	let (status, _) = call(&app, "POST", "/services", Some(start_body("svc", "large"))).await;
	assert_eq!(status, StatusCode::OK);

	let (status, body) = call(&app, "POST", "/services", Some(start_body("svc", "large"))).await;
	assert_eq!(status.as_u16(), 419);
	let message = body["message"].as_str().unwrap();
	assert!(message.contains("already exists"), "{message}");
	assert_eq!(app.factory.world().starts(), 1);
	assert_eq!(app.factory.world().running(), 1);
}

#[tokio::test]
async fn path_like_service_name_is_user_facing() {
	let app = setup().await;
	let (status, body) = call(&app, "POST", "/services", Some(start_body("x/../../victim", "large"))).await;
	assert_eq!(status.as_u16(), 419);
	assert!(body["message"].as_str().unwrap().contains("is not allowed"));
	assert_eq!(app.factory.world().constructions(), 0);

	let (_, body) = call(&app, "GET", "/services", None).await;
	assert_eq!(body, json!([]));
}

#[tokio::test]
async fn health_reports_without_scheduler() {
	let app = setup().await;
	let (status, body) = call(&app, "GET", "/health", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["status"], "healthy");
}
