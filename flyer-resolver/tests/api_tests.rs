//! Integration tests for flyer-resolver API endpoints
//!
//! Drives the router in-process with `oneshot`, backed by an in-memory
//! database and scripted collaborators.

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use flyer_common::events::EventBus;
use flyer_resolver::config::ResolverConfig;
use flyer_resolver::{build_router, AppState, CollaboratorSource};
use helpers::{fakes, ScriptedSearch, ScriptedValidator, Verdict};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

/// Test helper: create test app with in-memory database
async fn create_test_app(search: ScriptedSearch, validator: ScriptedValidator) -> (Router, AppState) {
    let pool = flyer_resolver::db::create_memory_pool()
        .await
        .expect("Failed to create in-memory database");

    let state = AppState::new(
        pool,
        EventBus::new(100),
        CollaboratorSource::Fixed(fakes::collaborators(Arc::new(search), Arc::new(validator))),
        ResolverConfig::default(),
    );
    (build_router(state.clone()), state)
}

async fn default_app() -> (Router, AppState) {
    create_test_app(ScriptedSearch::new(), ScriptedValidator::new()).await
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_project(app: &Router, name: &str) -> String {
    let (status, body) = send(app, "POST", "/projects", Some(json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

async fn add_product(app: &Router, project_id: &str, name: &str) {
    let (status, _) = send(
        app,
        "POST",
        &format!("/projects/{}/products", project_id),
        Some(json!({ "name": name, "price": 4.99 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

/// Poll until the background run has released the project
async fn wait_for_idle(app: &Router, state: &AppState, project_id: &str) -> Value {
    for _ in 0..100 {
        if state.active_runs.read().await.is_empty() {
            let (_, project) = send(app, "GET", &format!("/projects/{}", project_id), None).await;
            return project;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("run for project {} did not finish", project_id);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _state) = default_app().await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "flyer-resolver");
    assert_eq!(body["active_runs"], 0);
    assert_eq!(body["projects"]["draft"], 0);
    assert_eq!(body["stalled_projects"], 0);
}

#[tokio::test]
async fn test_health_reports_project_statuses() {
    let (app, state) = default_app().await;
    create_project(&app, "Rascunho").await;
    let stuck = create_project(&app, "Travado").await;
    // Claimed in the database but not running in this process, as after a crash
    flyer_resolver::db::projects::try_begin_processing(&state.db, stuck.parse().unwrap(), chrono::Utc::now())
        .await
        .unwrap();

    let (_, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["projects"]["draft"], 1);
    assert_eq!(body["projects"]["processing"], 1);
    assert_eq!(body["projects"]["completed"], 0);
    assert_eq!(body["stalled_projects"], 1);

    sqlx::query("DROP TABLE projects").execute(&state.db).await.unwrap();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert!(body.get("projects").is_none());
    assert!(body["last_error"].is_string());
}

#[tokio::test]
async fn test_project_and_product_endpoints() {
    let (app, _state) = default_app().await;

    let project_id = create_project(&app, "Ofertas da semana").await;
    add_product(&app, &project_id, "Leite Integral").await;
    add_product(&app, &project_id, "Cafe Torrado").await;

    let (status, project) = send(&app, "GET", &format!("/projects/{}", project_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(project["status"], "draft");
    assert_eq!(project["name"], "Ofertas da semana");

    let (status, products) = send(&app, "GET", &format!("/projects/{}/products", project_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let products = products.as_array().unwrap();
    assert_eq!(products.len(), 2);
    assert_eq!(products[0]["name"], "Leite Integral");
    assert_eq!(products[0]["status"], "pending");
    assert_eq!(products[1]["position"], 1);

    let (status, listed) = send(&app, "GET", "/projects", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let (app, _state) = default_app().await;
    let unknown = uuid::Uuid::new_v4();

    let (status, body) = send(&app, "GET", &format!("/projects/{}", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, "POST", &format!("/projects/{}/process", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let project_id = create_project(&app, "Flyer").await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/projects/{}/products", project_id),
        Some(json!({ "name": "Arroz", "price": -1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, body) = send(&app, "POST", &format!("/projects/{}/process", project_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "No products found for this project");

    let (_, project) = send(&app, "GET", &format!("/projects/{}", project_id), None).await;
    assert_eq!(project["status"], "draft");
}

#[tokio::test]
async fn test_process_resolves_products_in_background() {
    let search = ScriptedSearch::new().with_results("Leite Integral", &["https://web/leite.jpg"]);
    let validator = ScriptedValidator::new().with("https://web/leite.jpg", Verdict::Valid(0.9));
    let (app, state) = create_test_app(search, validator).await;

    let (status, _) = send(
        &app,
        "POST",
        "/certified-images",
        Some(json!({ "product_name": "Cafe Torrado", "image_url": "https://bank/cafe.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let project_id = create_project(&app, "Flyer").await;
    add_product(&app, &project_id, "Leite Integral").await;
    add_product(&app, &project_id, "CAFÉ TORRADO").await;
    add_product(&app, &project_id, "Sem Resultado").await;

    let (status, body) = send(&app, "POST", &format!("/projects/{}/process", project_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "processing");

    let project = wait_for_idle(&app, &state, &project_id).await;
    assert_eq!(project["status"], "completed");
    assert_eq!(project["total_products"], 3);
    assert_eq!(project["products_completed"], 2);
    assert_eq!(project["products_from_bank"], 1);
    assert_eq!(project["products_from_web"], 1);
    assert_eq!(project["products_failed"], 1);

    let (_, products) = send(&app, "GET", &format!("/projects/{}/products", project_id), None).await;
    assert_eq!(products[0]["image_source"], "web_validated");
    assert_eq!(products[1]["image_source"], "certified_bank");
    assert_eq!(products[2]["status"], "failed");

    let (_, images) = send(&app, "GET", "/certified-images", None).await;
    assert_eq!(images[0]["usage_count"], 1);
}

#[tokio::test]
async fn test_busy_project_refuses_second_start_and_new_products() {
    let search = ScriptedSearch::new().with_delay(Duration::from_millis(300));
    let (app, state) = create_test_app(search, ScriptedValidator::new()).await;

    let project_id = create_project(&app, "Flyer").await;
    add_product(&app, &project_id, "Um").await;
    add_product(&app, &project_id, "Dois").await;

    let (status, _) = send(&app, "POST", &format!("/projects/{}/process", project_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&app, "POST", &format!("/projects/{}/process", project_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/projects/{}/products", project_id),
        Some(json!({ "name": "Tres", "price": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let project = wait_for_idle(&app, &state, &project_id).await;
    assert_eq!(project["status"], "failed");
    assert_eq!(project["total_products"], 2);
}

#[tokio::test]
async fn test_cancel_abandon_restart_flow() {
    let search = ScriptedSearch::new().with_delay(Duration::from_millis(200));
    let (app, state) = create_test_app(search, ScriptedValidator::new()).await;

    let project_id = create_project(&app, "Flyer").await;
    for name in ["Um", "Dois", "Tres", "Quatro"] {
        add_product(&app, &project_id, name).await;
    }

    let (status, _) = send(&app, "POST", &format!("/projects/{}/cancel", project_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT, "nothing to cancel yet");

    let (status, _) = send(&app, "POST", &format!("/projects/{}/process", project_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(&app, "POST", &format!("/projects/{}/abandon", project_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT, "live run must be cancelled first");

    let (status, body) = send(&app, "POST", &format!("/projects/{}/cancel", project_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["cancel_requested"], true);

    // A cancelled run leaves the project claimed
    let project = wait_for_idle(&app, &state, &project_id).await;
    assert_eq!(project["status"], "processing");

    let (status, _) = send(&app, "POST", &format!("/projects/{}/process", project_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, project) = send(&app, "POST", &format!("/projects/{}/abandon", project_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(project["status"], "failed");
    assert_eq!(project["error_message"], "Run abandoned before completion");
    assert_eq!(project["total_products"], 4);
    assert_eq!(
        project["products_completed"].as_u64().unwrap() + project["products_failed"].as_u64().unwrap(),
        4,
        "abandon accounts for every product"
    );
    let (_, products) = send(&app, "GET", &format!("/projects/{}/products", project_id), None).await;
    assert!(products
        .as_array()
        .unwrap()
        .iter()
        .all(|p| p["status"] == "completed" || p["status"] == "failed"));

    let (status, _) = send(&app, "POST", &format!("/projects/{}/process", project_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let project = wait_for_idle(&app, &state, &project_id).await;
    assert_eq!(project["status"], "failed");
    assert_eq!(project["products_failed"], 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandon_racing_start_never_hits_live_run() {
    let search = ScriptedSearch::new().with_delay(Duration::from_millis(100));
    let (app, state) = create_test_app(search, ScriptedValidator::new()).await;

    for round in 0..10 {
        let project_id = create_project(&app, &format!("Flyer {}", round)).await;
        add_product(&app, &project_id, "Pao").await;

        let start = {
            let app = app.clone();
            let uri = format!("/projects/{}/process", project_id);
            tokio::spawn(async move { send(&app, "POST", &uri, None).await.0 })
        };
        let abandon = {
            let app = app.clone();
            let uri = format!("/projects/{}/abandon", project_id);
            tokio::spawn(async move { send(&app, "POST", &uri, None).await.0 })
        };

        assert_eq!(start.await.unwrap(), StatusCode::ACCEPTED);
        // Either the project was still a draft or the run was already registered
        assert_eq!(abandon.await.unwrap(), StatusCode::CONFLICT);

        let project = wait_for_idle(&app, &state, &project_id).await;
        assert_eq!(project["status"], "failed");
        assert!(project["error_message"].is_null());
        assert_eq!(project["products_failed"], 1);
    }
}

#[tokio::test]
async fn test_certified_image_endpoints() {
    let (app, _state) = default_app().await;

    let (status, created) = send(
        &app,
        "POST",
        "/certified-images",
        Some(json!({ "product_name": "Açúcar Refinado", "image_url": "https://bank/acucar.png", "category": "mercearia" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["normalized_name"], "acucar refinado");
    assert_eq!(created["usage_count"], 0);

    let (status, bulk) = send(
        &app,
        "POST",
        "/certified-images/bulk",
        Some(json!({
            "images": [
                { "filename": "leite_integral-1L.jpg", "image_url": "https://bank/leite.jpg" },
                { "image_url": "https://bank/anonymous.jpg" },
                { "product_name": "Sal", "image_url": "  " }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bulk["created"].as_array().unwrap().len(), 1);
    assert_eq!(bulk["created"][0]["product_name"], "leite integral 1L");
    let failed_indexes: Vec<u64> = bulk["failed"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["index"].as_u64().unwrap())
        .collect();
    assert_eq!(failed_indexes, vec![1, 2]);

    let (status, _) = send(&app, "POST", "/certified-images/bulk", Some(json!({ "images": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, images) = send(&app, "GET", "/certified-images", None).await;
    assert_eq!(images.as_array().unwrap().len(), 2);

    let id = created["id"].as_str().unwrap();
    let (status, _) = send(&app, "DELETE", &format!("/certified-images/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", &format!("/certified-images/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_settings_reject_unknown_or_blank() {
    let (app, _state) = default_app().await;

    let (status, _) = send(&app, "PUT", "/settings/bing_api_key", Some(json!({ "value": "abc" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "PUT", "/settings/gemini_api_key", Some(json!({ "value": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_settings_write_database_and_toml() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config_path = temp_dir.path().join("flyer-resolver.toml");

    let pool = flyer_resolver::db::create_memory_pool().await.unwrap();
    let state = AppState::new(
        pool.clone(),
        EventBus::new(100),
        CollaboratorSource::Fixed(fakes::collaborators(
            Arc::new(ScriptedSearch::new()),
            Arc::new(ScriptedValidator::new()),
        )),
        ResolverConfig::default(),
    )
    .with_config_path(config_path.clone());
    let app = build_router(state);

    let (status, body) = send(
        &app,
        "PUT",
        "/settings/google_search_engine_id",
        Some(json!({ "value": "cx-123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["configured"], true);

    let stored = flyer_resolver::db::settings::get_credential(&pool, "google_search_engine_id")
        .await
        .unwrap();
    assert_eq!(stored.as_deref(), Some("cx-123"));

    let toml = flyer_common::config::load_toml_config(&config_path).unwrap();
    assert_eq!(toml.google_search_engine_id.as_deref(), Some("cx-123"));

    let (status, statuses) = send(&app, "GET", "/settings", None).await;
    assert_eq!(status, StatusCode::OK);
    let entry = statuses
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["key"] == "google_search_engine_id")
        .unwrap();
    assert_eq!(entry["configured"], true);
    assert!(entry.get("value").is_none());
}

#[tokio::test]
async fn test_event_stream_content_type() {
    let (app, _state) = default_app().await;

    let response = app
        .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/event-stream"));
}
