use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use axon_driver::ResultSink;
use axon_host::{server::api::create_router, AppState};
use axon_lib::{InferenceTask, TaskStatus, TaskType};
use axon_taskdb::{InMemoryTaskDb, TaskStore};
use pretty_assertions::assert_eq;
use tower::ServiceExt;

fn test_app() -> (Router, Arc<InMemoryTaskDb>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(InMemoryTaskDb::new());
    let state = AppState {
        store: store.clone(),
        sink: ResultSink::new(dir.path()),
    };
    (create_router().with_state(state), store, dir)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn create_task_then_read_status() {
    let (app, _store, _dir) = test_app();

    let request = serde_json::json!({
        "client_id": "client-1",
        "task_args": "{\"prompt\":\"a lighthouse at dusk\"}",
        "task_type": "image_gen",
        "task_fee": 30,
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/inference_tasks")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(request.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let created = body_json(response).await;
    assert_eq!(created["status"], "pending");
    let id = created["id"].as_i64().unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/v1/inference_tasks/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], id);
}

#[tokio::test]
async fn malformed_task_args_are_rejected() {
    let (app, _store, _dir) = test_app();

    let request = serde_json::json!({
        "client_id": "client-1",
        "task_args": "not json",
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/inference_tasks")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(request.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn missing_task_is_not_found() {
    let (app, _store, _dir) = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/inference_tasks/42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn llm_result_is_served_from_legacy_layout() {
    let (app, store, dir) = test_app();

    let mut task = InferenceTask {
        task_args: "{}".to_owned(),
        task_type: TaskType::Llm,
        task_size: 1,
        status: TaskStatus::ResultDownloaded,
        ..Default::default()
    };
    store.save(&mut task).await.unwrap();

    // result written by an old bridge version, keyed by local id
    let legacy_dir = dir.path().join("inference_tasks").join(task.id.to_string());
    std::fs::create_dir_all(&legacy_dir).unwrap();
    std::fs::write(
        legacy_dir.join("0.json"),
        serde_json::json!({"choices": []}).to_string(),
    )
    .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/v1/inference_tasks/{}/results", task.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"choices": []}));
}

#[tokio::test]
async fn unfinished_image_result_is_not_ready() {
    let (app, store, _dir) = test_app();

    let mut task = InferenceTask {
        task_args: "{}".to_owned(),
        task_type: TaskType::ImageGen,
        task_size: 1,
        status: TaskStatus::ParamsUploaded,
        ..Default::default()
    };
    store.save(&mut task).await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/v1/inference_tasks/{}/results/0", task.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
