use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub mod v1;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(v1::health))
        .route("/v1/inference_tasks", post(v1::create_task))
        .route("/v1/inference_tasks/:id", get(v1::get_task))
        .route("/v1/inference_tasks/:id/results", get(v1::get_llm_result))
        .route(
            "/v1/inference_tasks/:id/results/:index",
            get(v1::get_image_result),
        )
}
