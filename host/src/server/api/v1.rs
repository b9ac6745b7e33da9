use alloy_primitives::B256;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use axon_lib::{ClientTask, InferenceTask, TaskAbortReason, TaskError, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::interfaces::{HostError, HostResult};
use crate::AppState;

fn default_task_version() -> String {
    "3.0.0".to_string()
}

fn default_task_size() -> u64 {
    1
}

fn default_task_fee() -> u64 {
    30
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    pub client_id: String,
    /// Opaque JSON understood by the relay and the worker fleet.
    pub task_args: String,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default = "default_task_version")]
    pub task_version: String,
    #[serde(default)]
    pub model_ids: Vec<String>,
    /// Fee in gwei.
    #[serde(default = "default_task_fee")]
    pub task_fee: u64,
    #[serde(default)]
    pub min_vram: u64,
    #[serde(default)]
    pub required_gpu: String,
    #[serde(default)]
    pub required_gpu_vram: u64,
    #[serde(default = "default_task_size")]
    pub task_size: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskResponse {
    pub id: i64,
    pub client_task_id: i64,
    #[schema(value_type = String)]
    pub task_id: B256,
    pub status: TaskStatus,
    pub abort_reason: TaskAbortReason,
    pub task_error: TaskError,
}

impl From<&InferenceTask> for TaskResponse {
    fn from(task: &InferenceTask) -> TaskResponse {
        TaskResponse {
            id: task.id,
            client_task_id: task.client_task_id,
            task_id: task.task_id,
            status: task.status,
            abort_reason: task.abort_reason,
            task_error: task.task_error,
        }
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Register a new inference task; the dispatcher picks it up on its
/// next scan.
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> HostResult<Json<TaskResponse>> {
    if serde_json::from_str::<serde_json::Value>(&request.task_args).is_err() {
        return Err(HostError::InvalidRequest(
            "task_args must be valid JSON".to_owned(),
        ));
    }
    if request.task_size == 0 {
        return Err(HostError::InvalidRequest(
            "task_size must be positive".to_owned(),
        ));
    }

    let client = state.store.get_or_create_client(&request.client_id).await?;
    let mut client_task = ClientTask {
        client_id: client.id,
        ..Default::default()
    };
    state.store.save_client_task(&mut client_task).await?;

    let mut task = InferenceTask {
        client_id: client.id,
        client_task_id: client_task.id,
        task_id: B256::random(),
        task_args: request.task_args,
        task_type: request.task_type,
        task_model_ids: request.model_ids,
        task_version: request.task_version,
        task_fee: request.task_fee,
        min_vram: request.min_vram,
        required_gpu: request.required_gpu,
        required_gpu_vram: request.required_gpu_vram,
        task_size: request.task_size,
        status: TaskStatus::Pending,
        ..Default::default()
    };
    state.store.save(&mut task).await?;

    Ok(Json(TaskResponse::from(&task)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> HostResult<Json<TaskResponse>> {
    let task = state.store.get(id).await?;
    Ok(Json(TaskResponse::from(&task)))
}

/// Serve one image artifact of a finished image-generation task.
pub async fn get_image_result(
    State(state): State<AppState>,
    Path((id, index)): Path<(i64, u64)>,
) -> HostResult<impl IntoResponse> {
    let task = state.store.get(id).await?;
    if task.task_type != TaskType::ImageGen {
        return Err(HostError::InvalidRequest("not an image task".to_owned()));
    }
    if task.status != TaskStatus::ResultDownloaded {
        return Err(HostError::ResultNotReady);
    }

    let path = state
        .sink
        .artifact_path(&task, index)
        .ok_or(HostError::ResultNotReady)?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| HostError::ResultNotReady)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

/// Serve the result of a finished LLM task. Rows written before
/// commitments existed keep their results under the local id, so the
/// sink probes both layouts.
pub async fn get_llm_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> HostResult<Json<serde_json::Value>> {
    let task = state.store.get(id).await?;
    if task.task_type != TaskType::Llm {
        return Err(HostError::InvalidRequest("not an LLM task".to_owned()));
    }

    let path = state
        .sink
        .llm_result_path(&task)
        .ok_or(HostError::ResultNotReady)?;
    let bytes = tokio::fs::read(path).await?;
    Ok(Json(serde_json::from_slice(&bytes)?))
}
