//! Persistence for inference tasks and client tasks.
//!
//! The driver owns every mutation of an [`InferenceTask`] row and
//! leans on two store properties: partial updates leave unset fields
//! untouched, and the replica-spawning write is atomic with the
//! parent's transition into `Created`.

use alloy_primitives::B256;
use async_trait::async_trait;
use axon_lib::{Client, ClientTask, ClientTaskStatus, InferenceTask, TaskPatch};

pub mod mem_db;

pub use mem_db::InMemoryTaskDb;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("store call timed out")]
    Timeout,

    #[error("row for {entity} is missing {field}")]
    InvalidRow {
        entity: &'static str,
        field: &'static str,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Transactional task persistence.
///
/// Every call is bounded by a per-call timeout of a few seconds;
/// a store that cannot answer in that budget returns
/// [`StoreError::Timeout`] and the caller retries.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new row, assigning `id` and the timestamps.
    async fn save(&self, task: &mut InferenceTask) -> StoreResult<()>;

    async fn get(&self, id: i64) -> StoreResult<InferenceTask>;

    /// Rows not yet in a terminal status with `id > after_id`,
    /// ascending by `id`, at most `limit` of them.
    async fn find_active(&self, after_id: i64, limit: usize) -> StoreResult<Vec<InferenceTask>>;

    /// Apply `patch` to the row (unset fields untouched), then
    /// re-read the row into `task`.
    async fn update_fields(&self, task: &mut InferenceTask, patch: TaskPatch) -> StoreResult<()>;

    /// The `Pending → Created` write: apply `patch` to the row and
    /// insert `replicas` in the same transaction, then re-read the
    /// row into `task`.
    async fn update_with_replicas(
        &self,
        task: &mut InferenceTask,
        patch: TaskPatch,
        replicas: Vec<InferenceTask>,
    ) -> StoreResult<()>;

    /// All replicas sharing `task_id`, ascending by `id`.
    async fn get_group(&self, task_id: B256) -> StoreResult<Vec<InferenceTask>>;

    /// All children of a client task, ascending by `id`.
    async fn find_by_client_task(&self, client_task_id: i64) -> StoreResult<Vec<InferenceTask>>;

    async fn get_or_create_client(&self, external_id: &str) -> StoreResult<Client>;

    async fn save_client_task(&self, client_task: &mut ClientTask) -> StoreResult<()>;

    async fn get_client_task(&self, id: i64) -> StoreResult<ClientTask>;

    async fn update_client_task(
        &self,
        id: i64,
        status: ClientTaskStatus,
        failed_count: i64,
    ) -> StoreResult<()>;

    async fn find_running_client_tasks(&self) -> StoreResult<Vec<ClientTask>>;
}
