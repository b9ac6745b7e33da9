//! In-memory store backend.
//!
//! Both tables live behind one mutex, which makes the
//! patch-plus-insert write of `update_with_replicas` atomic by
//! construction. Suited to tests and single-process deployments; a
//! SQL backend can implement [`TaskStore`] without the driver
//! noticing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use axon_lib::{Client, ClientTask, ClientTaskStatus, InferenceTask, TaskPatch};
use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};

use crate::{StoreError, StoreResult, TaskStore};

const LOCK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
struct DbInner {
    tasks: BTreeMap<i64, InferenceTask>,
    clients: Vec<Client>,
    client_tasks: BTreeMap<i64, ClientTask>,
    next_task_id: i64,
    next_client_id: i64,
    next_client_task_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskDb {
    inner: Arc<Mutex<DbInner>>,
}

impl InMemoryTaskDb {
    pub fn new() -> InMemoryTaskDb {
        InMemoryTaskDb::default()
    }

    async fn lock(&self) -> StoreResult<MutexGuard<'_, DbInner>> {
        tokio::time::timeout(LOCK_TIMEOUT, self.inner.lock())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl DbInner {
    fn insert_task(&mut self, task: &mut InferenceTask) {
        self.next_task_id += 1;
        task.id = self.next_task_id;
        task.created_at = Utc::now();
        task.updated_at = task.created_at;
        self.tasks.insert(task.id, task.clone());
    }

    fn patch_task(&mut self, id: i64, patch: &TaskPatch) -> StoreResult<InferenceTask> {
        let row = self
            .tasks
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "inference task", id })?;
        patch.apply(row);
        Ok(row.clone())
    }
}

#[async_trait::async_trait]
impl TaskStore for InMemoryTaskDb {
    async fn save(&self, task: &mut InferenceTask) -> StoreResult<()> {
        let mut db = self.lock().await?;
        db.insert_task(task);
        tracing::debug!("TaskDb.save: inserted task #{}", task.id);
        Ok(())
    }

    async fn get(&self, id: i64) -> StoreResult<InferenceTask> {
        let db = self.lock().await?;
        db.tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "inference task", id })
    }

    async fn find_active(&self, after_id: i64, limit: usize) -> StoreResult<Vec<InferenceTask>> {
        let db = self.lock().await?;
        Ok(db
            .tasks
            .range(after_id + 1..)
            .map(|(_, task)| task)
            .filter(|task| !task.status.is_terminal())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_fields(&self, task: &mut InferenceTask, patch: TaskPatch) -> StoreResult<()> {
        let mut db = self.lock().await?;
        *task = db.patch_task(task.id, &patch)?;
        Ok(())
    }

    async fn update_with_replicas(
        &self,
        task: &mut InferenceTask,
        patch: TaskPatch,
        replicas: Vec<InferenceTask>,
    ) -> StoreResult<()> {
        let mut db = self.lock().await?;
        *task = db.patch_task(task.id, &patch)?;
        for mut replica in replicas {
            db.insert_task(&mut replica);
            tracing::debug!(
                "TaskDb.update_with_replicas: spawned replica #{} of {}",
                replica.id,
                replica.task_id
            );
        }
        Ok(())
    }

    async fn get_group(&self, task_id: B256) -> StoreResult<Vec<InferenceTask>> {
        let db = self.lock().await?;
        Ok(db
            .tasks
            .values()
            .filter(|task| task.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn find_by_client_task(&self, client_task_id: i64) -> StoreResult<Vec<InferenceTask>> {
        let db = self.lock().await?;
        Ok(db
            .tasks
            .values()
            .filter(|task| task.client_task_id == client_task_id)
            .cloned()
            .collect())
    }

    async fn get_or_create_client(&self, external_id: &str) -> StoreResult<Client> {
        let mut db = self.lock().await?;
        if let Some(client) = db.clients.iter().find(|c| c.client_id == external_id) {
            return Ok(client.clone());
        }
        db.next_client_id += 1;
        let client = Client {
            id: db.next_client_id,
            created_at: Utc::now(),
            client_id: external_id.to_owned(),
        };
        db.clients.push(client.clone());
        Ok(client)
    }

    async fn save_client_task(&self, client_task: &mut ClientTask) -> StoreResult<()> {
        let mut db = self.lock().await?;
        db.next_client_task_id += 1;
        client_task.id = db.next_client_task_id;
        client_task.created_at = Utc::now();
        client_task.status = ClientTaskStatus::Running;
        db.client_tasks.insert(client_task.id, client_task.clone());
        Ok(())
    }

    async fn get_client_task(&self, id: i64) -> StoreResult<ClientTask> {
        let db = self.lock().await?;
        db.client_tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "client task", id })
    }

    async fn update_client_task(
        &self,
        id: i64,
        status: ClientTaskStatus,
        failed_count: i64,
    ) -> StoreResult<()> {
        let mut db = self.lock().await?;
        let row = db
            .client_tasks
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "client task", id })?;
        row.status = status;
        row.failed_count = failed_count;
        Ok(())
    }

    async fn find_running_client_tasks(&self) -> StoreResult<Vec<ClientTask>> {
        let db = self.lock().await?;
        Ok(db
            .client_tasks
            .values()
            .filter(|ct| ct.status == ClientTaskStatus::Running)
            .cloned()
            .collect())
    }
}
