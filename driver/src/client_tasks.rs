//! Folds finished inference tasks into their client task.

use std::sync::Arc;
use std::time::Duration;

use axon_lib::{ClientTaskStatus, TaskStatus};
use axon_taskdb::{StoreError, TaskStore};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Periodically settle client tasks whose children all finished.
pub async fn run_client_task_monitor(
    store: Arc<dyn TaskStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!("ClientTasks: monitor started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("ClientTasks: monitor stopped");
                return;
            }
            _ = sleep(interval) => {}
        }
        if let Err(error) = settle_finished_client_tasks(store.as_ref()).await {
            error!("ClientTasks: settle pass failed: {error}");
        }
    }
}

/// One settle pass: a client task succeeds when any child delivered a
/// result, fails when all children ended without one.
pub async fn settle_finished_client_tasks(store: &dyn TaskStore) -> Result<(), StoreError> {
    for client_task in store.find_running_client_tasks().await? {
        let children = store.find_by_client_task(client_task.id).await?;
        if children.is_empty() || !children.iter().all(|t| t.status.is_terminal()) {
            continue;
        }

        let failed = children
            .iter()
            .filter(|t| t.status != TaskStatus::ResultDownloaded)
            .count() as i64;
        let status = if failed < children.len() as i64 {
            ClientTaskStatus::Success
        } else {
            ClientTaskStatus::Failed
        };
        store
            .update_client_task(client_task.id, status, failed)
            .await?;
        info!(
            "ClientTasks: client task {} finished as {:?}",
            client_task.id, status
        );
    }
    Ok(())
}
