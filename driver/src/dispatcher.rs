use std::sync::Arc;

use axon_lib::{InferenceTask, TaskPatch, TaskStatus};
use axon_taskdb::TaskStore;
use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::driver::{DriverConfig, TaskDriver};

enum WorkerOutcome {
    Done,
    Deadline,
    Cancelled,
}

/// Scans the store for active tasks and runs one worker per row.
///
/// `last_id` only ever advances, so a row is admitted exactly once
/// per process lifetime; its worker owns it until a terminal status,
/// the deadline, or shutdown. On an empty page `last_id` stays put so
/// freshly inserted rows are found on the next tick.
pub struct Dispatcher {
    driver: Arc<TaskDriver>,
    store: Arc<dyn TaskStore>,
    config: DriverConfig,
}

impl Dispatcher {
    pub fn new(driver: Arc<TaskDriver>, store: Arc<dyn TaskStore>) -> Dispatcher {
        let config = driver.config().clone();
        Dispatcher {
            driver,
            store,
            config,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!("ProcessTasks: dispatcher started");
        let mut last_id = 0i64;
        loop {
            match self
                .store
                .find_active(last_id, self.config.dispatch_limit)
                .await
            {
                Err(error) => {
                    error!("ProcessTasks: cannot list unprocessed tasks: {error}");
                }
                Ok(tasks) => {
                    if let Some(last) = tasks.last() {
                        last_id = last.id;
                    }
                    for task in tasks {
                        self.spawn_worker(task, cancel.clone());
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("ProcessTasks: dispatcher stopped");
                    return;
                }
                _ = sleep(self.config.dispatch_interval) => {}
            }
        }
    }

    fn spawn_worker(&self, mut task: InferenceTask, cancel: CancellationToken) {
        let driver = Arc::clone(&self.driver);
        let store = Arc::clone(&self.store);
        let deadline = self.config.task_deadline;

        tokio::spawn(async move {
            info!("ProcessTasks: start processing task {}", task.log_key());

            let elapsed = (Utc::now() - task.created_at).to_std().unwrap_or_default();
            let remaining = deadline.saturating_sub(elapsed);

            let outcome = {
                let work = driver.process_with_retries(&mut task, &cancel);
                tokio::pin!(work);
                tokio::select! {
                    _ = cancel.cancelled() => WorkerOutcome::Cancelled,
                    _ = sleep(remaining) => WorkerOutcome::Deadline,
                    _ = &mut work => WorkerOutcome::Done,
                }
            };

            if let WorkerOutcome::Deadline = outcome {
                // Force the row terminal so no future scan can pick
                // it up again.
                error!(
                    "ProcessTasks: task {} hit its deadline, aborting",
                    task.log_key()
                );
                if let Err(error) = store
                    .update_fields(&mut task, TaskPatch::with_status(TaskStatus::EndAborted))
                    .await
                {
                    error!(
                        "ProcessTasks: saving aborted task {} failed: {error}",
                        task.log_key()
                    );
                }
            }
        });
    }
}
