use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Bytes, B256};
use alloy_signer_local::PrivateKeySigner;
use axon_chain::{confirm, ChainClient, ChainError, ChainTaskInfo};
use axon_lib::vrf::VrfError;
use axon_lib::{task_id_commitment, vrf, InferenceTask, TaskPatch, TaskStatus};
use axon_relay::{RelayClient, RelayError};
use axon_taskdb::{StoreError, TaskStore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::sink::ResultSink;

/// Timing knobs of the driver and dispatcher. Defaults are the
/// production values; tests compress them.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Tick of the chain-status wait loops.
    pub poll_interval: Duration,
    /// Tick of the all-group-members-settled wait loop.
    pub group_poll_interval: Duration,
    /// Worker budget per task, measured from `created_at`.
    pub task_deadline: Duration,
    /// Budget per artifact download.
    pub download_timeout: Duration,
    /// Backoff between failed `process_one_task` attempts.
    pub retry_interval: Duration,
    /// Tick of the dispatcher scan.
    pub dispatch_interval: Duration,
    /// Page size of the dispatcher scan.
    pub dispatch_limit: usize,
}

impl Default for DriverConfig {
    fn default() -> DriverConfig {
        DriverConfig {
            poll_interval: Duration::from_secs(1),
            group_poll_interval: Duration::from_millis(100),
            task_deadline: Duration::from_secs(600),
            download_timeout: Duration::from_secs(60),
            retry_interval: Duration::from_secs(1),
            dispatch_interval: Duration::from_secs(1),
            dispatch_limit: 100,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("vrf proving failed: {0}")]
    Vrf(#[from] VrfError),

    #[error("task group {task_id} has {size} members")]
    MalformedGroup { task_id: B256, size: usize },

    #[error("result download failed: {0}")]
    Download(String),

    #[error("writing result artifact failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs a single inference task through its lifecycle, mirroring the
/// authoritative state on chain into the store.
pub struct TaskDriver {
    store: Arc<dyn TaskStore>,
    chain: Arc<dyn ChainClient>,
    relay: Arc<dyn RelayClient>,
    signer: PrivateKeySigner,
    sink: ResultSink,
    config: DriverConfig,
}

impl TaskDriver {
    pub fn new(
        store: Arc<dyn TaskStore>,
        chain: Arc<dyn ChainClient>,
        relay: Arc<dyn RelayClient>,
        signer: PrivateKeySigner,
        sink: ResultSink,
        config: DriverConfig,
    ) -> TaskDriver {
        TaskDriver {
            store,
            chain,
            relay,
            signer,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Pull the registry record for `task` and mirror its status and
    /// diagnostics into the store.
    ///
    /// The chain never learns about `ResultDownloaded`, so that local
    /// terminal status is left alone.
    async fn sync_task(&self, task: &mut InferenceTask) -> Result<ChainTaskInfo, DriverError> {
        let commitment = task
            .task_id_commitment
            .ok_or(ChainError::MissingCommitment(task.id))?;
        let info = self.chain.get_task(commitment).await?;

        let mut patch = TaskPatch::default();
        if info.abort_reason != task.abort_reason {
            patch.abort_reason = Some(info.abort_reason);
        }
        if info.task_error != task.task_error {
            patch.task_error = Some(info.task_error);
        }
        let mapped = TaskStatus::from(info.status);
        if mapped != task.status && task.status != TaskStatus::ResultDownloaded {
            patch.status = Some(mapped);
        }
        if !patch.is_empty() {
            self.store.update_fields(task, patch).await?;
        }
        Ok(info)
    }

    /// The `Pending → Created` transition: commit the replica under a
    /// fresh commitment, read back the chain-assigned sequence and
    /// sampling seed, run the VRF, and persist everything atomically
    /// with any replicas the VRF spawned.
    async fn create_task_on_chain(&self, task: &mut InferenceTask) -> Result<(), DriverError> {
        let nonce = B256::random();
        let commitment = task_id_commitment(&task.task_id, &nonce);
        task.nonce = Some(nonce);
        task.task_id_commitment = Some(commitment);

        let tx_hash = self.chain.create_task(task).await?;
        confirm(self.chain.as_ref(), tx_hash).await?;

        let info = self.chain.get_task(commitment).await?;

        let mut patch = TaskPatch {
            status: Some(TaskStatus::Created),
            nonce: Some(nonce),
            task_id_commitment: Some(commitment),
            sequence: Some(info.sequence),
            ..Default::default()
        };

        let mut replicas = Vec::new();
        // Replicas carry a sampling seed already; only original rows
        // draw the VRF, so replicas never spawn replicas themselves.
        if !task.is_replica() {
            let mut secret = [0u8; 32];
            secret.copy_from_slice(self.signer.credential().to_bytes().as_slice());
            let (output, proof) = vrf::prove(&secret, info.sampling_seed.as_slice())?;

            let proof = Bytes::from(proof);
            let number = Bytes::copy_from_slice(&output);
            patch.sampling_seed = Some(info.sampling_seed);
            patch.vrf_proof = Some(proof.clone());
            patch.vrf_number = Some(number.clone());
            task.vrf_proof = proof;
            task.vrf_number = number;

            if vrf::output_mod(&output, 10) == 0 {
                replicas.push(task.spawn_replica(info.sampling_seed));
                replicas.push(task.spawn_replica(info.sampling_seed));
            }
        }

        let spawned = replicas.len();
        self.store.update_with_replicas(task, patch, replicas).await?;
        info!("ProcessTasks: created task {} on chain", task.log_key());
        if spawned > 0 {
            info!(
                "ProcessTasks: spawned {spawned} validation replicas of group {}",
                task.task_id
            );
        }
        Ok(())
    }

    /// Advance `task` as far as it can go in one pass. Transient
    /// failures bubble up and the caller retries the whole pass;
    /// every step re-checks the persisted status, so completed
    /// transitions are not repeated.
    pub async fn process_one_task(&self, task: &mut InferenceTask) -> Result<(), DriverError> {
        if task.status != TaskStatus::Pending {
            self.sync_task(task).await?;
        }

        if task.status == TaskStatus::Pending {
            self.create_task_on_chain(task).await?;
        }

        // `Started` happens when a retry re-synced before the params
        // made it to the relay; the upload is still owed.
        if matches!(task.status, TaskStatus::Created | TaskStatus::Started) {
            self.relay.upload_task_params(task).await?;
            self.store
                .update_fields(task, TaskPatch::with_status(TaskStatus::ParamsUploaded))
                .await?;
            info!("ProcessTasks: uploaded params of task {}", task.log_key());
        }

        if matches!(task.status, TaskStatus::ParamsUploaded) {
            loop {
                self.sync_task(task).await?;
                if matches!(
                    task.status,
                    TaskStatus::ScoreReady | TaskStatus::ErrorReported | TaskStatus::EndAborted
                ) {
                    break;
                }
                sleep(self.config.poll_interval).await;
            }
            info!(
                "ProcessTasks: task {} reached {:?}",
                task.log_key(),
                task.status
            );
        }

        if task.status == TaskStatus::EndAborted {
            error!(
                "ProcessTasks: task {} aborted: {:?}",
                task.log_key(),
                task.abort_reason
            );
            return Ok(());
        }

        if matches!(
            task.status,
            TaskStatus::ScoreReady | TaskStatus::ErrorReported
        ) {
            self.coordinate_group(task).await?;

            loop {
                self.sync_task(task).await?;
                if matches!(
                    task.status,
                    TaskStatus::Validated
                        | TaskStatus::EndSuccess
                        | TaskStatus::EndGroupRefund
                        | TaskStatus::EndInvalidated
                        | TaskStatus::EndAborted
                ) {
                    break;
                }
                sleep(self.config.poll_interval).await;
            }
            info!(
                "ProcessTasks: task {} reached {:?}",
                task.log_key(),
                task.status
            );
        }

        if matches!(task.status, TaskStatus::Validated | TaskStatus::EndSuccess) {
            self.download_results(task).await?;
        }

        Ok(())
    }

    /// Group coordination after the worker fleet reported.
    ///
    /// A 1-replica group validates itself. In a 3-replica group every
    /// driver waits until all members settled, then the first
    /// non-aborted member in id order is elected and only its driver
    /// sends the group validation; when all three aborted nobody
    /// validates and the wait loops converge through `sync_task`.
    async fn coordinate_group(&self, task: &mut InferenceTask) -> Result<(), DriverError> {
        let settled = |t: &InferenceTask| {
            matches!(
                t.status,
                TaskStatus::ScoreReady | TaskStatus::ErrorReported | TaskStatus::EndAborted
            )
        };

        let mut group = self.store.get_group(task.task_id).await?;
        let validator = match group.len() {
            1 => task.task_id_commitment,
            3 => {
                while !group.iter().all(settled) {
                    sleep(self.config.group_poll_interval).await;
                    group = self.store.get_group(task.task_id).await?;
                }
                group
                    .iter()
                    .find(|t| t.status != TaskStatus::EndAborted)
                    .and_then(|t| t.task_id_commitment)
            }
            size => {
                return Err(DriverError::MalformedGroup {
                    task_id: task.task_id,
                    size,
                })
            }
        };

        if validator.is_some() && validator == task.task_id_commitment {
            if group.len() == 1 {
                let tx_hash = self.chain.validate_single_task(task).await?;
                confirm(self.chain.as_ref(), tx_hash).await?;
                info!("ProcessTasks: validated single task {}", task.log_key());
            } else {
                let tx_hash = self
                    .chain
                    .validate_task_group(&group[0], &group[1], &group[2])
                    .await?;
                confirm(self.chain.as_ref(), tx_hash).await?;
                info!("ProcessTasks: validated task group {}", task.task_id);
            }
        }
        Ok(())
    }

    /// Fetch all `task_size` artifacts in parallel into the result
    /// directory. Any failure fails the transition; files written by
    /// a previous attempt are simply overwritten.
    async fn download_results(&self, task: &mut InferenceTask) -> Result<(), DriverError> {
        let commitment = task
            .task_id_commitment
            .ok_or(ChainError::MissingCommitment(task.id))?;
        let dir = self.sink.ensure_task_dir(&commitment).await?;
        let ext = task.task_type.artifact_ext();

        let mut downloads = JoinSet::new();
        for index in 0..task.task_size {
            let relay = Arc::clone(&self.relay);
            let task_copy = task.clone();
            let path = dir.join(format!("{index}.{ext}"));
            let budget = self.config.download_timeout;
            downloads.spawn(async move {
                let run = async {
                    let mut file = tokio::fs::File::create(&path).await?;
                    relay.download_result(&task_copy, index, &mut file).await?;
                    Ok::<(), DriverError>(())
                };
                match tokio::time::timeout(budget, run).await {
                    Ok(result) => result,
                    Err(_) => Err(DriverError::Download(format!("artifact {index} timed out"))),
                }
            });
        }

        while let Some(joined) = downloads.join_next().await {
            joined.map_err(|e| DriverError::Download(e.to_string()))??;
        }

        self.store
            .update_fields(task, TaskPatch::with_status(TaskStatus::ResultDownloaded))
            .await?;
        info!("ProcessTasks: downloaded results of task {}", task.log_key());
        Ok(())
    }

    /// Run `process_one_task` until it returns clean, backing off
    /// between failed attempts. Deadline enforcement is the
    /// dispatcher's job.
    pub async fn process_with_retries(&self, task: &mut InferenceTask, cancel: &CancellationToken) {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.process_one_task(task) => result,
            };
            match result {
                Ok(()) => {
                    info!("ProcessTasks: processed task {}", task.log_key());
                    return;
                }
                Err(error) => {
                    error!(
                        "ProcessTasks: processing task {} failed: {error}, retrying",
                        task.log_key()
                    );
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.config.retry_interval) => {}
            }
        }
    }
}
