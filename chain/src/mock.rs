//! Scriptable in-memory registry used by driver tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use alloy_primitives::{keccak256, TxHash, B256};
use async_trait::async_trait;
use axon_lib::{ChainTaskStatus, InferenceTask, TaskAbortReason, TaskError};

use crate::{ChainClient, ChainError, ChainTaskInfo, Receipt};

#[derive(Debug, Default)]
struct MockInner {
    tasks: HashMap<B256, ChainTaskInfo>,
    reads: HashMap<B256, u64>,
    created: Vec<B256>,
    single_validations: Vec<B256>,
    group_validations: Vec<[B256; 3]>,
    queued_create_reverts: VecDeque<String>,
    reverted: HashMap<TxHash, String>,
    sampling_seed: B256,
    auto_score_ready: bool,
    next_tx: u64,
    next_sequence: u64,
}

impl MockInner {
    fn next_tx_hash(&mut self) -> TxHash {
        self.next_tx += 1;
        keccak256(self.next_tx.to_be_bytes())
    }
}

/// In-memory [`ChainClient`] with scriptable task records.
///
/// `validate_single_task` and `validate_task_group` move the touched
/// records to their validated status, so a driver under test can run
/// through the whole lifecycle. With `auto_score_ready` every record
/// flips from `Started` to `ScoreReady` on its second read, which
/// covers the happy paths without any choreography.
#[derive(Debug, Clone, Default)]
pub struct MockChainClient {
    inner: Arc<Mutex<MockInner>>,
}

impl MockChainClient {
    pub fn new() -> MockChainClient {
        MockChainClient::default()
    }

    /// Seed handed out to every task created on this mock.
    pub fn with_sampling_seed(self, seed: B256) -> MockChainClient {
        self.inner.lock().unwrap().sampling_seed = seed;
        self
    }

    pub fn with_auto_score_ready(self) -> MockChainClient {
        self.inner.lock().unwrap().auto_score_ready = true;
        self
    }

    /// Make the next `create_task` produce a reverting transaction
    /// with the given reason.
    pub fn queue_create_revert(&self, reason: &str) {
        self.inner
            .lock()
            .unwrap()
            .queued_create_reverts
            .push_back(reason.to_owned());
    }

    pub fn set_status(&self, commitment: B256, status: ChainTaskStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(info) = inner.tasks.get_mut(&commitment) {
            info.status = status;
        }
    }

    pub fn abort(&self, commitment: B256, reason: TaskAbortReason) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(info) = inner.tasks.get_mut(&commitment) {
            info.status = ChainTaskStatus::EndAborted;
            info.abort_reason = reason;
        }
    }

    pub fn created(&self) -> Vec<B256> {
        self.inner.lock().unwrap().created.clone()
    }

    pub fn single_validations(&self) -> Vec<B256> {
        self.inner.lock().unwrap().single_validations.clone()
    }

    pub fn group_validations(&self) -> Vec<[B256; 3]> {
        self.inner.lock().unwrap().group_validations.clone()
    }
}

fn commitment_of(task: &InferenceTask) -> Result<B256, ChainError> {
    task.task_id_commitment
        .ok_or(ChainError::MissingCommitment(task.id))
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn create_task(&self, task: &InferenceTask) -> Result<TxHash, ChainError> {
        let commitment = commitment_of(task)?;
        let mut inner = self.inner.lock().unwrap();
        let tx_hash = inner.next_tx_hash();
        if let Some(reason) = inner.queued_create_reverts.pop_front() {
            inner.reverted.insert(tx_hash, reason);
            return Ok(tx_hash);
        }
        inner.next_sequence += 1;
        let info = ChainTaskInfo {
            status: ChainTaskStatus::Started,
            abort_reason: TaskAbortReason::None,
            task_error: TaskError::None,
            sampling_seed: inner.sampling_seed,
            sequence: inner.next_sequence,
        };
        inner.tasks.insert(commitment, info);
        inner.created.push(commitment);
        Ok(tx_hash)
    }

    async fn validate_single_task(&self, task: &InferenceTask) -> Result<TxHash, ChainError> {
        let commitment = commitment_of(task)?;
        let mut inner = self.inner.lock().unwrap();
        let tx_hash = inner.next_tx_hash();
        inner.single_validations.push(commitment);
        if let Some(info) = inner.tasks.get_mut(&commitment) {
            info.status = ChainTaskStatus::Validated;
        }
        Ok(tx_hash)
    }

    async fn validate_task_group(
        &self,
        task1: &InferenceTask,
        task2: &InferenceTask,
        task3: &InferenceTask,
    ) -> Result<TxHash, ChainError> {
        let commitments = [
            commitment_of(task1)?,
            commitment_of(task2)?,
            commitment_of(task3)?,
        ];
        let mut inner = self.inner.lock().unwrap();
        let tx_hash = inner.next_tx_hash();
        inner.group_validations.push(commitments);
        for commitment in commitments {
            if let Some(info) = inner.tasks.get_mut(&commitment) {
                if info.status != ChainTaskStatus::EndAborted {
                    info.status = ChainTaskStatus::GroupValidated;
                }
            }
        }
        Ok(tx_hash)
    }

    async fn wait_receipt(&self, tx_hash: TxHash) -> Result<Receipt, ChainError> {
        let inner = self.inner.lock().unwrap();
        Ok(Receipt {
            tx_hash,
            status: !inner.reverted.contains_key(&tx_hash),
            block_number: Some(1),
        })
    }

    async fn revert_reason(&self, receipt: &Receipt) -> Result<String, ChainError> {
        let inner = self.inner.lock().unwrap();
        inner
            .reverted
            .get(&receipt.tx_hash)
            .cloned()
            .ok_or_else(|| ChainError::Transport("no revert recorded".to_owned()))
    }

    async fn get_task(&self, task_id_commitment: B256) -> Result<ChainTaskInfo, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        let reads = inner.reads.entry(task_id_commitment).or_insert(0);
        *reads += 1;
        let second_read = *reads >= 2;
        let auto = inner.auto_score_ready;
        let info = inner
            .tasks
            .get_mut(&task_id_commitment)
            .ok_or_else(|| ChainError::Transport("unknown task".to_owned()))?;
        if auto && second_read && info.status == ChainTaskStatus::Started {
            info.status = ChainTaskStatus::ScoreReady;
        }
        Ok(*info)
    }
}
