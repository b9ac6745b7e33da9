//! Access to the on-chain task registry.
//!
//! The driver only sees the [`ChainClient`] trait; the JSON-RPC
//! implementation lives in [`client`] and a scriptable in-memory mock
//! in [`mock`].

use alloy_primitives::{TxHash, B256};
use async_trait::async_trait;
use axon_lib::{ChainTaskStatus, InferenceTask, TaskAbortReason, TaskError};

pub mod client;
pub mod contract;
pub mod mock;

pub use client::RegistryClient;
pub use mock::MockChainClient;

/// Receipt summary of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// `false` means the transaction reverted.
    pub status: bool,
    pub block_number: Option<u64>,
}

/// Registry-side view of one task replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTaskInfo {
    pub status: ChainTaskStatus,
    pub abort_reason: TaskAbortReason,
    pub task_error: TaskError,
    pub sampling_seed: B256,
    pub sequence: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    #[error("chain transport error: {0}")]
    Transport(String),

    #[error("chain call {0} timed out")]
    Timeout(&'static str),

    #[error("no receipt for {0} within the wait budget")]
    ReceiptTimeout(TxHash),

    #[error("transaction {tx_hash} reverted: {reason}")]
    Reverted { tx_hash: TxHash, reason: String },

    #[error("task #{0} has no commitment yet")]
    MissingCommitment(i64),

    #[error("registry returned a malformed {0}")]
    Malformed(&'static str),
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Register the replica under its commitment. 5 s submit budget.
    async fn create_task(&self, task: &InferenceTask) -> Result<TxHash, ChainError>;

    /// Close a 1-replica task positive.
    async fn validate_single_task(&self, task: &InferenceTask) -> Result<TxHash, ChainError>;

    /// Close a 3-replica group. The three commitments must share a
    /// `task_id`.
    async fn validate_task_group(
        &self,
        task1: &InferenceTask,
        task2: &InferenceTask,
        task3: &InferenceTask,
    ) -> Result<TxHash, ChainError>;

    /// Poll for the receipt of `tx_hash`, up to 120 s.
    async fn wait_receipt(&self, tx_hash: TxHash) -> Result<Receipt, ChainError>;

    /// Decode the revert reason of a failed receipt.
    async fn revert_reason(&self, receipt: &Receipt) -> Result<String, ChainError>;

    /// Read the registry record for `task_id_commitment`. 5 s budget.
    async fn get_task(&self, task_id_commitment: B256) -> Result<ChainTaskInfo, ChainError>;
}

/// Wait for `tx_hash` to be mined and turn a reverted receipt into
/// [`ChainError::Reverted`] carrying the decoded reason.
pub async fn confirm(client: &dyn ChainClient, tx_hash: TxHash) -> Result<Receipt, ChainError> {
    let receipt = client.wait_receipt(tx_hash).await?;
    if !receipt.status {
        let reason = client.revert_reason(&receipt).await?;
        return Err(ChainError::Reverted { tx_hash, reason });
    }
    Ok(receipt)
}
