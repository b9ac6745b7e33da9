use alloy_primitives::{keccak256, Bytes, B256};
use chrono::{DateTime, Utc};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::impl_display_using_json;

/// Kind of inference a task performs. Decides how the relay dispatches
/// it and which extension its result artifacts carry.
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema, IntoPrimitive,
    TryFromPrimitive,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskType {
    #[default]
    ImageGen = 0,
    Llm = 1,
}

impl TaskType {
    pub fn artifact_ext(&self) -> &'static str {
        match self {
            TaskType::ImageGen => "png",
            TaskType::Llm => "json",
        }
    }
}

/// Local lifecycle status of an inference task.
///
/// `Pending` and `Created` only exist locally; everything from
/// `Started` on mirrors the registry contract (see
/// [`ChainTaskStatus`]). Once a terminal status is reached the row is
/// frozen, except for the legal `Validated`/`EndSuccess` →
/// `ResultDownloaded` step.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Created,
    Started,
    ParamsUploaded,
    ScoreReady,
    ErrorReported,
    Validated,
    EndInvalidated,
    EndSuccess,
    EndAborted,
    EndGroupRefund,
    ResultDownloaded,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::EndInvalidated
                | TaskStatus::EndAborted
                | TaskStatus::EndGroupRefund
                | TaskStatus::ResultDownloaded
        )
    }
}

/// Task status as reported by the registry contract.
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ChainTaskStatus {
    Started = 0,
    ParametersUploaded = 1,
    ScoreReady = 2,
    ErrorReported = 3,
    Validated = 4,
    GroupValidated = 5,
    EndInvalidated = 6,
    EndSuccess = 7,
    EndAborted = 8,
    EndGroupRefund = 9,
    EndGroupSuccess = 10,
}

impl From<ChainTaskStatus> for TaskStatus {
    /// Fold a chain status into the local status space. Total: both
    /// validated variants collapse to `Validated`, both success
    /// variants to `EndSuccess`, everything else maps one-to-one.
    fn from(status: ChainTaskStatus) -> TaskStatus {
        match status {
            ChainTaskStatus::Started => TaskStatus::Started,
            ChainTaskStatus::ParametersUploaded => TaskStatus::ParamsUploaded,
            ChainTaskStatus::ScoreReady => TaskStatus::ScoreReady,
            ChainTaskStatus::ErrorReported => TaskStatus::ErrorReported,
            ChainTaskStatus::Validated | ChainTaskStatus::GroupValidated => TaskStatus::Validated,
            ChainTaskStatus::EndInvalidated => TaskStatus::EndInvalidated,
            ChainTaskStatus::EndSuccess | ChainTaskStatus::EndGroupSuccess => {
                TaskStatus::EndSuccess
            }
            ChainTaskStatus::EndAborted => TaskStatus::EndAborted,
            ChainTaskStatus::EndGroupRefund => TaskStatus::EndGroupRefund,
        }
    }
}

/// Why the registry aborted a task. `None` means not aborted.
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema, IntoPrimitive,
    TryFromPrimitive,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskAbortReason {
    #[default]
    None = 0,
    Timeout = 1,
    ModelDownloadFailed = 2,
    IncorrectResult = 3,
    TaskFeeTooLow = 4,
}

/// Error reported by a worker node through the registry.
#[derive(
    PartialEq, Eq, Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema, IntoPrimitive,
    TryFromPrimitive,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskError {
    #[default]
    None = 0,
    ParametersValidationFailed = 1,
}

/// The per-replica handle a task is registered under on chain:
/// `keccak256(task_id ‖ nonce)`.
pub fn task_id_commitment(task_id: &B256, nonce: &B256) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(task_id.as_slice());
    buf[32..].copy_from_slice(nonce.as_slice());
    keccak256(buf)
}

/// One inference task replica.
///
/// Rows sharing a `task_id` form a validation group of size 1 or 3.
/// A `Some` `sampling_seed` marks a replica spawned by VRF selection;
/// replicas never spawn further replicas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceTask {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub client_id: i64,
    pub client_task_id: i64,

    pub task_id: B256,
    pub task_id_commitment: Option<B256>,
    pub nonce: Option<B256>,
    pub sampling_seed: Option<B256>,

    pub task_args: String,
    pub task_type: TaskType,
    pub task_model_ids: Vec<String>,
    pub task_version: String,
    /// Task fee in gwei; converted to wei for the chain call.
    pub task_fee: u64,
    pub min_vram: u64,
    pub required_gpu: String,
    pub required_gpu_vram: u64,
    pub task_size: u64,

    pub vrf_proof: Bytes,
    pub vrf_number: Bytes,
    pub sequence: u64,

    pub status: TaskStatus,
    pub abort_reason: TaskAbortReason,
    pub task_error: TaskError,
}

impl InferenceTask {
    /// Whether this row was spawned by VRF selection.
    pub fn is_replica(&self) -> bool {
        self.sampling_seed.is_some()
    }

    /// Clone this task into a fresh validation replica sharing the
    /// group key and VRF material. The replica gets its own nonce and
    /// commitment when it is created on chain.
    pub fn spawn_replica(&self, sampling_seed: B256) -> InferenceTask {
        InferenceTask {
            id: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            client_id: self.client_id,
            client_task_id: self.client_task_id,
            task_id: self.task_id,
            task_id_commitment: None,
            nonce: None,
            sampling_seed: Some(sampling_seed),
            task_args: self.task_args.clone(),
            task_type: self.task_type,
            task_model_ids: self.task_model_ids.clone(),
            task_version: self.task_version.clone(),
            task_fee: self.task_fee,
            min_vram: self.min_vram,
            required_gpu: self.required_gpu.clone(),
            required_gpu_vram: self.required_gpu_vram,
            task_size: self.task_size,
            vrf_proof: self.vrf_proof.clone(),
            vrf_number: self.vrf_number.clone(),
            sequence: 0,
            status: TaskStatus::Pending,
            abort_reason: TaskAbortReason::None,
            task_error: TaskError::None,
        }
    }

    /// Log context for this row: the commitment once it exists, the
    /// local id before that.
    pub fn log_key(&self) -> String {
        match &self.task_id_commitment {
            Some(commitment) => commitment.to_string(),
            None => format!("#{}", self.id),
        }
    }
}

impl_display_using_json!(InferenceTask);

/// Partial update of an [`InferenceTask`] row. `None` fields are left
/// untouched, which lets a caller set the status without clobbering
/// the nonce or commitment written by an earlier transition.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub nonce: Option<B256>,
    pub task_id_commitment: Option<B256>,
    pub sampling_seed: Option<B256>,
    pub vrf_proof: Option<Bytes>,
    pub vrf_number: Option<Bytes>,
    pub sequence: Option<u64>,
    pub abort_reason: Option<TaskAbortReason>,
    pub task_error: Option<TaskError>,
}

impl TaskPatch {
    pub fn with_status(status: TaskStatus) -> TaskPatch {
        TaskPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.nonce.is_none()
            && self.task_id_commitment.is_none()
            && self.sampling_seed.is_none()
            && self.vrf_proof.is_none()
            && self.vrf_number.is_none()
            && self.sequence.is_none()
            && self.abort_reason.is_none()
            && self.task_error.is_none()
    }

    /// Merge the set fields into `task` and bump `updated_at`.
    pub fn apply(&self, task: &mut InferenceTask) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(nonce) = self.nonce {
            task.nonce = Some(nonce);
        }
        if let Some(commitment) = self.task_id_commitment {
            task.task_id_commitment = Some(commitment);
        }
        if let Some(seed) = self.sampling_seed {
            task.sampling_seed = Some(seed);
        }
        if let Some(proof) = &self.vrf_proof {
            task.vrf_proof = proof.clone();
        }
        if let Some(number) = &self.vrf_number {
            task.vrf_number = number.clone();
        }
        if let Some(sequence) = self.sequence {
            task.sequence = sequence;
        }
        if let Some(reason) = self.abort_reason {
            task.abort_reason = reason;
        }
        if let Some(error) = self.task_error {
            task.task_error = error;
        }
        task.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn commitment_is_keccak_of_task_id_and_nonce() {
        let task_id = B256::repeat_byte(0xaa);
        let nonce = B256::repeat_byte(0x01);

        let commitment = task_id_commitment(&task_id, &nonce);

        let mut concat = Vec::new();
        concat.extend_from_slice(task_id.as_slice());
        concat.extend_from_slice(nonce.as_slice());
        assert_eq!(commitment, keccak256(&concat));

        // distinct nonces give distinct commitments for the same group key
        let other = task_id_commitment(&task_id, &B256::repeat_byte(0x02));
        assert_ne!(commitment, other);
    }

    #[test]
    fn chain_status_mapping_is_total() {
        for raw in 0u8..=10 {
            let chain = ChainTaskStatus::try_from(raw).expect("status in range");
            // Must not panic and must be deterministic.
            let local = TaskStatus::from(chain);
            assert_eq!(local, TaskStatus::from(chain));
        }
        assert!(ChainTaskStatus::try_from(11u8).is_err());
    }

    #[test]
    fn validated_and_success_variants_fold() {
        assert_eq!(
            TaskStatus::from(ChainTaskStatus::Validated),
            TaskStatus::from(ChainTaskStatus::GroupValidated)
        );
        assert_eq!(
            TaskStatus::from(ChainTaskStatus::EndSuccess),
            TaskStatus::from(ChainTaskStatus::EndGroupSuccess)
        );
    }

    #[test]
    fn terminal_statuses() {
        let terminal = [
            TaskStatus::EndInvalidated,
            TaskStatus::EndAborted,
            TaskStatus::EndGroupRefund,
            TaskStatus::ResultDownloaded,
        ];
        for status in terminal {
            assert!(status.is_terminal());
        }
        for status in [
            TaskStatus::Pending,
            TaskStatus::Created,
            TaskStatus::ParamsUploaded,
            TaskStatus::ScoreReady,
            TaskStatus::Validated,
            TaskStatus::EndSuccess,
        ] {
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn patch_skips_unset_fields() {
        let mut task = InferenceTask {
            nonce: Some(B256::repeat_byte(0x11)),
            task_id_commitment: Some(B256::repeat_byte(0x22)),
            status: TaskStatus::Created,
            ..Default::default()
        };

        TaskPatch::with_status(TaskStatus::ParamsUploaded).apply(&mut task);

        assert_eq!(task.status, TaskStatus::ParamsUploaded);
        assert_eq!(task.nonce, Some(B256::repeat_byte(0x11)));
        assert_eq!(task.task_id_commitment, Some(B256::repeat_byte(0x22)));
    }

    #[test]
    fn replica_shares_group_key_but_not_commitment() {
        let seed = B256::repeat_byte(0x33);
        let parent = InferenceTask {
            id: 7,
            task_id: B256::repeat_byte(0xaa),
            task_id_commitment: Some(B256::repeat_byte(0xbb)),
            nonce: Some(B256::repeat_byte(0xcc)),
            vrf_proof: Bytes::from(vec![1, 2, 3]),
            vrf_number: Bytes::from(vec![4, 5, 6]),
            status: TaskStatus::Created,
            ..Default::default()
        };

        let replica = parent.spawn_replica(seed);

        assert_eq!(replica.task_id, parent.task_id);
        assert_eq!(replica.sampling_seed, Some(seed));
        assert_eq!(replica.vrf_proof, parent.vrf_proof);
        assert_eq!(replica.status, TaskStatus::Pending);
        assert!(replica.task_id_commitment.is_none());
        assert!(replica.nonce.is_none());
        assert!(replica.is_replica());
        assert!(!parent.is_replica());
    }
}
