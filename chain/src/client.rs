//! JSON-RPC implementation of [`ChainClient`].

use std::time::Duration;

use alloy_consensus::Transaction as _;
use alloy_network::{Ethereum, EthereumWallet};
use alloy_primitives::{Address, Bytes, TxHash, TxKind, B256, U256};
use alloy_provider::{
    fillers::{FillProvider, JoinFill, RecommendedFillers, WalletFiller},
    Identity, Provider, ProviderBuilder, RootProvider,
};
use alloy_rpc_types::{BlockId, TransactionInput, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Revert, SolError};
use alloy_transport::TransportError;
use alloy_transport_http::Http;
use async_trait::async_trait;
use axon_lib::{ether::gwei_to_wei, ChainTaskStatus, InferenceTask, TaskAbortReason, TaskError};
use tokio::time::{sleep, timeout};
use url::Url;

use crate::contract::TaskRegistry::{self, TaskRegistryInstance};
use crate::{ChainClient, ChainError, ChainTaskInfo, Receipt};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

type Transport = Http<reqwest::Client>;
type RegistryProvider = FillProvider<
    JoinFill<
        JoinFill<Identity, <Ethereum as RecommendedFillers>::RecommendedFillers>,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider<Transport>,
    Transport,
    Ethereum,
>;

/// Talks to the task registry contract over HTTP JSON-RPC, signing
/// with the operator key.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    provider: RegistryProvider,
    registry: TaskRegistryInstance<Transport, RegistryProvider>,
    operator: Address,
    /// Uncompressed SEC1 public key of the operator, passed along
    /// with VRF proofs so the contract can check them.
    public_key: Bytes,
}

impl RegistryClient {
    pub fn new(rpc_url: Url, registry: Address, signer: PrivateKeySigner) -> RegistryClient {
        let operator = signer.address();
        let public_key = Bytes::copy_from_slice(
            signer
                .credential()
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes(),
        );
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(rpc_url);
        let registry = TaskRegistry::new(registry, provider.clone());
        RegistryClient {
            provider,
            registry,
            operator,
            public_key,
        }
    }

    /// Operator account balance, checked once at startup.
    pub async fn balance(&self) -> Result<U256, ChainError> {
        timeout(READ_TIMEOUT, async {
            self.provider.get_balance(self.operator).await
        })
        .await
        .map_err(|_| ChainError::Timeout("getBalance"))?
        .map_err(transport)
    }
}

fn transport(error: impl std::fmt::Display) -> ChainError {
    ChainError::Transport(error.to_string())
}

#[async_trait]
impl ChainClient for RegistryClient {
    async fn create_task(&self, task: &InferenceTask) -> Result<TxHash, ChainError> {
        let commitment = task
            .task_id_commitment
            .ok_or(ChainError::MissingCommitment(task.id))?;
        let fee = gwei_to_wei(task.task_fee);
        let call = self
            .registry
            .createTask(
                u8::from(task.task_type),
                commitment,
                fee,
                task.task_version.clone(),
                task.task_model_ids.clone(),
                U256::from(task.min_vram),
                task.required_gpu.clone(),
                U256::from(task.required_gpu_vram),
                U256::from(task.task_size),
            )
            .value(fee);
        let pending = timeout(SUBMIT_TIMEOUT, call.send())
            .await
            .map_err(|_| ChainError::Timeout("createTask"))?
            .map_err(transport)?;
        tracing::debug!("Registry.create_task: {commitment} tx {}", pending.tx_hash());
        Ok(*pending.tx_hash())
    }

    async fn validate_single_task(&self, task: &InferenceTask) -> Result<TxHash, ChainError> {
        let commitment = task
            .task_id_commitment
            .ok_or(ChainError::MissingCommitment(task.id))?;
        let call = self.registry.validateSingleTask(
            commitment,
            task.vrf_proof.clone(),
            self.public_key.clone(),
        );
        let pending = timeout(SUBMIT_TIMEOUT, call.send())
            .await
            .map_err(|_| ChainError::Timeout("validateSingleTask"))?
            .map_err(transport)?;
        Ok(*pending.tx_hash())
    }

    async fn validate_task_group(
        &self,
        task1: &InferenceTask,
        task2: &InferenceTask,
        task3: &InferenceTask,
    ) -> Result<TxHash, ChainError> {
        let commitments: Vec<B256> = [task1, task2, task3]
            .iter()
            .map(|t| {
                t.task_id_commitment
                    .ok_or(ChainError::MissingCommitment(t.id))
            })
            .collect::<Result<_, _>>()?;
        let call = self.registry.validateTaskGroup(
            commitments[0],
            commitments[1],
            commitments[2],
            task1.task_id,
            task1.vrf_proof.clone(),
            self.public_key.clone(),
        );
        let pending = timeout(SUBMIT_TIMEOUT, call.send())
            .await
            .map_err(|_| ChainError::Timeout("validateTaskGroup"))?
            .map_err(transport)?;
        Ok(*pending.tx_hash())
    }

    async fn wait_receipt(&self, tx_hash: TxHash) -> Result<Receipt, ChainError> {
        let deadline = tokio::time::Instant::now() + RECEIPT_TIMEOUT;
        loop {
            let found = timeout(READ_TIMEOUT, self.provider.get_transaction_receipt(tx_hash))
                .await
                .map_err(|_| ChainError::Timeout("getTransactionReceipt"))?
                .map_err(transport)?;
            if let Some(receipt) = found {
                return Ok(Receipt {
                    tx_hash,
                    status: receipt.status(),
                    block_number: receipt.block_number,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ChainError::ReceiptTimeout(tx_hash));
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn revert_reason(&self, receipt: &Receipt) -> Result<String, ChainError> {
        let tx = timeout(
            READ_TIMEOUT,
            self.provider.get_transaction_by_hash(receipt.tx_hash),
        )
        .await
        .map_err(|_| ChainError::Timeout("getTransactionByHash"))?
        .map_err(transport)?
        .ok_or_else(|| transport(format!("transaction {} not found", receipt.tx_hash)))?;

        // Re-execute the transaction at its block to recover the
        // revert data the receipt does not carry.
        let request = TransactionRequest {
            from: Some(tx.from),
            to: Some(TxKind::Call(tx.to().unwrap_or_default())),
            input: TransactionInput::new(tx.input().clone()),
            value: Some(tx.value()),
            ..Default::default()
        };
        let block = receipt
            .block_number
            .map(BlockId::number)
            .unwrap_or_else(BlockId::latest);
        let replay = timeout(READ_TIMEOUT, async {
            self.provider.call(&request).block(block).await
        })
        .await;
        match replay {
            Err(_) => Err(ChainError::Timeout("call")),
            Ok(Ok(_)) => Ok("transaction succeeded on replay".to_owned()),
            Ok(Err(error)) => Ok(decode_revert(error)),
        }
    }

    async fn get_task(&self, task_id_commitment: B256) -> Result<ChainTaskInfo, ChainError> {
        let result = timeout(READ_TIMEOUT, self.registry.getTask(task_id_commitment).call())
            .await
            .map_err(|_| ChainError::Timeout("getTask"))?
            .map_err(transport)?;
        let info = result.info;
        Ok(ChainTaskInfo {
            status: ChainTaskStatus::try_from(info.status)
                .map_err(|_| ChainError::Malformed("status"))?,
            abort_reason: TaskAbortReason::try_from(info.abortReason)
                .map_err(|_| ChainError::Malformed("abort reason"))?,
            task_error: TaskError::try_from(info.taskError)
                .map_err(|_| ChainError::Malformed("task error"))?,
            sampling_seed: info.samplingSeed,
            sequence: u64::try_from(info.sequence).map_err(|_| ChainError::Malformed("sequence"))?,
        })
    }
}

/// Pull an ABI-encoded `Error(string)` reason out of an `eth_call`
/// failure, falling back to the raw payload.
fn decode_revert(error: TransportError) -> String {
    if let Some(payload) = error.as_error_resp() {
        if let Some(data) = payload.data.as_ref() {
            if let Ok(hex_str) = serde_json::from_str::<String>(data.get()) {
                if let Ok(raw) = alloy_primitives::hex::decode(&hex_str) {
                    if let Ok(revert) = Revert::abi_decode(&raw, true) {
                        return revert.reason;
                    }
                    return alloy_primitives::hex::encode_prefixed(raw);
                }
            }
        }
        return payload.message.to_string();
    }
    error.to_string()
}
