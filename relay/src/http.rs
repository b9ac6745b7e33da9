//! HTTP implementation of [`RelayClient`] with signed payloads.

use std::time::Duration;

use alloy_primitives::B256;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use axon_lib::signing::sign_payload_now;
use axon_lib::InferenceTask;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::{RelayClient, RelayError};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
struct UploadTaskParamsInput<'a> {
    task_args: &'a str,
    task_id_commitment: B256,
}

/// Envelope: the signed payload plus the timestamp and signature as
/// additional top-level fields.
#[derive(Serialize)]
struct UploadTaskParamsRequest<'a> {
    #[serde(flatten)]
    input: UploadTaskParamsInput<'a>,
    timestamp: i64,
    signature: String,
}

#[derive(Serialize)]
struct GetResultInput {
    index: u64,
    task_id_commitment: B256,
}

#[derive(Debug, Clone)]
pub struct HttpRelayClient {
    base_url: Url,
    client: reqwest::Client,
    signer: PrivateKeySigner,
}

impl HttpRelayClient {
    pub fn new(base_url: Url, signer: PrivateKeySigner) -> HttpRelayClient {
        HttpRelayClient {
            base_url,
            client: reqwest::Client::new(),
            signer,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RelayError> {
        Ok(self.base_url.join(path)?)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(RelayError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    async fn upload_task_params(&self, task: &InferenceTask) -> Result<(), RelayError> {
        let commitment = task
            .task_id_commitment
            .ok_or(RelayError::MissingCommitment(task.id))?;
        let input = UploadTaskParamsInput {
            task_args: &task.task_args,
            task_id_commitment: commitment,
        };
        let (timestamp, signature) = sign_payload_now(&input, &self.signer)?;
        let request = UploadTaskParamsRequest {
            input,
            timestamp,
            signature,
        };

        let url = self.endpoint("v1/inference_tasks")?;
        tracing::debug!("Relay.upload_task_params: {commitment} -> {url}");
        let response = self
            .client
            .post(url)
            .timeout(UPLOAD_TIMEOUT)
            .json(&request)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn download_result(
        &self,
        task: &InferenceTask,
        index: u64,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), RelayError> {
        let commitment = task
            .task_id_commitment
            .ok_or(RelayError::MissingCommitment(task.id))?;
        let input = GetResultInput {
            index,
            task_id_commitment: commitment,
        };
        let (timestamp, signature) = sign_payload_now(&input, &self.signer)?;

        let url = self.endpoint(&format!("v1/inference_tasks/{commitment}/results/{index}"))?;
        tracing::debug!("Relay.download_result: {commitment}[{index}] <- {url}");
        let response = self
            .client
            .get(url)
            .query(&[
                ("timestamp", timestamp.to_string()),
                ("signature", signature),
            ])
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        Ok(())
    }
}
