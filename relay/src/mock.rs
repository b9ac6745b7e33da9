//! In-memory [`RelayClient`] used by driver tests.

use std::sync::{Arc, Mutex};

use alloy_primitives::B256;
use async_trait::async_trait;
use axon_lib::InferenceTask;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{RelayClient, RelayError};

#[derive(Debug)]
struct MockInner {
    uploads: Vec<B256>,
    artifact: Vec<u8>,
    hang_uploads: bool,
    failing_uploads: u32,
}

impl Default for MockInner {
    fn default() -> MockInner {
        MockInner {
            uploads: Vec::new(),
            artifact: b"artifact".to_vec(),
            hang_uploads: false,
            failing_uploads: 0,
        }
    }
}

/// Records uploads and serves a fixed artifact; uploads can be made
/// to fail or hang for the failure-path tests.
#[derive(Debug, Clone, Default)]
pub struct MockRelayClient {
    inner: Arc<Mutex<MockInner>>,
}

impl MockRelayClient {
    pub fn new() -> MockRelayClient {
        MockRelayClient::default()
    }

    pub fn with_artifact(self, artifact: Vec<u8>) -> MockRelayClient {
        self.inner.lock().unwrap().artifact = artifact;
        self
    }

    /// Make every upload block forever.
    pub fn with_hanging_uploads(self) -> MockRelayClient {
        self.inner.lock().unwrap().hang_uploads = true;
        self
    }

    /// Make the next `count` uploads fail with a relay API error.
    pub fn fail_uploads(&self, count: u32) {
        self.inner.lock().unwrap().failing_uploads = count;
    }

    pub fn uploads(&self) -> Vec<B256> {
        self.inner.lock().unwrap().uploads.clone()
    }
}

#[async_trait]
impl RelayClient for MockRelayClient {
    async fn upload_task_params(&self, task: &InferenceTask) -> Result<(), RelayError> {
        let commitment = task
            .task_id_commitment
            .ok_or(RelayError::MissingCommitment(task.id))?;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.hang_uploads {
                drop(inner);
                std::future::pending::<()>().await;
                unreachable!();
            }
            if inner.failing_uploads > 0 {
                inner.failing_uploads -= 1;
                return Err(RelayError::Api {
                    status: 500,
                    message: "injected upload failure".to_owned(),
                });
            }
            inner.uploads.push(commitment);
        }
        Ok(())
    }

    async fn download_result(
        &self,
        task: &InferenceTask,
        index: u64,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), RelayError> {
        task.task_id_commitment
            .ok_or(RelayError::MissingCommitment(task.id))?;
        let artifact = self.inner.lock().unwrap().artifact.clone();
        out.write_all(&artifact).await?;
        out.write_all(index.to_string().as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}
