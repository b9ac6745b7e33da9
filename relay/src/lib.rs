//! Access to the relay that hands task parameters to worker nodes and
//! serves result artifacts back.

use async_trait::async_trait;
use axon_lib::signing::SignError;
use axon_lib::InferenceTask;
use tokio::io::AsyncWrite;

pub mod http;
pub mod mock;

pub use http::HttpRelayClient;
pub use mock::MockRelayClient;

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("relay transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("relay rejected the request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Sign(#[from] SignError),

    #[error("writing result artifact failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("task #{0} has no commitment yet")]
    MissingCommitment(i64),

    #[error("invalid relay url: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Publish the task parameters under the task's commitment so a
    /// worker node can pick them up.
    async fn upload_task_params(&self, task: &InferenceTask) -> Result<(), RelayError>;

    /// Stream result artifact `index` of the task into `out`.
    async fn download_result(
        &self,
        task: &InferenceTask,
        index: u64,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), RelayError>;
}
