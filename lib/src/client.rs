use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An API client known to the bridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// External identifier the client authenticates as.
    pub client_id: String,
}

/// Aggregate status of a client-level request.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClientTaskStatus {
    #[default]
    Running,
    Success,
    Failed,
}

/// Groups the inference tasks spawned for one client-level request.
///
/// Stays `Running` until every child task reaches a terminal status;
/// the maintenance loop then folds the outcomes into `Success` or
/// `Failed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientTask {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub client_id: i64,
    pub status: ClientTaskStatus,
    pub failed_count: i64,
}
