//! Request/response surface of the backend process supervisor.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::status::RunStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartRequest {
    pub instance_id: String,
    pub instance_path: String,
    pub java_path: Option<String>,
    pub jvm_args: Option<String>,
    pub server_args: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResult {
    pub success: bool,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: RunStatus,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub started_at: Option<String>,
}

impl StatusInfo {
    pub fn stopped() -> Self {
        Self {
            status: RunStatus::Stopped,
            pid: None,
            started_at: None,
        }
    }
}

/// Point-in-time resource usage of a server process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMetrics {
    #[serde(default)]
    pub cpu_usage: Option<f32>,
    #[serde(default)]
    pub memory_mb: Option<f64>,
    #[serde(default)]
    pub memory_percent: Option<f32>,
    #[serde(default)]
    pub uptime_seconds: Option<u64>,
}

/// Partial update of the auth columns stored with an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMetadataUpdate {
    pub auth_status: Option<String>,
    pub auth_persistence: Option<String>,
    pub auth_profile_name: Option<String>,
}

impl AuthMetadataUpdate {
    pub fn authenticated(profile_name: Option<String>) -> Self {
        Self {
            auth_status: Some("authenticated".to_string()),
            auth_persistence: None,
            auth_profile_name: profile_name,
        }
    }

    pub fn persisted() -> Self {
        Self {
            auth_status: None,
            auth_persistence: Some("encrypted".to_string()),
            auth_profile_name: None,
        }
    }
}

/// Async RPC calls into the supervisor. None of them carry a timeout: a hung
/// call keeps the matching `PendingOps` flag raised until it returns.
pub trait Backend: Send + Sync {
    fn start_server(&self, request: StartRequest) -> BoxFuture<'_, Result<StartResult>>;

    fn stop_server<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, Result<StopResult>>;

    /// Returns whether the server accepted the input line.
    fn send_command<'a>(
        &'a self,
        instance_id: &'a str,
        command: &'a str,
    ) -> BoxFuture<'a, Result<bool>>;

    fn get_status<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, Result<StatusInfo>>;

    fn get_metrics<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, Result<ServerMetrics>>;

    fn update_auth_metadata<'a>(
        &'a self,
        instance_id: &'a str,
        update: AuthMetadataUpdate,
    ) -> BoxFuture<'a, Result<()>>;
}
