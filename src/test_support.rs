//! Test double for the supervisor RPC surface.
//!
//! Records every call and serves configurable responses, so session tests
//! can drive the backend deterministically.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::Notify;

use crate::backend::{
    AuthMetadataUpdate, Backend, ServerMetrics, StartRequest, StartResult, StatusInfo, StopResult,
};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start(StartRequest),
    Stop(String),
    Send { instance_id: String, command: String },
    Status(String),
    Metrics(String),
    AuthMetadata { instance_id: String, update: AuthMetadataUpdate },
}

/// How a scripted request/response call answers.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    /// The call returns with `success: false` (or `false` for commands).
    Refused(String),
    /// The call itself fails.
    Unreachable(String),
}

pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    start_reply: Mutex<Reply>,
    stop_reply: Mutex<Reply>,
    send_reply: Mutex<Reply>,
    status: Mutex<std::result::Result<StatusInfo, String>>,
    metrics_calls: AtomicUsize,
    uptime: AtomicU64,
    metrics_fail: AtomicBool,
    metadata_fail: AtomicBool,
    start_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            start_reply: Mutex::new(Reply::Ok),
            stop_reply: Mutex::new(Reply::Ok),
            send_reply: Mutex::new(Reply::Ok),
            status: Mutex::new(Ok(StatusInfo::stopped())),
            metrics_calls: AtomicUsize::new(0),
            uptime: AtomicU64::new(0),
            metrics_fail: AtomicBool::new(false),
            metadata_fail: AtomicBool::new(false),
            start_gate: Mutex::new(None),
        }
    }

    pub fn with_status(status: StatusInfo) -> Self {
        let backend = Self::new();
        *backend.status.lock().unwrap() = Ok(status);
        backend
    }

    pub fn set_status(&self, status: StatusInfo) {
        *self.status.lock().unwrap() = Ok(status);
    }

    pub fn fail_status(&self, error: &str) {
        *self.status.lock().unwrap() = Err(error.to_string());
    }

    pub fn reply_start(&self, reply: Reply) {
        *self.start_reply.lock().unwrap() = reply;
    }

    pub fn reply_stop(&self, reply: Reply) {
        *self.stop_reply.lock().unwrap() = reply;
    }

    pub fn reply_send(&self, reply: Reply) {
        *self.send_reply.lock().unwrap() = reply;
    }

    pub fn fail_metrics(&self, fail: bool) {
        self.metrics_fail.store(fail, Ordering::SeqCst);
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.metadata_fail.store(fail, Ordering::SeqCst);
    }

    /// Hold every start call until the returned handle is notified.
    pub fn gate_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn metrics_calls(&self) -> usize {
        self.metrics_calls.load(Ordering::SeqCst)
    }

    pub fn sent_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn metadata_updates(&self) -> Vec<AuthMetadataUpdate> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AuthMetadata { update, .. } => Some(update),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for FakeBackend {
    fn start_server(&self, request: StartRequest) -> BoxFuture<'_, Result<StartResult>> {
        Box::pin(async move {
            self.record(Call::Start(request));
            let gate = self.start_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let reply = self.start_reply.lock().unwrap().clone();
            match reply {
                Reply::Ok => Ok(StartResult {
                    success: true,
                    pid: Some(4242),
                    error: None,
                }),
                Reply::Refused(error) => Ok(StartResult {
                    success: false,
                    pid: None,
                    error: Some(error),
                }),
                Reply::Unreachable(error) => Err(AppError::backend(error)),
            }
        })
    }

    fn stop_server<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, Result<StopResult>> {
        Box::pin(async move {
            self.record(Call::Stop(instance_id.to_string()));
            let reply = self.stop_reply.lock().unwrap().clone();
            match reply {
                Reply::Ok => Ok(StopResult {
                    success: true,
                    error: None,
                }),
                Reply::Refused(error) => Ok(StopResult {
                    success: false,
                    error: Some(error),
                }),
                Reply::Unreachable(error) => Err(AppError::backend(error)),
            }
        })
    }

    fn send_command<'a>(
        &'a self,
        instance_id: &'a str,
        command: &'a str,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            self.record(Call::Send {
                instance_id: instance_id.to_string(),
                command: command.to_string(),
            });
            let reply = self.send_reply.lock().unwrap().clone();
            match reply {
                Reply::Ok => Ok(true),
                Reply::Refused(_) => Ok(false),
                Reply::Unreachable(error) => Err(AppError::backend(error)),
            }
        })
    }

    fn get_status<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, Result<StatusInfo>> {
        Box::pin(async move {
            self.record(Call::Status(instance_id.to_string()));
            let status = self.status.lock().unwrap().clone();
            status.map_err(AppError::backend)
        })
    }

    fn get_metrics<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, Result<ServerMetrics>> {
        Box::pin(async move {
            self.record(Call::Metrics(instance_id.to_string()));
            self.metrics_calls.fetch_add(1, Ordering::SeqCst);
            if self.metrics_fail.load(Ordering::SeqCst) {
                return Err(AppError::backend("metrics unavailable"));
            }
            let uptime = self.uptime.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ServerMetrics {
                cpu_usage: Some(12.5),
                memory_mb: Some(1024.0),
                memory_percent: Some(6.25),
                uptime_seconds: Some(uptime),
            })
        })
    }

    fn update_auth_metadata<'a>(
        &'a self,
        instance_id: &'a str,
        update: AuthMetadataUpdate,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(Call::AuthMetadata {
                instance_id: instance_id.to_string(),
                update,
            });
            if self.metadata_fail.load(Ordering::SeqCst) {
                return Err(AppError::backend("database locked"));
            }
            Ok(())
        })
    }
}
