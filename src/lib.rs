mod auth;
mod backend;
mod bus;
mod config;
mod console;
mod controller;
mod dispatcher;
mod error;
mod events;
mod metrics;
mod paths;
mod players;
mod session;
mod status;
mod validation;

#[cfg(test)]
mod test_support;

pub use auth::{AuthInput, AuthOutcome, AuthStage, AuthState, AuthStatus};
pub use backend::{
    AuthMetadataUpdate, Backend, ServerMetrics, StartRequest, StartResult, StatusInfo, StopResult,
};
pub use bus::{EventBus, EventSource, Subscription};
pub use config::{load_config, load_config_from, save_config_to, SessionConfig};
pub use console::{ConsoleMessage, ConsoleStore, MessageKind};
pub use controller::SessionController;
pub use dispatcher::{EventDispatcher, MountGuard};
pub use error::{AppError, ErrorKind, Result};
pub use events::{OutputStream, Player, ServerEvent, Topic};
pub use metrics::{MetricsPoller, MetricsSample, SampleListener};
pub use paths::{config_path, get_data_dir};
pub use players::PlayerRoster;
pub use session::{
    InstanceRef, LaunchOptions, PendingOps, Session, SessionDeps, SessionSnapshot, SessionUpdate,
    UpdateReason,
};
pub use status::{RunStatus, StatusInput, StatusOutcome, Transition};
pub use validation::{normalize_command, validate_instance_id};

/// Reducer entry points, for hosts that drive the state machines directly.
pub mod reducers {
    pub use crate::auth::reduce as reduce_auth;
    pub use crate::status::reduce as reduce_status;
}
