//! Live session for the instance currently on screen.
//!
//! A session owns the per-mount state (run status, auth handshake, players,
//! metrics) and writes console lines into the shared [`ConsoleStore`]. Push
//! events and local commands feed the same reducers, so an optimistic
//! transition and the backend's confirmation collapse into one edge.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auth::{self, AuthInput, AuthState, AuthStatus};
use crate::backend::{AuthMetadataUpdate, Backend, StartRequest, StartResult, StatusInfo};
use crate::bus::EventSource;
use crate::config::SessionConfig;
use crate::console::{ConsoleMessage, ConsoleStore, MessageKind};
use crate::dispatcher::{EventDispatcher, MountGuard};
use crate::error::{AppError, Result};
use crate::events::{Player, ServerEvent};
use crate::metrics::{MetricsPoller, MetricsSample};
use crate::players::PlayerRoster;
use crate::status::{self, RunStatus, StatusInput, StatusOutcome, Transition};
use crate::validation::{normalize_command, validate_instance_id};

const UPDATE_BUFFER: usize = 64;

/// The instance a session is mounted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub id: String,
    pub path: String,
}

impl InstanceRef {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Per-launch JVM settings forwarded with a start request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub java_path: Option<String>,
    pub jvm_args: Option<String>,
    pub server_args: Option<String>,
}

/// Request/response calls that have been issued and not yet answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingOps {
    pub start: bool,
    pub stop: bool,
    pub command: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Start,
    Stop,
    Command,
}

impl PendingOps {
    fn set(&mut self, op: PendingOp, value: bool) {
        match op {
            PendingOp::Start => self.start = value,
            PendingOp::Stop => self.stop = value,
            PendingOp::Command => self.command = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    Console,
    Status,
    Auth,
    Players,
    Metrics,
    Pending,
}

/// Change notification for the view layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUpdate {
    pub instance_id: String,
    pub reason: UpdateReason,
}

/// Everything the view renders for one instance.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub instance_id: String,
    pub status: RunStatus,
    pub pid: Option<u32>,
    pub started_at: Option<String>,
    pub auth: AuthStatus,
    pub pending: PendingOps,
    pub players: Vec<Player>,
    pub metrics: Option<MetricsSample>,
    pub metrics_history: Vec<MetricsSample>,
    pub messages: Vec<ConsoleMessage>,
    pub command_history: Vec<String>,
}

/// Collaborators a session is mounted with.
#[derive(Clone)]
pub struct SessionDeps {
    pub backend: Arc<dyn Backend>,
    pub events: Arc<dyn EventSource>,
    pub console: ConsoleStore,
    pub config: Arc<SessionConfig>,
}

impl SessionDeps {
    pub fn new(
        backend: Arc<dyn Backend>,
        events: Arc<dyn EventSource>,
        console: ConsoleStore,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            backend,
            events,
            console,
            config,
        }
    }
}

#[derive(Debug, Default)]
struct LiveState {
    status: RunStatus,
    /// A status event has been applied, so the mount-time query is stale.
    status_observed: bool,
    pid: Option<u32>,
    started_at: Option<String>,
    auth: AuthState,
    players: PlayerRoster,
    pending: PendingOps,
}

#[derive(Debug, Default)]
struct ProcessInfo {
    pid: Option<u32>,
    started_at: Option<String>,
}

struct SessionShared {
    instance: InstanceRef,
    backend: Arc<dyn Backend>,
    console: ConsoleStore,
    config: Arc<SessionConfig>,
    state: Mutex<LiveState>,
    poller: Mutex<MetricsPoller>,
    guard: MountGuard,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionShared {
    fn id(&self) -> &str {
        &self.instance.id
    }

    fn lock_state(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_poller(&self) -> MutexGuard<'_, MetricsPoller> {
        self.poller.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, reason: UpdateReason) {
        let _ = self.updates.send(SessionUpdate {
            instance_id: self.instance.id.clone(),
            reason,
        });
    }

    fn write(&self, text: impl Into<String>, kind: MessageKind) {
        self.console.add_message(self.id(), text, kind);
        self.notify(UpdateReason::Console);
    }

    fn handle_event(&self, event: ServerEvent) {
        if !self.guard.is_mounted() {
            return;
        }
        match event {
            ServerEvent::Output { line, stream, .. } => self.write(line, stream.into()),
            ServerEvent::StatusChanged {
                status,
                pid,
                started_at,
                ..
            } => {
                self.apply_status(
                    StatusInput::Observed(status),
                    Some(ProcessInfo { pid, started_at }),
                );
            }
            ServerEvent::ProcessExited { .. } => {
                log::info!("Instance {} process exited", self.id());
                self.apply_status(StatusInput::Observed(RunStatus::Stopped), None);
            }
            ServerEvent::AuthNeeded { .. } => self.apply_auth(AuthInput::Needed),
            ServerEvent::AuthCodeReady { code, auth_url, .. } => {
                self.apply_auth(AuthInput::CodeReady { code, auth_url });
            }
            ServerEvent::AuthSucceeded { profile_name, .. } => {
                self.apply_auth(AuthInput::Succeeded { profile_name });
            }
            ServerEvent::AuthNeedsPersistence { .. } => self.apply_auth(AuthInput::NeedsPersistence),
            ServerEvent::PlayerJoined { player, .. } => {
                let changed = self.lock_state().players.join(player);
                if changed {
                    self.notify(UpdateReason::Players);
                }
            }
            ServerEvent::PlayerLeft { player_id, .. } => {
                let changed = self.lock_state().players.leave(&player_id);
                if changed {
                    self.notify(UpdateReason::Players);
                }
            }
        }
    }

    fn apply_status(&self, input: StatusInput, process: Option<ProcessInfo>) -> StatusOutcome {
        if !self.guard.is_mounted() {
            return StatusOutcome::unchanged(self.lock_state().status);
        }

        let (outcome, auth_reset, players_cleared) = {
            let mut state = self.lock_state();
            if matches!(input, StatusInput::Seed(_)) && state.status_observed {
                return StatusOutcome::unchanged(state.status);
            }

            let outcome = status::reduce(state.status, input);
            if matches!(input, StatusInput::Observed(_)) {
                state.status_observed = true;
            }
            if outcome.rejected {
                log::debug!(
                    "Instance {}: ignoring {:?} while {}",
                    self.instance.id,
                    input,
                    state.status.as_str()
                );
            }
            state.status = outcome.status;

            if let Some(info) = process {
                if matches!(outcome.status, RunStatus::Starting | RunStatus::Running) {
                    if info.pid.is_some() {
                        state.pid = info.pid;
                    }
                    if info.started_at.is_some() {
                        state.started_at = info.started_at;
                    }
                }
            }

            let mut auth_reset = false;
            let mut players_cleared = false;
            if outcome.entered(RunStatus::Stopped) {
                state.pid = None;
                state.started_at = None;
                let reset = auth::reduce(&state.auth, AuthInput::Reset);
                auth_reset = reset.changed();
                state.auth = reset.state;
                players_cleared = state.players.clear();
            }
            (outcome, auth_reset, players_cleared)
        };

        if !outcome.changed() {
            return outcome;
        }

        if input == StatusInput::StartRequested {
            self.console.clear_messages(self.id());
        }
        for transition in &outcome.transitions {
            if let Some(text) = transition_message(input, *transition) {
                self.write(text, MessageKind::System);
            }
        }
        log::debug!(
            "Instance {} status -> {}",
            self.instance.id,
            outcome.status.as_str()
        );

        {
            let mut poller = self.lock_poller();
            if outcome.status == RunStatus::Running {
                poller.start();
            } else {
                poller.stop();
            }
        }

        self.notify(UpdateReason::Status);
        if auth_reset {
            self.notify(UpdateReason::Auth);
        }
        if players_cleared {
            self.notify(UpdateReason::Players);
        }
        outcome
    }

    fn apply_auth(&self, input: AuthInput) {
        if !self.guard.is_mounted() {
            return;
        }

        let outcome = {
            let mut state = self.lock_state();
            let outcome = auth::reduce(&state.auth, input);
            state.auth = outcome.state.clone();
            outcome
        };
        if !outcome.changed() {
            return;
        }

        let status = &outcome.state.status;
        if !outcome.path.is_empty() {
            if let Some(text) = auth_message(status) {
                self.write(text, MessageKind::System);
            }
        }
        if outcome.persistence_changed && status.needs_persistence() {
            self.write(
                "Credentials are held in memory and will be lost when the server restarts",
                MessageKind::System,
            );
        }
        if outcome.authenticated_now() {
            log::info!("Instance {} authenticated", self.instance.id);
            self.persist_auth(AuthMetadataUpdate::authenticated(
                status.profile_name().map(str::to_string),
            ));
        }
        self.notify(UpdateReason::Auth);
    }

    /// Record auth metadata in the background. A failure is reported and
    /// never rolls back the in-memory state.
    fn persist_auth(&self, update: AuthMetadataUpdate) {
        let backend = Arc::clone(&self.backend);
        let console = self.console.clone();
        let guard = self.guard.clone();
        let instance_id = self.instance.id.clone();

        tokio::spawn(async move {
            if let Err(e) = backend.update_auth_metadata(&instance_id, update).await {
                log::warn!(
                    "Failed to persist auth metadata for instance {}: {}",
                    instance_id,
                    e
                );
                if guard.is_mounted() {
                    console.add_message(
                        &instance_id,
                        format!("Failed to save authentication state: {}", describe(&e)),
                        MessageKind::System,
                    );
                }
            }
        });
    }

    fn begin(&self, op: PendingOp) -> PendingReset<'_> {
        self.lock_state().pending.set(op, true);
        self.notify(UpdateReason::Pending);
        PendingReset { shared: self, op }
    }

    fn record_pid(&self, pid: u32) {
        let mut state = self.lock_state();
        if state.pid.is_none() && matches!(state.status, RunStatus::Starting | RunStatus::Running)
        {
            state.pid = Some(pid);
        }
    }

    fn fail(&self, input: StatusInput, action: &str, detail: String) -> AppError {
        self.apply_status(input, None);
        log::error!("Failed to {} instance {}: {}", action, self.instance.id, detail);
        if self.guard.is_mounted() {
            self.write(format!("Failed to {action} server: {detail}"), MessageKind::Stderr);
        }
        AppError::backend(detail)
    }
}

/// Lowers a pending flag when the call it tracks finishes or is dropped.
struct PendingReset<'a> {
    shared: &'a SessionShared,
    op: PendingOp,
}

impl Drop for PendingReset<'_> {
    fn drop(&mut self) {
        self.shared.lock_state().pending.set(self.op, false);
        self.shared.notify(UpdateReason::Pending);
    }
}

/// Console line for a status edge. Edges that undo an optimistic transition
/// are reported by the failure line instead, and the mount-time seed is
/// silent.
fn transition_message(input: StatusInput, transition: Transition) -> Option<&'static str> {
    match (transition.to, input) {
        (_, StatusInput::Seed(_))
        | (RunStatus::Running, StatusInput::StopFailed)
        | (RunStatus::Stopped, StatusInput::StartFailed) => None,
        (RunStatus::Starting, _) => Some("Starting server..."),
        (RunStatus::Running, _) => Some("Server started successfully"),
        (RunStatus::Stopping, _) => Some("Stopping server..."),
        (RunStatus::Stopped, _) => Some("Server stopped"),
    }
}

fn auth_message(status: &AuthStatus) -> Option<String> {
    match status {
        AuthStatus::None => None,
        AuthStatus::NeedsAuth => Some("Server requires authentication".to_string()),
        AuthStatus::AwaitingCode { code, auth_url } => Some(format!(
            "Visit {auth_url} and enter code {code} to authenticate"
        )),
        AuthStatus::Authenticated {
            profile_name: Some(name),
            ..
        } => Some(format!("Authenticated as {name}")),
        AuthStatus::Authenticated { .. } => Some("Authentication successful".to_string()),
    }
}

fn describe(err: &AppError) -> String {
    err.detail().map_or_else(|| err.to_string(), str::to_string)
}

/// A mounted session. Dropping it unmounts without waiting for the event
/// loop; [`Session::teardown`] also waits for it to finish.
pub struct Session {
    shared: Arc<SessionShared>,
    dispatcher: EventDispatcher,
}

impl Session {
    /// Subscribe to every topic, then seed the run status from the backend.
    ///
    /// Subscribing first means no status event can slip between the query
    /// and the subscription; an event that lands before the query returns
    /// wins over the query result.
    pub async fn mount(instance: InstanceRef, deps: SessionDeps) -> Result<Self> {
        validate_instance_id(&instance.id)?;

        let SessionDeps {
            backend,
            events,
            console,
            config,
        } = deps;
        let guard = MountGuard::new();
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);

        let sample_updates = updates.clone();
        let sample_id = instance.id.clone();
        let poller = MetricsPoller::new(
            &instance.id,
            Arc::clone(&backend),
            config.metrics_interval(),
            config.metrics_history_len,
        )
        .with_listener(Arc::new(move || {
            let _ = sample_updates.send(SessionUpdate {
                instance_id: sample_id.clone(),
                reason: UpdateReason::Metrics,
            });
        }));

        let shared = Arc::new(SessionShared {
            instance,
            backend,
            console,
            config,
            state: Mutex::new(LiveState::default()),
            poller: Mutex::new(poller),
            guard: guard.clone(),
            updates,
        });

        let mut dispatcher = EventDispatcher::attach(events.as_ref(), shared.id(), guard).await;
        let handler = Arc::clone(&shared);
        dispatcher.run(move |event| handler.handle_event(event));

        let session = Self { shared, dispatcher };
        session.seed().await;
        log::info!("Mounted session for instance {}", session.instance_id());
        Ok(session)
    }

    async fn seed(&self) {
        let shared = &self.shared;
        match shared.backend.get_status(shared.id()).await {
            Ok(StatusInfo {
                status,
                pid,
                started_at,
            }) => {
                shared.apply_status(StatusInput::Seed(status), Some(ProcessInfo { pid, started_at }));
            }
            Err(e) => log::warn!(
                "Failed to query status for instance {}: {}",
                shared.id(),
                e
            ),
        }
    }

    pub fn instance(&self) -> &InstanceRef {
        &self.shared.instance
    }

    pub fn instance_id(&self) -> &str {
        self.shared.id()
    }

    pub fn is_mounted(&self) -> bool {
        self.shared.guard.is_mounted()
    }

    pub fn status(&self) -> RunStatus {
        self.shared.lock_state().status
    }

    pub fn auth(&self) -> AuthStatus {
        self.shared.lock_state().auth.status.clone()
    }

    pub fn pending(&self) -> PendingOps {
        self.shared.lock_state().pending
    }

    pub fn players(&self) -> Vec<Player> {
        self.shared.lock_state().players.online()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.shared.updates.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let shared = &self.shared;
        let (status, pid, started_at, auth, pending, players) = {
            let state = shared.lock_state();
            (
                state.status,
                state.pid,
                state.started_at.clone(),
                state.auth.status.clone(),
                state.pending,
                state.players.online(),
            )
        };
        let (metrics, metrics_history) = {
            let poller = shared.lock_poller();
            (poller.current(), poller.history())
        };

        SessionSnapshot {
            instance_id: shared.instance.id.clone(),
            status,
            pid,
            started_at,
            auth,
            pending,
            players,
            metrics,
            metrics_history,
            messages: shared.console.messages(shared.id()),
            command_history: shared.console.command_history(shared.id()),
        }
    }

    /// Start the server. The transcript is cleared and the status moves to
    /// `starting` before the request is sent.
    pub async fn start(&self, launch: LaunchOptions) -> Result<()> {
        let shared = &self.shared;
        if shared.apply_status(StatusInput::StartRequested, None).rejected {
            return Err(AppError::instance_running());
        }

        let _pending = shared.begin(PendingOp::Start);
        log::info!("Starting instance {}", shared.id());
        let request = StartRequest {
            instance_id: shared.instance.id.clone(),
            instance_path: shared.instance.path.clone(),
            java_path: launch.java_path,
            jvm_args: launch.jvm_args,
            server_args: launch.server_args,
        };

        match shared.backend.start_server(request).await {
            Ok(StartResult {
                success: true, pid, ..
            }) => {
                if let Some(pid) = pid {
                    shared.record_pid(pid);
                }
                Ok(())
            }
            Ok(StartResult { error, .. }) => Err(shared.fail(
                StatusInput::StartFailed,
                "start",
                error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            Err(e) => Err(shared.fail(StatusInput::StartFailed, "start", describe(&e))),
        }
    }

    /// Ask the server to stop. A failed request returns the status to
    /// `running`.
    pub async fn stop(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.apply_status(StatusInput::StopRequested, None).rejected {
            return Err(AppError::instance_not_running());
        }

        let _pending = shared.begin(PendingOp::Stop);
        log::info!("Stopping instance {}", shared.id());

        match shared.backend.stop_server(shared.id()).await {
            Ok(result) if result.success => Ok(()),
            Ok(result) => Err(shared.fail(
                StatusInput::StopFailed,
                "stop",
                result.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            Err(e) => Err(shared.fail(StatusInput::StopFailed, "stop", describe(&e))),
        }
    }

    /// Send one line of input to the server console.
    pub async fn send_command(&self, text: &str) -> Result<()> {
        let shared = &self.shared;
        let command =
            normalize_command(text).ok_or_else(|| AppError::invalid_command("command is empty"))?;
        if self.status() != RunStatus::Running {
            return Err(AppError::instance_not_running());
        }

        shared.console.add_command(shared.id(), command);
        shared.write(format!("> {command}"), MessageKind::Command);

        let _pending = shared.begin(PendingOp::Command);
        match shared.backend.send_command(shared.id(), command).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.command_failed("server did not accept input".to_string())),
            Err(e) => Err(self.command_failed(describe(&e))),
        }
    }

    fn command_failed(&self, detail: String) -> AppError {
        let shared = &self.shared;
        log::warn!(
            "Failed to send command to instance {}: {}",
            shared.id(),
            detail
        );
        if shared.guard.is_mounted() {
            shared.write(format!("Failed to send command: {detail}"), MessageKind::Stderr);
        }
        AppError::backend(detail)
    }

    /// Kick off the device-code login on the server.
    pub async fn begin_auth(&self) -> Result<()> {
        let command = self.shared.config.auth_login_command.clone();
        self.send_command(&command).await
    }

    /// Ask the server to store its credentials encrypted on disk.
    pub async fn save_auth_persistence(&self) -> Result<()> {
        if !self.auth().needs_persistence() {
            return Err(AppError::invalid_command(
                "credentials do not need to be saved",
            ));
        }
        let command = self.shared.config.auth_persist_command.clone();
        self.send_command(&command).await?;

        self.shared.apply_auth(AuthInput::PersistenceSaved);
        self.shared.persist_auth(AuthMetadataUpdate::persisted());
        Ok(())
    }

    /// Release every subscription and stop polling. Returns once the event
    /// loop is gone; nothing this session owns is mutated afterwards.
    pub async fn teardown(mut self) {
        self.shared.guard.unmount();
        self.dispatcher.teardown().await;
        self.shared.lock_poller().stop();
        log::info!("Unmounted session for instance {}", self.instance_id());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.guard.unmount();
        self.shared.lock_poller().stop();
    }
}
