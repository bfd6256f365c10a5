use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::paths::{config_path, ensure_data_dir};

static CONFIG_CACHE: OnceLock<Arc<SessionConfig>> = OnceLock::new();

pub const DEFAULT_MAX_MESSAGES: usize = 2000;
pub const DEFAULT_MAX_HISTORY: usize = 100;
pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_METRICS_HISTORY_LEN: usize = 20;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Tunables for the live session engine, stored in `session.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    #[serde(default = "default_metrics_history_len")]
    pub metrics_history_len: usize,
    /// Broadcast capacity per push topic.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_auth_login_command")]
    pub auth_login_command: String,
    #[serde(default = "default_auth_persist_command")]
    pub auth_persist_command: String,
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_metrics_interval_ms() -> u64 {
    DEFAULT_METRICS_INTERVAL_MS
}

fn default_metrics_history_len() -> usize {
    DEFAULT_METRICS_HISTORY_LEN
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_auth_login_command() -> String {
    "/auth login device".to_string()
}

fn default_auth_persist_command() -> String {
    "/auth persistence Encrypted".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_history: DEFAULT_MAX_HISTORY,
            metrics_interval_ms: DEFAULT_METRICS_INTERVAL_MS,
            metrics_history_len: DEFAULT_METRICS_HISTORY_LEN,
            event_buffer: DEFAULT_EVENT_BUFFER,
            auth_login_command: default_auth_login_command(),
            auth_persist_command: default_auth_persist_command(),
        }
    }
}

impl SessionConfig {
    /// Clamp every limit into a range the engine can honor.
    pub fn normalized(mut self) -> Self {
        self.max_messages = self.max_messages.clamp(1, 100_000);
        self.max_history = self.max_history.clamp(1, 10_000);
        self.metrics_interval_ms = self.metrics_interval_ms.clamp(250, 60_000);
        self.metrics_history_len = self.metrics_history_len.clamp(1, 1_000);
        self.event_buffer = self.event_buffer.clamp(16, 65_536);
        if self.auth_login_command.trim().is_empty() {
            self.auth_login_command = default_auth_login_command();
        }
        if self.auth_persist_command.trim().is_empty() {
            self.auth_persist_command = default_auth_persist_command();
        }
        self
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }
}

/// Read a config file, writing the defaults first if it does not exist yet.
pub fn load_config_from(path: &Path) -> Result<SessionConfig> {
    if !path.exists() {
        let config = SessionConfig::default();
        save_config_to(path, &config)?;
        return Ok(config);
    }
    let content = fs::read_to_string(path).map_err(|e| AppError::config(e.to_string()))?;
    let config: SessionConfig = toml::from_str(&content)?;
    Ok(config.normalized())
}

pub fn save_config_to(path: &Path, config: &SessionConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::config(e.to_string()))?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content).map_err(|e| AppError::config(e.to_string()))
}

/// Process-wide config loaded once from `~/.hypanel/session.toml`.
pub fn load_config() -> Result<Arc<SessionConfig>> {
    if let Some(config) = CONFIG_CACHE.get() {
        return Ok(Arc::clone(config));
    }

    ensure_data_dir()?;
    let config = Arc::new(load_config_from(&config_path())?);
    let _ = CONFIG_CACHE.set(Arc::clone(&config));

    CONFIG_CACHE
        .get()
        .map(Arc::clone)
        .ok_or_else(|| AppError::config("CONFIG_CACHE not initialized"))
}
