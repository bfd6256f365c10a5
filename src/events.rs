//! Push events delivered by the backend supervisor.
//!
//! Events are broadcast application-wide; every variant carries the instance
//! id the dispatcher filters on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::status::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Output,
    StatusChanged,
    AuthNeeded,
    AuthCodeReady,
    AuthSucceeded,
    AuthNeedsPersistence,
    ProcessExited,
    PlayerJoined,
    PlayerLeft,
}

impl Topic {
    /// Every topic a session subscribes to.
    pub fn all() -> &'static [Self] {
        &[
            Self::Output,
            Self::StatusChanged,
            Self::AuthNeeded,
            Self::AuthCodeReady,
            Self::AuthSucceeded,
            Self::AuthNeedsPersistence,
            Self::ProcessExited,
            Self::PlayerJoined,
            Self::PlayerLeft,
        ]
    }

    /// Event name used on the wire by the supervisor.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Output => "server-output",
            Self::StatusChanged => "server-status-change",
            Self::AuthNeeded => "server-auth-needed",
            Self::AuthCodeReady => "server-auth-required",
            Self::AuthSucceeded => "server-auth-success",
            Self::AuthNeedsPersistence => "server-auth-needs-persistence",
            Self::ProcessExited => "server-exit",
            Self::PlayerJoined => "server-player-joined",
            Self::PlayerLeft => "server-player-left",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|topic| topic.event_name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Output {
        instance_id: String,
        line: String,
        stream: OutputStream,
    },
    StatusChanged {
        instance_id: String,
        status: RunStatus,
        pid: Option<u32>,
        started_at: Option<String>,
    },
    AuthNeeded {
        instance_id: String,
    },
    AuthCodeReady {
        instance_id: String,
        code: String,
        auth_url: String,
    },
    AuthSucceeded {
        instance_id: String,
        profile_name: Option<String>,
    },
    AuthNeedsPersistence {
        instance_id: String,
    },
    ProcessExited {
        instance_id: String,
    },
    PlayerJoined {
        instance_id: String,
        player: Player,
    },
    PlayerLeft {
        instance_id: String,
        player_id: String,
    },
}

impl ServerEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::Output { .. } => Topic::Output,
            Self::StatusChanged { .. } => Topic::StatusChanged,
            Self::AuthNeeded { .. } => Topic::AuthNeeded,
            Self::AuthCodeReady { .. } => Topic::AuthCodeReady,
            Self::AuthSucceeded { .. } => Topic::AuthSucceeded,
            Self::AuthNeedsPersistence { .. } => Topic::AuthNeedsPersistence,
            Self::ProcessExited { .. } => Topic::ProcessExited,
            Self::PlayerJoined { .. } => Topic::PlayerJoined,
            Self::PlayerLeft { .. } => Topic::PlayerLeft,
        }
    }

    pub fn instance_id(&self) -> &str {
        match self {
            Self::Output { instance_id, .. }
            | Self::StatusChanged { instance_id, .. }
            | Self::AuthNeeded { instance_id }
            | Self::AuthCodeReady { instance_id, .. }
            | Self::AuthSucceeded { instance_id, .. }
            | Self::AuthNeedsPersistence { instance_id }
            | Self::ProcessExited { instance_id }
            | Self::PlayerJoined { instance_id, .. }
            | Self::PlayerLeft { instance_id, .. } => instance_id,
        }
    }

    /// Decode a named supervisor event from its JSON payload.
    pub fn decode(name: &str, payload: Value) -> Result<Self> {
        let topic = Topic::from_event_name(name)
            .ok_or_else(|| AppError::event(name, "unknown event"))?;
        let bad = |e: serde_json::Error| AppError::event(name, e.to_string());

        let event = match topic {
            Topic::Output => {
                let p: OutputPayload = serde_json::from_value(payload).map_err(bad)?;
                Self::Output {
                    instance_id: p.instance_id,
                    line: p.line,
                    stream: p.stream,
                }
            }
            Topic::StatusChanged => {
                let p: StatusPayload = serde_json::from_value(payload).map_err(bad)?;
                Self::StatusChanged {
                    instance_id: p.instance_id,
                    status: p.status,
                    pid: p.pid,
                    started_at: p.started_at,
                }
            }
            Topic::AuthNeeded => {
                let p: InstancePayload = serde_json::from_value(payload).map_err(bad)?;
                Self::AuthNeeded {
                    instance_id: p.instance_id,
                }
            }
            Topic::AuthCodeReady => {
                let p: AuthCodePayload = serde_json::from_value(payload).map_err(bad)?;
                Self::AuthCodeReady {
                    instance_id: p.instance_id,
                    code: p.code,
                    auth_url: p.auth_url,
                }
            }
            Topic::AuthSucceeded => {
                let p: AuthSuccessPayload = serde_json::from_value(payload).map_err(bad)?;
                Self::AuthSucceeded {
                    instance_id: p.instance_id,
                    profile_name: p.profile_name,
                }
            }
            Topic::AuthNeedsPersistence => Self::AuthNeedsPersistence {
                instance_id: bare_instance_id(name, payload)?,
            },
            Topic::ProcessExited => Self::ProcessExited {
                instance_id: bare_instance_id(name, payload)?,
            },
            Topic::PlayerJoined => {
                let p: PlayerJoinedPayload = serde_json::from_value(payload).map_err(bad)?;
                Self::PlayerJoined {
                    instance_id: p.instance_id,
                    player: p.player,
                }
            }
            Topic::PlayerLeft => {
                let p: PlayerLeftPayload = serde_json::from_value(payload).map_err(bad)?;
                Self::PlayerLeft {
                    instance_id: p.instance_id,
                    player_id: p.player_id,
                }
            }
        };
        Ok(event)
    }
}

/// Needs-persistence and exit notices carry the instance id as a bare string.
fn bare_instance_id(name: &str, payload: Value) -> Result<String> {
    match payload {
        Value::String(id) => Ok(id),
        other => serde_json::from_value::<InstancePayload>(other)
            .map(|p| p.instance_id)
            .map_err(|e| AppError::event(name, e.to_string())),
    }
}

#[derive(Deserialize)]
struct InstancePayload {
    instance_id: String,
}

#[derive(Deserialize)]
struct OutputPayload {
    instance_id: String,
    line: String,
    stream: OutputStream,
}

#[derive(Deserialize)]
struct StatusPayload {
    instance_id: String,
    status: RunStatus,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    started_at: Option<String>,
}

#[derive(Deserialize)]
struct AuthCodePayload {
    instance_id: String,
    code: String,
    auth_url: String,
}

#[derive(Deserialize)]
struct AuthSuccessPayload {
    instance_id: String,
    #[serde(default)]
    profile_name: Option<String>,
}

#[derive(Deserialize)]
struct PlayerJoinedPayload {
    instance_id: String,
    player: Player,
}

#[derive(Deserialize)]
struct PlayerLeftPayload {
    instance_id: String,
    player_id: String,
}
