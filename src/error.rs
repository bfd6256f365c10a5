//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Session engine error that can be serialized for the view layer.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Instance id is malformed
    InvalidInstance,
    /// Instance is currently running (or starting)
    InstanceRunning,
    /// Instance is not running
    InstanceNotRunning,
    /// No session is mounted
    NoSession,
    /// Command text was rejected before reaching the backend
    InvalidCommand,
    /// Backend request failed or was refused
    Backend,
    /// Push subscription could not be acquired
    Subscription,
    /// Push event payload could not be decoded
    Event,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidInstance => 1001,
            Self::InstanceRunning => 1002,
            Self::InstanceNotRunning => 1003,
            Self::NoSession => 1004,
            Self::InvalidCommand => 1005,
            Self::Backend => 2001,
            Self::Subscription => 2002,
            Self::Event => 2003,
            Self::Config => 3001,
            Self::Io => 3002,
            Self::Other => 9999,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn invalid_instance(id: &str) -> Self {
        Self::new(
            ErrorKind::InvalidInstance,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn instance_running() -> Self {
        Self::new(ErrorKind::InstanceRunning, HashMap::new())
    }

    pub fn instance_not_running() -> Self {
        Self::new(ErrorKind::InstanceNotRunning, HashMap::new())
    }

    pub fn no_session() -> Self {
        Self::new(ErrorKind::NoSession, HashMap::new())
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::InvalidCommand, message)
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Backend, message)
    }

    pub fn subscription(topic: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Subscription,
            HashMap::from([
                ("topic".to_string(), topic.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn event(name: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Event,
            HashMap::from([
                ("event".to_string(), name.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable detail, if one was attached.
    pub fn detail(&self) -> Option<&str> {
        self.payload.get("detail").map(String::as_str)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::other(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
