//! Per-instance console transcript and command history.
//!
//! The store is a cheap-to-clone handle shared by every session that shows an
//! instance, so transcripts survive the view being torn down and remounted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{SessionConfig, DEFAULT_MAX_HISTORY, DEFAULT_MAX_MESSAGES};
use crate::events::OutputStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Stdout,
    Stderr,
    System,
    Command,
}

impl From<OutputStream> for MessageKind {
    fn from(stream: OutputStream) -> Self {
        match stream {
            OutputStream::Stdout => Self::Stdout,
            OutputStream::Stderr => Self::Stderr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleMessage {
    pub id: u64,
    pub text: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct InstanceConsoleState {
    messages: VecDeque<ConsoleMessage>,
    command_history: VecDeque<String>,
    next_message_id: u64,
}

#[derive(Debug)]
struct Buckets {
    instances: HashMap<String, InstanceConsoleState>,
    max_messages: usize,
    max_history: usize,
}

impl Buckets {
    fn bucket(&mut self, instance_id: &str) -> &mut InstanceConsoleState {
        self.instances.entry(instance_id.to_string()).or_default()
    }
}

/// Shared console registry keyed by instance id.
#[derive(Debug, Clone)]
pub struct ConsoleStore {
    inner: Arc<Mutex<Buckets>>,
}

impl ConsoleStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_MESSAGES, DEFAULT_MAX_HISTORY)
    }

    pub fn with_limits(max_messages: usize, max_history: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Buckets {
                instances: HashMap::new(),
                max_messages: max_messages.max(1),
                max_history: max_history.max(1),
            })),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::with_limits(config.max_messages, config.max_history)
    }

    pub fn max_messages(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).max_messages
    }

    /// Current transcript, oldest first.
    pub fn messages(&self, instance_id: &str) -> Vec<ConsoleMessage> {
        let mut buckets = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .bucket(instance_id)
            .messages
            .iter()
            .cloned()
            .collect()
    }

    pub fn message_count(&self, instance_id: &str) -> usize {
        let mut buckets = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buckets.bucket(instance_id).messages.len()
    }

    /// Append a message, evicting the oldest entries past the cap.
    pub fn add_message(
        &self,
        instance_id: &str,
        text: impl Into<String>,
        kind: MessageKind,
    ) -> ConsoleMessage {
        let mut buckets = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let cap = buckets.max_messages;
        let state = buckets.bucket(instance_id);

        let message = ConsoleMessage {
            id: state.next_message_id,
            text: text.into(),
            kind,
            timestamp: Utc::now(),
        };
        state.next_message_id += 1;
        state.messages.push_back(message.clone());
        while state.messages.len() > cap {
            state.messages.pop_front();
        }
        message
    }

    /// Drop the transcript and restart ids at zero. History is kept.
    pub fn clear_messages(&self, instance_id: &str) {
        let mut buckets = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = buckets.bucket(instance_id);
        state.messages.clear();
        state.next_message_id = 0;
    }

    /// Submitted commands, oldest first.
    pub fn command_history(&self, instance_id: &str) -> Vec<String> {
        let mut buckets = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .bucket(instance_id)
            .command_history
            .iter()
            .cloned()
            .collect()
    }

    /// Record a command as most recent, removing an earlier equal entry.
    pub fn add_command(&self, instance_id: &str, command: impl Into<String>) {
        let command = command.into();
        let mut buckets = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let cap = buckets.max_history;
        let history = &mut buckets.bucket(instance_id).command_history;

        if let Some(pos) = history.iter().position(|existing| *existing == command) {
            history.remove(pos);
        }
        history.push_back(command);
        while history.len() > cap {
            history.pop_front();
        }
    }

    /// Ids of every instance that has a bucket.
    pub fn instance_ids(&self) -> Vec<String> {
        let buckets = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = buckets.instances.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ConsoleStore {
    fn default() -> Self {
        Self::new()
    }
}
