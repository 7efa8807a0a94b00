//! Core domain types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ErrorKind;

/// Lifecycle state of a resilient connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Constructed, `connect()` not yet called
    Idle,
    /// A connection attempt is in flight
    Connecting,
    /// Link is up and payloads are written directly
    Open,
    /// Waiting for the backoff timer before the next attempt
    Reconnecting,
    /// Explicit close in progress
    Closing,
    /// Closed by the caller
    Closed,
    /// Reconnection attempts exhausted
    Failed,
}

impl ConnectionState {
    /// Whether the caller has closed the connection
    pub fn is_closed(self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Opaque application payload carried over the link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Binary(Bytes),
}

impl Payload {
    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text content, if this is a text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

/// Point-in-time snapshot of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Current state
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful open
    pub attempt_count: u32,
    /// Configured attempt cap
    pub max_attempts: u32,
    /// Payloads waiting for delivery
    pub queue_length: usize,
    /// Whether the caller closed the connection
    pub is_closed: bool,
}

/// Extra context attached to a state transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionMetadata {
    /// Human readable cause
    pub reason: Option<String>,
    /// Error class, when the transition was caused by a failure
    pub error: Option<ErrorKind>,
    /// Attempt counter at the time of the transition
    pub attempt: u32,
}

impl TransitionMetadata {
    /// Metadata carrying only a reason
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Metadata for a failure-driven transition
    pub fn failure(kind: ErrorKind, reason: impl Into<String>, attempt: u32) -> Self {
        Self {
            reason: Some(reason.into()),
            error: Some(kind),
            attempt,
        }
    }

    /// Set the attempt counter
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// One entry of the transition history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Previously recorded state (`None` for the first record)
    pub from: Option<ConnectionState>,
    /// New state
    pub to: ConnectionState,
    /// Transition context
    pub metadata: TransitionMetadata,
}
