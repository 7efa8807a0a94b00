//! Core error types for tether

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Top-level error type for the tether ecosystem
#[derive(Error, Debug)]
pub enum TetherError {
    /// Transport-level failure while connecting or open
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// No link opened within the connect timeout
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Automatic reconnection gave up
    #[error("Maximum reconnection attempts reached: {attempts}")]
    MaxAttemptsExceeded { attempts: u32 },

    /// The connection was closed explicitly before the operation finished
    #[error("Connection closed")]
    Closed,

    /// Operation is not valid in the current state
    #[error("Operation not valid while {state}")]
    InvalidState { state: ConnectionState },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TetherError {
    /// Classification used when reporting this error to listeners
    pub fn kind(&self) -> ErrorKind {
        match self {
            TetherError::Timeout(_) => ErrorKind::Timeout,
            TetherError::MaxAttemptsExceeded { .. } => ErrorKind::MaxAttemptsExceeded,
            TetherError::Connection(
                ConnectionError::SendFailed(_) | ConnectionError::LinkClosed,
            ) => ErrorKind::SendFailure,
            _ => ErrorKind::Connection,
        }
    }
}

/// Transport-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Remote refused the connection or the handshake failed
    #[error("Connection refused: {0}")]
    Refused(String),

    /// Underlying transport reported an error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Writing a payload to the link failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The link is already closed
    #[error("Link closed")]
    LinkClosed,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Error classes reported through listener callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure, recovered by scheduled reconnect
    Connection,
    /// Connect timeout, retried like a connection failure
    Timeout,
    /// Terminal: reconnection attempts exhausted
    MaxAttemptsExceeded,
    /// Local write failure, recovered by re-queueing
    SendFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::MaxAttemptsExceeded => write!(f, "max_attempts_exceeded"),
            ErrorKind::SendFailure => write!(f, "send_failure"),
        }
    }
}
