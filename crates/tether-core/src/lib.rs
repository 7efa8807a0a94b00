//! tether-core: Core types and configuration for tether
//!
//! This crate provides the connection state model, payload type,
//! error taxonomy and configuration structures shared by the
//! resilient client and its command line front end.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use error::{ConfigError, ConnectionError, ErrorKind, TetherError};
pub use types::{
    ConnectionState, ConnectionStatus, Payload, StateTransitionRecord, TransitionMetadata,
};
