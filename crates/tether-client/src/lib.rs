//! tether-client: Resilient reconnecting transport client
//!
//! [`ResilientConnection`] keeps a logical bidirectional connection alive
//! over an unreliable link. It reconnects with exponential backoff after
//! failures, queues payloads sent while disconnected and flushes them in
//! order on the next open, and reports lifecycle events to a
//! [`ConnectionListener`].

pub mod connection;
pub mod link;
pub mod listener;
pub mod queue;
pub mod reconnect;
pub mod tracker;

pub use connection::ResilientConnection;
pub use listener::{
    ConnectionEvent, ConnectionListener, ErrorEvent, NoopListener, ReconnectingEvent,
};
pub use queue::PendingMessageQueue;
pub use reconnect::BackoffScheduler;
pub use tracker::{ConnectionStateTracker, ConnectionStatistics};
