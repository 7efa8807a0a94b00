//! Lifecycle events and the listener interface

use std::time::Duration;

use serde::Serialize;
use tether_core::{ErrorKind, Payload};
use tokio::sync::mpsc;

/// Failure reported to listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    /// Error class
    pub kind: ErrorKind,
    /// Human readable cause
    pub reason: String,
    /// Attempt counter when the failure happened
    pub attempt_number: u32,
}

/// A reconnect has been scheduled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconnectingEvent {
    /// Attempt that will run when the delay elapses (starts at 1)
    pub attempt_number: u32,
    /// Delay before the attempt, jitter included
    pub next_delay: Duration,
    /// Configured attempt cap
    pub max_attempts: u32,
}

/// Lifecycle notification, as delivered to a channel listener
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The link opened
    Connected,
    /// An open link went away
    Disconnected { reason: String },
    /// Something failed
    Error(ErrorEvent),
    /// A reconnect attempt was scheduled
    Reconnecting(ReconnectingEvent),
    /// A payload arrived from the remote end
    Message(Payload),
}

impl ConnectionEvent {
    /// Invoke the matching listener callback
    pub fn dispatch(self, listener: &dyn ConnectionListener) {
        match self {
            ConnectionEvent::Connected => listener.on_connect(),
            ConnectionEvent::Disconnected { reason } => listener.on_disconnect(&reason),
            ConnectionEvent::Error(event) => listener.on_error(&event),
            ConnectionEvent::Reconnecting(event) => listener.on_reconnecting(&event),
            ConnectionEvent::Message(payload) => listener.on_message(payload),
        }
    }
}

/// Observer of a resilient connection
///
/// Every method defaults to a no-op. Callbacks run one at a time on the
/// connection's dispatcher task, in the order the transitions happened and
/// never under the connection's internal lock, so they may call back into
/// the connection. A slow callback delays later events but not the
/// connection itself.
pub trait ConnectionListener: Send + Sync + 'static {
    /// The link opened
    fn on_connect(&self) {}

    /// An open link closed, unexpectedly or through `close()`
    fn on_disconnect(&self, _reason: &str) {}

    /// A failure occurred
    fn on_error(&self, _event: &ErrorEvent) {}

    /// A reconnect attempt was scheduled
    fn on_reconnecting(&self, _event: &ReconnectingEvent) {}

    /// A payload arrived
    fn on_message(&self, _payload: Payload) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ConnectionListener for NoopListener {}

/// Forwards every callback into a channel as a [`ConnectionEvent`]
impl ConnectionListener for mpsc::UnboundedSender<ConnectionEvent> {
    fn on_connect(&self) {
        let _ = self.send(ConnectionEvent::Connected);
    }

    fn on_disconnect(&self, reason: &str) {
        let _ = self.send(ConnectionEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    fn on_error(&self, event: &ErrorEvent) {
        let _ = self.send(ConnectionEvent::Error(event.clone()));
    }

    fn on_reconnecting(&self, event: &ReconnectingEvent) {
        let _ = self.send(ConnectionEvent::Reconnecting(event.clone()));
    }

    fn on_message(&self, payload: Payload) {
        let _ = self.send(ConnectionEvent::Message(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_listener_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        ConnectionEvent::Connected.dispatch(&tx);
        ConnectionEvent::Message("hi".into()).dispatch(&tx);
        ConnectionEvent::Error(ErrorEvent {
            kind: ErrorKind::Timeout,
            reason: "slow".into(),
            attempt_number: 2,
        })
        .dispatch(&tx);

        assert_eq!(rx.try_recv().unwrap(), ConnectionEvent::Connected);
        assert_eq!(rx.try_recv().unwrap(), ConnectionEvent::Message("hi".into()));
        match rx.try_recv().unwrap() {
            ConnectionEvent::Error(e) => {
                assert_eq!(e.kind, ErrorKind::Timeout);
                assert_eq!(e.attempt_number, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ConnectionEvent::Connected.dispatch(&tx);
        NoopListener.on_message("ignored".into());
    }
}
