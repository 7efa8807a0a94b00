//! Transport links
//!
//! A [`Connector`] opens one [`Link`] per connection attempt. The resilient
//! connection owns the link exclusively: it writes through the
//! [`LinkSink`] and consumes [`LinkEvent`]s until the link ends.

mod memory;
mod websocket;

pub use memory::{AcceptMode, MemoryConnector, MemoryServer};
pub use websocket::WebSocketConnector;

use async_trait::async_trait;
use tether_core::{ConnectionError, Payload};
use tokio::sync::mpsc;

/// Something that happened on an open link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Payload received from the remote end
    Message(Payload),
    /// Transport error; the link is unusable afterwards
    Error(String),
    /// The remote end closed the link
    Closed { reason: String },
}

/// Write half of a link
pub trait LinkSink: Send {
    /// Hand a payload to the transport without waiting for it to be written
    fn send(&mut self, payload: &Payload) -> Result<(), ConnectionError>;

    /// Close the link; further sends fail
    fn close(&mut self);

    /// Payloads accepted by [`send`](Self::send) that the link failed to
    /// write, oldest first
    ///
    /// Called when the link is torn down so they can be queued again.
    fn take_unsent(&mut self) -> Vec<Payload> {
        Vec::new()
    }
}

/// An open link
pub struct Link {
    /// Write half
    pub sink: Box<dyn LinkSink>,
    /// Inbound events, ending when the link goes away
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens links to a target address
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Attempt a single connection
    ///
    /// The returned future may be dropped at any point (for example when the
    /// connect timeout elapses), which must abort the attempt.
    async fn connect(&self, target: &str) -> Result<Link, ConnectionError>;
}
