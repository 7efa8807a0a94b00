//! In-process links with a scriptable remote end
//!
//! [`MemoryServer`] plays the remote side: it decides how each connection
//! attempt ends, records everything written to it, and can push payloads,
//! drop the link, or make writes fail. Useful for tests and for embedding
//! the resilient connection without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_core::{ConnectionError, Payload};

use super::{Connector, Link, LinkEvent, LinkSink};

/// How the server answers a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptMode {
    /// Open the link
    Accept,
    /// Fail the attempt immediately
    Refuse,
    /// Never answer; the attempt only ends when the caller gives up
    Hang,
}

#[derive(Debug)]
struct ActiveLink {
    id: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
}

#[derive(Debug)]
struct ServerState {
    script: VecDeque<AcceptMode>,
    default_mode: AcceptMode,
    attempts: usize,
    targets: Vec<String>,
    next_link_id: u64,
    active: Option<ActiveLink>,
    received: Vec<Payload>,
    failing_writes: usize,
    holding: bool,
    held: Vec<(u64, Payload)>,
}

/// Scriptable remote end for [`MemoryConnector`]
#[derive(Debug, Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    /// Create a server that accepts every attempt
    pub fn new() -> Self {
        Self::with_default(AcceptMode::Accept)
    }

    /// Create a server answering unscripted attempts with `mode`
    pub fn with_default(mode: AcceptMode) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                script: VecDeque::new(),
                default_mode: mode,
                attempts: 0,
                targets: Vec::new(),
                next_link_id: 0,
                active: None,
                received: Vec::new(),
                failing_writes: 0,
                holding: false,
                held: Vec::new(),
            })),
        }
    }

    /// Connector whose attempts land on this server
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }

    /// Queue answers for the next attempts, before falling back to the default
    pub fn script(&self, modes: impl IntoIterator<Item = AcceptMode>) {
        self.lock().script.extend(modes);
    }

    /// Change the answer for unscripted attempts
    pub fn set_default(&self, mode: AcceptMode) {
        self.lock().default_mode = mode;
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Accept writes without delivering them, like a stalled socket buffer
    ///
    /// Held payloads are handed back by the sink if its link ends first.
    pub fn hold_writes(&self) {
        self.lock().holding = true;
    }

    /// Stop holding writes and deliver what the open link still holds
    pub fn release_writes(&self) {
        let mut state = self.lock();
        state.holding = false;
        let active = state.active.as_ref().map(|l| l.id);
        let held = std::mem::take(&mut state.held);
        for (id, payload) in held {
            if Some(id) == active {
                state.received.push(payload);
            } else {
                state.held.push((id, payload));
            }
        }
    }

    /// Number of connection attempts seen so far
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Targets of every attempt, in order
    pub fn targets(&self) -> Vec<String> {
        self.lock().targets.clone()
    }

    /// Payloads written by the client, in delivery order
    pub fn received(&self) -> Vec<Payload> {
        self.lock().received.clone()
    }

    /// Whether a link is currently open
    pub fn is_connected(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Send a payload to the client over the open link
    ///
    /// Returns false when no link is open.
    pub fn push(&self, payload: impl Into<Payload>) -> bool {
        let state = self.lock();
        match &state.active {
            Some(link) => link.events.send(LinkEvent::Message(payload.into())).is_ok(),
            None => false,
        }
    }

    /// Close the open link from the server side
    pub fn drop_link(&self, reason: &str) -> bool {
        self.end_link(LinkEvent::Closed {
            reason: reason.to_string(),
        })
    }

    /// Fail the open link with a transport error
    pub fn fail_link(&self, error: &str) -> bool {
        self.end_link(LinkEvent::Error(error.to_string()))
    }

    fn end_link(&self, event: LinkEvent) -> bool {
        match self.lock().active.take() {
            Some(link) => {
                let _ = link.events.send(event);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Connector for [`MemoryServer`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &str) -> Result<Link, ConnectionError> {
        let mode = {
            let mut state = self.server.lock();
            state.attempts += 1;
            state.targets.push(target.to_string());
            let default_mode = state.default_mode;
            state.script.pop_front().unwrap_or(default_mode)
        };

        match mode {
            AcceptMode::Refuse => Err(ConnectionError::Refused(format!(
                "{}: connection refused",
                target
            ))),
            AcceptMode::Hang => std::future::pending().await,
            AcceptMode::Accept => {
                let (event_tx, event_rx) = mpsc::unbounded_channel();
                let mut state = self.server.lock();
                let id = state.next_link_id;
                state.next_link_id += 1;
                state.active = Some(ActiveLink {
                    id,
                    events: event_tx,
                });

                Ok(Link {
                    sink: Box::new(MemorySink {
                        server: self.server.clone(),
                        id,
                        closed: false,
                    }),
                    events: event_rx,
                })
            }
        }
    }
}

/// Write half of an in-process link
struct MemorySink {
    server: MemoryServer,
    id: u64,
    closed: bool,
}

impl LinkSink for MemorySink {
    fn send(&mut self, payload: &Payload) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::LinkClosed);
        }

        let mut state = self.server.lock();
        if state.active.as_ref().map(|l| l.id) != Some(self.id) {
            return Err(ConnectionError::SendFailed("link dropped by server".to_string()));
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(ConnectionError::SendFailed("injected write failure".to_string()));
        }
        if state.holding {
            state.held.push((self.id, payload.clone()));
        } else {
            state.received.push(payload.clone());
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut state = self.server.lock();
        if state.active.as_ref().map(|l| l.id) == Some(self.id) {
            state.active = None;
        }
    }

    fn take_unsent(&mut self) -> Vec<Payload> {
        let mut state = self.server.lock();
        let (mine, others) = std::mem::take(&mut state.held)
            .into_iter()
            .partition::<Vec<_>, _>(|(id, _)| *id == self.id);
        state.held = others;
        mine.into_iter().map(|(_, payload)| payload).collect()
    }
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        self.close();
    }
}
