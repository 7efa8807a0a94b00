//! Resilient connection facade
//!
//! Keeps one logical connection alive over a series of links: failed
//! attempts and dropped links are retried with exponential backoff, payloads
//! sent while the link is down are queued and flushed in order on the next
//! open, and lifecycle events are reported to a [`ConnectionListener`].
//!
//! All state lives behind a single lock so transitions never interleave.
//! Background work (connection attempts, link readers, backoff timers) is
//! tagged with the epoch it was started in; `close()`, `force_reconnect()`
//! and link loss advance the epoch and cancel its token, which turns every
//! older task into a no-op.
//!
//! Listener events are queued while the lock is held and delivered by one
//! dispatcher task, so observers see them in transition order and callbacks
//! never run under the lock.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tether_core::config::ConnectionConfig;
use tether_core::{
    ConnectionError, ConnectionState, ConnectionStatus, Payload, StateTransitionRecord,
    TetherError, TransitionMetadata,
};

use crate::link::{Connector, Link, LinkEvent, LinkSink, WebSocketConnector};
use crate::listener::{ConnectionEvent, ConnectionListener, ErrorEvent, ReconnectingEvent};
use crate::queue::PendingMessageQueue;
use crate::reconnect::BackoffScheduler;
use crate::tracker::{ConnectionStatistics, ConnectionStateTracker};

/// A self-healing connection to one target
///
/// Must be created within a Tokio runtime. Dropping it closes the current
/// link and stops all background work; events emitted before the drop are
/// still delivered, nothing is emitted for the drop itself.
pub struct ResilientConnection {
    shared: Arc<Shared>,
}

struct Shared {
    target: String,
    config: ConnectionConfig,
    scheduler: BackoffScheduler,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    attempts: u32,
    epoch: u64,
    cancel: CancellationToken,
    queue: PendingMessageQueue,
    tracker: ConnectionStateTracker,
    sink: Option<Box<dyn LinkSink>>,
    pending_connect: Option<oneshot::Sender<Result<(), TetherError>>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Inner {
    fn transition(&mut self, to: ConnectionState, metadata: TransitionMetadata) {
        tracing::debug!(from = %self.state, to = %to, attempt = self.attempts, "State transition");
        self.state = to;
        self.tracker.record_state(to, metadata);
    }

    /// Invalidate all background work of the current epoch
    fn advance_epoch(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.epoch += 1;
    }

    /// Close the current link, queueing again whatever it failed to write
    fn close_sink(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let unsent = sink.take_unsent();
            if !unsent.is_empty() {
                tracing::debug!("Re-queueing {} payloads the link did not write", unsent.len());
                self.queue.requeue_front(unsent);
            }
            sink.close();
        }
    }

    /// Queue an event for the listener, in transition order
    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, err: &TetherError) {
        self.emit(ConnectionEvent::Error(ErrorEvent {
            kind: err.kind(),
            reason: err.to_string(),
            attempt_number: self.attempts,
        }));
    }
}

impl ResilientConnection {
    /// Create a connection to `target` using `connector` for each attempt
    ///
    /// Fails if the configuration does not validate. Nothing happens on the
    /// network until [`connect`](Self::connect) is called.
    pub fn new(
        target: impl Into<String>,
        connector: impl Connector,
        config: ConnectionConfig,
        listener: impl ConnectionListener,
    ) -> Result<Self, TetherError> {
        config.validate()?;

        let (events, mut event_rx) = mpsc::unbounded_channel::<ConnectionEvent>();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                event.dispatch(&listener);
            }
        });

        let inner = Inner {
            state: ConnectionState::Idle,
            attempts: 0,
            epoch: 0,
            cancel: CancellationToken::new(),
            queue: PendingMessageQueue::new(),
            tracker: ConnectionStateTracker::new(config.history_capacity),
            sink: None,
            pending_connect: None,
            events,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                target: target.into(),
                scheduler: BackoffScheduler::from_config(&config.backoff),
                config,
                connector: Arc::new(connector),
                inner: Mutex::new(inner),
            }),
        })
    }

    /// Create a connection to a `ws://` or `wss://` URL
    pub fn websocket(
        url: impl Into<String>,
        config: ConnectionConfig,
        listener: impl ConnectionListener,
    ) -> Result<Self, TetherError> {
        Self::new(url, WebSocketConnector::new(), config, listener)
    }

    /// Start connecting and wait for the first attempt to finish
    ///
    /// Resolves once the link is open. If the very first attempt fails or
    /// times out the error is returned, but automatic reconnection carries on
    /// in the background and later outcomes are only reported to the
    /// listener. Returns immediately when already open, and fails with
    /// [`TetherError::InvalidState`] in any state other than `Idle`.
    pub async fn connect(&self) -> Result<(), TetherError> {
        let rx = {
            let mut inner = self.shared.lock();
            match inner.state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Idle => {}
                state => return Err(TetherError::InvalidState { state }),
            }

            let (tx, rx) = oneshot::channel();
            inner.pending_connect = Some(tx);
            inner.transition(
                ConnectionState::Connecting,
                TransitionMetadata::reason("connect requested"),
            );
            self.shared.spawn_attempt(&inner);
            rx
        };

        rx.await.unwrap_or(Err(TetherError::Closed))
    }

    /// Send a payload, queueing it while the link is down
    ///
    /// Never fails: a write error on an open link re-queues the payload at
    /// the tail and triggers a reconnect.
    pub fn send(&self, payload: impl Into<Payload>) {
        let payload = payload.into();
        let mut inner = self.shared.lock();
        let write = match (inner.state, inner.sink.as_mut()) {
            (ConnectionState::Open, Some(sink)) => Some(sink.send(&payload)),
            _ => None,
        };

        match write {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::warn!("Send failed on open link, re-queueing: {}", e);
                let reason = e.to_string();
                inner.queue.enqueue(payload);
                self.shared
                    .handle_link_lost(&mut inner, reason, Some(TetherError::Connection(e)));
            }
            None => {
                inner.queue.enqueue(payload);
                tracing::trace!(
                    "Queued payload while {} ({} pending)",
                    inner.state,
                    inner.queue.len()
                );
            }
        }
    }

    /// Close the connection and stop reconnecting
    ///
    /// Cancels any pending reconnect timer and in-flight attempt. Queued
    /// payloads are kept. Only [`force_reconnect`](Self::force_reconnect)
    /// leaves the closed state.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        if inner.state.is_closed() {
            return;
        }
        let was_open = inner.state == ConnectionState::Open;

        inner.advance_epoch();
        inner.transition(
            ConnectionState::Closing,
            TransitionMetadata::reason("close requested"),
        );
        inner.close_sink();
        inner.transition(
            ConnectionState::Closed,
            TransitionMetadata::reason("closed by caller"),
        );
        if let Some(tx) = inner.pending_connect.take() {
            let _ = tx.send(Err(TetherError::Closed));
        }

        tracing::info!("Connection to {} closed", self.shared.target);
        if was_open {
            inner.emit(ConnectionEvent::Disconnected {
                reason: "closed by caller".to_string(),
            });
        }
    }

    /// Drop the current link, reset the attempt counter and connect again
    ///
    /// Works from every state, including `Failed` and `Closed`.
    pub fn force_reconnect(&self) {
        let mut inner = self.shared.lock();
        if inner.state == ConnectionState::Open {
            inner.emit(ConnectionEvent::Disconnected {
                reason: "forced reconnect".to_string(),
            });
        }

        inner.advance_epoch();
        inner.close_sink();
        inner.attempts = 0;
        inner.transition(
            ConnectionState::Connecting,
            TransitionMetadata::reason("forced reconnect"),
        );
        tracing::info!("Forcing reconnect to {}", self.shared.target);
        self.shared.spawn_attempt(&inner);
    }

    /// Snapshot of the current state
    pub fn status(&self) -> ConnectionStatus {
        let inner = self.shared.lock();
        ConnectionStatus {
            state: inner.state,
            attempt_count: inner.attempts,
            max_attempts: self.shared.config.max_attempts,
            queue_length: inner.queue.len(),
            is_closed: inner.state.is_closed(),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// The most recent `n` state transitions, newest last
    pub fn history(&self, n: usize) -> Vec<StateTransitionRecord> {
        self.shared.lock().tracker.history(n)
    }

    /// Statistics over the retained transition history
    pub fn statistics(&self) -> ConnectionStatistics {
        self.shared.lock().tracker.statistics()
    }

    /// Address passed to the connector
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    /// Configuration in use
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }
}

impl Drop for ResilientConnection {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.advance_epoch();
        inner.close_sink();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one connection attempt in the background
    fn spawn_attempt(self: &Arc<Self>, inner: &Inner) {
        let epoch = inner.epoch;
        let cancel = inner.cancel.clone();
        let weak = Arc::downgrade(self);
        let connector = Arc::clone(&self.connector);
        let target = self.target.clone();
        let timeout = self.config.connect_timeout;

        tracing::debug!("Connecting to {} (attempt {})", target, inner.attempts);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = tokio::time::timeout(timeout, connector.connect(&target)) => outcome,
            };

            let result = match outcome {
                Ok(Ok(link)) => Ok(link),
                Ok(Err(e)) => Err(TetherError::Connection(e)),
                Err(_) => Err(TetherError::Timeout(timeout)),
            };

            if let Some(shared) = weak.upgrade() {
                shared.on_attempt_finished(epoch, result);
            }
        });
    }

    fn on_attempt_finished(self: &Arc<Self>, epoch: u64, result: Result<Link, TetherError>) {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
            if let Ok(mut link) = result {
                link.sink.close();
            }
            return;
        }

        match result {
            Ok(link) => self.handle_open(&mut inner, link),
            Err(err) => self.handle_attempt_failure(&mut inner, err),
        }
    }

    fn handle_open(self: &Arc<Self>, inner: &mut Inner, link: Link) {
        let Link { mut sink, events } = link;

        inner.attempts = 0;
        inner.transition(ConnectionState::Open, TransitionMetadata::reason("link opened"));
        inner.emit(ConnectionEvent::Connected);
        tracing::info!("Connected to {}", self.target);
        self.spawn_reader(inner, events);

        let outcome = inner.queue.flush(|payload| sink.send(payload));
        inner.sink = Some(sink);
        match outcome.failure {
            None => {
                if outcome.delivered > 0 {
                    tracing::debug!("Flushed {} queued payloads", outcome.delivered);
                }
            }
            Some(e) => {
                tracing::warn!(
                    "Flush stopped after {} payloads, {} still queued: {}",
                    outcome.delivered,
                    inner.queue.len(),
                    e
                );
                let reason = e.to_string();
                self.handle_link_lost(inner, reason, Some(TetherError::Connection(e)));
            }
        }

        // The link did open, even if the backlog could not be written
        if let Some(tx) = inner.pending_connect.take() {
            let _ = tx.send(Ok(()));
        }
    }

    fn handle_attempt_failure(self: &Arc<Self>, inner: &mut Inner, err: TetherError) {
        let kind = err.kind();
        let reason = err.to_string();
        tracing::warn!("Connection attempt to {} failed: {}", self.target, reason);

        inner.emit_error(&err);
        if let Some(tx) = inner.pending_connect.take() {
            let _ = tx.send(Err(err));
        }

        let attempt = inner.attempts;
        self.schedule_reconnect(inner, TransitionMetadata::failure(kind, reason, attempt));
    }

    /// Tear down an open link and start recovering
    fn handle_link_lost(
        self: &Arc<Self>,
        inner: &mut Inner,
        reason: String,
        error: Option<TetherError>,
    ) {
        inner.advance_epoch();
        inner.close_sink();
        tracing::warn!("Link to {} lost: {}", self.target, reason);

        inner.emit(ConnectionEvent::Disconnected {
            reason: reason.clone(),
        });
        let metadata = match error {
            Some(err) => {
                inner.emit_error(&err);
                TransitionMetadata::failure(err.kind(), err.to_string(), inner.attempts)
            }
            None => TransitionMetadata::reason(reason),
        };

        self.schedule_reconnect(inner, metadata);
    }

    /// Arm the backoff timer, or give up once the attempt cap is reached
    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner, metadata: TransitionMetadata) {
        if inner.state.is_closed() {
            return;
        }

        let max_attempts = self.config.max_attempts;
        if inner.attempts >= max_attempts {
            inner.transition(ConnectionState::Reconnecting, metadata);

            let err = TetherError::MaxAttemptsExceeded {
                attempts: inner.attempts,
            };
            tracing::error!("Connection to {} failed: {}", self.target, err);
            inner.transition(
                ConnectionState::Failed,
                TransitionMetadata::failure(err.kind(), err.to_string(), inner.attempts),
            );
            inner.emit_error(&err);
            return;
        }

        inner.attempts += 1;
        let attempt = NonZeroU32::new(inner.attempts).unwrap_or(NonZeroU32::MIN);
        let delay = self.scheduler.next_delay(attempt);
        inner.transition(
            ConnectionState::Reconnecting,
            metadata.with_attempt(inner.attempts),
        );
        inner.emit(ConnectionEvent::Reconnecting(ReconnectingEvent {
            attempt_number: inner.attempts,
            next_delay: delay,
            max_attempts,
        }));
        tracing::info!(
            "Reconnecting to {} in {:?} (attempt {}/{})",
            self.target,
            delay,
            inner.attempts,
            max_attempts
        );

        let epoch = inner.epoch;
        let cancel = inner.cancel.clone();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(shared) = weak.upgrade() {
                shared.on_backoff_elapsed(epoch);
            }
        });
    }

    fn on_backoff_elapsed(self: &Arc<Self>, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.state != ConnectionState::Reconnecting {
            return;
        }
        let attempt = inner.attempts;
        inner.transition(
            ConnectionState::Connecting,
            TransitionMetadata::reason("backoff elapsed").with_attempt(attempt),
        );
        self.spawn_attempt(&inner);
    }

    /// Forward link events until the link ends or the epoch moves on
    fn spawn_reader(
        self: &Arc<Self>,
        inner: &Inner,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let epoch = inner.epoch;
        let cancel = inner.cancel.clone();
        let weak: Weak<Shared> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => event,
                };
                let Some(shared) = weak.upgrade() else {
                    return;
                };

                match event {
                    Some(LinkEvent::Message(payload)) => shared.deliver_message(epoch, payload),
                    Some(LinkEvent::Error(error)) => {
                        let err =
                            TetherError::Connection(ConnectionError::Transport(error.clone()));
                        shared.on_link_ended(epoch, error, Some(err));
                        return;
                    }
                    Some(LinkEvent::Closed { reason }) => {
                        shared.on_link_ended(epoch, reason, None);
                        return;
                    }
                    None => {
                        shared.on_link_ended(epoch, "link dropped".to_string(), None);
                        return;
                    }
                }
            }
        });
    }

    fn deliver_message(&self, epoch: u64, payload: Payload) {
        let inner = self.lock();
        if inner.epoch == epoch && inner.state == ConnectionState::Open {
            inner.emit(ConnectionEvent::Message(payload));
        }
    }

    fn on_link_ended(self: &Arc<Self>, epoch: u64, reason: String, error: Option<TetherError>) {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.state != ConnectionState::Open {
            return;
        }
        self.handle_link_lost(&mut inner, reason, error);
    }
}
