//! WebSocket links over tokio-tungstenite
//!
//! Each link runs a reader task and a writer task. The reader forwards
//! frames and hands its terminal event to the writer, which reports it only
//! after stashing whatever it could not write, so the owner always finds the
//! unsent payloads by the time it hears the link ended.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use tether_core::{ConnectionError, Payload};

use super::{Connector, Link, LinkEvent, LinkSink};

/// Opens WebSocket links (`ws://` or `wss://` URLs)
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, target: &str) -> Result<Link, ConnectionError> {
        tracing::debug!("Opening WebSocket to {}", target);
        let (stream, _response) = tokio_tungstenite::connect_async(target)
            .await
            .map_err(|e| ConnectionError::Refused(format!("{}: {}", target, e)))?;

        let (write, mut read) = stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (ended_tx, ended_rx) = oneshot::channel();
        let unsent = Unsent::default();

        tokio::spawn(run_writer(
            write,
            out_rx,
            ended_rx,
            event_tx.clone(),
            unsent.clone(),
        ));

        // Reader: forwards frames until the peer closes or the owner goes away
        tokio::spawn(async move {
            let ended = loop {
                let frame = tokio::select! {
                    _ = event_tx.closed() => return,
                    frame = read.next() => frame,
                };

                let event = match frame {
                    Some(Ok(Message::Text(text))) => LinkEvent::Message(Payload::Text(text)),
                    Some(Ok(Message::Binary(data))) => LinkEvent::Message(Payload::from(data)),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| {
                                format!("closed by peer ({}): {}", u16::from(f.code), f.reason)
                            })
                            .unwrap_or_else(|| "closed by peer".to_string());
                        break LinkEvent::Closed { reason };
                    }
                    // Ping/pong are answered by tungstenite itself
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break LinkEvent::Error(e.to_string()),
                    None => {
                        break LinkEvent::Closed {
                            reason: "stream ended".to_string(),
                        }
                    }
                };

                if event_tx.send(event).is_err() {
                    return;
                }
            };
            let _ = ended_tx.send(ended);
        });

        Ok(Link {
            sink: Box::new(WebSocketSink {
                tx: Some(out_tx),
                unsent,
            }),
            events: event_rx,
        })
    }
}

#[derive(Debug)]
enum Outbound {
    Payload(Payload),
    Close,
}

/// Payloads the writer gave up on, shared with the sink
#[derive(Debug, Clone, Default)]
struct Unsent(Arc<Mutex<Vec<Payload>>>);

impl Unsent {
    fn lock(&self) -> MutexGuard<'_, Vec<Payload>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn to_message(payload: &Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.clone()),
        Payload::Binary(data) => Message::Binary(data.to_vec()),
    }
}

/// Write queued payloads until the sink closes, a write fails or the reader
/// reports the end of the link
///
/// On failure every payload not written is stashed in `unsent` before the
/// terminal event is sent.
async fn run_writer<S>(
    mut write: S,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    mut ended_rx: oneshot::Receiver<LinkEvent>,
    events: mpsc::UnboundedSender<LinkEvent>,
    unsent: Unsent,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut failed = Vec::new();
    let terminal = loop {
        tokio::select! {
            biased;
            ended = &mut ended_rx => {
                break ended.unwrap_or_else(|_| LinkEvent::Closed {
                    reason: "reader stopped".to_string(),
                });
            }
            outbound = out_rx.recv() => match outbound {
                Some(Outbound::Payload(payload)) => {
                    if let Err(e) = write.send(to_message(&payload)).await {
                        failed.push(payload);
                        break LinkEvent::Error(format!("write failed: {}", e));
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.close().await;
                    return;
                }
            },
        }
    };

    // Refuse further sends, then collect what was already accepted
    out_rx.close();
    while let Ok(outbound) = out_rx.try_recv() {
        if let Outbound::Payload(payload) = outbound {
            failed.push(payload);
        }
    }
    if !failed.is_empty() {
        tracing::debug!("{} payloads left unwritten", failed.len());
        unsent.lock().extend(failed);
    }
    let _ = events.send(terminal);
}

/// Write half backed by the writer task
struct WebSocketSink {
    tx: Option<mpsc::UnboundedSender<Outbound>>,
    unsent: Unsent,
}

impl LinkSink for WebSocketSink {
    fn send(&mut self, payload: &Payload) -> Result<(), ConnectionError> {
        let tx = self.tx.as_ref().ok_or(ConnectionError::LinkClosed)?;
        tx.send(Outbound::Payload(payload.clone()))
            .map_err(|_| ConnectionError::SendFailed("WebSocket writer stopped".to_string()))
    }

    fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Outbound::Close);
        }
    }

    fn take_unsent(&mut self) -> Vec<Payload> {
        std::mem::take(&mut *self.unsent.lock())
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        self.close();
    }
}
