//! # Connection Transport
//!
//! Owns one WebSocket link to the speech backend per session generation.
//! The link runs as a background task: a single select loop services the
//! outbound queue, the inbound stream, and the shutdown signal, so all
//! writes are strictly ordered and lifecycle events are emitted at most
//! once per actual transition.
//!
//! ## Lifecycle events (per link, in order):
//! 1. `Opened`: exactly once, when the handshake completes
//! 2. `Failed { .. }`: at most once, on a socket-level error
//! 3. `Closed { .. }`: exactly once, always last
//!
//! Every event is tagged with the session generation it belongs to; the
//! state machine discards events from superseded links. The transport never
//! reconnects on its own; reconnection is a caller decision.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::protocol::{self, Inbound, InboundAudio, Outbound, ServerMessage};
use crate::session::SessionEvent;

/// Link-level events delivered onto the session event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The socket opened and is writable.
    Opened,

    /// A decoded control/transcript message arrived.
    Message(ServerMessage),

    /// A decoded binary audio chunk arrived.
    Audio(InboundAudio),

    /// An inbound frame failed to decode; the frame was dropped.
    DecodeError(String),

    /// The socket failed (connect error or mid-session drop).
    Failed(String),

    /// The link is gone. Terminal for this generation.
    Closed { reason: Option<String> },
}

/// Control handle for one spawned link.
///
/// Dropping the handle (without `close()`) also ends the link: the worker
/// observes the closed shutdown channel and tears down.
pub struct TransportHandle {
    generation: u64,
    outbound: mpsc::Sender<Outbound>,
    shutdown: watch::Sender<bool>,
}

impl TransportHandle {
    /// Queue a frame for ordered transmission.
    ///
    /// Fails silently into a warning when the link is gone or the queue is
    /// full; callers are expected to check connection status before
    /// sending anything critical.
    pub fn send(&self, frame: Outbound) {
        if self.outbound.try_send(frame).is_err() {
            tracing::warn!(
                generation = self.generation,
                "dropping outbound frame; link not writable"
            );
        }
    }

    /// Close the link. Idempotent; queued-but-unsent frames are discarded.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Seam between the session and the concrete link implementation, so the
/// state machine can be driven by a scripted link in tests.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        url: &str,
        generation: u64,
        events: mpsc::Sender<SessionEvent>,
        queue_capacity: usize,
    ) -> TransportHandle;
}

/// Production connector: one tokio-tungstenite WebSocket per link.
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        url: &str,
        generation: u64,
        events: mpsc::Sender<SessionEvent>,
        queue_capacity: usize,
    ) -> TransportHandle {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_link(
            url.to_string(),
            generation,
            events,
            outbound_rx,
            shutdown_rx,
        ));

        TransportHandle {
            generation,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        }
    }
}

async fn emit(events: &mpsc::Sender<SessionEvent>, generation: u64, event: TransportEvent) {
    // The session owning this link may already be gone; that's fine.
    let _ = events
        .send(SessionEvent::Transport { generation, event })
        .await;
}

/// The link worker: dial, then service outbound/inbound/shutdown until the
/// link ends, emitting lifecycle events along the way.
async fn run_link(
    url: String,
    generation: u64,
    events: mpsc::Sender<SessionEvent>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!(generation, url = %url, "dialing speech backend");

    let ws = tokio::select! {
        _ = shutdown_rx.changed() => {
            emit(&events, generation, TransportEvent::Closed {
                reason: Some("connect cancelled".to_string()),
            })
            .await;
            return;
        }
        result = tokio_tungstenite::connect_async(&url) => match result {
            Ok((ws, _response)) => ws,
            Err(err) => {
                emit(&events, generation, TransportEvent::Failed(err.to_string())).await;
                emit(&events, generation, TransportEvent::Closed {
                    reason: Some(err.to_string()),
                })
                .await;
                return;
            }
        },
    };

    emit(&events, generation, TransportEvent::Opened).await;

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            // Shutdown wins ties with queued traffic: queued frames are
            // discarded, not flushed.
            changed = shutdown_rx.changed() => {
                let requested = changed.is_err() || *shutdown_rx.borrow();
                if requested {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    emit(&events, generation, TransportEvent::Closed {
                        reason: Some("closed by client".to_string()),
                    })
                    .await;
                    return;
                }
            }

            maybe_frame = outbound_rx.recv() => {
                match maybe_frame {
                    Some(frame) => match protocol::encode_outbound(&frame) {
                        Ok(message) => {
                            if let Err(err) = sink.send(message).await {
                                emit(&events, generation, TransportEvent::Failed(err.to_string())).await;
                                emit(&events, generation, TransportEvent::Closed {
                                    reason: Some(err.to_string()),
                                })
                                .await;
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "unencodable outbound frame dropped");
                        }
                    },
                    None => {
                        // Session dropped the handle entirely
                        let _ = sink.send(WsMessage::Close(None)).await;
                        emit(&events, generation, TransportEvent::Closed { reason: None }).await;
                        return;
                    }
                }
            }

            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        emit(&events, generation, TransportEvent::Closed { reason }).await;
                        return;
                    }
                    Some(Ok(message)) => match protocol::decode_incoming(message) {
                        Ok(Some(Inbound::Message(parsed))) => {
                            emit(&events, generation, TransportEvent::Message(parsed)).await;
                        }
                        Ok(Some(Inbound::Audio(chunk))) => {
                            emit(&events, generation, TransportEvent::Audio(chunk)).await;
                        }
                        Ok(None) => {} // WebSocket-level ping/pong
                        Err(err) => {
                            emit(&events, generation, TransportEvent::DecodeError(err.to_string())).await;
                        }
                    },
                    Some(Err(err)) => {
                        emit(&events, generation, TransportEvent::Failed(err.to_string())).await;
                        emit(&events, generation, TransportEvent::Closed {
                            reason: Some(err.to_string()),
                        })
                        .await;
                        return;
                    }
                    None => {
                        emit(&events, generation, TransportEvent::Closed {
                            reason: Some("connection closed by peer".to_string()),
                        })
                        .await;
                        return;
                    }
                }
            }
        }
    }
}

/// Test double: records every spawned link and exposes its channels so
/// tests can script inbound events and inspect outbound frames.
#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    pub struct FakeLink {
        pub generation: u64,
        pub events: mpsc::Sender<SessionEvent>,
        pub outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
        pub shutdown_rx: watch::Receiver<bool>,
    }

    impl FakeLink {
        /// Inject a transport event as if this link produced it.
        pub async fn push(&self, event: TransportEvent) {
            let _ = self
                .events
                .send(SessionEvent::Transport {
                    generation: self.generation,
                    event,
                })
                .await;
        }

        pub fn take_outbound(&self) -> mpsc::Receiver<Outbound> {
            self.outbound_rx
                .lock()
                .unwrap()
                .take()
                .expect("outbound receiver already taken")
        }

        pub fn close_requested(&self) -> bool {
            *self.shutdown_rx.borrow()
        }
    }

    #[derive(Default)]
    pub struct FakeConnector {
        links: Arc<Mutex<Vec<Arc<FakeLink>>>>,
    }

    impl FakeConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn spawn_count(&self) -> usize {
            self.links.lock().unwrap().len()
        }

        pub fn link(&self, index: usize) -> Arc<FakeLink> {
            Arc::clone(&self.links.lock().unwrap()[index])
        }

        /// Handle on the link registry that stays valid after the connector
        /// is boxed into a session.
        pub fn links(&self) -> Arc<Mutex<Vec<Arc<FakeLink>>>> {
            Arc::clone(&self.links)
        }
    }

    impl Connector for FakeConnector {
        fn connect(
            &self,
            _url: &str,
            generation: u64,
            events: mpsc::Sender<SessionEvent>,
            queue_capacity: usize,
        ) -> TransportHandle {
            let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            self.links.lock().unwrap().push(Arc::new(FakeLink {
                generation,
                events,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                shutdown_rx,
            }));

            TransportHandle {
                generation,
                outbound: outbound_tx,
                shutdown: shutdown_tx,
            }
        }
    }
}
