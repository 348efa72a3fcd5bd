//! Push Channel Listener
//!
//! A reconnecting duplex-channel consumer modelled as an explicit state
//! machine:
//!
//! ```text
//! Closed → Connecting → Open → (error/close) → Backoff(n) → Connecting → …
//! ```
//!
//! The terminal `Closed` state is reached only through [`PushListener::shutdown`]
//! (logout); every unexpected close schedules a reconnect through the
//! bounded jittered [`Backoff`] policy.
//!
//! Inbound frames are JSON `{ "type": ..., ...payload }`. Parse failures
//! are discarded with a warning — a malformed push frame must never crash
//! the client. Recognized entity-change events run through the normalizer
//! and merge engine exactly as a fetch response would, so delivery is
//! idempotent: a frame for an entity already present is a no-op.

/// Bounded exponential reconnect backoff
pub mod backoff;

pub use backoff::Backoff;

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::store::{SharedStore, Store};
use crate::transport::{FetchPayload, TransportError};

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not running (initial, or terminal after shutdown)
    Closed,
    /// Dialing the server
    Connecting,
    /// Connected and consuming frames
    Open,
    /// Waiting out the reconnect delay after an unexpected close
    Backoff {
        /// Consecutive failed attempts so far
        attempt: u32,
    },
}

/// An established push connection: a stream of raw text frames.
///
/// The transport layer owns the socket; the listener only sees frames. The
/// channel closing (sender dropped) signals the connection is gone.
pub struct PushConnection {
    /// Inbound frames
    pub frames: mpsc::Receiver<String>,
}

/// Dials push connections. Implemented by the transport layer; tests plug
/// in a mock that hands out channel-backed connections.
pub trait PushConnector: Send + Sync + 'static {
    /// Attempt to establish a connection
    fn connect(&self) -> BoxFuture<'static, Result<PushConnection, TransportError>>;
}

/// A recognized entity-change event from a push frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// `message:new` — a direct message arrived
    MessageNew(Value),
    /// `notification:new` — a notification arrived
    NotificationNew(Value),
    /// `post:update` — a post was created or changed
    PostUpdate(Value),
    /// `user:update` — a user profile changed
    UserUpdate(Value),
}

/// Parse a raw frame. `None` means the frame is malformed or its type is
/// unrecognized; both are silently droppable.
pub fn parse_frame(text: &str) -> Option<PushEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    let kind = value.get("type")?.as_str()?.to_string();
    match kind.as_str() {
        "message:new" => Some(PushEvent::MessageNew(value)),
        "notification:new" => Some(PushEvent::NotificationNew(value)),
        "post:update" => Some(PushEvent::PostUpdate(value)),
        "user:update" => Some(PushEvent::UserUpdate(value)),
        _ => {
            debug!(%kind, "ignoring unrecognized push event type");
            None
        }
    }
}

/// Apply one raw push frame to the store through the normalizer and merge
/// engine. Malformed frames are discarded.
pub fn apply_frame(store: &mut Store, text: &str) {
    let Some(event) = parse_frame(text) else {
        warn!("discarding unparseable or unrecognized push frame");
        return;
    };
    let payload = match event {
        PushEvent::MessageNew(value) => FetchPayload {
            messages: vec![value],
            ..FetchPayload::default()
        },
        PushEvent::NotificationNew(value) => FetchPayload {
            notifications: vec![value],
            ..FetchPayload::default()
        },
        PushEvent::PostUpdate(value) => FetchPayload {
            posts: vec![value],
            ..FetchPayload::default()
        },
        PushEvent::UserUpdate(value) => FetchPayload {
            users: vec![value],
            ..FetchPayload::default()
        },
    };
    store.apply_fetch(&payload);
}

/// Handle to the background push listener task.
pub struct PushListener {
    state_rx: watch::Receiver<ChannelState>,
    shutdown_tx: watch::Sender<bool>,
    // Option so shutdown can take the handle out from under Drop
    task: Option<tokio::task::JoinHandle<()>>,
}

impl PushListener {
    /// Spawn the listener. It dials immediately and keeps reconnecting
    /// until [`PushListener::shutdown`] is called.
    pub fn spawn(store: SharedStore, connector: Arc<dyn PushConnector>, config: CoreConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Closed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_loop(store, connector, config, state_tx, shutdown_rx));
        Self {
            state_rx,
            shutdown_tx,
            task: Some(task),
        }
    }

    /// The current channel state
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state transitions
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Stop the listener permanently (logout). The state machine lands in
    /// `Closed` with no further reconnect attempts.
    pub async fn shutdown(mut self) -> Result<(), CoreError> {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| CoreError::ChannelClosed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for PushListener {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_loop(
    store: SharedStore,
    connector: Arc<dyn PushConnector>,
    config: CoreConfig,
    state_tx: watch::Sender<ChannelState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::from_config(&config);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let _ = state_tx.send(ChannelState::Connecting);

        let connected = tokio::select! {
            result = connector.connect() => result,
            _ = shutdown_rx.changed() => break,
        };

        match connected {
            Ok(mut connection) => {
                info!("push channel open");
                let _ = state_tx.send(ChannelState::Open);
                backoff.reset();

                loop {
                    tokio::select! {
                        frame = connection.frames.recv() => match frame {
                            Some(text) => {
                                let mut guard = store.write().await;
                                apply_frame(&mut guard, &text);
                            }
                            None => {
                                warn!("push channel closed unexpectedly");
                                break;
                            }
                        },
                        _ = shutdown_rx.changed() => break,
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "push channel connect failed");
            }
        }

        if *shutdown_rx.borrow() {
            break;
        }

        let delay = backoff.next_delay();
        let _ = state_tx.send(ChannelState::Backoff {
            attempt: backoff.attempt(),
        });
        info!(attempt = backoff.attempt(), ?delay, "reconnecting push channel");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    let _ = state_tx.send(ChannelState::Closed);
    info!("push listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityId;
    use serde_json::json;

    #[test]
    fn test_parse_recognized_frame() {
        let frame = json!({ "type": "message:new", "id": "m1", "from_id": "a", "to_id": "b" });
        let event = parse_frame(&frame.to_string());
        assert!(matches!(event, Some(PushEvent::MessageNew(_))));
    }

    #[test]
    fn test_malformed_and_unknown_frames_are_dropped() {
        assert_eq!(parse_frame("{ not json"), None);
        assert_eq!(parse_frame("42"), None);
        assert_eq!(parse_frame(&json!({ "type": "party:started" }).to_string()), None);
        assert_eq!(parse_frame(&json!({ "id": "m1" }).to_string()), None);
    }

    #[test]
    fn test_apply_frame_merges_message() {
        let mut store = Store::new();
        let frame = json!({
            "type": "message:new",
            "id": "m1",
            "from_id": "u2",
            "to_id": "u1",
            "text": "hello",
        })
        .to_string();

        apply_frame(&mut store, &frame);
        assert_eq!(store.snapshot().messages.len(), 1);

        // Idempotent: delivering the same frame twice leaves one message.
        apply_frame(&mut store, &frame);
        assert_eq!(store.snapshot().messages.len(), 1);
        assert_eq!(
            store.snapshot().messages[&EntityId::new("m1")].text,
            "hello"
        );
    }

    #[test]
    fn test_apply_frame_survives_garbage() {
        let mut store = Store::new();
        apply_frame(&mut store, "\u{0}\u{1}binary junk");
        apply_frame(&mut store, "");
        assert!(store.snapshot().messages.is_empty());
    }
}
