//! Event definitions
//!
//! Two families of events live here:
//! - [`StreamEvent`]: messages pushed by the backend over `/api/stream`
//! - [`ClientEvent`]: state changes published to the presentation layer via [`EventBus`]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::models::{Identity, Photo, Stats};

/// Stream message type that carries a newly processed photo
pub const NEW_PHOTO: &str = "new_photo";

/// Envelope of every server-pushed message: `{ "type": ..., "data": ... }`
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Typed message received from the live stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A processed photo arrived and belongs at the front of the recent gallery
    NewPhoto(Photo),
    /// Any other message type; carried so the consumer can log and ignore it
    Other { kind: String },
}

impl StreamEvent {
    /// Parse one `data:` payload from the stream
    ///
    /// Fails on malformed JSON and on a `new_photo` whose data is not a photo.
    /// Unknown message types parse successfully as [`StreamEvent::Other`].
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        let envelope: StreamEnvelope = serde_json::from_str(payload)?;
        if envelope.kind == NEW_PHOTO {
            let photo: Photo = serde_json::from_value(envelope.data)?;
            Ok(StreamEvent::NewPhoto(photo))
        } else {
            Ok(StreamEvent::Other {
                kind: envelope.kind,
            })
        }
    }
}

/// Connection state of the live stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Connecting,
    Open,
    Error,
    Closed,
}

/// Client state changes, broadcast for whatever renders them
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// A visitor identity was stored (registration or manual entry)
    SessionEstablished { identity: Identity },

    /// The session was reset; matches and stats returned to their empty states
    SessionCleared,

    /// Stats changed (authoritative load or optimistic increment)
    StatsUpdated { stats: Stats, provisional: bool },

    /// Recent gallery contents changed
    GalleryUpdated { photos: Vec<Photo> },

    /// Match results for the current identity were replaced
    MatchesUpdated { identity: Identity, count: usize },

    /// Live stream connection state changed
    StreamStateChanged { state: StreamState },
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for client state changes
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use pds_common::events::{ClientEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit(ClientEvent::SessionCleared).ok();
/// assert!(matches!(rx.try_recv(), Ok(ClientEvent::SessionCleared)));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ClientEvent,
    ) -> Result<usize, broadcast::error::SendError<ClientEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
