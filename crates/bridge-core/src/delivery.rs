//! The router's send capability towards one socket.
//!
//! A [`SocketHandle`] is the sending half of a bounded queue drained by that
//! socket's supervisor. Enqueueing never waits: the router hands text off and
//! moves on, and failures come back later as [`BridgeEvent::DeliveryFailed`].
//!
//! [`BridgeEvent::DeliveryFailed`]: crate::event::BridgeEvent::DeliveryFailed

use crate::topology::{RoomId, RoomKey, SocketId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Delivery errors, always scoped to a single target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The target socket is not connected.
    #[error("Socket not connected: {0}")]
    NotConnected(SocketId),

    /// The target socket's outbound queue is full.
    #[error("Outbound queue full for socket: {0}")]
    QueueFull(SocketId),

    /// The target socket's supervisor is gone.
    #[error("Socket closed: {0}")]
    Closed(SocketId),

    /// The adapter did not complete the send in time.
    #[error("Send to {target} timed out after {after_ms}ms")]
    Timeout { target: RoomKey, after_ms: u64 },

    /// The adapter refused the send.
    #[error("Send to {target} rejected: {reason}")]
    Rejected { target: RoomKey, reason: String },

    /// No handle was registered for the socket.
    #[error("No handle for socket: {0}")]
    NoHandle(SocketId),
}

impl DeliveryError {
    /// Get a static error code string for metrics labeling.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotConnected(_) => "not_connected",
            Self::QueueFull(_) => "queue_full",
            Self::Closed(_) => "closed",
            Self::Timeout { .. } => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::NoHandle(_) => "no_handle",
        }
    }
}

/// Text queued for one room of a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target room on the socket.
    pub room: RoomId,
    /// Fully formatted text.
    pub text: String,
}

/// Router-side sending half of a socket's outbound queue.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: SocketId,
    tx: mpsc::Sender<OutboundMessage>,
}

impl SocketHandle {
    /// Create a handle and the receiver its supervisor drains.
    #[must_use]
    pub fn channel(
        id: impl Into<SocketId>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { id: id.into(), tx }, rx)
    }

    /// Socket this handle sends to.
    #[must_use]
    pub fn id(&self) -> &SocketId {
        &self.id
    }

    /// Queue text for a room without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueFull`] or [`DeliveryError::Closed`].
    pub fn try_deliver(&self, room: RoomId, text: String) -> Result<(), DeliveryError> {
        self.tx
            .try_send(OutboundMessage { room, text })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull(self.id.clone()),
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(self.id.clone()),
            })
    }
}
