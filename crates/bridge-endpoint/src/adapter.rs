//! Endpoint adapter contract.
//!
//! These traits define the interface every protocol client must provide,
//! allowing socket supervision to be protocol-agnostic. An adapter normalizes
//! its network's traffic into [`AdapterEvent`]s and accepts plain text for
//! delivery.

use async_trait::async_trait;
use slobridge_core::{MessageKind, PresenceChange, ProtocolKind, RoomId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Adapter errors.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The connection could not be established.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// An established connection dropped.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The network sent something the adapter cannot make sense of.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation attempted without a live connection.
    #[error("Not connected")]
    NotConnected,

    /// A connection parameter is unusable.
    #[error("Invalid parameter '{param}': {reason}")]
    InvalidParam { param: String, reason: String },

    /// No adapter is available for a protocol.
    #[error("No adapter available for protocol '{0}'")]
    Unsupported(ProtocolKind),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Get a static error code string for metrics labeling.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::ConnectionLost(_) => "connection_lost",
            Self::Protocol(_) => "protocol",
            Self::NotConnected => "not_connected",
            Self::InvalidParam { .. } => "invalid_param",
            Self::Unsupported(_) => "unsupported",
            Self::Io(_) => "io",
        }
    }
}

/// A normalized event from a network.
#[derive(Debug)]
pub enum AdapterEvent {
    /// A chat line in a joined room.
    Message {
        room: RoomId,
        sender: String,
        text: String,
        kind: MessageKind,
    },
    /// A membership change in a joined room.
    Presence {
        room: RoomId,
        handle: String,
        change: PresenceChange,
    },
    /// The connection is gone; no further events follow.
    ///
    /// Malformed network data is reported here as [`AdapterError::Protocol`].
    ConnectionLost(AdapterError),
}

/// Events of one connection. Closing the stream means the connection ended.
pub type EventStream = mpsc::Receiver<AdapterEvent>;

/// A protocol client for one network connection.
///
/// Methods take `&self`: the socket supervisor sends while it waits on the
/// event stream, so adapters keep their connection state internally.
#[async_trait]
pub trait EndpointAdapter: Send + Sync {
    /// Protocol spoken by this adapter.
    fn protocol(&self) -> ProtocolKind;

    /// Establish the connection.
    ///
    /// Returns the stream of events for this connection. Calling `connect`
    /// again after the stream ended starts a fresh connection.
    async fn connect(&self) -> Result<EventStream, AdapterError>;

    /// Join a room on the current connection.
    async fn join_room(&self, room: &RoomId) -> Result<(), AdapterError>;

    /// Deliver text to a room.
    async fn send(&self, room: &RoomId, text: &str) -> Result<(), AdapterError>;

    /// Close the connection gracefully.
    async fn disconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
