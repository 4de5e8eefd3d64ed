//! Normalized events flowing from sockets into the router.
//!
//! Events are ephemeral: they live for the duration of one dispatch.

use crate::delivery::DeliveryError;
use crate::topology::{RoomKey, SocketId};
use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// How a chat line was sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Ordinary chat line.
    #[default]
    Chat,
    /// Emote (`/me waves`).
    Action,
    /// Notice; never answered by bots.
    Notice,
}

/// A chat line typed in some room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Room the line was typed in.
    pub origin: RoomKey,
    /// Display handle of the author.
    pub sender: String,
    /// Message text.
    pub text: String,
    /// Chat, action or notice.
    pub kind: MessageKind,
    /// When the socket received it.
    pub timestamp: u64,
}

impl MessageEvent {
    /// Create a new chat message.
    #[must_use]
    pub fn new(origin: RoomKey, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin,
            sender: sender.into(),
            text: text.into(),
            kind: MessageKind::Chat,
            timestamp: now_millis(),
        }
    }

    /// Set the message kind.
    #[must_use]
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }
}

/// What happened to an occupant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// The occupant entered the room.
    Join,
    /// The occupant left the room.
    Leave,
    /// The occupant changed handle.
    Rename {
        /// Handle after the change.
        new_handle: String,
    },
}

/// A membership change in some room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    /// Room whose membership changed.
    pub origin: RoomKey,
    /// Occupant handle (the old handle for a rename).
    pub handle: String,
    /// The change.
    pub change: PresenceChange,
}

impl PresenceEvent {
    /// An occupant joined.
    #[must_use]
    pub fn join(origin: RoomKey, handle: impl Into<String>) -> Self {
        Self {
            origin,
            handle: handle.into(),
            change: PresenceChange::Join,
        }
    }

    /// An occupant left.
    #[must_use]
    pub fn leave(origin: RoomKey, handle: impl Into<String>) -> Self {
        Self {
            origin,
            handle: handle.into(),
            change: PresenceChange::Leave,
        }
    }

    /// An occupant changed handle.
    #[must_use]
    pub fn rename(origin: RoomKey, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            origin,
            handle: old.into(),
            change: PresenceChange::Rename {
                new_handle: new.into(),
            },
        }
    }
}

/// Connection state of a socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected; initial and final state.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and joined.
    Connected,
    /// Connection lost or refused; a retry is scheduled.
    Failed,
}

impl ConnectionState {
    /// Whether occupant state can be known in this state.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Get the state name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the router consumes.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A chat line.
    Message(MessageEvent),
    /// A membership change.
    Presence(PresenceEvent),
    /// A socket changed connection state.
    SocketState {
        /// Socket concerned.
        socket: SocketId,
        /// New state.
        state: ConnectionState,
    },
    /// An outbound send failed after it was handed to the socket.
    DeliveryFailed {
        /// Room the text was meant for.
        target: RoomKey,
        /// Why it failed.
        error: DeliveryError,
    },
}

impl From<MessageEvent> for BridgeEvent {
    fn from(event: MessageEvent) -> Self {
        Self::Message(event)
    }
}

impl From<PresenceEvent> for BridgeEvent {
    fn from(event: PresenceEvent) -> Self {
        Self::Presence(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = MessageEvent::new(RoomKey::new("irc", "#general"), "alice", "hi");
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.kind, MessageKind::Chat);
        assert!(msg.timestamp > 0);

        let msg = msg.with_kind(MessageKind::Notice);
        assert_eq!(msg.kind, MessageKind::Notice);
    }

    #[test]
    fn test_presence_constructors() {
        let origin = RoomKey::new("xmpp", "general@conf.example");
        let event = PresenceEvent::rename(origin, "bob", "robert");
        assert_eq!(event.handle, "bob");
        assert_eq!(
            event.change,
            PresenceChange::Rename {
                new_handle: "robert".into()
            }
        );
    }

    #[test]
    fn test_connection_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Failed.is_connected());
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
