//! Shared view of socket connection states.
//!
//! Supervisors write their own entry; anything else (the status endpoint)
//! only reads. The router keeps its own copy, fed through the event queue.

use dashmap::DashMap;
use serde::Serialize;
use slobridge_core::event::now_millis;
use slobridge_core::{ConnectionState, ProtocolKind, SocketId};
use std::sync::Arc;

/// Public status of one socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocketStatus {
    /// Socket name.
    pub socket: SocketId,
    /// Protocol spoken.
    pub protocol: ProtocolKind,
    /// Current state.
    pub state: ConnectionState,
    /// When the state was entered.
    pub since: u64,
    /// Reconnection attempts so far.
    pub reconnects: u32,
}

/// Concurrent map of socket states.
#[derive(Debug, Clone, Default)]
pub struct SocketDirectory {
    entries: Arc<DashMap<SocketId, SocketStatus>>,
}

impl SocketDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket as disconnected.
    pub fn register(&self, socket: SocketId, protocol: ProtocolKind) {
        self.entries.insert(
            socket.clone(),
            SocketStatus {
                socket,
                protocol,
                state: ConnectionState::Disconnected,
                since: now_millis(),
                reconnects: 0,
            },
        );
    }

    /// Record a state change.
    pub fn set_state(&self, socket: &SocketId, state: ConnectionState) {
        if let Some(mut entry) = self.entries.get_mut(socket) {
            if entry.state != state {
                entry.state = state;
                entry.since = now_millis();
            }
        }
    }

    /// Count a reconnection attempt.
    pub fn record_reconnect(&self, socket: &SocketId) {
        if let Some(mut entry) = self.entries.get_mut(socket) {
            entry.reconnects = entry.reconnects.saturating_add(1);
        }
    }

    /// Current state of a socket.
    #[must_use]
    pub fn state(&self, socket: &SocketId) -> Option<ConnectionState> {
        self.entries.get(socket).map(|e| e.state)
    }

    /// All statuses, sorted by socket name.
    #[must_use]
    pub fn statuses(&self) -> Vec<SocketStatus> {
        let mut all: Vec<SocketStatus> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.socket.cmp(&b.socket));
        all
    }

    /// Number of connected sockets.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state.is_connected())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_states() {
        let directory = SocketDirectory::new();
        let irc = SocketId::from("irc");
        directory.register(irc.clone(), ProtocolKind::Irc);
        directory.register(SocketId::from("console"), ProtocolKind::Console);

        assert_eq!(directory.state(&irc), Some(ConnectionState::Disconnected));
        directory.set_state(&irc, ConnectionState::Connected);
        directory.record_reconnect(&irc);

        assert_eq!(directory.connected_count(), 1);
        let statuses = directory.statuses();
        assert_eq!(statuses[0].socket.as_str(), "console");
        assert_eq!(statuses[1].reconnects, 1);
        assert_eq!(directory.state(&SocketId::from("missing")), None);
    }
}
