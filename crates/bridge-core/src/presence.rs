//! Presence tracking for bridged rooms.
//!
//! Each room keeps its own occupant list, mutated only by presence events from
//! its own socket. The [`PresenceAggregator`] folds the lists of a route's
//! members into a [`RouteSnapshot`], one entry per endpoint in configured
//! member order. Occupants inside an endpoint are listed in byte-wise
//! lexicographic order of their handles, so a snapshot depends only on the
//! resulting sets and never on how events from different sockets interleaved.
//!
//! Handles are namespaced per endpoint: the same nick on two networks shows up
//! twice and is never merged.

use crate::event::{now_millis, PresenceChange, PresenceEvent};
use crate::topology::{RoomKey, Route, SocketId, Topology};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// One occupant of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occupant {
    /// Display handle.
    pub handle: String,
    /// When the occupant was first seen.
    pub joined_at: u64,
}

impl Occupant {
    /// Create a new occupant.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            joined_at: now_millis(),
        }
    }
}

/// Occupant list of a single room.
#[derive(Debug, Default)]
pub struct RoomPresence {
    occupants: BTreeMap<String, Occupant>,
}

impl RoomPresence {
    /// Create an empty occupant list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of occupants.
    #[must_use]
    pub fn count(&self) -> usize {
        self.occupants.len()
    }

    /// Check if a handle is present.
    #[must_use]
    pub fn is_present(&self, handle: &str) -> bool {
        self.occupants.contains_key(handle)
    }

    /// Add an occupant.
    ///
    /// Returns `true` if the handle was not present already.
    pub fn join(&mut self, handle: impl Into<String>) -> bool {
        let handle = handle.into();
        if self.occupants.contains_key(&handle) {
            return false;
        }
        self.occupants.insert(handle.clone(), Occupant::new(handle));
        true
    }

    /// Remove an occupant.
    pub fn leave(&mut self, handle: &str) -> Option<Occupant> {
        self.occupants.remove(handle)
    }

    /// Replace `old` by `new`.
    ///
    /// An unknown `old` handle still results in `new` being present, since the
    /// rename proves the occupant is in the room. Returns `true` if the set
    /// changed.
    pub fn rename(&mut self, old: &str, new: impl Into<String>) -> bool {
        let new = new.into();
        if old == new {
            return self.join(new);
        }
        let previous = self.occupants.remove(old);
        if self.occupants.contains_key(&new) {
            return previous.is_some();
        }
        let joined_at = previous.as_ref().map_or_else(now_millis, |o| o.joined_at);
        self.occupants.insert(
            new.clone(),
            Occupant {
                handle: new,
                joined_at,
            },
        );
        true
    }

    /// Forget every occupant. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.occupants.len();
        self.occupants.clear();
        count
    }

    /// Handles in listing order.
    #[must_use]
    pub fn handles(&self) -> Vec<&str> {
        self.occupants.keys().map(String::as_str).collect()
    }

    /// Check if the room is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }
}

/// Occupants of one endpoint inside a route snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointPresence {
    /// Endpoint display name.
    pub label: String,
    /// Room the entry describes.
    pub room: RoomKey,
    /// Handles in listing order.
    pub occupants: Vec<String>,
}

/// Who is connected where, for one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSnapshot {
    /// Route name.
    pub route: String,
    /// One entry per distinct member, in configured order.
    pub endpoints: Vec<EndpointPresence>,
}

impl RouteSnapshot {
    /// Render the one-line listing pushed into bridged rooms.
    ///
    /// `IRC: (alice, carol) | XMPP: (bob)`
    #[must_use]
    pub fn listing(&self) -> String {
        self.to_string()
    }

    /// Total number of occupants across endpoints.
    #[must_use]
    pub fn occupant_count(&self) -> usize {
        self.endpoints.iter().map(|e| e.occupants.len()).sum()
    }
}

impl fmt::Display for RouteSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}: ({})", endpoint.label, endpoint.occupants.join(", "))?;
        }
        Ok(())
    }
}

/// Per-room occupant lists and the per-route view over them.
#[derive(Debug, Default)]
pub struct PresenceAggregator {
    rooms: HashMap<RoomKey, RoomPresence>,
}

impl PresenceAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupant list of a room, if anything was ever recorded for it.
    #[must_use]
    pub fn room(&self, key: &RoomKey) -> Option<&RoomPresence> {
        self.rooms.get(key)
    }

    /// Apply a presence event to its origin room.
    ///
    /// Returns `true` if the room's occupant set changed. Duplicate joins and
    /// leaves of absent handles are no-ops.
    pub fn apply(&mut self, event: &PresenceEvent) -> bool {
        let room = self.rooms.entry(event.origin.clone()).or_default();
        let changed = match &event.change {
            PresenceChange::Join => room.join(event.handle.as_str()),
            PresenceChange::Leave => room.leave(&event.handle).is_some(),
            PresenceChange::Rename { new_handle } => room.rename(&event.handle, new_handle.as_str()),
        };
        if changed {
            debug!(
                room = %event.origin,
                handle = %event.handle,
                change = ?event.change,
                occupants = room.count(),
                "Presence changed"
            );
        }
        changed
    }

    /// Forget every occupant of every room on a socket.
    ///
    /// Returns `true` if any room had occupants.
    pub fn clear_socket(&mut self, socket: &SocketId) -> bool {
        let mut cleared = 0;
        for (key, room) in self.rooms.iter_mut() {
            if &key.socket == socket {
                cleared += room.clear();
            }
        }
        if cleared > 0 {
            debug!(socket = %socket, cleared, "Presence cleared for socket");
        }
        cleared > 0
    }

    /// Build the snapshot of a route.
    ///
    /// Rooms whose socket is not live (per `is_live`) report no occupants,
    /// whatever was last known about them.
    pub fn snapshot(
        &self,
        route: &Route,
        topology: &Topology,
        is_live: impl Fn(&SocketId) -> bool,
    ) -> RouteSnapshot {
        let endpoints = route
            .distinct_members()
            .into_iter()
            .map(|key| {
                let label = topology
                    .room(key)
                    .map_or_else(|| key.socket.to_string(), |r| r.display_name.clone());
                let occupants = if is_live(&key.socket) {
                    self.rooms
                        .get(key)
                        .map(|r| r.handles().into_iter().map(str::to_string).collect())
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                EndpointPresence {
                    label,
                    room: key.clone(),
                    occupants,
                }
            })
            .collect();

        RouteSnapshot {
            route: route.name().to_string(),
            endpoints,
        }
    }
}
