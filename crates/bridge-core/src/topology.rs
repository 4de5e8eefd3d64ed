//! Sockets, rooms and routes.
//!
//! The topology is built once from a validated [`BridgeConfig`] and never
//! changes afterwards. Everything is addressed by identity ([`SocketId`],
//! [`RoomKey`]) so other components never hold references into it.

use crate::config::{BridgeConfig, ConfigError, ProtocolKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Unique identifier for a socket (its configured name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SocketId(String);

impl SocketId {
    /// Create a new socket ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SocketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SocketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Protocol-local room identifier (channel name, MUC JID, pipe name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a new room ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A room addressed globally: the socket it lives on plus its local ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RoomKey {
    /// Owning socket.
    pub socket: SocketId,
    /// Room on that socket.
    pub room: RoomId,
}

impl RoomKey {
    /// Create a new room key.
    #[must_use]
    pub fn new(socket: impl Into<SocketId>, room: impl Into<RoomId>) -> Self {
        Self {
            socket: socket.into(),
            room: room.into(),
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.socket, self.room)
    }
}

/// A configured network connection.
#[derive(Debug, Clone)]
pub struct SocketSpec {
    /// Socket identity.
    pub id: SocketId,
    /// Protocol spoken.
    pub protocol: ProtocolKind,
    /// Network label used to tag relays.
    pub label: String,
    /// Relays are never delivered here.
    pub readonly: bool,
    /// Relays delivered here carry the origin label.
    pub tag_origin: bool,
    /// Opaque connection parameters.
    pub params: BTreeMap<String, String>,
    /// Rooms to join, in configuration order.
    pub rooms: Vec<RoomId>,
}

impl SocketSpec {
    /// Look up a connection parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// A configured room.
#[derive(Debug, Clone)]
pub struct RoomSpec {
    /// Global address.
    pub key: RoomKey,
    /// Name shown in presence listings.
    pub display_name: String,
}

/// A fixed set of bridged rooms.
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    members: Vec<RoomKey>,
}

impl Route {
    /// Get the route name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members exactly as configured, duplicates included.
    #[must_use]
    pub fn members(&self) -> &[RoomKey] {
        &self.members
    }

    /// Members in configured order with duplicates removed.
    #[must_use]
    pub fn distinct_members(&self) -> Vec<&RoomKey> {
        let mut seen = HashSet::with_capacity(self.members.len());
        self.members.iter().filter(|m| seen.insert(*m)).collect()
    }
}

/// Index of a route inside its [`Topology`].
pub type RouteIndex = usize;

/// The immutable socket/room/route arena.
#[derive(Debug, Clone)]
pub struct Topology {
    sockets: Vec<SocketSpec>,
    socket_index: HashMap<SocketId, usize>,
    rooms: HashMap<RoomKey, RoomSpec>,
    routes: Vec<Route>,
    route_of: HashMap<RoomKey, RouteIndex>,
}

impl Topology {
    /// Build the topology from a configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration does not validate.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut sockets = Vec::with_capacity(config.sockets.len());
        let mut socket_index = HashMap::with_capacity(config.sockets.len());
        let mut rooms = HashMap::new();

        for socket in &config.sockets {
            let id = SocketId::new(socket.name.as_str());
            let label = socket.label().to_string();

            let mut room_ids = Vec::with_capacity(socket.rooms.len());
            for room in &socket.rooms {
                let key = RoomKey::new(id.clone(), room.id.as_str());
                let display_name = room.display_name.clone().unwrap_or_else(|| label.clone());
                room_ids.push(key.room.clone());
                rooms.insert(key.clone(), RoomSpec { key, display_name });
            }

            socket_index.insert(id.clone(), sockets.len());
            sockets.push(SocketSpec {
                id,
                protocol: socket.protocol,
                label,
                readonly: socket.is_readonly(),
                tag_origin: socket.tag_origin,
                params: socket.params.clone(),
                rooms: room_ids,
            });
        }

        let mut routes = Vec::with_capacity(config.routes.len());
        let mut route_of = HashMap::new();
        for (index, route) in config.routes.iter().enumerate() {
            let members: Vec<RoomKey> = route
                .members
                .iter()
                .map(|m| RoomKey::new(m.socket.as_str(), m.room.as_str()))
                .collect();
            for member in &members {
                route_of.insert(member.clone(), index);
            }
            routes.push(Route {
                name: route.name.clone(),
                members,
            });
        }

        Ok(Self {
            sockets,
            socket_index,
            rooms,
            routes,
            route_of,
        })
    }

    /// All sockets in configuration order.
    #[must_use]
    pub fn sockets(&self) -> &[SocketSpec] {
        &self.sockets
    }

    /// Look up a socket.
    #[must_use]
    pub fn socket(&self, id: &SocketId) -> Option<&SocketSpec> {
        self.socket_index.get(id).map(|&i| &self.sockets[i])
    }

    /// Look up a room.
    #[must_use]
    pub fn room(&self, key: &RoomKey) -> Option<&RoomSpec> {
        self.rooms.get(key)
    }

    /// All routes in configuration order.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Look up a route by name.
    #[must_use]
    pub fn route_named(&self, name: &str) -> Option<(RouteIndex, &Route)> {
        self.routes.iter().enumerate().find(|(_, r)| r.name == name)
    }

    /// Get the route at an index.
    #[must_use]
    pub fn route(&self, index: RouteIndex) -> Option<&Route> {
        self.routes.get(index)
    }

    /// Find the route a room belongs to, if it is bridged at all.
    #[must_use]
    pub fn route_for(&self, key: &RoomKey) -> Option<RouteIndex> {
        self.route_of.get(key).copied()
    }

    /// Routes with at least one member on the given socket.
    #[must_use]
    pub fn routes_on_socket(&self, socket: &SocketId) -> Vec<RouteIndex> {
        self.routes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.members.iter().any(|m| &m.socket == socket))
            .map(|(i, _)| i)
            .collect()
    }
}
