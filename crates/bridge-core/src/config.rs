//! Typed bridge configuration.
//!
//! The configuration is parsed elsewhere (the daemon reads YAML or TOML) and
//! handed to the core as a [`BridgeConfig`]. [`BridgeConfig::validate`] rejects
//! anything the router cannot run with, so a bridge never starts half-built.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
///
/// All of these are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No sockets were configured.
    #[error("Config is missing a sockets section")]
    NoSockets,

    /// No routes were configured.
    #[error("Config is missing a routing section")]
    NoRoutes,

    /// Socket name used twice.
    #[error("Socket '{0}' is defined more than once")]
    DuplicateSocket(String),

    /// Socket name is empty.
    #[error("Socket names cannot be empty")]
    EmptySocketName,

    /// A protocol-specific parameter is missing.
    #[error("Socket '{socket}' of type '{protocol}' is missing parameter '{param}'")]
    MissingParam {
        socket: String,
        protocol: ProtocolKind,
        param: &'static str,
    },

    /// A room identifier is malformed for its protocol.
    #[error("Room '{room}' on socket '{socket}' is invalid: {reason}")]
    InvalidRoom {
        socket: String,
        room: String,
        reason: &'static str,
    },

    /// A room is declared twice on the same socket.
    #[error("Room '{room}' is declared more than once on socket '{socket}'")]
    DuplicateRoom { socket: String, room: String },

    /// Route name is empty.
    #[error("Route names cannot be empty")]
    EmptyRouteName,

    /// Route name used twice.
    #[error("Route '{0}' is defined more than once")]
    DuplicateRoute(String),

    /// Route with no members.
    #[error("Route '{0}' has no members")]
    EmptyRoute(String),

    /// Route references a socket that does not exist.
    #[error("Route '{route}' includes an unknown socket name '{socket}'")]
    UnknownSocket { route: String, socket: String },

    /// Route references a room its socket does not declare.
    #[error("Route '{route}' includes room '{room}' which socket '{socket}' does not declare")]
    UnknownRoom {
        route: String,
        socket: String,
        room: String,
    },

    /// The same room is claimed by two routes.
    #[error("Room '{room}' on socket '{socket}' is claimed by routes '{first}' and '{second}'")]
    RoomInMultipleRoutes {
        socket: String,
        room: String,
        first: String,
        second: String,
    },

    /// A tuning setting is out of range.
    #[error("Invalid setting '{setting}': {reason}")]
    InvalidSetting {
        setting: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    /// Get a static error code string for metrics labeling.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoSockets => "no_sockets",
            Self::NoRoutes => "no_routes",
            Self::DuplicateSocket(_) => "duplicate_socket",
            Self::EmptySocketName => "empty_socket_name",
            Self::MissingParam { .. } => "missing_param",
            Self::InvalidRoom { .. } => "invalid_room",
            Self::DuplicateRoom { .. } => "duplicate_room",
            Self::EmptyRouteName => "empty_route_name",
            Self::DuplicateRoute(_) => "duplicate_route",
            Self::EmptyRoute(_) => "empty_route",
            Self::UnknownSocket { .. } => "unknown_socket",
            Self::UnknownRoom { .. } => "unknown_room",
            Self::RoomInMultipleRoutes { .. } => "room_in_multiple_routes",
            Self::InvalidSetting { .. } => "invalid_setting",
        }
    }
}

/// Network protocol spoken by a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// IRC network.
    Irc,
    /// XMPP multi-user chat.
    #[serde(alias = "jabber")]
    Xmpp,
    /// Local named pipe.
    #[serde(alias = "pipe")]
    Fifo,
    /// Process stdout, for debugging.
    Console,
}

impl ProtocolKind {
    /// Get the protocol name as used in configuration files.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Irc => "irc",
            Self::Xmpp => "xmpp",
            Self::Fifo => "fifo",
            Self::Console => "console",
        }
    }

    /// Parameters a socket of this kind cannot work without.
    #[must_use]
    pub fn mandatory_params(&self) -> &'static [&'static str] {
        match self {
            Self::Irc => &["nick", "server"],
            Self::Xmpp => &["nick", "id", "password"],
            Self::Fifo => &["path"],
            Self::Console => &[],
        }
    }

    /// Check that a room identifier is well-formed for this protocol.
    ///
    /// # Errors
    ///
    /// Returns a reason string if the identifier is malformed.
    pub fn validate_room_id(&self, id: &str) -> Result<(), &'static str> {
        if id.is_empty() {
            return Err("room id cannot be empty");
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err("room id cannot contain whitespace");
        }
        match self {
            Self::Irc if !id.starts_with('#') && !id.starts_with('&') => {
                Err("IRC channels should start with #")
            }
            Self::Xmpp => match id.split_once('@') {
                Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                    if id.contains('/') {
                        Err("XMPP rooms must be bare JIDs")
                    } else {
                        Ok(())
                    }
                }
                _ => Err("XMPP rooms should look like room@conference.host"),
            },
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnection backoff settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// First delay after a failure, in milliseconds.
    #[serde(default = "default_backoff_initial")]
    pub initial_ms: u64,

    /// Upper bound for the delay, in milliseconds.
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,

    /// Factor applied to the delay after each consecutive failure.
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: u32,

    /// A connection that stays up this long resets the backoff.
    #[serde(default = "default_stable_after")]
    pub stable_after_ms: u64,
}

impl BackoffSettings {
    /// First delay after a failure.
    #[must_use]
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    /// Maximum delay.
    #[must_use]
    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    /// Stability threshold.
    #[must_use]
    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.stable_after_ms)
    }
}

/// Engine tuning shared by the router and the socket supervisors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Capacity of the router's inbound event queue.
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,

    /// Capacity of each socket's outbound queue.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Bound on a single outbound send, in milliseconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Push the presence listing into every bridged room on membership change.
    #[serde(default = "default_true")]
    pub presence_updates: bool,

    /// Reconnection backoff.
    #[serde(default)]
    pub backoff: BackoffSettings,
}

impl BridgeSettings {
    /// Bound on a single outbound send.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// One room declared on a socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Protocol-local identifier (channel name, JID, pipe name).
    pub id: String,

    /// Name shown in presence listings. Defaults to the socket label.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// One network connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Unique socket name.
    pub name: String,

    /// Protocol spoken by this socket.
    #[serde(rename = "type")]
    pub protocol: ProtocolKind,

    /// Network name used when tagging relayed messages. Defaults to `name`.
    #[serde(default)]
    pub label: Option<String>,

    /// Never relay anything into this socket.
    #[serde(default)]
    pub readonly: bool,

    /// Prefix relays delivered to this socket with the origin label.
    #[serde(default = "default_true")]
    pub tag_origin: bool,

    /// Connection parameters, opaque to the core.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Rooms joined through this socket.
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
}

impl SocketConfig {
    /// Network label for relay prefixes.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Whether relays into this socket are suppressed.
    ///
    /// Pipes without an `output` path can only be read from.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.readonly || (self.protocol == ProtocolKind::Fifo && !self.params.contains_key("output"))
    }
}

/// A (socket, room) pair inside a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMemberConfig {
    /// Socket name.
    pub socket: String,
    /// Room identifier on that socket.
    pub room: String,
}

/// A named group of bridged rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route name.
    pub name: String,
    /// Member rooms, in display order.
    #[serde(default)]
    pub members: Vec<RouteMemberConfig>,
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Engine tuning.
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Network connections.
    #[serde(default)]
    pub sockets: Vec<SocketConfig>,

    /// Bridged groups.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_event_queue() -> usize {
    1024
}

fn default_outbound_queue() -> usize {
    256
}

fn default_send_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_backoff_initial() -> u64 {
    2_000 // 2 seconds
}

fn default_backoff_max() -> u64 {
    60_000 // 60 seconds
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_stable_after() -> u64 {
    30_000 // 30 seconds
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial(),
            max_ms: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
            stable_after_ms: default_stable_after(),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            event_queue: default_event_queue(),
            outbound_queue: default_outbound_queue(),
            send_timeout_ms: default_send_timeout(),
            presence_updates: true,
            backoff: BackoffSettings::default(),
        }
    }
}

impl BridgeSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |setting: &'static str, reason: &'static str| -> Result<(), ConfigError> {
            Err(ConfigError::InvalidSetting { setting, reason })
        };
        if self.event_queue == 0 {
            return invalid("bridge.event_queue", "must be greater than zero");
        }
        if self.outbound_queue == 0 {
            return invalid("bridge.outbound_queue", "must be greater than zero");
        }
        if self.send_timeout_ms == 0 {
            return invalid("bridge.send_timeout_ms", "must be greater than zero");
        }
        if self.backoff.initial_ms == 0 {
            return invalid("bridge.backoff.initial_ms", "must be greater than zero");
        }
        if self.backoff.max_ms < self.backoff.initial_ms {
            return invalid("bridge.backoff.max_ms", "must not be below initial_ms");
        }
        if self.backoff.multiplier == 0 {
            return invalid("bridge.backoff.multiplier", "must be at least 1");
        }
        Ok(())
    }
}

impl BridgeConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, in configuration order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bridge.validate()?;

        if self.sockets.is_empty() {
            return Err(ConfigError::NoSockets);
        }

        let mut sockets: HashMap<&str, HashSet<&str>> = HashMap::new();
        for socket in &self.sockets {
            if socket.name.is_empty() {
                return Err(ConfigError::EmptySocketName);
            }
            if sockets.contains_key(socket.name.as_str()) {
                return Err(ConfigError::DuplicateSocket(socket.name.clone()));
            }

            for &param in socket.protocol.mandatory_params() {
                if !socket.params.contains_key(param) {
                    return Err(ConfigError::MissingParam {
                        socket: socket.name.clone(),
                        protocol: socket.protocol,
                        param,
                    });
                }
            }

            let mut rooms = HashSet::new();
            for room in &socket.rooms {
                socket
                    .protocol
                    .validate_room_id(&room.id)
                    .map_err(|reason| ConfigError::InvalidRoom {
                        socket: socket.name.clone(),
                        room: room.id.clone(),
                        reason,
                    })?;
                if !rooms.insert(room.id.as_str()) {
                    return Err(ConfigError::DuplicateRoom {
                        socket: socket.name.clone(),
                        room: room.id.clone(),
                    });
                }
            }

            sockets.insert(socket.name.as_str(), rooms);
        }

        if self.routes.is_empty() {
            return Err(ConfigError::NoRoutes);
        }

        let mut route_names = HashSet::new();
        let mut claimed: HashMap<(&str, &str), &str> = HashMap::new();
        for route in &self.routes {
            if route.name.is_empty() {
                return Err(ConfigError::EmptyRouteName);
            }
            if !route_names.insert(route.name.as_str()) {
                return Err(ConfigError::DuplicateRoute(route.name.clone()));
            }
            if route.members.is_empty() {
                return Err(ConfigError::EmptyRoute(route.name.clone()));
            }

            for member in &route.members {
                let Some(rooms) = sockets.get(member.socket.as_str()) else {
                    return Err(ConfigError::UnknownSocket {
                        route: route.name.clone(),
                        socket: member.socket.clone(),
                    });
                };
                if !rooms.contains(member.room.as_str()) {
                    return Err(ConfigError::UnknownRoom {
                        route: route.name.clone(),
                        socket: member.socket.clone(),
                        room: member.room.clone(),
                    });
                }

                // A room listed twice in the same route is tolerated; the
                // router deduplicates targets.
                let key = (member.socket.as_str(), member.room.as_str());
                match claimed.get(&key) {
                    Some(&owner) if owner != route.name => {
                        return Err(ConfigError::RoomInMultipleRoutes {
                            socket: member.socket.clone(),
                            room: member.room.clone(),
                            first: owner.to_string(),
                            second: route.name.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        claimed.insert(key, route.name.as_str());
                    }
                }
            }
        }

        Ok(())
    }
}
