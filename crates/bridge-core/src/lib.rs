//! # slobridge-core
//!
//! Route/room model, presence aggregation and message routing for slobridge.
//!
//! This crate provides the bridging engine:
//!
//! - **Topology** - Sockets, rooms and the fixed routes bridging them
//! - **Router** - Single-consumer dispatch with echo-free fan-out
//! - **Presence** - Per-room occupants and per-route listings
//! - **Delivery** - Non-blocking hand-off of relays to sockets
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  BridgeEvent  ┌─────────────┐  SocketHandle  ┌─────────────┐
//! │  Socket A   │──────────────▶│   Router    │───────────────▶│  Socket B   │
//! └─────────────┘               └─────────────┘                └─────────────┘
//!                                      │
//!                                      ▼
//!                               ┌─────────────┐
//!                               │  Presence   │
//!                               └─────────────┘
//! ```

pub mod config;
pub mod delivery;
pub mod event;
pub mod format;
pub mod metrics;
pub mod presence;
pub mod router;
pub mod topology;

pub use config::{BackoffSettings, BridgeConfig, BridgeSettings, ConfigError, ProtocolKind};
pub use delivery::{DeliveryError, OutboundMessage, SocketHandle};
pub use event::{
    BridgeEvent, ConnectionState, MessageEvent, MessageKind, PresenceChange, PresenceEvent,
};
pub use presence::{EndpointPresence, PresenceAggregator, RoomPresence, RouteSnapshot};
pub use router::{DispatchReport, Router, RouterConfig, RouterError, RouterHandle, RouterStats};
pub use topology::{RoomId, RoomKey, Route, SocketId, SocketSpec, Topology};
