//! The bridge router.
//!
//! The router is the single dispatch point for everything relayed between
//! rooms. It owns the topology, the per-room presence state and the socket
//! states, and is driven from one task consuming one ordered event queue, so
//! none of that state needs locking. Events from one socket are handled in the
//! order the socket submitted them.
//!
//! Outbound text is handed to sockets through their [`SocketHandle`] without
//! waiting; a slow or dead target never delays the next event or the other
//! targets of the same fan-out.

use crate::config::BridgeSettings;
use crate::delivery::{DeliveryError, SocketHandle};
use crate::event::{BridgeEvent, ConnectionState, MessageEvent, PresenceEvent};
use crate::format::relay_text;
use crate::metrics;
use crate::presence::{PresenceAggregator, RouteSnapshot};
use crate::topology::{RoomKey, RouteIndex, SocketId, Topology};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The router task has stopped.
    #[error("Router stopped")]
    Stopped,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Push the presence listing into bridged rooms on membership change.
    pub presence_updates: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            presence_updates: true,
        }
    }
}

impl From<&BridgeSettings> for RouterConfig {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            presence_updates: settings.presence_updates,
        }
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Messages fanned out on a route.
    pub messages_relayed: u64,
    /// Messages dropped because their room is not bridged.
    pub unbridged_dropped: u64,
    /// Relays handed to a socket.
    pub deliveries_queued: u64,
    /// Relays that failed, before or after hand-off.
    pub delivery_failures: u64,
    /// Presence listings pushed.
    pub presence_pushes: u64,
    /// Sockets currently connected.
    pub sockets_connected: usize,
}

/// Outcome of one dispatch.
#[derive(Debug, Default, PartialEq)]
pub struct DispatchReport {
    /// Targets the text was handed to.
    pub queued: Vec<RoomKey>,
    /// Targets that could not be reached.
    pub failed: Vec<(RoomKey, DeliveryError)>,
}

impl DispatchReport {
    fn merge(&mut self, other: DispatchReport) {
        self.queued.extend(other.queued);
        self.failed.extend(other.failed);
    }

    /// Check if nothing was attempted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.failed.is_empty()
    }
}

/// Read-only requests answered from the dispatch task.
#[derive(Debug)]
pub enum RouterQuery {
    /// Presence snapshot of one route.
    Snapshot {
        route: String,
        reply: oneshot::Sender<Option<RouteSnapshot>>,
    },
    /// Presence snapshots of every route.
    Snapshots {
        reply: oneshot::Sender<Vec<RouteSnapshot>>,
    },
    /// Current statistics.
    Stats { reply: oneshot::Sender<RouterStats> },
}

/// Cloneable query access to a running router.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouterQuery>,
}

impl RouterHandle {
    /// Create a handle and the query receiver to pass to [`Router::run`].
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RouterQuery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Get the presence snapshot of a route.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Stopped`] if the router is gone.
    pub async fn snapshot(&self, route: impl Into<String>) -> Result<Option<RouteSnapshot>, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.request(RouterQuery::Snapshot {
            route: route.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RouterError::Stopped)
    }

    /// Get the presence snapshots of every route.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Stopped`] if the router is gone.
    pub async fn snapshots(&self) -> Result<Vec<RouteSnapshot>, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.request(RouterQuery::Snapshots { reply }).await?;
        rx.await.map_err(|_| RouterError::Stopped)
    }

    /// Get router statistics.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Stopped`] if the router is gone.
    pub async fn stats(&self) -> Result<RouterStats, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.request(RouterQuery::Stats { reply }).await?;
        rx.await.map_err(|_| RouterError::Stopped)
    }

    async fn request(&self, query: RouterQuery) -> Result<(), RouterError> {
        self.tx.send(query).await.map_err(|_| RouterError::Stopped)
    }
}

/// The central dispatch engine.
pub struct Router {
    topology: Topology,
    handles: HashMap<SocketId, SocketHandle>,
    states: HashMap<SocketId, ConnectionState>,
    presence: PresenceAggregator,
    config: RouterConfig,
    stats: RouterStats,
}

impl Router {
    /// Create a router over a topology.
    ///
    /// Every socket starts out `Disconnected` until its supervisor reports
    /// otherwise.
    #[must_use]
    pub fn new(
        topology: Topology,
        handles: impl IntoIterator<Item = SocketHandle>,
        config: RouterConfig,
    ) -> Self {
        let handles: HashMap<_, _> = handles.into_iter().map(|h| (h.id().clone(), h)).collect();
        let states = topology
            .sockets()
            .iter()
            .map(|s| (s.id.clone(), ConnectionState::Disconnected))
            .collect();

        info!(
            sockets = topology.sockets().len(),
            routes = topology.routes().len(),
            "Creating router"
        );

        Self {
            topology,
            handles,
            states,
            presence: PresenceAggregator::new(),
            config,
            stats: RouterStats::default(),
        }
    }

    /// The topology being routed.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Last reported state of a socket.
    #[must_use]
    pub fn socket_state(&self, socket: &SocketId) -> ConnectionState {
        self.states.get(socket).copied().unwrap_or_default()
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Presence snapshot of a route by name.
    #[must_use]
    pub fn snapshot(&self, route: &str) -> Option<RouteSnapshot> {
        self.topology
            .route_named(route)
            .map(|(index, _)| self.snapshot_at(index))
    }

    /// Presence snapshots of every route, in configuration order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<RouteSnapshot> {
        (0..self.topology.routes().len())
            .map(|index| self.snapshot_at(index))
            .collect()
    }

    fn snapshot_at(&self, index: RouteIndex) -> RouteSnapshot {
        let route = &self.topology.routes()[index];
        self.presence
            .snapshot(route, &self.topology, |s| self.socket_state(s).is_connected())
    }

    /// Dispatch one event.
    pub fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Message(message) => {
                self.on_message(message);
            }
            BridgeEvent::Presence(presence) => {
                self.on_presence(presence);
            }
            BridgeEvent::SocketState { socket, state } => {
                self.on_socket_state(socket, state);
            }
            BridgeEvent::DeliveryFailed { target, error } => {
                self.on_delivery_failed(&target, &error);
            }
        }
    }

    /// Relay a message to every other room of its route.
    pub fn on_message(&mut self, event: MessageEvent) -> DispatchReport {
        let Some(index) = self.topology.route_for(&event.origin) else {
            debug!(
                room = %event.origin,
                sender = %event.sender,
                text = %event.text,
                "Message on unbridged room dropped"
            );
            self.stats.unbridged_dropped += 1;
            metrics::record_unbridged();
            return DispatchReport::default();
        };

        if event.text.trim().is_empty() {
            trace!(room = %event.origin, "Empty message ignored");
            return DispatchReport::default();
        }

        let origin_label = self
            .topology
            .socket(&event.origin.socket)
            .map_or_else(|| event.origin.socket.to_string(), |s| s.label.clone());
        let route_name = self.topology.routes()[index].name().to_string();
        let targets = self.fan_out_targets(index, Some(&event.origin));

        self.stats.messages_relayed += 1;
        metrics::record_message(&route_name);

        let mut report = DispatchReport::default();
        for target in targets {
            let tag = self
                .topology
                .socket(&target.socket)
                .map_or(true, |s| s.tag_origin);
            let text = relay_text(tag.then_some(origin_label.as_str()), &event);
            self.deliver(target, text, "message", &mut report);
        }

        debug!(
            route = %route_name,
            origin = %event.origin,
            queued = report.queued.len(),
            failed = report.failed.len(),
            "Message relayed"
        );
        report
    }

    /// Apply a membership change and push the route's listing.
    pub fn on_presence(&mut self, event: PresenceEvent) -> DispatchReport {
        if self.topology.room(&event.origin).is_none() {
            debug!(room = %event.origin, "Presence on unconfigured room ignored");
            return DispatchReport::default();
        }
        if !self.socket_state(&event.origin.socket).is_connected() {
            // Occupants of a room on a dead socket are unknowable.
            debug!(room = %event.origin, "Presence from disconnected socket ignored");
            return DispatchReport::default();
        }
        if !self.presence.apply(&event) {
            return DispatchReport::default();
        }

        match self.topology.route_for(&event.origin) {
            Some(index) => self.push_presence(index),
            None => DispatchReport::default(),
        }
    }

    /// Record a socket state transition.
    ///
    /// Leaving `Connected` empties the socket's rooms and refreshes the
    /// listing of every route they belong to.
    pub fn on_socket_state(&mut self, socket: SocketId, state: ConnectionState) -> DispatchReport {
        if self.topology.socket(&socket).is_none() {
            warn!(socket = %socket, state = %state, "State change for unknown socket");
            return DispatchReport::default();
        }

        let previous = self.states.insert(socket.clone(), state).unwrap_or_default();
        if previous == state {
            return DispatchReport::default();
        }

        info!(socket = %socket, from = %previous, to = %state, "Socket state changed");
        self.stats.sockets_connected = self.states.values().filter(|s| s.is_connected()).count();
        metrics::set_sockets_connected(self.stats.sockets_connected);

        let mut report = DispatchReport::default();
        if previous.is_connected() && !state.is_connected() && self.presence.clear_socket(&socket) {
            for index in self.topology.routes_on_socket(&socket) {
                report.merge(self.push_presence(index));
            }
        }
        report
    }

    /// Record a failure reported back by a socket after hand-off.
    pub fn on_delivery_failed(&mut self, target: &RoomKey, error: &DeliveryError) {
        self.record_failure(target, error);
    }

    /// Consume events until every sender is dropped.
    ///
    /// Queries are answered between events. Returns the final statistics.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<BridgeEvent>,
        mut queries: mpsc::Receiver<RouterQuery>,
    ) -> RouterStats {
        info!("Router running");
        let mut queries_open = true;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                query = queries.recv(), if queries_open => match query {
                    Some(query) => self.answer(query),
                    None => queries_open = false,
                },
            }
        }

        info!(
            messages = self.stats.messages_relayed,
            deliveries = self.stats.deliveries_queued,
            failures = self.stats.delivery_failures,
            "Router stopped"
        );
        self.stats
    }

    fn answer(&self, query: RouterQuery) {
        // A requester that gave up is not an error.
        match query {
            RouterQuery::Snapshot { route, reply } => {
                let _ = reply.send(self.snapshot(&route));
            }
            RouterQuery::Snapshots { reply } => {
                let _ = reply.send(self.snapshots());
            }
            RouterQuery::Stats { reply } => {
                let _ = reply.send(self.stats);
            }
        }
    }

    /// Distinct writable members of a route, minus the origin.
    fn fan_out_targets(&self, index: RouteIndex, origin: Option<&RoomKey>) -> Vec<RoomKey> {
        let Some(route) = self.topology.route(index) else {
            return Vec::new();
        };

        route
            .distinct_members()
            .into_iter()
            .filter(|member| Some(*member) != origin)
            .filter(|member| {
                let readonly = self
                    .topology
                    .socket(&member.socket)
                    .map_or(true, |s| s.readonly);
                if readonly {
                    trace!(room = %member, "Skipping read-only target");
                }
                !readonly
            })
            .cloned()
            .collect()
    }

    fn push_presence(&mut self, index: RouteIndex) -> DispatchReport {
        let mut report = DispatchReport::default();
        if !self.config.presence_updates {
            return report;
        }

        let snapshot = self.snapshot_at(index);
        let line = snapshot.listing();

        // Offline rooms have nobody to show the listing to.
        let targets: Vec<RoomKey> = self
            .fan_out_targets(index, None)
            .into_iter()
            .filter(|t| self.socket_state(&t.socket).is_connected())
            .collect();
        if targets.is_empty() {
            return report;
        }

        self.stats.presence_pushes += 1;
        metrics::record_presence_update(&snapshot.route);
        for target in targets {
            self.deliver(target, line.clone(), "presence", &mut report);
        }

        debug!(route = %snapshot.route, listing = %line, "Presence pushed");
        report
    }

    fn deliver(
        &mut self,
        target: RoomKey,
        text: String,
        kind: &'static str,
        report: &mut DispatchReport,
    ) {
        let result = match self.handles.get(&target.socket) {
            None => Err(DeliveryError::NoHandle(target.socket.clone())),
            Some(_) if !self.socket_state(&target.socket).is_connected() => {
                Err(DeliveryError::NotConnected(target.socket.clone()))
            }
            Some(handle) => handle.try_deliver(target.room.clone(), text),
        };

        match result {
            Ok(()) => {
                self.stats.deliveries_queued += 1;
                metrics::record_delivery(kind, "queued");
                report.queued.push(target);
            }
            Err(error) => {
                metrics::record_delivery(kind, "rejected");
                self.record_failure(&target, &error);
                report.failed.push((target, error));
            }
        }
    }

    fn record_failure(&mut self, target: &RoomKey, error: &DeliveryError) {
        self.stats.delivery_failures += 1;
        metrics::record_delivery_error(error.error_code());
        warn!(target = %target, error = %error, "Delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, ProtocolKind};
    use crate::delivery::OutboundMessage;
    use crate::event::MessageKind;
    use crate::topology::tests::{route, socket, two_network_config};

    struct Harness {
        router: Router,
        outboxes: HashMap<String, mpsc::Receiver<OutboundMessage>>,
    }

    impl Harness {
        fn new(config: BridgeConfig) -> Self {
            Self::with_capacity(config, 16)
        }

        fn with_capacity(config: BridgeConfig, capacity: usize) -> Self {
            let topology = Topology::from_config(&config).unwrap();
            let mut handles = Vec::new();
            let mut outboxes = HashMap::new();
            for spec in topology.sockets() {
                let (handle, rx) = SocketHandle::channel(spec.id.clone(), capacity);
                handles.push(handle);
                outboxes.insert(spec.id.to_string(), rx);
            }
            let mut router = Router::new(topology, handles, RouterConfig::default());
            let ids: Vec<SocketId> = router.topology().sockets().iter().map(|s| s.id.clone()).collect();
            for id in ids {
                router.on_socket_state(id, ConnectionState::Connected);
            }
            Self { router, outboxes }
        }

        fn drain(&mut self, socket: &str) -> Vec<OutboundMessage> {
            let rx = self.outboxes.get_mut(socket).unwrap();
            let mut out = Vec::new();
            while let Ok(msg) = rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn drain_all(&mut self) {
            let names: Vec<String> = self.outboxes.keys().cloned().collect();
            for name in names {
                self.drain(&name);
            }
        }
    }

    fn irc() -> RoomKey {
        RoomKey::new("irc", "#general")
    }

    fn xmpp() -> RoomKey {
        RoomKey::new("xmpp", "general@conf.example")
    }

    fn three_way_config() -> BridgeConfig {
        BridgeConfig {
            sockets: vec![
                socket("a", ProtocolKind::Irc, "A", &["#a"]),
                socket("b", ProtocolKind::Irc, "B", &["#b"]),
                socket("c", ProtocolKind::Irc, "C", &["#c"]),
            ],
            routes: vec![route("triad", &[("a", "#a"), ("b", "#b"), ("c", "#c")])],
            ..Default::default()
        }
    }

    #[test]
    fn test_message_relayed_without_echo() {
        let mut h = Harness::new(two_network_config());

        let report = h.router.on_message(MessageEvent::new(irc(), "alice", "hi"));
        assert_eq!(report.queued, vec![xmpp()]);
        assert!(report.failed.is_empty());

        let received = h.drain("xmpp");
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].room.as_str(), "general@conf.example");
        assert_eq!(received[0].text, "[IRC] alice: hi");
        assert!(h.drain("irc").is_empty());
    }

    #[test]
    fn test_presence_listing_pushed_to_every_room() {
        let mut h = Harness::new(two_network_config());

        h.router.on_presence(PresenceEvent::join(irc(), "alice"));
        h.drain_all();

        let report = h.router.on_presence(PresenceEvent::join(xmpp(), "bob"));
        assert_eq!(report.queued, vec![irc(), xmpp()]);

        for socket in ["irc", "xmpp"] {
            let received = h.drain(socket);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].text, "IRC: (alice) | XMPP: (bob)");
        }
    }

    #[test]
    fn test_duplicate_join_pushes_nothing() {
        let mut h = Harness::new(two_network_config());
        h.router.on_presence(PresenceEvent::join(irc(), "alice"));
        h.drain_all();

        assert!(h.router.on_presence(PresenceEvent::join(irc(), "alice")).is_empty());
        assert!(h.drain("xmpp").is_empty());
    }

    #[test]
    fn test_every_origin_reaches_exactly_the_others() {
        let mut h = Harness::new(three_way_config());
        let members = [
            RoomKey::new("a", "#a"),
            RoomKey::new("b", "#b"),
            RoomKey::new("c", "#c"),
        ];

        for origin in &members {
            let report = h
                .router
                .on_message(MessageEvent::new(origin.clone(), "someone", "ping"));
            let expected: Vec<RoomKey> = members.iter().filter(|m| *m != origin).cloned().collect();
            assert_eq!(report.queued, expected);
            assert!(h.drain(origin.socket.as_str()).is_empty());
            h.drain_all();
        }
    }

    #[test]
    fn test_single_member_route_relays_nothing() {
        let mut config = two_network_config();
        config.routes = vec![route("lonely", &[("irc", "#general")])];
        let mut h = Harness::new(config);

        let report = h.router.on_message(MessageEvent::new(irc(), "alice", "anyone?"));
        assert!(report.is_empty());
        assert!(h.drain("irc").is_empty());
        assert!(h.drain("xmpp").is_empty());
    }

    #[test]
    fn test_origin_listed_twice_is_not_echoed() {
        let mut config = two_network_config();
        config.routes = vec![route(
            "general",
            &[
                ("irc", "#general"),
                ("xmpp", "general@conf.example"),
                ("irc", "#general"),
                ("xmpp", "general@conf.example"),
            ],
        )];
        let mut h = Harness::new(config);

        let report = h.router.on_message(MessageEvent::new(irc(), "alice", "hi"));
        assert_eq!(report.queued, vec![xmpp()]);
        assert!(h.drain("irc").is_empty());
        assert_eq!(h.drain("xmpp").len(), 1);
    }

    #[test]
    fn test_unbridged_room_is_dropped() {
        let mut h = Harness::new(two_network_config());
        let report = h
            .router
            .on_message(MessageEvent::new(RoomKey::new("irc", "#lobby"), "alice", "hi"));
        assert!(report.is_empty());
        assert_eq!(h.router.stats().unbridged_dropped, 1);
        assert!(h.drain("xmpp").is_empty());
    }

    #[test]
    fn test_disconnected_member_is_one_delivery_error() {
        let mut h = Harness::new(three_way_config());
        h.router
            .on_socket_state(SocketId::from("a"), ConnectionState::Failed);

        let report = h
            .router
            .on_message(MessageEvent::new(RoomKey::new("b", "#b"), "bob", "still there?"));

        assert_eq!(report.queued, vec![RoomKey::new("c", "#c")]);
        assert_eq!(
            report.failed,
            vec![(
                RoomKey::new("a", "#a"),
                DeliveryError::NotConnected(SocketId::from("a"))
            )]
        );
        assert_eq!(h.router.stats().delivery_failures, 1);
        assert_eq!(h.drain("c")[0].text, "[B] bob: still there?");
    }

    #[test]
    fn test_full_queue_does_not_block_other_targets() {
        let mut config = three_way_config();
        config.sockets.push(socket("t", ProtocolKind::Irc, "T", &["#t"]));
        config.routes[0].members.push(crate::config::RouteMemberConfig {
            socket: "t".into(),
            room: "#t".into(),
        });
        let mut h = Harness::with_capacity(config, 1);

        // Fill T's queue; nobody drains it.
        h.router
            .on_message(MessageEvent::new(RoomKey::new("a", "#a"), "alice", "first"));
        h.drain("a");
        h.drain("b");
        h.drain("c");

        let report = h
            .router
            .on_message(MessageEvent::new(RoomKey::new("a", "#a"), "alice", "second"));
        assert_eq!(
            report.queued,
            vec![RoomKey::new("b", "#b"), RoomKey::new("c", "#c")]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].1.error_code(), "queue_full");
        assert_eq!(h.drain("b")[0].text, "[A] alice: second");
        assert_eq!(h.drain("c")[0].text, "[A] alice: second");
    }

    #[test]
    fn test_socket_failure_clears_presence() {
        let mut h = Harness::new(two_network_config());
        h.router.on_presence(PresenceEvent::join(irc(), "alice"));
        h.router.on_presence(PresenceEvent::join(xmpp(), "bob"));
        h.drain_all();

        let report = h
            .router
            .on_socket_state(SocketId::from("irc"), ConnectionState::Failed);
        assert_eq!(report.queued, vec![xmpp()]);
        assert_eq!(h.drain("xmpp")[0].text, "IRC: () | XMPP: (bob)");
        assert_eq!(
            h.router.snapshot("general").unwrap().listing(),
            "IRC: () | XMPP: (bob)"
        );

        // Reconnecting does not resurrect phantom occupants.
        h.router
            .on_socket_state(SocketId::from("irc"), ConnectionState::Connected);
        assert_eq!(
            h.router.snapshot("general").unwrap().listing(),
            "IRC: () | XMPP: (bob)"
        );
    }

    #[test]
    fn test_presence_from_dead_socket_ignored() {
        let mut h = Harness::new(two_network_config());
        h.router
            .on_socket_state(SocketId::from("irc"), ConnectionState::Failed);
        assert!(h.router.on_presence(PresenceEvent::join(irc(), "ghost")).is_empty());
        assert_eq!(
            h.router.snapshot("general").unwrap().listing(),
            "IRC: () | XMPP: ()"
        );
    }

    #[test]
    fn test_readonly_and_untagged_targets() {
        let mut config = three_way_config();
        config.sockets[1].readonly = true;
        config.sockets[2].tag_origin = false;
        let mut h = Harness::new(config);

        let report = h
            .router
            .on_message(MessageEvent::new(RoomKey::new("a", "#a"), "alice", "waves").with_kind(MessageKind::Action));
        assert_eq!(report.queued, vec![RoomKey::new("c", "#c")]);
        assert!(h.drain("b").is_empty());
        assert_eq!(h.drain("c")[0].text, "* alice waves");
    }

    #[test]
    fn test_presence_updates_can_be_disabled() {
        let config = two_network_config();
        let topology = Topology::from_config(&config).unwrap();
        let (handle, mut rx) = SocketHandle::channel("xmpp", 4);
        let mut router = Router::new(
            topology,
            [handle],
            RouterConfig {
                presence_updates: false,
            },
        );
        router.on_socket_state(SocketId::from("irc"), ConnectionState::Connected);
        router.on_socket_state(SocketId::from("xmpp"), ConnectionState::Connected);

        assert!(router.on_presence(PresenceEvent::join(irc(), "alice")).is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(
            router.snapshot("general").unwrap().listing(),
            "IRC: (alice) | XMPP: ()"
        );
    }

    #[tokio::test]
    async fn test_run_loop_and_queries() {
        let topology = Topology::from_config(&two_network_config()).unwrap();
        let (irc_handle, _irc_rx) = SocketHandle::channel("irc", 8);
        let (xmpp_handle, mut xmpp_rx) = SocketHandle::channel("xmpp", 8);
        let router = Router::new(topology, [irc_handle, xmpp_handle], RouterConfig::default());

        let (events_tx, events_rx) = mpsc::channel(16);
        let (handle, queries_rx) = RouterHandle::channel(4);
        let task = tokio::spawn(router.run(events_rx, queries_rx));

        for socket in ["irc", "xmpp"] {
            events_tx
                .send(BridgeEvent::SocketState {
                    socket: socket.into(),
                    state: ConnectionState::Connected,
                })
                .await
                .unwrap();
        }
        events_tx
            .send(PresenceEvent::join(irc(), "alice").into())
            .await
            .unwrap();
        events_tx
            .send(MessageEvent::new(irc(), "alice", "hi").into())
            .await
            .unwrap();

        assert_eq!(xmpp_rx.recv().await.unwrap().text, "IRC: (alice) | XMPP: ()");
        assert_eq!(xmpp_rx.recv().await.unwrap().text, "[IRC] alice: hi");

        let snapshot = handle.snapshot("general").await.unwrap().unwrap();
        assert_eq!(snapshot.listing(), "IRC: (alice) | XMPP: ()");
        assert!(handle.snapshot("missing").await.unwrap().is_none());
        assert_eq!(handle.snapshots().await.unwrap().len(), 1);

        drop(events_tx);
        let stats = task.await.unwrap();
        assert_eq!(stats.messages_relayed, 1);
        assert_eq!(stats.sockets_connected, 2);
        assert!(matches!(handle.stats().await, Err(RouterError::Stopped)));
    }
}
