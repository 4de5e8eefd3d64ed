//! Running bridge: one router task plus one supervisor task per socket.

use crate::adapter::AdapterError;
use crate::directory::SocketDirectory;
use crate::registry::AdapterRegistry;
use crate::supervisor::{SocketSupervisor, SupervisorSettings};
use futures_util::future::join_all;
use slobridge_core::{
    BridgeConfig, ConfigError, Router, RouterConfig, RouterHandle, RouterStats, SocketHandle,
    SocketId, Topology,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

const QUERY_QUEUE: usize = 32;

/// Startup errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A socket's adapter could not be built.
    #[error("Socket '{socket}': {source}")]
    Adapter {
        socket: SocketId,
        #[source]
        source: AdapterError,
    },
}

/// Handles to the running tasks.
pub struct Bridge {
    router: JoinHandle<RouterStats>,
    supervisors: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    handle: RouterHandle,
    directory: SocketDirectory,
    topology: Arc<Topology>,
}

impl Bridge {
    /// Validate the configuration, build every adapter and spawn the tasks.
    ///
    /// Nothing is spawned unless every socket has an adapter.
    ///
    /// # Errors
    ///
    /// Returns the first configuration or adapter construction problem.
    pub fn start(config: &BridgeConfig, registry: &AdapterRegistry) -> Result<Self, BridgeError> {
        let topology = Topology::from_config(config)?;
        let settings = &config.bridge;

        let adapters = topology
            .sockets()
            .iter()
            .map(|spec| {
                registry
                    .build(spec)
                    .map(|adapter| (spec.clone(), adapter))
                    .map_err(|source| BridgeError::Adapter {
                        socket: spec.id.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (events_tx, events_rx) = mpsc::channel(settings.event_queue);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let directory = SocketDirectory::new();
        let supervisor_settings = SupervisorSettings::from(settings);

        let mut handles = Vec::with_capacity(adapters.len());
        let mut supervisors = Vec::with_capacity(adapters.len());
        for (spec, adapter) in adapters {
            let (handle, outbound) = SocketHandle::channel(spec.id.clone(), settings.outbound_queue);
            handles.push(handle);
            let supervisor = SocketSupervisor::new(
                spec,
                adapter,
                events_tx.clone(),
                outbound,
                directory.clone(),
                &supervisor_settings,
            );
            supervisors.push(supervisor.spawn(shutdown_rx.clone()));
        }
        // The router stops once every supervisor dropped its sender.
        drop(events_tx);

        let shared = Arc::new(topology.clone());
        let (handle, queries) = RouterHandle::channel(QUERY_QUEUE);
        let router = Router::new(topology, handles, RouterConfig::from(settings));
        let router = tokio::spawn(router.run(events_rx, queries));

        info!(
            sockets = supervisors.len(),
            routes = shared.routes().len(),
            "Bridge started"
        );

        Ok(Self {
            router,
            supervisors,
            shutdown,
            handle,
            directory,
            topology: shared,
        })
    }

    /// Query access to the router.
    #[must_use]
    pub fn router(&self) -> &RouterHandle {
        &self.handle
    }

    /// Connection states of every socket.
    #[must_use]
    pub fn directory(&self) -> &SocketDirectory {
        &self.directory
    }

    /// The routed topology.
    #[must_use]
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Stop every supervisor, then the router.
    ///
    /// Returns the router's final statistics.
    pub async fn shutdown(self) -> RouterStats {
        info!("Shutting down bridge");
        // Receivers may already be gone if every supervisor exited.
        let _ = self.shutdown.send(true);

        for result in join_all(self.supervisors).await {
            if let Err(e) = result {
                error!(error = %e, "Socket supervisor panicked");
            }
        }

        match self.router.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Router task failed");
                RouterStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterEvent, EndpointAdapter};
    use crate::testing::{route_config, socket_config, ScriptedAdapter};
    use slobridge_core::{ConnectionState, MessageKind, PresenceChange, ProtocolKind};
    use std::collections::HashMap;
    use std::time::Duration;

    struct Harness {
        bridge: Bridge,
        adapters: HashMap<String, ScriptedAdapter>,
    }

    impl Harness {
        fn start(mut config: BridgeConfig) -> Self {
            config.bridge.send_timeout_ms = 1_000;
            config.bridge.backoff.initial_ms = 100;
            config.bridge.backoff.max_ms = 1_000;

            let adapters: HashMap<String, ScriptedAdapter> = config
                .sockets
                .iter()
                .map(|s| (s.name.clone(), ScriptedAdapter::new(s.protocol)))
                .collect();

            let mut registry = AdapterRegistry::empty();
            for protocol in [ProtocolKind::Irc, ProtocolKind::Xmpp] {
                let adapters = adapters.clone();
                registry.register(protocol, move |spec| {
                    Ok(Arc::new(adapters[spec.id.as_str()].clone()) as Arc<dyn EndpointAdapter>)
                });
            }

            let bridge = Bridge::start(&config, &registry).unwrap();
            Self { bridge, adapters }
        }

        fn adapter(&self, socket: &str) -> ScriptedAdapter {
            self.adapters[socket].clone()
        }

        async fn connected(&self) {
            let total = self.adapters.len();
            wait_until(|| self.bridge.directory().connected_count() == total).await;
        }
    }

    fn two_networks() -> BridgeConfig {
        BridgeConfig {
            sockets: vec![
                socket_config("irc", ProtocolKind::Irc, "IRC", &["#general"]),
                socket_config("xmpp", ProtocolKind::Xmpp, "XMPP", &["general@conf.example"]),
            ],
            routes: vec![route_config(
                "general",
                &[("irc", "#general"), ("xmpp", "general@conf.example")],
            )],
            ..Default::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn chat(room: &str, sender: &str, text: &str) -> AdapterEvent {
        AdapterEvent::Message {
            room: room.into(),
            sender: sender.into(),
            text: text.into(),
            kind: MessageKind::Chat,
        }
    }

    fn join(room: &str, handle: &str) -> AdapterEvent {
        AdapterEvent::Presence {
            room: room.into(),
            handle: handle.into(),
            change: PresenceChange::Join,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_between_two_networks() {
        let h = Harness::start(two_networks());
        h.connected().await;
        let irc = h.adapter("irc");
        let xmpp = h.adapter("xmpp");

        irc.emit(join("#general", "alice")).await;
        wait_until(|| !xmpp.sent_to("general@conf.example").is_empty()).await;
        assert_eq!(
            xmpp.sent_to("general@conf.example"),
            vec!["IRC: (alice) | XMPP: ()"]
        );

        irc.emit(chat("#general", "alice", "hi")).await;
        wait_until(|| xmpp.sent_to("general@conf.example").len() == 2).await;
        assert_eq!(xmpp.sent_to("general@conf.example")[1], "[IRC] alice: hi");

        xmpp.emit(join("general@conf.example", "bob")).await;
        wait_until(|| irc.sent_to("#general").len() == 2).await;
        assert_eq!(irc.sent_to("#general")[1], "IRC: (alice) | XMPP: (bob)");
        // No echo of alice's own line.
        assert!(!irc.sent_to("#general").iter().any(|t| t.contains("alice: hi")));

        let snapshot = h.bridge.router().snapshot("general").await.unwrap().unwrap();
        assert_eq!(snapshot.listing(), "IRC: (alice) | XMPP: (bob)");

        let stats = h.bridge.router().stats().await.unwrap();
        assert_eq!(stats.messages_relayed, 1);
        assert_eq!(stats.presence_pushes, 2);
        assert_eq!(stats.sockets_connected, 2);

        h.bridge.shutdown().await;
        assert!(irc.is_disconnected());
        assert!(xmpp.is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_target_does_not_block_others() {
        let config = BridgeConfig {
            sockets: ["a", "b", "c", "t"]
                .iter()
                .map(|name| socket_config(name, ProtocolKind::Irc, &name.to_uppercase(), &["#room"]))
                .collect(),
            routes: vec![route_config(
                "room",
                &[("a", "#room"), ("b", "#room"), ("c", "#room"), ("t", "#room")],
            )],
            ..Default::default()
        };
        let h = Harness::start(config);
        h.connected().await;
        h.adapter("t").stall_sends_to("#room");

        h.adapter("a").emit(chat("#room", "alice", "hello")).await;
        wait_until(|| {
            h.adapter("b").sent_to("#room") == vec!["[A] alice: hello"]
                && h.adapter("c").sent_to("#room") == vec!["[A] alice: hello"]
        })
        .await;

        // The stalled send times out and is counted as a delivery failure.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let stats = h.bridge.router().stats().await.unwrap();
        assert_eq!(stats.deliveries_queued, 3);
        assert_eq!(stats.delivery_failures, 1);
        assert!(h.adapter("t").sent().is_empty());
        assert!(h.adapter("a").sent().is_empty());

        h.bridge.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_clears_presence() {
        let h = Harness::start(two_networks());
        h.connected().await;
        let irc = h.adapter("irc");
        let xmpp = h.adapter("xmpp");

        xmpp.emit(join("general@conf.example", "bob")).await;
        wait_until(|| irc.sent_to("#general").len() == 1).await;
        assert_eq!(irc.sent_to("#general")[0], "IRC: () | XMPP: (bob)");

        xmpp.emit(AdapterEvent::ConnectionLost(AdapterError::ConnectionLost(
            "ping timeout".into(),
        )))
        .await;
        wait_until(|| irc.sent_to("#general").len() == 2).await;
        assert_eq!(irc.sent_to("#general")[1], "IRC: () | XMPP: ()");

        // The supervisor reconnects on its own.
        wait_until(|| xmpp.connects() == 2).await;
        h.connected().await;
        assert_eq!(
            h.bridge.directory().state(&SocketId::from("xmpp")),
            Some(ConnectionState::Connected)
        );

        h.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_fails_without_adapter() {
        let err = Bridge::start(&two_networks(), &AdapterRegistry::with_builtin())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BridgeError::Adapter {
                source: AdapterError::Unsupported(ProtocolKind::Irc),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut config = two_networks();
        config.routes.clear();
        let err = Bridge::start(&config, &AdapterRegistry::with_builtin())
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::Config(ConfigError::NoRoutes)));
    }
}
