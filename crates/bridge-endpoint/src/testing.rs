//! Scripted adapter and configuration helpers for tests.

use crate::adapter::{AdapterError, AdapterEvent, EndpointAdapter, EventStream};
use async_trait::async_trait;
use slobridge_core::config::{RoomConfig, RouteConfig, RouteMemberConfig, SocketConfig};
use slobridge_core::{ProtocolKind, RoomId, SocketSpec};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct Script {
    connect_failures: VecDeque<AdapterError>,
    events: Option<mpsc::Sender<AdapterEvent>>,
    stalled: HashSet<RoomId>,
    joined: Vec<RoomId>,
    sent: Vec<(RoomId, String)>,
    connects: usize,
    disconnected: bool,
}

/// In-memory adapter driven by the test.
#[derive(Clone)]
pub struct ScriptedAdapter {
    protocol: ProtocolKind,
    script: Arc<Mutex<Script>>,
}

impl ScriptedAdapter {
    pub fn new(protocol: ProtocolKind) -> Self {
        Self {
            protocol,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Make the next connection attempt fail.
    pub fn fail_next_connect(&self, error: AdapterError) {
        self.script().connect_failures.push_back(error);
    }

    /// Sends to this room never complete.
    pub fn stall_sends_to(&self, room: &str) {
        self.script().stalled.insert(RoomId::from(room));
    }

    /// Inject an event on the current connection.
    pub async fn emit(&self, event: AdapterEvent) {
        let events = self.script().events.clone().expect("not connected");
        events.send(event).await.unwrap();
    }

    pub fn sent(&self) -> Vec<(RoomId, String)> {
        self.script().sent.clone()
    }

    pub fn sent_to(&self, room: &str) -> Vec<String> {
        self.script()
            .sent
            .iter()
            .filter(|(r, _)| r.as_str() == room)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn joined(&self) -> Vec<RoomId> {
        self.script().joined.clone()
    }

    pub fn connects(&self) -> usize {
        self.script().connects
    }

    pub fn is_disconnected(&self) -> bool {
        self.script().disconnected
    }
}

#[async_trait]
impl EndpointAdapter for ScriptedAdapter {
    fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    async fn connect(&self) -> Result<EventStream, AdapterError> {
        let mut script = self.script();
        script.connects += 1;
        if let Some(error) = script.connect_failures.pop_front() {
            return Err(error);
        }
        let (tx, rx) = mpsc::channel(64);
        script.events = Some(tx);
        script.disconnected = false;
        Ok(rx)
    }

    async fn join_room(&self, room: &RoomId) -> Result<(), AdapterError> {
        self.script().joined.push(room.clone());
        Ok(())
    }

    async fn send(&self, room: &RoomId, text: &str) -> Result<(), AdapterError> {
        let stalled = self.script().stalled.contains(room);
        if stalled {
            std::future::pending::<()>().await;
        }
        self.script().sent.push((room.clone(), text.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        let mut script = self.script();
        script.disconnected = true;
        script.events = None;
        Ok(())
    }
}

pub fn socket_config(name: &str, protocol: ProtocolKind, label: &str, rooms: &[&str]) -> SocketConfig {
    let params: BTreeMap<String, String> = protocol
        .mandatory_params()
        .iter()
        .map(|p| (p.to_string(), format!("test-{p}")))
        .collect();
    SocketConfig {
        name: name.to_string(),
        protocol,
        label: Some(label.to_string()),
        readonly: false,
        tag_origin: true,
        params,
        rooms: rooms
            .iter()
            .map(|id| RoomConfig {
                id: id.to_string(),
                display_name: None,
            })
            .collect(),
    }
}

pub fn route_config(name: &str, members: &[(&str, &str)]) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        members: members
            .iter()
            .map(|(socket, room)| RouteMemberConfig {
                socket: socket.to_string(),
                room: room.to_string(),
            })
            .collect(),
    }
}

pub fn socket_spec(name: &str, protocol: ProtocolKind, rooms: &[&str]) -> SocketSpec {
    SocketSpec {
        id: name.into(),
        protocol,
        label: name.to_uppercase(),
        readonly: false,
        tag_origin: true,
        params: BTreeMap::new(),
        rooms: rooms.iter().map(|r| RoomId::from(*r)).collect(),
    }
}
