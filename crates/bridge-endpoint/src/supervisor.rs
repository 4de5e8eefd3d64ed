//! Socket supervision.
//!
//! One supervisor task per socket owns the adapter, drains the socket's
//! outbound queue and forwards normalized events to the router. Connection
//! problems never leave this task: they become state transitions and a
//! backoff-and-retry loop.
//!
//! ```text
//! Disconnected ─▶ Connecting ─▶ Connected ─▶ Failed ─▶ Connecting ─▶ ...
//!                                   │
//!                                   └──(shutdown)──▶ Disconnected
//! ```

use crate::adapter::{AdapterError, AdapterEvent, EndpointAdapter, EventStream};
use crate::backoff::Backoff;
use crate::directory::SocketDirectory;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesOrdered, StreamExt};
use slobridge_core::metrics;
use slobridge_core::{
    BackoffSettings, BridgeEvent, BridgeSettings, ConnectionState, DeliveryError, MessageEvent,
    OutboundMessage, PresenceEvent, RoomId, RoomKey, SocketId, SocketSpec,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Bound on a single adapter send.
    pub send_timeout: Duration,
    /// Reconnection backoff.
    pub backoff: BackoffSettings,
}

impl From<&BridgeSettings> for SupervisorSettings {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            send_timeout: settings.send_timeout(),
            backoff: settings.backoff.clone(),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&BridgeSettings::default())
    }
}

type PendingSend = BoxFuture<'static, (RoomId, Result<(), DeliveryError>)>;

enum SessionEnd {
    Shutdown,
    Lost(AdapterError),
}

/// Lifecycle owner of one network connection.
pub struct SocketSupervisor {
    spec: SocketSpec,
    adapter: Arc<dyn EndpointAdapter>,
    events: mpsc::Sender<BridgeEvent>,
    outbound: mpsc::Receiver<OutboundMessage>,
    directory: SocketDirectory,
    send_timeout: Duration,
    backoff: Backoff,
    state: ConnectionState,
    joined: HashSet<RoomId>,
}

impl SocketSupervisor {
    /// Create a supervisor.
    ///
    /// `outbound` is the receiving half of the socket's [`SocketHandle`].
    ///
    /// [`SocketHandle`]: slobridge_core::SocketHandle
    #[must_use]
    pub fn new(
        spec: SocketSpec,
        adapter: Arc<dyn EndpointAdapter>,
        events: mpsc::Sender<BridgeEvent>,
        outbound: mpsc::Receiver<OutboundMessage>,
        directory: SocketDirectory,
        settings: &SupervisorSettings,
    ) -> Self {
        directory.register(spec.id.clone(), spec.protocol);
        Self {
            backoff: Backoff::new(&settings.backoff),
            send_timeout: settings.send_timeout,
            spec,
            adapter,
            events,
            outbound,
            directory,
            state: ConnectionState::Disconnected,
            joined: HashSet::new(),
        }
    }

    /// Socket supervised.
    #[must_use]
    pub fn id(&self) -> &SocketId {
        &self.spec.id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if a room is joined on the current connection.
    #[must_use]
    pub fn is_joined(&self, room: &RoomId) -> bool {
        self.joined.contains(room)
    }

    /// Establish the connection through the adapter.
    ///
    /// Moves to `Connecting`, then `Connected` or `Failed`.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error if the connection is refused.
    pub async fn connect(&mut self) -> Result<EventStream, AdapterError> {
        self.joined.clear();
        self.set_state(ConnectionState::Connecting).await;

        match self.adapter.connect().await {
            Ok(stream) => {
                self.set_state(ConnectionState::Connected).await;
                Ok(stream)
            }
            Err(error) => {
                self.set_state(ConnectionState::Failed).await;
                Err(error)
            }
        }
    }

    /// Join a room. Joining an already-joined room succeeds without effect.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::NotConnected`] outside `Connected`, or the
    /// adapter's error.
    pub async fn join_room(&mut self, room: &RoomId) -> Result<(), AdapterError> {
        if self.joined.contains(room) {
            return Ok(());
        }
        if !self.state.is_connected() {
            return Err(AdapterError::NotConnected);
        }

        self.adapter.join_room(room).await?;
        self.joined.insert(room.clone());
        debug!(socket = %self.spec.id, room = %room, "Joined room");
        Ok(())
    }

    /// Deliver text to a room, bounded by the send timeout.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] if the socket is not connected, the
    /// adapter refuses, or the timeout expires.
    pub async fn send(&self, room: &RoomId, text: &str) -> Result<(), DeliveryError> {
        if !self.state.is_connected() {
            return Err(DeliveryError::NotConnected(self.spec.id.clone()));
        }

        let target = RoomKey::new(self.spec.id.clone(), room.clone());
        timed_send(self.adapter.as_ref(), &target, text, self.send_timeout).await
    }

    /// Run the supervisor on its own task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Connect, serve and reconnect until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(socket = %self.spec.id, protocol = %self.spec.protocol, "Socket supervisor started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect().await {
                Ok(stream) => {
                    info!(socket = %self.spec.id, "Socket connected");
                    let started = Instant::now();
                    self.join_rooms().await;

                    match self.serve(stream, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(error) => {
                            let uptime = started.elapsed();
                            warn!(
                                socket = %self.spec.id,
                                error = %error,
                                uptime_ms = millis(uptime),
                                "Connection lost"
                            );
                            if self.backoff.session_ended(uptime) {
                                debug!(socket = %self.spec.id, "Connection was stable, backoff reset");
                            }
                            self.set_state(ConnectionState::Failed).await;
                        }
                    }
                }
                Err(error) => {
                    warn!(socket = %self.spec.id, error = %error, "Connect failed");
                }
            }

            let delay = self.backoff.next_delay();
            info!(
                socket = %self.spec.id,
                delay_ms = millis(delay),
                failures = self.backoff.consecutive_failures(),
                "Reconnecting after delay"
            );
            if !self.wait(delay, &mut shutdown).await {
                break;
            }
            self.directory.record_reconnect(&self.spec.id);
            metrics::record_reconnect(self.spec.id.as_str());
        }

        self.stop().await;
    }

    async fn join_rooms(&mut self) {
        for room in self.spec.rooms.clone() {
            if let Err(error) = self.join_room(&room).await {
                warn!(socket = %self.spec.id, room = %room, error = %error, "Failed to join room");
            }
        }
    }

    async fn serve(
        &mut self,
        mut stream: EventStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        // At most one send in flight keeps the socket's relays in order.
        let mut sends: FuturesOrdered<PendingSend> = FuturesOrdered::new();

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        if !sends.is_empty() {
                            debug!(socket = %self.spec.id, "Cancelled in-flight send");
                        }
                        return SessionEnd::Shutdown;
                    }
                }

                event = stream.recv() => match event {
                    Some(AdapterEvent::ConnectionLost(error)) => return SessionEnd::Lost(error),
                    Some(event) => {
                        if let Some(event) = self.normalize(event) {
                            if self.events.send(event).await.is_err() {
                                warn!(socket = %self.spec.id, "Router gone, stopping");
                                return SessionEnd::Shutdown;
                            }
                        }
                    }
                    None => {
                        return SessionEnd::Lost(AdapterError::ConnectionLost(
                            "event stream closed".into(),
                        ))
                    }
                },

                Some((room, result)) = sends.next(), if !sends.is_empty() => {
                    if let Err(error) = result {
                        self.report_failure(room, error).await;
                    }
                }

                Some(out) = self.outbound.recv(), if sends.is_empty() => {
                    sends.push_back(self.start_send(out));
                }
            }
        }
    }

    fn start_send(&self, out: OutboundMessage) -> PendingSend {
        let OutboundMessage { room, text } = out;
        let adapter = Arc::clone(&self.adapter);
        let target = RoomKey::new(self.spec.id.clone(), room);
        let limit = self.send_timeout;

        async move {
            let result = timed_send(adapter.as_ref(), &target, &text, limit).await;
            (target.room, result)
        }
        .boxed()
    }

    /// Sleep out a backoff delay. Returns `false` on shutdown.
    async fn wait(&mut self, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }

                _ = &mut sleep => return true,

                // Relays that raced the failure cannot be delivered.
                Some(out) = self.outbound.recv() => {
                    let error = DeliveryError::NotConnected(self.spec.id.clone());
                    self.report_failure(out.room, error).await;
                }
            }
        }
    }

    async fn stop(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(socket = %self.spec.id, dropped, "Cancelled pending sends");
        }

        if self.state.is_connected() {
            match tokio::time::timeout(self.send_timeout, self.adapter.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(socket = %self.spec.id, error = %error, "Disconnect failed"),
                Err(_) => warn!(socket = %self.spec.id, "Disconnect timed out"),
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        info!(socket = %self.spec.id, "Socket supervisor stopped");
    }

    fn normalize(&self, event: AdapterEvent) -> Option<BridgeEvent> {
        match event {
            AdapterEvent::Message {
                room,
                sender,
                text,
                kind,
            } => Some(
                MessageEvent::new(RoomKey::new(self.spec.id.clone(), room), sender, text)
                    .with_kind(kind)
                    .into(),
            ),
            AdapterEvent::Presence {
                room,
                handle,
                change,
            } => Some(
                PresenceEvent {
                    origin: RoomKey::new(self.spec.id.clone(), room),
                    handle,
                    change,
                }
                .into(),
            ),
            AdapterEvent::ConnectionLost(_) => None,
        }
    }

    async fn report_failure(&self, room: RoomId, error: DeliveryError) {
        let target = RoomKey::new(self.spec.id.clone(), room);
        debug!(target = %target, error = %error, "Reporting delivery failure");
        // Nobody to report to once the router is gone.
        let _ = self
            .events
            .send(BridgeEvent::DeliveryFailed { target, error })
            .await;
    }

    async fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(socket = %self.spec.id, from = %self.state, to = %state, "Socket state");
        self.state = state;

        let _ = self
            .events
            .send(BridgeEvent::SocketState {
                socket: self.spec.id.clone(),
                state,
            })
            .await;
        self.directory.set_state(&self.spec.id, state);
    }
}

async fn timed_send(
    adapter: &dyn EndpointAdapter,
    target: &RoomKey,
    text: &str,
    limit: Duration,
) -> Result<(), DeliveryError> {
    match tokio::time::timeout(limit, adapter.send(&target.room, text)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(AdapterError::NotConnected)) => {
            Err(DeliveryError::NotConnected(target.socket.clone()))
        }
        Ok(Err(error)) => Err(DeliveryError::Rejected {
            target: target.clone(),
            reason: error.to_string(),
        }),
        Err(_) => Err(DeliveryError::Timeout {
            target: target.clone(),
            after_ms: millis(limit),
        }),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
