//! Console adapter.
//!
//! Writes every relay to a local stream (stdout by default) as
//! `[room] text`. It never produces events, which makes it a convenient
//! sink when debugging a route.

use crate::adapter::{AdapterError, AdapterEvent, EndpointAdapter, EventStream};
use async_trait::async_trait;
use slobridge_core::{ProtocolKind, RoomId, SocketId};
use std::sync::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Output-only adapter for debugging.
pub struct ConsoleAdapter {
    socket: SocketId,
    writer: tokio::sync::Mutex<Writer>,
    // Held while connected so the event stream stays open.
    session: Mutex<Option<mpsc::Sender<AdapterEvent>>>,
}

impl ConsoleAdapter {
    /// Adapter writing to the process stdout.
    #[must_use]
    pub fn stdout(socket: SocketId) -> Self {
        Self::with_writer(socket, tokio::io::stdout())
    }

    /// Adapter writing to any stream.
    #[must_use]
    pub fn with_writer(socket: SocketId, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            socket,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<AdapterEvent>>> {
        // A poisoned lock only guards the keep-alive sender.
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl EndpointAdapter for ConsoleAdapter {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Console
    }

    async fn connect(&self) -> Result<EventStream, AdapterError> {
        let (tx, rx) = mpsc::channel(1);
        *self.session() = Some(tx);
        debug!(socket = %self.socket, "Console attached");
        Ok(rx)
    }

    async fn join_room(&self, _room: &RoomId) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn send(&self, room: &RoomId, text: &str) -> Result<(), AdapterError> {
        let mut out = String::new();
        for line in text.lines() {
            out.push_str(&format!("[{room}] {line}\n"));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.session().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_writes_room_prefixed_lines() {
        let (client, mut server) = tokio::io::duplex(1024);
        let console = ConsoleAdapter::with_writer("console".into(), client);

        let _events = console.connect().await.unwrap();
        console
            .send(&"debug".into(), "[IRC] alice: hi\n[IRC] alice: there")
            .await
            .unwrap();
        drop(console);

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "[debug] [IRC] alice: hi\n[debug] [IRC] alice: there\n");
    }

    #[tokio::test]
    async fn test_event_stream_closes_on_disconnect() {
        let console = ConsoleAdapter::with_writer("console".into(), tokio::io::sink());
        let mut events = console.connect().await.unwrap();
        assert!(events.try_recv().is_err());

        console.disconnect().await.unwrap();
        assert!(events.recv().await.is_none());
    }
}
