//! Named pipe adapter.
//!
//! Each line read from `path` is announced as a notice from `nick` in every
//! joined room. Reading starts once the first room is joined. A FIFO is reopened whenever its writer goes away; a regular
//! file is read once. Relays are appended to `output` when one is
//! configured, otherwise the socket is read-only.

use crate::adapter::{AdapterError, AdapterEvent, EndpointAdapter, EventStream};
use async_trait::async_trait;
use slobridge_core::{MessageKind, ProtocolKind, RoomId, SocketId, SocketSpec};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 64;
const REOPEN_DELAY: Duration = Duration::from_millis(250);

/// Adapter reading announcements from a named pipe.
pub struct PipeAdapter {
    socket: SocketId,
    path: PathBuf,
    output: Option<PathBuf>,
    nick: String,
    rooms: watch::Sender<Vec<RoomId>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl PipeAdapter {
    /// Build from a socket's parameters (`path`, optional `nick` and `output`).
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidParam`] without a usable `path`.
    pub fn from_spec(spec: &SocketSpec) -> Result<Self, AdapterError> {
        let path = spec
            .param("path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AdapterError::InvalidParam {
                param: "path".into(),
                reason: "pipe sockets need a path to read from".into(),
            })?;

        Ok(Self {
            socket: spec.id.clone(),
            path: PathBuf::from(path),
            output: spec.param("output").map(PathBuf::from),
            nick: spec.param("nick").unwrap_or(spec.id.as_str()).to_string(),
            rooms: watch::Sender::new(Vec::new()),
            reader: Mutex::new(None),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn reader(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_reader(&self) {
        if let Some(task) = self.reader().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl EndpointAdapter for PipeAdapter {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Fifo
    }

    async fn connect(&self) -> Result<EventStream, AdapterError> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| AdapterError::Connect(format!("{}: {e}", self.path.display())))?;

        self.stop_reader();
        self.rooms.send_modify(Vec::clear);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let source = PipeSource {
            socket: self.socket.clone(),
            path: self.path.clone(),
            follow: is_fifo(&metadata),
            nick: self.nick.clone(),
            rooms: self.rooms.subscribe(),
        };
        info!(socket = %self.socket, path = %self.path.display(), follow = source.follow, "Pipe opened");
        *self.reader() = Some(tokio::spawn(source.run(tx)));

        Ok(rx)
    }

    async fn join_room(&self, room: &RoomId) -> Result<(), AdapterError> {
        self.rooms.send_if_modified(|rooms| {
            if rooms.contains(room) {
                return false;
            }
            rooms.push(room.clone());
            true
        });
        Ok(())
    }

    async fn send(&self, _room: &RoomId, text: &str) -> Result<(), AdapterError> {
        let Some(output) = &self.output else {
            return Err(AdapterError::InvalidParam {
                param: "output".into(),
                reason: "pipe is read-only".into(),
            });
        };

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output)
            .await?;
        let mut line = text.to_string();
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.stop_reader();
        self.rooms.send_modify(Vec::clear);
        Ok(())
    }
}

impl Drop for PipeAdapter {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

struct PipeSource {
    socket: SocketId,
    path: PathBuf,
    follow: bool,
    nick: String,
    rooms: watch::Receiver<Vec<RoomId>>,
}

impl PipeSource {
    async fn run(mut self, tx: mpsc::Sender<AdapterEvent>) {
        // Lines have nowhere to go before a room is joined.
        let joined = async { self.rooms.wait_for(|rooms| !rooms.is_empty()).await.is_ok() };
        tokio::select! {
            joined = joined => {
                if !joined {
                    return;
                }
            }
            () = tx.closed() => return,
        }
        debug!(socket = %self.socket, "Pipe source reading");

        loop {
            let file = match File::open(&self.path).await {
                Ok(file) => file,
                Err(e) => {
                    let _ = tx.send(AdapterEvent::ConnectionLost(e.into())).await;
                    return;
                }
            };

            let mut lines = BufReader::new(file).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if !self.announce(&tx, line.trim_end()).await {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let error = if e.kind() == std::io::ErrorKind::InvalidData {
                            AdapterError::Protocol(format!("{}: {e}", self.path.display()))
                        } else {
                            AdapterError::Io(e)
                        };
                        let _ = tx.send(AdapterEvent::ConnectionLost(error)).await;
                        return;
                    }
                }
            }

            if !self.follow {
                debug!(socket = %self.socket, "Pipe source exhausted");
                // Stay connected until the supervisor lets go.
                tx.closed().await;
                return;
            }

            // Writer closed its end; wait for the next one.
            tokio::time::sleep(REOPEN_DELAY).await;
        }
    }

    /// Returns `false` once the receiver is gone.
    async fn announce(&self, tx: &mpsc::Sender<AdapterEvent>, line: &str) -> bool {
        if line.is_empty() {
            return true;
        }

        let rooms = self.rooms.borrow().clone();
        for room in rooms {
            let event = AdapterEvent::Message {
                room,
                sender: self.nick.clone(),
                text: line.to_string(),
                kind: MessageKind::Notice,
            };
            if tx.send(event).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(unix)]
fn is_fifo(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_fifo()
}

#[cfg(not(unix))]
fn is_fifo(_metadata: &std::fs::Metadata) -> bool {
    false
}
