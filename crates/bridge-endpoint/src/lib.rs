//! # slobridge-endpoint
//!
//! Socket supervision for slobridge.
//!
//! This crate connects the routing core to the outside world:
//!
//! - **Adapter** - The contract every protocol client implements
//! - **Supervisor** - Connection lifecycle, bounded sends and reconnection
//! - **Registry** - Adapter construction by protocol
//! - **Bridge** - The router and its supervisors wired together
//!
//! Two local adapters ship with the crate: a named pipe reader and a
//! console writer.

pub mod adapter;
pub mod backoff;
pub mod bridge;
pub mod console;
pub mod directory;
pub mod pipe;
pub mod registry;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use adapter::{AdapterError, AdapterEvent, EndpointAdapter, EventStream};
pub use backoff::Backoff;
pub use bridge::{Bridge, BridgeError};
pub use console::ConsoleAdapter;
pub use directory::{SocketDirectory, SocketStatus};
pub use pipe::PipeAdapter;
pub use registry::{AdapterConstructor, AdapterRegistry};
pub use supervisor::{SocketSupervisor, SupervisorSettings};
