// Re-export core modules so callers get one coherent API surface
pub use wawebcore::{auth as core_auth, binary, crypto, session, types};

// Platform-specific modules (tokio, filesystem, network) live here
pub mod auth;
pub mod client;
pub mod processor;
pub mod store;
pub mod transport;

pub use client::{Client, ClientConfig, ClientError};
pub use transport::{Transport, TransportEvent, TransportFactory, WebSocketTransportFactory};
