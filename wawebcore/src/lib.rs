//! # wawebcore
//!
//! Platform-independent core of the legacy WhatsApp Web companion protocol:
//! cryptographic primitives, the QR key-exchange algorithm, wire frame
//! codec, session state and typed events. No I/O happens in this crate;
//! the async client in the root package drives it against a transport.

pub mod auth;
pub mod binary;
pub mod crypto;
pub mod session;
pub mod types;
