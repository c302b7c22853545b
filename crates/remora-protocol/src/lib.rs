//! remora-protocol: Wire protocol for the remora control channel
//!
//! This crate defines the line-oriented JSON envelopes exchanged between
//! the agent and the control server over the persistent WebSocket
//! connection, plus the typed payloads carried inside them.

pub mod envelope;
pub mod error;
pub mod message;

pub use envelope::Envelope;
pub use error::ProtocolError;
pub use message::{types, CmdErrorCode};
