//! remora-agent: Persistent remote-control agent
//!
//! Maintains a single outbound WebSocket to the orchestrating server and
//! services everything the server asks of this machine over it: interactive
//! terminal sessions, one-shot command execution, and file management.
//! The connection is supervised with exponential-backoff reconnect, an
//! application heartbeat, and protocol-level ping/pong liveness.

pub mod agent;
pub mod enroll;
pub mod exec;
pub mod files;
pub mod link;
pub mod session;
pub mod term;

pub use agent::Agent;
