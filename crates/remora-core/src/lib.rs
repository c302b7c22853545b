//! remora-core: Configuration, errors, and credential storage
//!
//! Shared types used by the agent runtime: the connection configuration,
//! the error taxonomy for sessions and credentials, and the OS-keychain
//! backed credential store.

pub mod config;
pub mod credentials;
pub mod error;

pub use config::AgentConfig;
pub use credentials::StoredCredentials;
pub use error::{CredentialError, SessionError};
