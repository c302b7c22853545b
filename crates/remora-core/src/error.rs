//! Core error types for remora

use thiserror::Error;

/// Session manager errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Live session count is at capacity
    #[error("maximum sessions reached")]
    MaxSessions,

    /// A live session already uses this id
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// No live session with this id
    #[error("session not found: {0}")]
    NotFound(String),

    /// PTY allocation or shell spawn failed
    #[error("failed to spawn session: {0}")]
    Spawn(String),

    /// I/O failure on the underlying terminal
    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required field is empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Credential store errors
#[derive(Error, Debug)]
pub enum CredentialError {
    /// No credentials are stored (agent is not enrolled)
    #[error("no stored credentials")]
    NotEnrolled,

    /// Keychain access failed
    #[error("keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    /// Stored blob failed to decode
    #[error("corrupt stored credentials: {0}")]
    Corrupt(#[from] serde_json::Error),
}
