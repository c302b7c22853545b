//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The envelope or a payload failed to serialize/deserialize
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope carried no `data` field but the handler expected one
    #[error("message of type '{0}' has no data payload")]
    MissingData(String),
}
