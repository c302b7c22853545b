//! Shared outbound write handle
//!
//! All frames leave through one mpsc channel drained by a single writer
//! task, which serializes access to the WebSocket sink and applies the
//! per-frame write deadline. The handle survives reconnects: it is
//! attached to a fresh channel on connect and detached on loss, so
//! subsystems can hold a clone for the lifetime of the agent.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use remora_protocol::message::{CmdErrorData, CmdResultData, PtyDataMsg, PtyExitMsg};
use remora_protocol::{types, CmdErrorCode, Envelope, ProtocolError};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::{WsStream, WRITE_WAIT};

#[derive(Debug, Error)]
pub enum SendError {
    /// No connection is attached
    #[error("not connected")]
    Detached,

    /// The writer task has gone away
    #[error("outbound channel closed")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Cloneable handle for sending frames to the server
#[derive(Clone, Default)]
pub struct Outbound {
    tx: Arc<Mutex<Option<mpsc::Sender<Message>>>>,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the handle to a fresh connection's writer channel
    pub fn attach(&self, tx: mpsc::Sender<Message>) {
        *self.tx.lock().unwrap() = Some(tx);
    }

    /// Unbind; subsequent sends fail fast with `Detached`
    pub fn detach(&self) {
        *self.tx.lock().unwrap() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.tx.lock().unwrap().is_some()
    }

    fn sender(&self) -> Result<mpsc::Sender<Message>, SendError> {
        self.tx
            .lock()
            .unwrap()
            .clone()
            .ok_or(SendError::Detached)
    }

    /// Send a typed message
    pub async fn send<T: Serialize>(&self, msg_type: &str, data: &T) -> Result<(), SendError> {
        let frame = Envelope::with_data(msg_type, data)?.to_json()?;
        self.sender()?
            .send(Message::Text(frame.into()))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Send a message with no payload
    pub async fn send_empty(&self, msg_type: &str) -> Result<(), SendError> {
        let frame = Envelope::bare(msg_type).to_json()?;
        self.sender()?
            .send(Message::Text(frame.into()))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Blocking variant for non-async contexts (the pty reader thread)
    pub fn send_blocking<T: Serialize>(&self, msg_type: &str, data: &T) -> Result<(), SendError> {
        let frame = Envelope::with_data(msg_type, data)?.to_json()?;
        self.sender()?
            .blocking_send(Message::Text(frame.into()))
            .map_err(|_| SendError::Closed)
    }

    /// Protocol-level ping
    pub async fn send_ping(&self) -> Result<(), SendError> {
        self.sender()?
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Protocol-level pong (reply to a server `ping` frame)
    pub async fn send_pong(&self) -> Result<(), SendError> {
        self.sender()?
            .send(Message::Pong(Bytes::new()))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Normal-closure frame; the writer flushes it and shuts down
    pub async fn send_close(&self) -> Result<(), SendError> {
        self.sender()?
            .send(Message::Close(None))
            .await
            .map_err(|_| SendError::Closed)
    }

    // Typed fire-and-forget helpers. Send failures here mean the
    // connection is down; they are logged and dropped because the
    // server re-syncs state on reconnect.

    pub fn pty_data_blocking(&self, session_id: &str, data: &[u8]) {
        let msg = PtyDataMsg {
            session_id: session_id.to_string(),
            data: BASE64.encode(data),
        };
        if let Err(e) = self.send_blocking(types::PTY_DATA, &msg) {
            debug!(session_id, error = %e, "failed to send terminal output");
        }
    }

    pub async fn pty_exit(&self, session_id: &str, code: i32) {
        let msg = PtyExitMsg {
            session_id: session_id.to_string(),
            code,
        };
        if let Err(e) = self.send(types::PTY_EXIT, &msg).await {
            debug!(session_id, error = %e, "failed to send session exit");
        }
    }

    pub fn pty_exit_blocking(&self, session_id: &str, code: i32) {
        let msg = PtyExitMsg {
            session_id: session_id.to_string(),
            code,
        };
        if let Err(e) = self.send_blocking(types::PTY_EXIT, &msg) {
            debug!(session_id, error = %e, "failed to send session exit");
        }
    }

    pub async fn cmd_result(&self, result: &CmdResultData) {
        if let Err(e) = self.send(types::CMD_RESULT, result).await {
            error!(token = %result.token, error = %e, "failed to send command result");
        }
    }

    pub async fn cmd_error(&self, token: &str, code: CmdErrorCode, message: &str) {
        let msg = CmdErrorData {
            token: token.to_string(),
            code: code.code(),
            message: message.to_string(),
        };
        if let Err(e) = self.send(types::CMD_ERROR, &msg).await {
            error!(token, error = %e, "failed to send command error");
        }
    }
}

/// Drain the outbound channel into the sink until the channel closes,
/// a write fails, or a close frame goes out.
pub(crate) async fn run_writer(
    mut rx: mpsc::Receiver<Message>,
    mut sink: SplitSink<WsStream, Message>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        match tokio::time::timeout(WRITE_WAIT, sink.send(msg)).await {
            Ok(Ok(())) => {
                if is_close {
                    break;
                }
            }
            Ok(Err(e)) => {
                debug!(error = %e, "websocket write failed");
                break;
            }
            Err(_) => {
                warn!("websocket write deadline exceeded");
                break;
            }
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_send_fails_fast() {
        let outbound = Outbound::new();
        let err = outbound.send_empty(types::PONG).await.unwrap_err();
        assert!(matches!(err, SendError::Detached));
    }

    #[tokio::test]
    async fn test_attached_send_lands_on_channel() {
        let outbound = Outbound::new();
        let (tx, mut rx) = mpsc::channel(8);
        outbound.attach(tx);

        outbound.pty_exit("sess-1", 0).await;

        let msg = rx.recv().await.unwrap();
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        let env = Envelope::parse(&text).unwrap();
        assert_eq!(env.msg_type, types::PTY_EXIT);
        let exit: PtyExitMsg = env.decode_data().unwrap();
        assert_eq!(exit.session_id, "sess-1");
        assert_eq!(exit.code, 0);
    }

    #[tokio::test]
    async fn test_detach_cuts_off_senders() {
        let outbound = Outbound::new();
        let (tx, _rx) = mpsc::channel(8);
        outbound.attach(tx);
        assert!(outbound.is_attached());
        outbound.detach();
        assert!(!outbound.is_attached());
        let err = outbound.send_ping().await.unwrap_err();
        assert!(matches!(err, SendError::Detached));
    }

    #[tokio::test]
    async fn test_pty_data_is_base64() {
        let outbound = Outbound::new();
        let (tx, mut rx) = mpsc::channel(8);
        outbound.attach(tx);

        let outbound2 = outbound.clone();
        // blocking_send must run off the async runtime
        tokio::task::spawn_blocking(move || {
            outbound2.pty_data_blocking("sess-2", b"hello");
        })
        .await
        .unwrap();

        let Message::Text(text) = rx.recv().await.unwrap() else {
            panic!("expected text frame");
        };
        let data: PtyDataMsg = Envelope::parse(&text).unwrap().decode_data().unwrap();
        assert_eq!(BASE64.decode(data.data).unwrap(), b"hello");
    }
}
