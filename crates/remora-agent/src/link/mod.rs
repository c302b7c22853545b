//! Connection plumbing for the control channel
//!
//! `ws_connect` dials the server with a bearer token, `Outbound` is the
//! shared write handle all subsystems send through, and
//! `ReconnectBackoff` paces redial attempts.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

mod backoff;
mod outbound;

pub use backoff::ReconnectBackoff;
pub use outbound::{Outbound, SendError};
pub(crate) use outbound::run_writer;

/// Deadline for a single outbound frame write
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// The connection is considered dead after this long without traffic
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Protocol ping cadence; must beat `PONG_WAIT`
pub const PING_PERIOD: Duration = Duration::from_secs(PONG_WAIT.as_secs() * 9 / 10);
/// Largest inbound frame the agent will accept; oversized frames fail
/// the read and tear down the connection
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
/// WebSocket handshake deadline
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// First and post-disconnect reconnect delay
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Backoff ceiling
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Outbound queue depth before senders start blocking
pub(crate) const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the control channel, published over a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Registered,
    Active,
    Closing,
}

/// Protocol limits applied to every connection
fn ws_config() -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(MAX_MESSAGE_SIZE))
        .max_frame_size(Some(MAX_MESSAGE_SIZE))
}

/// Dial the server. The token rides in an `Authorization: Bearer` header;
/// `insecure` disables certificate verification for wss URLs.
pub async fn ws_connect(url: &str, token: &str, insecure: bool) -> Result<WsStream> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid server URL: {url}"))?;
    if !token.is_empty() {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("token is not a valid header value")?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(insecure)
        .build()
        .context("failed to build TLS connector")?;

    let (stream, _response) = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        connect_async_tls_with_config(
            request,
            Some(ws_config()),
            false,
            Some(Connector::NativeTls(tls)),
        ),
    )
    .await
    .map_err(|_| anyhow!("handshake timed out after {HANDSHAKE_TIMEOUT:?}"))?
    .context("websocket handshake failed")?;

    Ok(stream)
}
