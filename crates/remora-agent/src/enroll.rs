//! One-shot enrollment exchange
//!
//! Dials the server with a one-time install token, registers, waits for
//! the acknowledgment carrying the long-lived agent token, and stores
//! the result in the OS keychain. The connection is dropped afterwards;
//! the normal run loop picks the credentials up on next start.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use remora_core::credentials::{self, StoredCredentials};
use remora_core::config;
use remora_protocol::message::{EnrollAckData, RegisterData};
use remora_protocol::{types, Envelope};

use crate::link;

const ENROLL_ACK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EnrollOptions {
    pub server: String,
    pub install_token: String,
    pub device_id: Option<String>,
    pub tls: bool,
    pub insecure: bool,
}

pub async fn enroll(opts: EnrollOptions) -> Result<()> {
    let device_id = opts.device_id.unwrap_or_else(config::hostname);
    let scheme = if opts.tls { "wss" } else { "ws" };
    let url = format!("{scheme}://{}/ws/agent", opts.server);

    info!(server = %opts.server, device_id = %device_id, "enrolling with server");
    let stream = link::ws_connect(&url, &opts.install_token, opts.insecure)
        .await
        .context("failed to connect for enrollment")?;
    let (mut sink, mut stream) = stream.split();

    let register = RegisterData {
        device_id: device_id.clone(),
        token: opts.install_token.clone(),
        hostname: config::hostname(),
        platform: config::platform().to_string(),
        os: Some(config::os_info()),
        arch: Some(config::arch().to_string()),
        runtime_version: Some(format!("remora/{}", env!("CARGO_PKG_VERSION"))),
    };
    let frame = Envelope::with_data(types::REGISTER, &register)?.to_json()?;
    sink.send(Message::Text(frame.into()))
        .await
        .context("failed to send registration")?;

    let ack: EnrollAckData = loop {
        let msg = tokio::time::timeout(ENROLL_ACK_TIMEOUT, stream.next())
            .await
            .map_err(|_| anyhow!("timed out waiting for enrollment response"))?
            .ok_or_else(|| anyhow!("connection closed during enrollment"))?
            .context("websocket read failed during enrollment")?;
        match msg {
            Message::Text(text) => {
                let env = Envelope::parse(&text)?;
                if env.msg_type != types::REGISTER_ACK {
                    bail!("unexpected response type: {}", env.msg_type);
                }
                break env.decode_data()?;
            }
            Message::Close(_) => bail!("connection closed during enrollment"),
            _ => continue,
        }
    };
    let _ = sink.close().await;

    if !ack.success {
        bail!(
            "enrollment rejected: {}",
            ack.message.unwrap_or_else(|| "no reason given".to_string())
        );
    }
    let agent_token = ack
        .agent_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("server did not return an agent token"))?;
    let agent_id = ack.agent_id.unwrap_or_default();

    if let Some(flags) = &ack.config {
        debug!(
            terminal = flags.enable_terminal,
            files = flags.enable_file_manager,
            tunnels = flags.enable_tunnels,
            "feature flags granted"
        );
    }

    let creds = StoredCredentials {
        server_addr: opts.server.clone(),
        agent_token,
        agent_id: agent_id.clone(),
        device_id: device_id.clone(),
        tls: opts.tls,
    };
    credentials::save(&creds).context("failed to store credentials in keychain")?;

    info!(agent_id = %agent_id, "enrollment successful");
    println!("Enrolled with {} as {} (agent id: {})", opts.server, device_id, agent_id);
    println!("Credentials stored in the OS keychain. Start the agent with: remora-agent");
    Ok(())
}
