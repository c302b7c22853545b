//! Connection supervisor and message dispatch
//!
//! One `Agent` owns the control channel for the process lifetime. It
//! dials, registers, then services inbound frames until the connection
//! dies, tearing down all sessions and redialing with backoff. Unknown
//! message types are logged and ignored so older agents keep working
//! against newer servers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use remora_core::config;
use remora_core::AgentConfig;
use remora_protocol::message::{
    ClosePtyData, ExecCmdData, HeartbeatData, PtyInputData, PtyResizeData, RegisterAckData,
    RegisterData, SpawnPtyData,
};
use remora_protocol::{types, Envelope};

use crate::exec::CommandExecutor;
use crate::files::FileOps;
use crate::link::{
    self, LinkState, Outbound, ReconnectBackoff, WsStream, MIN_RECONNECT_DELAY,
    OUTBOUND_CHANNEL_CAPACITY, PING_PERIOD, PONG_WAIT,
};
use crate::session::SessionManager;
use crate::term::NativePtySpawner;

pub struct Agent {
    config: AgentConfig,
    outbound: Outbound,
    sessions: Arc<SessionManager>,
    exec: CommandExecutor,
    files: FileOps,
    started_at: std::time::Instant,
    shutdown: CancellationToken,
    state: watch::Sender<LinkState>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let outbound = Outbound::new();
        let sessions = SessionManager::new(outbound.clone(), Arc::new(NativePtySpawner));
        let exec = CommandExecutor::new(outbound.clone());
        let files = FileOps::new(outbound.clone());
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            config,
            outbound,
            sessions,
            exec,
            files,
            started_at: std::time::Instant::now(),
            shutdown: CancellationToken::new(),
            state,
        }
    }

    /// Observe connection state changes
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    /// Run until shutdown. Redials forever when reconnect is enabled;
    /// otherwise returns after the first connection ends.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let mut backoff = ReconnectBackoff::new();
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            self.set_state(LinkState::Connecting);
            let url = self.config.websocket_url();
            info!(%url, "connecting to server");

            let stream = match link::ws_connect(&url, &self.config.token, self.config.insecure).await
            {
                Ok(stream) => stream,
                Err(e) => {
                    error!("connection failed: {e:#}");
                    self.set_state(LinkState::Disconnected);
                    if !self.config.reconnect {
                        return Err(e);
                    }
                    let delay = backoff.next_delay();
                    info!(?delay, "reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => return Ok(()),
                    }
                    continue;
                }
            };
            backoff.reset();

            let result = self.run_connection(stream).await;
            if let Err(e) = &result {
                error!("connection lost: {e:#}");
            }

            // The server forgets our sessions with the connection
            self.sessions.close_all();
            self.set_state(LinkState::Disconnected);

            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            if !self.config.reconnect {
                return result;
            }
            info!(delay = ?MIN_RECONNECT_DELAY, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(MIN_RECONNECT_DELAY) => {}
                _ = self.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    /// Request shutdown. `run` returns once the current connection
    /// winds down.
    pub fn stop(&self) {
        info!("shutting down");
        self.set_state(LinkState::Closing);
        self.sessions.close_all();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            // Best-effort normal closure; ignored when disconnected
            let _ = outbound.send_close().await;
        });
        self.shutdown.cancel();
    }

    /// Service one established connection until it ends
    async fn run_connection(self: &Arc<Self>, stream: WsStream) -> Result<()> {
        let (sink, mut stream) = stream.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        self.outbound.attach(tx);
        let writer = tokio::spawn(link::run_writer(rx, sink));

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.outbound.clone(),
            self.shutdown.clone(),
            self.started_at,
            self.config.heartbeat_secs,
        ));

        // Register failure takes the same teardown path as a read-loop
        // exit so the outbound handle never stays attached to a dead
        // connection.
        let result = match self.send_register().await {
            Ok(()) => {
                self.set_state(LinkState::Registered);
                info!(device_id = %self.config.device_id, "connected and registered");
                self.read_loop(&mut stream).await
            }
            Err(e) => Err(e),
        };

        self.outbound.detach();
        heartbeat.abort();
        let _ = heartbeat.await;
        let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
        result
    }

    /// Inbound frame loop; returns when the connection dies or
    /// shutdown is requested
    async fn read_loop(
        self: &Arc<Self>,
        stream: &mut futures::stream::SplitStream<WsStream>,
    ) -> Result<()> {
        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => break Ok(()),
                frame = tokio::time::timeout(PONG_WAIT, stream.next()) => frame,
            };
            match frame {
                Err(_) => break Err(anyhow::anyhow!("no traffic for {PONG_WAIT:?}")),
                Ok(None) => break Err(anyhow::anyhow!("connection closed by server")),
                Ok(Some(Err(e))) => break Err(e).context("websocket read failed"),
                Ok(Some(Ok(Message::Text(text)))) => {
                    match Envelope::parse(&text) {
                        Ok(env) => {
                            if let Err(e) = self.dispatch(env).await {
                                error!("message handling failed: {e:#}");
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping malformed frame"),
                    }
                }
                Ok(Some(Ok(Message::Ping(_)))) => {
                    let _ = self.outbound.send_pong().await;
                }
                // Pongs and other control frames only refresh the
                // read deadline
                Ok(Some(Ok(Message::Pong(_)))) => {}
                Ok(Some(Ok(Message::Close(_)))) => {
                    break Err(anyhow::anyhow!("server closed the connection"))
                }
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    async fn send_register(&self) -> Result<()> {
        let data = RegisterData {
            device_id: self.config.device_id.clone(),
            token: self.config.token.clone(),
            hostname: config::hostname(),
            platform: config::platform().to_string(),
            os: Some(config::os_info()),
            arch: Some(config::arch().to_string()),
            runtime_version: Some(format!("remora/{}", env!("CARGO_PKG_VERSION"))),
        };
        self.outbound
            .send(types::REGISTER, &data)
            .await
            .context("failed to send registration")
    }

    /// Route one inbound envelope to its subsystem
    async fn dispatch(self: &Arc<Self>, env: Envelope) -> Result<()> {
        match env.msg_type.as_str() {
            types::REGISTER_ACK => {
                let ack: RegisterAckData = env.decode_data()?;
                if ack.success {
                    info!("registration acknowledged");
                    self.set_state(LinkState::Active);
                } else {
                    warn!(message = ?ack.message, "registration rejected");
                }
            }
            types::PING => {
                self.outbound.send_empty(types::PONG).await.ok();
            }

            types::SPAWN_PTY => {
                let req: SpawnPtyData = env.decode_data()?;
                if let Err(e) =
                    self.sessions
                        .spawn(&req.session_id, req.cols, req.rows, req.username.as_deref())
                {
                    error!(session_id = %req.session_id, error = %e, "failed to spawn session");
                    self.outbound.pty_exit(&req.session_id, -1).await;
                }
            }
            types::PTY_INPUT => {
                let req: PtyInputData = env.decode_data()?;
                let data = BASE64
                    .decode(&req.data)
                    .context("invalid terminal input encoding")?;
                if let Err(e) = self.sessions.write(&req.session_id, &data) {
                    debug!(session_id = %req.session_id, error = %e, "dropping input");
                }
            }
            types::PTY_RESIZE => {
                let req: PtyResizeData = env.decode_data()?;
                if let Err(e) = self.sessions.resize(&req.session_id, req.cols, req.rows) {
                    debug!(session_id = %req.session_id, error = %e, "dropping resize");
                }
            }
            types::CLOSE_PTY => {
                let req: ClosePtyData = env.decode_data()?;
                if let Err(e) = self.sessions.close(&req.session_id) {
                    debug!(session_id = %req.session_id, error = %e, "close for unknown session");
                }
            }

            types::EXEC_CMD => {
                let req: ExecCmdData = env.decode_data()?;
                self.exec.execute(req).await;
            }

            types::LIST_FILES => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.list_files(req).await });
            }
            types::DOWNLOAD_FILE => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.download_file(req).await });
            }
            types::UPLOAD_FILE => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.upload_file(req).await });
            }
            types::CREATE_FILE => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.create_file(req).await });
            }
            types::CREATE_FOLDER => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.create_folder(req).await });
            }
            types::DELETE_ITEM => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.delete_item(req).await });
            }
            types::COPY_ITEM => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.copy_item(req).await });
            }
            types::MOVE_ITEM => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.move_item(req).await });
            }
            types::RENAME_ITEM => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.rename_item(req).await });
            }
            types::STREAM_FILE_INFO => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.stream_file_info(req).await });
            }
            types::STREAM_CHUNK => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.stream_chunk(req).await });
            }
            types::COMPRESS_FILES => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.compress_files(req).await });
            }
            types::GET_DIR_STATS => {
                let req = env.decode_data()?;
                let files = self.files.clone();
                tokio::spawn(async move { files.get_dir_stats(req).await });
            }

            other => {
                debug!(msg_type = other, "ignoring unknown message type");
            }
        }
        Ok(())
    }
}

/// Periodic application heartbeat plus protocol pings
async fn heartbeat_loop(
    outbound: Outbound,
    shutdown: CancellationToken,
    started_at: std::time::Instant,
    heartbeat_secs: u64,
) {
    let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_secs));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = heartbeat.tick() => {
                let uptime = started_at.elapsed().as_secs() as i64;
                if let Err(e) = outbound.send(types::HEARTBEAT, &HeartbeatData { uptime }).await {
                    debug!(error = %e, "heartbeat stopped");
                    return;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = outbound.send_ping().await {
                    debug!(error = %e, "ping loop stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AgentConfig {
        AgentConfig {
            server_addr: "localhost:1".to_string(),
            device_id: "test-device".to_string(),
            token: "tok".to_string(),
            tls: false,
            insecure: false,
            reconnect: false,
            heartbeat_secs: 30,
            debug: false,
        }
    }

    #[tokio::test]
    async fn test_unknown_message_type_ignored() {
        let agent = Arc::new(Agent::new(test_config()));
        let env = Envelope::parse(r#"{"type":"brand_new_feature","data":{"x":1}}"#).unwrap();
        agent.dispatch(env).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let agent = Arc::new(Agent::new(test_config()));
        // spawn_pty without its payload
        let env = Envelope::parse(r#"{"type":"spawn_pty"}"#).unwrap();
        assert!(agent.dispatch(env).await.is_err());
    }

    #[tokio::test]
    async fn test_register_ack_activates_link() {
        let agent = Arc::new(Agent::new(test_config()));
        let state = agent.state();
        let env = Envelope::parse(r#"{"type":"register_ack","data":{"success":true}}"#).unwrap();
        agent.dispatch(env).await.unwrap();
        assert_eq!(*state.borrow(), LinkState::Active);
    }

    #[tokio::test]
    async fn test_invalid_pty_input_encoding_rejected() {
        let agent = Arc::new(Agent::new(test_config()));
        let env = Envelope::parse(
            r#"{"type":"pty_input","data":{"sessionId":"s1","data":"not-base64!!!"}}"#,
        )
        .unwrap();
        assert!(agent.dispatch(env).await.is_err());
    }

    #[tokio::test]
    async fn test_run_without_reconnect_fails_fast() {
        // Nothing listens on port 1; with reconnect off the run loop
        // must surface the dial error instead of retrying.
        let agent = Arc::new(Agent::new(test_config()));
        let result = tokio::time::timeout(Duration::from_secs(30), agent.run()).await;
        assert!(result.expect("run should return promptly").is_err());
    }

    #[tokio::test]
    async fn test_connection_teardown_detaches_outbound() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Complete the handshake, then vanish
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);
        });

        let mut config = test_config();
        config.server_addr = addr.to_string();
        let agent = Arc::new(Agent::new(config));
        let stream = link::ws_connect(&format!("ws://{addr}/ws/agent"), "tok", false)
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(30), agent.run_connection(stream))
            .await
            .expect("connection should die promptly");
        assert!(result.is_err());
        // Every exit path must unbind the handle from the dead channel
        assert!(!agent.outbound.is_attached());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_run() {
        let mut config = test_config();
        config.reconnect = true;
        let agent = Arc::new(Agent::new(config));
        let runner = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        agent.stop();
        let result = tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .expect("run did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
