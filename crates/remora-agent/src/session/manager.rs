//! Session registry and lifecycle
//!
//! Each session owns a pty with a shell, a blocking reader thread that
//! forwards output frames, and a watchdog task that evicts the session
//! after ten minutes without traffic in either direction. Exactly one
//! exit notification leaves per session regardless of which path tears
//! it down; deliberate closes send none.

use std::io::Read;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use remora_core::SessionError;

use crate::link::Outbound;
use crate::term::{Pty, PtySpawner};

/// Hard cap on concurrent live sessions
pub const MAX_SESSIONS: i32 = 10;
/// Sessions idle longer than this are closed by the watchdog
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(600);

const READ_BUF_SIZE: usize = 4096;
const INACTIVITY_POLL: Duration = Duration::from_secs(60);

struct Meta {
    last_activity: Instant,
    closed: bool,
}

struct TermSession {
    id: String,
    pty: Mutex<Box<dyn Pty>>,
    meta: Mutex<Meta>,
    stop: CancellationToken,
}

impl TermSession {
    /// Refresh the activity clock; false if the session is already closed
    fn touch(&self) -> bool {
        let mut meta = self.meta.lock().unwrap();
        if meta.closed {
            return false;
        }
        meta.last_activity = Instant::now();
        true
    }

    fn is_closed(&self) -> bool {
        self.meta.lock().unwrap().closed
    }

    fn idle_for(&self) -> Option<Duration> {
        let meta = self.meta.lock().unwrap();
        if meta.closed {
            None
        } else {
            Some(meta.last_activity.elapsed())
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.touch() {
            return Err(SessionError::NotFound(self.id.clone()));
        }
        self.pty.lock().unwrap().write(data)
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if !self.touch() {
            return Err(SessionError::NotFound(self.id.clone()));
        }
        self.pty.lock().unwrap().resize(cols, rows)
    }

    /// Mark closed, stop the reader and watchdog, kill the shell.
    /// Safe to call more than once.
    fn close(&self) {
        {
            let mut meta = self.meta.lock().unwrap();
            if meta.closed {
                return;
            }
            meta.closed = true;
        }
        self.stop.cancel();
        self.pty.lock().unwrap().close();
    }
}

/// Registry of live terminal sessions
pub struct SessionManager {
    sessions: DashMap<String, Arc<TermSession>>,
    count: AtomicI32,
    spawner: Arc<dyn PtySpawner>,
    outbound: Outbound,
}

impl SessionManager {
    pub fn new(outbound: Outbound, spawner: Arc<dyn PtySpawner>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            count: AtomicI32::new(0),
            spawner,
            outbound,
        })
    }

    /// Create a session with the given id and terminal size
    pub fn spawn(
        self: &Arc<Self>,
        id: &str,
        cols: u16,
        rows: u16,
        username: Option<&str>,
    ) -> Result<(), SessionError> {
        if self.count.load(Ordering::Acquire) >= MAX_SESSIONS {
            return Err(SessionError::MaxSessions);
        }

        let slot = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(SessionError::AlreadyExists(id.to_string())),
            Entry::Vacant(slot) => slot,
        };

        let mut pty = self.spawner.spawn(cols, rows, username)?;
        let reader = pty.take_reader()?;

        let session = Arc::new(TermSession {
            id: id.to_string(),
            pty: Mutex::new(pty),
            meta: Mutex::new(Meta {
                last_activity: Instant::now(),
                closed: false,
            }),
            stop: CancellationToken::new(),
        });

        slot.insert(Arc::clone(&session));
        self.count.fetch_add(1, Ordering::AcqRel);
        info!(session_id = id, cols, rows, "session spawned");

        self.start_reader(Arc::clone(&session), reader);
        self.start_watchdog(session);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Arc<TermSession>, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Forward input bytes to a session's shell
    pub fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        self.get(id)?.write(data)
    }

    /// Resize a session's terminal
    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.get(id)?.resize(cols, rows)
    }

    /// Close a session at the server's request. No exit notification.
    pub fn close(&self, id: &str) -> Result<(), SessionError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        self.count.fetch_sub(1, Ordering::AcqRel);
        session.close();
        info!(session_id = id, "session closed");
        Ok(())
    }

    /// Tear down every session, e.g. on disconnect or shutdown. Exit
    /// notifications are attempted best-effort; the connection is
    /// usually already gone.
    pub fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                self.count.fetch_sub(1, Ordering::AcqRel);
                session.close();
                let outbound = self.outbound.clone();
                let session_id = id.clone();
                tokio::spawn(async move {
                    outbound.pty_exit(&session_id, 0).await;
                });
                debug!(session_id = %id, "session closed during cleanup");
            }
        }
    }

    pub fn live_count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    /// Deregister after the shell ended on its own. Whoever removes the
    /// session from the map owns the exit notification.
    fn deregister(&self, session: &TermSession) -> bool {
        if self.sessions.remove(&session.id).is_none() {
            return false;
        }
        self.count.fetch_sub(1, Ordering::AcqRel);
        true
    }

    fn start_reader(self: &Arc<Self>, session: Arc<TermSession>, mut reader: Box<dyn Read + Send>) {
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                if session.stop.is_cancelled() {
                    return;
                }
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if !session.touch() {
                            return;
                        }
                        manager.outbound.pty_data_blocking(&session.id, &buf[..n]);
                    }
                    Err(e) => {
                        if !session.is_closed() {
                            debug!(session_id = %session.id, error = %e, "terminal read ended");
                        }
                        break;
                    }
                }
            }
            if !session.is_closed() && manager.deregister(&session) {
                info!(session_id = %session.id, "shell exited");
                // The pty read path does not surface the shell's real
                // exit status; report a normal exit.
                manager.outbound.pty_exit_blocking(&session.id, 0);
                session.close();
            }
        });
    }

    fn start_watchdog(self: &Arc<Self>, session: Arc<TermSession>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(INACTIVITY_POLL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = session.stop.cancelled() => return,
                    _ = ticker.tick() => {
                        let idle = match session.idle_for() {
                            Some(idle) => idle,
                            None => return,
                        };
                        if idle > INACTIVITY_TIMEOUT {
                            if manager.deregister(&session) {
                                info!(session_id = %session.id, ?idle, "closing inactive session");
                                manager.outbound.pty_exit(&session.id, 0).await;
                                session.close();
                            }
                            return;
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_protocol::message::PtyExitMsg;
    use remora_protocol::{types, Envelope};
    use std::sync::mpsc as std_mpsc;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    /// A scripted pty whose reader blocks until `close` drops the feed
    struct FakePty {
        feed: Option<std_mpsc::Sender<Vec<u8>>>,
        reader: Option<Box<dyn Read + Send>>,
    }

    struct FeedReader {
        rx: std_mpsc::Receiver<Vec<u8>>,
    }

    impl Read for FeedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.rx.recv() {
                Ok(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                // Feed dropped: shell "exited"
                Err(_) => Ok(0),
            }
        }
    }

    impl Pty for FakePty {
        fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, SessionError> {
            self.reader
                .take()
                .ok_or_else(|| SessionError::Spawn("reader taken".to_string()))
        }

        fn write(&mut self, _data: &[u8]) -> Result<(), SessionError> {
            Ok(())
        }

        fn resize(&mut self, _cols: u16, _rows: u16) -> Result<(), SessionError> {
            Ok(())
        }

        fn close(&mut self) {
            self.feed.take();
        }
    }

    struct FakeSpawner;

    impl PtySpawner for FakeSpawner {
        fn spawn(
            &self,
            _cols: u16,
            _rows: u16,
            _username: Option<&str>,
        ) -> Result<Box<dyn Pty>, SessionError> {
            let (tx, rx) = std_mpsc::channel();
            Ok(Box::new(FakePty {
                feed: Some(tx),
                reader: Some(Box::new(FeedReader { rx })),
            }))
        }
    }

    fn test_manager() -> (Arc<SessionManager>, mpsc::Receiver<Message>) {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::channel(64);
        outbound.attach(tx);
        let manager = SessionManager::new(outbound, Arc::new(FakeSpawner));
        (manager, rx)
    }

    async fn recv_exit(rx: &mut mpsc::Receiver<Message>) -> PtyExitMsg {
        loop {
            let msg = rx.recv().await.expect("channel closed without exit");
            if let Message::Text(text) = msg {
                let env = Envelope::parse(&text).unwrap();
                if env.msg_type == types::PTY_EXIT {
                    return env.decode_data().unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn test_spawn_rejects_at_capacity() {
        let (manager, _rx) = test_manager();
        for i in 0..MAX_SESSIONS {
            manager.spawn(&format!("sess-{i}"), 80, 24, None).unwrap();
        }
        assert!(matches!(
            manager.spawn("one-too-many", 80, 24, None),
            Err(SessionError::MaxSessions)
        ));

        // Closing one frees a slot
        manager.close("sess-0").unwrap();
        manager.spawn("replacement", 80, 24, None).unwrap();
        assert_eq!(manager.live_count(), MAX_SESSIONS);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (manager, _rx) = test_manager();
        manager.spawn("dup", 80, 24, None).unwrap();
        assert!(matches!(
            manager.spawn("dup", 80, 24, None),
            Err(SessionError::AlreadyExists(_))
        ));
        assert_eq!(manager.live_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_operations_fail() {
        let (manager, _rx) = test_manager();
        assert!(matches!(
            manager.write("ghost", b"ls\n"),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            manager.resize("ghost", 100, 30),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            manager.close("ghost"),
            Err(SessionError::NotFound(_))
        ));
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_silent_and_decrements() {
        let (manager, mut rx) = test_manager();
        manager.spawn("quiet", 80, 24, None).unwrap();
        manager.close("quiet").unwrap();
        assert_eq!(manager.live_count(), 0);

        // Deliberate closes produce no exit notification
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                let env = Envelope::parse(&text).unwrap();
                assert_ne!(env.msg_type, types::PTY_EXIT);
            }
        }
    }

    #[tokio::test]
    async fn test_close_all_clears_registry() {
        let (manager, _rx) = test_manager();
        for i in 0..3 {
            manager.spawn(&format!("s{i}"), 80, 24, None).unwrap();
        }
        manager.close_all();
        assert_eq!(manager.live_count(), 0);
        assert!(matches!(
            manager.write("s0", b"x"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_session_evicted_once() {
        let (manager, mut rx) = test_manager();
        manager.spawn("idle", 80, 24, None).unwrap();

        // Watchdog polls every minute; well past the timeout, one exit
        // notification must arrive.
        let exit = tokio::time::timeout(Duration::from_secs(3600), recv_exit(&mut rx))
            .await
            .expect("no eviction within an hour of virtual time");
        assert_eq!(exit.session_id, "idle");
        assert_eq!(exit.code, 0);
        assert_eq!(manager.live_count(), 0);

        // And exactly one: the reader's EOF path must stay silent.
        tokio::time::sleep(Duration::from_secs(120)).await;
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                let env = Envelope::parse(&text).unwrap();
                assert_ne!(env.msg_type, types::PTY_EXIT);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_defers_eviction() {
        let (manager, mut rx) = test_manager();
        manager.spawn("busy", 80, 24, None).unwrap();

        // Keep poking the session before the timeout trips
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(500)).await;
            manager.write("busy", b"uptime\n").unwrap();
        }
        assert_eq!(manager.live_count(), 1);

        // Stop writing; the watchdog now evicts
        let exit = tokio::time::timeout(Duration::from_secs(3600), recv_exit(&mut rx))
            .await
            .expect("no eviction after activity stopped");
        assert_eq!(exit.session_id, "busy");
        assert_eq!(manager.live_count(), 0);
    }
}
