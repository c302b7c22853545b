//! Windows pty backend (ConPTY via portable-pty)
//!
//! Prefers PowerShell and falls back to cmd.exe. Running the shell as a
//! different user is not supported here; the username hint is ignored.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize, PtySystem};
use tracing::debug;

use remora_core::SessionError;

use super::{Pty, PtySpawner};

fn default_shell() -> &'static str {
    let system_root = std::env::var("SystemRoot").unwrap_or_else(|_| "C:\\Windows".to_string());
    let powershell = format!(
        "{system_root}\\System32\\WindowsPowerShell\\v1.0\\powershell.exe"
    );
    if std::path::Path::new(&powershell).exists() {
        "powershell.exe"
    } else {
        "cmd.exe"
    }
}

pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(
        &self,
        cols: u16,
        rows: u16,
        username: Option<&str>,
    ) -> Result<Box<dyn Pty>, SessionError> {
        if let Some(name) = username.filter(|n| !n.is_empty()) {
            debug!(user = name, "per-user shells are not supported on Windows");
        }

        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(default_shell());
        cmd.env("TERM", "xterm-256color");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        drop(pair.slave);

        let killer = child.clone_killer();
        // ConPTY keeps the read side open after the shell dies; reap the
        // child on a waiter thread so the handle is not leaked.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        Ok(Box::new(WindowsPty {
            master: pair.master,
            killer,
            writer,
            reader: Some(reader),
            closed: false,
        }))
    }
}

struct WindowsPty {
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    writer: Box<dyn Write + Send>,
    reader: Option<Box<dyn Read + Send>>,
    closed: bool,
}

impl Pty for WindowsPty {
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, SessionError> {
        self.reader
            .take()
            .ok_or_else(|| SessionError::Spawn("terminal reader already taken".to_string()))
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Spawn(e.to_string()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.killer.kill() {
            debug!(error = %e, "failed to kill shell process");
        }
    }
}

impl Drop for WindowsPty {
    fn drop(&mut self) {
        self.close();
    }
}
