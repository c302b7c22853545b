//! Pseudo-terminal backends
//!
//! A thin trait over platform pty implementations so the session manager
//! can be driven by scripted terminals in tests. The native spawner uses
//! `portable-pty` on every platform; the per-OS modules differ only in
//! which shell they launch and how they run it as another user.

use std::io::Read;

use remora_core::SessionError;

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(windows)]
pub(crate) mod windows;

#[cfg(unix)]
pub use unix::NativePtySpawner;
#[cfg(windows)]
pub use windows::NativePtySpawner;

/// A live pseudo-terminal with a shell attached
pub trait Pty: Send {
    /// Take the output reader. May only be called once per pty.
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, SessionError>;

    /// Write raw input bytes to the shell
    fn write(&mut self, data: &[u8]) -> Result<(), SessionError>;

    /// Change the terminal window size
    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), SessionError>;

    /// Kill the shell and release the terminal. Idempotent.
    fn close(&mut self);
}

/// Factory for ptys; the seam between the session manager and the OS
pub trait PtySpawner: Send + Sync {
    fn spawn(
        &self,
        cols: u16,
        rows: u16,
        username: Option<&str>,
    ) -> Result<Box<dyn Pty>, SessionError>;
}
