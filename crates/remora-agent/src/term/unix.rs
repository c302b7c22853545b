//! Unix pty backend
//!
//! Launches the user's login shell (`$SHELL -l`, falling back to
//! `/bin/sh`) on a portable-pty pair. When a target username is supplied
//! the home directory and identity env vars are adjusted best-effort;
//! an unknown user falls back to the agent's own environment.

use std::ffi::{CStr, CString};
use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use remora_core::SessionError;

use super::{Pty, PtySpawner};

/// Resolved passwd entry for a local user
#[derive(Debug, Clone)]
pub(crate) struct UserInfo {
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

/// Look up a local user by name. Returns `None` for unknown users and
/// lookup failures alike.
pub(crate) fn lookup_user(name: &str) -> Option<UserInfo> {
    let cname = CString::new(name).ok()?;
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe {
        libc::getpwnam_r(
            cname.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    let home = if pwd.pw_dir.is_null() {
        PathBuf::new()
    } else {
        PathBuf::from(unsafe { CStr::from_ptr(pwd.pw_dir) }.to_string_lossy().into_owned())
    };
    Some(UserInfo {
        uid: pwd.pw_uid,
        gid: pwd.pw_gid,
        home,
    })
}

/// Resolve a uid to its user name, if any
pub(crate) fn user_name_for_uid(uid: u32) -> Option<String> {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(pwd.pw_name) }.to_string_lossy().into_owned())
}

/// Resolve a gid to its group name, if any
pub(crate) fn group_name_for_gid(gid: u32) -> Option<String> {
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 4096];
    let mut result: *mut libc::group = std::ptr::null_mut();
    let rc = unsafe {
        libc::getgrgid_r(
            gid,
            &mut grp,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() || grp.gr_name.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(grp.gr_name) }.to_string_lossy().into_owned())
}

pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(
        &self,
        cols: u16,
        rows: u16,
        username: Option<&str>,
    ) -> Result<Box<dyn Pty>, SessionError> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.arg("-l");
        cmd.env("TERM", "xterm-256color");

        if let Some(name) = username.filter(|n| !n.is_empty()) {
            match lookup_user(name) {
                Some(user) if user.home.as_os_str().is_empty() => {
                    debug!(user = name, "user has no home directory, keeping agent environment");
                }
                Some(user) => {
                    cmd.cwd(&user.home);
                    cmd.env("HOME", &user.home);
                    cmd.env("USER", name);
                    cmd.env("LOGNAME", name);
                }
                None => {
                    warn!(user = name, "unknown user, keeping agent environment");
                }
            }
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        // Drop our slave handle so the reader sees EOF when the shell exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        Ok(Box::new(UnixPty {
            master: pair.master,
            child,
            writer,
            reader: Some(reader),
            closed: false,
        }))
    }
}

struct UnixPty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    reader: Option<Box<dyn Read + Send>>,
    closed: bool,
}

impl Pty for UnixPty {
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
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "failed to kill shell process");
        }
        let _ = self.child.wait();
    }
}

impl Drop for UnixPty {
    fn drop(&mut self) {
        self.close();
    }
}
