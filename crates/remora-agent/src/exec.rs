//! Bounded one-shot command executor
//!
//! Admission is a counting semaphore with no queue: when all slots are
//! taken the request is refused immediately. Validation happens in
//! request order (identity, executable lookup, timeout clamp) before a
//! slot is claimed, so a rejected request never burns one.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use remora_protocol::message::{CmdResultData, ExecCmdData};
use remora_protocol::CmdErrorCode;

use crate::link::Outbound;

/// Commands running at once, across all callers
pub const CMD_RUNNING_LIMIT: usize = 5;
/// Applied when the request carries no timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Requested timeouts are clamped to this
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Combined base64 stdout+stderr ceiling; larger results are refused
/// so a single reply never blows the frame size limit.
const MAX_RESPONSE_B64: usize = 65_000;

pub struct CommandExecutor {
    slots: Arc<Semaphore>,
    outbound: Outbound,
}

impl CommandExecutor {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(CMD_RUNNING_LIMIT)),
            outbound,
        }
    }

    /// Validate and launch a command request. Always answers the
    /// request token, either with `cmd_result` or `cmd_error`.
    pub async fn execute(&self, req: ExecCmdData) {
        // 1. Impersonation identity
        let identity: Option<(u32, u32)> = {
            #[cfg(unix)]
            {
                match req.username.as_deref().filter(|name| !name.is_empty()) {
                    Some(name) => match crate::term::unix::lookup_user(name) {
                        Some(user) => Some((user.uid, user.gid)),
                        None => {
                            error!(token = %req.token, user = name, "unknown user for command");
                            self.outbound
                                .cmd_error(
                                    &req.token,
                                    CmdErrorCode::PermissionDenied,
                                    CmdErrorCode::PermissionDenied.message(),
                                )
                                .await;
                            return;
                        }
                    },
                    None => None,
                }
            }
            #[cfg(not(unix))]
            {
                // Impersonation is a no-op on Windows
                let _ = &req.username;
                None
            }
        };

        // 2. Executable lookup
        let path = match resolve_command(&req.command) {
            Some(path) => path,
            None => {
                error!(token = %req.token, command = %req.command, "command not found");
                self.outbound
                    .cmd_error(
                        &req.token,
                        CmdErrorCode::NotFound,
                        CmdErrorCode::NotFound.message(),
                    )
                    .await;
                return;
            }
        };

        // 3. Timeout clamp
        let timeout = clamp_timeout(req.timeout);

        // 4. Admission
        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(token = %req.token, limit = CMD_RUNNING_LIMIT, "command slots exhausted");
                self.outbound
                    .cmd_error(
                        &req.token,
                        CmdErrorCode::TooManyConcurrent,
                        CmdErrorCode::TooManyConcurrent.message(),
                    )
                    .await;
                return;
            }
        };

        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let _slot = permit;
            run_command(outbound, path, req, timeout, identity).await;
        });
    }
}

async fn run_command(
    outbound: Outbound,
    path: PathBuf,
    req: ExecCmdData,
    timeout: Duration,
    identity: Option<(u32, u32)>,
) {
    debug!(token = %req.token, command = %path.display(), args = ?req.args, ?timeout, "running command");

    let mut cmd = tokio::process::Command::new(&path);
    cmd.args(&req.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    if let Some((uid, gid)) = identity {
        cmd.uid(uid);
        cmd.gid(gid);
    }
    #[cfg(not(unix))]
    let _ = identity;

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(token = %req.token, error = %e, "failed to spawn command");
            outbound
                .cmd_error(&req.token, CmdErrorCode::SystemError, &e.to_string())
                .await;
            return;
        }
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        // Dropping the future kills the child (kill_on_drop)
        Err(_) => {
            error!(token = %req.token, command = %path.display(), ?timeout, "command timeout");
            outbound
                .cmd_error(&req.token, CmdErrorCode::SystemError, "command timeout")
                .await;
            return;
        }
        Ok(Err(e)) => {
            error!(token = %req.token, error = %e, "failed to collect command output");
            outbound
                .cmd_error(&req.token, CmdErrorCode::SystemError, &e.to_string())
                .await;
            return;
        }
        Ok(Ok(output)) => output,
    };

    // Signal-killed processes report -1
    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = BASE64.encode(&output.stdout);
    let stderr = BASE64.encode(&output.stderr);

    if stdout.len() + stderr.len() > MAX_RESPONSE_B64 {
        warn!(token = %req.token, size = stdout.len() + stderr.len(), "command output too large");
        outbound
            .cmd_error(
                &req.token,
                CmdErrorCode::ResponseTooBig,
                CmdErrorCode::ResponseTooBig.message(),
            )
            .await;
        return;
    }

    outbound
        .cmd_result(&CmdResultData {
            token: req.token,
            exit_code,
            stdout,
            stderr,
        })
        .await;
}

/// Clamp a requested timeout into the supported window
pub(crate) fn clamp_timeout(requested: Option<u64>) -> Duration {
    match requested {
        Some(secs) if secs > 0 => Duration::from_secs(secs).min(MAX_TIMEOUT),
        _ => DEFAULT_TIMEOUT,
    }
}

/// Resolve a command name against PATH. Names containing a separator
/// are taken as-is.
pub(crate) fn resolve_command(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let full = dir.join(name);
        if is_executable(&full) {
            return Some(full);
        }
        #[cfg(windows)]
        for ext in ["exe", "cmd", "bat"] {
            let with_ext = full.with_extension(ext);
            if is_executable(&with_ext) {
                return Some(with_ext);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_protocol::message::CmdErrorData;
    use remora_protocol::{types, Envelope};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn test_executor() -> (CommandExecutor, mpsc::Receiver<Message>) {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::channel(64);
        outbound.attach(tx);
        (CommandExecutor::new(outbound), rx)
    }

    fn request(command: &str, args: &[&str], timeout: Option<u64>) -> ExecCmdData {
        ExecCmdData {
            token: "tok-1".to_string(),
            username: None,
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout,
        }
    }

    async fn recv_envelope(rx: &mut mpsc::Receiver<Message>) -> Envelope {
        let msg = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no reply in time")
            .expect("channel closed");
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        Envelope::parse(&text).unwrap()
    }

    #[test]
    fn test_timeout_clamping() {
        assert_eq!(clamp_timeout(None), DEFAULT_TIMEOUT);
        assert_eq!(clamp_timeout(Some(0)), DEFAULT_TIMEOUT);
        assert_eq!(clamp_timeout(Some(120)), Duration::from_secs(120));
        assert_eq!(clamp_timeout(Some(100_000)), MAX_TIMEOUT);
    }

    #[test]
    fn test_resolve_command_misses() {
        assert!(resolve_command("definitely-not-a-real-command-xyz").is_none());
        assert!(resolve_command("").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_command_finds_sh() {
        let path = resolve_command("sh").expect("sh should be on PATH");
        assert!(path.is_absolute());
    }

    #[tokio::test]
    async fn test_unknown_command_reports_not_found() {
        let (executor, mut rx) = test_executor();
        executor
            .execute(request("definitely-not-a-real-command-xyz", &[], None))
            .await;
        let env = recv_envelope(&mut rx).await;
        assert_eq!(env.msg_type, types::CMD_ERROR);
        let err: CmdErrorData = env.decode_data().unwrap();
        assert_eq!(err.code, CmdErrorCode::NotFound.code());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unknown_user_reports_permission_denied() {
        let (executor, mut rx) = test_executor();
        let mut req = request("sh", &["-c", "true"], None);
        req.username = Some("no-such-user-xyz".to_string());
        executor.execute(req).await;
        let err: CmdErrorData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert_eq!(err.code, CmdErrorCode::PermissionDenied.code());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exhausted_slots_refused_immediately() {
        let (executor, mut rx) = test_executor();
        let _held: Vec<_> = (0..CMD_RUNNING_LIMIT)
            .map(|_| executor.slots.clone().try_acquire_owned().unwrap())
            .collect();

        executor.execute(request("sh", &["-c", "true"], None)).await;
        let err: CmdErrorData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert_eq!(err.code, CmdErrorCode::TooManyConcurrent.code());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_result_carries_exit_code_and_output() {
        let (executor, mut rx) = test_executor();
        executor
            .execute(request("sh", &["-c", "printf hi; exit 3"], None))
            .await;
        let env = recv_envelope(&mut rx).await;
        assert_eq!(env.msg_type, types::CMD_RESULT);
        let result: CmdResultData = env.decode_data().unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(BASE64.decode(result.stdout).unwrap(), b"hi");
        assert!(BASE64.decode(result.stderr).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_and_reports() {
        let (executor, mut rx) = test_executor();
        executor
            .execute(request("sh", &["-c", "sleep 30"], Some(1)))
            .await;
        let err: CmdErrorData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert_eq!(err.code, CmdErrorCode::SystemError.code());
        assert_eq!(err.message, "command timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_oversized_output_refused() {
        let (executor, mut rx) = test_executor();
        executor
            .execute(request("sh", &["-c", "head -c 60000 /dev/zero"], None))
            .await;
        let err: CmdErrorData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert_eq!(err.code, CmdErrorCode::ResponseTooBig.code());
    }
}
