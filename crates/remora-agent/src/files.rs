//! Remote file management
//!
//! Every handler answers its request id exactly once, with either the
//! typed success payload or a `file_error`. Paths starting with `~` are
//! expanded against the agent's home directory. Heavy work (recursive
//! copies, directory walks, archive creation) runs off the async
//! runtime.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, error, warn};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use remora_protocol::message::{
    CompressFilesData, CopyItemData, CreateFileData, CreateFolderData, DeleteItemData,
    DirStatsData, DownloadFileData, FileContentData, FileErrorData, FileItem, FileListData,
    FileOpResultData, GetDirStatsData, ListFilesData, MoveItemData, RenameItemData,
    StreamChunkData, StreamChunkResponseData, StreamFileInfoData, StreamFileInfoResponseData,
    UploadFileData,
};
use remora_protocol::types;

use crate::link::Outbound;

/// Error codes mirrored from HTTP semantics
const ERR_BAD_REQUEST: i32 = 400;
const ERR_NOT_FOUND: i32 = 404;
const ERR_INTERNAL: i32 = 500;

/// Largest raw chunk served per stream request, pre-base64
const MAX_STREAM_CHUNK: u64 = 48_000;

/// Archive creation deadline
const COMPRESS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

#[derive(Clone)]
pub struct FileOps {
    outbound: Outbound,
}

impl FileOps {
    pub fn new(outbound: Outbound) -> Self {
        Self { outbound }
    }

    async fn send_error(&self, request_id: &str, code: i32, message: String) {
        warn!(request_id, code, %message, "file operation failed");
        let data = FileErrorData {
            request_id: request_id.to_string(),
            code,
            message,
        };
        if let Err(e) = self.outbound.send(types::FILE_ERROR, &data).await {
            error!(request_id, error = %e, "failed to send file error");
        }
    }

    async fn send_ok(&self, request_id: &str, message: Option<String>, unique_name: Option<String>) {
        let data = FileOpResultData {
            request_id: request_id.to_string(),
            success: true,
            message,
            unique_name,
        };
        if let Err(e) = self.outbound.send(types::FILE_OP_RESULT, &data).await {
            error!(request_id, error = %e, "failed to send file op result");
        }
    }

    /// List a directory's entries
    pub async fn list_files(&self, req: ListFilesData) {
        let path = expand_path(&req.path);
        debug!(request_id = %req.request_id, path = %path.display(), "listing directory");

        let mut dir = match tokio::fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) => {
                let code = io_error_code(&e);
                self.send_error(&req.request_id, code, format!("failed to read directory: {e}"))
                    .await;
                return;
            }
        };

        let mut files = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let entry_path = entry.path();
            match file_item(&entry_path).await {
                Some(item) => files.push(item),
                // Entries that vanish mid-listing are skipped
                None => continue,
            }
        }

        files.sort_by(|a, b| {
            let a_dir = a.kind == "directory";
            let b_dir = b.kind == "directory";
            b_dir
                .cmp(&a_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        let data = FileListData {
            request_id: req.request_id.clone(),
            path: path.display().to_string(),
            files,
        };
        if let Err(e) = self.outbound.send(types::FILE_LIST, &data).await {
            error!(request_id = %req.request_id, error = %e, "failed to send file list");
        }
    }

    /// Read a whole file and return it base64 encoded
    pub async fn download_file(&self, req: DownloadFileData) {
        let path = expand_path(&req.path);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) => {
                self.send_error(&req.request_id, io_error_code(&e), format!("failed to read file: {e}"))
                    .await;
                return;
            }
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = FileContentData {
            request_id: req.request_id.clone(),
            path: path.display().to_string(),
            mime_type: mime_type_for(&path).to_string(),
            size: content.len() as u64,
            content: BASE64.encode(&content),
            file_name,
        };
        if let Err(e) = self.outbound.send(types::FILE_CONTENT, &data).await {
            error!(request_id = %req.request_id, error = %e, "failed to send file content");
        }
    }

    /// Write an uploaded file into a directory, overwriting
    pub async fn upload_file(&self, req: UploadFileData) {
        let dir = expand_path(&req.path);
        let target = dir.join(&req.file_name);
        let content = match BASE64.decode(&req.content) {
            Ok(content) => content,
            Err(e) => {
                self.send_error(&req.request_id, ERR_BAD_REQUEST, format!("invalid file content: {e}"))
                    .await;
                return;
            }
        };

        if let Err(e) = tokio::fs::write(&target, &content).await {
            self.send_error(&req.request_id, io_error_code(&e), format!("failed to write file: {e}"))
                .await;
            return;
        }
        debug!(request_id = %req.request_id, path = %target.display(), size = content.len(), "file uploaded");
        self.send_ok(&req.request_id, Some(format!("uploaded {}", req.file_name)), None)
            .await;
    }

    /// Create a new (possibly empty) file; refuses to overwrite
    pub async fn create_file(&self, req: CreateFileData) {
        let target = expand_path(&req.path).join(&req.file_name);
        let content = match req.content.as_deref().map(|c| BASE64.decode(c)).transpose() {
            Ok(content) => content.unwrap_or_default(),
            Err(e) => {
                self.send_error(&req.request_id, ERR_BAD_REQUEST, format!("invalid file content: {e}"))
                    .await;
                return;
            }
        };

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            self.send_error(
                &req.request_id,
                ERR_BAD_REQUEST,
                format!("already exists: {}", target.display()),
            )
            .await;
            return;
        }
        if let Err(e) = tokio::fs::write(&target, &content).await {
            self.send_error(&req.request_id, io_error_code(&e), format!("failed to create file: {e}"))
                .await;
            return;
        }
        self.send_ok(&req.request_id, Some(format!("created {}", req.file_name)), None)
            .await;
    }

    /// Create a folder, including missing parents
    pub async fn create_folder(&self, req: CreateFolderData) {
        let target = expand_path(&req.path).join(&req.folder_name);
        if let Err(e) = tokio::fs::create_dir_all(&target).await {
            self.send_error(&req.request_id, io_error_code(&e), format!("failed to create folder: {e}"))
                .await;
            return;
        }
        self.send_ok(&req.request_id, Some(format!("created {}", req.folder_name)), None)
            .await;
    }

    /// Delete a file or directory tree
    pub async fn delete_item(&self, req: DeleteItemData) {
        let target = expand_path(&req.path);
        let result = if req.is_directory {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        if let Err(e) = result {
            self.send_error(&req.request_id, io_error_code(&e), format!("failed to delete: {e}"))
                .await;
            return;
        }
        debug!(request_id = %req.request_id, path = %target.display(), "item deleted");
        self.send_ok(&req.request_id, Some("deleted".to_string()), None).await;
    }

    /// Copy a file or directory into a target directory, resolving name
    /// conflicts with a " (N)" suffix
    pub async fn copy_item(&self, req: CopyItemData) {
        let source = expand_path(&req.source_path);
        let target_dir = expand_path(&req.target_dir);

        let Some(base_name) = source.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            self.send_error(&req.request_id, ERR_BAD_REQUEST, "invalid source path".to_string())
                .await;
            return;
        };

        let (target, unique_name) = match unique_target(&target_dir, &base_name).await {
            Some(resolved) => resolved,
            None => {
                self.send_error(
                    &req.request_id,
                    ERR_INTERNAL,
                    format!("no free name for {base_name} in {}", target_dir.display()),
                )
                .await;
                return;
            }
        };

        let copy_result = tokio::task::spawn_blocking({
            let source = source.clone();
            let target = target.clone();
            move || copy_recursive(&source, &target)
        })
        .await;

        match copy_result {
            Ok(Ok(())) => {
                self.send_ok(&req.request_id, Some("copied".to_string()), unique_name)
                    .await;
            }
            Ok(Err(e)) => {
                self.send_error(&req.request_id, io_error_code(&e), format!("failed to copy: {e}"))
                    .await;
            }
            Err(e) => {
                self.send_error(&req.request_id, ERR_INTERNAL, format!("copy task failed: {e}"))
                    .await;
            }
        }
    }

    /// Move a file or directory; falls back to copy+delete across
    /// filesystems
    pub async fn move_item(&self, req: MoveItemData) {
        let source = expand_path(&req.source_path);
        let target = expand_path(&req.target_path);

        if tokio::fs::rename(&source, &target).await.is_ok() {
            self.send_ok(&req.request_id, Some("moved".to_string()), None).await;
            return;
        }

        let result = tokio::task::spawn_blocking({
            let source = source.clone();
            let target = target.clone();
            move || {
                copy_recursive(&source, &target)?;
                if source.is_dir() {
                    std::fs::remove_dir_all(&source)
                } else {
                    std::fs::remove_file(&source)
                }
            }
        })
        .await;

        match result {
            Ok(Ok(())) => self.send_ok(&req.request_id, Some("moved".to_string()), None).await,
            Ok(Err(e)) => {
                self.send_error(&req.request_id, io_error_code(&e), format!("failed to move: {e}"))
                    .await;
            }
            Err(e) => {
                self.send_error(&req.request_id, ERR_INTERNAL, format!("move task failed: {e}"))
                    .await;
            }
        }
    }

    /// Rename an item in place; refuses to overwrite
    pub async fn rename_item(&self, req: RenameItemData) {
        let source = expand_path(&req.path);
        let Some(parent) = source.parent() else {
            self.send_error(&req.request_id, ERR_BAD_REQUEST, "invalid path".to_string())
                .await;
            return;
        };
        let target = parent.join(&req.new_name);

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            self.send_error(
                &req.request_id,
                ERR_BAD_REQUEST,
                format!("already exists: {}", target.display()),
            )
            .await;
            return;
        }
        if let Err(e) = tokio::fs::rename(&source, &target).await {
            self.send_error(&req.request_id, io_error_code(&e), format!("failed to rename: {e}"))
                .await;
            return;
        }
        self.send_ok(&req.request_id, Some("renamed".to_string()), None).await;
    }

    /// Report size and mime type ahead of a chunked download
    pub async fn stream_file_info(&self, req: StreamFileInfoData) {
        let path = expand_path(&req.path);
        let mut data = StreamFileInfoResponseData {
            request_id: req.request_id.clone(),
            path: path.display().to_string(),
            ..Default::default()
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                data.file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                data.mime_type = mime_type_for(&path).to_string();
                data.size = meta.len();
            }
            Ok(_) => data.error = Some("not a regular file".to_string()),
            Err(e) => data.error = Some(e.to_string()),
        }

        if let Err(e) = self.outbound.send(types::STREAM_FILE_INFO_RESPONSE, &data).await {
            error!(request_id = %req.request_id, error = %e, "failed to send stream info");
        }
    }

    /// Serve one chunk of a file for a streamed download
    pub async fn stream_chunk(&self, req: StreamChunkData) {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let path = expand_path(&req.path);
        let mut data = StreamChunkResponseData {
            request_id: req.request_id.clone(),
            offset: req.offset,
            ..Default::default()
        };

        let chunk = async {
            let mut file = tokio::fs::File::open(&path).await?;
            file.seek(std::io::SeekFrom::Start(req.offset)).await?;
            let want = req.length.min(MAX_STREAM_CHUNK) as usize;
            let mut buf = vec![0u8; want];
            let mut filled = 0;
            while filled < want {
                let n = file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok::<Vec<u8>, std::io::Error>(buf)
        }
        .await;

        match chunk {
            Ok(chunk) => {
                data.length = chunk.len() as u64;
                data.data = BASE64.encode(&chunk);
            }
            Err(e) => data.error = Some(e.to_string()),
        }

        if let Err(e) = self.outbound.send(types::STREAM_CHUNK_RESPONSE, &data).await {
            error!(request_id = %req.request_id, error = %e, "failed to send stream chunk");
        }
    }

    /// Build an archive from a set of paths using the system archiver
    pub async fn compress_files(&self, req: CompressFilesData) {
        if req.paths.is_empty() {
            self.send_error(&req.request_id, ERR_BAD_REQUEST, "no paths given".to_string())
                .await;
            return;
        }

        let first = expand_path(&req.paths[0]);
        let Some(working_dir) = first.parent().map(Path::to_path_buf) else {
            self.send_error(&req.request_id, ERR_BAD_REQUEST, "invalid path".to_string())
                .await;
            return;
        };

        // Archive relative names so the archive does not embed absolute paths
        let names: Vec<String> = req
            .paths
            .iter()
            .map(|p| {
                let path = expand_path(p);
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.clone())
            })
            .collect();

        let format = req.format.as_deref().unwrap_or("zip");
        let mut cmd = tokio::process::Command::new(archiver_program(format));
        cmd.current_dir(&working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        match format {
            "zip" => {
                cmd.arg("-r").arg(&req.archive_name).args(&names);
            }
            "tar.gz" | "tgz" => {
                cmd.arg("-czf").arg(&req.archive_name).args(&names);
            }
            "tar.bz2" | "tbz2" => {
                cmd.arg("-cjf").arg(&req.archive_name).args(&names);
            }
            "tar.xz" => {
                cmd.arg("-cJf").arg(&req.archive_name).args(&names);
            }
            "tar" => {
                cmd.arg("-cf").arg(&req.archive_name).args(&names);
            }
            "7z" => {
                cmd.arg("a").arg(&req.archive_name).args(&names);
            }
            other => {
                self.send_error(
                    &req.request_id,
                    ERR_BAD_REQUEST,
                    format!("unsupported archive format: {other}"),
                )
                .await;
                return;
            }
        }

        let output = match tokio::time::timeout(COMPRESS_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.send_error(&req.request_id, ERR_INTERNAL, format!("archiver failed to start: {e}"))
                    .await;
                return;
            }
            Err(_) => {
                self.send_error(&req.request_id, ERR_INTERNAL, "archive creation timed out".to_string())
                    .await;
                return;
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            self.send_error(
                &req.request_id,
                ERR_INTERNAL,
                format!("archiver exited with {}: {}", output.status, stderr.trim()),
            )
            .await;
            return;
        }

        let archive = working_dir.join(&req.archive_name);
        self.send_ok(
            &req.request_id,
            Some(archive.display().to_string()),
            None,
        )
        .await;
    }

    /// Walk a directory tree and report totals; unreadable entries are
    /// skipped rather than failing the walk
    pub async fn get_dir_stats(&self, req: GetDirStatsData) {
        let path = expand_path(&req.path);
        let mut data = DirStatsData {
            request_id: req.request_id.clone(),
            path: path.display().to_string(),
            ..Default::default()
        };

        let stats = tokio::task::spawn_blocking({
            let path = path.clone();
            move || {
                let mut stats = WalkStats::default();
                walk_dir(&path, &mut stats);
                stats
            }
        })
        .await;

        match stats {
            Ok(stats) => {
                data.total_size = stats.total_size;
                data.file_count = stats.file_count;
                data.folder_count = stats.folder_count;
            }
            Err(e) => data.error = Some(format!("walk task failed: {e}")),
        }

        if let Err(e) = self.outbound.send(types::DIR_STATS, &data).await {
            error!(request_id = %req.request_id, error = %e, "failed to send dir stats");
        }
    }
}

fn archiver_program(format: &str) -> &'static str {
    match format {
        "zip" => "zip",
        "7z" => "7z",
        _ => "tar",
    }
}

/// Expand a leading `~` against the home directory
pub(crate) fn expand_path(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_default();
        if !home.is_empty() {
            if path == "~" {
                return PathBuf::from(home);
            }
            return Path::new(&home).join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

fn io_error_code(e: &std::io::Error) -> i32 {
    match e.kind() {
        std::io::ErrorKind::NotFound => ERR_NOT_FOUND,
        std::io::ErrorKind::PermissionDenied => ERR_BAD_REQUEST,
        _ => ERR_INTERNAL,
    }
}

/// Build a directory listing entry; `None` if the entry vanished
async fn file_item(path: &Path) -> Option<FileItem> {
    let meta = tokio::fs::symlink_metadata(path).await.ok()?;
    let name = path.file_name()?.to_string_lossy().into_owned();

    let kind = if meta.is_dir() {
        "directory"
    } else if meta.file_type().is_symlink() {
        "link"
    } else {
        "file"
    };

    let link_target = if meta.file_type().is_symlink() {
        tokio::fs::read_link(path)
            .await
            .ok()
            .map(|t| t.display().to_string())
    } else {
        None
    };

    let mut item = FileItem {
        name,
        path: path.display().to_string(),
        kind: kind.to_string(),
        size: meta.len(),
        mod_time: format_mod_time(meta.modified().ok()),
        permissions: permissions_string(&meta),
        link_target,
        ..Default::default()
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        use std::os::unix::fs::PermissionsExt;
        item.executable = meta.is_file() && meta.permissions().mode() & 0o111 != 0;
        item.owner = crate::term::unix::user_name_for_uid(meta.uid())
            .or_else(|| Some(meta.uid().to_string()));
        item.group = crate::term::unix::group_name_for_gid(meta.gid())
            .or_else(|| Some(meta.gid().to_string()));
    }

    Some(item)
}

fn format_mod_time(modified: Option<SystemTime>) -> String {
    match modified {
        Some(time) => chrono::DateTime::<chrono::Local>::from(time).to_rfc3339(),
        None => String::new(),
    }
}

#[cfg(unix)]
fn permissions_string(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    let mode = meta.permissions().mode();
    let type_char = if meta.is_dir() {
        'd'
    } else if meta.file_type().is_symlink() {
        'l'
    } else {
        '-'
    };
    let mut out = String::with_capacity(10);
    out.push(type_char);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(not(unix))]
fn permissions_string(meta: &std::fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "-r--r--r--".to_string()
    } else {
        "-rw-rw-rw-".to_string()
    }
}

/// Pick a target path in `dir` for `name`, appending " (N)" before the
/// extension until the name is free. `None` after 100 attempts.
async fn unique_target(dir: &Path, name: &str) -> Option<(PathBuf, Option<String>)> {
    let direct = dir.join(name);
    if !tokio::fs::try_exists(&direct).await.unwrap_or(false) {
        return Some((direct, None));
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (name.to_string(), None),
    };

    for n in 1..=100u32 {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(&candidate_name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some((candidate, Some(candidate_name)));
        }
    }
    None
}

/// Copy a file or a whole directory tree
fn copy_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(source)?;
    if meta.is_dir() {
        std::fs::create_dir_all(target)?;
        for entry in std::fs::read_dir(source)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &target.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        std::fs::copy(source, target).map(|_| ())
    }
}

#[derive(Default)]
struct WalkStats {
    total_size: u64,
    file_count: u64,
    folder_count: u64,
}

fn walk_dir(path: &Path, stats: &mut WalkStats) {
    let Ok(entries) = std::fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            stats.folder_count += 1;
            walk_dir(&entry.path(), stats);
        } else {
            stats.file_count += 1;
            stats.total_size += meta.len();
        }
    }
}

/// Guess a mime type from the file extension
pub(crate) fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" | "md" | "conf" | "cfg" | "ini" | "toml" | "yaml" | "yml" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_protocol::Envelope;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn test_ops() -> (FileOps, mpsc::Receiver<Message>) {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::channel(64);
        outbound.attach(tx);
        (FileOps::new(outbound), rx)
    }

    async fn recv_envelope(rx: &mut mpsc::Receiver<Message>) -> Envelope {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
            .await
            .expect("no reply in time")
            .expect("channel closed");
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        Envelope::parse(&text).unwrap()
    }

    #[test]
    fn test_expand_path_tilde() {
        // Only a leading ~/ expands
        assert_eq!(expand_path("/tmp/~x"), PathBuf::from("/tmp/~x"));

        // Check against whatever home the environment provides rather
        // than mutating process-global state under a parallel suite
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_default();
        if home.is_empty() {
            return;
        }
        assert_eq!(expand_path("~"), PathBuf::from(&home));
        assert_eq!(expand_path("~/docs"), Path::new(&home).join("docs"));
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type_for(Path::new("a.json")), "application/json");
        assert_eq!(mime_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_string_shape() {
        let dir = tempfile::tempdir().unwrap();
        let meta = std::fs::metadata(dir.path()).unwrap();
        let perms = permissions_string(&meta);
        assert_eq!(perms.len(), 10);
        assert!(perms.starts_with('d'));
    }

    #[tokio::test]
    async fn test_list_missing_directory_errors() {
        let (ops, mut rx) = test_ops();
        ops.list_files(ListFilesData {
            request_id: "r1".to_string(),
            path: "/definitely/not/a/real/dir".to_string(),
        })
        .await;
        let env = recv_envelope(&mut rx).await;
        assert_eq!(env.msg_type, types::FILE_ERROR);
        let err: FileErrorData = env.decode_data().unwrap();
        assert_eq!(err.request_id, "r1");
        assert_eq!(err.code, ERR_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_directory_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let (ops, mut rx) = test_ops();
        ops.list_files(ListFilesData {
            request_id: "r2".to_string(),
            path: dir.path().display().to_string(),
        })
        .await;

        let env = recv_envelope(&mut rx).await;
        assert_eq!(env.msg_type, types::FILE_LIST);
        let list: FileListData = env.decode_data().unwrap();
        assert_eq!(list.files.len(), 2);
        // Directories sort first
        assert_eq!(list.files[0].name, "sub");
        assert_eq!(list.files[0].kind, "directory");
        assert_eq!(list.files[1].name, "b.txt");
        assert_eq!(list.files[1].size, 5);
    }

    #[tokio::test]
    async fn test_download_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, br#"{"k":1}"#).unwrap();

        let (ops, mut rx) = test_ops();
        ops.download_file(DownloadFileData {
            request_id: "r3".to_string(),
            path: path.display().to_string(),
        })
        .await;

        let content: FileContentData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert_eq!(content.file_name, "data.json");
        assert_eq!(content.mime_type, "application/json");
        assert_eq!(BASE64.decode(content.content).unwrap(), br#"{"k":1}"#);
    }

    #[tokio::test]
    async fn test_upload_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (ops, mut rx) = test_ops();
        ops.upload_file(UploadFileData {
            request_id: "r4".to_string(),
            path: dir.path().display().to_string(),
            file_name: "up.bin".to_string(),
            content: BASE64.encode(b"payload"),
        })
        .await;

        let result: FileOpResultData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert!(result.success);
        assert_eq!(std::fs::read(dir.path().join("up.bin")).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_create_file_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("exists.txt"), b"x").unwrap();

        let (ops, mut rx) = test_ops();
        ops.create_file(CreateFileData {
            request_id: "r5".to_string(),
            path: dir.path().display().to_string(),
            file_name: "exists.txt".to_string(),
            content: None,
        })
        .await;

        let env = recv_envelope(&mut rx).await;
        assert_eq!(env.msg_type, types::FILE_ERROR);
        // Original content untouched
        assert_eq!(std::fs::read(dir.path().join("exists.txt")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_copy_resolves_name_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("doc.txt");
        std::fs::write(&source, b"original").unwrap();

        let (ops, mut rx) = test_ops();
        // Copy into the same directory: "doc.txt" is taken
        ops.copy_item(CopyItemData {
            request_id: "r6".to_string(),
            source_path: source.display().to_string(),
            target_dir: dir.path().display().to_string(),
        })
        .await;

        let result: FileOpResultData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert!(result.success);
        assert_eq!(result.unique_name.as_deref(), Some("doc (1).txt"));
        assert_eq!(
            std::fs::read(dir.path().join("doc (1).txt")).unwrap(),
            b"original"
        );
    }

    #[tokio::test]
    async fn test_move_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"x").unwrap();

        let (ops, mut rx) = test_ops();
        ops.move_item(MoveItemData {
            request_id: "r7".to_string(),
            source_path: source.display().to_string(),
            target_path: dir.path().join("b.txt").display().to_string(),
        })
        .await;
        let result: FileOpResultData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert!(result.success);
        assert!(!source.exists());

        ops.rename_item(RenameItemData {
            request_id: "r8".to_string(),
            path: dir.path().join("b.txt").display().to_string(),
            new_name: "c.txt".to_string(),
        })
        .await;
        let result: FileOpResultData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert!(result.success);
        assert!(dir.path().join("c.txt").exists());
    }

    #[tokio::test]
    async fn test_stream_chunk_respects_offset_and_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let (ops, mut rx) = test_ops();
        ops.stream_chunk(StreamChunkData {
            request_id: "r9".to_string(),
            path: path.display().to_string(),
            offset: 4,
            length: 100,
        })
        .await;

        let chunk: StreamChunkResponseData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert!(chunk.error.is_none());
        assert_eq!(chunk.offset, 4);
        assert_eq!(chunk.length, 6);
        assert_eq!(BASE64.decode(chunk.data).unwrap(), b"456789");
    }

    #[tokio::test]
    async fn test_dir_stats_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"12345").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b"), b"123").unwrap();

        let (ops, mut rx) = test_ops();
        ops.get_dir_stats(GetDirStatsData {
            request_id: "r10".to_string(),
            path: dir.path().display().to_string(),
        })
        .await;

        let stats: DirStatsData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.folder_count, 1);
        assert_eq!(stats.total_size, 8);
    }

    #[tokio::test]
    async fn test_delete_file_and_tree() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gone.txt");
        std::fs::write(&file, b"x").unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir(&tree).unwrap();
        std::fs::write(tree.join("inner"), b"y").unwrap();

        let (ops, mut rx) = test_ops();
        ops.delete_item(DeleteItemData {
            request_id: "r11".to_string(),
            path: file.display().to_string(),
            is_directory: false,
        })
        .await;
        let result: FileOpResultData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert!(result.success);
        assert!(!file.exists());

        ops.delete_item(DeleteItemData {
            request_id: "r12".to_string(),
            path: tree.display().to_string(),
            is_directory: true,
        })
        .await;
        let result: FileOpResultData = recv_envelope(&mut rx).await.decode_data().unwrap();
        assert!(result.success);
        assert!(!tree.exists());
    }
}
