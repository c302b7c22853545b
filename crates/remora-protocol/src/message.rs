//! Typed payloads for the remora control channel
//!
//! Field names follow the server's JSON conventions (camelCase, optional
//! fields omitted when empty). Directionality is implied by the message
//! type, not encoded in the payload.

use serde::{Deserialize, Serialize};

/// Message type discriminators
pub mod types {
    // Agent -> Server
    pub const REGISTER: &str = "register";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const PTY_DATA: &str = "pty_data";
    pub const PTY_EXIT: &str = "pty_exit";
    pub const CMD_RESULT: &str = "cmd_result";
    pub const CMD_ERROR: &str = "cmd_error";
    pub const PONG: &str = "pong";

    // File operation responses (Agent -> Server)
    pub const FILE_LIST: &str = "file_list";
    pub const FILE_CONTENT: &str = "file_content";
    pub const FILE_OP_RESULT: &str = "file_op_result";
    pub const FILE_ERROR: &str = "file_error";
    pub const STREAM_FILE_INFO_RESPONSE: &str = "stream_file_info_response";
    pub const STREAM_CHUNK_RESPONSE: &str = "stream_chunk_response";
    pub const DIR_STATS: &str = "dir_stats";

    // Server -> Agent
    pub const REGISTER_ACK: &str = "register_ack";
    pub const SPAWN_PTY: &str = "spawn_pty";
    pub const PTY_INPUT: &str = "pty_input";
    pub const PTY_RESIZE: &str = "pty_resize";
    pub const CLOSE_PTY: &str = "close_pty";
    pub const EXEC_CMD: &str = "exec_cmd";
    pub const PING: &str = "ping";

    // File operations (Server -> Agent)
    pub const LIST_FILES: &str = "list_files";
    pub const DOWNLOAD_FILE: &str = "download_file";
    pub const UPLOAD_FILE: &str = "upload_file";
    pub const CREATE_FILE: &str = "create_file";
    pub const CREATE_FOLDER: &str = "create_folder";
    pub const DELETE_ITEM: &str = "delete_item";
    pub const COPY_ITEM: &str = "copy_item";
    pub const MOVE_ITEM: &str = "move_item";
    pub const RENAME_ITEM: &str = "rename_item";
    pub const STREAM_FILE_INFO: &str = "stream_file_info";
    pub const STREAM_CHUNK: &str = "stream_chunk";
    pub const COMPRESS_FILES: &str = "compress_files";
    pub const GET_DIR_STATS: &str = "get_dir_stats";
}

/// Stable numeric codes reported in `cmd_error` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum CmdErrorCode {
    /// No error
    None = 0,
    /// Impersonation identity could not be resolved
    PermissionDenied = 1,
    /// Executable not found on the search path
    NotFound = 2,
    /// All execution slots are taken
    TooManyConcurrent = 3,
    /// Launch failure or timeout
    SystemError = 4,
    /// Encoded stdout+stderr exceed the transport message ceiling
    ResponseTooBig = 5,
}

impl CmdErrorCode {
    /// Numeric wire code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Canonical human-readable message for this code
    pub fn message(self) -> &'static str {
        match self {
            CmdErrorCode::None => "",
            CmdErrorCode::PermissionDenied => "operation not permitted",
            CmdErrorCode::NotFound => "command not found",
            CmdErrorCode::TooManyConcurrent => "too many concurrent commands",
            CmdErrorCode::SystemError => "system error",
            CmdErrorCode::ResponseTooBig => "response too large",
        }
    }
}

// --- Agent -> Server payloads ---

/// Sent immediately after the connection opens to identify the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterData {
    pub device_id: String,
    pub token: String,
    pub hostname: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
}

/// Periodic application-level heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatData {
    /// Seconds since the agent process started
    pub uptime: i64,
}

/// Terminal output forwarded to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtyDataMsg {
    pub session_id: String,
    /// base64 encoded
    pub data: String,
}

/// Session termination notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtyExitMsg {
    pub session_id: String,
    pub code: i32,
}

/// Result of a completed command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmdResultData {
    pub token: String,
    pub exit_code: i32,
    /// base64 encoded
    pub stdout: String,
    /// base64 encoded
    pub stderr: String,
}

/// Negative response to an `exec_cmd` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdErrorData {
    pub token: String,
    pub code: i32,
    pub message: String,
}

// --- Server -> Agent payloads ---

/// Server response to registration; only affects logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAckData {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Enrollment acknowledgment: the richer `register_ack` returned when
/// connecting with a one-time install token
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollAckData {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<FeatureFlags>,
}

/// Feature flags granted at enrollment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlags {
    pub enable_terminal: bool,
    pub enable_file_manager: bool,
    pub enable_tunnels: bool,
}

/// Request to create a new PTY session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnPtyData {
    pub session_id: String,
    pub cols: u16,
    pub rows: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Input for a PTY session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtyInputData {
    pub session_id: String,
    /// base64 encoded
    pub data: String,
}

/// Terminal resize request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtyResizeData {
    pub session_id: String,
    pub cols: u16,
    pub rows: u16,
}

/// Request to close a PTY session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePtyData {
    pub session_id: String,
}

/// Ad-hoc command execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCmdData {
    /// Opaque correlation id supplied by the caller
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Requested timeout in seconds; clamped by the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

// --- File operation requests (Server -> Agent) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesData {
    pub request_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFileData {
    pub request_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileData {
    pub request_id: String,
    pub path: String,
    pub file_name: String,
    /// base64 encoded
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileData {
    pub request_id: String,
    pub path: String,
    pub file_name: String,
    /// base64 encoded, optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderData {
    pub request_id: String,
    pub path: String,
    pub folder_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteItemData {
    pub request_id: String,
    pub path: String,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyItemData {
    pub request_id: String,
    pub source_path: String,
    pub target_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveItemData {
    pub request_id: String,
    pub source_path: String,
    pub target_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameItemData {
    pub request_id: String,
    pub path: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFileInfoData {
    pub request_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunkData {
    pub request_id: String,
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressFilesData {
    pub request_id: String,
    pub paths: Vec<String>,
    pub archive_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDirStatsData {
    pub request_id: String,
    pub path: String,
}

// --- File operation responses (Agent -> Server) ---

/// One directory entry in a `file_list` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    pub name: String,
    pub path: String,
    /// "file", "directory" or "link"
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
    pub mod_time: String,
    pub permissions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListData {
    pub request_id: String,
    pub path: String,
    pub files: Vec<FileItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContentData {
    pub request_id: String,
    pub path: String,
    pub file_name: String,
    /// base64 encoded
    pub content: String,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOpResultData {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set when a copy resolved a name conflict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileErrorData {
    pub request_id: String,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFileInfoResponseData {
    pub request_id: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunkResponseData {
    pub request_id: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub length: u64,
    /// base64 encoded chunk
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirStatsData {
    pub request_id: String,
    pub path: String,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub file_count: u64,
    #[serde(default)]
    pub folder_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
