//! The peer-facing message set (spec 4.1).
//!
//! Field order on every variant is the wire contract: the codec encodes
//! fields positionally, in the order documented on each variant below. A
//! new field is always appended to the end of its variant's tuple and the
//! envelope's major version is bumped — see [`crate::envelope`].

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Which standard stream a chunk of terminal data belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

impl Stream {
    /// Stable integer tag for the wire encoding.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }

    /// Recover a [`Stream`] from its wire tag.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// Kind of a remote file-system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

impl EntryKind {
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::File => 0,
            Self::Directory => 1,
            Self::Symlink => 2,
            Self::Unknown => 3,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::File),
            1 => Some(Self::Directory),
            2 => Some(Self::Symlink),
            3 => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// One entry returned by `FileListResponse`: `(name, entry_type, size, mode, modified)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub entry_type: EntryKind,
    pub size: u64,
    /// Unix permission bits (owner/group/other), as reported by the daemon.
    pub mode: u32,
    /// Seconds since epoch, as reported by the daemon (the orchestrator
    /// scales this to milliseconds when publishing to the file store).
    pub modified: u64,
}

/// The full peer-facing message set. Field order per variant is documented
/// inline and is exactly the order the codec reads/writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Fields: `cols, rows, shell?, env: [(k, v)...], cwd?`.
    SessionCreate {
        cols: u16,
        rows: u16,
        shell: Option<String>,
        env: Vec<(String, String)>,
        cwd: Option<String>,
    },
    /// Fields: `session_id, pid`.
    SessionCreated { session_id: SessionId, pid: u32 },
    /// Fields: `session_id`.
    SessionAttach { session_id: SessionId },
    /// Fields: `session_id`.
    SessionDetach { session_id: SessionId },
    /// Fields: `session_id, signal?`.
    SessionKill {
        session_id: SessionId,
        signal: Option<u32>,
    },
    /// Fields: `session_id, cols, rows`.
    SessionResize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    /// Fields: `session_id, stream, data`.
    SessionData {
        session_id: SessionId,
        stream: Stream,
        data: Vec<u8>,
    },
    /// Fields: `session_id, exit_code?, signal?, reason?`.
    SessionClosed {
        session_id: SessionId,
        exit_code: Option<i32>,
        signal: Option<u32>,
        reason: Option<String>,
    },
    /// Fields: `path, include_hidden`.
    FileListRequest { path: String, include_hidden: bool },
    /// Fields: `path, entries`.
    FileListResponse {
        path: String,
        entries: Vec<RemoteEntry>,
    },
    /// Fields: `path, offset, chunk_size`.
    FileDownloadRequest {
        path: String,
        offset: u64,
        chunk_size: u32,
    },
    /// Fields: `path, offset, total_size, data, is_last`.
    FileDownloadChunk {
        path: String,
        offset: u64,
        total_size: u64,
        data: Vec<u8>,
        is_last: bool,
    },
    /// Fields: `path, size, mode, overwrite`.
    FileUploadStart {
        path: String,
        size: u64,
        mode: u32,
        overwrite: bool,
    },
    /// Fields: `path, offset, data`.
    FileUploadChunk {
        path: String,
        offset: u64,
        data: Vec<u8>,
    },
    /// Fields: `path, checksum` (32-byte SHA-256 digest).
    FileUploadComplete { path: String, checksum: [u8; 32] },
    /// Fields: `name, version`.
    DeviceInfo { name: String, version: String },
    /// Fields: `device_id, device_name`.
    DeviceApprovalRequest {
        device_id: String,
        device_name: String,
    },
    /// Fields: `device_id`.
    DeviceApproved { device_id: String },
    /// Fields: `device_id, reason?`.
    DeviceRejected {
        device_id: String,
        reason: Option<String>,
    },
    /// Fields: `nonce`.
    Ping { nonce: u64 },
    /// Fields: `nonce`.
    Pong { nonce: u64 },
    /// Fields: `code, message, context?, recoverable`.
    Error {
        code: u32,
        message: String,
        context: Option<String>,
        recoverable: bool,
    },
    /// Fields: `features: [String...]`.
    Capabilities { features: Vec<String> },
}

impl Message {
    /// The string type tag written as the first element of the 2-element
    /// `[type_tag, fields]` payload sequence (spec 4.1).
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            Self::SessionCreate { .. } => "SessionCreate",
            Self::SessionCreated { .. } => "SessionCreated",
            Self::SessionAttach { .. } => "SessionAttach",
            Self::SessionDetach { .. } => "SessionDetach",
            Self::SessionKill { .. } => "SessionKill",
            Self::SessionResize { .. } => "SessionResize",
            Self::SessionData { .. } => "SessionData",
            Self::SessionClosed { .. } => "SessionClosed",
            Self::FileListRequest { .. } => "FileListRequest",
            Self::FileListResponse { .. } => "FileListResponse",
            Self::FileDownloadRequest { .. } => "FileDownloadRequest",
            Self::FileDownloadChunk { .. } => "FileDownloadChunk",
            Self::FileUploadStart { .. } => "FileUploadStart",
            Self::FileUploadChunk { .. } => "FileUploadChunk",
            Self::FileUploadComplete { .. } => "FileUploadComplete",
            Self::DeviceInfo { .. } => "DeviceInfo",
            Self::DeviceApprovalRequest { .. } => "DeviceApprovalRequest",
            Self::DeviceApproved { .. } => "DeviceApproved",
            Self::DeviceRejected { .. } => "DeviceRejected",
            Self::Ping { .. } => "Ping",
            Self::Pong { .. } => "Pong",
            Self::Error { .. } => "Error",
            Self::Capabilities { .. } => "Capabilities",
        }
    }
}
