//! File store (spec 4.6, data model 3.3): remote directory listing,
//! selection, and transfer bookkeeping. `receive_chunk` is the download
//! ingress the orchestrator drives from inbound `FileDownloadChunk`s.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use shellcore_proto::ids::TransferId;

use super::now_ms;
use crate::events::{EventBus, SubscriptionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permissions {
    /// Owner bits of a Unix mode: `0o400` read, `0o200` write, `0o100`
    /// execute (spec 4.9: `FileListResponse` conversion).
    #[must_use]
    pub const fn from_mode(mode: u32) -> Self {
        Self {
            read: mode & 0o400 != 0,
            write: mode & 0o200 != 0,
            execute: mode & 0o100 != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub entry_type: EntryType,
    pub size: u64,
    pub modified_at: u64,
    pub permissions: Permissions,
    pub is_hidden: bool,
}

impl FileEntry {
    #[must_use]
    pub fn new(name: String, path: String, entry_type: EntryType, size: u64, modified_at: u64, mode: u32) -> Self {
        let is_hidden = name.starts_with('.');
        Self {
            name,
            path,
            entry_type,
            size,
            modified_at,
            permissions: Permissions::from_mode(mode),
            is_hidden,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Name,
    Size,
    ModifiedAt,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: TransferId,
    pub file_name: String,
    pub file_path: String,
    pub direction: TransferDirection,
    pub status: TransferStatus,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("chunk offset {got} does not match expected cumulative offset {expected} for transfer {id}")]
    NonMonotonicChunk {
        id: TransferId,
        expected: u64,
        got: u64,
    },
    #[error("no in-progress download transfer for path {0:?}")]
    NoSuchDownload(String),
}

#[derive(Debug, Clone)]
pub enum FileEvent {
    Navigated(String),
    EntriesUpdated(Vec<FileEntry>),
    SelectionChanged(Vec<String>),
    TransferStarted(Transfer),
    TransferProgress { id: TransferId, transferred_bytes: u64 },
    TransferCompleted { id: TransferId },
    TransferFailed { id: TransferId, error: String },
    Error(String),
    /// Write event: the orchestrator sends `FileDownloadRequest(path,
    /// offset=0, chunk_size)` in response (spec 4.9).
    DownloadRequested { path: String, transfer_id: TransferId },
}

struct State {
    current_path: String,
    entries: Vec<FileEntry>,
    selected_paths: HashSet<String>,
    transfers: std::collections::HashMap<TransferId, Transfer>,
    is_loading: bool,
    error: Option<String>,
    sort_by: SortBy,
    sort_ascending: bool,
    show_hidden: bool,
}

pub struct FileStore {
    state: Mutex<State>,
    events: Arc<EventBus<FileEvent>>,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                current_path: "/".to_string(),
                entries: Vec::new(),
                selected_paths: HashSet::new(),
                transfers: std::collections::HashMap::new(),
                is_loading: false,
                error: None,
                sort_by: SortBy::Name,
                sort_ascending: true,
                show_hidden: false,
            }),
            events: Arc::new(EventBus::new()),
        }
    }

    #[must_use]
    pub fn current_path(&self) -> String {
        self.state.lock().current_path.clone()
    }

    #[must_use]
    pub fn show_hidden(&self) -> bool {
        self.state.lock().show_hidden
    }

    /// Issues a `files:navigate` write event; the orchestrator turns this
    /// into a `FileListRequest`.
    pub fn navigate(&self, path: String) {
        self.state.lock().current_path.clone_from(&path);
        self.events.emit(&FileEvent::Navigated(path));
    }

    pub fn refresh(&self) {
        let path = self.state.lock().current_path.clone();
        self.events.emit(&FileEvent::Navigated(path));
    }

    /// Replaces the listing for the current directory, applying the
    /// hidden filter before sorting directories-first, then by the
    /// configured key (spec 4.6).
    pub fn set_entries(&self, mut entries: Vec<FileEntry>) {
        let (sort_by, ascending, show_hidden) = {
            let s = self.state.lock();
            (s.sort_by, s.sort_ascending, s.show_hidden)
        };
        if !show_hidden {
            entries.retain(|e| !e.is_hidden);
        }
        sort_entries(&mut entries, sort_by, ascending);
        self.state.lock().entries = entries.clone();
        self.events.emit(&FileEvent::EntriesUpdated(entries));
    }

    pub fn set_sort(&self, sort_by: SortBy, ascending: bool) {
        let entries = {
            let mut s = self.state.lock();
            s.sort_by = sort_by;
            s.sort_ascending = ascending;
            sort_entries(&mut s.entries, sort_by, ascending);
            s.entries.clone()
        };
        self.events.emit(&FileEvent::EntriesUpdated(entries));
    }

    pub fn toggle_hidden(&self) {
        let entries = {
            let mut s = self.state.lock();
            s.show_hidden = !s.show_hidden;
            sort_entries(&mut s.entries, s.sort_by, s.sort_ascending);
            s.entries.clone()
        };
        self.events.emit(&FileEvent::EntriesUpdated(entries));
    }

    pub fn select(&self, path: String) {
        let mut s = self.state.lock();
        s.selected_paths.insert(path);
        let selected = s.selected_paths.iter().cloned().collect();
        drop(s);
        self.events.emit(&FileEvent::SelectionChanged(selected));
    }

    pub fn deselect(&self, path: &str) {
        let mut s = self.state.lock();
        s.selected_paths.remove(path);
        let selected = s.selected_paths.iter().cloned().collect();
        drop(s);
        self.events.emit(&FileEvent::SelectionChanged(selected));
    }

    pub fn select_all(&self) {
        let mut s = self.state.lock();
        s.selected_paths = s.entries.iter().map(|e| e.path.clone()).collect();
        let selected = s.selected_paths.iter().cloned().collect();
        drop(s);
        self.events.emit(&FileEvent::SelectionChanged(selected));
    }

    pub fn clear_selection(&self) {
        self.state.lock().selected_paths.clear();
        self.events.emit(&FileEvent::SelectionChanged(Vec::new()));
    }

    /// Registers a new transfer and emits `TransferStarted`.
    pub fn start_transfer(
        &self,
        file_name: String,
        file_path: String,
        direction: TransferDirection,
        total_bytes: u64,
    ) -> TransferId {
        let transfer = Transfer {
            id: TransferId::new(),
            file_name,
            file_path,
            direction,
            status: TransferStatus::InProgress,
            total_bytes,
            transferred_bytes: 0,
            started_at: now_ms(),
            completed_at: None,
            error: None,
        };
        let id = transfer.id;
        self.state.lock().transfers.insert(id, transfer.clone());
        self.events.emit(&FileEvent::TransferStarted(transfer));
        id
    }

    /// Emits `files:download` for the orchestrator to turn into the
    /// initial `FileDownloadRequest`.
    pub fn request_download(&self, path: String, total_bytes: u64) -> TransferId {
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        let id = self.start_transfer(name, path.clone(), TransferDirection::Download, total_bytes);
        self.events.emit(&FileEvent::DownloadRequested { path, transfer_id: id });
        id
    }

    pub fn progress(&self, id: TransferId, transferred_bytes: u64) {
        if let Some(t) = self.state.lock().transfers.get_mut(&id) {
            t.transferred_bytes = transferred_bytes;
        }
        self.events.emit(&FileEvent::TransferProgress { id, transferred_bytes });
    }

    /// Download ingress (spec 4.6): asserts `offset` equals the
    /// cumulative bytes received so far, appends, and finalizes on
    /// `is_last`.
    pub fn receive_chunk(
        &self,
        path: &str,
        offset: u64,
        bytes: &[u8],
        total: u64,
        is_last: bool,
    ) -> Result<(), FileStoreError> {
        let (id, completed) = {
            let mut s = self.state.lock();
            let transfer = s
                .transfers
                .values_mut()
                .find(|t| {
                    t.file_path == path
                        && t.direction == TransferDirection::Download
                        && t.status == TransferStatus::InProgress
                })
                .ok_or_else(|| FileStoreError::NoSuchDownload(path.to_string()))?;

            if transfer.transferred_bytes != offset {
                return Err(FileStoreError::NonMonotonicChunk {
                    id: transfer.id,
                    expected: transfer.transferred_bytes,
                    got: offset,
                });
            }
            transfer.transferred_bytes += bytes.len() as u64;
            transfer.total_bytes = total;
            let id = transfer.id;
            if is_last {
                transfer.status = TransferStatus::Completed;
                transfer.completed_at = Some(now_ms());
            }
            (id, is_last)
        };

        self.events.emit(&FileEvent::TransferProgress {
            id,
            transferred_bytes: offset + bytes.len() as u64,
        });
        if completed {
            self.events.emit(&FileEvent::TransferCompleted { id });
        }
        Ok(())
    }

    /// Fails the transfer matching `path` (spec 4.9: inbound `Error` with
    /// path context, or a checksum mismatch).
    pub fn fail_by_path(&self, path: &str, error: String) {
        let id = {
            let mut s = self.state.lock();
            let Some(t) = s.transfers.values_mut().find(|t| {
                t.file_path == path && !t.status.is_terminal()
            }) else {
                return;
            };
            t.status = TransferStatus::Failed;
            t.error = Some(error.clone());
            t.id
        };
        self.events.emit(&FileEvent::TransferFailed { id, error });
    }

    pub fn set_error(&self, error: Option<String>) {
        self.state.lock().error = error.clone();
        if let Some(error) = error {
            self.events.emit(&FileEvent::Error(error));
        }
    }

    pub fn set_loading(&self, is_loading: bool) {
        self.state.lock().is_loading = is_loading;
    }

    #[must_use]
    pub fn transfer(&self, id: TransferId) -> Option<Transfer> {
        self.state.lock().transfers.get(&id).cloned()
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&FileEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle<FileEvent> {
        self.events.subscribe(handler)
    }
}

fn sort_entries(entries: &mut [FileEntry], sort_by: SortBy, ascending: bool) {
    entries.sort_by(|a, b| {
        let dir_order = dir_first(a).cmp(&dir_first(b));
        let key_order = match sort_by {
            SortBy::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortBy::Size => a.size.cmp(&b.size),
            SortBy::ModifiedAt => a.modified_at.cmp(&b.modified_at),
            SortBy::Type => format!("{:?}", a.entry_type).cmp(&format!("{:?}", b.entry_type)),
        };
        let order = dir_order.then(key_order);
        if ascending { order } else { order.reverse() }
    });
}

const fn dir_first(entry: &FileEntry) -> u8 {
    if matches!(entry.entry_type, EntryType::Directory) { 0 } else { 1 }
}
