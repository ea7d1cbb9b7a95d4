//! Chunked file transfer engine (spec 4.9 upload/download pipelines).
//!
//! Grounded on `termchat/src/chat/mod.rs`'s send pipeline shape
//! (validate -> encode -> `transport.send`), generalized from one whole
//! message per send to a chunked byte stream with a running digest. The
//! download side is mostly pure message construction — the orchestrator
//! drives it off inbound chunks, since download progress is reactive, not
//! something this engine loops over itself.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use shellcore_proto::ids::PeerId;
use shellcore_proto::{Envelope, Message};
use tokio::io::AsyncReadExt;

use crate::transport::{Channel, TransportError, TransportManager};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FileEngineError {
    #[error("reading local file: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport rejected a send for peer {0} (not connected or channel not open)")]
    SendRejected(PeerId),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of a completed upload: the final SHA-256 digest and total bytes
/// sent, mirroring what `FileUploadComplete`/the progress callback report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOutcome {
    pub checksum: [u8; 32],
    pub bytes_sent: u64,
}

/// Reads `local_path` in `chunk_size` slices, sending `FileUploadStart`,
/// one or more `FileUploadChunk`s covering the whole file in order with
/// non-overlapping offsets, then `FileUploadComplete(checksum)` (spec
/// S5). `sequence` is the orchestrator's shared send counter — callers
/// pass the same counter used for every other outbound envelope so
/// ordering observations hold across the whole connection, not just this
/// transfer. `on_progress` is called after every chunk with the
/// cumulative `bytes_sent`, monotonically non-decreasing.
pub async fn upload_file<T: TransportManager>(
    transport: &T,
    peer_id: &PeerId,
    sequence: &AtomicU64,
    local_path: impl AsRef<Path>,
    remote_path: String,
    mode: u32,
    overwrite: bool,
    chunk_size: usize,
    mut on_progress: impl FnMut(u64),
) -> Result<UploadOutcome, FileEngineError> {
    let mut file = tokio::fs::File::open(local_path).await?;
    let size = file.metadata().await?.len();

    send(
        transport,
        peer_id,
        sequence,
        Message::FileUploadStart {
            path: remote_path.clone(),
            size,
            mode,
            overwrite,
        },
    )
    .await?;

    let mut hasher = Sha256::new();
    let mut offset: u64 = 0;
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        hasher.update(chunk);
        send(
            transport,
            peer_id,
            sequence,
            Message::FileUploadChunk {
                path: remote_path.clone(),
                offset,
                data: chunk.to_vec(),
            },
        )
        .await?;
        offset += n as u64;
        on_progress(offset);
        // Minimal cooperative yield between chunks for pacing (spec 9 Open
        // Question); ordering and completion semantics don't depend on it.
        tokio::task::yield_now().await;
    }

    let checksum: [u8; 32] = hasher.finalize().into();
    send(
        transport,
        peer_id,
        sequence,
        Message::FileUploadComplete {
            path: remote_path,
            checksum,
        },
    )
    .await?;

    Ok(UploadOutcome {
        checksum,
        bytes_sent: offset,
    })
}

/// Builds the initial `FileDownloadRequest(offset=0, chunk_size)` for a
/// download pipeline (spec 4.9), to be sent by the orchestrator in
/// response to the file store's `files:download` write event.
#[must_use]
pub fn initial_download_request(path: String, chunk_size: u32) -> Message {
    Message::FileDownloadRequest {
        path,
        offset: 0,
        chunk_size,
    }
}

/// Builds the follow-up request after a non-final chunk: `offset` is the
/// next unreceived byte (spec S4: "offset equal to the next byte").
#[must_use]
pub fn next_download_request(path: String, next_offset: u64, chunk_size: u32) -> Message {
    Message::FileDownloadRequest {
        path,
        offset: next_offset,
        chunk_size,
    }
}

/// Encodes and sends one message, bumping the shared sequence counter
/// first (spec: "incremented prior to each send").
async fn send<T: TransportManager>(
    transport: &T,
    peer_id: &PeerId,
    sequence: &AtomicU64,
    payload: Message,
) -> Result<(), FileEngineError> {
    let seq = sequence.fetch_add(1, Ordering::SeqCst);
    let envelope = Envelope::new(seq, payload);
    let bytes = shellcore_proto::codec::encode_envelope(&envelope);
    let ok = transport.send(peer_id, &bytes, Channel::Files).await;
    if ok {
        Ok(())
    } else {
        Err(FileEngineError::SendRejected(peer_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::Arc;

    use shellcore_proto::ids::PeerId;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::transport::loopback::{LoopbackHub, LoopbackTransportManager};

    fn sha256_of(data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    #[tokio::test]
    async fn upload_sends_start_chunks_complete_in_order() {
        let hub = LoopbackHub::new();
        let client = LoopbackTransportManager::new(PeerId::new("client"), Arc::clone(&hub));
        let server = LoopbackTransportManager::new(PeerId::new("server"), hub);
        client
            .create_connection(PeerId::new("server"), true, None)
            .await
            .unwrap();
        server
            .create_connection(PeerId::new("client"), false, None)
            .await
            .unwrap();

        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let r = Arc::clone(&received);
        server.subscribe(move |event| {
            if let crate::transport::TransportEvent::Data { bytes, .. } = event {
                if let Ok(envelope) = shellcore_proto::codec::decode_envelope(bytes) {
                    r.lock().push(envelope.payload);
                }
            }
        });

        let mut tmp = NamedTempFile::new().unwrap();
        let payload = vec![0xABu8; 200 * 1024];
        tmp.write_all(&payload).unwrap();

        let seq = AtomicU64::new(0);
        let mut progress_calls = Vec::new();
        let outcome = upload_file(
            &client,
            &PeerId::new("server"),
            &seq,
            tmp.path(),
            "/remote/file.bin".to_string(),
            0o644,
            true,
            64 * 1024,
            |sent| progress_calls.push(sent),
        )
        .await
        .unwrap();

        assert_eq!(outcome.checksum, sha256_of(&payload));
        assert_eq!(outcome.bytes_sent, payload.len() as u64);
        assert!(progress_calls.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*progress_calls.last().unwrap(), payload.len() as u64);

        let messages = received.lock();
        assert!(matches!(messages.first(), Some(Message::FileUploadStart { size, .. }) if *size == payload.len() as u64));
        assert!(matches!(messages.last(), Some(Message::FileUploadComplete { checksum, .. }) if *checksum == outcome.checksum));
    }

    #[test]
    fn next_download_request_advances_offset_by_previous_length() {
        let first = initial_download_request("/f.bin".to_string(), 64 * 1024);
        let Message::FileDownloadRequest { offset, .. } = first else {
            unreachable!()
        };
        assert_eq!(offset, 0);

        let second = next_download_request("/f.bin".to_string(), 65536, 64 * 1024);
        let Message::FileDownloadRequest { offset, .. } = second else {
            unreachable!()
        };
        assert_eq!(offset, 65536);
    }
}
