//! The peer-facing array-tagged binary codec (spec 4.1).
//!
//! The envelope is encoded as a 3-element sequence `[version, sequence,
//! payload]`; the payload as a 2-element sequence `[type_tag, fields]` where
//! `type_tag` is the message name as a string and `fields` is the ordered
//! tuple documented on each [`crate::message::Message`] variant. Order is
//! the contract, not field names — new fields are appended and the
//! protocol version bumped (spec 6).
//!
//! This is a hand-rolled encoding, not delegated to an off-the-shelf
//! compact format: the spec requires an explicit string type-tag plus a
//! `DecodeError { kind, position }` shape that reports where decoding
//! failed, which general-purpose binary codecs don't expose.

use crate::envelope::Envelope;
use crate::ids::SessionId;
use crate::message::{EntryKind, Message, RemoteEntry, Stream};

/// The ways decoding a message from bytes can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The input ended before a complete value could be read.
    TruncatedInput,
    /// A length-prefixed value (string, bytes, vec) declared a length that
    /// does not match what actually followed, or a fixed-size field (e.g.
    /// a 32-byte checksum) was the wrong size.
    TypeMismatch,
    /// The envelope's type tag does not name a known message variant.
    UnknownMessage,
    /// A variant's tuple read an unexpected number of fields (reserved for
    /// future multi-field validation; the current reader is positional and
    /// raises `TruncatedInput`/`TypeMismatch` first in practice).
    FieldCountMismatch,
}

/// Error returned by [`decode_envelope`] and the standalone message
/// decoders, naming both the failure kind and the byte offset at which it
/// was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("decode error: {kind:?} at byte {position}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub position: usize,
}

impl DecodeError {
    const fn new(kind: DecodeErrorKind, position: usize) -> Self {
        Self { kind, position }
    }
}

/// Encodes an [`Envelope`] into the array-tagged binary wire format.
#[must_use]
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u32(&mut buf, envelope.version);
    write_u64(&mut buf, envelope.sequence);
    write_str(&mut buf, envelope.payload.type_tag());
    write_message_fields(&mut buf, &envelope.payload);
    buf
}

/// Decodes an [`Envelope`] from the array-tagged binary wire format.
///
/// # Errors
///
/// Returns [`DecodeError`] if the input is truncated, names an unknown
/// message tag, or a length-prefixed field's declared size disagrees with
/// what follows it.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let mut r = Reader::new(bytes);
    let version = r.read_u32()?;
    let sequence = r.read_u64()?;
    let tag = r.read_str()?;
    let payload = read_message_fields(&mut r, &tag)?;
    Ok(Envelope {
        version,
        sequence,
        payload,
    })
}

// ---------------------------------------------------------------------
// Field-order tables, one arm per `Message` variant (spec 4.1).
// ---------------------------------------------------------------------

fn write_message_fields(buf: &mut Vec<u8>, msg: &Message) {
    match msg {
        Message::SessionCreate {
            cols,
            rows,
            shell,
            env,
            cwd,
        } => {
            write_u16(buf, *cols);
            write_u16(buf, *rows);
            write_opt_str(buf, shell.as_deref());
            write_u32(buf, u32_len(env.len()));
            for (k, v) in env {
                write_str(buf, k);
                write_str(buf, v);
            }
            write_opt_str(buf, cwd.as_deref());
        }
        Message::SessionCreated { session_id, pid } => {
            write_session_id(buf, *session_id);
            write_u32(buf, *pid);
        }
        Message::SessionAttach { session_id } | Message::SessionDetach { session_id } => {
            write_session_id(buf, *session_id);
        }
        Message::SessionKill { session_id, signal } => {
            write_session_id(buf, *session_id);
            write_opt_u32(buf, *signal);
        }
        Message::SessionResize {
            session_id,
            cols,
            rows,
        } => {
            write_session_id(buf, *session_id);
            write_u16(buf, *cols);
            write_u16(buf, *rows);
        }
        Message::SessionData {
            session_id,
            stream,
            data,
        } => {
            write_session_id(buf, *session_id);
            buf.push(stream.tag());
            write_bytes(buf, data);
        }
        Message::SessionClosed {
            session_id,
            exit_code,
            signal,
            reason,
        } => {
            write_session_id(buf, *session_id);
            write_opt_i32(buf, *exit_code);
            write_opt_u32(buf, *signal);
            write_opt_str(buf, reason.as_deref());
        }
        Message::FileListRequest {
            path,
            include_hidden,
        } => {
            write_str(buf, path);
            buf.push(u8::from(*include_hidden));
        }
        Message::FileListResponse { path, entries } => {
            write_str(buf, path);
            write_u32(buf, u32_len(entries.len()));
            for entry in entries {
                write_str(buf, &entry.name);
                buf.push(entry.entry_type.tag());
                write_u64(buf, entry.size);
                write_u32(buf, entry.mode);
                write_u64(buf, entry.modified);
            }
        }
        Message::FileDownloadRequest {
            path,
            offset,
            chunk_size,
        } => {
            write_str(buf, path);
            write_u64(buf, *offset);
            write_u32(buf, *chunk_size);
        }
        Message::FileDownloadChunk {
            path,
            offset,
            total_size,
            data,
            is_last,
        } => {
            write_str(buf, path);
            write_u64(buf, *offset);
            write_u64(buf, *total_size);
            write_bytes(buf, data);
            buf.push(u8::from(*is_last));
        }
        Message::FileUploadStart {
            path,
            size,
            mode,
            overwrite,
        } => {
            write_str(buf, path);
            write_u64(buf, *size);
            write_u32(buf, *mode);
            buf.push(u8::from(*overwrite));
        }
        Message::FileUploadChunk { path, offset, data } => {
            write_str(buf, path);
            write_u64(buf, *offset);
            write_bytes(buf, data);
        }
        Message::FileUploadComplete { path, checksum } => {
            write_str(buf, path);
            buf.extend_from_slice(checksum);
        }
        Message::DeviceInfo { name, version } => {
            write_str(buf, name);
            write_str(buf, version);
        }
        Message::DeviceApprovalRequest {
            device_id,
            device_name,
        } => {
            write_str(buf, device_id);
            write_str(buf, device_name);
        }
        Message::DeviceApproved { device_id } => {
            write_str(buf, device_id);
        }
        Message::DeviceRejected { device_id, reason } => {
            write_str(buf, device_id);
            write_opt_str(buf, reason.as_deref());
        }
        Message::Ping { nonce } | Message::Pong { nonce } => {
            write_u64(buf, *nonce);
        }
        Message::Error {
            code,
            message,
            context,
            recoverable,
        } => {
            write_u32(buf, *code);
            write_str(buf, message);
            write_opt_str(buf, context.as_deref());
            buf.push(u8::from(*recoverable));
        }
        Message::Capabilities { features } => {
            write_u32(buf, u32_len(features.len()));
            for f in features {
                write_str(buf, f);
            }
        }
    }
}

#[allow(clippy::too_many_lines)]
fn read_message_fields(r: &mut Reader<'_>, tag: &str) -> Result<Message, DecodeError> {
    Ok(match tag {
        "SessionCreate" => {
            let cols = r.read_u16()?;
            let rows = r.read_u16()?;
            let shell = r.read_opt_str()?;
            let n = r.read_u32()? as usize;
            let mut env = Vec::with_capacity(n);
            for _ in 0..n {
                let k = r.read_str()?;
                let v = r.read_str()?;
                env.push((k, v));
            }
            let cwd = r.read_opt_str()?;
            Message::SessionCreate {
                cols,
                rows,
                shell,
                env,
                cwd,
            }
        }
        "SessionCreated" => Message::SessionCreated {
            session_id: r.read_session_id()?,
            pid: r.read_u32()?,
        },
        "SessionAttach" => Message::SessionAttach {
            session_id: r.read_session_id()?,
        },
        "SessionDetach" => Message::SessionDetach {
            session_id: r.read_session_id()?,
        },
        "SessionKill" => Message::SessionKill {
            session_id: r.read_session_id()?,
            signal: r.read_opt_u32()?,
        },
        "SessionResize" => Message::SessionResize {
            session_id: r.read_session_id()?,
            cols: r.read_u16()?,
            rows: r.read_u16()?,
        },
        "SessionData" => {
            let session_id = r.read_session_id()?;
            let tag_byte = r.read_u8()?;
            let stream = Stream::from_tag(tag_byte)
                .ok_or_else(|| DecodeError::new(DecodeErrorKind::TypeMismatch, r.pos - 1))?;
            let data = r.read_bytes()?;
            Message::SessionData {
                session_id,
                stream,
                data,
            }
        }
        "SessionClosed" => Message::SessionClosed {
            session_id: r.read_session_id()?,
            exit_code: r.read_opt_i32()?,
            signal: r.read_opt_u32()?,
            reason: r.read_opt_str()?,
        },
        "FileListRequest" => Message::FileListRequest {
            path: r.read_str()?,
            include_hidden: r.read_bool()?,
        },
        "FileListResponse" => {
            let path = r.read_str()?;
            let n = r.read_u32()? as usize;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let name = r.read_str()?;
                let kind_tag = r.read_u8()?;
                let entry_type = EntryKind::from_tag(kind_tag)
                    .ok_or_else(|| DecodeError::new(DecodeErrorKind::TypeMismatch, r.pos - 1))?;
                let size = r.read_u64()?;
                let mode = r.read_u32()?;
                let modified = r.read_u64()?;
                entries.push(RemoteEntry {
                    name,
                    entry_type,
                    size,
                    mode,
                    modified,
                });
            }
            Message::FileListResponse { path, entries }
        }
        "FileDownloadRequest" => Message::FileDownloadRequest {
            path: r.read_str()?,
            offset: r.read_u64()?,
            chunk_size: r.read_u32()?,
        },
        "FileDownloadChunk" => Message::FileDownloadChunk {
            path: r.read_str()?,
            offset: r.read_u64()?,
            total_size: r.read_u64()?,
            data: r.read_bytes()?,
            is_last: r.read_bool()?,
        },
        "FileUploadStart" => Message::FileUploadStart {
            path: r.read_str()?,
            size: r.read_u64()?,
            mode: r.read_u32()?,
            overwrite: r.read_bool()?,
        },
        "FileUploadChunk" => Message::FileUploadChunk {
            path: r.read_str()?,
            offset: r.read_u64()?,
            data: r.read_bytes()?,
        },
        "FileUploadComplete" => {
            let path = r.read_str()?;
            let checksum = r.read_fixed::<32>()?;
            Message::FileUploadComplete { path, checksum }
        }
        "DeviceInfo" => Message::DeviceInfo {
            name: r.read_str()?,
            version: r.read_str()?,
        },
        "DeviceApprovalRequest" => Message::DeviceApprovalRequest {
            device_id: r.read_str()?,
            device_name: r.read_str()?,
        },
        "DeviceApproved" => Message::DeviceApproved {
            device_id: r.read_str()?,
        },
        "DeviceRejected" => Message::DeviceRejected {
            device_id: r.read_str()?,
            reason: r.read_opt_str()?,
        },
        "Ping" => Message::Ping {
            nonce: r.read_u64()?,
        },
        "Pong" => Message::Pong {
            nonce: r.read_u64()?,
        },
        "Error" => Message::Error {
            code: r.read_u32()?,
            message: r.read_str()?,
            context: r.read_opt_str()?,
            recoverable: r.read_bool()?,
        },
        "Capabilities" => {
            let n = r.read_u32()? as usize;
            let mut features = Vec::with_capacity(n);
            for _ in 0..n {
                features.push(r.read_str()?);
            }
            Message::Capabilities { features }
        }
        _ => return Err(DecodeError::new(DecodeErrorKind::UnknownMessage, r.pos)),
    })
}

fn u32_len(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------
// Primitive writers.
// ---------------------------------------------------------------------

fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(buf, u32_len(bytes.len()));
    buf.extend_from_slice(bytes);
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

fn write_opt_str(buf: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.push(1);
            write_str(buf, s);
        }
        None => buf.push(0),
    }
}

fn write_opt_u32(buf: &mut Vec<u8>, v: Option<u32>) {
    match v {
        Some(v) => {
            buf.push(1);
            write_u32(buf, v);
        }
        None => buf.push(0),
    }
}

fn write_opt_i32(buf: &mut Vec<u8>, v: Option<i32>) {
    match v {
        Some(v) => {
            buf.push(1);
            write_i32(buf, v);
        }
        None => buf.push(0),
    }
}

fn write_session_id(buf: &mut Vec<u8>, id: SessionId) {
    buf.extend_from_slice(id.as_uuid().as_bytes());
}

/// Positional byte reader tracking the offset at which a failure occurred.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(DecodeError::new(DecodeErrorKind::TruncatedInput, self.pos));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let pos = self.pos;
        let bytes: [u8; 2] = self
            .take(2)?
            .try_into()
            .map_err(|_| DecodeError::new(DecodeErrorKind::TypeMismatch, pos))?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let pos = self.pos;
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| DecodeError::new(DecodeErrorKind::TypeMismatch, pos))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let pos = self.pos;
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| DecodeError::new(DecodeErrorKind::TypeMismatch, pos))?;
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let pos = self.pos;
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| DecodeError::new(DecodeErrorKind::TypeMismatch, pos))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn read_str(&mut self) -> Result<String, DecodeError> {
        let pos = self.pos;
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| DecodeError::new(DecodeErrorKind::TypeMismatch, pos))
    }

    fn read_opt_str(&mut self) -> Result<Option<String>, DecodeError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.read_str()?)),
            _ => Err(DecodeError::new(DecodeErrorKind::TypeMismatch, self.pos - 1)),
        }
    }

    fn read_opt_u32(&mut self) -> Result<Option<u32>, DecodeError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.read_u32()?)),
            _ => Err(DecodeError::new(DecodeErrorKind::TypeMismatch, self.pos - 1)),
        }
    }

    fn read_opt_i32(&mut self) -> Result<Option<i32>, DecodeError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.read_i32()?)),
            _ => Err(DecodeError::new(DecodeErrorKind::TypeMismatch, self.pos - 1)),
        }
    }

    fn read_session_id(&mut self) -> Result<SessionId, DecodeError> {
        let pos = self.pos;
        let bytes: [u8; 16] = self
            .take(16)?
            .try_into()
            .map_err(|_| DecodeError::new(DecodeErrorKind::TypeMismatch, pos))?;
        Ok(SessionId::from_uuid(uuid::Uuid::from_bytes(bytes)))
    }

    fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let pos = self.pos;
        let bytes: [u8; N] = self
            .take(N)?
            .try_into()
            .map_err(|_| DecodeError::new(DecodeErrorKind::TypeMismatch, pos))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    fn round_trip(msg: Message) {
        let env = Envelope::new(7, msg.clone());
        let bytes = encode_envelope(&env);
        let decoded = decode_envelope(&bytes).expect("decode");
        assert_eq!(decoded, env);
        assert_eq!(decoded.payload, msg);
    }

    #[test]
    fn round_trips_every_variant_family() {
        round_trip(Message::SessionCreate {
            cols: 80,
            rows: 24,
            shell: Some("/bin/zsh".into()),
            env: vec![("TERM".into(), "xterm-256color".into())],
            cwd: Some("/home/user".into()),
        });
        round_trip(Message::SessionCreated {
            session_id: SessionId::new(),
            pid: 4242,
        });
        round_trip(Message::SessionData {
            session_id: SessionId::new(),
            stream: Stream::Stdout,
            data: b"hello\n".to_vec(),
        });
        round_trip(Message::SessionClosed {
            session_id: SessionId::new(),
            exit_code: Some(0),
            signal: None,
            reason: Some("exited".into()),
        });
        round_trip(Message::FileListResponse {
            path: "/home".into(),
            entries: vec![RemoteEntry {
                name: "docs".into(),
                entry_type: EntryKind::Directory,
                size: 4096,
                mode: 0o755,
                modified: 1_700_000,
            }],
        });
        round_trip(Message::FileUploadComplete {
            path: "/tmp/x".into(),
            checksum: [7u8; 32],
        });
        round_trip(Message::Ping { nonce: 99 });
        round_trip(Message::Error {
            code: 500,
            message: "boom".into(),
            context: None,
            recoverable: true,
        });
        round_trip(Message::Capabilities {
            features: vec!["resize".into(), "download".into()],
        });
    }

    #[test]
    fn decode_truncated_input_reports_kind_and_position() {
        let env = Envelope::new(1, Message::Ping { nonce: 1 });
        let bytes = encode_envelope(&env);
        let truncated = &bytes[..bytes.len() - 2];
        let err = decode_envelope(truncated).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TruncatedInput);
    }

    #[test]
    fn decode_unknown_message_tag_fails_cleanly() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 1);
        write_u64(&mut buf, 0);
        write_str(&mut buf, "NotARealMessage");
        let err = decode_envelope(&buf).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::UnknownMessage);
    }

    #[test]
    fn decode_unknown_stream_tag_is_type_mismatch_not_panic() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 1);
        write_u64(&mut buf, 0);
        write_str(&mut buf, "SessionData");
        write_session_id(&mut buf, SessionId::new());
        buf.push(250); // not a valid Stream tag
        write_bytes(&mut buf, b"x");
        let err = decode_envelope(&buf).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TypeMismatch);
    }

    #[test]
    fn decode_empty_input_is_truncated_not_panic() {
        let err = decode_envelope(&[]).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TruncatedInput);
    }

    #[test]
    fn envelope_version_and_sequence_round_trip() {
        let env = Envelope {
            version: 3,
            sequence: 12345,
            payload: Message::Pong { nonce: 1 },
        };
        let bytes = encode_envelope(&env);
        let decoded = decode_envelope(&bytes).unwrap();
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.sequence, 12345);
    }
}
