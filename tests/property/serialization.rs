//! Property-based round-trip tests for the wire codec and pairing payload.
//!
//! Verifies the testable properties from spec 8:
//! - `decode(encode(m)) = m` for every message variant.
//! - Random bytes never panic `decode_envelope` (they return `Err`).
//! - `parse(stringify(p)) = Ok(p)` for any well-formed pairing payload.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use shellcore_proto::codec::{decode_envelope, encode_envelope};
use shellcore_proto::envelope::Envelope;
use shellcore_proto::ids::SessionId;
use shellcore_proto::message::{EntryKind, Message, RemoteEntry, Stream};
use shellcore_proto::pairing::PairingData;
use uuid::Uuid;

fn arb_session_id() -> impl Strategy<Value = SessionId> {
    any::<u128>().prop_map(|n| SessionId::from_uuid(Uuid::from_u128(n)))
}

fn arb_stream() -> impl Strategy<Value = Stream> {
    prop_oneof![
        Just(Stream::Stdin),
        Just(Stream::Stdout),
        Just(Stream::Stderr),
    ]
}

fn arb_entry_kind() -> impl Strategy<Value = EntryKind> {
    prop_oneof![
        Just(EntryKind::File),
        Just(EntryKind::Directory),
        Just(EntryKind::Symlink),
        Just(EntryKind::Unknown),
    ]
}

fn arb_remote_entry() -> impl Strategy<Value = RemoteEntry> {
    (
        "[a-zA-Z0-9._-]{1,32}",
        arb_entry_kind(),
        any::<u64>(),
        any::<u32>(),
        any::<u64>(),
    )
        .prop_map(|(name, entry_type, size, mode, modified)| RemoteEntry {
            name,
            entry_type,
            size,
            mode,
            modified,
        })
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (
            any::<u16>(),
            any::<u16>(),
            proptest::option::of("[a-z/]{1,16}"),
            proptest::collection::vec(("[A-Z_]{1,8}", "[a-zA-Z0-9]{0,16}"), 0..4),
            proptest::option::of("[a-z/]{1,16}"),
        )
            .prop_map(|(cols, rows, shell, env, cwd)| Message::SessionCreate {
                cols,
                rows,
                shell,
                env,
                cwd
            }),
        (arb_session_id(), any::<u32>())
            .prop_map(|(session_id, pid)| Message::SessionCreated { session_id, pid }),
        (arb_session_id(), arb_stream(), proptest::collection::vec(any::<u8>(), 0..64)).prop_map(
            |(session_id, stream, data)| Message::SessionData {
                session_id,
                stream,
                data
            }
        ),
        (
            arb_session_id(),
            proptest::option::of(any::<i32>()),
            proptest::option::of(any::<u32>()),
            proptest::option::of("[a-z ]{0,24}"),
        )
            .prop_map(|(session_id, exit_code, signal, reason)| Message::SessionClosed {
                session_id,
                exit_code,
                signal,
                reason
            }),
        ("[a-z/]{1,32}", any::<bool>())
            .prop_map(|(path, include_hidden)| Message::FileListRequest {
                path,
                include_hidden
            }),
        ("[a-z/]{1,32}", proptest::collection::vec(arb_remote_entry(), 0..4))
            .prop_map(|(path, entries)| Message::FileListResponse { path, entries }),
        ("[a-z/]{1,32}", any::<u64>(), proptest::collection::vec(any::<u8>(), 0..64), any::<bool>())
            .prop_map(|(path, offset, data, is_last)| Message::FileDownloadChunk {
                path,
                offset,
                total_size: offset + data.len() as u64,
                data,
                is_last
            }),
        ("[a-z/]{1,32}", any::<u64>(), proptest::collection::vec(any::<u8>(), 0..32))
            .prop_map(|(path, offset, data)| Message::FileUploadChunk { path, offset, data }),
        ("[a-z/]{1,32}", any::<[u8; 32]>())
            .prop_map(|(path, checksum)| Message::FileUploadComplete { path, checksum }),
        any::<u64>().prop_map(|nonce| Message::Ping { nonce }),
        any::<u64>().prop_map(|nonce| Message::Pong { nonce }),
        (
            any::<u32>(),
            "[a-zA-Z ]{1,32}",
            proptest::option::of("[a-z/]{1,16}"),
            any::<bool>()
        )
            .prop_map(|(code, message, context, recoverable)| Message::Error {
                code,
                message,
                context,
                recoverable
            }),
    ]
}

proptest! {
    #[test]
    fn any_message_round_trips_through_the_envelope_codec(
        sequence in any::<u64>(),
        msg in arb_message(),
    ) {
        let envelope = Envelope::new(sequence, msg.clone());
        let bytes = encode_envelope(&envelope);
        let decoded = decode_envelope(&bytes).expect("valid envelope must decode");
        prop_assert_eq!(decoded.payload, msg);
        prop_assert_eq!(decoded.sequence, sequence);
    }

    #[test]
    fn random_bytes_never_panic_decode(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_envelope(&bytes);
    }

    #[test]
    fn pairing_payload_round_trips_through_parse_and_stringify(
        device_id in "[a-zA-Z0-9-]{1,16}",
        public_key in "[a-zA-Z0-9+/=]{1,32}",
        expires in 0i64..10_000_000_000,
    ) {
        let json = format!(
            r#"{{"device_id":"{device_id}","public_key":"{public_key}","relay_url":"wss://relay.example","expires":{expires}}}"#
        );
        let parsed = PairingData::parse(&json, expires).expect("now == expires is valid");
        let restrung = parsed.stringify().expect("serializes");
        let reparsed = PairingData::parse(&restrung, expires).expect("round trip still valid");
        prop_assert_eq!(parsed, reparsed);
    }
}
