//! Property-based tests for framing, masking and incremental receiving.
//!
//! These tests use proptest to check that results never depend on how the
//! input happens to be split.

mod common;

use common::{Pair, client_options};
use proptest::prelude::*;
use sansws::protocol::handshake::server::process_request;
use sansws::protocol::{Frame, Utf8Validator, XorMasker, apply_mask};
use sansws::uri::Endpoint;
use sansws::{Message, OpCode, SendOptions, ServerOptions, WebSocketChannel, create_url, parse_url};

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Continuation),
    ]
}

fn message_strategy() -> impl Strategy<Value = Message> {
    prop_oneof![
        ".{0,200}".prop_map(Message::Text),
        prop::collection::vec(any::<u8>(), 0..400).prop_map(Message::Binary),
    ]
}

/// Split `data` at the given cut points.
fn split_at_points(data: &[u8], mut cuts: Vec<usize>) -> Vec<&[u8]> {
    cuts.iter_mut().for_each(|c| *c %= data.len().max(1));
    cuts.sort_unstable();
    cuts.dedup();
    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts {
        if cut > start {
            chunks.push(&data[start..cut]);
            start = cut;
        }
    }
    chunks.push(&data[start..]);
    chunks
}

proptest! {
    // =========================================================================
    // Framing
    // =========================================================================
    #[test]
    fn test_frame_roundtrip(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..70_000),
        mask in proptest::option::of(any::<[u8; 4]>())
    ) {
        let frame = Frame::new(opcode.as_u8(), fin, payload);
        let encoded = frame.encode(mask);
        prop_assert_eq!(encoded.len(), frame.wire_size(mask.is_some()));

        let (parsed, consumed) = Frame::parse(&encoded).unwrap().unwrap();
        prop_assert_eq!(consumed, encoded.len());
        prop_assert_eq!(parsed, frame);
    }

    #[test]
    fn test_truncated_frame_incomplete(
        payload in prop::collection::vec(any::<u8>(), 1..300),
        cut in any::<prop::sample::Index>()
    ) {
        let encoded = Frame::new(OpCode::Binary.as_u8(), true, payload).encode(None);
        let cut = cut.index(encoded.len());
        prop_assert_eq!(Frame::parse(&encoded[..cut]).unwrap(), None);
    }

    // =========================================================================
    // Masking
    // =========================================================================
    #[test]
    fn test_masker_chunking_equivalence(
        payload in prop::collection::vec(any::<u8>(), 0..2000),
        mask in any::<[u8; 4]>(),
        cuts in prop::collection::vec(any::<usize>(), 0..8)
    ) {
        let mut expected = payload.clone();
        apply_mask(&mut expected, mask);

        let mut masker = XorMasker::for_payload(mask, payload.len() as u64);
        let mut actual = Vec::new();
        for chunk in split_at_points(&payload, cuts) {
            let mut chunk = chunk.to_vec();
            masker.process(&mut chunk);
            actual.extend_from_slice(&chunk);
        }
        prop_assert_eq!(masker.pointer(), payload.len() as u64);
        prop_assert_eq!(actual, expected);
    }

    // =========================================================================
    // UTF-8
    // =========================================================================
    #[test]
    fn test_utf8_chunking_matches_std(
        data in prop::collection::vec(any::<u8>(), 0..200),
        cuts in prop::collection::vec(any::<usize>(), 0..6)
    ) {
        let mut validator = Utf8Validator::new();
        let mut valid = true;
        let mut last = None;
        for chunk in split_at_points(&data, cuts) {
            let status = validator.validate(chunk);
            valid &= status.valid;
            last = Some(status);
        }
        let complete = valid && last.is_some_and(|s| s.ends_on_codepoint);
        prop_assert_eq!(complete, std::str::from_utf8(&data).is_ok());
    }

    #[test]
    fn test_utf8_valid_text_accepted(text in "\\PC{0,100}") {
        let status = Utf8Validator::new().validate(text.as_bytes());
        prop_assert!(status.valid && status.ends_on_codepoint);
        prop_assert_eq!(status.total, text.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // =========================================================================
    // Connections
    // =========================================================================
    #[test]
    fn test_receive_chunking_invariance(
        messages in prop::collection::vec(message_strategy(), 1..5),
        cuts in prop::collection::vec(any::<usize>(), 0..20)
    ) {
        let mut pair = Pair::open(ServerOptions::default(), client_options());
        for message in &messages {
            let is_binary = matches!(message, Message::Binary(_));
            pair.client.session_mut().send_message(message.as_bytes(), is_binary).unwrap();
        }
        let wire = pair.client.transport_mut().take_outbound();
        for chunk in split_at_points(&wire, cuts) {
            pair.server.data_received(chunk);
        }
        prop_assert_eq!(&pair.server.handler().messages, &messages);
    }

    #[test]
    fn test_fragment_reassembly(
        message in message_strategy(),
        fragment_size in 1usize..64
    ) {
        let mut pair = Pair::open(ServerOptions::default(), client_options());
        let is_binary = matches!(message, Message::Binary(_));
        let options = SendOptions {
            fragment_size: Some(fragment_size),
            ..SendOptions::default()
        };
        pair.client
            .session_mut()
            .send_message_with(message.as_bytes(), is_binary, options)
            .unwrap();
        pair.pump();

        let expected_frames = message.as_bytes().len().div_ceil(fragment_size).max(1) as u64;
        prop_assert_eq!(pair.server.traffic_stats().incoming_websocket_frames, expected_frames);
        prop_assert_eq!(&pair.server.handler().messages, &vec![message]);
    }

    // =========================================================================
    // Handshake and URLs
    // =========================================================================
    #[test]
    fn test_request_parse_no_panic(data in prop::collection::vec(any::<u8>(), 0..2000)) {
        let _ = process_request(&data, &ServerOptions::default(), "tcp:1.2.3.4:5", 1);
    }

    #[test]
    fn test_url_roundtrip(
        host in "[a-z]{1,10}(\\.[a-z]{1,5}){0,2}",
        port in 1u16..,
        secure in any::<bool>(),
        path in "(/[a-z0-9]{1,8}){1,3}"
    ) {
        let url = create_url(&host, Some(Endpoint::Tcp(port)), secure, Some(&path), &[]);
        let parsed = parse_url(&url).unwrap();
        prop_assert_eq!(parsed.host.clone(), host);
        prop_assert_eq!(parsed.port(), Some(port));
        prop_assert_eq!(parsed.secure, secure);
        prop_assert_eq!(parsed.path, path);
    }
}
