//! End-to-end scenarios between a client and a server connection wired
//! together in memory.

mod common;

use std::time::Duration;

use common::{Collector, Pair, client_options};
use sansws::{
    AutoPing, ClientOptions, ConnectionState, Message, PreparedMessage, ProtocolOptions,
    ServerOptions, WebSocketChannel,
};

// ============================================================================
// Messages
// ============================================================================

#[test]
fn test_echo_text_and_binary() {
    let mut pair = Pair::with_handlers(
        ServerOptions::default(),
        Collector::echoing(),
        client_options(),
        Collector::default(),
    );
    assert!(pair.server.handler().opened);
    assert!(pair.client.handler().opened);

    pair.client.session_mut().send_message("héllo".as_bytes(), false).unwrap();
    pair.client.session_mut().send_message(&[0, 1, 2, 255], true).unwrap();
    pair.pump();

    let expected = vec![Message::text("héllo"), Message::binary(vec![0, 1, 2, 255])];
    assert_eq!(pair.server.handler().messages, expected);
    assert_eq!(pair.client.handler().messages, expected);
    assert_eq!(pair.server.traffic_stats().incoming_websocket_messages, 2);
    assert_eq!(pair.client.traffic_stats().outgoing_websocket_messages, 2);
}

#[test]
fn test_large_message_with_auto_fragmentation() {
    let protocol = ProtocolOptions::default().with_auto_fragment_size(1000);
    let mut pair = Pair::open(ServerOptions::default(), client_options().with_protocol(protocol));
    let payload = vec![7u8; 70_000];

    pair.client.session_mut().send_message(&payload, true).unwrap();
    pair.pump();

    assert_eq!(pair.server.handler().messages, vec![Message::Binary(payload)]);
    assert_eq!(pair.server.traffic_stats().incoming_websocket_frames, 70);
}

#[test]
fn test_prepared_message_broadcast() {
    let prepared = PreparedMessage::new(&b"to everyone"[..], false, false, false);
    let mut pairs: Vec<Pair> = (0..3)
        .map(|_| Pair::open(ServerOptions::default(), client_options()))
        .collect();

    for pair in &mut pairs {
        pair.server.session_mut().send_prepared_message(&prepared).unwrap();
        pair.pump();
        assert_eq!(pair.client.handler().messages, vec![Message::text("to everyone")]);
    }
}

#[test]
fn test_streaming_send() {
    let mut pair = Pair::open(ServerOptions::default(), client_options());
    let ch = pair.client.session_mut();
    ch.begin_message(false, false).unwrap();
    ch.begin_message_frame(5).unwrap();
    assert_eq!(ch.send_message_frame_data(b"hel", false).unwrap(), 2);
    assert_eq!(ch.send_message_frame_data(b"lo", false).unwrap(), 0);
    ch.send_message_frame(b" world", false).unwrap();
    ch.end_message().unwrap();
    pair.pump();

    assert_eq!(pair.server.handler().messages, vec![Message::text("hello world")]);
}

#[test]
fn test_ping_pong() {
    let mut pair = Pair::open(ServerOptions::default(), client_options());
    pair.client.session_mut().send_ping(b"are you there").unwrap();
    pair.pump();
    assert_eq!(pair.client.handler().pongs, vec![b"are you there".to_vec()]);
}

#[test]
fn test_draft_client() {
    let options = client_options().with_version(10);
    let mut pair = Pair::open(ServerOptions::default(), options);
    assert_eq!(pair.server.state(), ConnectionState::Open);

    pair.client.session_mut().send_message(b"old", false).unwrap();
    pair.pump();
    assert_eq!(pair.server.handler().messages, vec![Message::text("old")]);
}

#[test]
fn test_version_not_accepted() {
    let server = ServerOptions::default().with_versions(vec![13]);
    let pair = Pair::open(server, client_options().with_version(10));
    assert!(!pair.client.handler().opened);
    assert_eq!(pair.client.state(), ConnectionState::Closed);
    let (clean, code, _) = pair.client.handler().closes[0].clone();
    assert!(!clean);
    assert_eq!(code, Some(1006));
}

// ============================================================================
// Closing
// ============================================================================

#[test]
fn test_client_initiated_close() {
    let mut pair = Pair::open(ServerOptions::default(), client_options());
    pair.client
        .session_mut()
        .send_close(Some(1000), Some("goodbye"))
        .unwrap();
    pair.pump();

    assert_eq!(
        pair.server.handler().closes,
        vec![(true, Some(1000), Some("goodbye".to_string()))]
    );
    assert_eq!(pair.client.handler().closes, vec![(true, Some(1000), None)]);
    assert!(pair.client.close_status().closed_by_me);
    assert!(pair.server.close_status().dropped_by_me);
}

#[test]
fn test_server_initiated_close() {
    let mut pair = Pair::open(ServerOptions::default(), client_options());
    pair.server.session_mut().send_close(Some(4000), None).unwrap();
    pair.pump();

    assert_eq!(pair.client.handler().closes, vec![(true, Some(4000), None)]);
    assert_eq!(pair.server.handler().closes, vec![(true, Some(1000), None)]);
}

#[test]
fn test_echo_close_code() {
    let protocol = ProtocolOptions::default().with_echo_close_code_reason(true);
    let server = ServerOptions::default().with_protocol(protocol);
    let mut pair = Pair::open(server, client_options());
    pair.client.session_mut().send_close(Some(3001), Some("custom")).unwrap();
    pair.pump();

    assert_eq!(
        pair.client.handler().closes,
        vec![(true, Some(3001), Some("custom".to_string()))]
    );
}

#[test]
fn test_send_after_close_rejected() {
    let mut pair = Pair::open(ServerOptions::default(), client_options());
    pair.client.session_mut().send_close(None, None).unwrap();
    assert!(pair.client.session_mut().send_message(b"late", false).is_err());
    pair.pump();
    assert!(pair.server.handler().messages.is_empty());
}

#[test]
fn test_fail_with_closing_handshake() {
    let protocol = ProtocolOptions::default().with_fail_by_drop(false);
    let server = ServerOptions::default().with_protocol(protocol);
    let mut pair = Pair::open(server, client_options());

    pair.server.session_mut().fail_connection(1011, "something broke");
    pair.pump();

    assert_eq!(
        pair.client.handler().closes,
        vec![(true, Some(1011), Some("something broke".to_string()))]
    );
    assert!(pair.server.close_status().failed_by_me);
    assert!(pair.server.close_status().was_clean);
}

#[test]
fn test_fail_by_drop() {
    let mut pair = Pair::open(ServerOptions::default(), client_options());
    pair.server.session_mut().fail_connection(1011, "broken");
    pair.pump();

    let (clean, code, reason) = pair.server.handler().closes[0].clone();
    assert!(!clean);
    assert_eq!(code, Some(1006));
    assert_eq!(
        reason.as_deref(),
        Some("connection was closed uncleanly (I dropped the WebSocket TCP connection: broken)")
    );
    assert!(!pair.client.handler().closes[0].0);
}

// ============================================================================
// Timers
// ============================================================================

#[test]
fn test_auto_ping_keeps_connection_alive() {
    let protocol = ProtocolOptions::default()
        .with_auto_ping(AutoPing::new(Duration::from_secs(20), Duration::from_secs(5)));
    let server = ServerOptions::default().with_protocol(protocol);
    let mut pair = Pair::open(server, client_options());

    for _ in 0..3 {
        pair.clock.advance(Duration::from_secs(20));
        pair.server.handle_timeout();
        pair.pump();
        pair.clock.advance(Duration::from_secs(5));
        pair.server.handle_timeout();
    }
    assert_eq!(pair.server.state(), ConnectionState::Open);
    assert_eq!(pair.server.traffic_stats().incoming_websocket_frames, 0);
}

#[test]
fn test_next_timeout_tracks_close_handshake() {
    let mut pair = Pair::open(ServerOptions::default(), client_options());
    assert_eq!(pair.client.next_timeout(), None);

    pair.client.session_mut().send_close(Some(1000), None).unwrap();
    assert!(pair.client.next_timeout().is_some());

    pair.pump();
    assert_eq!(pair.client.state(), ConnectionState::Closed);
    assert_eq!(pair.client.next_timeout(), None);
}

// ============================================================================
// Compression
// ============================================================================

#[cfg(feature = "compression")]
mod compression {
    use super::*;
    use sansws::extensions::deflate::PerMessageDeflateOffer;
    use sansws::extensions::{CompressionOffer, OfferAcceptor, ResponseAcceptor};

    fn deflate_pair() -> Pair {
        let server = ServerOptions::default().with_compression_accept(OfferAcceptor::deflate());
        let client: ClientOptions = client_options()
            .with_compression_offer(CompressionOffer::Deflate(PerMessageDeflateOffer::default()))
            .with_compression_accept(ResponseAcceptor::deflate());
        Pair::with_handlers(server, Collector::echoing(), client, Collector::default())
    }

    #[test]
    fn test_deflate_roundtrip() {
        let mut pair = deflate_pair();
        let text = "compress me ".repeat(200);
        pair.client.session_mut().send_message(text.as_bytes(), false).unwrap();
        pair.client.session_mut().send_message(text.as_bytes(), false).unwrap();
        pair.pump();

        assert_eq!(pair.server.handler().messages, vec![Message::Text(text.clone()); 2]);
        assert_eq!(pair.client.handler().messages, vec![Message::Text(text.clone()); 2]);

        let stats = pair.server.traffic_stats();
        assert!(stats.incoming_octets_websocket_level < stats.incoming_octets_app_level);
        assert_eq!(stats.incoming_octets_app_level, 2 * text.len() as u64);
    }

    #[test]
    fn test_deflate_declined() {
        let client = client_options()
            .with_compression_offer(CompressionOffer::Deflate(PerMessageDeflateOffer::default()))
            .with_compression_accept(ResponseAcceptor::deflate());
        let mut pair = Pair::open(ServerOptions::default(), client);
        let text = "plain ".repeat(50);
        pair.client.session_mut().send_message(text.as_bytes(), false).unwrap();
        pair.pump();

        let stats = pair.server.traffic_stats();
        assert_eq!(stats.incoming_octets_websocket_level, stats.incoming_octets_app_level);
        assert_eq!(pair.server.handler().messages, vec![Message::Text(text)]);
    }
}
