//! Per-connection traffic accounting.
//!
//! Octets are counted at three levels: on the wire (including frame
//! headers and the opening handshake), at the WebSocket level (frame
//! payloads as sent, i.e. after compression) and at the application level
//! (message payloads before compression). Wire traffic before the
//! connection opens is kept separately.

use std::fmt;

/// Traffic counters of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    /// Octets written to the transport while open.
    pub outgoing_octets_wire_level: u64,
    /// Frame payload octets sent.
    pub outgoing_octets_websocket_level: u64,
    /// Message payload octets handed to the send API.
    pub outgoing_octets_app_level: u64,
    /// Data frames sent.
    pub outgoing_websocket_frames: u64,
    /// Messages sent.
    pub outgoing_websocket_messages: u64,

    /// Octets read from the transport while open.
    pub incoming_octets_wire_level: u64,
    /// Data frame payload octets received.
    pub incoming_octets_websocket_level: u64,
    /// Message payload octets after decompression.
    pub incoming_octets_app_level: u64,
    /// Data frames received.
    pub incoming_websocket_frames: u64,
    /// Messages received.
    pub incoming_websocket_messages: u64,

    /// Octets written during the opening handshake.
    pub preopen_outgoing_octets_wire_level: u64,
    /// Octets read during the opening handshake.
    pub preopen_incoming_octets_wire_level: u64,
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

fn overhead(wire: u64, websocket: u64) -> Option<f64> {
    (websocket > 0).then(|| (wire as f64 - websocket as f64) / websocket as f64)
}

impl TrafficStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// WebSocket-level over application-level outgoing octets.
    #[must_use]
    pub fn outgoing_compression_ratio(&self) -> Option<f64> {
        ratio(
            self.outgoing_octets_websocket_level,
            self.outgoing_octets_app_level,
        )
    }

    /// WebSocket-level over application-level incoming octets.
    #[must_use]
    pub fn incoming_compression_ratio(&self) -> Option<f64> {
        ratio(
            self.incoming_octets_websocket_level,
            self.incoming_octets_app_level,
        )
    }

    /// Framing overhead of outgoing traffic relative to payload octets.
    #[must_use]
    pub fn outgoing_overhead(&self) -> Option<f64> {
        overhead(
            self.outgoing_octets_wire_level,
            self.outgoing_octets_websocket_level,
        )
    }

    /// Framing overhead of incoming traffic relative to payload octets.
    #[must_use]
    pub fn incoming_overhead(&self) -> Option<f64> {
        overhead(
            self.incoming_octets_wire_level,
            self.incoming_octets_websocket_level,
        )
    }
}

impl fmt::Display for TrafficStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out: wire={} ws={} app={} frames={} messages={} preopen={}; \
             in: wire={} ws={} app={} frames={} messages={} preopen={}",
            self.outgoing_octets_wire_level,
            self.outgoing_octets_websocket_level,
            self.outgoing_octets_app_level,
            self.outgoing_websocket_frames,
            self.outgoing_websocket_messages,
            self.preopen_outgoing_octets_wire_level,
            self.incoming_octets_wire_level,
            self.incoming_octets_websocket_level,
            self.incoming_octets_app_level,
            self.incoming_websocket_frames,
            self.incoming_websocket_messages,
            self.preopen_incoming_octets_wire_level,
        )
    }
}
