//! The byte sink a connection writes to.

use bytes::Bytes;

/// Outbound side of the underlying stream.
///
/// The connection never reads from the transport: inbound octets are
/// pushed in through `data_received`. After [`close`](Transport::close)
/// the owner is expected to tear the stream down and report it back with
/// `connection_lost`.
pub trait Transport {
    /// Queue octets for sending.
    fn write(&mut self, data: &[u8]);

    /// Push queued octets towards the wire. Called after every write of a
    /// synchronous or chopped send.
    fn flush(&mut self) {}

    /// Close the stream. `abort` discards unsent data.
    fn close(&mut self, abort: bool);

    /// `tcp:host:port`, `unix:path`, or `?` when unknown.
    fn peer(&self) -> String {
        "?".to_string()
    }
}

/// An in-memory transport that records writes and closes.
///
/// Used by the tokio driver as the connection's outbound buffer, and by
/// tests to run two connections against each other without sockets.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    peer: String,
    writes: Vec<Bytes>,
    flushes: usize,
    closed: Option<bool>,
}

impl MemoryTransport {
    /// A transport reporting `peer` as its remote address.
    #[must_use]
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            ..Self::default()
        }
    }

    /// Remove and return everything written so far, concatenated.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        self.take_writes().concat()
    }

    /// Remove and return the individual writes.
    pub fn take_writes(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.writes)
    }

    /// `true` if nothing is waiting to be sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Number of flushes requested.
    #[must_use]
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// `Some(abort)` once the connection closed the transport.
    #[must_use]
    pub fn closed(&self) -> Option<bool> {
        self.closed
    }

    /// `true` once the connection closed the transport.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.writes.push(Bytes::copy_from_slice(data));
        }
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn close(&mut self, abort: bool) {
        // the first close decides whether pending data is discarded
        if self.closed.is_none() {
            self.closed = Some(abort);
        }
    }

    fn peer(&self) -> String {
        if self.peer.is_empty() {
            "?".to_string()
        } else {
            self.peer.clone()
        }
    }
}
