//! Connection timers.
//!
//! The connection keeps one optional deadline per [`TimerKind`]. Nothing
//! fires on its own: the owner asks for [`next_timeout`] and calls
//! `handle_timeout` once that instant has passed.
//!
//! [`next_timeout`]: crate::connection::WebSocketProtocol::next_timeout

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// The single-shot timers a connection may arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Peer must finish the opening handshake.
    OpenHandshake,
    /// Peer must answer our close frame.
    CloseHandshake,
    /// Client only: server must drop TCP after the closing handshake.
    ServerConnectionDrop,
    /// Send the next automatic ping.
    AutoPing,
    /// Peer must answer the outstanding automatic ping.
    AutoPingTimeout,
}

impl TimerKind {
    const ALL: [TimerKind; 5] = [
        TimerKind::OpenHandshake,
        TimerKind::CloseHandshake,
        TimerKind::ServerConnectionDrop,
        TimerKind::AutoPing,
        TimerKind::AutoPingTimeout,
    ];

    const fn index(self) -> usize {
        match self {
            TimerKind::OpenHandshake => 0,
            TimerKind::CloseHandshake => 1,
            TimerKind::ServerConnectionDrop => 2,
            TimerKind::AutoPing => 3,
            TimerKind::AutoPingTimeout => 4,
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerKind::OpenHandshake => "open-handshake",
            TimerKind::CloseHandshake => "close-handshake",
            TimerKind::ServerConnectionDrop => "server-connection-drop",
            TimerKind::AutoPing => "auto-ping",
            TimerKind::AutoPingTimeout => "auto-ping-timeout",
        };
        f.write_str(name)
    }
}

/// Source of the current time.
pub trait Clock: Send {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// The monotonic system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset_nanos: Arc<AtomicU64>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// A clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

/// Deadlines of the armed timers.
#[derive(Debug, Clone, Default)]
pub(crate) struct Timers {
    deadlines: [Option<Instant>; 5],
}

impl Timers {
    /// Arm `kind` to fire at `deadline`, replacing any earlier arming.
    pub(crate) fn arm(&mut self, kind: TimerKind, deadline: Instant) {
        self.deadlines[kind.index()] = Some(deadline);
    }

    /// Disarm `kind`. Returns `true` if it was armed.
    pub(crate) fn cancel(&mut self, kind: TimerKind) -> bool {
        self.deadlines[kind.index()].take().is_some()
    }

    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.index()].is_some()
    }

    pub(crate) fn cancel_all(&mut self) {
        self.deadlines = [None; 5];
    }

    /// Earliest armed deadline.
    pub(crate) fn next(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarm and return the earliest timer due at `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<TimerKind> {
        let kind = TimerKind::ALL
            .into_iter()
            .filter_map(|k| self.deadlines[k.index()].map(|d| (d, k)))
            .filter(|(d, _)| *d <= now)
            .min_by_key(|(d, _)| *d)
            .map(|(_, k)| k)?;
        self.deadlines[kind.index()] = None;
        Some(kind)
    }
}
