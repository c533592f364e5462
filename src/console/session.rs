//! Console sessions and the fixed-capacity slot pool
//!
//! Sessions are generic over the transport so the pool logic can be tested
//! with in-memory duplex streams. Slot indices are stable for a session's
//! lifetime; there is no compaction.

use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default number of concurrent console sessions
pub const DEFAULT_CAPACITY: usize = 3;

/// Default idle timeout before a session is reclaimed
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Maximum buffered bytes per session before a newline arrives.
/// Oversized lines are rejected, never truncated into a valid command.
pub const MAX_LINE_BYTES: usize = 1024;

/// Event produced while framing the input byte stream into lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete, trimmed, non-empty command line
    Line(String),
    /// The per-session line cap was exceeded; input is discarded up to the
    /// next newline
    Overflow,
}

/// One live client connection plus its framing and activity state
pub struct Session<T> {
    transport: T,
    remote: String,
    connected_at: Instant,
    last_activity: Instant,
    buffer: Vec<u8>,
    discarding: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Session<T> {
    fn new(transport: T, remote: String) -> Self {
        let now = Instant::now();
        Self {
            transport,
            remote,
            connected_at: now,
            last_activity: now,
            buffer: Vec::new(),
            discarding: false,
        }
    }

    /// Remote address as reported at accept time
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Time since the session was accepted
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Time since the last non-empty command line
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Stamp activity to now
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Read whatever bytes the transport has available right now
    pub async fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.transport.read(buf).await
    }

    /// Write text to the client
    pub async fn send(&mut self, text: &str) -> std::io::Result<()> {
        self.transport.write_all(text.as_bytes()).await?;
        self.transport.flush().await
    }

    /// Feed freshly read bytes into the line framer.
    ///
    /// Splits on `\n`, trims whitespace and `\r`, and drops lines that are
    /// empty after trimming. Does not touch the activity stamp; the server
    /// does that per dispatched line.
    pub fn feed(&mut self, data: &[u8]) -> Vec<LineEvent> {
        let mut events = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else {
                    let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
                    self.buffer.clear();
                    if !line.is_empty() {
                        events.push(LineEvent::Line(line));
                    }
                }
            } else if self.discarding {
                // swallow until the newline
            } else if self.buffer.len() >= MAX_LINE_BYTES {
                self.buffer.clear();
                self.discarding = true;
                events.push(LineEvent::Overflow);
            } else {
                self.buffer.push(byte);
            }
        }
        events
    }
}

/// Snapshot of one occupied slot, for listings and dispatch context
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Slot index (stable, zero-based)
    pub index: usize,
    /// Remote address
    pub remote: String,
    /// Whole seconds since last activity
    pub idle_secs: u64,
}

/// Fixed-capacity pool of optional sessions
pub struct SessionPool<T> {
    slots: Vec<Option<Session<T>>>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SessionPool<T> {
    /// Create a pool with the given capacity
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether no slot is free
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    /// Occupied slot indices in ascending order
    pub fn occupied_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    /// Mutable access to a slot's session
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Session<T>> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Bind a new connection to the first free slot and write the welcome
    /// banner. Returns the assigned index, or None when the pool is full
    /// or the banner write fails (the transport is dropped either way).
    pub async fn try_accept(&mut self, transport: T, remote: String, banner: &str) -> Option<usize> {
        let index = self.slots.iter().position(Option::is_none)?;
        let mut session = Session::new(transport, remote);
        if session.send(banner).await.is_err() {
            return None;
        }
        self.slots[index] = Some(session);
        Some(index)
    }

    /// Free a slot, closing its transport. Freeing an already-free slot is
    /// a no-op. Returns whether a session was actually reclaimed.
    pub fn reclaim(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => slot.take().is_some(),
            None => false,
        }
    }

    /// Snapshot every occupied slot in index order
    pub fn snapshot(&self) -> Vec<ClientInfo> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|s| ClientInfo {
                    index,
                    remote: s.remote.clone(),
                    idle_secs: s.idle_for().as_secs(),
                })
            })
            .collect()
    }

    /// Indices of sessions idle for at least `timeout`
    pub fn idle_indices(&self, timeout: Duration) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|s| s.idle_for() >= timeout)
                    .map(|_| i)
            })
            .collect()
    }

    /// Write `message` verbatim to every occupied slot in index order.
    /// Slots whose transport errors are reclaimed.
    pub async fn broadcast(&mut self, message: &str) {
        let mut failed = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(session) = slot {
                if session.send(message).await.is_err() {
                    failed.push(index);
                }
            }
        }
        for index in failed {
            self.reclaim(index);
        }
    }

    /// Send a farewell to every session and free all slots
    pub async fn disconnect_all(&mut self, farewell: &str) {
        for slot in self.slots.iter_mut() {
            if let Some(session) = slot {
                let _ = session.send(farewell).await;
            }
            *slot = None;
        }
    }
}
