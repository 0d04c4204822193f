//! WebSocket client connection state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Utf8Bytes};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::errors::SendError;

/// Identity assigned at accept time. Monotonic, never reused within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frames queued for the connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// JSON text.
    Text(Utf8Bytes),
    /// Liveness probe.
    Ping,
    /// Close handshake; the writer stops after sending it.
    Close(CloseFrame),
}

/// Transport state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepting sends.
    Open = 0,
    /// A close frame was queued; no further data sends.
    Closing = 1,
    /// Gone. Terminated or released.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One connected WebSocket client.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Outbound>,
    connected_at: Instant,
    /// Whether the client has responded to the last ping.
    is_alive: AtomicBool,
    /// When the last pong was received.
    last_pong: Mutex<Instant>,
    state: AtomicU8,
    released: AtomicBool,
    terminate: CancellationToken,
    /// Count of frames dropped due to a full or closed queue.
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create an open, alive connection.
    pub fn new(id: ConnectionId, peer: impl Into<String>, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer: peer.into(),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            state: AtomicU8::new(ConnectionState::Open as u8),
            released: AtomicBool::new(false),
            terminate: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address as reported at upgrade time.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether data sends are accepted.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), SendError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                match err {
                    TrySendError::Full(_) => Err(SendError::QueueFull),
                    TrySendError::Closed(_) => Err(SendError::Closed),
                }
            }
        }
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: Utf8Bytes) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }
        self.enqueue(Outbound::Text(text))
    }

    /// Serialize `value` and queue it as a text frame.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SendError> {
        let json = serde_json::to_string(value).map_err(|e| SendError::Encode(e.to_string()))?;
        self.send_text(json.into())
    }

    /// Queue a ping.
    pub fn ping(&self) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }
        self.enqueue(Outbound::Ping)
    }

    /// Begin the close handshake. Only the first call on an open connection succeeds.
    pub fn close(&self, frame: CloseFrame) -> Result<(), SendError> {
        self.state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| SendError::NotOpen)?;
        self.enqueue(Outbound::Close(frame))
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Release);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the liveness cycle.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::AcqRel)
    }

    /// Current alive flag without resetting it.
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Acquire)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Drop the transport without a close handshake. Idempotent.
    pub fn terminate(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.terminate.cancel();
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.terminate.cancelled()
    }

    /// Whether the connection was terminated.
    pub fn is_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Mark closed and claim the right to run close handling.
    ///
    /// Returns `true` exactly once per connection.
    pub fn release(&self) -> bool {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        !self.released.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("is_alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
