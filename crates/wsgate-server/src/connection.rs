//! Per-connection handle shared between the connection task and producers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use wsgate_core::{Identity, SessionInfo};

use crate::transport::Frame;

/// Lifecycle position of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade request received.
    Received,
    /// Session validator running.
    Validating,
    /// Validated; protocol handshake in progress.
    Upgrading,
    /// Connection task running.
    Active,
    /// Tearing down.
    Closing,
    /// Transport closed and registry entry released.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Upgrading => "upgrading",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Why an enqueue did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The outbound queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// The connection is closing or gone.
    #[error("connection closed")]
    Closed,
}

/// One queued outbound frame.
///
/// When `envelope_id` is set, a successful write is followed by a delivery
/// confirmation for that envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    /// Frame to write.
    pub frame: Frame,
    /// Envelope this frame delivers, if any.
    pub envelope_id: Option<Identity>,
}

impl Outbound {
    /// Frame with no delivery tracking.
    pub fn untracked(frame: impl Into<Frame>) -> Self {
        Self {
            frame: frame.into(),
            envelope_id: None,
        }
    }

    /// Frame that delivers `envelope_id`.
    pub fn tracked(frame: impl Into<Frame>, envelope_id: Identity) -> Self {
        Self {
            frame: frame.into(),
            envelope_id: Some(envelope_id),
        }
    }
}

impl From<Frame> for Outbound {
    fn from(frame: Frame) -> Self {
        Self::untracked(frame)
    }
}

/// A connected client as seen by handlers and the registry.
///
/// Producers only ever touch the bounded outbound queue; the transport itself
/// belongs to the connection task.
pub struct ConnectionHandle {
    /// Identity supplied by the session validator.
    pub id: Identity,
    /// Validator metadata.
    pub metadata: HashMap<String, String>,
    /// Wall-clock time the handle was created.
    pub connected_at: DateTime<Utc>,
    started: Instant,
    outbound: mpsc::Sender<Outbound>,
    state: Mutex<ConnectionState>,
    dropped: AtomicU64,
    cancel: CancellationToken,
    server_shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Build a handle for `session` with an outbound queue of `capacity`.
    ///
    /// The handle's cancellation token is a child of `shutdown`, so server
    /// shutdown reaches every connection. The returned receiver belongs to the
    /// connection task.
    pub fn new(
        session: SessionInfo,
        capacity: usize,
        shutdown: &CancellationToken,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: session.client_id,
            metadata: session.metadata,
            connected_at: Utc::now(),
            started: Instant::now(),
            outbound: tx,
            state: Mutex::new(ConnectionState::Upgrading),
            dropped: AtomicU64::new(0),
            cancel: shutdown.child_token(),
            server_shutdown: shutdown.clone(),
        };
        (handle, rx)
    }

    /// Queue a frame without waiting.
    pub fn try_enqueue(&self, item: impl Into<Outbound>) -> Result<(), EnqueueError> {
        match self.outbound.try_send(item.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.record_drop();
                Err(EnqueueError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    /// Queue a frame that delivers `envelope_id`, without waiting.
    pub fn try_enqueue_tracked(
        &self,
        frame: impl Into<Frame>,
        envelope_id: Identity,
    ) -> Result<(), EnqueueError> {
        self.try_enqueue(Outbound::tracked(frame, envelope_id))
    }

    /// Queue a frame, waiting at most `budget` for room.
    pub async fn enqueue_within(
        &self,
        item: impl Into<Outbound>,
        budget: Duration,
    ) -> Result<(), EnqueueError> {
        match self.outbound.send_timeout(item.into(), budget).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                self.record_drop();
                Err(EnqueueError::Full)
            }
            Err(SendTimeoutError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    fn record_drop(&self) {
        let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        counter!("ws_outbound_dropped_total").increment(1);
    }

    /// Frames refused because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ask the connection task to close. Idempotent.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Whether a close has been requested (directly or by shutdown).
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the server-wide shutdown token has fired.
    pub(crate) fn is_server_shutdown(&self) -> bool {
        self.server_shutdown.is_cancelled()
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Time since the handle was created.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
