//! Connection task: runs one client from activation through close.

use std::fmt;
use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use wsgate_core::{EnvelopePersister, GateError};

use crate::connection::{ConnectionHandle, ConnectionState, Outbound};
use crate::handler::MessageHandler;
use crate::registry::ConnectionRegistry;
use crate::transport::{Transport, TransportError};

/// Collaborators a connection task needs.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Inbound frame handler.
    pub handler: Arc<dyn MessageHandler>,
    /// Delivery confirmation target for tracked outbound frames.
    pub persister: Arc<dyn EnvelopePersister>,
    /// Registry holding this connection's entry.
    pub registry: Arc<ConnectionRegistry>,
}

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    PeerClosed,
    /// Reading from the transport failed.
    ReadFailed,
    /// Writing to the transport failed.
    WriteFailed,
    /// `disconnect` was called on the handle or registry.
    Disconnected,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadFailed => "read_failed",
            Self::WriteFailed => "write_failed",
            Self::Disconnected => "disconnected",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run a connection until it closes.
///
/// The task is the only reader and writer of `transport` and the only
/// consumer of `outbound`. It waits on cancellation, the next outbound item
/// and the next inbound frame at once, in that order of priority:
///
/// - inbound frames go to the handler in order; a handler error is logged
///   and the loop continues
/// - outbound items are written; a tracked item is confirmed with the
///   persister after a successful write, and a persister error is only logged
/// - peer close, a read or write failure, or cancellation ends the loop
///
/// On the way out the transport is closed once, the queue is closed and
/// drained, and the registry entry is removed if it is still this handle.
#[instrument(skip_all, fields(client_id = %handle.id))]
pub async fn run_connection<T: Transport>(
    mut transport: T,
    handle: Arc<ConnectionHandle>,
    mut outbound: mpsc::Receiver<Outbound>,
    ctx: ConnectionContext,
) -> CloseReason {
    handle.set_state(ConnectionState::Active);
    info!(auth = handle.metadata.get("auth").map(String::as_str), "client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let cancel = handle.cancellation_token();
    // Queued writes go out before the next read so the queue keeps draining
    // while the peer is sending.
    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                break if handle.is_server_shutdown() {
                    CloseReason::Shutdown
                } else {
                    CloseReason::Disconnected
                };
            }

            Some(item) = outbound.recv() => {
                if let Err(e) = deliver(&mut transport, &handle, ctx.persister.as_ref(), item).await {
                    debug!(error = %GateError::Transport(e.to_string()), "write failed");
                    break CloseReason::WriteFailed;
                }
            }

            inbound = transport.recv() => match inbound {
                Some(Ok(frame)) => {
                    counter!("ws_frames_total", "direction" => "inbound").increment(1);
                    debug!(kind = frame.kind(), len = frame.len(), "frame received");
                    if let Err(e) = ctx.handler.handle(&handle, frame).await {
                        let err = GateError::Handler(e);
                        counter!("ws_handler_errors_total").increment(1);
                        warn!(kind = err.error_kind(), error = %err, "message handler failed");
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %GateError::Transport(e.to_string()), "read failed");
                    break CloseReason::ReadFailed;
                }
                None => break CloseReason::PeerClosed,
            },
        }
    };

    handle.set_state(ConnectionState::Closing);
    transport.close().await;

    outbound.close();
    let mut discarded: u64 = 0;
    while outbound.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        counter!("ws_outbound_dropped_total").increment(discarded);
        debug!(discarded, "discarded queued frames");
    }

    let _ = ctx.registry.remove_if_same(&handle);
    handle.disconnect();
    handle.set_state(ConnectionState::Closed);

    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(handle.age().as_secs_f64());
    info!(%reason, "client disconnected");
    reason
}

async fn deliver<T: Transport>(
    transport: &mut T,
    handle: &ConnectionHandle,
    persister: &dyn EnvelopePersister,
    item: Outbound,
) -> Result<(), TransportError> {
    let Outbound { frame, envelope_id } = item;
    debug!(kind = frame.kind(), len = frame.len(), "writing frame");
    transport.send(frame).await?;
    counter!("ws_frames_total", "direction" => "outbound").increment(1);

    if let Some(envelope_id) = envelope_id {
        if let Err(e) = persister.confirm_delivery(envelope_id, handle.id).await {
            let err = GateError::from(e);
            warn!(%envelope_id, kind = err.error_kind(), error = %err, "delivery confirmation failed");
        }
    }
    Ok(())
}
