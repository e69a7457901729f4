//! Live connections keyed by identity.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};
use wsgate_core::Identity;

use crate::connection::{ConnectionHandle, ConnectionState, EnqueueError, Outbound};
use crate::transport::Frame;

/// Why a handle could not be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    /// Another live connection holds this identity.
    #[error("identity {0} is already connected")]
    Duplicate(Identity),
    /// The connection limit is reached.
    #[error("connection limit of {0} reached")]
    AtCapacity(usize),
}

/// Registry of connected clients.
///
/// At most one live handle exists per identity. An entry is added when the
/// handshake is accepted, before the upgrade completes; frames queued in that
/// window are written once the connection task starts, or dropped with the
/// handle if the upgrade fails. Entries are removed by the connection task
/// that owns them, and only while they still refer to that task's handle.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Identity, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` unless its identity is taken or `limit` is reached.
    ///
    /// The limit check is a snapshot taken before the insert, so concurrent
    /// registrations may briefly overshoot it by the number of racing callers.
    pub fn try_register(
        &self,
        handle: Arc<ConnectionHandle>,
        limit: usize,
    ) -> Result<(), RegisterError> {
        if self.connections.len() >= limit {
            return Err(RegisterError::AtCapacity(limit));
        }
        match self.connections.entry(handle.id) {
            Entry::Occupied(_) => Err(RegisterError::Duplicate(handle.id)),
            Entry::Vacant(slot) => {
                let _ = slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove the entry for `handle.id` if it is still `handle`.
    pub fn remove_if_same(&self, handle: &Arc<ConnectionHandle>) -> bool {
        self.connections
            .remove_if(&handle.id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    /// Look up a live connection.
    pub fn get(&self, id: Identity) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `id` is connected.
    pub fn contains(&self, id: Identity) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of registered entries, including reservations whose upgrade
    /// has not completed yet.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections whose task is running.
    pub fn active_len(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().state() == ConnectionState::Active)
            .count()
    }

    /// Frames dropped on full queues, summed over registered connections.
    pub fn dropped_total(&self) -> u64 {
        self.connections
            .iter()
            .map(|entry| entry.value().drop_count())
            .sum()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Identities of every live connection.
    pub fn ids(&self) -> Vec<Identity> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Queue `item` for `id`. An unknown identity reports [`EnqueueError::Closed`].
    pub fn send_to(&self, id: Identity, item: impl Into<Outbound>) -> Result<(), EnqueueError> {
        let Some(handle) = self.get(id) else {
            return Err(EnqueueError::Closed);
        };
        let result = handle.try_enqueue(item);
        if let Err(EnqueueError::Full) = result {
            warn!(client_id = %id, "outbound queue full, dropping frame");
        }
        result
    }

    /// Queue `frame` for every connection except `except`. Returns how many
    /// queues accepted it.
    pub fn broadcast(&self, frame: &Frame, except: Option<Identity>) -> usize {
        let targets: Vec<Arc<ConnectionHandle>> = self
            .connections
            .iter()
            .filter(|entry| Some(*entry.key()) != except)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut accepted = 0;
        for handle in targets {
            match handle.try_enqueue(frame.clone()) {
                Ok(()) => accepted += 1,
                Err(e) => debug!(client_id = %handle.id, error = %e, "broadcast skipped"),
            }
        }
        accepted
    }

    /// Ask one connection to close. Returns whether it was connected.
    pub fn disconnect(&self, id: Identity) -> bool {
        match self.get(id) {
            Some(handle) => {
                handle.disconnect();
                true
            }
            None => false,
        }
    }

    /// Ask every connection to close. Returns how many were asked.
    pub fn disconnect_all(&self) -> usize {
        let handles: Vec<Arc<ConnectionHandle>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in &handles {
            handle.disconnect();
        }
        handles.len()
    }
}
