//! Process-local envelope store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;
use wsgate_core::{Envelope, EnvelopePersister, Identity, PersistenceError};

/// Envelopes kept in a map keyed by envelope id. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryEnvelopeStore {
    envelopes: RwLock<HashMap<Identity, Envelope>>,
}

impl MemoryEnvelopeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up one envelope.
    pub fn get(&self, id: Identity) -> Option<Envelope> {
        self.envelopes.read().get(&id).cloned()
    }

    /// All envelopes owned by `client_id`, oldest first.
    pub fn list_for_client(&self, client_id: Identity) -> Vec<Envelope> {
        let mut out: Vec<Envelope> = self
            .envelopes
            .read()
            .values()
            .filter(|e| e.client_id == client_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.timestamp);
        out
    }

    /// Number of stored envelopes.
    pub fn len(&self) -> usize {
        self.envelopes.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.envelopes.read().is_empty()
    }
}

#[async_trait]
impl EnvelopePersister for MemoryEnvelopeStore {
    async fn save_envelope(&self, envelope: &Envelope) -> Result<(), PersistenceError> {
        let mut envelopes = self.envelopes.write();
        if envelopes.contains_key(&envelope.id) {
            return Err(PersistenceError::Conflict(envelope.id));
        }
        let _ = envelopes.insert(envelope.id, envelope.clone());
        debug!(envelope_id = %envelope.id, client_id = %envelope.client_id, "envelope saved");
        Ok(())
    }

    async fn confirm_delivery(
        &self,
        envelope_id: Identity,
        client_id: Identity,
    ) -> Result<(), PersistenceError> {
        let mut envelopes = self.envelopes.write();
        match envelopes.get_mut(&envelope_id) {
            Some(env) if env.client_id == client_id => {
                if env.confirm_delivery(Utc::now()) {
                    debug!(%envelope_id, %client_id, "delivery confirmed");
                }
                Ok(())
            }
            _ => Err(PersistenceError::NotFound {
                envelope_id,
                client_id,
            }),
        }
    }
}
