//! Envelope persistence contract.

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::errors::PersistenceError;
use crate::identity::Identity;

/// Durable storage and delivery confirmation for envelopes.
///
/// Both operations complete before returning. Callers own retries; the
/// gateway itself never retries a failed call.
#[async_trait]
pub trait EnvelopePersister: Send + Sync {
    /// Record a new envelope. Called at most once per envelope instance.
    async fn save_envelope(&self, envelope: &Envelope) -> Result<(), PersistenceError>;

    /// Mark `envelope_id` as delivered to `client_id`.
    ///
    /// Confirming an already delivered envelope succeeds and keeps the
    /// original delivery time.
    async fn confirm_delivery(
        &self,
        envelope_id: Identity,
        client_id: Identity,
    ) -> Result<(), PersistenceError>;
}

/// Persister that stores nothing and confirms everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPersister;

#[async_trait]
impl EnvelopePersister for NoopPersister {
    async fn save_envelope(&self, _envelope: &Envelope) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn confirm_delivery(
        &self,
        _envelope_id: Identity,
        _client_id: Identity,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn noop_accepts_everything() {
        let persister: Arc<dyn EnvelopePersister> = Arc::new(NoopPersister);
        let env = Envelope::new(Identity::new(), "chat", serde_json::Map::new());
        persister.save_envelope(&env).await.unwrap();
        persister.confirm_delivery(env.id, env.client_id).await.unwrap();
        persister.confirm_delivery(env.id, env.client_id).await.unwrap();
    }
}
