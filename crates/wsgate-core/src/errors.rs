//! Error taxonomy for the gateway.
//!
//! - [`GateError`]: every failure the lifecycle can observe, classified by how
//!   far it reaches (request, connection or single frame)
//! - [`PersistenceError`]: envelope persister failures, surfaced to whoever
//!   called the persister

use thiserror::Error;

use crate::identity::Identity;

/// Opaque error type used at collaborator boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How far a [`GateError`] reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorScope {
    /// Ends the upgrade request; no connection is created.
    Request,
    /// Ends one connection only.
    Connection,
    /// Affects a single frame; the connection continues.
    Frame,
}

/// Gateway error taxonomy.
#[derive(Debug, Error)]
pub enum GateError {
    /// The session validator rejected the request.
    #[error("unauthorized: {0}")]
    Unauthorized(#[source] BoxError),

    /// Another live connection already holds this identity.
    #[error("identity {0} is already connected")]
    DuplicateIdentity(Identity),

    /// The connection limit has been reached.
    #[error("connection limit of {limit} reached")]
    AtCapacity {
        /// Configured maximum.
        limit: usize,
    },

    /// The protocol upgrade handshake failed.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Read or write failure on an active connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The message handler failed to process one frame.
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),

    /// The envelope persister failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl GateError {
    /// How far this error reaches.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::Unauthorized(_)
            | Self::DuplicateIdentity(_)
            | Self::AtCapacity { .. }
            | Self::UpgradeFailed(_) => ErrorScope::Request,
            Self::Transport(_) => ErrorScope::Connection,
            Self::Handler(_) | Self::Persistence(_) => ErrorScope::Frame,
        }
    }

    /// HTTP status for request-scoped errors.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 401,
            Self::DuplicateIdentity(_) => 409,
            Self::AtCapacity { .. } => 503,
            Self::UpgradeFailed(_) => 400,
            Self::Transport(_) | Self::Handler(_) | Self::Persistence(_) => 500,
        }
    }

    /// Body text sent with a rejection. Never includes collaborator details.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "Unauthorized",
            Self::DuplicateIdentity(_) => "Already connected",
            Self::AtCapacity { .. } => "Too many connections",
            Self::UpgradeFailed(_) => "WebSocket upgrade failed",
            Self::Transport(_) | Self::Handler(_) | Self::Persistence(_) => "Internal error",
        }
    }

    /// Short classification string for logs and metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::DuplicateIdentity(_) => "duplicate_identity",
            Self::AtCapacity { .. } => "at_capacity",
            Self::UpgradeFailed(_) => "upgrade_failed",
            Self::Transport(_) => "transport",
            Self::Handler(_) => "handler",
            Self::Persistence(_) => "persistence",
        }
    }
}

/// Envelope persister failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// No envelope with this id belongs to this client.
    #[error("envelope {envelope_id} not found for client {client_id}")]
    NotFound {
        /// Requested envelope.
        envelope_id: Identity,
        /// Requested owner.
        client_id: Identity,
    },

    /// An envelope with this id is already stored.
    #[error("envelope {0} already exists")]
    Conflict(Identity),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Stored data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn boxed(msg: &str) -> BoxError {
        msg.to_owned().into()
    }

    #[test]
    fn request_scoped_errors() {
        assert_eq!(GateError::Unauthorized(boxed("x")).scope(), ErrorScope::Request);
        assert_eq!(
            GateError::UpgradeFailed("missing key".into()).scope(),
            ErrorScope::Request
        );
        assert_eq!(
            GateError::DuplicateIdentity(Identity::new()).scope(),
            ErrorScope::Request
        );
        assert_eq!(GateError::AtCapacity { limit: 1 }.scope(), ErrorScope::Request);
    }

    #[test]
    fn transport_is_connection_scoped() {
        assert_eq!(
            GateError::Transport("reset".into()).scope(),
            ErrorScope::Connection
        );
    }

    #[test]
    fn handler_and_persistence_are_frame_scoped() {
        assert_eq!(GateError::Handler(boxed("bad")).scope(), ErrorScope::Frame);
        let err: GateError = PersistenceError::Storage("disk".into()).into();
        assert_eq!(err.scope(), ErrorScope::Frame);
    }

    #[test]
    fn status_codes() {
        assert_eq!(GateError::Unauthorized(boxed("x")).status_code(), 401);
        assert_eq!(GateError::DuplicateIdentity(Identity::new()).status_code(), 409);
        assert_eq!(GateError::AtCapacity { limit: 3 }.status_code(), 503);
        assert_eq!(GateError::UpgradeFailed("x".into()).status_code(), 400);
    }

    #[test]
    fn public_message_hides_validator_detail() {
        let err = GateError::Unauthorized(boxed("token abc123 expired"));
        assert_eq!(err.public_message(), "Unauthorized");
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn unauthorized_keeps_source() {
        let err = GateError::Unauthorized(boxed("bad token"));
        assert_eq!(err.source().unwrap().to_string(), "bad token");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(GateError::Transport("x".into()).error_kind(), "transport");
        assert_eq!(GateError::Handler(boxed("x")).error_kind(), "handler");
    }

    #[test]
    fn not_found_message_names_both_ids() {
        let envelope_id = Identity::new();
        let client_id = Identity::new();
        let msg = PersistenceError::NotFound {
            envelope_id,
            client_id,
        }
        .to_string();
        assert!(msg.contains(&envelope_id.to_string()));
        assert!(msg.contains(&client_id.to_string()));
    }

    #[test]
    fn serde_error_converts() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let converted: PersistenceError = err.into();
        assert!(matches!(converted, PersistenceError::Serialization(_)));
    }
}
