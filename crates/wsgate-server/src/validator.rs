//! Session validation seam.

use async_trait::async_trait;
use axum::http::request::Parts;
use wsgate_core::{BoxError, Identity, SessionInfo};

/// Decides whether an upgrade request may become a connection.
///
/// Any error rejects the request with `401`. The error is logged but never
/// reaches the client.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Inspect the request head and return the caller's session.
    async fn validate(&self, request: &Parts) -> Result<SessionInfo, BoxError>;
}

/// Admits every request under a fresh identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousValidator;

#[async_trait]
impl SessionValidator for AnonymousValidator {
    async fn validate(&self, _request: &Parts) -> Result<SessionInfo, BoxError> {
        Ok(SessionInfo::new(Identity::new()).with_metadata("auth", "anonymous"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn anonymous_mints_distinct_identities() {
        let (parts, ()) = Request::builder().uri("/ws").body(()).unwrap().into_parts();
        let a = AnonymousValidator.validate(&parts).await.unwrap();
        let b = AnonymousValidator.validate(&parts).await.unwrap();
        assert_ne!(a.client_id, b.client_id);
        assert_eq!(a.metadata.get("auth").map(String::as_str), Some("anonymous"));
    }
}
