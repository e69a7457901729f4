//! Demo collaborators: token auth, a chat handler and the test page.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::http::header;
use axum::http::request::Parts;
use axum::response::Html;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use wsgate_core::{BoxError, Envelope, EnvelopePersister, Identity, SessionInfo};
use wsgate_server::{ConnectionHandle, ConnectionRegistry, Frame, MessageHandler, Outbound, SessionValidator};

const INDEX_HTML: &str = include_str!("index.html");

/// Settings for the demo wiring, read from the same layers as the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// SQLite file for envelopes.
    pub database_path: PathBuf,
    /// Accepted bearer tokens and the identity each one maps to. Empty admits
    /// everyone under a fresh identity.
    pub tokens: HashMap<String, Identity>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data").join("wsgate.db"),
            tokens: HashMap::new(),
        }
    }
}

/// Why a token check failed.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization: Bearer` header and no `token` query parameter.
    #[error("missing bearer token")]
    MissingToken,
    /// The token is not configured.
    #[error("unknown bearer token")]
    UnknownToken,
}

/// Bearer-token session validator.
///
/// The token comes from `Authorization: Bearer <token>` or, for browsers,
/// the `token` query parameter.
pub struct TokenValidator {
    tokens: HashMap<String, Identity>,
}

impl TokenValidator {
    /// Validator over a token table.
    pub fn new(tokens: HashMap<String, Identity>) -> Self {
        Self { tokens }
    }

    fn token(request: &Parts) -> Option<String> {
        let from_header = request
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(token) = from_header {
            return Some(token.to_owned());
        }
        request.uri.query()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token" && !value.is_empty()).then(|| value.to_owned())
        })
    }
}

#[async_trait]
impl SessionValidator for TokenValidator {
    async fn validate(&self, request: &Parts) -> Result<SessionInfo, BoxError> {
        if self.tokens.is_empty() {
            return Ok(SessionInfo::new(Identity::new()).with_metadata("auth", "anonymous"));
        }
        let token = Self::token(request).ok_or(AuthError::MissingToken)?;
        let id = self.tokens.get(&token).ok_or(AuthError::UnknownToken)?;
        Ok(SessionInfo::new(*id).with_metadata("auth", "token"))
    }
}

/// Why a chat frame was refused.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Binary frame that is not UTF-8.
    #[error("frame is not UTF-8")]
    NotUtf8,
    /// Frame is not a `{type, payload}` object.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// `type` is empty.
    #[error("frame has an empty type")]
    MissingType,
}

#[derive(Deserialize)]
struct ChatFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

/// Saves every message, echoes it to the sender and relays it to everyone
/// else. Each copy is its own envelope, confirmed when written to its
/// recipient.
pub struct ChatHandler {
    persister: Arc<dyn EnvelopePersister>,
    registry: Arc<ConnectionRegistry>,
}

impl ChatHandler {
    /// Handler saving through `persister` and relaying through `registry`.
    pub fn new(persister: Arc<dyn EnvelopePersister>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            persister,
            registry,
        }
    }

    fn parse(frame: Frame) -> Result<ChatFrame, ChatError> {
        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(data) => String::from_utf8(data.to_vec()).map_err(|_| ChatError::NotUtf8)?,
        };
        let parsed: ChatFrame = serde_json::from_str(&text)?;
        if parsed.kind.is_empty() {
            return Err(ChatError::MissingType);
        }
        Ok(parsed)
    }

    async fn relay(&self, sender: Identity, kind: &str, payload: &Map<String, Value>) {
        let mut relayed = payload.clone();
        let _ = relayed.insert("from".into(), Value::String(sender.to_string()));

        for recipient in self.registry.ids() {
            if recipient == sender {
                continue;
            }
            let envelope = Envelope::new(recipient, kind, relayed.clone());
            if let Err(e) = self.persister.save_envelope(&envelope).await {
                warn!(%recipient, error = %e, "relay envelope not saved");
                continue;
            }
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    warn!(%recipient, error = %e, "relay envelope not encoded");
                    continue;
                }
            };
            if let Err(e) = self
                .registry
                .send_to(recipient, Outbound::tracked(json, envelope.id))
            {
                debug!(%recipient, error = %e, "relay not queued");
            }
        }
    }
}

#[async_trait]
impl MessageHandler for ChatHandler {
    async fn handle(&self, connection: &ConnectionHandle, frame: Frame) -> Result<(), BoxError> {
        let ChatFrame { kind, payload } = Self::parse(frame)?;

        let envelope = Envelope::new(connection.id, kind.as_str(), payload.clone());
        self.persister.save_envelope(&envelope).await?;
        connection.try_enqueue_tracked(serde_json::to_string(&envelope)?, envelope.id)?;

        self.relay(connection.id, &kind, &payload).await;
        Ok(())
    }
}

/// `GET /` serving the browser test page.
pub fn index_router() -> Router {
    Router::new().route("/", get(|| async { Html(INDEX_HTML) }))
}
