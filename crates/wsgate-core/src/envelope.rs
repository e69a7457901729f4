//! Durable message record tracked through delivery confirmation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::Identity;

/// One inbound or outbound message that needs durable tracking.
///
/// The JSON form uses the field names `id`, `client_id`, `type`, `payload`,
/// `timestamp` and `delivered`; persisters store exactly this shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope identity.
    pub id: Identity,
    /// Identity of the connection that owns this envelope.
    pub client_id: Identity,
    /// Application-defined type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Delivery confirmation time, unset until confirmed.
    #[serde(default)]
    pub delivered: Option<DateTime<Utc>>,
}

impl Envelope {
    /// New undelivered envelope with a fresh identity, stamped now.
    #[must_use]
    pub fn new(client_id: Identity, kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: Identity::new(),
            client_id,
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
            delivered: None,
        }
    }

    /// Whether delivery has been confirmed.
    pub fn is_delivered(&self) -> bool {
        self.delivered.is_some()
    }

    /// Record a delivery confirmation.
    ///
    /// The first confirmation wins; later calls leave `delivered` untouched so
    /// it never regresses. Returns `true` when this call set the timestamp.
    pub fn confirm_delivery(&mut self, at: DateTime<Utc>) -> bool {
        if self.delivered.is_some() {
            return false;
        }
        self.delivered = Some(at);
        true
    }
}
