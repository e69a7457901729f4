//! Authenticated session produced by a session validator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Who is connecting, plus free-form metadata (role, tenant, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Identity the connection will carry for its whole lifetime.
    pub client_id: Identity,
    /// Arbitrary string metadata supplied by the validator.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionInfo {
    /// Session for `client_id` with no metadata.
    #[must_use]
    pub fn new(client_id: Identity) -> Self {
        Self {
            client_id,
            metadata: HashMap::new(),
        }
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.metadata.insert(key.into(), value.into());
        self
    }
}
