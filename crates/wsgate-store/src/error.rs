//! Storage errors and their mapping onto [`PersistenceError`].

use wsgate_core::PersistenceError;

/// Errors raised by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite failure.
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table name.
        table: &'static str,
        /// Column name.
        column: &'static str,
        /// What went wrong.
        detail: String,
    },

    /// JSON encoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Serialization(msg) => PersistenceError::Serialization(msg),
            StoreError::CorruptRow { .. } => PersistenceError::Serialization(e.to_string()),
            StoreError::Database(msg) | StoreError::Io(msg) => PersistenceError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_maps_to_storage() {
        let err: PersistenceError = StoreError::Database("locked".into()).into();
        assert!(matches!(err, PersistenceError::Storage(msg) if msg == "locked"));
    }

    #[test]
    fn corrupt_row_maps_to_serialization() {
        let err: PersistenceError = StoreError::CorruptRow {
            table: "envelopes",
            column: "payload",
            detail: "invalid JSON".into(),
        }
        .into();
        match err {
            PersistenceError::Serialization(msg) => assert!(msg.contains("envelopes.payload")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
