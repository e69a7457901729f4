//! SQLite-backed envelope persister.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, instrument};
use wsgate_core::{Envelope, EnvelopePersister, Identity, PersistenceError};

use crate::database::Database;
use crate::error::StoreError;

const SELECT_COLUMNS: &str = "SELECT id, client_id, type, payload, timestamp, delivered FROM envelopes";

/// Durable envelope store.
#[derive(Clone)]
pub struct SqliteEnvelopeStore {
    db: Database,
}

impl SqliteEnvelopeStore {
    /// Wrap an open database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Look up one envelope.
    #[instrument(skip(self), fields(envelope_id = %id))]
    pub fn get(&self, id: Identity) -> Result<Option<Envelope>, StoreError> {
        self.db.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                    [id.to_string()],
                    RawRow::from_row,
                )
                .optional()?;
            raw.map(RawRow::into_envelope).transpose()
        })
    }

    /// All envelopes owned by `client_id`, oldest first.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub fn list_for_client(&self, client_id: Identity) -> Result<Vec<Envelope>, StoreError> {
        self.query_client(
            &format!("{SELECT_COLUMNS} WHERE client_id = ?1 ORDER BY timestamp ASC"),
            client_id,
        )
    }

    /// Envelopes owned by `client_id` still waiting for confirmation, oldest first.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub fn undelivered_for_client(&self, client_id: Identity) -> Result<Vec<Envelope>, StoreError> {
        self.query_client(
            &format!(
                "{SELECT_COLUMNS} WHERE client_id = ?1 AND delivered IS NULL ORDER BY timestamp ASC"
            ),
            client_id,
        )
    }

    fn query_client(&self, sql: &str, client_id: Identity) -> Result<Vec<Envelope>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([client_id.to_string()], RawRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RawRow::into_envelope).collect()
        })
    }

    fn insert(&self, envelope: &Envelope) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(&envelope.payload)?;
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO envelopes (id, client_id, type, payload, timestamp, delivered)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    envelope.id.to_string(),
                    envelope.client_id.to_string(),
                    envelope.kind,
                    payload,
                    envelope.timestamp.to_rfc3339(),
                    envelope.delivered.map(|d| d.to_rfc3339()),
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    fn mark_delivered(
        &self,
        envelope_id: Identity,
        client_id: Identity,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            // COALESCE keeps the first confirmation time
            let matched = conn.execute(
                "UPDATE envelopes SET delivered = COALESCE(delivered, ?3)
                 WHERE id = ?1 AND client_id = ?2",
                params![envelope_id.to_string(), client_id.to_string(), at.to_rfc3339()],
            )?;
            Ok(matched == 1)
        })
    }
}

#[async_trait]
impl EnvelopePersister for SqliteEnvelopeStore {
    async fn save_envelope(&self, envelope: &Envelope) -> Result<(), PersistenceError> {
        let store = self.clone();
        let record = envelope.clone();
        if !run_blocking(move || store.insert(&record)).await? {
            return Err(PersistenceError::Conflict(envelope.id));
        }
        debug!(envelope_id = %envelope.id, client_id = %envelope.client_id, "envelope saved");
        Ok(())
    }

    async fn confirm_delivery(
        &self,
        envelope_id: Identity,
        client_id: Identity,
    ) -> Result<(), PersistenceError> {
        let store = self.clone();
        let at = Utc::now();
        if !run_blocking(move || store.mark_delivered(envelope_id, client_id, at)).await? {
            return Err(PersistenceError::NotFound {
                envelope_id,
                client_id,
            });
        }
        debug!(%envelope_id, %client_id, "delivery confirmed");
        Ok(())
    }
}

/// Run a SQLite call on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, PersistenceError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PersistenceError::Storage(format!("blocking task failed: {e}")))?
        .map_err(PersistenceError::from)
}

/// Column values as stored, decoded into an [`Envelope`] separately so decode
/// failures surface as [`StoreError::CorruptRow`].
struct RawRow {
    id: String,
    client_id: String,
    kind: String,
    payload: String,
    timestamp: String,
    delivered: Option<String>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            client_id: row.get(1)?,
            kind: row.get(2)?,
            payload: row.get(3)?,
            timestamp: row.get(4)?,
            delivered: row.get(5)?,
        })
    }

    fn into_envelope(self) -> Result<Envelope, StoreError> {
        Ok(Envelope {
            id: parse_identity(&self.id, "id")?,
            client_id: parse_identity(&self.client_id, "client_id")?,
            kind: self.kind,
            payload: serde_json::from_str(&self.payload).map_err(|e| StoreError::CorruptRow {
                table: "envelopes",
                column: "payload",
                detail: format!("invalid JSON: {e}"),
            })?,
            timestamp: parse_time(&self.timestamp, "timestamp")?,
            delivered: self
                .delivered
                .as_deref()
                .map(|raw| parse_time(raw, "delivered"))
                .transpose()?,
        })
    }
}

fn parse_identity(raw: &str, column: &'static str) -> Result<Identity, StoreError> {
    Identity::parse(raw).map_err(|e| StoreError::CorruptRow {
        table: "envelopes",
        column,
        detail: e.to_string(),
    })
}

fn parse_time(raw: &str, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: "envelopes",
            column,
            detail: e.to_string(),
        })
}
