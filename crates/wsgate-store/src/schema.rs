//! SQL DDL for the envelope database.

/// Current schema version. WAL mode is enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

/// Tables and indexes.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS envelopes (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL,
    type TEXT NOT NULL,
    payload TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    delivered TEXT
);

CREATE INDEX IF NOT EXISTS idx_envelopes_client ON envelopes(client_id);
CREATE INDEX IF NOT EXISTS idx_envelopes_client_delivered ON envelopes(client_id, delivered);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
";

/// Connection pragmas.
pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";
