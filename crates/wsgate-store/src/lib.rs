//! # wsgate-store
//!
//! Envelope persisters for the wsgate gateway.
//!
//! - [`MemoryEnvelopeStore`]: process-local map, for tests and demos
//! - [`SqliteEnvelopeStore`]: durable store on top of [`Database`]

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use database::Database;
pub use error::StoreError;
pub use memory::MemoryEnvelopeStore;
pub use sqlite::SqliteEnvelopeStore;
