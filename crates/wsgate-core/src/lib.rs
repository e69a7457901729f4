//! # wsgate-core
//!
//! Shared vocabulary for the wsgate connection gateway.
//!
//! - **Identity**: [`Identity`], a random 128-bit id naming connections and envelopes
//! - **Sessions**: [`SessionInfo`], what a session validator hands back on success
//! - **Envelopes**: [`Envelope`] plus the [`EnvelopePersister`] contract
//! - **Errors**: [`GateError`] taxonomy and [`PersistenceError`] via `thiserror`
//! - **Logging**: `tracing` subscriber setup in [`logging`]

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod identity;
pub mod logging;
pub mod persist;
pub mod session;

pub use envelope::Envelope;
pub use errors::{BoxError, GateError, PersistenceError};
pub use identity::{Identity, IdentityError};
pub use persist::EnvelopePersister;
pub use session::SessionInfo;
