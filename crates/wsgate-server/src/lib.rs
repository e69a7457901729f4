//! # wsgate-server
//!
//! Axum WebSocket gateway.
//!
//! - **Gateway**: [`Gateway`] serves `/ws` and `/health` and owns shutdown
//! - **Lifecycle**: [`run_connection`] drives one client from activation to close
//! - **Registry**: [`ConnectionRegistry`] keeps one live handle per identity
//! - **Seams**: [`SessionValidator`], [`MessageHandler`] and [`Transport`]
//! - **Config**: [`ServerConfig`] layered with `figment`

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod handler;
pub mod health;
pub mod lifecycle;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod transport;
pub mod validator;

pub use config::{ConfigError, ServerConfig};
pub use connection::{ConnectionHandle, ConnectionState, EnqueueError, Outbound};
pub use handler::MessageHandler;
pub use lifecycle::{CloseReason, ConnectionContext, run_connection};
pub use registry::{ConnectionRegistry, RegisterError};
pub use server::Gateway;
pub use shutdown::ShutdownCoordinator;
pub use transport::{Frame, Transport, TransportError, WebSocketTransport};
pub use validator::SessionValidator;
