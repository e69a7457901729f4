//! `Gateway`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use wsgate_core::{EnvelopePersister, GateError};

use crate::config::ServerConfig;
use crate::connection::{ConnectionHandle, ConnectionState};
use crate::handler::MessageHandler;
use crate::health::{self, HealthResponse};
use crate::lifecycle::{ConnectionContext, run_connection};
use crate::registry::{ConnectionRegistry, RegisterError};
use crate::shutdown::ShutdownCoordinator;
use crate::transport::WebSocketTransport;
use crate::validator::SessionValidator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Upgrade request gate.
    pub validator: Arc<dyn SessionValidator>,
    /// Inbound frame handler.
    pub handler: Arc<dyn MessageHandler>,
    /// Envelope persister used for delivery confirmation.
    pub persister: Arc<dyn EnvelopePersister>,
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the gateway started.
    pub start_time: Instant,
}

/// The connection gateway.
pub struct Gateway {
    state: AppState,
}

impl Gateway {
    /// Create a gateway with a fresh registry.
    pub fn new(
        config: ServerConfig,
        validator: Arc<dyn SessionValidator>,
        handler: Arc<dyn MessageHandler>,
        persister: Arc<dyn EnvelopePersister>,
    ) -> Self {
        Self::with_registry(
            config,
            validator,
            handler,
            persister,
            Arc::new(ConnectionRegistry::new()),
        )
    }

    /// Create a gateway around an existing registry, so handlers built before
    /// the gateway can fan out through it.
    pub fn with_registry(
        config: ServerConfig,
        validator: Arc<dyn SessionValidator>,
        handler: Arc<dyn MessageHandler>,
        persister: Arc<dyn EnvelopePersister>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            state: AppState {
                config: Arc::new(config),
                validator,
                handler,
                persister,
                registry,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
            },
        }
    }

    /// Build the Axum router with `/ws` and `/health`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve [`router`](Self::router).
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        self.listen_with(self.router()).await
    }

    /// Bind the configured address and serve `router`, which should include
    /// [`router`](Self::router). HTTP serving stops when shutdown begins.
    pub async fn listen_with(
        &self,
        router: Router,
    ) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let token = self.state.shutdown.token();
        info!(%addr, "gateway listening");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Cancel every connection and wait for them to close, up to the
    /// configured timeout.
    pub async fn graceful_shutdown(&self) -> bool {
        let timeout = self.state.config.shutdown_timeout();
        self.state.shutdown.graceful_shutdown(Some(timeout)).await
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, &state.registry))
}

/// GET /ws
///
/// Validates the session, checks the upgrade headers, claims the identity in
/// the registry, then answers `101` and hands the socket to a connection task.
async fn ws_handler(State(state): State<AppState>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();
    debug!(state = %ConnectionState::Received, uri = %parts.uri, "upgrade request");

    match admit(&state, &mut parts).await {
        Ok(response) => response,
        Err(Rejection::Gate(err)) => reject(&err),
        Err(Rejection::Upgrade(response)) => response,
    }
}

enum Rejection {
    Gate(GateError),
    Upgrade(Response),
}

async fn admit(state: &AppState, parts: &mut Parts) -> Result<Response, Rejection> {
    debug!(state = %ConnectionState::Validating, "validating session");
    let session = state
        .validator
        .validate(parts)
        .await
        .map_err(|e| Rejection::Gate(GateError::Unauthorized(e)))?;

    let client_id = session.client_id;
    let limit = state.config.max_connections;
    if state.registry.contains(client_id) {
        return Err(Rejection::Gate(GateError::DuplicateIdentity(client_id)));
    }
    if state.registry.len() >= limit {
        return Err(Rejection::Gate(GateError::AtCapacity { limit }));
    }

    debug!(state = %ConnectionState::Upgrading, %client_id, "session accepted");
    let upgrade = match WebSocketUpgrade::from_request_parts(parts, state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            let err = GateError::UpgradeFailed(rejection.body_text());
            counter!("ws_rejections_total", "reason" => err.error_kind()).increment(1);
            info!(status = %rejection.status(), error = %err, "upgrade rejected");
            return Err(Rejection::Upgrade(rejection.into_response()));
        }
    };

    // The pre-checks above are advisory; this insert is the atomic claim.
    // Until the connection task starts, the entry is a reservation.
    let (handle, outbound) =
        ConnectionHandle::new(session, state.config.outbound_capacity, &state.shutdown.token());
    let handle = Arc::new(handle);
    state
        .registry
        .try_register(Arc::clone(&handle), limit)
        .map_err(|e| {
            Rejection::Gate(match e {
                RegisterError::Duplicate(id) => GateError::DuplicateIdentity(id),
                RegisterError::AtCapacity(limit) => GateError::AtCapacity { limit },
            })
        })?;

    let ctx = ConnectionContext {
        handler: Arc::clone(&state.handler),
        persister: Arc::clone(&state.persister),
        registry: Arc::clone(&state.registry),
    };
    let shutdown = Arc::clone(&state.shutdown);
    let failed_registry = Arc::clone(&state.registry);
    let failed_handle = Arc::clone(&handle);

    Ok(upgrade
        .max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(client_id = %failed_handle.id, error = %e, "websocket upgrade failed");
            release_failed_upgrade(&failed_registry, &failed_handle);
        })
        .on_upgrade(move |socket| {
            shutdown.track(async move {
                let transport = WebSocketTransport::new(socket);
                let _reason = run_connection(transport, handle, outbound, ctx).await;
            })
        }))
}

/// Drop the registry claim of a handle whose upgrade never completed.
fn release_failed_upgrade(registry: &ConnectionRegistry, handle: &Arc<ConnectionHandle>) {
    let _ = registry.remove_if_same(handle);
    handle.disconnect();
    handle.set_state(ConnectionState::Closed);
}

fn reject(err: &GateError) -> Response {
    counter!("ws_rejections_total", "reason" => err.error_kind()).increment(1);
    match err {
        GateError::Unauthorized(source) => info!(error = %source, "session validation failed"),
        other => info!(error = %other, "upgrade refused"),
    }
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.public_message()).into_response()
}
