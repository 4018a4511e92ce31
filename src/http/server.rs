//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the items API, health, error and metrics routes
//! - Wire up middleware (request ID, CORS, timeout, telemetry, panic capture)
//! - Bind the server to a listener and drain it on shutdown

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::HeaderName,
    middleware,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

use crate::config::AppConfig;
use crate::http::middleware::{handle_panic, trace_requests, X_REQUEST_ID};
use crate::items::handlers;
use crate::items::ItemStore;
use crate::lifecycle::Shutdown;
use crate::observability::tracing::Tracer;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ItemStore>,
    pub tracer: Tracer,
    pub prometheus: Option<PrometheusHandle>,
}

/// HTTP server for the items service.
pub struct HttpServer {
    router: Router,
    config: AppConfig,
}

impl HttpServer {
    pub fn new(config: AppConfig, tracer: Tracer, prometheus: Option<PrometheusHandle>) -> Self {
        let state = AppState {
            store: Arc::new(ItemStore::from_config(&config.items)),
            tracer,
            prometheus,
        };
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The telemetry middleware sits inside the route layers so it sees the
    /// matched route; the panic catcher sits inside it so panics still end
    /// the server span.
    #[allow(deprecated)]
    pub fn build_router(config: &AppConfig, state: AppState) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);

        Router::new()
            .route("/api/items", get(handlers::list_items).post(handlers::create_item))
            .route(
                "/api/items/{id}",
                get(handlers::get_item)
                    .put(handlers::update_item)
                    .delete(handlers::delete_item),
            )
            .route("/health", get(handlers::health))
            .route("/error", get(handlers::simulated_error))
            .route("/metrics", get(handlers::metrics))
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(middleware::from_fn_with_state(state.clone(), trace_requests))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::new(request_id))
                    .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                    .layer(CorsLayer::permissive())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Router with all layers applied, for driving the service in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight
    /// requests for at most `timeouts.shutdown_secs`.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let drain_timeout = Duration::from_secs(self.config.timeouts.shutdown_secs);
        let mut stopped = shutdown.subscribe();

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.signalled())
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => result?,
            _ = async {
                let _ = stopped.recv().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                tracing::warn!(
                    timeout_secs = drain_timeout.as_secs(),
                    "Graceful shutdown timed out, dropping open connections"
                );
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
