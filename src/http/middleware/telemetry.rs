//! Request telemetry middleware.
//!
//! Per request: extract the remote parent from `traceparent`, open the
//! server span, log the request inside it, and record request metrics.

use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::http::error::INTERNAL_MESSAGE;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::observability::propagation;
use crate::observability::tracing::{record_exception, set_attribute, set_status};
use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::KeyValue;

pub const X_REQUEST_ID: &str = "x-request-id";

pub async fn trace_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start_time = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| uri.path().to_owned());
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let parent = propagation::extract(request.headers());

    metrics::record_attempt(method.as_str(), &route);

    let attributes = [
        KeyValue::new("http.method", method.to_string()),
        KeyValue::new("http.route", route.clone()),
        KeyValue::new("http.target", uri.to_string()),
        KeyValue::new("http.request_id", request_id.clone()),
    ];
    let outcome = state
        .tracer
        .in_span_with_parent(
            parent,
            SpanKind::Server,
            format!("{method} {route}"),
            attributes,
            async {
                tracing::info!(
                    method = %method,
                    url = %uri,
                    client_ip = %client_ip,
                    request_id = %request_id,
                    "request received"
                );

                let response = next.run(request).await;
                let status = response.status();
                set_attribute("http.status_code", i64::from(status.as_u16()));
                if status.is_server_error() {
                    set_status(Status::error(format!("HTTP {}", status.as_u16())));
                }
                tracing::debug!(
                    status = status.as_u16(),
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    "request completed"
                );
                Ok::<_, Infallible>(response)
            },
        )
        .await;

    let response = match outcome {
        Ok(response) => response,
        Err(never) => match never {},
    };
    metrics::record_request(method.as_str(), &route, response.status().as_u16(), start_time);
    response
}

/// Panic handler for `CatchPanicLayer`: records the panic on the active
/// span and answers with the generic 500 body.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(error = %message, "Handler panicked");
    record_exception("panic", message);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": INTERNAL_MESSAGE })),
    )
        .into_response()
}
