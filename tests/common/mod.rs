//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use items_telemetry::config::AppConfig;
use items_telemetry::http::HttpServer;
use items_telemetry::lifecycle::Shutdown;
use items_telemetry::observability::tracing::Tracer;
use opentelemetry::Value as AttributeValue;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};

/// Defaults with latency simulation off so tests stay fast.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.items.simulate_latency = false;
    config.timeouts.shutdown_secs = 2;
    config
}

/// A tracer exporting each span into memory as soon as it ends.
pub fn in_memory_tracer() -> (Tracer, InMemorySpanExporter) {
    let spans = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(spans.clone())
        .build();
    (Tracer::from_provider(&provider), spans)
}

pub fn finished(spans: &InMemorySpanExporter) -> Vec<SpanData> {
    spans.get_finished_spans().unwrap()
}

pub fn span_named(spans: &InMemorySpanExporter, name: &str) -> SpanData {
    finished(spans)
        .into_iter()
        .find(|span| span.name == name)
        .unwrap_or_else(|| panic!("no span named {name}"))
}

pub fn attribute(span: &SpanData, key: &str) -> Option<AttributeValue> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
}

pub fn has_exception(span: &SpanData) -> bool {
    span.events.iter().any(|event| event.name == "exception")
}

/// Router with seeded items and spans captured in memory.
pub fn test_router() -> (Router, InMemorySpanExporter) {
    let (tracer, spans) = in_memory_tracer();
    let server = HttpServer::new(test_config(), tracer, None);
    (server.router(), spans)
}

/// Send one request through the router and decode the JSON body, if any.
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// A server bound to an ephemeral port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub spans: InMemorySpanExporter,
    pub shutdown: Shutdown,
    handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestApp {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

pub async fn spawn_app() -> TestApp {
    let (tracer, spans) = in_memory_tracer();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(test_config(), tracer, None);
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    TestApp {
        addr,
        spans,
        shutdown,
        handle,
    }
}
