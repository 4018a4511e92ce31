//! Instrumented items service library.
//!
//! A CRUD items backend and a traced client for it, sharing one telemetry
//! OpenTelemetry stack: spans scoped to the futures that open them, W3C trace
//! context propagation, correlated logs and OTLP metrics export.

pub mod client;
pub mod config;
pub mod http;
pub mod items;
pub mod lifecycle;
pub mod observability;

pub use config::schema::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
