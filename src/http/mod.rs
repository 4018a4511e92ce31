//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, CORS, timeout)
//!     → middleware/telemetry.rs (traceparent extraction, server span, request log, metrics)
//!     → items::handlers (operation span, store access)
//!     → error.rs (ApiError → status + JSON body)
//!     → Send to client
//! ```

pub mod error;
pub mod middleware;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, HttpServer};
