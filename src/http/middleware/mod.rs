//! HTTP middleware.

pub mod telemetry;

pub use telemetry::{handle_panic, trace_requests, X_REQUEST_ID};
