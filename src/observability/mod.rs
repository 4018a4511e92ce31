//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Client call (ItemsClient)
//!     → tracing.rs: opens `frontend.<op>` span in the OpenTelemetry Context
//!     → propagation.rs: injects `traceparent`
//!     ─── network ───
//!     → http middleware: propagation.rs extracts parent, tracing.rs opens server span
//!     → handlers open child spans, log through logging.rs (traceId/spanId stamped)
//!     → metrics.rs records request counts and latency
//!
//! Consumers:
//!     → pipeline.rs: SDK batch processor ships ended spans over OTLP/HTTP
//!     → metrics.rs: PeriodicReader pushes OTLP metrics, Prometheus scrape
//!     → stdout: JSON or human-readable log lines
//! ```
//!
//! # Design Decisions
//! - The active span rides the OpenTelemetry Context attached to each future,
//!   never process-wide state
//! - Export failures are logged by the SDK and dropped; they never reach a request
//! - Recording a metric is an atomic update; export happens on the reader thread

pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod propagation;
pub mod tracing;

pub use opentelemetry::trace::{SpanContext, SpanKind, Status};
pub use opentelemetry::KeyValue;

pub use self::pipeline::{Telemetry, TelemetryError};
pub use self::tracing::{current_context, with_span, Tracer};
