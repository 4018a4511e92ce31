//! Span factory.
//!
//! [`Tracer::in_span`] wraps a future in a named OpenTelemetry span. The span
//! travels in an OpenTelemetry [`Context`] that is attached on every poll of
//! the wrapped future, so it survives suspension points, is restored when the
//! nested future finishes, and is never observed by unrelated tasks running
//! on the same worker.
//!
//! ```text
//! in_span("create-item")
//!     → child of Context::current() (or a new root)
//!     → work.with_context(cx).await
//!     → Ok  → status OK unless the work set one → span.end()
//!     → Err → exception event + status ERROR unless the work set one → span.end()
//!     → dropped/panicked → status ERROR → span.end()
//! ```

use std::any::type_name;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use opentelemetry::context::FutureExt;
use opentelemetry::trace::{
    SpanContext, SpanKind, Status, TraceContextExt, Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, Key, KeyValue, Value};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};

/// Instrumentation scope reported on every span.
pub const INSTRUMENTATION_NAME: &str = "items-telemetry";

pub const EXCEPTION_EVENT: &str = "exception";

/// Global tracer used by [`with_span`].
static GLOBAL_TRACER: OnceLock<Tracer> = OnceLock::new();

/// Set once the wrapped work has chosen its span's status itself.
#[derive(Debug, Clone, Default)]
struct ExplicitStatus(Arc<AtomicBool>);

/// Ends the span exactly once, whichever way the work finishes.
struct SpanGuard {
    cx: Context,
    armed: bool,
}

impl SpanGuard {
    fn status_is_explicit(&self) -> bool {
        self.cx
            .get::<ExplicitStatus>()
            .is_some_and(|flag| flag.0.load(Ordering::Acquire))
    }

    fn succeed(mut self) {
        self.armed = false;
        let span = self.cx.span();
        if !self.status_is_explicit() {
            span.set_status(Status::Ok);
        }
        span.end();
    }

    /// An explicit status means the work already classified the failure
    /// (a client error, say), so no exception is recorded for it.
    fn fail<E>(mut self, error: &E)
    where
        E: std::error::Error + ?Sized,
    {
        self.armed = false;
        let span = self.cx.span();
        if !self.status_is_explicit() {
            span.add_event(EXCEPTION_EVENT, error_attributes(error, &Backtrace::capture()));
            span.set_status(Status::error(error.to_string()));
        }
        span.end();
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.armed {
            let span = self.cx.span();
            span.set_status(Status::error("span dropped before completion"));
            span.end();
        }
    }
}

/// Creates spans through an OpenTelemetry SDK tracer.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: SdkTracer,
}

impl Tracer {
    pub fn from_provider(provider: &SdkTracerProvider) -> Self {
        Self {
            inner: provider.tracer(INSTRUMENTATION_NAME),
        }
    }

    /// A tracer whose spans go nowhere.
    pub fn noop() -> Self {
        Self::from_provider(&SdkTracerProvider::builder().build())
    }

    /// The underlying SDK tracer, for the `tracing` bridge layer.
    pub fn sdk_tracer(&self) -> SdkTracer {
        self.inner.clone()
    }

    /// Run `work` inside a new internal span, child of the active span if any.
    pub async fn in_span<T, E, F, A>(
        &self,
        name: impl Into<Cow<'static, str>>,
        attributes: A,
        work: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error,
        A: IntoIterator<Item = KeyValue>,
    {
        self.run(Context::current(), SpanKind::Internal, name, attributes, work)
            .await
    }

    /// Like [`Tracer::in_span`] with an explicit span kind.
    pub async fn in_span_with_kind<T, E, F, A>(
        &self,
        kind: SpanKind,
        name: impl Into<Cow<'static, str>>,
        attributes: A,
        work: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error,
        A: IntoIterator<Item = KeyValue>,
    {
        self.run(Context::current(), kind, name, attributes, work).await
    }

    /// Run `work` inside a new span with an explicit parent.
    ///
    /// Used at process boundaries where the parent arrives over the wire;
    /// `None` starts a new root trace.
    pub async fn in_span_with_parent<T, E, F, A>(
        &self,
        parent: Option<SpanContext>,
        kind: SpanKind,
        name: impl Into<Cow<'static, str>>,
        attributes: A,
        work: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error,
        A: IntoIterator<Item = KeyValue>,
    {
        let parent_cx = match parent {
            Some(parent) => Context::new().with_remote_span_context(parent),
            None => Context::new(),
        };
        self.run(parent_cx, kind, name, attributes, work).await
    }

    async fn run<T, E, F, A>(
        &self,
        parent_cx: Context,
        kind: SpanKind,
        name: impl Into<Cow<'static, str>>,
        attributes: A,
        work: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::error::Error,
        A: IntoIterator<Item = KeyValue>,
    {
        let span = self
            .inner
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(&self.inner, &parent_cx);
        let cx = parent_cx
            .with_span(span)
            .with_value(ExplicitStatus::default());
        let guard = SpanGuard {
            cx: cx.clone(),
            armed: true,
        };

        let result = work.with_context(cx).await;

        match &result {
            Ok(_) => guard.succeed(),
            Err(error) => guard.fail(error),
        }
        result
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::noop()
    }
}

/// Install the tracer used by [`with_span`]. Returns false if one was already set.
pub fn set_global_tracer(tracer: Tracer) -> bool {
    GLOBAL_TRACER.set(tracer).is_ok()
}

/// The installed global tracer, or a no-op tracer.
pub fn global_tracer() -> Tracer {
    GLOBAL_TRACER.get().cloned().unwrap_or_default()
}

/// Run `work` in a span created by the global tracer.
pub async fn with_span<T, E, F, A>(
    name: impl Into<Cow<'static, str>>,
    attributes: A,
    work: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error,
    A: IntoIterator<Item = KeyValue>,
{
    global_tracer().in_span(name, attributes, work).await
}

/// Context of the span active at the call site, if any.
pub fn current_context() -> Option<SpanContext> {
    Context::map_current(|cx| {
        let span_context = cx.span().span_context().clone();
        span_context.is_valid().then_some(span_context)
    })
}

/// Set an attribute on the active span. No-op outside a span.
pub fn set_attribute(key: impl Into<Key>, value: impl Into<Value>) {
    Context::map_current(|cx| cx.span().set_attribute(KeyValue::new(key, value)));
}

/// Set the status of the active span. No-op outside a span.
///
/// The status survives whatever the wrapped work returns afterwards.
pub fn set_status(status: Status) {
    Context::map_current(|cx| {
        if !cx.has_active_span() {
            return;
        }
        cx.span().set_status(status);
        if let Some(flag) = cx.get::<ExplicitStatus>() {
            flag.0.store(true, Ordering::Release);
        }
    });
}

/// Record an exception that is not a Rust error value (a panic payload)
/// on the active span and mark it failed.
pub fn record_exception(kind: &str, message: impl Into<String>) {
    let message = message.into();
    let attributes = exception_attributes(kind, &message, None, &Backtrace::capture());
    Context::map_current(|cx| cx.span().add_event(EXCEPTION_EVENT, attributes));
    set_status(Status::error(message));
}

/// Event attributes describing `error`, its source chain and `backtrace`.
pub(crate) fn error_attributes<E>(error: &E, backtrace: &Backtrace) -> Vec<KeyValue>
where
    E: std::error::Error + ?Sized,
{
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    let cause = (!chain.is_empty()).then(|| chain.join("\ncaused by: "));
    exception_attributes(type_name::<E>(), &error.to_string(), cause, backtrace)
}

fn exception_attributes(
    kind: &str,
    message: &str,
    cause: Option<String>,
    backtrace: &Backtrace,
) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new("exception.type", kind.to_string()),
        KeyValue::new("exception.message", message.to_string()),
    ];
    // Empty unless RUST_BACKTRACE or RUST_LIB_BACKTRACE asks for it.
    if backtrace.status() == BacktraceStatus::Captured {
        attributes.push(KeyValue::new("exception.stacktrace", backtrace.to_string()));
    }
    if let Some(cause) = cause {
        attributes.push(KeyValue::new("exception.cause", cause));
    }
    attributes
}

#[cfg(test)]
pub(crate) mod test_support {
    use opentelemetry::Value;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};

    use super::Tracer;

    /// A tracer exporting synchronously into memory.
    pub(crate) fn in_memory_tracer() -> (Tracer, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (Tracer::from_provider(&provider), exporter)
    }

    pub(crate) fn finished(exporter: &InMemorySpanExporter) -> Vec<SpanData> {
        exporter.get_finished_spans().unwrap()
    }

    pub(crate) fn span_named(exporter: &InMemorySpanExporter, name: &str) -> SpanData {
        finished(exporter)
            .into_iter()
            .find(|span| span.name == name)
            .unwrap_or_else(|| panic!("no span named {name}"))
    }

    pub(crate) fn attribute(span: &SpanData, key: &str) -> Option<Value> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.clone())
    }

    pub(crate) fn event_attribute(span: &SpanData, event: &str, key: &str) -> Option<Value> {
        span.events
            .iter()
            .find(|e| e.name == event)?
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};
    use std::time::Duration;

    #[derive(Debug, PartialEq, thiserror::Error)]
    #[error("work failed: {0}")]
    struct WorkError(&'static str);

    #[derive(Debug, thiserror::Error)]
    #[error("store unavailable")]
    struct StoreError(#[source] WorkError);

    #[tokio::test]
    async fn test_successful_work_ends_one_ok_span() {
        let (tracer, exporter) = in_memory_tracer();

        let value = tracer
            .in_span("op", [KeyValue::new("operation", "op")], async {
                Ok::<_, WorkError>(42)
            })
            .await;

        assert_eq!(value, Ok(42));
        let spans = finished(&exporter);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::Ok);
        assert_eq!(spans[0].span_kind, SpanKind::Internal);
        assert_eq!(attribute(&spans[0], "operation"), Some(Value::from("op")));
        assert_eq!(spans[0].parent_span_id, SpanId::INVALID);
    }

    #[tokio::test]
    async fn test_failing_work_records_exception_and_returns_error() {
        let (tracer, exporter) = in_memory_tracer();

        let result = tracer
            .in_span("op", [], async { Err::<(), _>(WorkError("boom")) })
            .await;

        assert_eq!(result, Err(WorkError("boom")));
        let spans = finished(&exporter);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("work failed: boom"));
        assert_eq!(
            event_attribute(&spans[0], EXCEPTION_EVENT, "exception.message"),
            Some(Value::from("work failed: boom"))
        );
        let type_name = event_attribute(&spans[0], EXCEPTION_EVENT, "exception.type").unwrap();
        assert!(type_name.as_str().ends_with("WorkError"));
    }

    #[test]
    fn test_exception_carries_backtrace_and_cause_chain() {
        let error = StoreError(WorkError("disk"));

        let attributes = error_attributes(&error, &Backtrace::force_capture());
        let get = |key: &str| {
            attributes
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.as_str().into_owned())
        };
        assert_eq!(get("exception.message").as_deref(), Some("store unavailable"));
        assert_eq!(get("exception.cause").as_deref(), Some("work failed: disk"));
        let stacktrace = get("exception.stacktrace").expect("backtrace captured");
        assert!(!stacktrace.is_empty());

        let attributes = error_attributes(&WorkError("plain"), &Backtrace::disabled());
        let keys: Vec<&str> = attributes.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, ["exception.type", "exception.message"]);
    }

    #[tokio::test]
    async fn test_nested_spans_link_and_restore_parent() {
        let (tracer, exporter) = in_memory_tracer();
        let inner_tracer = tracer.clone();

        tracer
            .in_span("outer", [], async move {
                let outer = current_context().expect("outer active");
                inner_tracer
                    .in_span("inner", [], async {
                        let inner = current_context().expect("inner active");
                        assert_eq!(inner.trace_id(), outer.trace_id());
                        assert_ne!(inner.span_id(), outer.span_id());
                        Ok::<_, WorkError>(())
                    })
                    .await?;
                assert_eq!(current_context(), Some(outer));
                Ok::<_, WorkError>(())
            })
            .await
            .unwrap();

        assert!(current_context().is_none());
        let outer = span_named(&exporter, "outer");
        let inner = span_named(&exporter, "inner");
        assert_eq!(inner.parent_span_id, outer.span_context.span_id());
        assert_eq!(inner.span_context.trace_id(), outer.span_context.trace_id());
    }

    #[tokio::test]
    async fn test_context_survives_suspension() {
        let (tracer, _exporter) = in_memory_tracer();

        tracer
            .in_span("sleepy", [], async {
                let before = current_context();
                tokio::time::sleep(Duration::from_millis(5)).await;
                assert_eq!(current_context(), before);
                Ok::<_, WorkError>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_spans_are_isolated() {
        let (tracer, exporter) = in_memory_tracer();
        let mut handles = Vec::new();

        for i in 0..16 {
            let tracer = tracer.clone();
            handles.push(tokio::spawn(async move {
                tracer
                    .in_span(format!("task-{i}"), [], async {
                        let mine = current_context().expect("active");
                        for _ in 0..5 {
                            tokio::task::yield_now().await;
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            assert_eq!(current_context().as_ref(), Some(&mine));
                        }
                        Ok::<_, WorkError>(mine)
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let spans = finished(&exporter);
        assert_eq!(spans.len(), 16);
        assert!(spans.iter().all(|s| s.parent_span_id == SpanId::INVALID));
    }

    #[tokio::test]
    async fn test_dropped_work_still_ends_span_once() {
        let (tracer, exporter) = in_memory_tracer();

        let never = tracer.in_span("abandoned", [], async {
            std::future::pending::<()>().await;
            Ok::<_, WorkError>(())
        });
        let _ = tokio::time::timeout(Duration::from_millis(5), never).await;

        let spans = finished(&exporter);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("span dropped before completion"));
    }

    #[tokio::test]
    async fn test_explicit_error_status_survives_success() {
        let (tracer, exporter) = in_memory_tracer();

        tracer
            .in_span("not-found", [], async {
                set_attribute("error", "item_not_found");
                set_status(Status::error("item_not_found"));
                Ok::<_, WorkError>(())
            })
            .await
            .unwrap();

        let span = span_named(&exporter, "not-found");
        assert_eq!(span.status, Status::error("item_not_found"));
        assert!(span.events.is_empty());
    }

    #[tokio::test]
    async fn test_classified_failure_records_no_exception() {
        let (tracer, exporter) = in_memory_tracer();

        let result = tracer
            .in_span("validate", [], async {
                set_status(Status::error("validation_error"));
                Err::<(), _>(WorkError("name is required"))
            })
            .await;

        assert!(result.is_err());
        let span = span_named(&exporter, "validate");
        assert_eq!(span.status, Status::error("validation_error"));
        assert!(span.events.iter().all(|e| e.name != EXCEPTION_EVENT));
    }

    #[tokio::test]
    async fn test_remote_parent_becomes_parent_span() {
        let (tracer, exporter) = in_memory_tracer();
        let remote = SpanContext::new(
            TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap(),
            SpanId::from_hex("b7ad6b7169203331").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );

        tracer
            .in_span_with_parent(
                Some(remote.clone()),
                SpanKind::Server,
                "GET /health",
                [],
                async { Ok::<_, WorkError>(()) },
            )
            .await
            .unwrap();

        let span = span_named(&exporter, "GET /health");
        assert_eq!(span.span_kind, SpanKind::Server);
        assert_eq!(span.span_context.trace_id(), remote.trace_id());
        assert_eq!(span.parent_span_id, remote.span_id());
    }

    #[tokio::test]
    async fn test_record_exception_marks_active_span() {
        let (tracer, exporter) = in_memory_tracer();

        tracer
            .in_span("panicky", [], async {
                record_exception("panic", "index out of bounds");
                Ok::<_, WorkError>(())
            })
            .await
            .unwrap();

        let span = span_named(&exporter, "panicky");
        assert_eq!(span.status, Status::error("index out of bounds"));
        assert_eq!(
            event_attribute(&span, EXCEPTION_EVENT, "exception.type"),
            Some(Value::from("panic"))
        );
    }

    #[test]
    fn test_helpers_are_noops_outside_span() {
        assert!(current_context().is_none());
        set_attribute("ignored", 1_i64);
        set_status(Status::error("ignored"));
        record_exception("panic", "ignored");
    }
}
