//! Structured logging with trace correlation.
//!
//! Every event passes through [`CorrelatedFormat`], which reads the
//! OpenTelemetry context active at the call site (the one the span factory
//! attaches) and adds its `traceId`/`spanId` to the record. Outside a span
//! those fields are omitted entirely.
//!
//! JSON lines in production, a single human-readable line otherwise. Events
//! below the configured minimum severity are never written; `fatal` is an
//! `error!` carrying `fatal = true`, so a fatal minimum drops plain errors.
//!
//! When a tracer is supplied, `tracing` spans are also exported through
//! `tracing-opentelemetry` as children of the active span.

use std::fmt;
use std::str::FromStr;

use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use opentelemetry_sdk::trace::SdkTracer;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, TelemetryConfig};

/// Field that promotes an error event to `fatal`.
pub const FATAL_FIELD: &str = "fatal";

pub const TRACE_ID_FIELD: &str = "traceId";
pub const SPAN_ID_FIELD: &str = "spanId";

/// Ordered log severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// The `tracing` filter that keeps this severity and above.
    ///
    /// `tracing` has no level above ERROR, so `Fatal` filters like `Error`
    /// here and [`CorrelatedFormat::with_minimum`] drops the plain errors.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Severity::Debug => LevelFilter::DEBUG,
            Severity::Info => LevelFilter::INFO,
            Severity::Warn => LevelFilter::WARN,
            Severity::Error | Severity::Fatal => LevelFilter::ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    fn of_event(level: &Level, fatal: bool) -> Self {
        match *level {
            Level::ERROR if fatal => Severity::Fatal,
            Level::ERROR => Severity::Error,
            Level::WARN => Severity::Warn,
            Level::INFO => Severity::Info,
            _ => Severity::Debug,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level '{0}' (expected debug, info, warn, error or fatal)")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// Output mode of [`CorrelatedFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Json,
    Pretty,
}

/// Event formatter that stamps records with the active trace context.
#[derive(Debug, Clone, Copy)]
pub struct CorrelatedFormat {
    mode: OutputMode,
    minimum: Severity,
}

impl CorrelatedFormat {
    pub fn json() -> Self {
        Self {
            mode: OutputMode::Json,
            minimum: Severity::Debug,
        }
    }

    pub fn pretty() -> Self {
        Self {
            mode: OutputMode::Pretty,
            minimum: Severity::Debug,
        }
    }

    /// Skip events whose severity, `fatal` flag included, is below `minimum`.
    pub fn with_minimum(mut self, minimum: Severity) -> Self {
        self.minimum = minimum;
        self
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }
}

/// Trace and span id of the active OpenTelemetry span, lowercase hex.
fn correlation_ids() -> Option<(String, String)> {
    Context::map_current(|cx| {
        let span = cx.span();
        let context = span.span_context();
        context
            .is_valid()
            .then(|| (context.trace_id().to_string(), context.span_id().to_string()))
    })
}

impl<S, N> FormatEvent<S, N> for CorrelatedFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let meta = event.metadata();
        let severity = Severity::of_event(meta.level(), fields.fatal);
        if severity < self.minimum {
            return Ok(());
        }

        let mut time = String::new();
        SystemTime.format_time(&mut Writer::new(&mut time))?;

        let correlation = correlation_ids();

        match self.mode {
            OutputMode::Json => {
                let mut record = Map::new();
                record.insert("time".into(), Value::String(time));
                record.insert("level".into(), Value::String(severity.as_str().into()));
                record.insert("target".into(), Value::String(meta.target().into()));
                if let Some(message) = fields.message {
                    record.insert("msg".into(), Value::String(message));
                }
                for (key, value) in fields.values {
                    record.insert(key, value);
                }
                if let Some((trace_id, span_id)) = correlation {
                    record.insert(TRACE_ID_FIELD.into(), Value::String(trace_id));
                    record.insert(SPAN_ID_FIELD.into(), Value::String(span_id));
                }
                let line = serde_json::to_string(&record).map_err(|_| fmt::Error)?;
                writeln!(writer, "{line}")
            }
            OutputMode::Pretty => {
                write!(
                    writer,
                    "{time} {:>5} {}: {}",
                    severity.as_str().to_ascii_uppercase(),
                    meta.target(),
                    fields.message.as_deref().unwrap_or_default()
                )?;
                for (key, value) in &fields.values {
                    match value {
                        Value::String(s) => write!(writer, " {key}={s}")?,
                        other => write!(writer, " {key}={other}")?,
                    }
                }
                if let Some((trace_id, span_id)) = correlation {
                    write!(writer, " {TRACE_ID_FIELD}={trace_id} {SPAN_ID_FIELD}={span_id}")?;
                }
                writeln!(writer)
            }
        }
    }
}

/// Collects event fields into JSON values.
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: Vec<(String, Value)>,
    fatal: bool,
}

impl FieldCollector {
    fn push(&mut self, field: &Field, value: Value) {
        self.values.push((field.name().to_string(), value));
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.push(field, Value::String(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == FATAL_FIELD {
            self.fatal = value;
            return;
        }
        self.push(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, Value::String(value.to_string()));
    }
}

/// Pick the output mode for a deployment.
pub fn output_mode(config: &TelemetryConfig) -> OutputMode {
    match config.log_format {
        LogFormat::Json => OutputMode::Json,
        LogFormat::Pretty => OutputMode::Pretty,
        LogFormat::Auto if config.is_production() => OutputMode::Json,
        LogFormat::Auto => OutputMode::Pretty,
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. With `tracer`, spans
/// opened through `tracing` macros are exported alongside the factory's.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_logging(config: &TelemetryConfig, tracer: Option<SdkTracer>) {
    let severity = config
        .log_level
        .parse::<Severity>()
        .unwrap_or(Severity::Info);

    let (filter, minimum) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, Severity::Debug),
        Err(_) => (
            EnvFilter::default().add_directive(severity.level_filter().into()),
            severity,
        ),
    };

    let format = match output_mode(config) {
        OutputMode::Json => CorrelatedFormat::json(),
        OutputMode::Pretty => CorrelatedFormat::pretty(),
    }
    .with_minimum(minimum);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().event_format(format))
        .with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)))
        .init();

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        level = severity.as_str(),
        "Logging initialized"
    );
}
