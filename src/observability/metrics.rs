//! Metrics collection and export.
//!
//! # Metrics
//! - `http_requests_attempted_total` (counter): requests entering the service, by method and path
//! - `http_requests_total` (counter): completed requests by method, path and status
//! - `http_request_duration_seconds` (histogram): handler latency by method, path and status
//!
//! # Data Flow
//! ```text
//! metrics::counter!/histogram!
//!     → FanoutRecorder
//!         → OtelRecorder → OpenTelemetry instruments (delta aggregation)
//!         → PrometheusRecorder → GET /metrics
//!
//! every interval:
//!     PeriodicReader collects what changed since the last collection
//!     → OTLP/HTTP protobuf POST to the metrics endpoint
//!     → failure: logged by the SDK, batch dropped, no retry
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::metrics::Meter;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, Protocol, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider, Temporality};
use opentelemetry_sdk::Resource;

pub const REQUESTS_ATTEMPTED_TOTAL: &str = "http_requests_attempted_total";
pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Record a request entering the service.
pub fn record_attempt(method: &str, path: &str) {
    metrics::counter!(
        REQUESTS_ATTEMPTED_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .increment(1);
}

/// Record a completed request with its status and latency.
pub fn record_request(method: &str, path: &str, status: u16, start_time: Instant) {
    let elapsed = start_time.elapsed().as_secs_f64();
    let status = status.to_string();
    metrics::counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status
    )
    .record(elapsed);
}

/// Bucket bounds for latency histograms, in seconds.
pub const LATENCY_BOUNDARIES: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Meter provider pushing delta-temporality OTLP/HTTP protobuf batches to
/// `endpoint` every `interval`.
pub fn build_meter_provider(
    endpoint: &str,
    interval: Duration,
    timeout: Duration,
    resource: Resource,
) -> Result<SdkMeterProvider, ExporterBuildError> {
    let exporter = MetricExporter::builder()
        .with_http()
        .with_temporality(Temporality::Delta)
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .with_timeout(timeout)
        .build()?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build())
}

/// OpenTelemetry unit for a `metrics` unit, UCUM where they differ.
fn otel_unit(unit: Unit) -> &'static str {
    match unit {
        Unit::Count => "1",
        Unit::Seconds => "s",
        Unit::Bytes => "By",
        other => other.as_str(),
    }
}

fn is_latency(name: &str, unit: Option<Unit>) -> bool {
    unit == Some(Unit::Seconds) || name.ends_with("_seconds")
}

#[derive(Debug, Clone)]
struct Description {
    unit: Option<Unit>,
    text: SharedString,
}

fn attributes(key: &Key) -> Vec<KeyValue> {
    key.labels()
        .map(|label| KeyValue::new(label.key().to_string(), label.value().to_string()))
        .collect()
}

struct OtelCounter {
    counter: opentelemetry::metrics::Counter<u64>,
    attributes: Vec<KeyValue>,
    /// Highest absolute value seen, so `absolute` can be turned into a delta.
    high_water: AtomicU64,
}

impl CounterFn for OtelCounter {
    fn increment(&self, value: u64) {
        self.counter.add(value, &self.attributes);
    }

    fn absolute(&self, value: u64) {
        let previous = self.high_water.fetch_max(value, Ordering::AcqRel);
        if value > previous {
            self.counter.add(value - previous, &self.attributes);
        }
    }
}

/// OpenTelemetry gauges only take absolute values, so the series keeps its
/// own running value for `increment` and `decrement`.
struct OtelGauge {
    gauge: opentelemetry::metrics::Gauge<f64>,
    attributes: Vec<KeyValue>,
    bits: AtomicU64,
}

impl OtelGauge {
    fn apply(&self, f: impl Fn(f64) -> f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        let updated = loop {
            let next = f(f64::from_bits(current));
            match self.bits.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break next,
                Err(actual) => current = actual,
            }
        };
        self.gauge.record(updated, &self.attributes);
    }
}

impl GaugeFn for OtelGauge {
    fn increment(&self, value: f64) {
        self.apply(|v| v + value);
    }

    fn decrement(&self, value: f64) {
        self.apply(|v| v - value);
    }

    fn set(&self, value: f64) {
        self.apply(|_| value);
    }
}

struct OtelHistogram {
    histogram: opentelemetry::metrics::Histogram<f64>,
    attributes: Vec<KeyValue>,
}

impl HistogramFn for OtelHistogram {
    fn record(&self, value: f64) {
        self.histogram.record(value, &self.attributes);
    }
}

fn cached<K, V>(map: &Mutex<HashMap<K, V>>, key: &K, create: impl FnOnce() -> V) -> V
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    let mut map = map.lock().unwrap_or_else(|p| p.into_inner());
    map.entry(key.clone()).or_insert_with(create).clone()
}

/// `metrics` recorder backed by OpenTelemetry instruments from one meter.
///
/// Instruments are created once per metric name and series once per key,
/// so gauges and absolute counters keep their state across registrations.
pub struct OtelRecorder {
    meter: Meter,
    descriptions: Mutex<HashMap<String, Description>>,
    counters: Mutex<HashMap<String, opentelemetry::metrics::Counter<u64>>>,
    gauges: Mutex<HashMap<String, opentelemetry::metrics::Gauge<f64>>>,
    histograms: Mutex<HashMap<String, opentelemetry::metrics::Histogram<f64>>>,
    counter_series: Mutex<HashMap<Key, Arc<OtelCounter>>>,
    gauge_series: Mutex<HashMap<Key, Arc<OtelGauge>>>,
    histogram_series: Mutex<HashMap<Key, Arc<OtelHistogram>>>,
}

impl OtelRecorder {
    pub fn new(meter: Meter) -> Self {
        Self {
            meter,
            descriptions: Mutex::default(),
            counters: Mutex::default(),
            gauges: Mutex::default(),
            histograms: Mutex::default(),
            counter_series: Mutex::default(),
            gauge_series: Mutex::default(),
            histogram_series: Mutex::default(),
        }
    }

    fn describe(&self, key: KeyName, unit: Option<Unit>, text: SharedString) {
        self.descriptions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.as_str().to_string(), Description { unit, text });
    }

    fn description(&self, name: &str) -> Option<Description> {
        self.descriptions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    fn counter(&self, name: &str) -> opentelemetry::metrics::Counter<u64> {
        cached(&self.counters, &name.to_string(), || {
            let mut builder = self.meter.u64_counter(name.to_string());
            if let Some(description) = self.description(name) {
                builder = builder.with_description(description.text.to_string());
                if let Some(unit) = description.unit {
                    builder = builder.with_unit(otel_unit(unit));
                }
            }
            builder.build()
        })
    }

    fn gauge(&self, name: &str) -> opentelemetry::metrics::Gauge<f64> {
        cached(&self.gauges, &name.to_string(), || {
            let mut builder = self.meter.f64_gauge(name.to_string());
            if let Some(description) = self.description(name) {
                builder = builder.with_description(description.text.to_string());
                if let Some(unit) = description.unit {
                    builder = builder.with_unit(otel_unit(unit));
                }
            }
            builder.build()
        })
    }

    fn histogram(&self, name: &str) -> opentelemetry::metrics::Histogram<f64> {
        cached(&self.histograms, &name.to_string(), || {
            let description = self.description(name);
            let unit = description.as_ref().and_then(|d| d.unit);
            let mut builder = self.meter.f64_histogram(name.to_string());
            if let Some(description) = description {
                builder = builder.with_description(description.text.to_string());
            }
            if let Some(unit) = unit {
                builder = builder.with_unit(otel_unit(unit));
            }
            if is_latency(name, unit) {
                builder = builder.with_boundaries(LATENCY_BOUNDARIES.to_vec());
            }
            builder.build()
        })
    }
}

impl Recorder for OtelRecorder {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.describe(key, unit, description);
    }

    fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.describe(key, unit, description);
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.describe(key, unit, description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(cached(&self.counter_series, key, || {
            Arc::new(OtelCounter {
                counter: self.counter(key.name()),
                attributes: attributes(key),
                high_water: AtomicU64::new(0),
            })
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(cached(&self.gauge_series, key, || {
            Arc::new(OtelGauge {
                gauge: self.gauge(key.name()),
                attributes: attributes(key),
                bits: AtomicU64::new(0f64.to_bits()),
            })
        }))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(cached(&self.histogram_series, key, || {
            Arc::new(OtelHistogram {
                histogram: self.histogram(key.name()),
                attributes: attributes(key),
            })
        }))
    }
}

/// Forwards every registration to several recorders.
pub struct FanoutRecorder {
    recorders: Vec<Box<dyn Recorder + Send + Sync>>,
}

impl FanoutRecorder {
    pub fn new() -> Self {
        Self {
            recorders: Vec::new(),
        }
    }

    pub fn with(mut self, recorder: impl Recorder + Send + Sync + 'static) -> Self {
        self.recorders.push(Box::new(recorder));
        self
    }
}

impl Default for FanoutRecorder {
    fn default() -> Self {
        Self::new()
    }
}

struct FanoutCounter(Vec<Counter>);

impl CounterFn for FanoutCounter {
    fn increment(&self, value: u64) {
        self.0.iter().for_each(|c| c.increment(value));
    }

    fn absolute(&self, value: u64) {
        self.0.iter().for_each(|c| c.absolute(value));
    }
}

struct FanoutGauge(Vec<Gauge>);

impl GaugeFn for FanoutGauge {
    fn increment(&self, value: f64) {
        self.0.iter().for_each(|g| g.increment(value));
    }

    fn decrement(&self, value: f64) {
        self.0.iter().for_each(|g| g.decrement(value));
    }

    fn set(&self, value: f64) {
        self.0.iter().for_each(|g| g.set(value));
    }
}

struct FanoutHistogram(Vec<Histogram>);

impl HistogramFn for FanoutHistogram {
    fn record(&self, value: f64) {
        self.0.iter().for_each(|h| h.record(value));
    }
}

impl Recorder for FanoutRecorder {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        for recorder in &self.recorders {
            recorder.describe_counter(key.clone(), unit, description.clone());
        }
    }

    fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        for recorder in &self.recorders {
            recorder.describe_gauge(key.clone(), unit, description.clone());
        }
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        for recorder in &self.recorders {
            recorder.describe_histogram(key.clone(), unit, description.clone());
        }
    }

    fn register_counter(&self, key: &Key, metadata: &Metadata<'_>) -> Counter {
        let counters = self
            .recorders
            .iter()
            .map(|r| r.register_counter(key, metadata))
            .collect();
        Counter::from_arc(Arc::new(FanoutCounter(counters)))
    }

    fn register_gauge(&self, key: &Key, metadata: &Metadata<'_>) -> Gauge {
        let gauges = self
            .recorders
            .iter()
            .map(|r| r.register_gauge(key, metadata))
            .collect();
        Gauge::from_arc(Arc::new(FanoutGauge(gauges)))
    }

    fn register_histogram(&self, key: &Key, metadata: &Metadata<'_>) -> Histogram {
        let histograms = self
            .recorders
            .iter()
            .map(|r| r.register_histogram(key, metadata))
            .collect();
        Histogram::from_arc(Arc::new(FanoutHistogram(histograms)))
    }
}

/// Install the process-wide recorder: samples go to OpenTelemetry
/// instruments from `meter` when given, and to a Prometheus recorder when
/// `prometheus` is set.
///
/// Returns the Prometheus handle used to render `/metrics`. A second call
/// leaves the first recorder in place and logs a warning.
pub fn install_recorder(
    meter: Option<Meter>,
    service_name: &str,
    prometheus: bool,
) -> Option<PrometheusHandle> {
    let mut fanout = FanoutRecorder::new();
    if let Some(meter) = meter {
        fanout = fanout.with(OtelRecorder::new(meter));
    }
    let mut handle = None;
    if prometheus {
        let recorder = PrometheusBuilder::new()
            .add_global_label("app", service_name)
            .build_recorder();
        handle = Some(recorder.handle());
        fanout = fanout.with(recorder);
    }

    if metrics::set_global_recorder(fanout).is_err() {
        tracing::warn!("A metrics recorder is already installed, keeping it");
        return None;
    }
    describe_metrics();
    handle
}

fn describe_metrics() {
    metrics::describe_counter!(
        REQUESTS_ATTEMPTED_TOTAL,
        Unit::Count,
        "Requests received, before handling"
    );
    metrics::describe_counter!(REQUESTS_TOTAL, Unit::Count, "Requests completed, by status code");
    metrics::describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Time spent handling a request"
    );
}
