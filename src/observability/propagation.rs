//! W3C Trace Context propagation.
//!
//! `traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`
//!
//! Four dash-separated fields: version, trace id, parent span id, flags.
//! Parsing and rendering belong to OpenTelemetry's [`TraceContextPropagator`];
//! this module adapts it to `http` header maps. Extraction never fails
//! loudly: anything absent or malformed yields `None` and the receiver starts
//! a new root trace.

use axum::http::{HeaderMap, HeaderValue};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::Context;
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_sdk::propagation::TraceContextPropagator;

pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Write `context` into outgoing headers, replacing any existing value.
/// Invalid contexts write nothing.
pub fn inject(headers: &mut HeaderMap, context: &SpanContext) {
    let cx = Context::new().with_remote_span_context(context.clone());
    TraceContextPropagator::new().inject_context(&cx, &mut HeaderInjector(headers));
}

/// Inject the context of the span active at the call site, if any.
pub fn inject_current(headers: &mut HeaderMap) {
    let cx = Context::current();
    TraceContextPropagator::new().inject_context(&cx, &mut HeaderInjector(headers));
}

/// Read the remote parent context from incoming headers.
pub fn extract(headers: &HeaderMap) -> Option<SpanContext> {
    let cx = TraceContextPropagator::new()
        .extract_with_context(&Context::new(), &HeaderExtractor(headers));
    let span_context = cx.span().span_context().clone();
    span_context.is_valid().then_some(span_context)
}

/// Render a context as a `traceparent` header value.
pub fn to_traceparent(context: &SpanContext) -> Option<String> {
    let mut headers = HeaderMap::new();
    inject(&mut headers, context);
    headers
        .get(TRACEPARENT_HEADER)?
        .to_str()
        .ok()
        .map(str::to_string)
}

/// Parse a `traceparent` header value.
pub fn parse_traceparent(value: &str) -> Option<SpanContext> {
    let mut headers = HeaderMap::new();
    headers.insert(TRACEPARENT_HEADER, HeaderValue::from_str(value).ok()?);
    extract(&headers)
}

/// Attach the active trace context to an outgoing `reqwest` call.
pub trait RequestBuilderExt {
    fn with_trace_context(self) -> Self;
}

impl RequestBuilderExt for reqwest::RequestBuilder {
    fn with_trace_context(self) -> Self {
        let mut headers = HeaderMap::new();
        inject_current(&mut headers);
        self.headers(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn context(flags: TraceFlags) -> SpanContext {
        SpanContext::new(
            TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap(),
            SpanId::from_hex("b7ad6b7169203331").unwrap(),
            flags,
            false,
            TraceState::default(),
        )
    }

    #[test]
    fn test_inject_then_extract_round_trips() {
        let sent = context(TraceFlags::SAMPLED);
        let mut headers = HeaderMap::new();
        inject(&mut headers, &sent);

        let extracted = extract(&headers).expect("valid header");
        assert_eq!(extracted.trace_id(), sent.trace_id());
        assert_eq!(extracted.span_id(), sent.span_id());
        assert_eq!(extracted.trace_flags(), sent.trace_flags());
        assert!(extracted.is_remote());
    }

    #[test]
    fn test_header_format() {
        assert_eq!(
            to_traceparent(&context(TraceFlags::SAMPLED)).as_deref(),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
        );
        assert_eq!(
            to_traceparent(&context(TraceFlags::NOT_SAMPLED)).as_deref(),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-00")
        );
    }

    #[test]
    fn test_absent_header_is_none() {
        assert!(extract(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_malformed_headers_are_none() {
        let cases = [
            "",
            "garbage",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra",
            "ff-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            "00-0AF7651916CD43DD8448EB211C80319C-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b71692033zz-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-09",
            "zz-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        ];
        for case in cases {
            assert!(extract(&headers_with(case)).is_none(), "accepted {case:?}");
        }
    }

    #[test]
    fn test_future_version_with_extra_fields_is_accepted() {
        let parsed =
            parse_traceparent("01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-what")
                .expect("future version");
        assert_eq!(parsed.span_id(), SpanId::from_hex("b7ad6b7169203331").unwrap());
    }

    #[test]
    fn test_unknown_flags_keep_only_sampled_bit() {
        let parsed =
            parse_traceparent("01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-ff")
                .expect("future version flags");
        assert_eq!(parsed.trace_flags(), TraceFlags::SAMPLED);
    }

    #[test]
    fn test_non_utf8_header_is_none() {
        let mut headers = HeaderMap::new();
        headers.insert(
            TRACEPARENT_HEADER,
            HeaderValue::from_bytes(&[0xfa, 0xfb]).unwrap(),
        );
        assert!(extract(&headers).is_none());
    }

    #[test]
    fn test_inject_skips_invalid_context() {
        let mut headers = HeaderMap::new();
        inject(&mut headers, &SpanContext::empty_context());
        assert!(headers.is_empty());
        assert!(to_traceparent(&SpanContext::empty_context()).is_none());
    }

    #[test]
    fn test_inject_current_outside_span_adds_nothing() {
        let mut headers = HeaderMap::new();
        inject_current(&mut headers);
        assert!(headers.get(TRACEPARENT_HEADER).is_none());
    }
}
