//! W3C trace context
//!
//! Every inbound request gets a [`TraceContext`]: the caller's trace id when a
//! valid `traceparent` header is present, a fresh one otherwise. The span id is
//! always new for this hop. Malformed headers are ignored, never rejected.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use rand::RngCore;
use tracing::Instrument;

use crate::error::ErrorDetail;

pub const TRACEPARENT: &str = "traceparent";
pub const TRACESTATE: &str = "tracestate";

const VERSION: &str = "00";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub sampled: bool,
    pub tracestate: String,
}

/// Fields of a well-formed `traceparent` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTraceparent {
    pub trace_id: String,
    pub span_id: String,
    pub sampled: bool,
}

fn random_hex<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_hex_of_len(field: &str, len: usize) -> bool {
    field.len() == len && field.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parse `version-traceid-spanid-flags` with exact 2/32/16/2 hex fields
pub fn parse_traceparent(value: &str) -> Option<ParsedTraceparent> {
    let mut fields = value.trim().split('-');
    let version = fields.next()?;
    let trace_id = fields.next()?;
    let span_id = fields.next()?;
    let flags = fields.next()?;
    if fields.next().is_some() {
        return None;
    }

    if !is_hex_of_len(version, 2)
        || !is_hex_of_len(trace_id, 32)
        || !is_hex_of_len(span_id, 16)
        || !is_hex_of_len(flags, 2)
    {
        return None;
    }

    let flags = u8::from_str_radix(flags, 16).ok()?;
    Some(ParsedTraceparent {
        trace_id: trace_id.to_ascii_lowercase(),
        span_id: span_id.to_ascii_lowercase(),
        sampled: flags & 0x01 == 0x01,
    })
}

impl TraceContext {
    /// Start a new trace with no parent
    pub fn new_root() -> Self {
        Self {
            trace_id: random_hex::<16>(),
            span_id: random_hex::<8>(),
            parent_span_id: None,
            sampled: true,
            tracestate: String::new(),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let tracestate = headers
            .get(TRACESTATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let parsed = headers
            .get(TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_traceparent);

        match parsed {
            Some(parent) => Self {
                trace_id: parent.trace_id,
                span_id: random_hex::<8>(),
                parent_span_id: Some(parent.span_id),
                sampled: parent.sampled,
                tracestate,
            },
            None => Self {
                tracestate,
                ..Self::new_root()
            },
        }
    }

    /// A new span in the same trace, parented on this one
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: random_hex::<8>(),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
            tracestate: self.tracestate.clone(),
        }
    }

    pub fn traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("{}-{}-{}-{}", VERSION, self.trace_id, self.span_id, flags)
    }

    /// Write `traceparent` (and a non-empty `tracestate`) into `headers`
    pub fn inject(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.traceparent()) {
            headers.insert(TRACEPARENT, value);
        }
        if !self.tracestate.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.tracestate) {
                headers.insert(TRACESTATE, value);
            }
        }
    }
}

/// Middleware: attach a [`TraceContext`] to the request, run the handler inside
/// a span carrying the trace id, echo the trace headers and stamp `trace_id`
/// into structured error bodies.
pub async fn trace_context(mut request: Request, next: Next) -> Response {
    let ctx = TraceContext::from_headers(request.headers());
    request.extensions_mut().insert(ctx.clone());

    let span = tracing::info_span!(
        "trace",
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
    );
    let mut response = next.run(request).instrument(span).await;

    if let Some(detail) = response.extensions().get::<ErrorDetail>().cloned() {
        if let Ok(body) = serde_json::to_vec(&detail.body(Some(&ctx.trace_id))) {
            response.headers_mut().remove(header::CONTENT_LENGTH);
            *response.body_mut() = Body::from(body);
        }
    }

    ctx.inject(response.headers_mut());
    response
}
