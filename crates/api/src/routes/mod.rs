//! API routes

pub mod direct;
pub mod health;
pub mod sse;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::require_api_key,
    state::AppState,
    trace::{trace_context, TRACEPARENT, TRACESTATE},
};

/// Whether `origin` matches an allowed entry. Entries may use a leading
/// `*.` to allow every subdomain of a host, e.g. `https://*.makethe.app`.
pub fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|entry| {
        if entry == "*" || entry == origin {
            return true;
        }
        match (entry.split_once("://*."), origin.split_once("://")) {
            (Some((scheme, suffix)), Some((origin_scheme, host))) => {
                scheme == origin_scheme
                    && host.len() > suffix.len()
                    && host.ends_with(suffix)
                    && host[..host.len() - suffix.len()].ends_with('.')
            }
            _ => false,
        }
    })
}

fn cors_layer(allowed: Vec<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|origin| origin_allowed(origin, &allowed))
                .unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(TRACEPARENT),
            HeaderName::from_static(TRACESTATE),
        ])
        .expose_headers([HeaderName::from_static(TRACEPARENT), HeaderName::from_static(TRACESTATE)])
        .allow_credentials(true)
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness));

    // MCP relay and direct calls (API key auth)
    let mcp_routes = Router::new()
        .route("/sse", get(sse::open_stream))
        .route("/message", post(sse::post_message))
        .route("/mcp/:server/sse", get(sse::open_server_stream))
        .route("/mcp/:server/message", post(sse::post_server_message))
        .route("/v1/mcp/:tool", post(direct::call_tool))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(DefaultBodyLimit::max(state.config.mcp_max_request_body_bytes));

    Router::new()
        .merge(health_routes)
        .merge(mcp_routes)
        .layer(middleware::from_fn(trace_context))
        .layer(cors_layer(state.config.cors_allowed_origins.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
