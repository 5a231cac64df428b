//! Streaming traceroute server.
//!
//! Runs traces through a [`geotrace_core::ProbeEngine`], enriches each hop
//! with [`geotrace_geo::GeoResolver`], and writes the result to a
//! [`HopSink`]. The HTTP surface is:
//!
//! - `GET /trace`: server-sent events, one `hop` frame per answered hop,
//!   then `done` or `error`
//! - `GET /trace.json`: the same records as one JSON array
//! - `GET /health`

pub mod handlers;
pub mod orchestrator;
pub mod stream;

pub use handlers::{AppState, TraceDefaults};
pub use orchestrator::{TraceOrchestrator, TraceOutcome};
pub use stream::{CollectSink, HopSink, SseSink, StreamError};

use axum::{routing::get, Router};
use std::path::Path;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";

/// Default trace target when a request names none.
pub const DEFAULT_TARGET: &str = "204.8.234.161";

/// Builds the application router. Unknown paths are served from
/// `static_dir` when given.
pub fn create_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/trace", get(handlers::trace_stream))
        .route("/trace.json", get(handlers::trace_json))
        .route("/health", get(handlers::health));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
