//! HTTP handlers.

use crate::orchestrator::{TraceOrchestrator, TraceOutcome};
use crate::stream::{sse_channel, CollectSink};
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use geotrace_core::TraceRequest;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Values used when a request leaves a parameter out.
#[derive(Debug, Clone)]
pub struct TraceDefaults {
    pub target: String,
    pub max_rtt_secs: u64,
    pub max_ttl: u8,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TraceOrchestrator>,
    pub defaults: Arc<TraceDefaults>,
}

/// `GET /trace`: hops as server-sent events.
pub async fn trace_stream(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let request = match parse_trace_request(&query, &state.defaults) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };

    let (mut sink, sse) = sse_channel();
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        orchestrator.run(request, &mut sink).await;
    });

    let mut response = sse.into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

/// `GET /trace.json`: the whole trace as one JSON array.
pub async fn trace_json(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let request = match parse_trace_request(&query, &state.defaults) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };

    let mut sink = CollectSink::default();
    match state.orchestrator.run(request, &mut sink).await {
        TraceOutcome::Completed(_) => Json(sink.records).into_response(),
        TraceOutcome::Failed(message) => error_response(StatusCode::BAD_GATEWAY, message),
        TraceOutcome::Cancelled => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Trace cancelled".to_string(),
        ),
    }
}

/// `GET /health`.
pub async fn health() -> &'static str {
    "ok"
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn parse_trace_request(
    query: &HashMap<String, String>,
    defaults: &TraceDefaults,
) -> Result<TraceRequest, String> {
    let target = query
        .get("target")
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| defaults.target.clone());

    let max_rtt = get_u64(query, "max_rtt", defaults.max_rtt_secs)?;
    if max_rtt == 0 {
        return Err("max_rtt must be at least 1 second".to_string());
    }
    let max_ttl = get_u8(query, "max_ttl", defaults.max_ttl)?;
    if max_ttl == 0 {
        return Err("max_ttl must be between 1 and 255".to_string());
    }

    Ok(TraceRequest::new(
        target,
        Duration::from_secs(max_rtt),
        max_ttl,
    ))
}

fn get_u8(query: &HashMap<String, String>, key: &str, default: u8) -> Result<u8, String> {
    match query.get(key).map(|value| value.trim()) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| format!("invalid {}: {:?}", key, value)),
    }
}

fn get_u64(query: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, String> {
    match query.get(key).map(|value| value.trim()) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| format!("invalid {}: {:?}", key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> TraceDefaults {
        TraceDefaults {
            target: "204.8.234.161".to_string(),
            max_rtt_secs: 5,
            max_ttl: 30,
        }
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_missing_parameters_use_defaults() {
        let request = parse_trace_request(&query(&[]), &defaults()).unwrap();
        assert_eq!(request.target, "204.8.234.161");
        assert_eq!(request.probe_timeout, Duration::from_secs(5));
        assert_eq!(request.max_ttl, 30);

        let request = parse_trace_request(&query(&[("target", "  ")]), &defaults()).unwrap();
        assert_eq!(request.target, "204.8.234.161");
    }

    #[test]
    fn test_parameters_override_defaults() {
        let request = parse_trace_request(
            &query(&[("target", "example.com"), ("max_rtt", "2"), ("max_ttl", "12")]),
            &defaults(),
        )
        .unwrap();
        assert_eq!(request.target, "example.com");
        assert_eq!(request.probe_timeout, Duration::from_secs(2));
        assert_eq!(request.max_ttl, 12);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        for pairs in [
            [("max_ttl", "0")],
            [("max_ttl", "256")],
            [("max_ttl", "ten")],
            [("max_rtt", "-1")],
            [("max_rtt", "0")],
        ] {
            assert!(
                parse_trace_request(&query(&pairs), &defaults()).is_err(),
                "{:?} should be rejected",
                pairs
            );
        }
    }
}
