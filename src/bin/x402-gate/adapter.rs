//! axum adapter: maps HTTP requests onto the payment gate.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use x402_gate::{GateDecision, GateRequest, GateResponse, PaymentGate};

/// Largest request body buffered for the gate.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Router serving `protected_path` behind the gate and an open `/health`.
pub fn router(gate: Arc<PaymentGate>, protected_path: &str) -> Router {
    Router::new()
        .route(
            protected_path,
            get(protected).layer(from_fn_with_state(gate, paywall)),
        )
        .route("/health", get(health))
}

async fn paywall(State(gate): State<Arc<PaymentGate>>, req: Request, next: Next) -> Response {
    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let gate_request = GateRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
        body: body.clone(),
    };

    match gate.process(&gate_request).await {
        GateDecision::Proceed { signature, .. } => {
            let req = Request::from_parts(parts, Body::from(body));
            let mut response = next.run(req).await;
            let (name, value) = gate.success_header(&signature);
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().insert(name, value);
            }
            response
        }
        GateDecision::PaymentRequired(response) => to_http_response(response),
    }
}

fn to_http_response(gate_response: GateResponse) -> Response {
    let status = StatusCode::from_u16(gate_response.status).unwrap_or(StatusCode::PAYMENT_REQUIRED);
    let mut response = (status, Json(gate_response.body)).into_response();
    for (name, value) in gate_response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

async fn protected() -> Json<serde_json::Value> {
    Json(json!({ "content": "paid content", "paid": true }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
