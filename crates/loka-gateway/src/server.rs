// crates/loka-gateway/src/server.rs

//! The HTTP surface
//!
//! An axum application exposing the OpenAI-compatible endpoints, bound to
//! loopback by default. CORS admits only loopback origins (requests with no
//! Origin header are unaffected). When a shared API key is configured, all
//! endpoints except the root banner and `/v1/health` require it.

use crate::api::{
    chunk_payloads, completion_body, completion_id, ChatCompletionRequest, RouteRequest,
};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use futures::StreamExt;
use log::{error, info};
use loka_core::error::LokaError;
use loka_core::types::{CompletionOptions, RoutingTier};
use loka_router::Router as LokaRouter;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<LokaRouter>,
    pub api_key: Option<String>,
    pub started: Instant,
}

/// Everything the gateway surfaces goes through the OpenAI error envelope
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self.0.downcast_ref::<LokaError>() {
            Some(e) => (e.status(), e.error_type(), e.code(), e.to_string()),
            None => {
                error!("unhandled error: {:#}", self.0);
                (500, "server_error", "internal_error", self.0.to_string())
            }
        };
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(error_envelope(error_type, code, &message))).into_response()
    }
}

fn error_envelope(error_type: &str, code: &str, message: &str) -> serde_json::Value {
    json!({"error": {"type": error_type, "code": code, "message": message}})
}

pub fn app(state: AppState) -> axum::Router {
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::predicate(|origin, _| {
            origin.to_str().map(is_loopback_origin).unwrap_or(false)
        }))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    axum::Router::new()
        .route("/", get(root))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/route", post(route_explain))
        .route("/v1/models", get(list_models))
        .route("/v1/cost", get(cost_summary))
        .route("/v1/health", get(health))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until ctrl-c; a failed bind is fatal
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LokaError::Config(format!("could not bind {}: {}", addr, e)))?;
    info!("loka gateway listening on http://{}", addr);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

pub(crate) fn is_loopback_origin(origin: &str) -> bool {
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };
    if let Some(after) = rest.strip_prefix("[::1]") {
        return after.is_empty() || after.starts_with(':') || after.starts_with('/');
    }
    let host = rest.split([':', '/']).next().unwrap_or("");
    host == "localhost" || host.starts_with("127.")
}

pub(crate) fn authorized(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return token == expected;
        }
    }
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return value == expected;
    }
    false
}

async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if path == "/" || path == "/v1/health" {
        return next.run(request).await;
    }
    if authorized(request.headers(), &state.api_key) {
        return next.run(request).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        Json(error_envelope(
            "authentication_error",
            "invalid_api_key",
            "missing or invalid API key",
        )),
    )
        .into_response()
}

async fn root() -> String {
    format!("loka gateway v{}", env!("CARGO_PKG_VERSION"))
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let options = CompletionOptions {
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        timeout_secs: 60,
    };
    let id = completion_id();

    if request.stream {
        let decision = state.router.route_stream(&request.messages, &options).await?;
        let payloads = chunk_payloads(id, decision.model, decision.stream);
        let events = payloads.map(|p| Ok::<Event, Infallible>(Event::default().data(p)));
        return Ok(Sse::new(events).into_response());
    }

    let decision = state.router.route(&request.messages, &options).await?;
    Ok(Json(completion_body(&id, &decision.response, "stop")).into_response())
}

async fn route_explain(
    State(state): State<AppState>,
    Json(request): Json<RouteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let explanation = state.router.route_explain(&request.messages).await?;
    Ok(Json(serde_json::to_value(&explanation)?))
}

async fn list_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pool = state.router.pool();
    let created = chrono::Utc::now().timestamp();
    let mut data = Vec::new();
    for provider in pool.locals() {
        data.push(model_entry(provider.as_ref(), RoutingTier::Local, created));
    }
    if let Some(specialist) = pool.specialist() {
        data.push(model_entry(specialist.as_ref(), RoutingTier::Specialist, created));
    }
    if !pool.cloud_is_zero_cost() {
        data.push(model_entry(pool.cloud().as_ref(), RoutingTier::Cloud, created));
    }
    Json(json!({"object": "list", "data": data}))
}

fn model_entry(
    provider: &dyn loka_engines::Provider,
    tier: RoutingTier,
    created: i64,
) -> serde_json::Value {
    json!({
        "id": provider.model(),
        "object": "model",
        "created": created,
        "owned_by": provider.name(),
        "loka_tier": tier,
        "loka_cost_per_1k_input_eur": provider.cost_per_1k_input_eur(),
    })
}

async fn cost_summary(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let summary = state.router.budget().summary().await?;
    let limits = state.router.budget().limits();
    let local_percent = if summary.query_count > 0 {
        summary.local_query_count as f64 / summary.query_count as f64 * 100.0
    } else {
        0.0
    };
    let budget_used_percent = if limits.daily_eur > 0.0 {
        summary.today_eur / limits.daily_eur * 100.0
    } else {
        0.0
    };
    Ok(Json(json!({
        "today_eur": summary.today_eur,
        "month_eur": summary.month_eur,
        "lifetime_eur": summary.lifetime_eur,
        "query_count": summary.query_count,
        "local_percent": local_percent,
        "budget_used_percent": budget_used_percent,
    })))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers = state.router.pool().all();
    let checks = providers.iter().map(|p| p.health_check());
    let results = futures::future::join_all(checks).await;

    let mut statuses = serde_json::Map::new();
    let mut any_ok = false;
    let mut all_ok = true;
    for (provider, healthy) in providers.iter().zip(results) {
        any_ok |= healthy;
        all_ok &= healthy;
        statuses.insert(
            provider.name().to_string(),
            json!(if healthy { "ok" } else { "unavailable" }),
        );
    }
    let overall = if all_ok && any_ok { "ok" } else { "degraded" };

    Json(json!({
        "status": overall,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started.elapsed().as_secs(),
        "providers": statuses,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_loopback_origin_predicate() {
        assert!(is_loopback_origin("http://localhost:3000"));
        assert!(is_loopback_origin("http://127.0.0.1:8080"));
        assert!(is_loopback_origin("https://[::1]:8443"));
        assert!(!is_loopback_origin("https://evil.example.com"));
        assert!(!is_loopback_origin("http://localhost.evil.example"));
    }

    #[test]
    fn test_authorized_without_configured_key() {
        let headers = HeaderMap::new();
        assert!(authorized(&headers, &None));
    }

    #[test]
    fn test_authorized_bearer_and_header_variants() {
        let key = Some("secret".to_string());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(authorized(&headers, &key));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("secret"));
        assert!(authorized(&headers, &key));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        assert!(!authorized(&headers, &key));

        assert!(!authorized(&HeaderMap::new(), &key));
    }

    #[test]
    fn test_error_envelope_shape() {
        let envelope = error_envelope("authentication_error", "invalid_api_key", "nope");
        assert_eq!(envelope["error"]["type"], "authentication_error");
        assert_eq!(envelope["error"]["code"], "invalid_api_key");
        assert_eq!(envelope["error"]["message"], "nope");
    }
}
