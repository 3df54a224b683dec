//! HTTP surface of the relay.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use orion_backend::CompletionUpstream;
use orion_protocol::ChatRequest;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::RelayError;
use crate::limiter::{Caller, RateLimiter};
use crate::stream::relay_deltas;

/// Shared state for relay handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: Arc<dyn CompletionUpstream>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, upstream: Arc<dyn CompletionUpstream>) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.limits.clone()));
        Self {
            config: Arc::new(config),
            upstream,
            limiter,
        }
    }
}

/// Create the relay router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-client-info"),
            header::HeaderName::from_static("apikey"),
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Stream an assistant reply for the posted conversation.
async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, RelayError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "rejecting malformed chat request");
        RelayError::InvalidRequest(rejection.body_text())
    })?;
    validate(&request, state.config.relay.max_messages)?;

    if state.config.limits.enabled {
        let caller = Caller::from_headers(&headers);
        if let Err(limited) = state.limiter.check(&caller) {
            warn!(caller = %caller.key, retry_after = ?limited.retry_after, "rate limit exceeded");
            return Err(RelayError::RateLimited {
                retry_after: limited.retry_after_secs(),
            });
        }
    }

    let completion = state
        .config
        .completion_request(request.agent_id.as_deref(), request.messages);
    info!(
        upstream = state.upstream.name(),
        model = %completion.model,
        messages = completion.messages.len(),
        agent = request.agent_id.as_deref().unwrap_or("default"),
        "relaying chat request"
    );

    let body = state.upstream.open(&completion).await?;
    let deltas = relay_deltas(
        body,
        state.upstream.parser(),
        state.config.upstream.idle_timeout(),
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(deltas),
    )
        .into_response())
}

fn validate(request: &ChatRequest, max_messages: usize) -> Result<(), RelayError> {
    if request.messages.is_empty() {
        return Err(RelayError::InvalidRequest(
            "messages must contain at least one message".to_string(),
        ));
    }
    if request.messages.len() > max_messages {
        return Err(RelayError::InvalidRequest(format!(
            "messages exceeds the limit of {max_messages}"
        )));
    }
    if let Some(index) = request
        .messages
        .iter()
        .position(|m| m.content.trim().is_empty())
    {
        return Err(RelayError::InvalidRequest(format!(
            "messages[{index}] has empty content"
        )));
    }
    Ok(())
}
