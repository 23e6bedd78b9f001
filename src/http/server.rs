//! HTTP server setup and the webhook dispatch handler.
//!
//! # Responsibilities
//! - Create the Axum router with the webhook route and fallback
//! - Wire up middleware (tracing, request timeout)
//! - Extract path identifiers, decode the payload, pick a destination
//! - Hand the request to the forwarder and relay its response
//!
//! # Responses
//! - Downstream response, verbatim, on success
//! - `400 invalid_payload` for an undecodable body
//! - `500 internal_server_error` when building or sending the outbound
//!   request fails
//! - `302` to the provider's public site for any other method or path

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::dispatch::{eval_context, select_destination, PathIds};
use crate::http::forward::Forward;
use crate::payload::ChatMessage;
use crate::rules::RuleSet;

/// Where probing or misrouted traffic is sent instead of an error page.
const FALLBACK_REDIRECT: &str = "https://api.slack.com/";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub rules: Arc<RuleSet>,
    pub forwarder: Arc<dyn Forward>,
    pub eval_budget: Duration,
    pub max_body_bytes: usize,
}

/// HTTP server for the webhook dispatcher.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server over a validated rule set.
    pub fn new(config: &DispatcherConfig, rules: RuleSet, forwarder: Arc<dyn Forward>) -> Self {
        let state = AppState {
            rules: Arc::new(rules),
            forwarder,
            eval_budget: Duration::from_millis(config.timeouts.condition_eval_ms),
            max_body_bytes: config.limits.max_body_bytes,
        };
        let router = build_router(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)));
        Self { router }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router. Exposed for tests, which drive it directly
/// with a stub forwarder.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/services/{team_id}/{bot_id}/{token}",
            post(handle_incoming_webhook).fallback(fallback_redirect),
        )
        .fallback(fallback_redirect)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Main dispatch handler: decode, select a destination, forward, relay.
async fn handle_incoming_webhook(
    State(state): State<AppState>,
    Path((team_id, bot_id, token)): Path<(String, String, String)>,
    request: Request,
) -> Response {
    let ids = PathIds {
        team_id,
        bot_id,
        token,
    };
    // The router cannot constrain segment shapes; off-pattern paths get
    // the same redirect as unmatched routes.
    if !ids.is_valid() {
        return redirect_response(&request);
    }

    tracing::info!(
        request_id = %Uuid::new_v4(),
        method = %request.method(),
        path = request.uri().path(),
        team_id = %ids.team_id,
        "accepted webhook dispatch request"
    );

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read request body");
            return plain(StatusCode::BAD_REQUEST, "invalid_payload");
        }
    };

    let payload: ChatMessage = match serde_json::from_slice(&bytes) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "failed to decode payload");
            return plain(StatusCode::BAD_REQUEST, "invalid_payload");
        }
    };

    let ctx = eval_context(&payload, &ids);
    let selection = match select_destination(&state.rules, &ctx, &ids, state.eval_budget) {
        Ok(selection) => selection,
        Err(err) => {
            tracing::error!(error = %err, "failed to build default destination");
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error");
        }
    };

    match state
        .forwarder
        .forward(selection.destination, &parts.headers, bytes)
        .await
    {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "failed to forward request downstream");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error")
        }
    }
}

/// Safety fallback for any other method or path: redirect to the
/// provider's public site rather than erroring.
async fn fallback_redirect(request: Request) -> Response {
    redirect_response(&request)
}

fn redirect_response(request: &Request) -> Response {
    tracing::info!(
        method = %request.method(),
        path = request.uri().path(),
        "request did not match the webhook route, redirecting"
    );
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, FALLBACK_REDIRECT)
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    Response::builder()
        .status(status)
        .body(Body::from(body))
        .unwrap_or_else(|_| status.into_response())
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
