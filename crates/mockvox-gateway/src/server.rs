//! Axum-based HTTP and WebSocket server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::rejection::WebSocketUpgradeRejection,
    },
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use mockvox_interview::{CandidateProfile, InterviewSession};

use crate::connection::handle_ws_connection;
use crate::services::ServiceOverrides;
use crate::state::GatewayState;
use crate::validate::{config_status, validate_config};

pub const REALTIME_PATH: &str = "/api/realtime";

/// Query string of the realtime upgrade request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeQuery {
    pub industry: Option<String>,
    #[serde(rename = "type")]
    pub interview_type: Option<String>,
    /// URL-encoded JSON `{name, age, text}`.
    pub resume: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl RealtimeQuery {
    fn overrides(&self) -> ServiceOverrides {
        ServiceOverrides {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
        }
    }

    /// Parsed resume; a malformed value is logged and ignored.
    fn profile(&self) -> Option<CandidateProfile> {
        let raw = self.resume.as_deref().map(str::trim).filter(|r| !r.is_empty())?;
        match serde_json::from_str(raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(%e, "Ignoring malformed resume parameter");
                None
            }
        }
    }
}

fn or_default(value: &Option<String>, default: String) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or(default)
}

/// Build the gateway router.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route(REALTIME_PATH, get(realtime_handler))
        .route("/api/config", get(config_status).post(validate_config))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the gateway server and run until Ctrl+C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.gateway_bind();
    let app = build_router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn upgrade_required() -> Response {
    (
        StatusCode::UPGRADE_REQUIRED,
        [
            (header::CONNECTION, HeaderValue::from_static("Upgrade")),
            (header::UPGRADE, HeaderValue::from_static("websocket")),
        ],
        "Upgrade Required",
    )
        .into_response()
}

async fn realtime_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<RealtimeQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            info!(%rejection, "Plain request on realtime endpoint");
            return upgrade_required();
        }
    };

    let industry = or_default(&query.industry, state.config.default_industry());
    let interview_type = or_default(&query.interview_type, state.config.default_interview_type());
    let session = match InterviewSession::from_store(
        &state.content,
        &industry,
        &interview_type,
        query.profile(),
        (state.pickers)(),
    ) {
        Ok(session) => session,
        Err(e) => {
            warn!(%industry, %interview_type, error = %e, "Rejected realtime connection");
            return (StatusCode::BAD_REQUEST, axum::Json(json!({ "error": e.to_string() }))).into_response();
        }
    };
    let services = state.services.build(&query.overrides());

    ws.on_upgrade(move |socket| handle_ws_connection(state, socket, session, services))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let connections = state.connection_count().await;

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "connections": connections,
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to listen for Ctrl+C; shutting down");
    }
    info!("Shutdown signal received");
}
