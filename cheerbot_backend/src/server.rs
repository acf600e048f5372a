use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::engine::{EngagementEngine, EngineEvent, ExecutionMode, InvocationSummary};
use crate::error::FatalError;
use crate::runtime::BackendRuntime;
use crate::state::EngagementState;

const EVENT_HISTORY: usize = 256;

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<EngagementEngine>,
    pub auth: ApiAuth,
    /// Invocations are serialized within one process.
    pub invocation_lock: Arc<Mutex<()>>,
    pub recent_events: Arc<RwLock<VecDeque<ApiEventEnvelope>>>,
}

/// Bearer token guarding the API; `None` leaves it open.
#[derive(Debug, Clone, Default)]
pub struct ApiAuth {
    token: Option<String>,
}

impl ApiAuth {
    /// Reads `CHEERBOT_BACKEND_TOKEN`. Serving without one must be asked for
    /// with `CHEERBOT_BACKEND_OPEN=1`.
    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("CHEERBOT_BACKEND_TOKEN")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let open = lookup("CHEERBOT_BACKEND_OPEN")
            .is_some_and(|value| matches!(value.trim(), "1" | "true"));

        match (token, open) {
            (Some(token), _) => Ok(Self { token: Some(token) }),
            (None, true) => {
                tracing::warn!("Backend API is open; anyone who can reach it can trigger posts");
                Ok(Self::default())
            }
            (None, false) => Err(anyhow!(
                "CHEERBOT_BACKEND_TOKEN is required unless CHEERBOT_BACKEND_OPEN=1"
            )),
        }
    }

    fn permits(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return true;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().strip_prefix("Bearer "))
            .is_some_and(|presented| presented == expected)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiEventEnvelope {
    pub event_type: String,
    pub emitted_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    #[serde(default)]
    execution_mode: ExecutionMode,
}

#[derive(Debug, Deserialize)]
struct ListEventsQuery {
    limit: Option<usize>,
}

pub async fn serve_backend(
    runtime: BackendRuntime,
    event_rx: flume::Receiver<EngineEvent>,
) -> Result<()> {
    let bind_addr = std::env::var("CHEERBOT_BACKEND_BIND")
        .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
        .parse::<SocketAddr>()
        .context("Invalid CHEERBOT_BACKEND_BIND (expected host:port)")?;

    let auth = ApiAuth::from_lookup(|key| std::env::var(key).ok())?;
    let state = Arc::new(ServerState {
        engine: runtime.engine.clone(),
        auth,
        invocation_lock: Arc::new(Mutex::new(())),
        recent_events: Arc::new(RwLock::new(VecDeque::with_capacity(EVENT_HISTORY))),
    });

    spawn_event_bridge(event_rx, state.recent_events.clone());

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("Cheerbot backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

fn router(state: Arc<ServerState>) -> Router {
    let protected = Router::new()
        .route("/state", get(get_state))
        .route("/events", get(list_events))
        .route("/invoke", post(invoke))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, require_token));

    Router::new().nest(
        "/v1",
        Router::new().route("/health", get(health)).merge(protected),
    )
}

fn spawn_event_bridge(
    event_rx: flume::Receiver<EngineEvent>,
    recent_events: Arc<RwLock<VecDeque<ApiEventEnvelope>>>,
) {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            let envelope = map_engine_event(&event);
            tracing::debug!("Engine event: {}", envelope.event_type);
            let mut history = recent_events.write().await;
            if history.len() == EVENT_HISTORY {
                history.pop_front();
            }
            history.push_back(envelope);
        }
    });
}

fn map_engine_event(event: &EngineEvent) -> ApiEventEnvelope {
    let payload = serde_json::to_value(event).unwrap_or_else(|e| {
        tracing::warn!("Failed to serialize engine event: {}", e);
        serde_json::Value::Null
    });
    let event_type = payload
        .get("type")
        .and_then(|value| value.as_str())
        .unwrap_or("unknown")
        .to_string();
    ApiEventEnvelope {
        event_type,
        emitted_at: Utc::now(),
        payload,
    }
}

async fn require_token(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.auth.permits(&headers) {
        tracing::debug!("Rejected unauthenticated request to {}", request.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_state(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<EngagementState>, (StatusCode, String)> {
    state
        .engine
        .current_state()
        .await
        .map(Json)
        .map_err(fatal_error)
}

async fn list_events(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListEventsQuery>,
) -> Json<Vec<ApiEventEnvelope>> {
    let limit = query.limit.unwrap_or(50).clamp(1, EVENT_HISTORY);
    let history = state.recent_events.read().await;
    let skip = history.len().saturating_sub(limit);
    Json(history.iter().skip(skip).cloned().collect())
}

async fn invoke(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<InvocationSummary>, (StatusCode, String)> {
    let _running = state.invocation_lock.lock().await;
    state
        .engine
        .run_invocation(request.execution_mode, Utc::now())
        .await
        .map(Json)
        .map_err(fatal_error)
}

fn fatal_error(error: FatalError) -> (StatusCode, String) {
    tracing::error!("Invocation aborted: {}", error);
    let status = match error {
        FatalError::StateConflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string())
}
