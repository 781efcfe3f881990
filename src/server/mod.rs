//! Axum HTTP surface: SSE streaming endpoints plus JSON control endpoints.
//!
//! Every route requires the shared `x-api-key` header; the check runs
//! before any run state is touched. The two streaming endpoints attach the
//! run's listener first and only then hand the work to the engine, so the
//! `start` event is never missed.
//!
//! Routes:
//! - `POST /runs/{run_id}/init` - create and start a run, stream events
//! - `POST /runs/{run_id}/invoke` - resume the first waiting node, stream
//! - `POST /runs/{run_id}/nodes/{node_id}/resume` - targeted resume, JSON
//! - `POST /runs/{run_id}/cancel` - abort a run, JSON
//! - `GET  /runs/{run_id}` - run snapshot, JSON

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tracing::debug;

use crate::engine::{Engine, EngineError};
use crate::run::StoreError;
use crate::stream::StreamEvent;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub api_key: Arc<str>,
}

/// Build the router with the API-key guard applied to every route.
pub fn router(engine: Arc<Engine>, api_key: &str) -> Router {
    let state = AppState {
        engine,
        api_key: Arc::from(api_key),
    };
    Router::new()
        .route("/runs/{run_id}/init", post(init_run))
        .route("/runs/{run_id}/invoke", post(invoke_run))
        .route("/runs/{run_id}/nodes/{node_id}/resume", post(resume_node))
        .route("/runs/{run_id}/cancel", post(cancel_run))
        .route("/runs/{run_id}", get(get_run))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

async fn require_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if presented != Some(state.api_key.as_ref()) {
        debug!("rejected request with missing or wrong api key");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid api key"})),
        )
            .into_response();
    }
    next.run(request).await
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::Store(StoreError::RunNotFound { .. }) => StatusCode::NOT_FOUND,
            EngineError::Store(StoreError::RunExists { .. }) => StatusCode::CONFLICT,
            EngineError::RunFinished { .. } | EngineError::InvalidResumeTarget { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::ResumeRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

fn sse_response(
    stream: crate::stream::RunStream,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let events = stream
        .into_stream()
        .map(|event: StreamEvent| Ok(Event::default().json_data(&event).unwrap_or_default()));
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Create a run from the request body (the seed payload) and stream its
/// first attempt.
async fn init_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    let seed = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    let listener = state.engine.streams().attach(&run_id);
    let engine = Arc::clone(&state.engine);
    let streams = Arc::clone(engine.streams());
    let id = run_id.clone();
    tokio::spawn(async move {
        if let Err(err) = engine.start_run(&id, seed).await {
            streams.emitter(&id).emit(StreamEvent::Error {
                error: err.to_string(),
            });
        }
    });
    sse_response(listener).into_response()
}

/// Deliver the request body to the first waiting node and stream the
/// resulting attempt. Callers name a node explicitly with `"node_id"`.
async fn invoke_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    let mut payload = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    let node_id = match payload
        .as_object_mut()
        .and_then(|obj| obj.remove("node_id"))
        .and_then(|v| v.as_str().map(str::to_string))
    {
        Some(explicit) => explicit,
        None => match state.engine.first_waiting(&run_id).await {
            Ok(Some(node_id)) => node_id,
            Ok(None) => {
                return ApiError {
                    status: StatusCode::CONFLICT,
                    message: "run has no node waiting for input".to_string(),
                }
                .into_response();
            }
            Err(err) => return ApiError::from(err).into_response(),
        },
    };

    let listener = state.engine.streams().attach(&run_id);
    let engine = Arc::clone(&state.engine);
    let streams = Arc::clone(engine.streams());
    let id = run_id.clone();
    tokio::spawn(async move {
        if let Err(err) = engine.resume_node(&id, &node_id, payload).await {
            streams.emitter(&id).emit(StreamEvent::Error {
                error: err.to_string(),
            });
        }
    });
    sse_response(listener).into_response()
}

/// Targeted resume with a synchronous JSON answer instead of a stream.
async fn resume_node(
    State(state): State<AppState>,
    Path((run_id, node_id)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let payload = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    let snapshot = state.engine.resume_node(&run_id, &node_id, payload).await?;
    Ok(Json(serde_json::to_value(snapshot).unwrap_or_default()))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state.engine.cancel_run(&run_id).await?;
    Ok(Json(serde_json::to_value(snapshot).unwrap_or_default()))
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state.engine.run_snapshot(&run_id).await?;
    Ok(Json(serde_json::to_value(snapshot).unwrap_or_default()))
}
