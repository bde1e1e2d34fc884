//! HTTP Router
//!
//! WebSocket endpoint for live events, a small control surface, and the
//! service gateway.

use axum::{
    Json, Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
    routing::{any, get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use loom_modules::ModuleSummary;

use super::error::{ApiError, ApiResult};
use super::gateway::{gateway, gateway_root};
use super::state::AppState;
use crate::hub::serve_connection;
use crate::manager::ProjectStats;
use crate::project::RunningSource;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health_check))
        .route("/modules", get(list_modules))
        .route("/projects", get(list_projects))
        .route("/projects/:project/start", post(start_project))
        .route("/projects/:project/stop", post(stop_project))
        .route("/projects/:project/stats", get(project_stats))
        .route("/svc/:project", any(gateway_root))
        .route("/svc/:project/*path", any(gateway))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WsParams {
    /// Identity asserted by the upstream auth layer
    user: Option<String>,
}

/// WebSocket upgrade handler
async fn ws_upgrade(ws: WebSocketUpgrade, Query(params): Query<WsParams>, State(state): State<AppState>) -> Response {
    let hub = state.hub().clone();
    let config = state.connection().clone();
    ws.on_upgrade(move |socket| serve_connection(socket, hub, params.user, config))
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    clients: usize,
    projects: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        clients: state.hub().client_count().await.unwrap_or(0),
        projects: state.manager().running_projects().len(),
    })
}

async fn list_modules(State(state): State<AppState>) -> Json<Vec<ModuleSummary>> {
    Json(state.manager().registry().summaries())
}

#[derive(Serialize)]
struct ProjectList {
    running: Vec<String>,
}

async fn list_projects(State(state): State<AppState>) -> Json<ProjectList> {
    Json(ProjectList {
        running: state.manager().running_projects(),
    })
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    source: String,
}

async fn start_project(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<ProjectStats>> {
    let source: RunningSource = request
        .source
        .parse()
        .map_err(|e: crate::project::RunningSourceError| ApiError::BadRequest(e.to_string()))?;
    state.controller().start(&project, &source).await?;
    Ok(Json(state.manager().stats(&project)?))
}

async fn stop_project(State(state): State<AppState>, Path(project): Path<String>) -> ApiResult<Json<ProjectList>> {
    state.controller().stop(&project).await?;
    Ok(Json(ProjectList {
        running: state.manager().running_projects(),
    }))
}

async fn project_stats(State(state): State<AppState>, Path(project): Path<String>) -> ApiResult<Json<ProjectStats>> {
    Ok(Json(state.manager().stats(&project)?))
}
