//! JSON surface over the curation console.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use curate_core::{
    BulkAction, CurationJob, CurationStatus, CurationTab, FilterPatch, JobAction, JobId,
    ProductId,
};
use curate_sync::{BulkActionResult, BulkOutcome, ConsoleState, CurationConsole, RefreshOutcome};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod error;

pub use error::{ApiError, ApiResult};

pub const CRATE_NAME: &str = "curate-web";

#[derive(Clone)]
pub struct AppState {
    pub console: Arc<CurationConsole>,
}

impl AppState {
    pub fn new(console: Arc<CurationConsole>) -> Self {
        Self { console }
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshReply {
    pub outcome: &'static str,
    pub state: ConsoleState,
}

#[derive(Debug, Serialize)]
pub struct ToggleReply {
    pub enabled: bool,
    pub refresh: Option<&'static str>,
    pub state: ConsoleState,
}

#[derive(Debug, Serialize)]
pub struct BulkReply {
    pub outcome: BulkOutcome,
    pub summary: String,
    pub result: BulkActionResult,
    pub state: ConsoleState,
}

#[derive(Debug, Deserialize)]
struct VisibilityRequest {
    visible: bool,
}

#[derive(Debug, Deserialize)]
struct TabRequest {
    tab: CurationTab,
}

#[derive(Debug, Deserialize)]
struct SelectionRequest {
    product_id: ProductId,
    selected: bool,
}

#[derive(Debug, Deserialize)]
struct SelectAllRequest {
    selected: bool,
}

#[derive(Debug, Deserialize)]
struct BulkRequest {
    action: BulkAction,
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    status: CurationStatus,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/state", get(state_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/auto-refresh/toggle", post(toggle_handler))
        .route("/api/visibility", post(visibility_handler))
        .route("/api/tab", post(tab_handler))
        .route("/api/filters", post(filters_handler))
        .route("/api/selection", post(selection_handler))
        .route("/api/selection/all", post(select_all_handler))
        .route("/api/bulk", post(bulk_handler))
        .route("/api/bulk/retry", post(bulk_retry_handler))
        .route("/api/products/{id}/transition", post(transition_handler))
        .route("/api/jobs/{id}/{action}", post(job_action_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind `port` and serve until the listener fails.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "curation console web surface listening");
    axum::serve(listener, app(state)).await.context("serving http")?;
    Ok(())
}

/// A failed refresh is reported as an error; skipped and superseded
/// refreshes are not.
fn refresh_label(outcome: RefreshOutcome) -> ApiResult<&'static str> {
    match outcome {
        RefreshOutcome::Failed(err) => Err(err.into()),
        other => Ok(other.label()),
    }
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn state_handler(State(state): State<Arc<AppState>>) -> Json<ConsoleState> {
    Json(state.console.state().await)
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<RefreshReply>> {
    let outcome = refresh_label(state.console.manual_refresh().await)?;
    Ok(Json(RefreshReply {
        outcome,
        state: state.console.state().await,
    }))
}

async fn toggle_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<ToggleReply>> {
    let toggled = state.console.toggle_auto_refresh().await;
    let refresh = toggled.refresh.map(refresh_label).transpose()?;
    Ok(Json(ToggleReply {
        enabled: toggled.enabled,
        refresh,
        state: state.console.state().await,
    }))
}

async fn visibility_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VisibilityRequest>,
) -> Json<ConsoleState> {
    state.console.set_visible(body.visible);
    Json(state.console.state().await)
}

async fn tab_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TabRequest>,
) -> ApiResult<Json<ConsoleState>> {
    if let Some(outcome) = state.console.set_tab(body.tab).await {
        refresh_label(outcome)?;
    }
    Ok(Json(state.console.state().await))
}

async fn filters_handler(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<FilterPatch>,
) -> ApiResult<Json<ConsoleState>> {
    if let Some(outcome) = state.console.set_filters(&patch).await {
        refresh_label(outcome)?;
    }
    Ok(Json(state.console.state().await))
}

async fn selection_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectionRequest>,
) -> ApiResult<Json<ConsoleState>> {
    state
        .console
        .select_product(&body.product_id, body.selected)
        .await?;
    Ok(Json(state.console.state().await))
}

async fn select_all_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SelectAllRequest>,
) -> Json<ConsoleState> {
    state.console.select_all(body.selected).await;
    Json(state.console.state().await)
}

async fn bulk_reply(state: &AppState, result: BulkActionResult) -> BulkReply {
    BulkReply {
        outcome: result.outcome(),
        summary: result.summary(),
        result,
        state: state.console.state().await,
    }
}

async fn bulk_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkRequest>,
) -> ApiResult<Json<BulkReply>> {
    let result = state.console.run_bulk_action(body.action).await?;
    Ok(Json(bulk_reply(&state, result).await))
}

async fn bulk_retry_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<BulkReply>> {
    let result = state.console.retry_failed().await?;
    Ok(Json(bulk_reply(&state, result).await))
}

async fn transition_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TransitionRequest>,
) -> ApiResult<Json<ConsoleState>> {
    state
        .console
        .apply_transition(&ProductId::new(id), body.status)
        .await?;
    Ok(Json(state.console.state().await))
}

async fn job_action_handler(
    State(state): State<Arc<AppState>>,
    Path((id, action)): Path<(String, String)>,
) -> ApiResult<Json<CurationJob>> {
    let action: JobAction = action
        .parse()
        .map_err(|err: curate_core::ParseEnumError| ApiError::BadRequest(err.to_string()))?;
    let job = state.console.job_action(&JobId::new(id), action).await?;
    Ok(Json(job))
}
