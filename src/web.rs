use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::model::{Capabilities, Endpoint, LogEntry, NewEndpoint, Stats};
use crate::monitor::Scheduler;
use crate::registry::RegistryError;
use crate::report::{ReportBoard, ReportState};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub reports: ReportBoard,
    pub shutdown_rx: watch::Receiver<()>, // ends SSE streams
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/monitors", get(list_monitors).post(add_monitor))
        .route("/api/monitors/:id", get(get_monitor).delete(delete_monitor))
        .route("/api/monitors/:id/check", post(check_monitor))
        .route("/api/monitors/:id/pause", post(pause_monitor))
        .route("/api/monitors/:id/resume", post(resume_monitor))
        .route("/api/monitors/:id/report", get(get_report).post(request_report))
        .route("/api/stats", get(get_stats))
        .route("/api/logs", get(list_logs))
        .route("/api/events", get(sse_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Endpoint as the dashboard sees it.
#[derive(Serialize)]
struct MonitorView {
    #[serde(flatten)]
    endpoint: Endpoint,
    capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ReportState>,
}

impl MonitorView {
    fn new(endpoint: Endpoint, reports: &ReportBoard) -> Self {
        Self {
            capabilities: endpoint.capabilities(),
            report: reports.get(&endpoint.id),
            endpoint,
        }
    }
}

struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Paused(_) | RegistryError::NotPaused(_) | RegistryError::NotDown(_) => {
                StatusCode::CONFLICT
            }
            RegistryError::EmptyName
            | RegistryError::EmptyUrl
            | RegistryError::InvalidUrl(_)
            | RegistryError::UnsupportedScheme(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn list_monitors(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (endpoints, stats, _) = state.scheduler.store().overview().await;
    let monitors: Vec<MonitorView> =
        endpoints.into_iter().map(|e| MonitorView::new(e, &state.reports)).collect();
    Json(json!({ "monitors": monitors, "stats": stats }))
}

async fn get_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MonitorView>> {
    let endpoint = state
        .scheduler
        .store()
        .get(&id)
        .await
        .ok_or(RegistryError::NotFound(id))?;
    Ok(Json(MonitorView::new(endpoint, &state.reports)))
}

async fn add_monitor(
    State(state): State<AppState>,
    Json(input): Json<NewEndpoint>,
) -> ApiResult<(StatusCode, Json<MonitorView>)> {
    let endpoint = state.scheduler.add_endpoint(input).await?;
    Ok((StatusCode::CREATED, Json(MonitorView::new(endpoint, &state.reports))))
}

async fn delete_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.remove_endpoint(&id).await?;
    state.reports.forget(&id);
    Ok(StatusCode::NO_CONTENT)
}

async fn check_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    // fire and forget, the result arrives on the event stream
    state.scheduler.check_now(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "id": id, "queued": true }))))
}

async fn pause_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MonitorView>> {
    let endpoint = state.scheduler.pause_endpoint(&id).await?;
    Ok(Json(MonitorView::new(endpoint, &state.reports)))
}

async fn resume_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MonitorView>> {
    let endpoint = state.scheduler.resume_endpoint(&id).await?;
    Ok(Json(MonitorView::new(endpoint, &state.reports)))
}

async fn request_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<ReportState>)> {
    let endpoint = state
        .scheduler
        .store()
        .get(&id)
        .await
        .ok_or(RegistryError::NotFound(id))?;
    start_report(&state, &endpoint).await?;
    Ok((StatusCode::ACCEPTED, Json(ReportState::Pending)))
}

/// Queues a report for an endpoint read earlier. A delete may have landed in
/// between, so the store is checked again once the entry is in place.
async fn start_report(state: &AppState, endpoint: &Endpoint) -> ApiResult<()> {
    state.reports.request(endpoint)?;
    if state.scheduler.store().get(&endpoint.id).await.is_none() {
        state.reports.forget(&endpoint.id);
        return Err(RegistryError::NotFound(endpoint.id.clone()).into());
    }
    Ok(())
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReportState>> {
    state
        .reports
        .get(&id)
        .map(Json)
        .ok_or(ApiError(RegistryError::NotFound(id)))
}

async fn get_stats(State(state): State<AppState>) -> Json<Stats> {
    Json(state.scheduler.store().stats().await)
}

async fn list_logs(State(state): State<AppState>) -> Json<Vec<LogEntry>> {
    Json(state.scheduler.store().logs().await)
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let store = state.scheduler.store();
    // subscribe first so nothing slips between snapshot and stream
    let rx = store.subscribe();
    let (endpoints, stats, logs) = store.overview().await;
    let monitors: Vec<MonitorView> =
        endpoints.into_iter().map(|e| MonitorView::new(e, &state.reports)).collect();

    let initial_json =
        serde_json::to_string(&json!({ "monitors": monitors, "stats": stats, "logs": logs }))
            .unwrap_or_default();
    let initial_event = Ok(Event::default().event("init").data(initial_json));

    let broadcast_stream = tokio_stream::wrappers::BroadcastStream::new(rx).map(|msg| match msg {
        Ok(json) => Ok(Event::default().event("update").data(json)),
        Err(_) => Ok(Event::default().event("error").data("stream lagged")),
    });

    let mut shutdown_rx = state.shutdown_rx.clone();
    let stream = futures::stream::once(async { initial_event })
        .chain(broadcast_stream)
        .take_until(async move {
            let _ = shutdown_rx.changed().await;
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
