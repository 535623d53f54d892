//! ---
//! pde_section: "05-networking-external-interfaces"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Management API surface for operators and tooling."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use pde_core::{
    AdmissionError, AlarmManager, AlarmQuery, EngineHandle, PlantDescriptions, SystemTracker,
};
use pde_model::{
    Alarm, AlarmId, EntryId, PlantDescription, PlantDescriptionEntry, PlantDescriptionUpdate,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared API state exposed to handlers.
pub struct ApiState {
    admission: Arc<PlantDescriptions>,
    alarms: Arc<AlarmManager>,
    tracker: Arc<SystemTracker>,
    start: Instant,
}

impl ApiState {
    pub fn new(
        admission: Arc<PlantDescriptions>,
        alarms: Arc<AlarmManager>,
        tracker: Arc<SystemTracker>,
    ) -> Self {
        Self {
            admission,
            alarms,
            tracker,
            start: Instant::now(),
        }
    }

    pub fn from_engine(engine: &EngineHandle) -> Self {
        Self::new(engine.admission(), engine.alarms(), engine.tracker())
    }

    fn status(&self) -> StatusResponse {
        let store = self.admission.store();
        StatusResponse {
            uptime_seconds: self.start.elapsed().as_secs(),
            entries: store.list().len(),
            active_entry: store.active_entry().map(|entry| entry.id),
            registry_ready: self.tracker.is_initialized(),
            live_systems: self.tracker.systems().map(|systems| systems.len()).ok(),
            active_alarms: self.alarms.active().len(),
        }
    }
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("uptime", &self.start.elapsed())
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/pde/status", get(get_status))
        .route("/pde/mgmt/pd", get(list_entries).post(create_entry))
        .route(
            "/pde/mgmt/pd/:id",
            get(get_entry)
                .put(replace_entry)
                .patch(update_entry)
                .delete(delete_entry),
        )
        .route("/pde/mgmt/alarm", get(list_alarms))
        .route("/pde/mgmt/alarm/:id", get(get_alarm).patch(acknowledge_alarm))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the management API on `addr`.
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let addr = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    uptime_seconds: u64,
    entries: usize,
    active_entry: Option<EntryId>,
    registry_ready: bool,
    live_systems: Option<usize>,
    active_alarms: usize,
}

/// Paged collection body.
#[derive(Debug, Serialize)]
struct Listing<T> {
    data: Vec<T>,
    count: usize,
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(data: Vec<T>) -> Self {
        let count = data.len();
        Self { data, count }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EntryFilter {
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct AcknowledgeRequest {
    acknowledged: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    violations: Vec<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            violations: Vec::new(),
        }
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Validation(errors) => Self {
                status: StatusCode::BAD_REQUEST,
                message: "plant description rejected".to_owned(),
                violations: errors.violations().to_vec(),
            },
            AdmissionError::NotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                format!("Plant Description with ID '{id}' not found."),
            ),
            AdmissionError::Store(err) => {
                warn!(error = %err, "entry store failure while handling request");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
            violations: self.violations,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn body(entry: Arc<PlantDescriptionEntry>) -> Json<PlantDescriptionEntry> {
    Json(entry.as_ref().clone())
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(state.status())
}

async fn list_entries(
    State(state): State<Arc<ApiState>>,
    Query(filter): Query<EntryFilter>,
) -> Json<Listing<PlantDescriptionEntry>> {
    let entries: Vec<_> = state
        .admission
        .store()
        .list()
        .into_iter()
        .filter(|entry| filter.active.map_or(true, |active| entry.active == active))
        .map(|entry| entry.as_ref().clone())
        .collect();
    Json(entries.into())
}

async fn create_entry(
    State(state): State<Arc<ApiState>>,
    Json(description): Json<PlantDescription>,
) -> ApiResult<(StatusCode, Json<PlantDescriptionEntry>)> {
    let entry = state.admission.create(description)?;
    Ok((StatusCode::CREATED, body(entry)))
}

async fn get_entry(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<EntryId>,
) -> ApiResult<Json<PlantDescriptionEntry>> {
    let entry = state
        .admission
        .store()
        .get(id)
        .map_err(|err| ApiError::from(AdmissionError::from(err)))?;
    Ok(body(entry))
}

async fn replace_entry(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<EntryId>,
    Json(description): Json<PlantDescription>,
) -> ApiResult<Json<PlantDescriptionEntry>> {
    Ok(body(state.admission.replace(id, description)?))
}

async fn update_entry(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<EntryId>,
    Json(update): Json<PlantDescriptionUpdate>,
) -> ApiResult<Json<PlantDescriptionEntry>> {
    Ok(body(state.admission.update(id, &update)?))
}

async fn delete_entry(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<EntryId>,
) -> ApiResult<Json<PlantDescriptionEntry>> {
    Ok(body(state.admission.remove(id)?))
}

async fn list_alarms(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AlarmQuery>,
) -> Json<Listing<Alarm>> {
    Json(state.alarms.list(&query).into())
}

fn unknown_alarm(id: AlarmId) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        format!("PDE Alarm with ID '{id}' not found."),
    )
}

async fn get_alarm(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<AlarmId>,
) -> ApiResult<Json<Alarm>> {
    state
        .alarms
        .get(id)
        .map(Json)
        .ok_or_else(|| unknown_alarm(id))
}

async fn acknowledge_alarm(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<AlarmId>,
    Json(request): Json<AcknowledgeRequest>,
) -> ApiResult<Json<Alarm>> {
    state
        .alarms
        .acknowledge(id, request.acknowledged)
        .map(Json)
        .map_err(|_| unknown_alarm(id))
}
