//! REST API routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fa_core::elevation::ElevationSource;
use fa_core::{
    corridor_buffer_m, estimate_intersections,
    ground_risk_from_intersections, los_profile, AircraftConfiguration, AnalysisError,
    Coordinate3D, EstimatorOptions, FlightPath, IgrcResult, IntersectionReport, Layer, LayerKind,
    LosOptions, PopulationPolygon, PreparedVisibility, Station, VisibilityOptions, VisibilityReport,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::api::error::AppError;
use crate::api::{request_id, ws};
use crate::jobs::{JobRecord, JobTicket};
use crate::population::DatasetInfo;
use crate::state::AppState;
use crate::terrain::GeoBounds;

type ApiResult<T> = Result<T, AppError>;

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/analysis/los", post(analyze_los))
        .route("/v1/analysis/visibility", post(start_visibility))
        .route("/v1/analysis/ground-risk", post(analyze_ground_risk))
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/jobs/:id", get(get_job))
        .route("/v1/jobs/:id/cancel", post(cancel_job))
        .route("/v1/population", get(population_info))
        .route("/v1/population/reload", post(reload_population))
        .route("/v1/layers", get(list_layers))
        .route("/v1/layers/stream", get(ws::layer_stream))
        .route(
            "/v1/layers/:name",
            get(get_layer).put(update_layer).delete(delete_layer),
        )
        .layer(middleware::from_fn(request_id::ensure_request_id))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "population_version": state.population().snapshot().version(),
        "running_jobs": state.jobs().running(),
        "layers": state.layers().len(),
    }))
}

// === Line of sight ===

#[derive(Debug, Deserialize)]
pub struct LosRequest {
    pub observer: Coordinate3D,
    pub target: Coordinate3D,
    #[serde(default)]
    pub options: Option<LosOptions>,
}

async fn analyze_los(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LosRequest>,
) -> ApiResult<impl IntoResponse> {
    if !request.observer.is_finite() || !request.target.is_finite() {
        return Err(AnalysisError::InvalidInput(
            "observer and target must be finite".to_string(),
        )
        .into());
    }
    let options = request.options.unwrap_or_else(|| state.config().los_options());
    let session = state.terrain_session();
    session.ensure_ready().await?;
    session
        .preload_area(&[request.observer, request.target])
        .await?;

    let profile = los_profile(&request.observer, &request.target, &options, &session);
    tracing::debug!(
        "LOS {:.0} m: clear={} missing={}",
        profile.distance_m,
        profile.clear,
        profile.missing_samples
    );
    Ok(Json(profile))
}

// === Visibility (background job) ===

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub path: FlightPath,
    pub stations: Vec<Station>,
    #[serde(default)]
    pub options: Option<VisibilityOptions>,
    /// Publish the result as an overlay under this name
    #[serde(default)]
    pub layer_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub status_url: String,
}

async fn start_visibility(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VisibilityRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.stations.is_empty() {
        return Err(AnalysisError::InvalidInput("no stations configured".to_string()).into());
    }
    let ticket = state.jobs().start("visibility").ok_or(AppError::Busy)?;
    let accepted = JobAccepted {
        status_url: format!("/v1/jobs/{}", ticket.id),
        job_id: ticket.id.clone(),
    };
    tokio::spawn(run_visibility_job(Arc::clone(&state), ticket, request));
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn run_visibility_job(state: Arc<AppState>, ticket: JobTicket, request: VisibilityRequest) {
    let options = request
        .options
        .clone()
        .unwrap_or_else(|| state.config().visibility_options());
    let session = state.terrain_session();

    let prepared = PreparedVisibility::prepare(
        &request.path,
        &request.stations,
        &session,
        &options,
        &ticket.cancel,
        &mut job_progress(&state, &ticket.id),
    )
    .await;
    drop(session);

    // Classification is CPU-bound and stays off the async workers.
    let outcome = match prepared {
        Ok(prepared) => {
            let stations = request.stations;
            let cancel = ticket.cancel.clone();
            let progress = job_progress(&state, &ticket.id);
            tokio::task::spawn_blocking(move || {
                prepared.classify(&stations, &options, &cancel, progress)
            })
            .await
            .unwrap_or_else(|err| {
                Err(AnalysisError::Configuration(format!(
                    "visibility worker failed: {err}"
                )))
            })
        }
        Err(err) => Err(err),
    };

    match outcome {
        Ok(report) => {
            if let Some(layer_name) = request.layer_name {
                state.layers().add(
                    Layer::new(layer_name, LayerKind::Visibility)
                        .with_data(visibility_overlay(&report)),
                );
            }
            match serde_json::to_value(&report) {
                Ok(value) => state.jobs().complete(&ticket.id, value),
                Err(err) => state
                    .jobs()
                    .fail(&ticket.id, &AnalysisError::Configuration(err.to_string())),
            }
        }
        Err(err) => {
            tracing::warn!("Visibility job {} did not complete: {}", ticket.id, err);
            state.jobs().fail(&ticket.id, &err);
        }
    }
}

fn job_progress(state: &Arc<AppState>, id: &str) -> impl FnMut(f64) + Send + 'static {
    let state = Arc::clone(state);
    let id = id.to_string();
    move |pct| state.jobs().set_progress(&id, pct)
}

fn visibility_overlay(report: &VisibilityReport) -> serde_json::Value {
    json!({
        "segments": report.segments,
        "coverage_percentage": report.stats.coverage_percentage,
        "degraded_fidelity": report.degraded_fidelity,
    })
}

// === Jobs ===

async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobRecord>> {
    Json(state.jobs().list())
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    state
        .jobs()
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("job {id}")))
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state
        .jobs()
        .cancel(&id)
        .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
    Ok(Json(json!({ "job_id": id, "status": status })))
}

// === Ground risk ===

#[derive(Debug, Deserialize)]
pub struct GroundRiskRequest {
    pub path: FlightPath,
    pub aircraft: AircraftConfiguration,
    /// Inline polygons; the loaded dataset is queried when absent
    #[serde(default)]
    pub polygons: Option<Vec<PopulationPolygon>>,
    #[serde(default)]
    pub buffer_m: Option<f64>,
    #[serde(default)]
    pub options: Option<EstimatorOptions>,
    /// Publish the result as an overlay under this name
    #[serde(default)]
    pub layer_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GroundRiskResponse {
    /// Dataset version used, `None` for inline polygons
    pub dataset_version: Option<u64>,
    pub buffer_m: f64,
    pub intersections: IntersectionReport,
    pub ground_risk: IgrcResult,
}

async fn analyze_ground_risk(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GroundRiskRequest>,
) -> ApiResult<Json<GroundRiskResponse>> {
    let aircraft = request.aircraft;
    if !(aircraft.max_dimension_m.is_finite() && aircraft.max_dimension_m > 0.0) {
        return Err(AnalysisError::InvalidInput(
            "aircraft max dimension must be a positive number".to_string(),
        )
        .into());
    }
    let buffer_m = match request.buffer_m {
        Some(buffer) if buffer.is_finite() && buffer > 0.0 => buffer,
        Some(_) => {
            return Err(AnalysisError::InvalidInput("buffer must be positive".to_string()).into())
        }
        None => corridor_buffer_m(aircraft.operation_altitude_agl_m, state.config().corridor_floor_m),
    };

    let (polygons, dataset_version) = match request.polygons {
        Some(inline) => (Arc::new(inline), None),
        None => {
            let snapshot = state.population().snapshot();
            let area = corridor_area(&request.path, buffer_m).ok_or_else(|| {
                AnalysisError::InvalidInput("flight path has no finite coordinates".to_string())
            })?;
            (state.population().query(&snapshot, &area), Some(snapshot.version()))
        }
    };

    let path = request.path;
    let options = request.options.unwrap_or_default();
    let table = state.igrc_table().clone();
    let worker_polygons = Arc::clone(&polygons);
    let (intersections, ground_risk) = tokio::task::spawn_blocking(move || {
        let report = estimate_intersections(&worker_polygons, &path, buffer_m, &options)?;
        let igrc = ground_risk_from_intersections(&report.results, &aircraft, &table)?;
        Ok::<_, AnalysisError>((report, igrc))
    })
    .await
    .map_err(|err| AppError::Internal(format!("ground risk worker failed: {err}")))??;

    if !intersections.skipped.is_empty() {
        tracing::warn!(
            "Ground risk run skipped {} of {} polygons",
            intersections.skipped_count(),
            intersections.polygons_considered
        );
    }

    if let Some(layer_name) = request.layer_name {
        state.layers().add(Layer::new(layer_name, LayerKind::GroundRisk).with_data(json!({
            "intersections": intersections.results,
            "igrc_range": ground_risk.igrc_range,
        })));
    }

    Ok(Json(GroundRiskResponse {
        dataset_version,
        buffer_m,
        intersections,
        ground_risk,
    }))
}

/// Path bounds padded by the corridor buffer.
fn corridor_area(path: &FlightPath, buffer_m: f64) -> Option<GeoBounds> {
    let bounds = GeoBounds::from_points(path.coordinates().iter().map(|c| (c.lon, c.lat)))?;
    let mid_lat = (bounds.min_lat + bounds.max_lat) / 2.0;
    let pad_lat = buffer_m / fa_core::spatial::meters_per_deg_lat(mid_lat);
    let pad_lon = buffer_m / fa_core::spatial::meters_per_deg_lon(mid_lat).max(1.0);
    Some(GeoBounds {
        min_lat: bounds.min_lat - pad_lat,
        max_lat: bounds.max_lat + pad_lat,
        min_lon: bounds.min_lon - pad_lon,
        max_lon: bounds.max_lon + pad_lon,
    })
}

// === Population dataset ===

async fn population_info(State(state): State<Arc<AppState>>) -> Json<DatasetInfo> {
    Json(state.population().info())
}

async fn reload_population(State(state): State<Arc<AppState>>) -> ApiResult<Json<DatasetInfo>> {
    state.population().reload().await?;
    Ok(Json(state.population().info()))
}

// === Layers ===

#[derive(Debug, Deserialize)]
pub struct LayerUpdate {
    pub visible: bool,
}

async fn list_layers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.layers().list())
}

async fn get_layer(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Layer>> {
    state
        .layers()
        .get(&name)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("layer {name}")))
}

async fn update_layer(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(update): Json<LayerUpdate>,
) -> ApiResult<impl IntoResponse> {
    if state.layers().get(&name).is_none() {
        return Err(AppError::NotFound(format!("layer {name}")));
    }
    state.layers().set_visibility(&name, update.visible)?;
    Ok(Json(json!({ "name": name, "visible": update.visible })))
}

async fn delete_layer(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .layers()
        .remove(&name)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| AppError::NotFound(format!("layer {name}")))
}
