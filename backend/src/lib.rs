pub mod error;
pub mod geometry;
pub mod normalize;
pub mod osrm;
pub mod session;
pub mod stations;
pub mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use shared::{
    ApiError, Coordinate, SessionCreated, SessionSummary, SnapRequest, SnapResponse,
    StationsResponse, SubmitRequest, SubmitResponse,
};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::{to_api_error, SurveyError};
use crate::geometry::{densify, line_from_geojson};
use crate::normalize::normalize_path;
use crate::osrm::OsrmClient;
use crate::session::Session;
use crate::stations::{fetch_gbfs_stations, parse_stations_csv, sample_stations};
use crate::store::{RouteRecord, RouteStore};

#[derive(Clone)]
pub struct AppState {
    pub snapper: Arc<OsrmClient>,
    pub store: Arc<dyn RouteStore>,
    pub sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
    pub http: reqwest::Client,
    /// Configured GBFS station_information URL, if any.
    pub gbfs_url: Option<String>,
}

impl AppState {
    pub fn new(snapper: OsrmClient, store: Arc<dyn RouteStore>, gbfs_url: Option<String>) -> Self {
        Self {
            snapper: Arc::new(snapper),
            store,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            http: reqwest::Client::new(),
            gbfs_url,
        }
    }

    /// Run one closure against the respondent's session, creating it on
    /// first use. The lock is never held across an await point; each
    /// user action mutates its session synchronously.
    fn with_session<T>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .entry(id)
            .or_insert_with(|| Session::new(id.to_string()));
        f(session)
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/session", post(create_session))
        .route("/api/session/:id/snap", post(snap_drawing))
        .route("/api/session/:id/accept", post(accept_preview))
        .route("/api/session/:id/preview/clear", post(clear_preview))
        .route("/api/session/:id/clear", post(clear_all))
        .route("/api/session/:id/submit", post(submit_routes))
        .route("/api/routes", get(list_routes))
        .route("/api/routes/heatmap", get(routes_heatmap))
        .route("/api/stations", get(list_stations))
        .route("/api/stations/csv", post(upload_stations_csv))
        .layer(cors)
        .with_state(state)
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

async fn create_session(State(state): State<AppState>) -> Json<SessionCreated> {
    let id = Uuid::new_v4();
    state.with_session(id, |_| ());
    tracing::info!("new respondent session {id}");
    Json(SessionCreated {
        respondent_id: id.to_string(),
    })
}

/// Normalize the raw drawing, snap it to the street network, and stash
/// the result as the session's preview. Any failure leaves the session
/// exactly as it was.
async fn snap_drawing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SnapRequest>,
) -> ApiResult<SnapResponse> {
    let points =
        normalize_path(&req.coordinates).map_err(|e| to_api_error(SurveyError::from(e)))?;
    let snapped = state
        .snapper
        .snap(&points)
        .await
        .map_err(|e| to_api_error(SurveyError::from(e)))?;

    state.with_session(id, |session| {
        session.set_preview(snapped.geometry.clone(), snapped.distance_m)
    });
    tracing::info!(
        "session {id}: snapped {} raw points to {} vertices, {:.1} m",
        req.coordinates.len(),
        snapped.geometry.len(),
        snapped.distance_m
    );

    Ok(Json(SnapResponse {
        geometry: snapped.geometry,
        distance_m: snapped.distance_m,
    }))
}

async fn accept_preview(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionSummary> {
    let routes = state
        .with_session(id, |session| session.accept())
        .map_err(|e| to_api_error(SurveyError::from(e)))?;
    Ok(Json(SessionSummary {
        routes,
        has_preview: false,
    }))
}

async fn clear_preview(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<SessionSummary> {
    let routes = state.with_session(id, |session| {
        session.clear_preview();
        session.routes().len()
    });
    Json(SessionSummary {
        routes,
        has_preview: false,
    })
}

async fn clear_all(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<SessionSummary> {
    state.with_session(id, |session| session.clear_all());
    Json(SessionSummary {
        routes: 0,
        has_preview: false,
    })
}

async fn submit_routes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<SubmitResponse> {
    // Snapshot under the lock, persist outside it; submit itself never
    // mutates the session.
    let snapshot = state.with_session(id, |session| session.clone());
    let written = snapshot
        .submit(
            &req.answers,
            req.consent,
            &req.station_source,
            state.store.as_ref(),
        )
        .await
        .map_err(|e| to_api_error(SurveyError::from(e)))?;
    Ok(Json(SubmitResponse { written }))
}

/// All stored routes, for the overview overlay. A store read failure
/// degrades to an empty overlay with a warning; the map must still
/// render.
async fn list_routes(State(state): State<AppState>) -> Json<Vec<RouteRecord>> {
    let rows = match state.store.load_all().await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("overview disabled, store read failed: {e}");
            Vec::new()
        }
    };
    Json(rows)
}

#[derive(Debug, Deserialize)]
struct HeatmapParams {
    #[serde(default = "default_heatmap_step")]
    step_m: f64,
}

fn default_heatmap_step() -> f64 {
    40.0
}

/// Densified point cloud over every stored geometry, for heatmap
/// rendering. Rows with unparseable geometry are skipped.
async fn routes_heatmap(
    State(state): State<AppState>,
    Query(params): Query<HeatmapParams>,
) -> Json<Vec<Coordinate>> {
    let step_m = if params.step_m.is_finite() && params.step_m >= 1.0 {
        params.step_m
    } else {
        default_heatmap_step()
    };

    let rows = match state.store.load_all().await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("heatmap disabled, store read failed: {e}");
            Vec::new()
        }
    };

    let mut points = Vec::new();
    for row in &rows {
        if let Some(line) = line_from_geojson(&row.route_geojson) {
            points.extend(densify(&line, step_m));
        }
    }
    Json(points)
}

/// Station layer for the map: the configured GBFS feed when it yields
/// anything, else the built-in sample set.
async fn list_stations(State(state): State<AppState>) -> Json<StationsResponse> {
    if let Some(url) = &state.gbfs_url {
        let stations = fetch_gbfs_stations(&state.http, url).await;
        if !stations.is_empty() {
            return Json(StationsResponse {
                stations,
                source: url.clone(),
            });
        }
    }
    Json(StationsResponse {
        stations: sample_stations(),
        source: "sample".to_string(),
    })
}

/// Parse an uploaded stations table. An unusable upload degrades to the
/// sample set, mirroring the feed path.
async fn upload_stations_csv(body: Bytes) -> Json<StationsResponse> {
    let stations = parse_stations_csv(&body);
    if stations.is_empty() {
        return Json(StationsResponse {
            stations: sample_stations(),
            source: "sample".to_string(),
        });
    }
    Json(StationsResponse {
        stations,
        source: "csv".to_string(),
    })
}
