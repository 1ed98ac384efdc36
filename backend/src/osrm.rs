use std::time::Duration;

use serde::Deserialize;
use shared::Coordinate;
use thiserror::Error;

use crate::geometry::path_length_m;

/// Public demo server; fine for a survey MVP.
pub const DEFAULT_BASE_URL: &str = "https://router.project-osrm.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum SnapError {
    #[error("need at least start & end")]
    InsufficientPoints,
    #[error("routing service error: {0}")]
    Service(#[from] reqwest::Error),
    #[error("no route found")]
    NoRouteFound,
    #[error("routing service returned a malformed route: {0}")]
    Malformed(String),
}

/// A street-snapped route as returned by the routing service, plus a
/// reliable length for it.
#[derive(Debug, Clone)]
pub struct SnappedRoute {
    pub geometry: Vec<Coordinate>,
    pub distance_m: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    distance: Option<f64>,
}

/// GeoJSON LineString geometry, coordinates in lon,lat order.
#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Thin client for an OSRM-compatible routing service, cycling profile.
pub struct OsrmClient {
    base_url: String,
    http: reqwest::Client,
}

impl OsrmClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Snap a rough polyline to the street network.
    ///
    /// Exactly one outbound request per invocation, no retries; a
    /// transient failure surfaces immediately and the caller may snap
    /// again. Fewer than two input points fails before any network
    /// traffic.
    pub async fn snap(&self, points: &[Coordinate]) -> Result<SnappedRoute, SnapError> {
        if points.len() < 2 {
            return Err(SnapError::InsufficientPoints);
        }

        let coords = points
            .iter()
            .map(|p| format!("{:.6},{:.6}", p.lon, p.lat))
            .collect::<Vec<_>>()
            .join(";");
        let url = format!("{}/route/v1/cycling/{}", self.base_url, coords);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("overview", "full"),
                ("geometries", "geojson"),
                ("steps", "false"),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let body: OsrmResponse = response.json().await?;
        route_from_response(body)
    }
}

/// Pick the first candidate route and settle its distance.
///
/// When the service omits the distance (or reports a falsy one), the
/// fallback sums geodesic segment lengths over the full returned
/// geometry, skipping no vertex.
fn route_from_response(body: OsrmResponse) -> Result<SnappedRoute, SnapError> {
    let route = body.routes.into_iter().next().ok_or(SnapError::NoRouteFound)?;

    let geometry: Vec<Coordinate> = route
        .geometry
        .coordinates
        .iter()
        .map(|c| Coordinate { lat: c[1], lon: c[0] })
        .collect();
    if geometry.len() < 2 {
        return Err(SnapError::Malformed(format!(
            "geometry has {} point(s)",
            geometry.len()
        )));
    }

    let distance_m = match route.distance {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ => path_length_m(&geometry),
    };

    Ok(SnappedRoute {
        geometry,
        distance_m,
    })
}
