use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }
}

/// One sharing-bike station shown on the map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

/// Demographic and free-text answers collected in the sidebar form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyAnswers {
    pub age_group: String,
    pub role: String,
    pub commute_freq: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: String,
}

/// A freehand polyline from the draw tool. The axis order of each pair
/// is ambiguous (lat/lon vs. lon/lat); the backend normalizes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapRequest {
    pub coordinates: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapResponse {
    pub geometry: Vec<Coordinate>,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub answers: SurveyAnswers,
    #[serde(default)]
    pub consent: bool,
    /// Provenance of the station layer the respondent saw: a GBFS URL,
    /// "csv" for an uploaded table, or "sample" for the built-in set.
    #[serde(default = "default_station_source")]
    pub station_source: String,
}

pub fn default_station_source() -> String {
    "sample".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub written: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreated {
    pub respondent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub routes: usize,
    pub has_preview: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsResponse {
    pub stations: Vec<Station>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}
