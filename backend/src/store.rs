// Route store - one append-only row per submitted route.
// Two interchangeable backends: a local CSV file and a remote sheet
// bridge; the pipeline only sees the RouteStore trait.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write route record: {0}")]
    Write(String),
    #[error("failed to read route records: {0}")]
    Read(String),
}

/// The persisted unit: one snapped route plus the respondent's survey
/// answers. Created once at submission time and never mutated after.
///
/// Field order matches the store's header row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRecord {
    pub timestamp_utc: String,
    pub respondent_id: String,
    pub age_group: String,
    pub role: String,
    pub commute_freq: String,
    pub route_index: u32,
    pub route_distance_m: f64,
    pub start_lat: f64,
    pub start_lon: f64,
    pub end_lat: f64,
    pub end_lon: f64,
    pub route_geojson: String,
    pub issues: String,
    pub suggestions: String,
    pub station_source: String,
}

#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Append one record. Must be safe under concurrent writers from
    /// independent sessions.
    async fn append(&self, record: &RouteRecord) -> Result<(), StoreError>;

    /// Read back the full collection for overview rendering.
    async fn load_all(&self) -> Result<Vec<RouteRecord>, StoreError>;
}

/// Flat-file backend: a CSV with a header row, appended in place.
pub struct CsvStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl RouteStore for CsvStore {
    async fn append(&self, record: &RouteRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let write_header = !self.path.exists()
            || self
                .path
                .metadata()
                .map(|m| m.len() == 0)
                .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer
            .serialize(record)
            .map_err(|e| StoreError::Write(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| StoreError::Write(e.to_string()))?;

        tracing::info!(
            "route appended: respondent {} index {}",
            record.respondent_id,
            record.route_index
        );
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<RouteRecord>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader =
            csv::Reader::from_path(&self.path).map_err(|e| StoreError::Read(e.to_string()))?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            let record: RouteRecord = row.map_err(|e| StoreError::Read(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Remote tabular backend: a sheet bridge that accepts one JSON row per
/// POST and returns every row on GET, same field set as the CSV header.
pub struct SheetStore {
    endpoint: String,
    http: reqwest::Client,
}

const SHEET_TIMEOUT: Duration = Duration::from_secs(15);

impl SheetStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn rows_url(&self) -> String {
        format!("{}/rows", self.endpoint)
    }
}

#[async_trait]
impl RouteStore for SheetStore {
    async fn append(&self, record: &RouteRecord) -> Result<(), StoreError> {
        self.http
            .post(self.rows_url())
            .json(record)
            .timeout(SHEET_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StoreError::Write(e.to_string()))?;

        tracing::info!(
            "route appended to sheet: respondent {} index {}",
            record.respondent_id,
            record.route_index
        );
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<RouteRecord>, StoreError> {
        let response = self
            .http
            .get(self.rows_url())
            .timeout(SHEET_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StoreError::Read(e.to_string()))?;
        response
            .json::<Vec<RouteRecord>>()
            .await
            .map_err(|e| StoreError::Read(e.to_string()))
    }
}

/// Pick the backend at startup; everything downstream depends only on
/// the trait.
pub fn select_store(sheet_url: Option<&str>, csv_path: &Path) -> Box<dyn RouteStore> {
    match sheet_url {
        Some(url) => {
            tracing::info!("using sheet store at {url}");
            Box::new(SheetStore::new(url))
        }
        None => {
            tracing::info!("using CSV store at {}", csv_path.display());
            Box::new(CsvStore::new(csv_path))
        }
    }
}
