use chrono::Utc;
use shared::{Coordinate, SurveyAnswers};
use thiserror::Error;

use crate::geometry::{line_to_geojson, path_length_m};
use crate::store::{RouteRecord, RouteStore, StoreError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("nothing to add; snap a route first")]
    NothingToAdd,
    #[error("consent is required before submitting")]
    ConsentRequired,
    #[error("add at least one route before submitting")]
    EmptyCollection,
    #[error("submission stopped after {written} route(s); already-written routes are kept: {source}")]
    Store {
        written: usize,
        #[source]
        source: StoreError,
    },
}

/// A snapped geometry with its distance, either pending acceptance
/// (preview) or already collected.
#[derive(Debug, Clone)]
pub struct SessionRoute {
    pub geometry: Vec<Coordinate>,
    pub distance_m: f64,
}

/// Per-respondent working state: the accepted routes in arrival order
/// plus at most one pending preview. One of these exists per respondent
/// and is only ever touched by that respondent's discrete actions, so
/// independent sessions cannot interfere.
#[derive(Debug, Clone)]
pub struct Session {
    respondent_id: String,
    routes: Vec<SessionRoute>,
    preview: Option<SessionRoute>,
}

impl Session {
    pub fn new(respondent_id: impl Into<String>) -> Self {
        Self {
            respondent_id: respondent_id.into(),
            routes: Vec::new(),
            preview: None,
        }
    }

    pub fn respondent_id(&self) -> &str {
        &self.respondent_id
    }

    pub fn routes(&self) -> &[SessionRoute] {
        &self.routes
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }

    /// Install a freshly snapped route as the pending preview. A new
    /// snap replaces any existing preview; there is never more than one.
    pub fn set_preview(&mut self, geometry: Vec<Coordinate>, distance_m: f64) {
        self.preview = Some(SessionRoute {
            geometry,
            distance_m,
        });
    }

    /// Promote the pending preview into the collection.
    pub fn accept(&mut self) -> Result<usize, SessionError> {
        let preview = self.preview.take().ok_or(SessionError::NothingToAdd)?;
        self.routes.push(preview);
        Ok(self.routes.len())
    }

    /// Discard the pending preview. A no-op when none exists.
    pub fn clear_preview(&mut self) {
        self.preview = None;
    }

    /// Drop everything: collected routes and preview alike.
    pub fn clear_all(&mut self) {
        self.routes.clear();
        self.preview = None;
    }

    /// Build one record per collected route. All records share a single
    /// submission timestamp and the session's respondent id; the index
    /// is 1-based in collection order. The distance is recomputed from
    /// the stored geometry (rounded to 0.1 m) with the same geodesic
    /// accumulation the preview used.
    fn build_records(&self, answers: &SurveyAnswers, station_source: &str) -> Vec<RouteRecord> {
        let timestamp = Utc::now().to_rfc3339();
        self.routes
            .iter()
            .enumerate()
            .map(|(i, route)| {
                let start = route.geometry[0];
                let end = route.geometry[route.geometry.len() - 1];
                let distance_m = (path_length_m(&route.geometry) * 10.0).round() / 10.0;
                RouteRecord {
                    timestamp_utc: timestamp.clone(),
                    respondent_id: self.respondent_id.clone(),
                    age_group: answers.age_group.clone(),
                    role: answers.role.clone(),
                    commute_freq: answers.commute_freq.clone(),
                    route_index: (i + 1) as u32,
                    route_distance_m: distance_m,
                    start_lat: start.lat,
                    start_lon: start.lon,
                    end_lat: end.lat,
                    end_lon: end.lon,
                    route_geojson: line_to_geojson(&route.geometry),
                    issues: answers.issues.join(";"),
                    suggestions: answers.suggestions.trim().to_string(),
                    station_source: station_source.to_string(),
                }
            })
            .collect()
    }

    /// Persist every collected route, sequentially and in index order.
    ///
    /// Consent gates the whole submission; an empty collection writes
    /// nothing. Persistence is best-effort: if the store fails partway,
    /// already-written rows stay written, the remaining routes are not
    /// attempted, and the error reports how many rows made it. The
    /// collection itself is left untouched.
    pub async fn submit(
        &self,
        answers: &SurveyAnswers,
        consent: bool,
        station_source: &str,
        store: &dyn RouteStore,
    ) -> Result<usize, SessionError> {
        if !consent {
            return Err(SessionError::ConsentRequired);
        }
        if self.routes.is_empty() {
            return Err(SessionError::EmptyCollection);
        }

        let records = self.build_records(answers, station_source);
        let mut written = 0;
        for record in &records {
            store
                .append(record)
                .await
                .map_err(|source| SessionError::Store { written, source })?;
            written += 1;
        }

        tracing::info!(
            "submission complete: respondent {} wrote {} route(s)",
            self.respondent_id,
            written
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MemoryStore {
        rows: Mutex<Vec<RouteRecord>>,
        fail_after: Option<usize>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                fail_after: None,
            }
        }

        fn failing_after(n: usize) -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                fail_after: Some(n),
            }
        }

        fn rows(&self) -> Vec<RouteRecord> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RouteStore for MemoryStore {
        async fn append(&self, record: &RouteRecord) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(limit) = self.fail_after {
                if rows.len() >= limit {
                    return Err(StoreError::Write("sheet unavailable".to_string()));
                }
            }
            rows.push(record.clone());
            Ok(())
        }

        async fn load_all(&self) -> Result<Vec<RouteRecord>, StoreError> {
            Ok(self.rows())
        }
    }

    fn answers() -> SurveyAnswers {
        SurveyAnswers {
            age_group: "25–34".to_string(),
            role: "Commuter".to_string(),
            commute_freq: "Weekly".to_string(),
            issues: vec!["Safety".to_string(), "Parking".to_string()],
            suggestions: "  more racks  ".to_string(),
        }
    }

    fn line(offset: f64) -> Vec<Coordinate> {
        vec![
            Coordinate { lat: 49.4029 + offset, lon: 8.6726 },
            Coordinate { lat: 49.4070 + offset, lon: 8.6800 },
            Coordinate { lat: 49.4108 + offset, lon: 8.6900 },
        ]
    }

    #[test]
    fn test_accept_without_preview_fails_and_changes_nothing() {
        let mut session = Session::new("r-1");
        assert!(matches!(session.accept(), Err(SessionError::NothingToAdd)));
        assert!(session.routes().is_empty());
    }

    #[test]
    fn test_second_snap_replaces_preview() {
        let mut session = Session::new("r-1");
        session.set_preview(line(0.0), 100.0);
        session.set_preview(line(0.1), 200.0);
        assert!(session.has_preview());
        assert!(session.routes().is_empty());

        session.accept().unwrap();
        assert_eq!(session.routes().len(), 1);
        assert_eq!(session.routes()[0].distance_m, 200.0);
        assert!(!session.has_preview());
    }

    #[test]
    fn test_clear_preview_is_idempotent() {
        let mut session = Session::new("r-1");
        session.clear_preview();
        session.set_preview(line(0.0), 100.0);
        session.clear_preview();
        assert!(!session.has_preview());
        session.clear_preview();
    }

    #[test]
    fn test_clear_all_drops_routes_and_preview() {
        let mut session = Session::new("r-1");
        session.set_preview(line(0.0), 100.0);
        session.accept().unwrap();
        session.set_preview(line(0.1), 200.0);
        session.clear_all();
        assert!(session.routes().is_empty());
        assert!(!session.has_preview());
    }

    #[tokio::test]
    async fn test_submit_without_consent_writes_nothing() {
        let store = MemoryStore::new();
        let mut session = Session::new("r-1");
        session.set_preview(line(0.0), 100.0);
        session.accept().unwrap();

        let result = session.submit(&answers(), false, "sample", &store).await;
        assert!(matches!(result, Err(SessionError::ConsentRequired)));
        assert!(store.rows().is_empty());

        // Consent is checked before the collection, so an empty session
        // without consent also reports ConsentRequired.
        let empty = Session::new("r-2");
        let result = empty.submit(&answers(), false, "sample", &store).await;
        assert!(matches!(result, Err(SessionError::ConsentRequired)));
    }

    #[tokio::test]
    async fn test_submit_empty_collection_writes_nothing() {
        let store = MemoryStore::new();
        let session = Session::new("r-1");
        let result = session.submit(&answers(), true, "sample", &store).await;
        assert!(matches!(result, Err(SessionError::EmptyCollection)));
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_submit_two_routes_end_to_end() {
        let store = MemoryStore::new();
        let mut session = Session::new("r-1");
        session.set_preview(line(0.0), 100.0);
        session.accept().unwrap();
        session.set_preview(line(0.1), 200.0);
        session.accept().unwrap();

        let written = session
            .submit(&answers(), true, "gbfs:https://example.test/gbfs.json", &store)
            .await
            .unwrap();
        assert_eq!(written, 2);

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].route_index, 1);
        assert_eq!(rows[1].route_index, 2);
        assert_eq!(rows[0].timestamp_utc, rows[1].timestamp_utc);
        assert_eq!(rows[0].respondent_id, "r-1");
        assert_eq!(rows[1].respondent_id, "r-1");

        // Start/end mirror each route's own geometry.
        let first = line(0.0);
        assert_eq!(rows[0].start_lat, first[0].lat);
        assert_eq!(rows[0].start_lon, first[0].lon);
        assert_eq!(rows[0].end_lat, first[2].lat);
        assert_eq!(rows[0].end_lon, first[2].lon);

        // Distance is recomputed from the geometry, 0.1 m granularity.
        let expected = (path_length_m(&first) * 10.0).round() / 10.0;
        assert_eq!(rows[0].route_distance_m, expected);

        assert_eq!(rows[0].issues, "Safety;Parking");
        assert_eq!(rows[0].suggestions, "more racks");
        assert_eq!(rows[0].station_source, "gbfs:https://example.test/gbfs.json");
        assert!(rows[0].route_geojson.contains("LineString"));
    }

    #[tokio::test]
    async fn test_partial_write_keeps_written_rows() {
        let store = MemoryStore::failing_after(1);
        let mut session = Session::new("r-1");
        for offset in [0.0, 0.1, 0.2] {
            session.set_preview(line(offset), 100.0);
            session.accept().unwrap();
        }

        let result = session.submit(&answers(), true, "sample", &store).await;
        match result {
            Err(SessionError::Store { written, .. }) => assert_eq!(written, 1),
            other => panic!("expected store error, got {other:?}"),
        }

        // Best effort: the first row stays written, the rest were never
        // attempted, and the session still holds all three routes.
        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].route_index, 1);
        assert_eq!(session.routes().len(), 3);
    }
}
