use geo::{Distance, Geodesic, Point};
use serde::{Deserialize, Serialize};
use shared::Coordinate;

/// Geodesic distance between two WGS84 coordinates, in meters.
///
/// Uses the ellipsoidal model (Karney's algorithm via the `geo` crate)
/// rather than a spherical haversine, so short urban segments come out
/// accurate. Every cumulative path length in this crate goes through
/// this function, which keeps the preview distance and the distance
/// recomputed at submission in agreement.
pub fn geodesic_distance(a: Coordinate, b: Coordinate) -> f64 {
    Geodesic::distance(Point::new(a.lon, a.lat), Point::new(b.lon, b.lat))
}

/// Total length of a path in meters, summed over every consecutive
/// pair of points. Empty and single-point paths are 0.0.
pub fn path_length_m(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|w| geodesic_distance(w[0], w[1])).sum()
}

/// Resample a line at a fixed arc-length spacing for heatmap rendering.
///
/// For each consecutive pair the segment emits `max(1, floor(L / step_m))`
/// points, linearly interpolated in lat/lon at t = k/n. The final
/// endpoint of the last segment is never emitted, and a segment shorter
/// than `step_m` (even zero-length) still emits its start point.
/// `step_m` must be positive.
pub fn densify(line: &[Coordinate], step_m: f64) -> Vec<Coordinate> {
    let mut points = Vec::new();
    for pair in line.windows(2) {
        let seg_m = geodesic_distance(pair[0], pair[1]);
        let n = ((seg_m / step_m).floor() as usize).max(1);
        for k in 0..n {
            let t = k as f64 / n as f64;
            points.push(pair[0].interpolate(pair[1], t));
        }
    }
    points
}

#[derive(Debug, Serialize, Deserialize)]
struct GeoJsonLineString {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<[f64; 2]>,
}

/// Serialize a path as GeoJSON LineString text (lon,lat order on the wire).
pub fn line_to_geojson(line: &[Coordinate]) -> String {
    let geometry = GeoJsonLineString {
        kind: "LineString".to_string(),
        coordinates: line.iter().map(|p| [p.lon, p.lat]).collect(),
    };
    serde_json::to_value(geometry)
        .map(|v| v.to_string())
        .unwrap_or_default()
}

/// Parse GeoJSON LineString text back into a path. Returns `None` for
/// anything that is not a well-formed LineString, so overview consumers
/// can skip bad rows instead of failing.
pub fn line_from_geojson(text: &str) -> Option<Vec<Coordinate>> {
    let geometry: GeoJsonLineString = serde_json::from_str(text).ok()?;
    if geometry.kind != "LineString" {
        return None;
    }
    Some(
        geometry
            .coordinates
            .iter()
            .map(|c| Coordinate { lat: c[1], lon: c[0] })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate { lat, lon }
    }

    #[test]
    fn test_distance_same_point_is_zero() {
        let point = coord(49.4029, 8.6726);
        assert_eq!(geodesic_distance(point, point), 0.0);
    }

    #[test]
    fn test_distance_symmetry() {
        let a = coord(49.4029, 8.6726);
        let b = coord(49.4108, 8.6900);
        let ab = geodesic_distance(a, b);
        let ba = geodesic_distance(b, a);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_distance_known_segment() {
        // One degree of longitude along the equator is ~111.32 km on the
        // WGS84 ellipsoid.
        let d = geodesic_distance(coord(0.0, 0.0), coord(0.0, 1.0));
        assert!((d - 111_319.49).abs() < 10.0);
    }

    #[test]
    fn test_path_length_empty_and_single() {
        assert_eq!(path_length_m(&[]), 0.0);
        assert_eq!(path_length_m(&[coord(45.0, 5.0)]), 0.0);
    }

    #[test]
    fn test_path_length_accumulates_all_segments() {
        let path = vec![coord(0.0, 0.0), coord(0.0, 0.001), coord(0.0, 0.002)];
        let total = path_length_m(&path);
        let first = geodesic_distance(path[0], path[1]);
        let second = geodesic_distance(path[1], path[2]);
        assert!((total - (first + second)).abs() < 1e-9);
    }

    #[test]
    fn test_densify_hundred_meter_segment() {
        // ~100.2 m along the equator; step 30 gives floor(100.2/30) = 3
        // samples at t = 0, 1/3, 2/3.
        let a = coord(0.0, 0.0);
        let b = coord(0.0, 0.0009);
        let points = densify(&[a, b], 30.0);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], a);
        assert!(points.iter().all(|p| *p != b));
    }

    #[test]
    fn test_densify_zero_length_segment() {
        let a = coord(49.4029, 8.6726);
        let points = densify(&[a, a], 30.0);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0], a);
    }

    #[test]
    fn test_densify_short_segment_still_emits_start() {
        let a = coord(49.4029, 8.6726);
        let b = coord(49.40291, 8.67261);
        let points = densify(&[a, b], 30.0);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0], a);
    }

    #[test]
    fn test_densify_preserves_segment_order() {
        let line = vec![
            coord(0.0, 0.0),
            coord(0.0, 0.0009),
            coord(0.0, 0.0018),
        ];
        let points = densify(&line, 30.0);
        assert_eq!(points.len(), 6);
        for pair in points.windows(2) {
            assert!(pair[0].lon <= pair[1].lon);
        }
    }

    #[test]
    fn test_geojson_round_trip() {
        let line = vec![coord(49.40, 8.67), coord(49.41, 8.69)];
        let text = line_to_geojson(&line);
        assert!(text.contains("\"LineString\""));
        let parsed = line_from_geojson(&text).expect("round trip");
        assert_eq!(parsed, line);
    }

    #[test]
    fn test_geojson_rejects_non_linestring() {
        assert!(line_from_geojson("{\"type\":\"Point\",\"coordinates\":[8.67,49.4]}").is_none());
        assert!(line_from_geojson("not json").is_none());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn valid_coord() -> impl Strategy<Value = Coordinate> {
            (-90.0..=90.0, -180.0..=180.0).prop_map(|(lat, lon)| Coordinate { lat, lon })
        }

        proptest! {
            #[test]
            fn prop_distance_non_negative(a in valid_coord(), b in valid_coord()) {
                prop_assert!(geodesic_distance(a, b) >= 0.0);
            }

            #[test]
            fn prop_distance_symmetric(a in valid_coord(), b in valid_coord()) {
                let ab = geodesic_distance(a, b);
                let ba = geodesic_distance(b, a);
                prop_assert!((ab - ba).abs() < 1e-6);
            }

            #[test]
            fn prop_distance_same_point_is_zero(coord in valid_coord()) {
                prop_assert_eq!(geodesic_distance(coord, coord), 0.0);
            }

            #[test]
            fn prop_densify_never_skips_segments(
                line in prop::collection::vec(
                    (49.0..49.05, 8.6..8.65).prop_map(|(lat, lon)| Coordinate { lat, lon }),
                    2..8,
                ),
                step in 20.0f64..500.0
            ) {
                let points = densify(&line, step);
                // One sample minimum per segment, even zero-length ones.
                prop_assert!(points.len() >= line.len() - 1);
            }
        }
    }
}
