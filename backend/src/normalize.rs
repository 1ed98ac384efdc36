use shared::Coordinate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("coordinate pair {index} has {len} component(s), need at least 2")]
    TruncatedPair { index: usize, len: usize },
    #[error("coordinate pair {index} contains a non-finite value")]
    NonFinite { index: usize },
}

/// Decide the axis order of one raw pair from the draw tool and return
/// a canonical (lat, lon) coordinate.
///
/// Rule: a value with |x| > 90 cannot be a latitude, so the pair is
/// read as (lon, lat) and swapped; otherwise it is taken as (lat, lon)
/// unchanged. Pairs where both values fit in [-90, 90] are genuinely
/// ambiguous and pass through unswapped; that limitation lives entirely
/// behind this function so an explicit axis tag from the drawing source
/// can replace the heuristic later without touching callers.
///
/// Extra components (a GeoJSON altitude, say) are ignored.
pub fn normalize_pair(index: usize, raw: &[f64]) -> Result<Coordinate, InputError> {
    let (x, y) = match raw {
        [x, y, ..] => (*x, *y),
        _ => {
            return Err(InputError::TruncatedPair {
                index,
                len: raw.len(),
            })
        }
    };
    if !x.is_finite() || !y.is_finite() {
        return Err(InputError::NonFinite { index });
    }
    if x.abs() > 90.0 {
        Ok(Coordinate { lat: y, lon: x })
    } else {
        Ok(Coordinate { lat: x, lon: y })
    }
}

/// Apply [`normalize_pair`] pointwise, preserving input order.
pub fn normalize_path(raw: &[Vec<f64>]) -> Result<Vec<Coordinate>, InputError> {
    raw.iter()
        .enumerate()
        .map(|(index, pair)| normalize_pair(index, pair))
        .collect()
}
