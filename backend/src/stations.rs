use std::time::Duration;

use serde::Deserialize;
use shared::Station;

const FEED_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimal fallback set (Heidelberg Nextbike) so the map never renders
/// empty when no feed and no upload are available.
pub fn sample_stations() -> Vec<Station> {
    vec![
        Station { name: "Hbf Süd".to_string(), lat: 49.4029, lon: 8.6726 },
        Station { name: "Bismarckplatz".to_string(), lat: 49.4108, lon: 8.6900 },
        Station { name: "Universitätsplatz".to_string(), lat: 49.4148, lon: 8.7078 },
    ]
}

#[derive(Debug, Deserialize)]
struct GbfsFeed {
    data: GbfsData,
}

#[derive(Debug, Default, Deserialize)]
struct GbfsData {
    #[serde(default)]
    stations: Vec<GbfsStation>,
}

/// GBFS publishers disagree on field names; accept both spellings.
#[derive(Debug, Deserialize)]
struct GbfsStation {
    #[serde(default, alias = "station_name")]
    name: Option<String>,
    #[serde(default, alias = "latitude")]
    lat: Option<f64>,
    #[serde(default, alias = "longitude")]
    lon: Option<f64>,
}

fn stations_from_feed(feed: GbfsFeed) -> Vec<Station> {
    feed.data
        .stations
        .into_iter()
        .filter_map(|s| {
            // Entries without coordinates cannot be placed on the map.
            let lat = s.lat?;
            let lon = s.lon?;
            Some(Station {
                name: s.name.unwrap_or_else(|| "Station".to_string()),
                lat,
                lon,
            })
        })
        .collect()
}

/// Fetch a GBFS `station_information` feed. Any failure degrades to an
/// empty list with a warning; the caller falls back to other sources.
pub async fn fetch_gbfs_stations(client: &reqwest::Client, url: &str) -> Vec<Station> {
    match try_fetch_gbfs(client, url).await {
        Ok(stations) => {
            tracing::info!("loaded {} GBFS stations from {url}", stations.len());
            stations
        }
        Err(e) => {
            tracing::warn!("could not load GBFS stations from {url}: {e}");
            Vec::new()
        }
    }
}

async fn try_fetch_gbfs(client: &reqwest::Client, url: &str) -> Result<Vec<Station>, reqwest::Error> {
    let feed: GbfsFeed = client
        .get(url)
        .timeout(FEED_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(stations_from_feed(feed))
}

/// Parse an uploaded stations table. The table must carry `name,lat,lon`
/// columns; anything else degrades to an empty list with a warning.
pub fn parse_stations_csv(bytes: &[u8]) -> Vec<Station> {
    match try_parse_stations_csv(bytes) {
        Ok(stations) => stations,
        Err(e) => {
            tracing::warn!("station CSV must have columns name,lat,lon: {e}");
            Vec::new()
        }
    }
}

fn try_parse_stations_csv(bytes: &[u8]) -> Result<Vec<Station>, csv::Error> {
    let mut reader = csv::Reader::from_reader(bytes);
    reader.deserialize().collect()
}
