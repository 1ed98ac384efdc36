use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use backend::{create_router, osrm, osrm::OsrmClient, store::select_store, AppState};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(author, version, about = "Sharing-bike routes survey backend")]
struct Args {
    /// Socket address to bind
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Base URL of the OSRM-compatible routing service
    #[arg(long, env = "OSRM_BASE_URL", default_value = osrm::DEFAULT_BASE_URL)]
    osrm_url: String,

    /// CSV file the default store appends routes to
    #[arg(long, env = "ROUTES_CSV", default_value = "routes_db.csv")]
    routes_csv: PathBuf,

    /// Remote sheet bridge endpoint; set to store rows there instead of
    /// the CSV file
    #[arg(long, env = "SHEET_URL")]
    sheet_url: Option<String>,

    /// GBFS station_information.json URL for the station layer
    #[arg(long, env = "GBFS_URL")]
    gbfs_url: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let store = Arc::from(select_store(args.sheet_url.as_deref(), &args.routes_csv));
    let snapper = OsrmClient::new(&args.osrm_url);
    tracing::info!("routing via {}", args.osrm_url);

    let state = AppState::new(snapper, store, args.gbfs_url);
    let app = create_router(state);

    tracing::info!("starting survey backend on http://{}", args.bind);
    axum::serve(
        tokio::net::TcpListener::bind(args.bind).await.unwrap(),
        app,
    )
    .await
    .unwrap();
}
