use axum::{routing::get, serve, Router};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use notehub::api;
use notehub_core::auth::{DenyAllVerifier, Hs256Verifier, TokenVerifier};
use notehub_core::store::Store;

#[derive(Parser)]
#[command(about = "Page and record-collection server with versioning and sharing")]
struct Args {
    /// Directory holding pages, databases, versions and permission rows.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,
    /// HS256 secret for bearer tokens. Without it only the X-User-Id
    /// header identity path is available.
    #[arg(long, env = "NOTEHUB_JWT_SECRET")]
    jwt_secret: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let store = Arc::new(RwLock::new(Store::open(&args.data_dir)?));
    let verifier: Arc<dyn TokenVerifier> = match args.jwt_secret {
        Some(secret) => Arc::new(Hs256Verifier::new(secret)),
        None => Arc::new(DenyAllVerifier),
    };

    let app = Router::new()
        .merge(api::router(store, verifier))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&args.addr).await?;
    info!(addr = %args.addr, data_dir = %args.data_dir.display(), "listening");
    serve(listener, app.into_make_service()).await?;
    Ok(())
}
