// src/main.rs
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bucket_admin::{config::Config, storage::Bucket};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ==== Config & bucket ====
    let cfg = Config::from_env()?;
    let bucket = Bucket::open(&cfg.bucket).await?;

    let app = bucket_admin::router(&cfg, Arc::new(bucket))?;

    // ==== Start server ====
    let listener = TcpListener::bind(&cfg.bind).await?;
    info!("listening on http://{}", cfg.bind);
    axum::serve(listener, app).await?;

    Ok(())
}
