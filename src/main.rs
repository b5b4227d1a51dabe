use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use mobilesam_rs::{server, Config, MobileSam, SegmentationPipeline};
use rayon::ThreadPoolBuilder;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::new();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    ensure!(
        config.encoder_path.exists(),
        "Encoder checkpoint does not exist: {}",
        config.encoder_path.display()
    );
    ensure!(
        config.decoder_path.exists(),
        "Decoder checkpoint does not exist: {}",
        config.decoder_path.display()
    );

    ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()?;

    let model = MobileSam::load(&config).context("Failed to load MobileSAM")?;
    let pipeline = Arc::new(SegmentationPipeline::new(
        model,
        config.max_concurrent_inferences as usize,
    ));
    let app = server::router(
        Arc::clone(&pipeline),
        &config.root_path,
        config.max_upload_bytes(),
    );

    let address = config.bind_address()?;
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(pipeline).ok().and_then(|p| p.shutdown()) {
        Some(model) => model.release(),
        None => warn!("Model still referenced at shutdown, skipping release"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
