//! barcode_api - HTTP service for barcode region detection
//!
//! This daemon:
//! 1. Loads configuration (`BARCODE_CONFIG` file, then `BARCODE_*` env overrides)
//! 2. Loads the detector backend once and builds the shared pipeline
//! 3. Serves `/health` and `/detect` until Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use barcode_locator::{
    api::{ApiConfig, ApiServer},
    load_backend, Pipeline, ServiceConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    let detector = load_backend(&config.detector)?;
    let pipeline = Arc::new(Pipeline::new(detector, config.thresholds)?);
    let thresholds = pipeline.thresholds();
    log::info!(
        "pipeline ready: detector={} confidence={} iou={} max_area={}",
        pipeline.detector_name(),
        thresholds.confidence,
        thresholds.iou,
        thresholds.max_area
    );

    let api_config = ApiConfig::from(&config);
    let api_handle = ApiServer::new(api_config, pipeline).spawn()?;
    log::info!("barcode api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("barcode_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
