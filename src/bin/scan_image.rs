//! scan_image - run the barcode pipeline on one image file and print the JSON response

use anyhow::{Context, Result};
use clap::Parser;
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;

use barcode_locator::pipeline::crop_region;
use barcode_locator::{
    decode_upload, filter_by_area, load_backend, BarcodeDecoder, Pipeline, ServiceConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image file to scan.
    image: PathBuf,
    /// Detector backend, overriding configuration (`stub` or `tract`).
    #[arg(long)]
    backend: Option<String>,
    /// ONNX model path, overriding configuration.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Pretty-print the response.
    #[arg(long)]
    pretty: bool,
    /// Also list every symbol found in each region on stderr.
    #[arg(long)]
    all_symbols: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = ServiceConfig::load()?.with_detector_overrides(args.backend, args.model)?;
    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let image = decode_upload(&bytes)?;

    let detector = load_backend(&config.detector)?;
    let pipeline = Pipeline::new(Arc::clone(&detector), config.thresholds)?;
    let envelope = pipeline.run(&image)?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&envelope)?
    } else {
        serde_json::to_string(&envelope)?
    };
    println!("{}", json);

    if args.all_symbols {
        let thresholds = pipeline.thresholds();
        let raw = detector.detect(&image, thresholds.detect_params())?;
        let decoder = BarcodeDecoder::new();
        for (index, region) in filter_by_area(raw, thresholds.max_area).iter().enumerate() {
            let Some(crop) = crop_region(&image, &region.detection.bbox) else {
                eprintln!("region {}: outside image", index);
                continue;
            };
            match decoder.recognize_all(&DynamicImage::ImageRgb8(crop)) {
                Ok(symbols) if symbols.is_empty() => eprintln!("region {}: no symbols", index),
                Ok(symbols) => {
                    for symbol in symbols {
                        eprintln!(
                            "region {}: {} {}",
                            index, symbol.barcode_type, symbol.barcode_number
                        );
                    }
                }
                Err(err) => eprintln!("region {}: decode failed: {:#}", index, err),
            }
        }
    }

    Ok(())
}
