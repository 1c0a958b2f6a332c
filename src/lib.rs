//! Barcode locator
//!
//! This crate turns an uploaded image into a list of barcode regions with their decoded
//! payloads.
//!
//! # Architecture
//!
//! A request flows through four stages, each a plain function of its inputs:
//!
//! 1. **Detect**: a [`DetectorBackend`] proposes candidate regions (confidence gate and
//!    overlap suppression happen inside the backend).
//! 2. **Filter**: regions covering too much of the image are discarded.
//! 3. **Decode**: each surviving region is cropped and scanned for a symbol; failures are
//!    contained to that region.
//! 4. **Assemble**: records, count and the applied thresholds form the response.
//!
//! The only long-lived shared state is the loaded detector and the thresholds, both
//! read-only once the [`Pipeline`] is built.
//!
//! # Module Structure
//!
//! - `detect`: detector contract, overlap suppression, backends (stub, tract)
//! - `filter`: maximum-relative-area policy
//! - `decode`: intensity conversion and symbol readers (QR, EAN, Code 128, Code 39, I25)
//! - `pipeline`: orchestration and cropping
//! - `response`: wire types
//! - `config`: startup configuration
//! - `api`: HTTP boundary

pub mod api;
pub mod config;
pub mod decode;
pub mod detect;
pub mod filter;
pub mod pipeline;
pub mod response;

pub use config::{DetectorSettings, ServiceConfig};
pub use decode::{BarcodeDecoder, BarcodeResult, DecodeOutcome, Symbology};
pub use detect::{load_backend, DetectParams, DetectorBackend, RawDetection, StubBackend};
pub use filter::{filter_by_area, FilteredDetection};
pub use pipeline::{Pipeline, Thresholds};
pub use response::{AppliedThresholds, DetectionRecord, ResponseEnvelope};

/// Decode an uploaded file into the RGB buffer the pipeline consumes.
pub fn decode_upload(bytes: &[u8]) -> anyhow::Result<image::RgbImage> {
    use anyhow::Context;

    let image = image::load_from_memory(bytes).context("unsupported or corrupt image upload")?;
    Ok(image.to_rgb8())
}
