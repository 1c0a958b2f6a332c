//! Pipeline orchestrator: detect once, filter by area, decode each surviving region,
//! assemble the response.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::{imageops, DynamicImage, RgbImage};

use crate::decode::{BarcodeDecoder, DecodeOutcome};
use crate::detect::{BoxXyxy, DetectParams, DetectorBackend};
use crate::filter::{filter_by_area, FilteredDetection};
use crate::response::{DetectionRecord, ResponseEnvelope};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.60;
pub const DEFAULT_IOU_THRESHOLD: f64 = 0.45;
pub const DEFAULT_MAX_AREA: f64 = 0.20;

/// The three policy values. Fixed for the lifetime of a [`Pipeline`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Minimum detector confidence for a region to exist at all.
    pub confidence: f64,
    /// Overlap-suppression threshold handed to the detector.
    pub iou: f64,
    /// Regions covering this fraction of the image or more are discarded.
    pub max_area: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            iou: DEFAULT_IOU_THRESHOLD,
            max_area: DEFAULT_MAX_AREA,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence
            ));
        }
        if !(0.0..=1.0).contains(&self.iou) {
            return Err(anyhow!("iou threshold must be within [0, 1], got {}", self.iou));
        }
        if !(self.max_area > 0.0 && self.max_area <= 1.0) {
            return Err(anyhow!(
                "max area must be within (0, 1], got {}",
                self.max_area
            ));
        }
        Ok(())
    }

    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            confidence: self.confidence as f32,
            iou: self.iou as f32,
        }
    }
}

/// Detection-to-decode pipeline.
///
/// Holds the shared detector, the decoder and the thresholds. Nothing is mutated by a run,
/// so one instance serves concurrent requests behind an `Arc`.
pub struct Pipeline {
    detector: Arc<dyn DetectorBackend>,
    decoder: BarcodeDecoder,
    thresholds: Thresholds,
}

impl Pipeline {
    pub fn new(detector: Arc<dyn DetectorBackend>, thresholds: Thresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self {
            detector,
            decoder: BarcodeDecoder::new(),
            thresholds,
        })
    }

    pub fn with_decoder(mut self, decoder: BarcodeDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Run with the configured thresholds.
    pub fn run(&self, image: &RgbImage) -> Result<ResponseEnvelope> {
        self.run_with(image, &self.thresholds)
    }

    /// Run with explicit thresholds.
    ///
    /// A detector failure is returned as `Err`; it is never turned into an empty response.
    /// Region decode failures only blank that region's `barcode_data`.
    pub fn run_with(&self, image: &RgbImage, thresholds: &Thresholds) -> Result<ResponseEnvelope> {
        let raw = self
            .detector
            .detect(image, thresholds.detect_params())
            .with_context(|| format!("detector '{}' failed", self.detector.name()))?;
        let raw_count = raw.len();

        let regions = filter_by_area(raw, thresholds.max_area);
        log::debug!(
            "{}x{} image: {} detections, {} within area limit",
            image.width(),
            image.height(),
            raw_count,
            regions.len()
        );

        let detections = regions
            .iter()
            .enumerate()
            .map(|(index, region)| {
                let outcome = self.decode_region(image, region);
                if let DecodeOutcome::Failed(err) = &outcome {
                    log::warn!("region {} decode failed: {:#}", index, err);
                }
                DetectionRecord::new(region, outcome.into_result(), thresholds.max_area)
            })
            .collect();

        Ok(ResponseEnvelope::new(detections, thresholds))
    }

    fn decode_region(&self, image: &RgbImage, region: &FilteredDetection) -> DecodeOutcome {
        match crop_region(image, &region.detection.bbox) {
            Some(crop) => self.decoder.decode(&DynamicImage::ImageRgb8(crop)),
            None => DecodeOutcome::Failed(anyhow!(
                "region {:?} lies outside the {}x{} image",
                region.detection.bbox.as_array(),
                image.width(),
                image.height()
            )),
        }
    }
}

/// Integer crop rectangle `(x, y, width, height)` for a box.
///
/// Corners are truncated toward zero and clamped to the image; `None` when nothing of
/// the box remains inside it.
pub fn crop_bounds(bbox: &BoxXyxy, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let clamp = |value: f32, max: u32| (value.trunc() as i64).clamp(0, max as i64) as u32;
    let (x1, x2) = (clamp(bbox.x1, width), clamp(bbox.x2, width));
    let (y1, y2) = (clamp(bbox.y1, height), clamp(bbox.y2, height));
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

pub fn crop_region(image: &RgbImage, bbox: &BoxXyxy) -> Option<RgbImage> {
    let (x, y, w, h) = crop_bounds(bbox, image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}
