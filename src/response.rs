//! Response contract: the JSON shape returned for every successful pipeline run.

use serde::{Deserialize, Serialize};

use crate::decode::BarcodeResult;
use crate::filter::FilteredDetection;
use crate::pipeline::Thresholds;

/// Label attached to every reported region.
pub const DETECTION_LABEL: &str = "barcode";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Absolute `[x1, y1, x2, y2]` as emitted by the detector.
    pub bbox: [f32; 4],
    /// Rounded to 3 decimals.
    pub confidence: f64,
    /// Percentage of the image (0-100), rounded to 2 decimals.
    pub area_pct: f64,
    pub label: String,
    pub barcode_data: Option<BarcodeResult>,
}

impl DetectionRecord {
    pub fn new(
        region: &FilteredDetection,
        barcode_data: Option<BarcodeResult>,
        max_area: f64,
    ) -> Self {
        Self {
            bbox: region.detection.bbox.as_array(),
            confidence: round_to(region.detection.confidence as f64, 3),
            area_pct: report_area_pct(region.area_pct, max_area),
            label: DETECTION_LABEL.to_string(),
            barcode_data,
        }
    }
}

/// Policy values a response was produced under.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedThresholds {
    pub confidence: f64,
    pub iou: f64,
    pub max_area_filter: f64,
}

impl From<&Thresholds> for AppliedThresholds {
    fn from(thresholds: &Thresholds) -> Self {
        Self {
            confidence: thresholds.confidence,
            iou: thresholds.iou,
            max_area_filter: thresholds.max_area,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub count: usize,
    pub detections: Vec<DetectionRecord>,
    pub applied_thresholds: AppliedThresholds,
}

impl ResponseEnvelope {
    /// `count` is always derived from `detections`.
    pub fn new(detections: Vec<DetectionRecord>, thresholds: &Thresholds) -> Self {
        Self {
            count: detections.len(),
            detections,
            applied_thresholds: thresholds.into(),
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Area as a two-decimal percentage that stays strictly below `max_area * 100`.
///
/// Plain rounding can carry a value just under the limit onto it (19.996 -> 20.0); such
/// values are reported as the largest two-decimal percentage below the limit instead.
pub fn report_area_pct(area_fraction: f64, max_area: f64) -> f64 {
    let limit = max_area * 100.0;
    let rounded = round_to(area_fraction * 100.0, 2);
    if rounded < limit {
        rounded
    } else {
        ((limit * 100.0).ceil() - 1.0) / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_to(0.87349, 3), 0.873);
        assert_eq!(round_to(0.8735001, 3), 0.874);
        assert_eq!(round_to(5.000000074505806, 2), 5.0);
    }

    #[test]
    fn area_pct_never_rounds_onto_the_limit() {
        assert_eq!(report_area_pct(0.05, 0.2), 5.0);
        assert_eq!(report_area_pct(0.19996, 0.2), 19.99);
        assert_eq!(report_area_pct(0.199949, 0.2), 19.99);
        assert_eq!(report_area_pct(0.12344, 0.12345), 12.34);
    }

    #[test]
    fn envelope_serializes_field_exact() {
        let envelope = ResponseEnvelope::new(Vec::new(), &Thresholds::default());
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "count": 0,
                "detections": [],
                "applied_thresholds": {
                    "confidence": 0.6,
                    "iou": 0.45,
                    "max_area_filter": 0.2
                }
            })
        );
    }
}
