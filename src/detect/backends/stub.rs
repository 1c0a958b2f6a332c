use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{DetectParams, DetectorBackend};
use crate::detect::nms;
use crate::detect::result::RawDetection;

#[derive(Clone, Debug)]
enum Script {
    Detections(Vec<RawDetection>),
    Fail(String),
}

/// Stub backend for tests and model-less deployments.
///
/// Replays a fixed candidate list through the same confidence gate and overlap
/// suppression a model-backed backend applies, or fails every call when scripted to.
#[derive(Clone, Debug)]
pub struct StubBackend {
    script: Script,
}

impl StubBackend {
    /// A backend that never finds anything.
    pub fn new() -> Self {
        Self {
            script: Script::Detections(Vec::new()),
        }
    }

    pub fn with_detections(candidates: Vec<RawDetection>) -> Self {
        Self {
            script: Script::Detections(candidates),
        }
    }

    /// A backend whose every inference call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Script::Fail(message.into()),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, _image: &RgbImage, params: DetectParams) -> Result<Vec<RawDetection>> {
        match &self.script {
            Script::Detections(candidates) => Ok(nms::postprocess(
                candidates.clone(),
                params.confidence,
                params.iou,
            )),
            Script::Fail(message) => Err(anyhow!("stub detector fault: {}", message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoxXyxy;

    const PARAMS: DetectParams = DetectParams {
        confidence: 0.6,
        iou: 0.45,
    };

    #[test]
    fn stub_backend_applies_gate_and_suppression() {
        let image = RgbImage::new(100, 100);
        let backend = StubBackend::with_detections(vec![
            RawDetection::from_xyxy(0.5, BoxXyxy::new(0.0, 0.0, 10.0, 10.0), 100, 100),
            RawDetection::from_xyxy(0.8, BoxXyxy::new(20.0, 20.0, 40.0, 40.0), 100, 100),
            RawDetection::from_xyxy(0.7, BoxXyxy::new(21.0, 21.0, 41.0, 41.0), 100, 100),
        ]);

        let detections = backend.detect(&image, PARAMS).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, 0.8);
    }

    #[test]
    fn stub_backend_failure_is_an_error() {
        let image = RgbImage::new(4, 4);
        let err = StubBackend::failing("boom").detect(&image, PARAMS).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn default_stub_finds_nothing() {
        let image = RgbImage::new(4, 4);
        assert!(StubBackend::default().detect(&image, PARAMS).unwrap().is_empty());
    }
}
