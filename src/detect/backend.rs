use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawDetection;

/// Thresholds handed to a backend for its own post-processing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectParams {
    /// Minimum confidence for a candidate to be emitted at all.
    pub confidence: f32,
    /// Overlap above which two candidates are treated as the same object.
    pub iou: f32,
}

/// Detector backend trait.
///
/// A backend wraps a loaded detection model. The model is read-only after construction,
/// so inference takes `&self` and a single instance is shared across request threads.
/// Backends that wrap a non-reentrant runtime must serialize internally.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB image.
    ///
    /// Returns candidates that passed the confidence gate and overlap suppression, in the
    /// backend's emission order. An `Err` means inference itself failed; it must not be
    /// reported as an empty result.
    fn detect(&self, image: &RgbImage, params: DetectParams) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
