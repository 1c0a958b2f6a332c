#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectParams, DetectorBackend};
use crate::detect::nms;
use crate::detect::result::{BoxXyxy, RawDetection};

/// Gray used by YOLO-style letterboxing.
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// Boxes narrower or shorter than this many source pixels are discarded.
const MIN_BOX_SIDE_PX: f32 = 1.0;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract-based backend for a single-class YOLOv8-style ONNX export.
///
/// The model takes a square `1x3xSxS` RGB tensor in `[0, 1]` and returns either
/// `[1, 4 + C, N]` or `[1, N, 4 + C]` rows of `cx, cy, w, h, class scores...` in input pixels.
/// Inference on the optimized plan is reentrant, so no lock is held across calls.
pub struct TractBackend {
    model: Plan,
    input_size: u32,
}

#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    fn build_input(&self, image: &RgbImage) -> Result<(Tensor, Letterbox)> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot run detection on an empty {}x{} image", width, height));
        }

        let size = self.input_size;
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
        let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let pad_x = (size - new_w) / 2;
        let pad_y = (size - new_h) / 2;
        let side = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            let (x, y) = (x as u32, y as u32);
            if x < pad_x || y < pad_y || x >= pad_x + new_w || y >= pad_y + new_h {
                LETTERBOX_FILL
            } else {
                resized.get_pixel(x - pad_x, y - pad_y)[channel] as f32 / 255.0
            }
        });

        Ok((
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }

    fn decode_output(
        &self,
        outputs: TVec<TValue>,
        letterbox: Letterbox,
        image: &RgbImage,
        params: DetectParams,
    ) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output must be a rank-3 tensor")?;

        let shape = view.shape();
        if shape[0] != 1 {
            return Err(anyhow!("expected batch size 1, model returned {}", shape[0]));
        }
        // Anchors always outnumber features for YOLO heads.
        let transposed = shape[1] > shape[2];
        let (features, anchors) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if features < 5 {
            return Err(anyhow!(
                "model output has {} features per anchor, need at least 5",
                features
            ));
        }
        let at = |anchor: usize, feature: usize| {
            if transposed {
                view[[0, anchor, feature]]
            } else {
                view[[0, feature, anchor]]
            }
        };

        let (width, height) = image.dimensions();
        let (max_x, max_y) = (width as f32, height as f32);
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let score = (4..features)
                .map(|feature| at(anchor, feature))
                .fold(f32::NEG_INFINITY, f32::max);
            if !score.is_finite() || score < params.confidence {
                continue;
            }

            let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
            if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
                continue;
            }
            if w <= 0.0 || h <= 0.0 {
                continue;
            }

            let x1 = ((cx - w / 2.0 - letterbox.pad_x) / letterbox.scale).clamp(0.0, max_x);
            let y1 = ((cy - h / 2.0 - letterbox.pad_y) / letterbox.scale).clamp(0.0, max_y);
            let x2 = ((cx + w / 2.0 - letterbox.pad_x) / letterbox.scale).clamp(0.0, max_x);
            let y2 = ((cy + h / 2.0 - letterbox.pad_y) / letterbox.scale).clamp(0.0, max_y);
            if x2 - x1 < MIN_BOX_SIDE_PX || y2 - y1 < MIN_BOX_SIDE_PX {
                continue;
            }

            candidates.push(RawDetection::from_xyxy(
                score,
                BoxXyxy::new(x1, y1, x2, y2),
                width,
                height,
            ));
        }

        log::debug!(
            "tract backend: {} candidates above confidence {:.2}",
            candidates.len(),
            params.confidence
        );
        Ok(nms::postprocess(candidates, params.confidence, params.iou))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, image: &RgbImage, params: DetectParams) -> Result<Vec<RawDetection>> {
        let (input, letterbox) = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_output(outputs, letterbox, image, params)
    }

    fn warm_up(&self) -> Result<()> {
        let side = self.input_size;
        self.detect(
            &RgbImage::new(side, side),
            DetectParams {
                confidence: 1.0,
                iou: 0.5,
            },
        )
        .map(|_| ())
        .context("tract warm-up inference failed")
    }
}
