/// Absolute bounding box in source-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxXyxy {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoxXyxy {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn intersection(&self, other: &BoxXyxy) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    /// Intersection over union. Zero when both boxes are degenerate.
    pub fn iou(&self, other: &BoxXyxy) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= f32::EPSILON {
            0.0
        } else {
            inter / union
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Center/size geometry as fractions of the image dimensions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxXywhn {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

/// One candidate region emitted by a detector backend.
///
/// Both geometries describe the same box; the normalized one drives the area policy,
/// the absolute one drives cropping.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub confidence: f32,
    pub bbox: BoxXyxy,
    pub bbox_norm: BoxXywhn,
}

impl RawDetection {
    /// Build from absolute corners, deriving the normalized geometry.
    pub fn from_xyxy(confidence: f32, bbox: BoxXyxy, image_width: u32, image_height: u32) -> Self {
        let iw = image_width.max(1) as f32;
        let ih = image_height.max(1) as f32;
        let bbox_norm = BoxXywhn {
            cx: (bbox.x1 + bbox.x2) / 2.0 / iw,
            cy: (bbox.y1 + bbox.y2) / 2.0 / ih,
            w: bbox.width() / iw,
            h: bbox.height() / ih,
        };
        Self {
            confidence,
            bbox,
            bbox_norm,
        }
    }

    /// Build from normalized center/size, deriving absolute corners.
    pub fn from_normalized(
        confidence: f32,
        bbox_norm: BoxXywhn,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        let iw = image_width as f32;
        let ih = image_height as f32;
        let bbox = BoxXyxy {
            x1: (bbox_norm.cx - bbox_norm.w / 2.0) * iw,
            y1: (bbox_norm.cy - bbox_norm.h / 2.0) * ih,
            x2: (bbox_norm.cx + bbox_norm.w / 2.0) * iw,
            y2: (bbox_norm.cy + bbox_norm.h / 2.0) * ih,
        };
        Self {
            confidence,
            bbox,
            bbox_norm,
        }
    }

    /// Normalized area (`w * h`), the quantity the region filter compares.
    pub fn area_fraction(&self) -> f64 {
        self.bbox_norm.w as f64 * self.bbox_norm.h as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_geometry_follows_absolute_box() {
        let det = RawDetection::from_xyxy(0.9, BoxXyxy::new(10.0, 20.0, 60.0, 40.0), 100, 200);
        assert_eq!(det.bbox_norm.cx, 0.35);
        assert_eq!(det.bbox_norm.cy, 0.15);
        assert_eq!(det.bbox_norm.w, 0.5);
        assert_eq!(det.bbox_norm.h, 0.1);
    }

    #[test]
    fn absolute_geometry_follows_normalized_box() {
        let norm = BoxXywhn {
            cx: 0.5,
            cy: 0.5,
            w: 0.25,
            h: 0.5,
        };
        let det = RawDetection::from_normalized(0.7, norm, 400, 200);
        assert_eq!(det.bbox, BoxXyxy::new(150.0, 50.0, 250.0, 150.0));
        assert_eq!(det.area_fraction(), 0.125);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BoxXyxy::new(0.0, 0.0, 10.0, 10.0);
        let b = BoxXyxy::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(a.iou(&a), 1.0);

        let half = BoxXyxy::new(5.0, 0.0, 15.0, 10.0);
        let iou = a.iou(&half);
        assert!((iou - 50.0 / 150.0).abs() < 1e-6);
    }
}
