use crate::detect::result::RawDetection;

/// Drop candidates below the confidence floor.
///
/// The floor is a minimum: a score equal to it is kept, so a configured `0.60` admits a
/// `0.60` candidate. Non-finite scores never pass.
pub fn confidence_gate(candidates: Vec<RawDetection>, confidence: f32) -> Vec<RawDetection> {
    candidates
        .into_iter()
        .filter(|det| det.confidence.is_finite() && det.confidence >= confidence)
        .collect()
}

/// Greedy non-maximum suppression.
///
/// Candidates are visited in descending confidence order; a candidate is dropped when its
/// IoU with any already-kept box is strictly greater than `iou_threshold`. The output is in
/// descending confidence order, which is the emission order callers observe.
pub fn non_max_suppression(
    mut candidates: Vec<RawDetection>,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let duplicate = kept
            .iter()
            .any(|existing| existing.bbox.iou(&candidate.bbox) > iou_threshold);
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// Confidence gate followed by overlap suppression, the post-processing every backend applies.
pub fn postprocess(
    candidates: Vec<RawDetection>,
    confidence: f32,
    iou_threshold: f32,
) -> Vec<RawDetection> {
    non_max_suppression(confidence_gate(candidates, confidence), iou_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoxXyxy;

    fn det(confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> RawDetection {
        RawDetection::from_xyxy(confidence, BoxXyxy::new(x1, y1, x2, y2), 100, 100)
    }

    #[test]
    fn nms_empty() {
        assert!(non_max_suppression(vec![], 0.45).is_empty());
    }

    #[test]
    fn nms_suppresses_overlapping_lower_score() {
        let kept = non_max_suppression(
            vec![
                det(0.7, 0.0, 0.0, 10.0, 10.0),
                det(0.9, 1.0, 1.0, 11.0, 11.0),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_keeps_disjoint_boxes_in_score_order() {
        let kept = non_max_suppression(
            vec![
                det(0.65, 0.0, 0.0, 10.0, 10.0),
                det(0.95, 50.0, 50.0, 60.0, 60.0),
            ],
            0.45,
        );
        let scores: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.95, 0.65]);
    }

    #[test]
    fn gate_keeps_score_equal_to_floor() {
        let kept = confidence_gate(
            vec![
                det(0.6, 0.0, 0.0, 1.0, 1.0),
                det(0.59, 0.0, 0.0, 1.0, 1.0),
                det(f32::NAN, 0.0, 0.0, 1.0, 1.0),
            ],
            0.6,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.6);
    }
}
