//! Region filter: the maximum-relative-area policy applied to raw detections.

use crate::detect::RawDetection;

/// A detection that passed the area policy, with its normalized area (`w * h`, 0..1).
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredDetection {
    pub detection: RawDetection,
    pub area_pct: f64,
}

/// Keep detections whose normalized area is strictly below `max_area_fraction`.
///
/// Input order is preserved. Geometry is not validated here.
pub fn filter_by_area(
    raw_detections: Vec<RawDetection>,
    max_area_fraction: f64,
) -> Vec<FilteredDetection> {
    raw_detections
        .into_iter()
        .filter_map(|detection| {
            let area_pct = detection.area_fraction();
            if area_pct < max_area_fraction {
                Some(FilteredDetection {
                    detection,
                    area_pct,
                })
            } else {
                log::debug!(
                    "dropping region covering {:.2}% of the image (limit {:.2}%)",
                    area_pct * 100.0,
                    max_area_fraction * 100.0
                );
                None
            }
        })
        .collect()
}
