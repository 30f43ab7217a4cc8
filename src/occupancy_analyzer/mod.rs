//! OccupancyAnalyzer - Detection Masks to Per-Direction Occupancy
//!
//! ## Responsibilities
//!
//! - Union all detection masks of one frame
//! - Measure ROI coverage per direction
//! - Classify coverage into a congestion status
//!
//! Pure functions of their inputs; no side effects, no locking. ROI masks
//! are immutable and shared read-only across cycles.

use crate::models::{
    DetectionOutput, Direction, DirectionReport, OccupancyReport, RegionMask, TrafficStatus,
};
use std::sync::Arc;

/// Guards the occupancy ratio against an empty ROI
const EPSILON: f32 = 1e-6;

/// Ascending congestion thresholds, in occupancy percent.
///
/// Classification is exclusive at the boundary: a rate of exactly
/// `heavy` is still `Moderate`, exactly `moderate` is still `Free`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdProfile {
    pub moderate: f32,
    pub heavy: f32,
}

impl ThresholdProfile {
    /// Default profile: moderate above 30%, heavy above 60%
    pub const STANDARD: ThresholdProfile = ThresholdProfile {
        moderate: 30.0,
        heavy: 60.0,
    };

    /// Alternate profile tuned for denser roads: 25% / 50%
    pub const STRICT: ThresholdProfile = ThresholdProfile {
        moderate: 25.0,
        heavy: 50.0,
    };

    /// Look up a named profile
    pub fn by_name(name: &str) -> Option<ThresholdProfile> {
        match name {
            "standard" => Some(Self::STANDARD),
            "strict" => Some(Self::STRICT),
            _ => None,
        }
    }

    /// Classify an occupancy rate (percent)
    pub fn classify(&self, rate: f32) -> TrafficStatus {
        if rate > self.heavy {
            TrafficStatus::Heavy
        } else if rate > self.moderate {
            TrafficStatus::Moderate
        } else {
            TrafficStatus::Free
        }
    }
}

/// Union all detection masks into a single mask.
///
/// Returns `None` when there are no masks (nothing detected).
pub fn union_masks(masks: &[RegionMask]) -> Option<RegionMask> {
    let first = masks.first()?;
    let mut union = RegionMask::empty(first.width(), first.height());
    for mask in masks {
        if mask.width() == union.width() && mask.height() == union.height() {
            union.union_with(mask);
        } else {
            union.union_with(&mask.resample(union.width(), union.height()));
        }
    }
    Some(union)
}

/// Fraction of the ROI covered by the union mask, in percent.
///
/// The union is resampled to the ROI's resolution when they differ.
/// Always within [0, 100]; an empty ROI yields 0.
pub fn occupancy_rate(union: &RegionMask, roi: &RegionMask) -> f32 {
    let union = if union.width() == roi.width() && union.height() == roi.height() {
        union.clone()
    } else {
        union.resample(roi.width(), roi.height())
    };

    let mut overlap = 0usize;
    for y in 0..roi.height() {
        for x in 0..roi.width() {
            if roi.get(x, y) && union.get(x, y) {
                overlap += 1;
            }
        }
    }

    let rate = 100.0 * overlap as f32 / (roi.area() as f32 + EPSILON);
    rate.clamp(0.0, 100.0)
}

/// Build the per-direction occupancy report for one channel's detection
/// output. Directions without an ROI mask are absent from the report.
pub fn analyze(
    detection: &DetectionOutput,
    rois: &[(Direction, Arc<RegionMask>)],
    profile: &ThresholdProfile,
) -> OccupancyReport {
    let union = union_masks(&detection.masks);

    let mut report = OccupancyReport::new();
    for (direction, roi) in rois {
        let rate = match &union {
            Some(u) => occupancy_rate(u, roi),
            None => 0.0,
        };
        report.insert(
            *direction,
            DirectionReport {
                occupancy_rate: rate,
                status: profile.classify(rate),
            },
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(width: u32, height: u32) -> RegionMask {
        RegionMask::from_fn(width, height, |_, _| true)
    }

    #[test]
    fn test_classify_boundaries_are_exclusive() {
        let p = ThresholdProfile::STANDARD;
        assert_eq!(p.classify(0.0), TrafficStatus::Free);
        assert_eq!(p.classify(30.0), TrafficStatus::Free);
        assert_eq!(p.classify(30.1), TrafficStatus::Moderate);
        // exactly the heavy cut point stays Moderate
        assert_eq!(p.classify(60.0), TrafficStatus::Moderate);
        assert_eq!(p.classify(60.1), TrafficStatus::Heavy);
        assert_eq!(p.classify(100.0), TrafficStatus::Heavy);
    }

    #[test]
    fn test_profile_by_name() {
        assert_eq!(
            ThresholdProfile::by_name("standard"),
            Some(ThresholdProfile::STANDARD)
        );
        assert_eq!(
            ThresholdProfile::by_name("strict"),
            Some(ThresholdProfile::STRICT)
        );
        assert_eq!(ThresholdProfile::by_name("loose"), None);
    }

    #[test]
    fn test_occupancy_rate_in_bounds() {
        let roi = RegionMask::from_fn(10, 10, |x, _| x < 5);
        assert_eq!(occupancy_rate(&RegionMask::empty(10, 10), &roi), 0.0);

        let rate = occupancy_rate(&full(10, 10), &roi);
        assert!(rate > 99.0 && rate <= 100.0);

        // 30 of the ROI's 50 pixels covered
        let partial = RegionMask::from_fn(10, 10, |x, _| x < 5 && x % 2 == 0);
        let rate = occupancy_rate(&partial, &roi);
        assert!((rate - 60.0).abs() < 0.1);
    }

    #[test]
    fn test_empty_roi_never_faults() {
        let roi = RegionMask::empty(8, 8);
        let rate = occupancy_rate(&full(8, 8), &roi);
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn test_occupancy_rate_resamples_union() {
        // union at 4x4, ROI at 8x8: full coverage survives the resample
        let roi = full(8, 8);
        let rate = occupancy_rate(&full(4, 4), &roi);
        assert!(rate > 99.0);
    }

    #[test]
    fn test_union_masks_mixed_resolutions() {
        let a = RegionMask::from_fn(4, 4, |x, _| x < 2);
        let b = RegionMask::from_fn(8, 8, |x, _| x >= 4);
        let union = union_masks(&[a, b]).unwrap();
        assert_eq!(union.width(), 4);
        assert_eq!(union.area(), 16); // both halves at 4x4
        assert!(union_masks(&[]).is_none());
    }

    #[test]
    fn test_analyze_reports_all_configured_directions() {
        let roi_up = Arc::new(RegionMask::from_fn(8, 8, |_, y| y < 4));
        let roi_low = Arc::new(RegionMask::from_fn(8, 8, |_, y| y >= 4));
        let rois = vec![
            (Direction::Up, roi_up),
            (Direction::Low, roi_low),
        ];

        // detection covers the top half only
        let detection = DetectionOutput {
            channel_id: 1,
            vehicle_count: 2,
            masks: vec![RegionMask::from_fn(8, 8, |_, y| y < 4)],
        };

        let report = analyze(&detection, &rois, &ThresholdProfile::STANDARD);
        assert_eq!(report.len(), 2);
        assert!(report[&Direction::Up].occupancy_rate > 99.0);
        assert_eq!(report[&Direction::Up].status, TrafficStatus::Heavy);
        assert_eq!(report[&Direction::Low].occupancy_rate, 0.0);
        assert_eq!(report[&Direction::Low].status, TrafficStatus::Free);
    }

    #[test]
    fn test_analyze_no_detections_is_all_free() {
        let rois = vec![(Direction::Up, Arc::new(full(4, 4)))];
        let detection = DetectionOutput {
            channel_id: 1,
            vehicle_count: 0,
            masks: vec![],
        };
        let report = analyze(&detection, &rois, &ThresholdProfile::STANDARD);
        assert_eq!(report[&Direction::Up].occupancy_rate, 0.0);
        assert_eq!(report[&Direction::Up].status, TrafficStatus::Free);
    }
}
