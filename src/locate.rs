//! Object localization and monocular distance estimation.
//!
//! Distance follows the pinhole similar-triangles relation
//! `distance = known_width * focal_length / perceived_width`.

use crate::config::{AlertSettings, Calibration, DetectionSettings};
use crate::detect::BoundingRegion;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DistanceEstimate {
    /// `None` when the perceived width is zero and the distance is undefined.
    pub meters: Option<f64>,
}

impl DistanceEstimate {
    pub fn within(&self, min_m: f64, max_m: f64) -> bool {
        self.meters.is_some_and(|m| m >= min_m && m <= max_m)
    }
}

/// The single region per frame that qualifies for an alert.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub region: BoundingRegion,
    pub distance_m: f64,
}

pub fn estimate_distance(calibration: &Calibration, perceived_width_px: u32) -> DistanceEstimate {
    if perceived_width_px == 0 {
        return DistanceEstimate { meters: None };
    }
    DistanceEstimate {
        meters: Some(
            calibration.known_width_m * calibration.focal_length_px / perceived_width_px as f64,
        ),
    }
}

/// Focal length (pixels) from a reference shot of an object of known width at a known distance.
pub fn focal_length_from_reference(
    known_width_m: f64,
    known_distance_m: f64,
    perceived_width_px: u32,
) -> Option<f64> {
    if known_width_m <= 0.0 || known_distance_m <= 0.0 || perceived_width_px == 0 {
        return None;
    }
    Some(perceived_width_px as f64 * known_distance_m / known_width_m)
}

pub struct Localizer {
    calibration: Calibration,
    alert_min_area: u64,
    min_distance_m: f64,
    max_distance_m: f64,
}

impl Localizer {
    pub fn new(calibration: Calibration, detection: &DetectionSettings, alerts: &AlertSettings) -> Self {
        Self {
            calibration,
            alert_min_area: detection.alert_min_area,
            min_distance_m: alerts.min_distance_m,
            max_distance_m: alerts.max_distance_m,
        }
    }

    /// First region, in detection order, that is large enough and inside the safety band.
    ///
    /// Scanning stops at the first match: one alert candidate per frame.
    pub fn locate(&self, regions: &[BoundingRegion]) -> Option<Candidate> {
        for region in regions {
            if region.area <= self.alert_min_area {
                continue;
            }
            let estimate = estimate_distance(&self.calibration, region.width);
            if !estimate.within(self.min_distance_m, self.max_distance_m) {
                continue;
            }
            if let Some(distance_m) = estimate.meters {
                return Some(Candidate {
                    region: *region,
                    distance_m,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration() -> Calibration {
        Calibration {
            known_width_m: 0.2,
            focal_length_px: 615.0,
        }
    }

    fn region(x: u32, width: u32, area: u64) -> BoundingRegion {
        BoundingRegion {
            x,
            y: 0,
            width,
            height: 10,
            area,
        }
    }

    fn localizer(max_distance_m: f64) -> Localizer {
        Localizer::new(
            calibration(),
            &DetectionSettings::default(),
            &AlertSettings {
                max_distance_m,
                ..AlertSettings::default()
            },
        )
    }

    #[test]
    fn zero_width_is_undefined() {
        let estimate = estimate_distance(&calibration(), 0);
        assert_eq!(estimate.meters, None);
        assert!(!estimate.within(0.0, 3.0));
    }

    #[test]
    fn reference_width_gives_one_meter() {
        let meters = estimate_distance(&calibration(), 123).meters.unwrap();
        assert!((meters - 1.0).abs() < 1e-9);
    }

    #[test]
    fn small_regions_are_ignored() {
        let located = localizer(3.0).locate(&[region(0, 123, 50_000)]);
        assert_eq!(located, None);
    }

    #[test]
    fn zero_width_region_is_skipped_not_fatal() {
        let regions = [region(0, 0, 60_000), region(5, 123, 60_000)];
        let located = localizer(3.0).locate(&regions).unwrap();
        assert_eq!(located.region.x, 5);
    }

    #[test]
    fn first_match_wins() {
        let regions = [
            region(1, 20, 60_000),  // 6.15 m: outside the band
            region(2, 123, 60_000), // 1.0 m
            region(3, 246, 60_000), // 0.5 m: closer, but later
        ];
        let located = localizer(3.0).locate(&regions).unwrap();
        assert_eq!(located.region.x, 2);
    }

    #[test]
    fn band_edge_is_inclusive() {
        // width 41 -> 3.0 m exactly
        let regions = [region(0, 41, 60_000)];
        let edge = estimate_distance(&calibration(), 41).meters.unwrap();
        assert!(localizer(edge).locate(&regions).is_some());
        assert!(localizer(edge + 1e-6).locate(&regions).is_some());
        assert!(localizer(edge - 1e-6).locate(&regions).is_none());
    }

    #[test]
    fn focal_length_calibration_inverts_estimate() {
        let focal = focal_length_from_reference(0.2, 1.0, 123).unwrap();
        assert!((focal - 615.0).abs() < 1e-9);
        assert_eq!(focal_length_from_reference(0.2, 1.0, 0), None);
    }
}
