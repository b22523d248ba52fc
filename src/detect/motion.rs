use image::{imageops, GrayImage};

use crate::config::DetectionSettings;
use crate::detect::backend::MotionBackend;
use crate::detect::contours::{dilate, external_regions, threshold};
use crate::detect::result::MotionResult;
use crate::frame::Frame;

/// Background-differencing motion detector.
///
/// Both frames are reduced to luma and blurred before differencing. The blur is what keeps
/// single-pixel sensor noise out of the mask; it is not optional.
pub struct DifferenceDetector {
    settings: DetectionSettings,
}

impl DifferenceDetector {
    pub fn new(settings: DetectionSettings) -> Self {
        Self { settings }
    }

    fn smoothed(&self, frame: &Frame) -> GrayImage {
        imageops::blur(&frame.to_luma(), self.settings.blur_sigma)
    }
}

impl Default for DifferenceDetector {
    fn default() -> Self {
        Self::new(DetectionSettings::default())
    }
}

impl MotionBackend for DifferenceDetector {
    fn name(&self) -> &'static str {
        "difference"
    }

    fn detect(&mut self, previous: &Frame, current: &Frame) -> MotionResult {
        debug_assert!(
            previous.same_dimensions(current),
            "motion detector given {}x{} and {}x{} frames",
            previous.width,
            previous.height,
            current.width,
            current.height
        );
        if !previous.same_dimensions(current) {
            log::error!(
                "motion detector skipped mismatched frames ({}x{} vs {}x{})",
                previous.width,
                previous.height,
                current.width,
                current.height
            );
            return MotionResult::default();
        }

        let before = self.smoothed(previous);
        let after = self.smoothed(current);
        let diff = absolute_difference(&before, &after);
        let mask = dilate(
            &threshold(&diff, self.settings.diff_threshold),
            self.settings.dilate_iterations,
        );
        let regions = external_regions(&mask);
        let motion_detected = regions
            .iter()
            .any(|region| region.area > self.settings.motion_min_area);

        MotionResult {
            motion_detected,
            regions,
        }
    }
}

fn absolute_difference(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let (width, height) = a.dimensions();
    let data = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| x.abs_diff(y))
        .collect();
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use std::time::SystemTime;

    const W: u32 = 160;
    const H: u32 = 120;

    fn frame_with_block(block: Option<(u32, u32, u32, u32)>) -> Frame {
        let mut data = vec![40u8; (W * H) as usize];
        if let Some((bx, by, bw, bh)) = block {
            for y in by..by + bh {
                for x in bx..bx + bw {
                    data[(y * W + x) as usize] = 220;
                }
            }
        }
        Frame::new(data, W, H, PixelLayout::Luma8, SystemTime::now()).unwrap()
    }

    #[test]
    fn identical_frames_have_no_motion() {
        let mut detector = DifferenceDetector::default();
        let a = frame_with_block(Some((30, 30, 50, 50)));
        let b = frame_with_block(Some((30, 30, 50, 50)));
        let result = detector.detect(&a, &b);
        assert!(!result.motion_detected);
        assert!(result.regions.is_empty());
    }

    #[test]
    fn large_change_is_motion() {
        let mut detector = DifferenceDetector::default();
        let a = frame_with_block(None);
        let b = frame_with_block(Some((40, 30, 50, 50)));
        let result = detector.detect(&a, &b);
        assert!(result.motion_detected);
        assert_eq!(result.regions.len(), 1);
        let region = result.regions[0];
        // Blur and dilation grow the region a little beyond the block.
        assert!(region.width >= 50 && region.width <= 70, "{:?}", region);
        assert!(region.x <= 40 && region.x >= 30, "{:?}", region);
    }

    #[test]
    fn single_pixel_noise_is_suppressed() {
        let mut detector = DifferenceDetector::default();
        let a = frame_with_block(None);
        let mut noisy = vec![40u8; (W * H) as usize];
        for i in (0..noisy.len()).step_by(997) {
            noisy[i] = 255;
        }
        let b = Frame::new(noisy, W, H, PixelLayout::Luma8, SystemTime::now()).unwrap();
        let result = detector.detect(&a, &b);
        assert!(!result.motion_detected);
    }

    #[test]
    fn small_regions_are_reported_without_motion() {
        let settings = DetectionSettings {
            motion_min_area: 5_000,
            ..DetectionSettings::default()
        };
        let mut detector = DifferenceDetector::new(settings);
        let a = frame_with_block(None);
        let b = frame_with_block(Some((70, 50, 12, 12)));
        let result = detector.detect(&a, &b);
        assert!(!result.motion_detected);
        assert_eq!(result.regions.len(), 1);
    }
}
