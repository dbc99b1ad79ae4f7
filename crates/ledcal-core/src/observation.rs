//! Observation types for LED detections.
//!
//! A camera produces one [`LedDetection`] per strobed LED. The
//! [`CorrespondenceSet`] collects them for every camera and applies the
//! brightness gate that decides which (LED, camera) pairs contribute a
//! residual.

use crate::{Real, Vec2};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Brightness (0-255 scale) a detection must strictly exceed to be trusted.
pub const DEFAULT_VISIBILITY_THRESHOLD: Real = 250.0;

/// One row of a per-camera detection table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedDetection {
    pub led: usize,
    /// Raw pixel position (image origin at the top-left corner).
    pub pixel: Vec2,
    /// Peak brightness on a 0-255 scale.
    pub brightness: Real,
}

/// Visibility gate: strict `brightness > threshold`.
#[inline]
pub fn is_visible(brightness: Real, threshold: Real) -> bool {
    brightness > threshold
}

/// Stored detection of one LED in one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub pixel: Vec2,
    pub brightness: Real,
    pub visible: bool,
}

/// Visibility table and raw observations for every (LED, camera) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrespondenceSet {
    num_leds: usize,
    num_cameras: usize,
    /// Indexed `[led][camera]`.
    observations: Vec<Vec<Option<Observation>>>,
}

impl CorrespondenceSet {
    pub fn new(num_leds: usize, num_cameras: usize) -> Self {
        Self {
            num_leds,
            num_cameras,
            observations: vec![vec![None; num_cameras]; num_leds],
        }
    }

    pub fn num_leds(&self) -> usize {
        self.num_leds
    }

    pub fn num_cameras(&self) -> usize {
        self.num_cameras
    }

    /// Record the detections of one camera.
    ///
    /// A later row for the same LED replaces an earlier one. All rows are
    /// validated before anything is written, so a rejected camera leaves the
    /// set untouched.
    pub fn insert_camera(
        &mut self,
        cam_idx: usize,
        detections: &[LedDetection],
        threshold: Real,
    ) -> Result<()> {
        ensure!(
            cam_idx < self.num_cameras,
            "camera index {} out of range (num_cameras = {})",
            cam_idx,
            self.num_cameras
        );
        for det in detections {
            ensure!(
                det.led < self.num_leds,
                "camera {} detection references led {} (num_leds = {})",
                cam_idx,
                det.led,
                self.num_leds
            );
        }
        for det in detections {
            self.observations[det.led][cam_idx] = Some(Observation {
                pixel: det.pixel,
                brightness: det.brightness,
                visible: is_visible(det.brightness, threshold),
            });
        }
        Ok(())
    }

    pub fn observation(&self, led: usize, cam_idx: usize) -> Option<&Observation> {
        self.observations
            .get(led)
            .and_then(|row| row.get(cam_idx))
            .and_then(Option::as_ref)
    }

    pub fn is_visible(&self, led: usize, cam_idx: usize) -> bool {
        self.observation(led, cam_idx).is_some_and(|o| o.visible)
    }

    /// Raw pixel observed for the pair, visible or not.
    pub fn original_point(&self, led: usize, cam_idx: usize) -> Option<Vec2> {
        self.observation(led, cam_idx).map(|o| o.pixel)
    }

    /// Iterate `(led, camera, observation)` over visible pairs, LED-major.
    pub fn visible_pairs(&self) -> impl Iterator<Item = (usize, usize, &Observation)> + '_ {
        self.observations.iter().enumerate().flat_map(|(led, row)| {
            row.iter().enumerate().filter_map(move |(cam, obs)| match obs {
                Some(o) if o.visible => Some((led, cam, o)),
                _ => None,
            })
        })
    }

    pub fn num_visible(&self) -> usize {
        self.visible_pairs().count()
    }

    pub fn visible_in_camera(&self, cam_idx: usize) -> usize {
        (0..self.num_leds)
            .filter(|&led| self.is_visible(led, cam_idx))
            .count()
    }

    /// LEDs without a single visible observation.
    pub fn unobserved_leds(&self) -> Vec<usize> {
        (0..self.num_leds)
            .filter(|&led| (0..self.num_cameras).all(|cam| !self.is_visible(led, cam)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(led: usize, brightness: Real) -> LedDetection {
        LedDetection {
            led,
            pixel: Vec2::new(10.0 * led as Real, 5.0),
            brightness,
        }
    }

    #[test]
    fn visibility_gate_is_strict() {
        assert!(!is_visible(250.0, DEFAULT_VISIBILITY_THRESHOLD));
        assert!(is_visible(250.0001, DEFAULT_VISIBILITY_THRESHOLD));
    }

    #[test]
    fn insert_camera_applies_gate() {
        let mut set = CorrespondenceSet::new(3, 2);
        set.insert_camera(1, &[det(0, 255.0), det(2, 120.0)], DEFAULT_VISIBILITY_THRESHOLD)
            .unwrap();

        assert!(set.is_visible(0, 1));
        assert!(!set.is_visible(2, 1));
        assert!(!set.is_visible(1, 1));
        assert_eq!(set.original_point(2, 1), Some(Vec2::new(20.0, 5.0)));
        assert_eq!(set.original_point(1, 1), None);
        assert_eq!(set.num_visible(), 1);
        assert_eq!(set.unobserved_leds(), vec![1, 2]);
    }

    #[test]
    fn later_rows_overwrite_earlier_ones() {
        let mut set = CorrespondenceSet::new(1, 1);
        set.insert_camera(0, &[det(0, 255.0), det(0, 10.0)], DEFAULT_VISIBILITY_THRESHOLD)
            .unwrap();
        assert!(!set.is_visible(0, 0));
    }

    #[test]
    fn rejected_camera_leaves_set_untouched() {
        let mut set = CorrespondenceSet::new(2, 2);
        set.insert_camera(0, &[det(1, 255.0)], DEFAULT_VISIBILITY_THRESHOLD)
            .unwrap();
        let err = set.insert_camera(1, &[det(0, 255.0), det(5, 255.0)], DEFAULT_VISIBILITY_THRESHOLD);
        assert!(err.is_err());
        assert!(set.is_visible(1, 0));
        assert!(!set.is_visible(0, 1));
        assert!(set.insert_camera(2, &[], DEFAULT_VISIBILITY_THRESHOLD).is_err());
    }

    #[test]
    fn visible_pairs_are_led_major() {
        let mut set = CorrespondenceSet::new(2, 2);
        set.insert_camera(1, &[det(0, 255.0), det(1, 255.0)], DEFAULT_VISIBILITY_THRESHOLD)
            .unwrap();
        set.insert_camera(0, &[det(1, 255.0)], DEFAULT_VISIBILITY_THRESHOLD)
            .unwrap();
        let pairs: Vec<_> = set.visible_pairs().map(|(l, c, _)| (l, c)).collect();
        assert_eq!(pairs, vec![(0, 1), (1, 0), (1, 1)]);
        assert_eq!(set.visible_in_camera(1), 2);
    }
}
