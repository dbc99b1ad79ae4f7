//! Synthetic LED strands and rigs.

use std::f64::consts::PI;

use super::noise::{jitter3, PixelNoise};
use crate::{project, Extrinsics, ImageSize, Intrinsics, LedDetection, Real, RingLayout, Vec3};

/// Helix of LEDs around the world z axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HelixSpec {
    pub num_leds: usize,
    pub radius: Real,
    /// The strand spans `z` in `[-half_height, half_height]`.
    pub half_height: Real,
    pub turns: Real,
    /// Per-axis amplitude of the deterministic position jitter.
    pub jitter: Real,
    pub seed: u64,
}

impl HelixSpec {
    /// A strand that stays inside the frame of a default ring rig.
    pub fn new(num_leds: usize) -> Self {
        Self {
            num_leds,
            radius: 0.15,
            half_height: 0.1,
            turns: 3.0,
            jitter: 0.02,
            seed: 0x1ED5,
        }
    }
}

/// LED positions along the helix, in strand order.
pub fn helix(spec: &HelixSpec) -> Vec<Vec3> {
    let denom = spec.num_leds.saturating_sub(1).max(1) as Real;
    (0..spec.num_leds)
        .map(|i| {
            let s = i as Real / denom;
            let phi = 2.0 * PI * spec.turns * s;
            let base = Vec3::new(
                spec.radius * phi.cos(),
                spec.radius * phi.sin(),
                spec.half_height * (2.0 * s - 1.0),
            );
            base + jitter3(spec.seed, i, 0, spec.jitter)
        })
        .collect()
}

/// Ring seed poses with a deterministic error added to each camera.
///
/// `z_amp` bounds the vertical offset separately so the result can stay
/// inside a tight height bound.
pub fn perturbed_ring(
    ring: &RingLayout,
    seed: u64,
    rot_amp: Real,
    trans_amp: Real,
    z_amp: Real,
) -> Vec<Extrinsics> {
    ring.seed_all()
        .into_iter()
        .enumerate()
        .map(|(idx, extr)| {
            let dr = jitter3(seed, idx, 1, rot_amp);
            let mut dt = jitter3(seed, idx, 2, trans_amp);
            dt.z = jitter3(seed, idx, 3, z_amp).z;
            Extrinsics::new(extr.rotation + dr, extr.translation + dt)
        })
        .collect()
}

/// Forward-project every LED into every camera.
///
/// Returns one detection table per camera with a row for each LED. LEDs in
/// front of the camera and inside the image get brightness 255; the rest get
/// brightness 0 so the visibility gate drops them.
pub fn project_detections(
    intrinsics: &Intrinsics,
    cameras: &[Extrinsics],
    leds: &[Vec3],
    image_size: ImageSize,
    noise: Option<PixelNoise>,
) -> Vec<Vec<LedDetection>> {
    let (w, h) = (image_size.width as Real, image_size.height as Real);
    cameras
        .iter()
        .enumerate()
        .map(|(cam_idx, extr)| {
            leds.iter()
                .enumerate()
                .map(|(led, p)| match project(intrinsics, extr, p) {
                    Ok(proj) if proj.depth > 0.0 => {
                        let mut pixel = image_size.to_pixel(&proj.xy);
                        if let Some(n) = &noise {
                            pixel += n.sample(cam_idx, led);
                        }
                        let inside = (0.0..w).contains(&pixel.x) && (0.0..h).contains(&pixel.y);
                        LedDetection {
                            led,
                            pixel,
                            brightness: if inside { 255.0 } else { 0.0 },
                        }
                    }
                    _ => LedDetection {
                        led,
                        pixel: image_size.center(),
                        brightness: 0.0,
                    },
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CorrespondenceSet, Optics, DEFAULT_VISIBILITY_THRESHOLD};

    #[test]
    fn helix_stays_inside_led_bounds() {
        let leds = helix(&HelixSpec::new(50));
        assert_eq!(leds.len(), 50);
        for p in &leds {
            assert!(p.amax() < 0.5);
        }
        assert_ne!(leds[0], leds[1]);
    }

    #[test]
    fn default_rig_sees_every_led() {
        let leds = helix(&HelixSpec::new(50));
        let ring = RingLayout::new(8);
        let cameras = perturbed_ring(&ring, 5, 0.01, 0.01, 0.005);
        let tables = project_detections(
            &Optics::default().seed_intrinsics(),
            &cameras,
            &leds,
            ImageSize::default(),
            None,
        );

        let mut set = CorrespondenceSet::new(leds.len(), cameras.len());
        for (cam_idx, rows) in tables.iter().enumerate() {
            assert_eq!(rows.len(), leds.len());
            set.insert_camera(cam_idx, rows, DEFAULT_VISIBILITY_THRESHOLD)
                .unwrap();
        }
        assert_eq!(set.num_visible(), 8 * 50);
    }

    #[test]
    fn perturbed_ring_respects_height_amplitude() {
        let cameras = perturbed_ring(&RingLayout::new(6), 1, 0.02, 0.05, 0.004);
        for extr in &cameras {
            assert!(extr.translation.z.abs() <= 0.004);
        }
    }

    #[test]
    fn leds_behind_camera_are_dark() {
        let cameras = [Extrinsics::new(Vec3::zeros(), Vec3::zeros())];
        let leds = [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        let tables = project_detections(
            &Intrinsics::new(100.0),
            &cameras,
            &leds,
            ImageSize::default(),
            None,
        );
        assert_eq!(tables[0][0].brightness, 0.0);
        assert_eq!(tables[0][1].brightness, 255.0);
    }
}
