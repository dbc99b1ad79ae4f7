use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

use crate::{Extrinsics, Intrinsics, Real, Vec2, Vec3};

/// Image resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ImageSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl ImageSize {
    /// Image centre, the origin of the projection model.
    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width as Real / 2.0, self.height as Real / 2.0)
    }

    /// Raw pixel to centred coordinate.
    pub fn centered(&self, pixel: &Vec2) -> Vec2 {
        pixel - self.center()
    }

    /// Centred coordinate back to a raw pixel.
    pub fn to_pixel(&self, centered: &Vec2) -> Vec2 {
        centered + self.center()
    }
}

/// Physical optics used to seed the focal length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Optics {
    /// Sensor pixel pitch in millimetres.
    pub pixel_size_mm: Real,
    /// Lens focal length in millimetres.
    pub focal_length_mm: Real,
}

impl Default for Optics {
    fn default() -> Self {
        // 35 mm lens on a 24 mm wide sensor imaged at 1920 px.
        Self {
            pixel_size_mm: 24.0 / 1920.0,
            focal_length_mm: 35.0,
        }
    }
}

impl Optics {
    /// Focal length in pixel units.
    pub fn focal_px(&self) -> Real {
        self.focal_length_mm / self.pixel_size_mm
    }

    pub fn seed_intrinsics(&self) -> Intrinsics {
        Intrinsics::new(self.focal_px())
    }
}

/// Cameras evenly spaced on a horizontal circle around the origin, facing inward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RingLayout {
    pub num_cameras: usize,
    pub radius: Real,
}

impl RingLayout {
    pub fn new(num_cameras: usize) -> Self {
        Self {
            num_cameras,
            radius: 1.0,
        }
    }

    /// Angular position `theta_i = -2*pi*i / n` of camera `i`.
    pub fn angle(&self, cam_idx: usize) -> Real {
        -2.0 * PI * cam_idx as Real / self.num_cameras as Real
    }

    /// Seed pose for camera `i`: yaw `pi/2 + theta_i`, position
    /// `radius * (sin theta_i, cos theta_i, 0)`.
    pub fn seed_extrinsics(&self, cam_idx: usize) -> Extrinsics {
        let theta = self.angle(cam_idx);
        Extrinsics::new(
            Vec3::new(0.0, 0.0, FRAC_PI_2 + theta),
            Vec3::new(self.radius * theta.sin(), self.radius * theta.cos(), 0.0),
        )
    }

    pub fn seed_all(&self) -> Vec<Extrinsics> {
        (0..self.num_cameras)
            .map(|idx| self.seed_extrinsics(idx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project;
    use approx::assert_relative_eq;

    #[test]
    fn default_optics_focal() {
        assert_relative_eq!(Optics::default().focal_px(), 2800.0, epsilon = 1e-9);
    }

    #[test]
    fn ring_cameras_face_the_origin() {
        let ring = RingLayout::new(8);
        let intr = Intrinsics::new(1000.0);
        for extr in ring.seed_all() {
            assert_relative_eq!(extr.translation.norm(), 1.0, epsilon = 1e-12);
            let p = project(&intr, &extr, &Vec3::zeros()).unwrap();
            assert_relative_eq!(p.depth, 1.0, epsilon = 1e-12);
            assert_relative_eq!(p.xy, Vec2::zeros(), epsilon = 1e-9);
        }
    }

    #[test]
    fn ring_spacing_follows_camera_count() {
        let ring = RingLayout::new(4);
        let extr = ring.seed_extrinsics(1);
        assert_relative_eq!(extr.translation, Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(extr.rotation.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn center_round_trip() {
        let size = ImageSize::default();
        let px = Vec2::new(100.5, 900.25);
        let c = size.centered(&px);
        assert_relative_eq!(c, Vec2::new(-859.5, 360.25));
        assert_relative_eq!(size.to_pixel(&c), px);
    }
}
