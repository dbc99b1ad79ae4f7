use nalgebra::{RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{rotate_axis_angle, Real, Vec2, Vec3};

/// Depth magnitude below which a point is considered to lie on the camera's
/// lateral plane.
pub const DEGENERATE_DEPTH_EPS: Real = 1.0e-9;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ProjectionError {
    #[error("point lies on the camera's lateral plane (depth {depth:e})")]
    DegenerateGeometry { depth: Real },
}

/// Shared intrinsics of every camera in the rig.
///
/// The principal point is not modelled: projections are relative to the image
/// centre. `radial` holds two radial distortion coefficients that are kept in
/// the parameter vector but have no effect (distortion multiplier is 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Focal length in pixels.
    pub focal: Real,
    /// Unused radial coefficients `[l1, l2]`.
    #[serde(default)]
    pub radial: [Real; 2],
}

impl Intrinsics {
    pub fn new(focal: Real) -> Self {
        Self {
            focal,
            radial: [0.0; 2],
        }
    }
}

/// Camera pose: axis-angle rotation into the camera frame and the camera's
/// world position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub rotation: Vec3,
    pub translation: Vec3,
}

impl Extrinsics {
    pub fn new(rotation: Vec3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Map a world point into camera coordinates: `rotate(r, p - t)`.
    pub fn to_camera(&self, p_world: &Vec3) -> Vec3 {
        to_camera_generic(&self.rotation, &self.translation, p_world)
    }
}

/// Result of projecting a world point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Centred sensor coordinate in pixels (`pixel - image_center`).
    pub xy: Vec2,
    /// Distance along the viewing axis (camera +X).
    pub depth: Real,
}

/// Transform a world point into the camera frame.
pub fn to_camera_generic<T: RealField>(
    rotation: &Vector3<T>,
    translation: &Vector3<T>,
    p_world: &Vector3<T>,
) -> Vector3<T> {
    rotate_axis_angle(rotation, &(p_world - translation))
}

/// Map a camera-frame point to centred pixel coordinates.
///
/// The camera looks down +X: sensor x comes from `-y`, sensor y from `+z`.
/// The caller is responsible for a non-zero depth.
pub fn sensor_from_camera<T: RealField>(focal: T, p_cam: &Vector3<T>, depth: T) -> Vector2<T> {
    let xp = -p_cam.y.clone() / depth.clone();
    let yp = p_cam.z.clone() / depth;
    // Radial distortion hook: the multiplier is pinned to 1.
    let distortion = T::one();
    Vector2::new(
        focal.clone() * distortion.clone() * xp,
        focal * distortion * yp,
    )
}

/// Projection used inside residuals.
///
/// A depth inside `±DEGENERATE_DEPTH_EPS` is replaced by a signed epsilon so
/// the value stays finite for the solver; use [`project`] to detect that case.
pub fn project_generic<T: RealField>(
    focal: T,
    rotation: &Vector3<T>,
    translation: &Vector3<T>,
    p_world: &Vector3<T>,
) -> (Vector2<T>, T) {
    let p_cam = to_camera_generic(rotation, translation, p_world);
    let depth = p_cam.x.clone();
    let eps = T::from_f64(DEGENERATE_DEPTH_EPS).unwrap();
    let safe_depth = if depth.clone().abs() >= eps {
        depth.clone()
    } else if depth >= T::zero() {
        eps
    } else {
        -eps
    };
    (sensor_from_camera(focal, &p_cam, safe_depth), depth)
}

/// Project a world point, reporting points on the lateral plane as degenerate.
pub fn project(
    intrinsics: &Intrinsics,
    extrinsics: &Extrinsics,
    p_world: &Vec3,
) -> Result<Projection, ProjectionError> {
    let p_cam = extrinsics.to_camera(p_world);
    let depth = p_cam.x;
    if !depth.is_finite() || depth.abs() < DEGENERATE_DEPTH_EPS {
        return Err(ProjectionError::DegenerateGeometry { depth });
    }
    Ok(Projection {
        xy: sensor_from_camera(intrinsics.focal, &p_cam, depth),
        depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn identity_camera() -> Extrinsics {
        Extrinsics::new(Vec3::zeros(), Vec3::zeros())
    }

    #[test]
    fn looks_down_positive_x() {
        let intr = Intrinsics::new(1000.0);
        let p = project(&intr, &identity_camera(), &Vec3::new(2.0, 0.0, 0.0)).unwrap();
        assert_relative_eq!(p.xy, Vec2::zeros());
        assert_relative_eq!(p.depth, 2.0);
    }

    #[test]
    fn sensor_axes_follow_rig_convention() {
        let intr = Intrinsics::new(100.0);
        // +y in the world goes to -x on the sensor, +z goes to +y.
        let p = project(&intr, &identity_camera(), &Vec3::new(2.0, 0.5, 0.25)).unwrap();
        assert_relative_eq!(p.xy, Vec2::new(-25.0, 12.5), epsilon = 1e-12);
    }

    #[test]
    fn translation_is_applied_before_rotation() {
        let intr = Intrinsics::new(1.0);
        // Camera at (0, 1, 0) rotated a quarter turn about z looks down world -y.
        let extr = Extrinsics::new(Vec3::new(0.0, 0.0, FRAC_PI_2), Vec3::new(0.0, 1.0, 0.0));
        let p = project(&intr, &extr, &Vec3::zeros()).unwrap();
        assert_relative_eq!(p.depth, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.xy, Vec2::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn lateral_plane_is_degenerate() {
        let intr = Intrinsics::new(1000.0);
        let err = project(&intr, &identity_camera(), &Vec3::new(0.0, 0.3, -0.2)).unwrap_err();
        assert!(matches!(err, ProjectionError::DegenerateGeometry { depth } if depth == 0.0));
    }

    #[test]
    fn generic_projection_stays_finite_on_lateral_plane() {
        let (xy, depth) = project_generic(
            1000.0,
            &Vec3::zeros(),
            &Vec3::zeros(),
            &Vec3::new(0.0, 0.3, -0.2),
        );
        assert_eq!(depth, 0.0);
        assert!(xy.x.is_finite() && xy.y.is_finite());
    }

    #[test]
    fn points_behind_camera_still_project() {
        let intr = Intrinsics::new(10.0);
        let p = project(&intr, &identity_camera(), &Vec3::new(-1.0, 0.1, 0.0)).unwrap();
        assert!(p.depth < 0.0);
        assert_relative_eq!(p.xy.x, 1.0, epsilon = 1e-12);
    }
}
