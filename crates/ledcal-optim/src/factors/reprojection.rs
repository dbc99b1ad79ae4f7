//! LED reprojection residual.

use ledcal_core::project_generic;
use nalgebra::{DVector, DVectorView, RealField, SVector, Vector3};

/// Residual `projected_xy - uv` for one LED seen by one camera.
///
/// `uv` is the observed pixel relative to the image centre.
pub fn led_reprojection_residual(
    intr: &DVector<f64>,
    camera: &DVector<f64>,
    led: &DVector<f64>,
    uv: [f64; 2],
) -> SVector<f64, 2> {
    led_reprojection_generic(intr.as_view(), camera.as_view(), led.as_view(), uv)
}

/// Generic evaluator shared by the backend adapter and the Jacobian helper.
pub(crate) fn led_reprojection_generic<T: RealField>(
    intr: DVectorView<'_, T>,
    camera: DVectorView<'_, T>,
    led: DVectorView<'_, T>,
    uv: [f64; 2],
) -> SVector<T, 2> {
    debug_assert!(intr.len() == 3, "intrinsics must have 3 params");
    debug_assert!(camera.len() == 6, "camera must have 6 params");
    debug_assert!(led.len() == 3, "led must have 3 params");

    let focal = intr[0].clone();
    let rotation = Vector3::new(camera[0].clone(), camera[1].clone(), camera[2].clone());
    let translation = Vector3::new(camera[3].clone(), camera[4].clone(), camera[5].clone());
    let p_world = Vector3::new(led[0].clone(), led[1].clone(), led[2].clone());

    let (xy, _depth) = project_generic(focal, &rotation, &translation, &p_world);
    let u_meas = T::from_f64(uv[0]).unwrap();
    let v_meas = T::from_f64(uv[1]).unwrap();
    SVector::<T, 2>::new(xy.x.clone() - u_meas, xy.y.clone() - v_meas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ledcal_core::{project, Extrinsics, Intrinsics, RingLayout, Vec3};

    use crate::params::{pack_extrinsics, pack_intrinsics, pack_led};

    #[test]
    fn zero_at_exact_observation() {
        let intr = Intrinsics::new(2800.0);
        let extr = RingLayout::new(8).seed_extrinsics(3);
        let led = Vec3::new(0.05, -0.1, 0.08);
        let uv = project(&intr, &extr, &led).unwrap().xy;

        let r = led_reprojection_residual(
            &pack_intrinsics(&intr),
            &pack_extrinsics(&extr),
            &pack_led(&led),
            [uv.x, uv.y],
        );
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn sign_is_projected_minus_observed() {
        let intr = Intrinsics::new(100.0);
        let extr = Extrinsics::new(Vec3::zeros(), Vec3::zeros());
        let led = Vec3::new(1.0, 0.0, 0.0);
        let r = led_reprojection_residual(
            &pack_intrinsics(&intr),
            &pack_extrinsics(&extr),
            &pack_led(&led),
            [3.0, -4.0],
        );
        assert_relative_eq!(r, SVector::<f64, 2>::new(-3.0, 4.0));
    }

    #[test]
    fn radial_coefficients_do_not_affect_residual() {
        let extr = RingLayout::new(4).seed_extrinsics(1);
        let led = Vec3::new(0.1, 0.2, -0.05);
        let plain = Intrinsics::new(1500.0);
        let distorted = Intrinsics {
            focal: 1500.0,
            radial: [0.3, -0.7],
        };
        let a = led_reprojection_residual(
            &pack_intrinsics(&plain),
            &pack_extrinsics(&extr),
            &pack_led(&led),
            [1.0, 2.0],
        );
        let b = led_reprojection_residual(
            &pack_intrinsics(&distorted),
            &pack_extrinsics(&extr),
            &pack_led(&led),
            [1.0, 2.0],
        );
        assert_eq!(a, b);
    }
}
