//! Forward-mode Jacobian of the LED reprojection residual using `num-dual`.
//!
//! The local parameter vector stacks the three blocks a residual touches:
//! `[focal, l1, l2, r0, r1, r2, t0, t1, t2, x, y, z]`.

use nalgebra::{DVector, SMatrix, SVector};
use num_dual::{jacobian, DualSVec64};

use crate::factors::reprojection::led_reprojection_generic;
use crate::params::{EXTRINSICS_DIM, INTRINSICS_DIM, LED_DIM};

pub const LOCAL_DIM: usize = INTRINSICS_DIM + EXTRINSICS_DIM + LED_DIM;

/// Residual and its 2x12 Jacobian with respect to the stacked local parameters.
pub fn led_reprojection_jacobian(
    intr: &[f64; INTRINSICS_DIM],
    camera: &[f64; EXTRINSICS_DIM],
    led: &[f64; LED_DIM],
    uv: [f64; 2],
) -> (SVector<f64, 2>, SMatrix<f64, 2, LOCAL_DIM>) {
    let mut p0 = SVector::<f64, LOCAL_DIM>::zeros();
    p0.as_mut_slice()[..INTRINSICS_DIM].copy_from_slice(intr);
    p0.as_mut_slice()[INTRINSICS_DIM..INTRINSICS_DIM + EXTRINSICS_DIM].copy_from_slice(camera);
    p0.as_mut_slice()[INTRINSICS_DIM + EXTRINSICS_DIM..].copy_from_slice(led);

    let (r, j) = jacobian(
        |p: SVector<DualSVec64<LOCAL_DIM>, LOCAL_DIM>| {
            let p = p.as_slice();
            let intr = DVector::from_column_slice(&p[..INTRINSICS_DIM]);
            let camera =
                DVector::from_column_slice(&p[INTRINSICS_DIM..INTRINSICS_DIM + EXTRINSICS_DIM]);
            let led = DVector::from_column_slice(&p[INTRINSICS_DIM + EXTRINSICS_DIM..]);
            led_reprojection_generic(intr.as_view(), camera.as_view(), led.as_view(), uv)
        },
        p0,
    );
    (r, j)
}
