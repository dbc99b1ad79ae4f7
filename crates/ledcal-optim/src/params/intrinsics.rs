//! Shared intrinsics block.

use anyhow::{ensure, Result};
use ledcal_core::Intrinsics;
use nalgebra::{DVector, DVectorView};

pub const INTRINSICS_DIM: usize = 3;
pub const FOCAL_IDX: usize = 0;
/// Indices of the inert radial coefficients.
pub const RADIAL_IDX: [usize; 2] = [1, 2];

/// `[focal, l1, l2]`
pub fn pack_intrinsics(intr: &Intrinsics) -> DVector<f64> {
    nalgebra::dvector![intr.focal, intr.radial[0], intr.radial[1]]
}

pub fn unpack_intrinsics(v: DVectorView<'_, f64>) -> Result<Intrinsics> {
    ensure!(
        v.len() == INTRINSICS_DIM,
        "expected intrinsics vector of length {}, got {}",
        INTRINSICS_DIM,
        v.len()
    );
    Ok(Intrinsics {
        focal: v[FOCAL_IDX],
        radial: [v[RADIAL_IDX[0]], v[RADIAL_IDX[1]]],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radial_coefficients_follow_focal() {
        let intr = Intrinsics {
            focal: 2800.0,
            radial: [0.1, -0.2],
        };
        let v = pack_intrinsics(&intr);
        assert_eq!(v.as_slice(), &[2800.0, 0.1, -0.2]);
        assert_eq!(unpack_intrinsics(v.as_view()).unwrap(), intr);
        assert!(unpack_intrinsics(DVector::zeros(2).as_view()).is_err());
    }
}
