//! Per-camera pose block.

use anyhow::{ensure, Result};
use ledcal_core::{Extrinsics, Vec3};
use nalgebra::{DVector, DVectorView};

pub const EXTRINSICS_DIM: usize = 6;
/// Index of the world-z (height) component of the camera translation.
pub const HEIGHT_IDX: usize = 5;

/// `[r0, r1, r2, t0, t1, t2]`
pub fn pack_extrinsics(extr: &Extrinsics) -> DVector<f64> {
    let (r, t) = (&extr.rotation, &extr.translation);
    nalgebra::dvector![r.x, r.y, r.z, t.x, t.y, t.z]
}

pub fn unpack_extrinsics(v: DVectorView<'_, f64>) -> Result<Extrinsics> {
    ensure!(
        v.len() == EXTRINSICS_DIM,
        "expected extrinsics vector of length {}, got {}",
        EXTRINSICS_DIM,
        v.len()
    );
    Ok(Extrinsics::new(
        Vec3::new(v[0], v[1], v[2]),
        Vec3::new(v[3], v[4], v[5]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_index_points_at_translation_z() {
        let extr = Extrinsics::new(Vec3::new(0.1, 0.2, 0.3), Vec3::new(1.0, 2.0, 3.0));
        let v = pack_extrinsics(&extr);
        assert_eq!(v[HEIGHT_IDX], 3.0);
        assert_eq!(unpack_extrinsics(v.as_view()).unwrap(), extr);
    }
}
