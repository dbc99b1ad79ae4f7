use anyhow::{ensure, Result};
use ledcal_core::Vec3;
use nalgebra::{DVector, DVectorView};

pub const LED_DIM: usize = 3;

pub fn pack_led(p: &Vec3) -> DVector<f64> {
    nalgebra::dvector![p.x, p.y, p.z]
}

pub fn unpack_led(v: DVectorView<'_, f64>) -> Result<Vec3> {
    ensure!(
        v.len() == LED_DIM,
        "expected LED position vector of length {}, got {}",
        LED_DIM,
        v.len()
    );
    Ok(Vec3::new(v[0], v[1], v[2]))
}
