//! Seeded noise keyed by integer indices.
//!
//! Values are a pure function of `(seed, a, b)` so synthetic rigs are stable
//! across platforms and runs.

use crate::{Real, Vec2, Vec3};

/// Uniform pixel noise in `[-max_abs_px, +max_abs_px]` per axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelNoise {
    pub seed: u64,
    pub max_abs_px: Real,
}

impl PixelNoise {
    /// Noise for the detection of `led_idx` in `cam_idx`.
    pub fn sample(&self, cam_idx: usize, led_idx: usize) -> Vec2 {
        let max_abs = self.max_abs_px.abs();
        if max_abs == 0.0 {
            return Vec2::zeros();
        }
        let key = mix_key(self.seed, cam_idx, led_idx);
        Vec2::new(
            signed_unit(key) * max_abs,
            signed_unit(key ^ 0x94D0_49BB_1331_11EB) * max_abs,
        )
    }
}

/// Deterministic vector in the cube `[-amp, amp]^3`.
pub fn jitter3(seed: u64, a: usize, b: usize, amp: Real) -> Vec3 {
    let key = mix_key(seed, a, b);
    Vec3::new(
        signed_unit(key),
        signed_unit(key ^ 0x94D0_49BB_1331_11EB),
        signed_unit(key ^ 0xD6E8_FEB8_6659_FD93),
    ) * amp
}

#[inline]
fn mix_key(seed: u64, a: usize, b: usize) -> u64 {
    seed ^ (a as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (b as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Map a key to `[-1, 1)` using the top 53 bits of the mixed value.
#[inline]
fn signed_unit(key: u64) -> Real {
    let mantissa = splitmix64(key) >> 11;
    let u = (mantissa as Real) * (1.0 / ((1u64 << 53) as Real));
    2.0 * u - 1.0
}
