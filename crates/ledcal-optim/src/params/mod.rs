//! Parameter block layouts.
//!
//! Each block type has a dimension constant and conversions between the
//! `ledcal-core` value type and the dense vector handed to backends:
//!
//! - [`intrinsics`]: `[focal, l1, l2]`, the radial pair is inert,
//! - [`extrinsics`]: `[r0, r1, r2, t0, t1, t2]`, axis-angle then translation,
//! - [`led`]: `[x, y, z]` world position.

pub mod extrinsics;
pub mod intrinsics;
pub mod led;

pub use extrinsics::{pack_extrinsics, unpack_extrinsics, EXTRINSICS_DIM, HEIGHT_IDX};
pub use intrinsics::{pack_intrinsics, unpack_intrinsics, FOCAL_IDX, INTRINSICS_DIM, RADIAL_IDX};
pub use led::{pack_led, unpack_led, LED_DIM};
