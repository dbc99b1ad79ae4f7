//! Core math and geometry primitives for `ledcal`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Vec3`, ...),
//! - the rig camera model (axis-angle extrinsics, shared focal length),
//! - rig seeding helpers (cameras on a horizontal ring),
//! - deterministic synthetic LED strands for tests and demos.
//!
//! Camera pipeline:
//! `pixel - center = f * sensor(rotate(r, P - t))`
//!
//! The camera looks down its local +X axis, sensor x comes from `-y` and sensor
//! y from `+z`. Radial distortion coefficients are carried but inert.

/// Rig camera model and projection.
pub mod camera;
/// Linear algebra type aliases and helpers.
pub mod math;
/// LED detections and the visibility table.
pub mod observation;
/// Rig layout and parameter seeding.
pub mod rig;
/// Synthetic LED strands and observations.
pub mod synthetic;

pub use camera::*;
pub use math::*;
pub use observation::*;
pub use rig::*;
