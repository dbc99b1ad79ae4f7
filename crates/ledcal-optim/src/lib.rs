//! Bundle adjustment for LED rig calibration, built on tiny-solver.
//!
//! Problems are described as a backend-agnostic [`ir::ProblemIR`] (parameter
//! blocks, bounds, fixed indices, residual blocks) and compiled by a backend
//! adapter. Residual factors are generic over `RealField` so they run in
//! `f64` and in dual numbers.

pub mod backend;
pub mod factors;
pub mod ir;
pub mod jacobian_ad;
pub mod params;
pub mod problems;
pub mod robust;

pub use crate::backend::{BackendSolveOptions, ConvergenceWarning, Termination};
pub use crate::ir::RobustLoss;
pub use crate::problems::led_bundle;
