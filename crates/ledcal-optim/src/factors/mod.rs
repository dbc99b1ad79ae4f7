//! Residual factors with automatic differentiation support.
//!
//! Factor functions are generic over [`nalgebra::RealField`] so the same code
//! evaluates in `f64` and in dual numbers:
//!
//! - parameters arrive as `DVectorView`s in the factor's block order,
//! - constants are lifted with `T::from_f64(..).unwrap()`,
//! - values are `.clone()`d instead of mutated in place,
//! - dimensions are checked with `debug_assert!`.

pub mod reprojection;

use anyhow::{ensure, Result};
use nalgebra::{DVector, DVectorView};

use crate::ir::FactorKind;

/// Evaluate a factor in `f64` for the given parameter blocks.
pub fn evaluate_factor(factor: &FactorKind, params: &[DVectorView<'_, f64>]) -> Result<DVector<f64>> {
    match factor {
        FactorKind::LedReprojection { uv } => {
            ensure!(
                params.len() == 3,
                "LED reprojection expects 3 parameter blocks, got {}",
                params.len()
            );
            let r = reprojection::led_reprojection_generic(
                params[0].clone(),
                params[1].clone(),
                params[2].clone(),
                *uv,
            );
            Ok(DVector::from_row_slice(r.as_slice()))
        }
    }
}
