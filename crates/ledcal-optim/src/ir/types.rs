use anyhow::{anyhow, ensure, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::params::{EXTRINSICS_DIM, INTRINSICS_DIM, LED_DIM};

/// Index of a parameter block inside one [`ProblemIR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub usize);

/// Box constraint on a single parameter index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub idx: usize,
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    /// Symmetric bound `value ± half_width`.
    pub fn around(idx: usize, value: f64, half_width: f64) -> Self {
        let half_width = half_width.abs();
        Self {
            idx,
            lower: value - half_width,
            upper: value + half_width,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Per-index fixed mask for a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FixedMask {
    fixed_indices: HashSet<usize>,
}

impl FixedMask {
    pub fn all_free() -> Self {
        Self::default()
    }

    pub fn fix_indices(indices: &[usize]) -> Self {
        Self {
            fixed_indices: indices.iter().copied().collect(),
        }
    }

    pub fn is_fixed(&self, idx: usize) -> bool {
        self.fixed_indices.contains(&idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.fixed_indices.iter().copied()
    }
}

/// Robust loss applied to a residual block.
///
/// Each observation gets its own residual block, so the loss acts per point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RobustLoss {
    #[default]
    None,
    Huber {
        scale: f64,
    },
    Cauchy {
        scale: f64,
    },
}

/// Residual models a backend knows how to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    /// Reprojection of one LED into one camera.
    ///
    /// Parameters: `[intrinsics, camera, led]`. `uv` is the observed pixel
    /// relative to the image centre.
    LedReprojection { uv: [f64; 2] },
}

impl FactorKind {
    pub fn residual_dim(&self) -> usize {
        match self {
            FactorKind::LedReprojection { .. } => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamBlock {
    pub id: ParamId,
    pub name: String,
    pub dim: usize,
    pub fixed: FixedMask,
    pub bounds: Option<Vec<Bound>>,
}

/// Residual block definition. `params` follows the factor's parameter order.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub params: Vec<ParamId>,
    pub loss: RobustLoss,
    pub factor: FactorKind,
    pub residual_dim: usize,
}

/// Optimization problem as plain data; backends compile it.
#[derive(Debug, Default, Clone)]
pub struct ProblemIR {
    pub params: Vec<ParamBlock>,
    pub residuals: Vec<ResidualBlock>,
}

impl ProblemIR {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block; ids follow insertion order.
    pub fn add_param_block(
        &mut self,
        name: impl Into<String>,
        dim: usize,
        fixed: FixedMask,
        bounds: Option<Vec<Bound>>,
    ) -> ParamId {
        let id = ParamId(self.params.len());
        self.params.push(ParamBlock {
            id,
            name: name.into(),
            dim,
            fixed,
            bounds,
        });
        id
    }

    pub fn add_residual_block(&mut self, residual: ResidualBlock) {
        self.residuals.push(residual);
    }

    pub fn param_by_name(&self, name: &str) -> Option<ParamId> {
        self.params.iter().find(|p| p.name == name).map(|p| p.id)
    }

    pub fn param(&self, id: ParamId) -> &ParamBlock {
        &self.params[id.0]
    }

    /// Validates internal consistency and factor expectations.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for (idx, param) in self.params.iter().enumerate() {
            ensure!(
                param.id.0 == idx,
                "param id mismatch: expected {}, got {:?}",
                idx,
                param.id
            );
            ensure!(
                names.insert(param.name.as_str()),
                "duplicate param block name {}",
                param.name
            );
            for fixed_idx in param.fixed.iter() {
                ensure!(
                    fixed_idx < param.dim,
                    "param {} fixed index {} out of range",
                    param.name,
                    fixed_idx
                );
            }
            if let Some(bounds) = &param.bounds {
                for bound in bounds {
                    ensure!(
                        bound.idx < param.dim,
                        "param {} bound index {} out of range",
                        param.name,
                        bound.idx
                    );
                    ensure!(
                        bound.lower <= bound.upper,
                        "param {} bound lower {} > upper {}",
                        param.name,
                        bound.lower,
                        bound.upper
                    );
                }
            }
        }

        for (r_idx, residual) in self.residuals.iter().enumerate() {
            ensure!(
                residual.residual_dim == residual.factor.residual_dim(),
                "residual {} dim {} does not match factor expectation {}",
                r_idx,
                residual.residual_dim,
                residual.factor.residual_dim()
            );
            for param in &residual.params {
                ensure!(
                    param.0 < self.params.len(),
                    "residual {} references missing param {:?}",
                    r_idx,
                    param
                );
            }

            match &residual.factor {
                FactorKind::LedReprojection { .. } => {
                    ensure!(
                        residual.params.len() == 3,
                        "LED reprojection factor requires 3 params [intrinsics, camera, led]"
                    );
                    let expected = [INTRINSICS_DIM, EXTRINSICS_DIM, LED_DIM];
                    for (param, dim) in residual.params.iter().zip(expected) {
                        let block = self.param(*param);
                        ensure!(
                            block.dim == dim,
                            "LED reprojection expects {}D block, {} has dim {}",
                            dim,
                            block.name,
                            block.dim
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks that every block has a correctly sized initial value inside its bounds.
    pub fn check_initial(&self, initial: &HashMap<String, DVector<f64>>) -> Result<()> {
        for param in &self.params {
            let init = initial.get(&param.name).ok_or_else(|| {
                anyhow!(
                    "initial values missing parameter {} (id {:?})",
                    param.name,
                    param.id
                )
            })?;
            ensure!(
                init.len() == param.dim,
                "initial dimension mismatch for {}: expected {}, got {}",
                param.name,
                param.dim,
                init.len()
            );
            for bound in param.bounds.iter().flatten() {
                ensure!(
                    bound.contains(init[bound.idx]),
                    "initial value {} of {}[{}] outside bounds [{}, {}]",
                    init[bound.idx],
                    param.name,
                    bound.idx,
                    bound.lower,
                    bound.upper
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn led_problem() -> ProblemIR {
        let mut ir = ProblemIR::new();
        let intr = ir.add_param_block("intrinsics", 3, FixedMask::fix_indices(&[1, 2]), None);
        let cam = ir.add_param_block("camera/0", 6, FixedMask::all_free(), None);
        let led = ir.add_param_block(
            "led/0",
            3,
            FixedMask::all_free(),
            Some(vec![Bound::around(0, 0.0, 0.5)]),
        );
        ir.add_residual_block(ResidualBlock {
            params: vec![intr, cam, led],
            loss: RobustLoss::Huber { scale: 1.0 },
            factor: FactorKind::LedReprojection { uv: [0.0, 0.0] },
            residual_dim: 2,
        });
        ir
    }

    #[test]
    fn validates_led_reprojection_layout() {
        let ir = led_problem();
        ir.validate().unwrap();
        assert_eq!(ir.param_by_name("led/0"), Some(ParamId(2)));
    }

    #[test]
    fn rejects_swapped_parameter_order() {
        let mut ir = led_problem();
        ir.residuals[0].params.swap(1, 2);
        assert!(ir.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_names_and_bad_bounds() {
        let mut ir = led_problem();
        ir.add_param_block("led/0", 3, FixedMask::all_free(), None);
        assert!(ir.validate().is_err());

        let mut ir = led_problem();
        ir.params[2].bounds = Some(vec![Bound {
            idx: 0,
            lower: 1.0,
            upper: -1.0,
        }]);
        assert!(ir.validate().is_err());
    }

    #[test]
    fn initial_values_must_respect_bounds() {
        let ir = led_problem();
        let mut initial = HashMap::new();
        initial.insert("intrinsics".to_string(), dvector![2800.0, 0.0, 0.0]);
        initial.insert("camera/0".to_string(), DVector::zeros(6));
        initial.insert("led/0".to_string(), dvector![0.5, 0.0, 0.0]);
        ir.check_initial(&initial).unwrap();

        initial.insert("led/0".to_string(), dvector![0.6, 0.0, 0.0]);
        assert!(ir.check_initial(&initial).is_err());

        initial.remove("camera/0");
        assert!(ir.check_initial(&initial).is_err());
    }
}
