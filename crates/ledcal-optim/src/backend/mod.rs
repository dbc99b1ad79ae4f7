//! Solver adapters for [`ProblemIR`].
//!
//! An adapter turns named parameter blocks, bounds, fixed indices and
//! residual blocks into the engine's own problem, runs it once and reports
//! the refined blocks with a [`Termination`] and the robust cost on both ends.

mod tiny_solver_backend;

use anyhow::{anyhow, Result};
use nalgebra::{DVector, DVectorView};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::factors::evaluate_factor;
use crate::ir::ProblemIR;

pub use tiny_solver_backend::TinySolverBackend;

/// Solver settings shared by every adapter.
///
/// Tolerances left at `None` fall back to the engine's own defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSolveOptions {
    /// Iteration cap.
    pub max_iters: usize,
    /// Progress printing level passed to the engine; 0 is silent.
    pub verbosity: usize,
    pub linear_solver: Option<LinearSolverKind>,
    /// Stop once an iteration lowers the cost by less than this.
    pub min_abs_decrease: Option<f64>,
    /// Same as `min_abs_decrease`, relative to the current cost.
    pub min_rel_decrease: Option<f64>,
    /// Stop once the cost is at or under this.
    pub min_error: Option<f64>,
}

impl Default for BackendSolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            verbosity: 0,
            linear_solver: Some(LinearSolverKind::SparseCholesky),
            min_abs_decrease: Some(1e-20),
            min_rel_decrease: Some(1e-16),
            min_error: Some(1e-20),
        }
    }
}

/// Factorization used for the normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolverKind {
    SparseCholesky,
    SparseQR,
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Tolerances met.
    Converged,
    /// Stopped at `max_iters` while still making progress.
    IterationLimit,
    /// The engine produced no usable result; parameters are the initial ones.
    NumericalFailure,
}

impl Termination {
    pub fn is_converged(self) -> bool {
        self == Termination::Converged
    }
}

/// Non-fatal notice that the solution may be unconverged.
///
/// Parameters are still returned and may be exported for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceWarning {
    pub termination: Termination,
    pub final_cost: f64,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.termination {
            Termination::IterationLimit => write!(
                f,
                "solver hit the iteration limit before converging (cost {:.6e})",
                self.final_cost
            ),
            Termination::NumericalFailure => write!(
                f,
                "solver failed numerically, returning initial parameters (cost {:.6e})",
                self.final_cost
            ),
            Termination::Converged => write!(f, "solver converged (cost {:.6e})", self.final_cost),
        }
    }
}

/// Refined blocks keyed by IR block name, plus how the run ended.
#[derive(Debug, Clone)]
pub struct BackendSolution {
    pub params: HashMap<String, DVector<f64>>,
    /// Robust cost `0.5 * sum rho(|r|^2)` at the initial values.
    pub initial_cost: f64,
    /// Robust cost at the returned parameters.
    pub final_cost: f64,
    pub termination: Termination,
    /// Iterations performed, when the engine reports them.
    pub iterations: Option<usize>,
}

/// A solver engine that can run a [`ProblemIR`].
pub trait OptimBackend {
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        opts: &BackendSolveOptions,
    ) -> Result<BackendSolution>;
}

/// Robust cost `0.5 * sum rho(|r|^2)` of the IR at the given parameters.
pub fn evaluate_cost(ir: &ProblemIR, params: &HashMap<String, DVector<f64>>) -> Result<f64> {
    let mut sum_rho = 0.0;
    for residual in &ir.residuals {
        let blocks = residual
            .params
            .iter()
            .map(|id| {
                let name = &ir.param(*id).name;
                params
                    .get(name)
                    .map(|v| v.as_view())
                    .ok_or_else(|| anyhow!("missing parameter {} while evaluating cost", name))
            })
            .collect::<Result<Vec<DVectorView<'_, f64>>>>()?;
        let r = evaluate_factor(&residual.factor, &blocks)?;
        sum_rho += residual.loss.rho(r.norm_squared());
    }
    Ok(0.5 * sum_rho)
}
