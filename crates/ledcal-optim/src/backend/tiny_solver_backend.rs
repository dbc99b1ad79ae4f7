use crate::backend::{
    evaluate_cost, BackendSolution, BackendSolveOptions, LinearSolverKind, OptimBackend,
    Termination,
};
use crate::factors::reprojection::led_reprojection_generic;
use crate::ir::{FactorKind, ProblemIR, ResidualBlock, RobustLoss};
use anyhow::{ensure, Result};
use log::{debug, warn};
use nalgebra::DVector;
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::loss_functions::{CauchyLoss, HuberLoss, Loss};
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::{linear::sparse::LinearSolverType, LevenbergMarquardtOptimizer};

/// Relative cost decrease one extra step must achieve for a stopped solve
/// to count as unconverged.
const EXTRA_STEP_REL_DECREASE: f64 = 1e-9;

/// tiny-solver backend adapter.
#[derive(Debug, Clone, Copy)]
pub struct TinySolverBackend;

impl TinySolverBackend {
    fn compile(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
    ) -> Result<(Problem, HashMap<String, DVector<f64>>)> {
        ir.validate()?;
        ir.check_initial(initial)?;

        let mut problem = Problem::new();
        let mut initial_map = HashMap::with_capacity(ir.params.len());

        for param in &ir.params {
            for idx in param.fixed.iter() {
                problem.fix_variable(&param.name, idx);
            }
            if let Some(bounds) = &param.bounds {
                for bound in bounds {
                    problem.set_variable_bounds(&param.name, bound.idx, bound.lower, bound.upper);
                }
            }
            // Blocks outside the IR are not handed to the engine.
            initial_map.insert(param.name.clone(), initial[&param.name].clone());
        }

        for residual in &ir.residuals {
            let (factor, loss) = compile_factor(residual)?;
            let param_refs: Vec<&str> = residual
                .params
                .iter()
                .map(|id| ir.param(*id).name.as_str())
                .collect();
            problem.add_residual_block(residual.residual_dim, &param_refs, factor, loss);
        }

        debug!(
            "compiled {} parameter blocks and {} residual blocks",
            ir.params.len(),
            ir.residuals.len()
        );
        Ok((problem, initial_map))
    }
}

impl OptimBackend for TinySolverBackend {
    fn solve(
        &self,
        ir: &ProblemIR,
        initial: &HashMap<String, DVector<f64>>,
        opts: &BackendSolveOptions,
    ) -> Result<BackendSolution> {
        let (problem, initial_map) = self.compile(ir, initial)?;
        let initial_cost = evaluate_cost(ir, &initial_map)?;
        let optimizer = LevenbergMarquardtOptimizer::default();

        let solution = optimizer
            .optimize(&problem, &initial_map, Some(to_optimizer_options(opts)))
            .filter(all_finite);
        let Some(solution) = solution else {
            warn!("tiny-solver returned no usable solution");
            return Ok(BackendSolution {
                params: initial_map,
                initial_cost,
                final_cost: initial_cost,
                termination: Termination::NumericalFailure,
                iterations: None,
            });
        };

        let final_cost = evaluate_cost(ir, &solution)?;
        let termination = if !final_cost.is_finite() {
            Termination::NumericalFailure
        } else if final_cost <= opts.min_error.unwrap_or(0.0) {
            Termination::Converged
        } else {
            classify_stop(&optimizer, &problem, ir, &solution, final_cost, opts)?
        };
        debug!(
            "tiny-solver cost {:.6e} -> {:.6e} ({:?})",
            initial_cost, final_cost, termination
        );

        if termination == Termination::NumericalFailure {
            return Ok(BackendSolution {
                params: initial_map,
                initial_cost,
                final_cost: initial_cost,
                termination,
                iterations: None,
            });
        }

        Ok(BackendSolution {
            params: solution,
            initial_cost,
            final_cost,
            termination,
            iterations: None,
        })
    }
}

/// tiny-solver does not report why it stopped, so run a single extra
/// iteration from the solution: if it still lowers the cost noticeably the
/// solve was cut short by the iteration cap.
fn classify_stop(
    optimizer: &LevenbergMarquardtOptimizer,
    problem: &Problem,
    ir: &ProblemIR,
    solution: &HashMap<String, DVector<f64>>,
    final_cost: f64,
    opts: &BackendSolveOptions,
) -> Result<Termination> {
    let step_opts = BackendSolveOptions {
        max_iters: 1,
        verbosity: 0,
        ..opts.clone()
    };
    let Some(stepped) = optimizer
        .optimize(problem, solution, Some(to_optimizer_options(&step_opts)))
        .filter(all_finite)
    else {
        return Ok(Termination::Converged);
    };
    let stepped_cost = evaluate_cost(ir, &stepped)?;
    if final_cost - stepped_cost > EXTRA_STEP_REL_DECREASE * final_cost {
        Ok(Termination::IterationLimit)
    } else {
        Ok(Termination::Converged)
    }
}

fn all_finite(params: &HashMap<String, DVector<f64>>) -> bool {
    params.values().all(|v| v.iter().all(|x| x.is_finite()))
}

fn to_optimizer_options(opts: &BackendSolveOptions) -> OptimizerOptions {
    let mut options = OptimizerOptions {
        max_iteration: opts.max_iters,
        verbosity_level: opts.verbosity,
        ..OptimizerOptions::default()
    };
    if let Some(solver) = opts.linear_solver {
        options.linear_solver_type = match solver {
            LinearSolverKind::SparseCholesky => LinearSolverType::SparseCholesky,
            LinearSolverKind::SparseQR => LinearSolverType::SparseQR,
        };
    }
    if let Some(v) = opts.min_abs_decrease {
        options.min_abs_error_decrease_threshold = v;
    }
    if let Some(v) = opts.min_rel_decrease {
        options.min_rel_error_decrease_threshold = v;
    }
    if let Some(v) = opts.min_error {
        options.min_error_threshold = v;
    }
    options
}

fn compile_loss(loss: RobustLoss) -> Result<Option<Box<dyn Loss + Send>>> {
    match loss {
        RobustLoss::None => Ok(None),
        RobustLoss::Huber { scale } => {
            ensure!(scale > 0.0, "Huber scale must be positive");
            Ok(Some(Box::new(HuberLoss::new(scale))))
        }
        RobustLoss::Cauchy { scale } => {
            ensure!(scale > 0.0, "Cauchy scale must be positive");
            Ok(Some(Box::new(CauchyLoss::new(scale))))
        }
    }
}

type CompiledFactor = (
    Box<dyn tiny_solver::factors::FactorImpl + Send>,
    Option<Box<dyn Loss + Send>>,
);

fn compile_factor(residual: &ResidualBlock) -> Result<CompiledFactor> {
    let loss = compile_loss(residual.loss)?;
    match &residual.factor {
        FactorKind::LedReprojection { uv } => {
            Ok((Box::new(TinyLedReprojectionFactor { uv: *uv }), loss))
        }
    }
}

#[derive(Debug, Clone)]
struct TinyLedReprojectionFactor {
    uv: [f64; 2],
}

impl<T: nalgebra::RealField> Factor<T> for TinyLedReprojectionFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(
            params.len(),
            3,
            "expected [intrinsics, camera, led] parameter blocks"
        );
        let r = led_reprojection_generic(
            params[0].as_view(),
            params[1].as_view(),
            params[2].as_view(),
            self.uv,
        );
        DVector::from_row_slice(r.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Bound, FixedMask};
    use crate::params::{pack_extrinsics, pack_intrinsics, pack_led};
    use approx::assert_relative_eq;
    use ledcal_core::{project, Intrinsics, RingLayout, Vec3};

    /// Four fixed cameras observing one free LED.
    fn single_led_problem(truth: Vec3) -> (ProblemIR, HashMap<String, DVector<f64>>) {
        let intr = Intrinsics::new(1000.0);
        let ring = RingLayout::new(4);
        let mut ir = ProblemIR::new();
        let mut initial = HashMap::new();

        let intr_id = ir.add_param_block("intrinsics", 3, FixedMask::fix_indices(&[0, 1, 2]), None);
        initial.insert("intrinsics".to_string(), pack_intrinsics(&intr));
        let led_id = ir.add_param_block(
            "led/0",
            3,
            FixedMask::all_free(),
            Some((0..3).map(|i| Bound::around(i, 0.0, 0.5)).collect()),
        );
        initial.insert("led/0".to_string(), pack_led(&Vec3::zeros()));

        for (c, extr) in ring.seed_all().iter().enumerate() {
            let name = format!("camera/{c}");
            let cam_id = ir.add_param_block(&name, 6, FixedMask::fix_indices(&[0, 1, 2, 3, 4, 5]), None);
            initial.insert(name, pack_extrinsics(extr));
            let uv = project(&intr, extr, &truth).unwrap().xy;
            ir.add_residual_block(ResidualBlock {
                params: vec![intr_id, cam_id, led_id],
                loss: RobustLoss::Huber { scale: 1.0 },
                factor: FactorKind::LedReprojection { uv: [uv.x, uv.y] },
                residual_dim: 2,
            });
        }
        (ir, initial)
    }

    #[test]
    fn recovers_single_led() {
        let truth = Vec3::new(0.1, -0.05, 0.08);
        let (ir, initial) = single_led_problem(truth);
        let solution = TinySolverBackend
            .solve(&ir, &initial, &BackendSolveOptions::default())
            .unwrap();

        assert_eq!(solution.termination, Termination::Converged);
        assert!(solution.initial_cost > solution.final_cost);
        assert!(solution.iterations.is_none());
        let led = &solution.params["led/0"];
        assert_relative_eq!(led[0], truth.x, epsilon = 1e-8);
        assert_relative_eq!(led[1], truth.y, epsilon = 1e-8);
        assert_relative_eq!(led[2], truth.z, epsilon = 1e-8);
    }

    #[test]
    fn bounds_clamp_the_solution() {
        // Truth sits outside the ±0.5 box on x.
        let (ir, initial) = single_led_problem(Vec3::new(0.7, 0.0, 0.0));
        let solution = TinySolverBackend
            .solve(&ir, &initial, &BackendSolveOptions::default())
            .unwrap();
        let led = &solution.params["led/0"];
        assert!(led[0] <= 0.5 + 1e-12);
    }

    #[test]
    fn infeasible_initial_values_are_rejected() {
        let (ir, mut initial) = single_led_problem(Vec3::zeros());
        initial.insert("led/0".to_string(), pack_led(&Vec3::new(0.0, 0.9, 0.0)));
        assert!(TinySolverBackend
            .solve(&ir, &initial, &BackendSolveOptions::default())
            .is_err());
    }

    #[test]
    fn iteration_cap_is_reported() {
        let (ir, initial) = single_led_problem(Vec3::new(0.2, -0.15, 0.1));
        let opts = BackendSolveOptions {
            max_iters: 1,
            ..BackendSolveOptions::default()
        };
        let solution = TinySolverBackend.solve(&ir, &initial, &opts).unwrap();
        assert_eq!(solution.termination, Termination::IterationLimit);
        assert!(solution.final_cost.is_finite());
    }

    #[test]
    fn cost_matches_huber_by_hand() {
        // Cameras 1 and 3 see the offset 10 px from the seed, cameras 0 and 2
        // look straight along it.
        let (ir, initial) = single_led_problem(Vec3::new(0.0, 0.01, 0.0));
        let cost = evaluate_cost(&ir, &initial).unwrap();
        let per_block = RobustLoss::Huber { scale: 1.0 }.rho(100.0);
        assert_relative_eq!(per_block, 19.0);
        assert_relative_eq!(cost, 0.5 * 2.0 * per_block, epsilon = 1e-6);
    }
}
