//! Multi-camera LED bundle adjustment.
//!
//! Optimizes the shared focal length, every camera pose (axis-angle +
//! world position) and every observed LED position. Each visible
//! (LED, camera) pair contributes one reprojection residual with parameter
//! order `[intrinsics, camera/<c>, led/<l>]`.
//!
//! No camera is fixed, so global rotation, translation and scale are only
//! pinned down by the bounds; compare solutions up to a similarity.

use crate::backend::{
    BackendSolveOptions, ConvergenceWarning, OptimBackend, Termination, TinySolverBackend,
};
use crate::ir::{Bound, FactorKind, FixedMask, ProblemIR, ResidualBlock, RobustLoss};
use crate::params::{
    pack_extrinsics, pack_intrinsics, pack_led, unpack_extrinsics, unpack_intrinsics, unpack_led,
    EXTRINSICS_DIM, FOCAL_IDX, HEIGHT_IDX, INTRINSICS_DIM, LED_DIM, RADIAL_IDX,
};
use anyhow::{anyhow, ensure, Result};
use ledcal_core::{
    project, CorrespondenceSet, Extrinsics, ImageSize, Intrinsics, Optics, ProjectionError,
    RingLayout, Vec2, Vec3,
};
use log::{debug, info};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const INTRINSICS_BLOCK: &str = "intrinsics";

pub fn camera_block(cam_idx: usize) -> String {
    format!("camera/{}", cam_idx)
}

pub fn led_block(led: usize) -> String {
    format!("led/{}", led)
}

/// A visible detection, relative to the image centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedObservation {
    pub led: usize,
    pub camera: usize,
    pub uv: Vec2,
}

#[derive(Debug, Clone)]
pub struct LedBundleDataset {
    pub num_leds: usize,
    pub num_cameras: usize,
    pub observations: Vec<LedObservation>,
}

impl LedBundleDataset {
    pub fn new(num_leds: usize, num_cameras: usize, observations: Vec<LedObservation>) -> Result<Self> {
        ensure!(num_cameras > 0, "need at least one camera");
        for obs in &observations {
            ensure!(
                obs.led < num_leds && obs.camera < num_cameras,
                "observation (led {}, camera {}) out of range ({} leds, {} cameras)",
                obs.led,
                obs.camera,
                num_leds,
                num_cameras
            );
        }
        Ok(Self {
            num_leds,
            num_cameras,
            observations,
        })
    }

    /// Visible pairs of a correspondence set, centred on the image.
    pub fn from_correspondences(set: &CorrespondenceSet, image_size: ImageSize) -> Result<Self> {
        let observations = set
            .visible_pairs()
            .map(|(led, camera, obs)| LedObservation {
                led,
                camera,
                uv: image_size.centered(&obs.pixel),
            })
            .collect();
        Self::new(set.num_leds(), set.num_cameras(), observations)
    }

    /// `observed[l]` is true when LED `l` has at least one observation.
    pub fn observed_leds(&self) -> Vec<bool> {
        let mut observed = vec![false; self.num_leds];
        for obs in &self.observations {
            observed[obs.led] = true;
        }
        observed
    }

    /// `observed[c]` is true when camera `c` has at least one observation.
    pub fn observed_cameras(&self) -> Vec<bool> {
        let mut observed = vec![false; self.num_cameras];
        for obs in &self.observations {
            observed[obs.camera] = true;
        }
        observed
    }
}

/// Initial values for LED bundle adjustment.
#[derive(Debug, Clone)]
pub struct LedBundleInit {
    pub intrinsics: Intrinsics,
    pub cameras: Vec<Extrinsics>,
    pub leds: Vec<Vec3>,
}

impl LedBundleInit {
    /// Seed from the optics and a camera ring; LEDs start at the origin.
    pub fn seeded(num_leds: usize, optics: &Optics, ring: &RingLayout) -> Self {
        Self {
            intrinsics: optics.seed_intrinsics(),
            cameras: ring.seed_all(),
            leds: vec![Vec3::zeros(); num_leds],
        }
    }
}

/// Loss and trust-region bounds for LED bundle adjustment.
///
/// A `None` bound leaves that parameter unconstrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedBundleSolveOptions {
    pub robust_loss: RobustLoss,
    /// Focal bound as a fraction of the seed focal length.
    pub focal_rel_bound: Option<f64>,
    /// Half-width of the bound on each camera's height (`t_z`).
    pub camera_height_bound: Option<f64>,
    /// Half-width of the bound on each LED coordinate.
    pub led_bound: Option<f64>,
    /// Hold the inert radial coefficients fixed.
    pub fix_radial: bool,
}

impl Default for LedBundleSolveOptions {
    fn default() -> Self {
        Self {
            robust_loss: RobustLoss::Huber { scale: 1.0 },
            focal_rel_bound: Some(0.1),
            camera_height_bound: Some(0.01),
            led_bound: Some(0.5),
            fix_radial: true,
        }
    }
}

/// Outcome of one bundle solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveReport {
    pub initial_cost: f64,
    pub final_cost: f64,
    pub termination: Termination,
    pub iterations: Option<usize>,
    pub num_residuals: usize,
    /// `(led, camera)` pairs on the camera's lateral plane at the solution.
    pub degenerate_pairs: Vec<(usize, usize)>,
}

impl SolveReport {
    /// Non-fatal warning when the solve did not converge.
    pub fn warning(&self) -> Option<ConvergenceWarning> {
        (!self.termination.is_converged()).then_some(ConvergenceWarning {
            termination: self.termination,
            final_cost: self.final_cost,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LedBundleResult {
    pub intrinsics: Intrinsics,
    /// One pose per camera; cameras without observations keep their seed.
    pub cameras: Vec<Extrinsics>,
    /// One position per LED; unobserved LEDs keep their seed.
    pub leds: Vec<Vec3>,
    pub unobserved_leds: Vec<usize>,
    pub unobserved_cameras: Vec<usize>,
    pub report: SolveReport,
}

/// Build IR and initial values for LED bundle adjustment.
///
/// Returns an error if the initial values violate the requested bounds.
pub fn build_led_bundle_ir(
    dataset: &LedBundleDataset,
    initial: &LedBundleInit,
    opts: &LedBundleSolveOptions,
) -> Result<(ProblemIR, HashMap<String, DVector<f64>>)> {
    ensure!(
        initial.cameras.len() == dataset.num_cameras,
        "camera seed count {} != num_cameras {}",
        initial.cameras.len(),
        dataset.num_cameras
    );
    ensure!(
        initial.leds.len() == dataset.num_leds,
        "LED seed count {} != num_leds {}",
        initial.leds.len(),
        dataset.num_leds
    );

    let mut ir = ProblemIR::new();
    let mut initial_map = HashMap::new();

    // 1. Shared intrinsics
    let focal = initial.intrinsics.focal;
    let intr_bounds = opts
        .focal_rel_bound
        .map(|rel| vec![Bound::around(FOCAL_IDX, focal, rel * focal.abs())]);
    let intr_fixed = if opts.fix_radial {
        FixedMask::fix_indices(&RADIAL_IDX)
    } else {
        FixedMask::all_free()
    };
    let intr_id = ir.add_param_block(INTRINSICS_BLOCK, INTRINSICS_DIM, intr_fixed, intr_bounds);
    initial_map.insert(INTRINSICS_BLOCK.to_string(), pack_intrinsics(&initial.intrinsics));

    // 2. Extrinsics of cameras that see at least one LED
    let observed_cams = dataset.observed_cameras();
    let mut cam_ids = vec![None; dataset.num_cameras];
    for (cam_idx, extr) in initial.cameras.iter().enumerate() {
        if !observed_cams[cam_idx] {
            continue;
        }
        let bounds = opts
            .camera_height_bound
            .map(|h| vec![Bound::around(HEIGHT_IDX, extr.translation.z, h)]);
        let key = camera_block(cam_idx);
        let id = ir.add_param_block(&key, EXTRINSICS_DIM, FixedMask::all_free(), bounds);
        cam_ids[cam_idx] = Some(id);
        initial_map.insert(key, pack_extrinsics(extr));
    }

    // 3. Observed LEDs
    let observed = dataset.observed_leds();
    let mut led_ids = vec![None; dataset.num_leds];
    for (led, p) in initial.leds.iter().enumerate() {
        if !observed[led] {
            continue;
        }
        let bounds = opts.led_bound.map(|b| {
            (0..LED_DIM)
                .map(|i| Bound::around(i, p[i], b))
                .collect::<Vec<_>>()
        });
        let key = led_block(led);
        led_ids[led] = Some(ir.add_param_block(&key, LED_DIM, FixedMask::all_free(), bounds));
        initial_map.insert(key, pack_led(p));
    }

    // 4. One residual per visible pair
    for obs in &dataset.observations {
        let led_id = led_ids[obs.led]
            .ok_or_else(|| anyhow!("led {} observed but has no parameter block", obs.led))?;
        let cam_id = cam_ids[obs.camera].ok_or_else(|| {
            anyhow!("camera {} observed but has no parameter block", obs.camera)
        })?;
        ir.add_residual_block(ResidualBlock {
            params: vec![intr_id, cam_id, led_id],
            loss: opts.robust_loss,
            factor: FactorKind::LedReprojection {
                uv: [obs.uv.x, obs.uv.y],
            },
            residual_dim: 2,
        });
    }

    ir.validate()?;
    ir.check_initial(&initial_map)?;
    debug!(
        "LED bundle IR: {} blocks, {} residuals, {} unobserved leds, {} unobserved cameras",
        ir.params.len(),
        ir.residuals.len(),
        observed.iter().filter(|o| !**o).count(),
        observed_cams.iter().filter(|o| !**o).count()
    );
    Ok((ir, initial_map))
}

/// Residual `projected - observed` of one observation, or the projection error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairResidual {
    pub led: usize,
    pub camera: usize,
    pub residual: Result<Vec2, ProjectionError>,
}

/// Evaluate every observation of the dataset with the checked projection.
pub fn pair_residuals(
    dataset: &LedBundleDataset,
    intrinsics: &Intrinsics,
    cameras: &[Extrinsics],
    leds: &[Vec3],
) -> Vec<PairResidual> {
    dataset
        .observations
        .iter()
        .map(|obs| PairResidual {
            led: obs.led,
            camera: obs.camera,
            residual: project(intrinsics, &cameras[obs.camera], &leds[obs.led])
                .map(|p| p.xy - obs.uv),
        })
        .collect()
}

/// Optimize LED positions, camera poses and focal length.
///
/// Non-convergence is reported in [`SolveReport::termination`], never as an
/// error, and the best available parameters are returned.
pub fn optimize_led_bundle(
    dataset: &LedBundleDataset,
    initial: &LedBundleInit,
    opts: &LedBundleSolveOptions,
    backend_opts: &BackendSolveOptions,
) -> Result<LedBundleResult> {
    let (ir, initial_map) = build_led_bundle_ir(dataset, initial, opts)?;
    let solution = TinySolverBackend.solve(&ir, &initial_map, backend_opts)?;

    let block = |name: &str| {
        solution
            .params
            .get(name)
            .ok_or_else(|| anyhow!("solution missing parameter block {}", name))
    };

    let intrinsics = unpack_intrinsics(block(INTRINSICS_BLOCK)?.as_view())?;
    let mut cameras = initial.cameras.clone();
    let mut unobserved_cameras = Vec::new();
    for (cam_idx, observed) in dataset.observed_cameras().into_iter().enumerate() {
        if observed {
            cameras[cam_idx] = unpack_extrinsics(block(&camera_block(cam_idx))?.as_view())?;
        } else {
            unobserved_cameras.push(cam_idx);
        }
    }

    let mut leds = initial.leds.clone();
    let mut unobserved_leds = Vec::new();
    for (led, observed) in dataset.observed_leds().into_iter().enumerate() {
        if observed {
            leds[led] = unpack_led(block(&led_block(led))?.as_view())?;
        } else {
            unobserved_leds.push(led);
        }
    }

    let degenerate_pairs: Vec<(usize, usize)> = pair_residuals(dataset, &intrinsics, &cameras, &leds)
        .into_iter()
        .filter(|p| p.residual.is_err())
        .map(|p| (p.led, p.camera))
        .collect();

    let report = SolveReport {
        initial_cost: solution.initial_cost,
        final_cost: solution.final_cost,
        termination: solution.termination,
        iterations: solution.iterations,
        num_residuals: ir.residuals.len(),
        degenerate_pairs,
    };
    info!(
        "LED bundle: cost {:.6e} -> {:.6e}, {:?}, focal {:.3}",
        report.initial_cost, report.final_cost, report.termination, intrinsics.focal
    );

    Ok(LedBundleResult {
        intrinsics,
        cameras,
        leds,
        unobserved_leds,
        unobserved_cameras,
        report,
    })
}
