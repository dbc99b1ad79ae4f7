//! End-to-end calibration run over a capture directory.
//!
//! Layout under the run root:
//!
//! - `points/<c>.csv`: detection table of camera `c` (input),
//! - `debug/<c>/bright.png`: optional reference frame of camera `c` (input),
//! - `debug/<c>/projected.png`: reprojection overlay (output),
//! - the OBJ and CSV files named in [`OutputConfig`](crate::OutputConfig).

use crate::config::CalibrationConfig;
use crate::correspondences::{build_correspondences, camera_file, load_camera_file, ParseIssue};
use crate::export::{render_overlay, write_led_positions, write_obj, OverlayStats, SolvedRig};
use anyhow::{bail, ensure, Result};
use ledcal_core::{CorrespondenceSet, Extrinsics, Real, Vec3};
use ledcal_optim::led_bundle::{
    optimize_led_bundle, pair_residuals, LedBundleDataset, LedBundleInit, LedBundleResult,
    SolveReport,
};
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// How loading went for one camera.
#[derive(Debug, Clone, Serialize)]
pub struct CameraLoadSummary {
    pub camera: usize,
    pub path: PathBuf,
    /// Rows kept from the file.
    pub records: usize,
    /// Rows that passed the brightness gate.
    pub visible: usize,
    /// Row that stopped parsing early, if any.
    pub issue: Option<ParseIssue>,
    /// Set when the file could not be used at all.
    pub error: Option<String>,
}

/// Reprojection fit of one camera at the solution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraFit {
    pub camera: usize,
    pub residuals: usize,
    /// Root mean square reprojection error in pixels; `None` without residuals.
    pub rms_px: Option<Real>,
    pub degenerate: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WrittenFiles {
    pub obj: PathBuf,
    pub csv: PathBuf,
    pub overlays: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub loads: Vec<CameraLoadSummary>,
    pub solve: SolveReport,
    /// Convergence warning text, present when the solve did not converge.
    pub warning: Option<String>,
    pub focal: Real,
    pub cameras: Vec<Extrinsics>,
    pub leds: Vec<Vec3>,
    pub unobserved_leds: Vec<usize>,
    /// Cameras without a visible detection; their poses are the seeds.
    pub unobserved_cameras: Vec<usize>,
    pub fits: Vec<CameraFit>,
    pub outputs: WrittenFiles,
}

/// Load, solve and export one capture.
///
/// Per-camera load failures and non-convergence are logged and reported but
/// do not stop the run. It fails when no camera contributes a visible
/// detection, when an output cannot be written, or on a malformed row while
/// `abort_on_parse_issue` is set.
pub fn run_calibration(root: &Path, config: &CalibrationConfig) -> Result<CalibrationReport> {
    config.validate()?;

    let (set, loads) = load_cameras(root, config)?;
    let dataset = LedBundleDataset::from_correspondences(&set, config.image_size)?;
    ensure!(
        !dataset.observations.is_empty(),
        "no visible detections under {}",
        root.join("points").display()
    );
    info!(
        "{} visible pairs over {} cameras and {} leds",
        dataset.observations.len(),
        config.num_cameras,
        config.num_leds
    );

    let unseen = set.unobserved_leds();
    if !unseen.is_empty() {
        warn!("leds {unseen:?} were not visible in any camera and keep their seed");
    }

    let init = LedBundleInit::seeded(config.num_leds, &config.optics, &config.ring());
    let result = optimize_led_bundle(&dataset, &init, &config.bundle, &config.solver)?;
    let warning = result.report.warning().map(|w| {
        warn!("{w}; exporting the best available solution");
        w.to_string()
    });
    if !result.unobserved_cameras.is_empty() {
        warn!(
            "cameras {:?} saw no led and keep their seed pose",
            result.unobserved_cameras
        );
    }

    let fits = camera_fits(&dataset, &result);
    for fit in &fits {
        if let Some(rms) = fit.rms_px {
            info!("camera {}: {} residuals, rms {:.4} px", fit.camera, fit.residuals, rms);
        }
    }

    let outputs = export(root, config, &set, &result)?;

    Ok(CalibrationReport {
        loads,
        solve: result.report,
        warning,
        focal: result.intrinsics.focal,
        cameras: result.cameras,
        leds: result.leds,
        unobserved_leds: result.unobserved_leds,
        unobserved_cameras: result.unobserved_cameras,
        fits,
        outputs,
    })
}

fn load_cameras(
    root: &Path,
    config: &CalibrationConfig,
) -> Result<(CorrespondenceSet, Vec<CameraLoadSummary>)> {
    let mut loaded = Vec::with_capacity(config.num_cameras);
    let mut loads = Vec::with_capacity(config.num_cameras);

    for camera in 0..config.num_cameras {
        let path = camera_file(root, camera);
        let mut summary = CameraLoadSummary {
            camera,
            path: path.clone(),
            records: 0,
            visible: 0,
            issue: None,
            error: None,
        };
        match load_camera_file(camera, &path, config.num_leds) {
            Ok(detections) => {
                if let Some(issue) = &detections.issue {
                    if config.abort_on_parse_issue {
                        bail!("{}: {}", path.display(), issue);
                    }
                    warn!(
                        "{}: {}; keeping {} rows read before it",
                        path.display(),
                        issue,
                        detections.records.len()
                    );
                }
                summary.records = detections.records.len();
                summary.issue = detections.issue.clone();
                loaded.push(detections);
            }
            Err(err) => {
                warn!("camera {camera} skipped: {err}");
                summary.error = Some(err.to_string());
            }
        }
        loads.push(summary);
    }

    let set = build_correspondences(
        &loaded,
        config.num_leds,
        config.num_cameras,
        config.visibility_threshold,
    )?;
    for summary in &mut loads {
        summary.visible = set.visible_in_camera(summary.camera);
    }
    Ok((set, loads))
}

fn camera_fits(dataset: &LedBundleDataset, result: &LedBundleResult) -> Vec<CameraFit> {
    let mut sums = vec![(0usize, 0.0, 0usize); dataset.num_cameras];
    for pair in pair_residuals(dataset, &result.intrinsics, &result.cameras, &result.leds) {
        let (count, sq, degenerate) = &mut sums[pair.camera];
        match pair.residual {
            Ok(r) => {
                *count += 1;
                *sq += r.norm_squared();
            }
            Err(_) => *degenerate += 1,
        }
    }
    sums.into_iter()
        .enumerate()
        .map(|(camera, (residuals, sq, degenerate))| CameraFit {
            camera,
            residuals,
            rms_px: (residuals > 0).then(|| (sq / residuals as Real).sqrt()),
            degenerate,
        })
        .collect()
}

/// Directory of the per-camera debug images.
pub fn debug_dir(root: &Path, camera: usize) -> PathBuf {
    root.join("debug").join(camera.to_string())
}

fn export(
    root: &Path,
    config: &CalibrationConfig,
    set: &CorrespondenceSet,
    result: &LedBundleResult,
) -> Result<WrittenFiles> {
    // Absolute output paths replace the root when joined.
    let obj = root.join(&config.outputs.obj);
    let csv = root.join(&config.outputs.csv);
    write_obj(&obj, &result.leds, &result.cameras)?;
    write_led_positions(&csv, &result.leds)?;
    info!("wrote {} and {}", obj.display(), csv.display());

    let mut overlays = Vec::new();
    if config.outputs.overlays {
        let rig = SolvedRig {
            intrinsics: &result.intrinsics,
            cameras: &result.cameras,
            leds: &result.leds,
            image_size: config.image_size,
        };
        for camera in 0..config.num_cameras {
            let dir = debug_dir(root, camera);
            let input = dir.join("bright.png");
            let output = dir.join("projected.png");
            if !input.is_file() {
                info!("no {}, skipping overlay", input.display());
                continue;
            }
            match render_overlay(&input, &output, set, camera, &rig) {
                Ok(OverlayStats {
                    lines,
                    degenerate,
                    offscreen,
                }) => {
                    if degenerate > 0 {
                        warn!("camera {camera}: {degenerate} degenerate pairs not drawn");
                    }
                    if offscreen > 0 {
                        info!("camera {camera}: {offscreen} segments fall outside the image");
                    }
                    info!("camera {camera}: {lines} overlay lines");
                    overlays.push(output);
                }
                Err(err) => warn!("camera {camera} overlay failed: {err:#}"),
            }
        }
    }

    Ok(WrittenFiles {
        obj,
        csv,
        overlays,
    })
}
