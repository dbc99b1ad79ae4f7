//! Calibration run configuration.

use anyhow::{ensure, Context, Result};
use ledcal_core::{ImageSize, Optics, Real, RingLayout, DEFAULT_VISIBILITY_THRESHOLD};
use ledcal_optim::backend::BackendSolveOptions;
use ledcal_optim::led_bundle::LedBundleSolveOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a calibration run needs besides the input files.
///
/// Every field has a default, so a JSON file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub num_cameras: usize,
    pub num_leds: usize,
    pub image_size: ImageSize,
    pub optics: Optics,
    /// Radius of the seed camera ring.
    pub ring_radius: Real,
    /// Detections must be strictly brighter than this to count.
    pub visibility_threshold: Real,
    /// Stop the run when a detection file has a malformed row instead of
    /// continuing with the rows read before it.
    pub abort_on_parse_issue: bool,
    pub bundle: LedBundleSolveOptions,
    pub solver: BackendSolveOptions,
    pub outputs: OutputConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            num_cameras: 8,
            num_leds: 50,
            image_size: ImageSize::default(),
            optics: Optics::default(),
            ring_radius: 1.0,
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
            abort_on_parse_issue: false,
            bundle: LedBundleSolveOptions::default(),
            solver: BackendSolveOptions::default(),
            outputs: OutputConfig::default(),
        }
    }
}

/// Output locations, relative to the run root unless absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub obj: PathBuf,
    pub csv: PathBuf,
    /// Render `debug/<c>/projected.png` from `debug/<c>/bright.png`.
    pub overlays: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            obj: PathBuf::from("tmp/out.obj"),
            csv: PathBuf::from("led_positions.csv"),
            overlays: true,
        }
    }
}

impl CalibrationConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_cameras > 0, "num_cameras must be positive");
        ensure!(
            self.image_size.width > 0 && self.image_size.height > 0,
            "image size must be non-empty"
        );
        ensure!(
            self.optics.pixel_size_mm > 0.0 && self.optics.focal_length_mm > 0.0,
            "optics must have positive pixel size and focal length"
        );
        ensure!(self.ring_radius > 0.0, "ring_radius must be positive");
        Ok(())
    }

    pub fn ring(&self) -> RingLayout {
        RingLayout {
            num_cameras: self.num_cameras,
            radius: self.ring_radius,
        }
    }
}
