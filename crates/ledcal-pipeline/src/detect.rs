//! LED spot detection from strobed capture frames.
//!
//! The strand lights one LED at a time on a fixed schedule after a bright
//! trigger flash. Frames are grayscale images in capture order; for each LED
//! the frame at `trigger + offset_k` is blurred and its brightest pixel taken
//! as the LED position.

use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use imageproc::filter::gaussian_blur_f32;
use ledcal_core::{LedDetection, Real, Vec2};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Blur sigma matching a 5x5 Gaussian kernel with automatic sigma.
pub const SPOT_BLUR_SIGMA: f32 = 1.1;

/// 8-bit intensities are mapped into the lower half of the 16-bit range so
/// the blur never clips a saturated blob.
const HALF_RANGE_SCALE: u16 = 128;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("frame sequence ended after {frames} frames while {stage}")]
    NotEnoughFrames { frames: usize, stage: &'static str },
    #[error("no trigger frame brighter than {threshold:.3} (baseline {baseline:.3})")]
    NoTrigger { baseline: f64, threshold: f64 },
    #[error("frame {index} is empty")]
    EmptyFrame { index: usize },
    #[error("invalid flash schedule: {0}")]
    Schedule(&'static str),
    #[error("image error on {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Timing of the LED strobe relative to the trigger frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashSchedule {
    /// Seconds between consecutive LEDs.
    pub period_s: f64,
    /// Delay before LED 0, in periods.
    pub lead_in: f64,
    pub frame_rate: f64,
}

impl Default for FlashSchedule {
    fn default() -> Self {
        // Five 25 Hz ticks per LED, stretched by half a tick over a 50-LED run.
        let tick = 5.0 / 25.0;
        Self {
            period_s: tick + (tick / 2.0) / 50.0,
            lead_in: 2.5,
            frame_rate: 24.0,
        }
    }
}

impl FlashSchedule {
    pub fn validate(&self) -> Result<(), DetectError> {
        if !(self.period_s > 0.0 && self.period_s.is_finite()) {
            return Err(DetectError::Schedule("period must be positive"));
        }
        if !(self.frame_rate > 0.0 && self.frame_rate.is_finite()) {
            return Err(DetectError::Schedule("frame rate must be positive"));
        }
        if !(self.lead_in >= 0.0) {
            return Err(DetectError::Schedule("lead-in must be non-negative"));
        }
        Ok(())
    }

    /// Seconds after the trigger at which LED `k` is lit.
    pub fn led_time(&self, k: usize) -> f64 {
        self.period_s * (k as f64 + self.lead_in)
    }

    /// Frames after the trigger at which LED `k` is lit.
    pub fn frame_offset(&self, k: usize) -> usize {
        (self.led_time(k) * self.frame_rate).round() as usize
    }

    pub fn frame_offsets(&self, num_leds: usize) -> Vec<usize> {
        (0..num_leds).map(|k| self.frame_offset(k)).collect()
    }
}

pub fn mean_brightness(frame: &GrayImage) -> f64 {
    let n = frame.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    frame.as_raw().iter().map(|&v| v as u64).sum::<u64>() as f64 / n as f64
}

/// Brightest spot of the blurred frame: `(pixel, brightness)`.
///
/// The frame is halved into a 16-bit image and blurred. Pixels tied at the
/// peak value that are 4-connected to the first peak in row-major order form
/// the spot, and its reported position is their centroid. Brightness is on
/// the 0-255 scale. Returns `None` for an empty frame.
pub fn brightest_spot(frame: &GrayImage) -> Option<(Vec2, Real)> {
    if frame.width() == 0 || frame.height() == 0 {
        return None;
    }
    let halved: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_fn(frame.width(), frame.height(), |x, y| {
            Luma([u16::from(frame.get_pixel(x, y)[0]) * HALF_RANGE_SCALE])
        });
    let blurred = gaussian_blur_f32(&halved, SPOT_BLUR_SIGMA);

    let peak = blurred.pixels().map(|p| p[0]).max()?;
    let (x0, y0, _) = blurred.enumerate_pixels().find(|(_, _, p)| p[0] == peak)?;
    let centre = plateau_centroid(&blurred, (x0, y0), peak);
    Some((centre, peak as Real / HALF_RANGE_SCALE as Real))
}

/// Centroid of the 4-connected region of `value` pixels containing `seed`.
fn plateau_centroid(img: &ImageBuffer<Luma<u16>, Vec<u16>>, seed: (u32, u32), value: u16) -> Vec2 {
    let (w, h) = img.dimensions();
    let mut visited = vec![false; w as usize * h as usize];
    let mut stack = vec![seed];
    visited[(seed.1 * w + seed.0) as usize] = true;
    let (mut sum, mut count) = (Vec2::zeros(), 0usize);
    while let Some((x, y)) = stack.pop() {
        sum += Vec2::new(x as Real, y as Real);
        count += 1;
        let neighbours = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbours {
            if nx >= w || ny >= h {
                continue;
            }
            let idx = (ny * w + nx) as usize;
            if !visited[idx] && img.get_pixel(nx, ny)[0] == value {
                visited[idx] = true;
                stack.push((nx, ny));
            }
        }
    }
    sum / count as Real
}

/// Result of scanning one capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceDetections {
    pub baseline: f64,
    /// Index of the trigger frame in the capture.
    pub trigger_frame: usize,
    pub detections: Vec<LedDetection>,
}

/// Detect every LED of a strobed capture.
pub fn detect_sequence<I>(
    frames: I,
    num_leds: usize,
    schedule: &FlashSchedule,
) -> Result<SequenceDetections, DetectError>
where
    I: IntoIterator<Item = Result<GrayImage, DetectError>>,
{
    detect_sequence_with(frames, num_leds, schedule, |_, _| Ok(()))
}

/// Like [`detect_sequence`], calling `on_detection` with each LED frame.
pub fn detect_sequence_with<I, F>(
    frames: I,
    num_leds: usize,
    schedule: &FlashSchedule,
    mut on_detection: F,
) -> Result<SequenceDetections, DetectError>
where
    I: IntoIterator<Item = Result<GrayImage, DetectError>>,
    F: FnMut(&GrayImage, &LedDetection) -> Result<(), DetectError>,
{
    schedule.validate()?;
    let mut frames = frames.into_iter();
    let mut seen = 0usize;
    let mut next_frame = |stage: &'static str| -> Result<(usize, GrayImage), DetectError> {
        let frame = frames
            .next()
            .ok_or(DetectError::NotEnoughFrames {
                frames: seen,
                stage,
            })??;
        seen += 1;
        Ok((seen - 1, frame))
    };

    // Frame 0 is unreliable, frame 1 sets the baseline, frame 2 is skipped.
    next_frame("skipping the first frame")?;
    let (_, reference) = next_frame("reading the baseline frame")?;
    let baseline = mean_brightness(&reference);
    next_frame("skipping the reference frame")?;
    info!("baseline brightness {baseline:.3}");

    let threshold = 2.0 * baseline;
    let (mut current_idx, mut current) = loop {
        match next_frame("waiting for the trigger") {
            Ok((idx, frame)) if mean_brightness(&frame) > threshold => break (idx, frame),
            Ok(_) => {}
            Err(DetectError::NotEnoughFrames { .. }) => {
                return Err(DetectError::NoTrigger {
                    baseline,
                    threshold,
                })
            }
            Err(err) => return Err(err),
        }
    };
    let trigger_frame = current_idx;
    debug!("trigger at frame {trigger_frame}");

    let mut detections = Vec::with_capacity(num_leds);
    for (led, offset) in schedule.frame_offsets(num_leds).into_iter().enumerate() {
        let target = trigger_frame + offset;
        while current_idx < target {
            (current_idx, current) = next_frame("reading LED frames")?;
        }
        let (pixel, brightness) = brightest_spot(&current)
            .ok_or(DetectError::EmptyFrame { index: current_idx })?;
        let det = LedDetection {
            led,
            pixel,
            brightness,
        };
        on_detection(&current, &det)?;
        detections.push(det);
    }

    Ok(SequenceDetections {
        baseline,
        trigger_frame,
        detections,
    })
}

/// Write detections in the loader's CSV format.
pub fn write_detections(path: &Path, detections: &[LedDetection]) -> Result<(), DetectError> {
    let mut out = String::from("led,x,y,brightness\n");
    for det in detections {
        out.push_str(&format!(
            "{},{:.3},{:.3},{:.3}\n",
            det.led, det.pixel.x, det.pixel.y, det.brightness
        ));
    }
    let io_err = |source| DetectError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, out).map_err(io_err)
}

/// Frame with the detected spot marked by a filled green circle.
pub fn annotate_detection(frame: &GrayImage, det: &LedDetection) -> RgbImage {
    let mut colored = RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let v = frame.get_pixel(x, y)[0];
        Rgb([v, v, v])
    });
    let center = (det.pixel.x.round() as i32, det.pixel.y.round() as i32);
    draw_filled_circle_mut(&mut colored, center, 5, Rgb([0, 255, 0]));
    colored
}

/// Image files in `dir`, ordered by numeric stem (non-numeric stems last, by name).
pub fn frame_paths(dir: &Path) -> Result<Vec<PathBuf>, DetectError> {
    let io_err = |source| DetectError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "pgm"));
        if is_image {
            paths.push(path);
        }
    }
    paths.sort_by_key(|p| {
        let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        (stem.parse::<u64>().unwrap_or(u64::MAX), stem.to_string())
    });
    Ok(paths)
}

/// Run [`detect_sequence`] over the frames in `frames_dir`.
///
/// With `debug_dir`, each LED frame is also saved as `<debug_dir>/<k>.png`
/// with the detected spot marked.
pub fn detect_frames_dir(
    frames_dir: &Path,
    num_leds: usize,
    schedule: &FlashSchedule,
    debug_dir: Option<&Path>,
) -> Result<SequenceDetections, DetectError> {
    let paths = frame_paths(frames_dir)?;
    info!("{} frames in {}", paths.len(), frames_dir.display());
    if let Some(dir) = debug_dir {
        fs::create_dir_all(dir).map_err(|source| DetectError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let frames = paths.iter().map(|p| load_gray(p));
    detect_sequence_with(frames, num_leds, schedule, |frame, det| {
        let Some(dir) = debug_dir else {
            return Ok(());
        };
        let path = dir.join(format!("{}.png", det.led));
        annotate_detection(frame, det)
            .save(&path)
            .map_err(|source| DetectError::Image { path, source })
    })
}

/// Decode an image file as 8-bit grayscale.
pub fn load_gray(path: &Path) -> Result<GrayImage, DetectError> {
    let to_err = |source| DetectError::Image {
        path: path.to_path_buf(),
        source,
    };
    let reader = image::ImageReader::open(path).map_err(|source| DetectError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(reader.decode().map_err(to_err)?.to_luma8())
}
