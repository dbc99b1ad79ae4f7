//! File-level pipeline for LED rig calibration: detection tables in,
//! solved geometry and overlays out.

pub mod config;
pub mod correspondences;
pub mod detect;
pub mod export;
pub mod pipeline;

pub use config::{CalibrationConfig, OutputConfig};
pub use correspondences::{
    build_correspondences, camera_file, load_camera_file, CameraDetections, LoadError, ParseIssue,
    ParseIssueKind,
};
pub use detect::{detect_sequence, DetectError, FlashSchedule, SequenceDetections};
pub use export::{read_led_positions, write_led_positions, write_obj};
pub use pipeline::{run_calibration, CalibrationReport, CameraFit, CameraLoadSummary};
