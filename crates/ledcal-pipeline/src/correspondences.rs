//! Per-camera detection tables.
//!
//! Each camera has a CSV file with header `led,x,y,brightness` and one
//! `int,float,float,float` row per detection. Reading stops at the first row
//! that does not fit; rows read before it are kept and the stop is reported
//! as a [`ParseIssue`] so the caller can decide whether partial data is
//! acceptable.

use anyhow::Result;
use ledcal_core::{CorrespondenceSet, LedDetection, Real, Vec2};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTION_HEADER: &str = "led,x,y,brightness";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: expected header `led,x,y,brightness`, found {found:?}", .path.display())]
    Header { path: PathBuf, found: String },
}

/// Why reading stopped before the end of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseIssueKind {
    #[error("expected 4 fields, found {found}")]
    FieldCount { found: usize },
    #[error("field `{field}` is not a valid number")]
    InvalidField { field: &'static str },
    #[error("led index {led} outside [0, {num_leds})")]
    LedOutOfRange { led: i64, num_leds: usize },
}

/// A malformed row that ended parsing of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("line {line}: {kind} in {content:?}")]
pub struct ParseIssue {
    /// 1-based line number.
    pub line: usize,
    pub content: String,
    pub kind: ParseIssueKind,
}

/// Rows read from one camera's detection table.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDetections {
    pub camera: usize,
    pub records: Vec<LedDetection>,
    pub issue: Option<ParseIssue>,
}

/// `points/<camera>.csv` under `root`.
pub fn camera_file(root: &Path, camera: usize) -> PathBuf {
    root.join("points").join(format!("{camera}.csv"))
}

/// Load one camera's detection table.
pub fn load_camera_file(
    camera: usize,
    path: &Path,
    num_leds: usize,
) -> Result<CameraDetections, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_detections(camera, BufReader::new(file), num_leds, path)
}

/// Parse a detection table from any reader. `path` is only used in errors.
pub fn parse_detections<R: BufRead>(
    camera: usize,
    reader: R,
    num_leds: usize,
    path: &Path,
) -> Result<CameraDetections, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut lines = reader.lines().enumerate();

    let header = match lines.next() {
        Some((_, line)) => line.map_err(io_err)?,
        None => String::new(),
    };
    if header.trim() != DETECTION_HEADER {
        return Err(LoadError::Header {
            path: path.to_path_buf(),
            found: header,
        });
    }

    let mut records = Vec::new();
    let mut issue = None;
    for (idx, line) in lines {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_row(&line, num_leds) {
            Ok(det) => records.push(det),
            Err(kind) => {
                issue = Some(ParseIssue {
                    line: idx + 1,
                    content: line,
                    kind,
                });
                break;
            }
        }
    }

    Ok(CameraDetections {
        camera,
        records,
        issue,
    })
}

fn parse_row(line: &str, num_leds: usize) -> Result<LedDetection, ParseIssueKind> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(ParseIssueKind::FieldCount {
            found: fields.len(),
        });
    }
    let led: i64 = fields[0]
        .parse()
        .map_err(|_| ParseIssueKind::InvalidField { field: "led" })?;
    let float = |idx: usize, field: &'static str| {
        fields[idx]
            .parse::<Real>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or(ParseIssueKind::InvalidField { field })
    };
    let x = float(1, "x")?;
    let y = float(2, "y")?;
    let brightness = float(3, "brightness")?;
    let led = usize::try_from(led)
        .ok()
        .filter(|&l| l < num_leds)
        .ok_or(ParseIssueKind::LedOutOfRange { led, num_leds })?;
    Ok(LedDetection {
        led,
        pixel: Vec2::new(x, y),
        brightness,
    })
}

/// Assemble the visibility table from loaded cameras.
pub fn build_correspondences(
    cameras: &[CameraDetections],
    num_leds: usize,
    num_cameras: usize,
    threshold: Real,
) -> Result<CorrespondenceSet> {
    let mut set = CorrespondenceSet::new(num_leds, num_cameras);
    for cam in cameras {
        set.insert_camera(cam.camera, &cam.records, threshold)?;
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledcal_core::DEFAULT_VISIBILITY_THRESHOLD;
    use std::io::Cursor;

    fn parse(text: &str, num_leds: usize) -> Result<CameraDetections, LoadError> {
        parse_detections(0, Cursor::new(text), num_leds, Path::new("mem.csv"))
    }

    #[test]
    fn reads_rows_after_header() {
        let cam = parse("led,x,y,brightness\n0,100.5,200,255\n1, 10, 20, 12.5\n", 50).unwrap();
        assert_eq!(cam.records.len(), 2);
        assert_eq!(cam.records[0].pixel, Vec2::new(100.5, 200.0));
        assert_eq!(cam.records[1].brightness, 12.5);
        assert!(cam.issue.is_none());
    }

    #[test]
    fn bad_row_truncates_and_reports() {
        let cam = parse(
            "led,x,y,brightness\n0,1,2,255\n1,abc,2,255\n2,1,2,255\n",
            50,
        )
        .unwrap();
        assert_eq!(cam.records.len(), 1);
        let issue = cam.issue.unwrap();
        assert_eq!(issue.line, 3);
        assert_eq!(issue.kind, ParseIssueKind::InvalidField { field: "x" });
    }

    #[test]
    fn short_row_and_led_range_are_issues() {
        let cam = parse("led,x,y,brightness\n0,1,2\n", 50).unwrap();
        assert_eq!(cam.issue.unwrap().kind, ParseIssueKind::FieldCount { found: 3 });

        let cam = parse("led,x,y,brightness\n0,1,2,3\n50,1,2,3\n", 50).unwrap();
        assert_eq!(cam.records.len(), 1);
        assert_eq!(
            cam.issue.unwrap().kind,
            ParseIssueKind::LedOutOfRange { led: 50, num_leds: 50 }
        );

        let cam = parse("led,x,y,brightness\n-1,1,2,3\n", 50).unwrap();
        assert!(matches!(
            cam.issue.unwrap().kind,
            ParseIssueKind::LedOutOfRange { led: -1, .. }
        ));
    }

    #[test]
    fn header_is_required() {
        assert!(matches!(parse("", 5), Err(LoadError::Header { .. })));
        assert!(matches!(
            parse("0,1,2,3\n", 5),
            Err(LoadError::Header { .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_camera_file(3, Path::new("/nonexistent/points/3.csv"), 5).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.to_string().contains("3.csv"));
    }

    #[test]
    fn threshold_boundary() {
        let cam = parse("led,x,y,brightness\n0,1,2,250.0\n1,1,2,250.0001\n", 2).unwrap();
        let set = build_correspondences(&[cam], 2, 1, DEFAULT_VISIBILITY_THRESHOLD).unwrap();
        assert!(!set.is_visible(0, 0));
        assert!(set.is_visible(1, 0));
        assert_eq!(set.original_point(0, 0), Some(Vec2::new(1.0, 2.0)));
    }

    #[test]
    fn camera_file_layout() {
        assert_eq!(
            camera_file(Path::new("/data"), 7),
            PathBuf::from("/data/points/7.csv")
        );
    }
}
