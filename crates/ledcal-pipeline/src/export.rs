//! Geometry export and reprojection overlays.

use anyhow::{bail, ensure, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use ledcal_core::{
    project, CorrespondenceSet, Extrinsics, ImageSize, Intrinsics, Real, Vec2, Vec3,
};
use log::debug;
use serde::Serialize;
use std::fs;
use std::path::Path;

pub const POSITIONS_HEADER: &str = "led,x,y,z";

const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// OBJ point cloud: LED vertices, polyline edges between consecutive LEDs,
/// then one vertex per camera position.
pub fn obj_string(leds: &[Vec3], cameras: &[Extrinsics]) -> String {
    let mut out = String::new();
    for p in leds {
        out.push_str(&format!("v {:.6} {:.6} {:.6}\n", p.x, p.y, p.z));
    }
    for i in 1..leds.len() {
        out.push_str(&format!("l {} {}\n", i, i + 1));
    }
    for cam in cameras {
        let t = &cam.translation;
        out.push_str(&format!("v {:.6} {:.6} {:.6}\n", t.x, t.y, t.z));
    }
    out
}

pub fn write_obj(path: &Path, leds: &[Vec3], cameras: &[Extrinsics]) -> Result<()> {
    create_parent(path)?;
    fs::write(path, obj_string(leds, cameras))
        .with_context(|| format!("failed to write {}", path.display()))
}

/// CSV with header `led,x,y,z` and six decimals per coordinate.
pub fn write_led_positions(path: &Path, leds: &[Vec3]) -> Result<()> {
    let mut out = String::from(POSITIONS_HEADER);
    out.push('\n');
    for (i, p) in leds.iter().enumerate() {
        out.push_str(&format!("{},{:.6},{:.6},{:.6}\n", i, p.x, p.y, p.z));
    }
    create_parent(path)?;
    fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
}

/// Read a file written by [`write_led_positions`]. Rows must be in LED order.
pub fn read_led_positions(path: &Path) -> Result<Vec<Vec3>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut lines = text.lines();
    let header = lines.next().unwrap_or_default();
    ensure!(
        header.trim() == POSITIONS_HEADER,
        "{}: expected header `{}`, found {:?}",
        path.display(),
        POSITIONS_HEADER,
        header
    );

    let mut leds = Vec::new();
    for (idx, line) in lines.enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        ensure!(
            fields.len() == 4,
            "{}:{}: expected 4 fields",
            path.display(),
            idx + 2
        );
        let led: usize = fields[0]
            .parse()
            .with_context(|| format!("{}:{}: bad led index", path.display(), idx + 2))?;
        if led != leds.len() {
            bail!(
                "{}:{}: expected led {}, found {}",
                path.display(),
                idx + 2,
                leds.len(),
                led
            );
        }
        let mut xyz = [0.0; 3];
        for (k, value) in xyz.iter_mut().enumerate() {
            *value = fields[k + 1]
                .parse()
                .with_context(|| format!("{}:{}: bad coordinate", path.display(), idx + 2))?;
        }
        leds.push(Vec3::new(xyz[0], xyz[1], xyz[2]));
    }
    Ok(leds)
}

/// What an overlay drew.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverlayStats {
    pub lines: usize,
    /// Visible pairs skipped because the projection was degenerate.
    pub degenerate: usize,
    /// Segments lying wholly outside the image.
    pub offscreen: usize,
}

/// Solved geometry borrowed for drawing.
#[derive(Debug, Clone, Copy)]
pub struct SolvedRig<'a> {
    pub intrinsics: &'a Intrinsics,
    pub cameras: &'a [Extrinsics],
    pub leds: &'a [Vec3],
    pub image_size: ImageSize,
}

/// Draw observed-to-reprojected segments for every LED visible in `camera`.
pub fn draw_overlay(
    image: &mut RgbImage,
    set: &CorrespondenceSet,
    camera: usize,
    rig: &SolvedRig<'_>,
) -> Result<OverlayStats> {
    let extrinsics = rig
        .cameras
        .get(camera)
        .with_context(|| format!("camera {camera} not in solved rig"))?;
    let mut stats = OverlayStats::default();
    for (led, p) in rig.leds.iter().enumerate() {
        let Some(obs) = set.observation(led, camera).filter(|o| o.visible) else {
            continue;
        };
        match project(rig.intrinsics, extrinsics, p) {
            Ok(proj) => {
                let projected = rig.image_size.to_pixel(&proj.xy);
                let (width, height) = image.dimensions();
                match clip_segment(obs.pixel, projected, width, height) {
                    Some((a, b)) => {
                        draw_line_segment_mut(
                            image,
                            (a.x as f32, a.y as f32),
                            (b.x as f32, b.y as f32),
                            OVERLAY_COLOR,
                        );
                        stats.lines += 1;
                    }
                    None => stats.offscreen += 1,
                }
            }
            Err(err) => {
                debug!("camera {camera} led {led}: {err}");
                stats.degenerate += 1;
            }
        }
    }
    Ok(stats)
}

/// Cut the segment `a`-`b` to the pixel rectangle of a `width` x `height`
/// image (Liang-Barsky). `None` when no part of it is inside.
fn clip_segment(a: Vec2, b: Vec2, width: u32, height: u32) -> Option<(Vec2, Vec2)> {
    if width == 0 || height == 0 {
        return None;
    }
    let max = Vec2::new(Real::from(width - 1), Real::from(height - 1));
    let d = b - a;
    let (mut t0, mut t1): (Real, Real) = (0.0, 1.0);
    for (p, q) in [
        (-d.x, a.x),
        (d.x, max.x - a.x),
        (-d.y, a.y),
        (d.y, max.y - a.y),
    ] {
        if !q.is_finite() || !p.is_finite() {
            return None;
        }
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((a + d * t0, a + d * t1))
}

/// Load `input`, draw the overlay for `camera` and save it to `output`.
pub fn render_overlay(
    input: &Path,
    output: &Path,
    set: &CorrespondenceSet,
    camera: usize,
    rig: &SolvedRig<'_>,
) -> Result<OverlayStats> {
    let mut image = image::ImageReader::open(input)
        .with_context(|| format!("failed to read image {}", input.display()))?
        .decode()
        .with_context(|| format!("failed to decode {}", input.display()))?
        .to_rgb8();
    let stats = draw_overlay(&mut image, set, camera, rig)?;
    create_parent(output)?;
    image
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ledcal_core::{LedDetection, DEFAULT_VISIBILITY_THRESHOLD};

    #[test]
    fn obj_layout() {
        let leds = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0)];
        let cams = [Extrinsics::new(Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0))];
        let obj = obj_string(&leds, &cams);
        let lines: Vec<&str> = obj.lines().collect();
        assert_eq!(
            lines,
            vec![
                "v 0.000000 0.000000 0.000000",
                "v 1.000000 0.000000 0.000000",
                "v 1.000000 1.000000 0.000000",
                "l 1 2",
                "l 2 3",
                "v 0.000000 1.000000 0.000000",
            ]
        );
    }

    #[test]
    fn overlay_draws_visible_pairs_only() {
        let size = ImageSize {
            width: 64,
            height: 48,
        };
        let mut set = CorrespondenceSet::new(2, 1);
        set.insert_camera(
            0,
            &[
                LedDetection {
                    led: 0,
                    pixel: Vec2::new(10.0, 24.0),
                    brightness: 255.0,
                },
                LedDetection {
                    led: 1,
                    pixel: Vec2::new(5.0, 5.0),
                    brightness: 10.0,
                },
            ],
            DEFAULT_VISIBILITY_THRESHOLD,
        )
        .unwrap();
        // Identity camera: an LED on the +x axis lands on the image centre.
        let extr = Extrinsics::new(Vec3::zeros(), Vec3::zeros());
        let leds = [Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        let mut image = RgbImage::new(64, 48);
        let intr = Intrinsics::new(50.0);
        let rig = SolvedRig {
            intrinsics: &intr,
            cameras: &[extr],
            leds: &leds,
            image_size: size,
        };
        let stats = draw_overlay(&mut image, &set, 0, &rig).unwrap();

        assert_eq!(
            stats,
            OverlayStats {
                lines: 1,
                ..OverlayStats::default()
            }
        );
        assert_eq!(*image.get_pixel(20, 24), OVERLAY_COLOR);
        assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn segments_are_cut_to_the_image() {
        let (a, b) = clip_segment(Vec2::new(-10.0, 5.0), Vec2::new(30.0, 5.0), 20, 10).unwrap();
        assert_relative_eq!(a, Vec2::new(0.0, 5.0), epsilon = 1e-9);
        assert_relative_eq!(b, Vec2::new(19.0, 5.0), epsilon = 1e-9);

        let inside = (Vec2::new(2.0, 3.0), Vec2::new(7.0, 8.0));
        assert_eq!(clip_segment(inside.0, inside.1, 20, 10), Some(inside));

        assert!(clip_segment(Vec2::new(-5.0, -1.0), Vec2::new(-1.0, -5.0), 20, 10).is_none());
        assert!(clip_segment(Vec2::new(25.0, 2.0), Vec2::new(40.0, 8.0), 20, 10).is_none());
        assert!(clip_segment(Vec2::new(1.0, 1.0), Vec2::new(Real::NAN, 1.0), 20, 10).is_none());
    }

    #[test]
    fn far_reprojection_draws_only_inside_the_image() {
        let size = ImageSize {
            width: 64,
            height: 48,
        };
        let mut set = CorrespondenceSet::new(1, 1);
        set.insert_camera(
            0,
            &[LedDetection {
                led: 0,
                pixel: Vec2::new(10.0, 24.0),
                brightness: 255.0,
            }],
            DEFAULT_VISIBILITY_THRESHOLD,
        )
        .unwrap();
        // Barely in front of the camera: the projection lands ~1e8 px away.
        let leds = [Vec3::new(1e-6, 0.0, 1.0)];
        let intr = Intrinsics::new(2800.0);
        let rig = SolvedRig {
            intrinsics: &intr,
            cameras: &[Extrinsics::new(Vec3::zeros(), Vec3::zeros())],
            leds: &leds,
            image_size: size,
        };
        let mut image = RgbImage::new(64, 48);
        let stats = draw_overlay(&mut image, &set, 0, &rig).unwrap();

        assert_eq!(
            stats,
            OverlayStats {
                lines: 1,
                ..OverlayStats::default()
            }
        );
        assert_eq!(*image.get_pixel(10, 24), OVERLAY_COLOR);
    }

    #[test]
    fn overlay_counts_degenerate_pairs() {
        let mut set = CorrespondenceSet::new(1, 1);
        set.insert_camera(
            0,
            &[LedDetection {
                led: 0,
                pixel: Vec2::new(1.0, 1.0),
                brightness: 255.0,
            }],
            DEFAULT_VISIBILITY_THRESHOLD,
        )
        .unwrap();
        let extr = Extrinsics::new(Vec3::zeros(), Vec3::zeros());
        let mut image = RgbImage::new(8, 8);
        let intr = Intrinsics::new(50.0);
        let rig = SolvedRig {
            intrinsics: &intr,
            cameras: &[extr],
            leds: &[Vec3::new(0.0, 1.0, 0.0)],
            image_size: ImageSize {
                width: 8,
                height: 8,
            },
        };
        let stats = draw_overlay(&mut image, &set, 0, &rig).unwrap();
        assert_eq!(
            stats,
            OverlayStats {
                degenerate: 1,
                ..OverlayStats::default()
            }
        );
        assert!(draw_overlay(&mut image, &set, 1, &rig).is_err());
    }
}
