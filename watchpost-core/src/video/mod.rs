//! video — camera frames and a replay camera
//!
//! Frames arrive as YUV420 planes the way mobile camera stacks hand them out:
//! a full-resolution luma plane and two half-resolution chroma planes, each
//! with its own row and pixel stride. A frame may also arrive without pixel
//! data, which the stager reports as `FrameUnavailable`.
//!
//! `ReplayCamera` stands in for a live camera by replaying a directory of
//! still images at a simulated frame rate.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Clockwise rotation needed to display the sensor image upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether width and height swap after rotating.
    pub fn is_transposed(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// One image plane with explicit strides.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl Plane {
    /// Byte length needed to address `cols × rows` samples.
    fn required_len(&self, cols: usize, rows: usize) -> usize {
        if cols == 0 || rows == 0 {
            return 0;
        }
        (rows - 1) * self.row_stride + (cols - 1) * self.pixel_stride + 1
    }

    #[inline]
    pub(crate) fn sample(&self, col: usize, row: usize) -> u8 {
        self.data[row * self.row_stride + col * self.pixel_stride]
    }
}

#[derive(Debug, Clone)]
pub struct YuvPlanes {
    pub y: Plane,
    pub u: Plane,
    pub v: Plane,
}

/// A camera frame. Read-only to the pipeline.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// Monotonic capture time used for gate admission.
    pub timestamp_ms: u64,
    /// `None` when the camera could not provide pixel data.
    pub planes: Option<YuvPlanes>,
}

impl Frame {
    /// A frame whose pixel data never arrived.
    pub fn unavailable(width: u32, height: u32, rotation: Rotation, timestamp_ms: u64) -> Self {
        Self {
            width,
            height,
            rotation,
            timestamp_ms,
            planes: None,
        }
    }

    /// Encode an RGB image as I420 (BT.601 studio swing, 2×2 chroma averaging).
    pub fn from_rgb_image(image: &RgbImage, rotation: Rotation, timestamp_ms: u64) -> Self {
        let (width, height) = image.dimensions();
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

        let mut y = vec![0u8; w * h];
        for (x, yy, px) in image.enumerate_pixels() {
            let [r, g, b] = px.0.map(i32::from);
            y[yy as usize * w + x as usize] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8;
        }

        let mut u = vec![0u8; cw * ch];
        let mut v = vec![0u8; cw * ch];
        for cy in 0..ch {
            for cx in 0..cw {
                let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
                for sy in (cy * 2)..((cy * 2 + 2).min(h)) {
                    for sx in (cx * 2)..((cx * 2 + 2).min(w)) {
                        let [pr, pg, pb] = image.get_pixel(sx as u32, sy as u32).0;
                        r += i32::from(pr);
                        g += i32::from(pg);
                        b += i32::from(pb);
                        n += 1;
                    }
                }
                let (r, g, b) = (r / n, g / n, b / n);
                u[cy * cw + cx] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8;
                v[cy * cw + cx] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8;
            }
        }

        Self {
            width,
            height,
            rotation,
            timestamp_ms,
            planes: Some(YuvPlanes {
                y: Plane {
                    data: y,
                    row_stride: w,
                    pixel_stride: 1,
                },
                u: Plane {
                    data: u,
                    row_stride: cw,
                    pixel_stride: 1,
                },
                v: Plane {
                    data: v,
                    row_stride: cw,
                    pixel_stride: 1,
                },
            }),
        }
    }

    /// Planes that are present and large enough for the frame's dimensions.
    pub fn pixels(&self) -> Option<&YuvPlanes> {
        let planes = self.planes.as_ref()?;
        let (w, h) = (self.width as usize, self.height as usize);
        if w == 0 || h == 0 {
            return None;
        }
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let complete = planes.y.data.len() >= planes.y.required_len(w, h)
            && planes.u.data.len() >= planes.u.required_len(cw, ch)
            && planes.v.data.len() >= planes.v.required_len(cw, ch);
        complete.then_some(planes)
    }
}

// ── Replay camera ────────────────────────────────────────────────────────────

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Replays still images in file-name order as if a camera delivered them at
/// `fps` frames per second.
pub struct ReplayCamera {
    paths: Vec<PathBuf>,
    next: usize,
    fps: f64,
    rotation: Rotation,
}

impl ReplayCamera {
    pub fn open<P: AsRef<Path>>(dir: P, fps: f64, rotation: Rotation) -> Result<Self> {
        let dir = dir.as_ref();
        anyhow::ensure!(fps > 0.0, "replay frame rate must be positive (got {fps})");
        anyhow::ensure!(
            dir.is_dir(),
            "frame directory does not exist: {}",
            dir.display()
        );

        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry =
                entry.with_context(|| format!("failed to list frames in {}", dir.display()))?;
            let is_image = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if entry.file_type().is_file() && is_image {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        anyhow::ensure!(!paths.is_empty(), "no images found in {}", dir.display());

        info!(frames = paths.len(), fps, dir = %dir.display(), "replay camera opened");
        Ok(Self {
            paths,
            next: 0,
            fps,
            rotation,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn timestamp_ms(&self, index: usize) -> u64 {
        (index as f64 * 1000.0 / self.fps).round() as u64
    }
}

impl Iterator for ReplayCamera {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let index = self.next;
        let path = self.paths.get(index)?;
        self.next += 1;
        let timestamp_ms = self.timestamp_ms(index);

        match image::open(path) {
            Ok(img) => {
                debug!(path = %path.display(), timestamp_ms, "replaying frame");
                Some(Frame::from_rgb_image(
                    &img.into_rgb8(),
                    self.rotation,
                    timestamp_ms,
                ))
            }
            Err(e) => {
                warn!(path = %path.display(), "could not decode frame: {e}");
                Some(Frame::unavailable(0, 0, self.rotation, timestamp_ms))
            }
        }
    }
}
