//! staging — YUV420 frame → normalized `[3, 96, 96]` float tensor
//!
//! The stager owns one float buffer for the life of the pipeline and
//! overwrites it for every admitted frame: no allocation after construction.
//!
//! Per output pixel the rotated frame is center-cropped (scale-to-cover,
//! nearest neighbour), converted to RGB with the integer BT.601 transform and
//! scattered into three planes as `(rgb / 255 - mean) / std`.

use image::{Rgb, RgbImage};

use crate::config::Normalization;
use crate::error::PipelineError;
use crate::video::{Frame, Rotation, YuvPlanes};

// ── Constants ────────────────────────────────────────────────────────────────

pub const TENSOR_CHANNELS: usize = 3;
pub const TENSOR_HEIGHT: usize = 96;
pub const TENSOR_WIDTH: usize = 96;
/// Fixed length of the staged buffer.
pub const TENSOR_LEN: usize = TENSOR_CHANNELS * TENSOR_HEIGHT * TENSOR_WIDTH;

const PLANE_LEN: usize = TENSOR_HEIGHT * TENSOR_WIDTH;

/// Borrowed view of the staged tensor, as handed to the engine.
#[derive(Debug, Clone, Copy)]
pub struct InputTensor<'a> {
    pub shape: [usize; 3],
    pub data: &'a [f32],
}

// ── Stager ───────────────────────────────────────────────────────────────────

/// Owns the reusable input buffer.
#[derive(Debug)]
pub struct TensorStager {
    buffer: Box<[f32]>,
    normalization: Normalization,
}

impl TensorStager {
    pub fn new(normalization: Normalization) -> Self {
        Self {
            buffer: vec![0f32; TENSOR_LEN].into_boxed_slice(),
            normalization,
        }
    }

    /// Center-crop `frame` under `rotation` into the buffer at offset 0.
    ///
    /// On `FrameUnavailable` the buffer is left as it was.
    pub fn stage(&mut self, frame: &Frame, rotation: Rotation) -> Result<(), PipelineError> {
        stage_into(frame, rotation, &self.normalization, &mut self.buffer)
    }

    pub fn buffer(&self) -> &[f32] {
        &self.buffer
    }

    pub fn input(&self) -> InputTensor<'_> {
        InputTensor {
            shape: [TENSOR_CHANNELS, TENSOR_HEIGHT, TENSOR_WIDTH],
            data: &self.buffer,
        }
    }

    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    /// Undo normalization and rebuild the staged 96×96 RGB image.
    pub fn preview(&self) -> RgbImage {
        let Normalization { mean, std } = self.normalization;
        RgbImage::from_fn(TENSOR_WIDTH as u32, TENSOR_HEIGHT as u32, |x, y| {
            let idx = y as usize * TENSOR_WIDTH + x as usize;
            let channel = |c: usize| {
                let v = (self.buffer[c * PLANE_LEN + idx] * std[c] + mean[c]) * 255.0;
                v.round().clamp(0.0, 255.0) as u8
            };
            Rgb([channel(0), channel(1), channel(2)])
        })
    }
}

/// Stage `frame` into `out`, which must hold exactly [`TENSOR_LEN`] floats.
pub fn stage_into(
    frame: &Frame,
    rotation: Rotation,
    normalization: &Normalization,
    out: &mut [f32],
) -> Result<(), PipelineError> {
    if out.len() != TENSOR_LEN {
        return Err(PipelineError::Config(format!(
            "tensor buffer holds {} floats, expected {TENSOR_LEN}",
            out.len()
        )));
    }

    let planes = frame.pixels().ok_or_else(|| {
        PipelineError::frame_unavailable(format!(
            "no pixel data for {}x{} frame at {} ms",
            frame.width, frame.height, frame.timestamp_ms
        ))
    })?;

    let src_w = frame.width as usize;
    let src_h = frame.height as usize;
    let (rot_w, rot_h) = if rotation.is_transposed() {
        (src_h, src_w)
    } else {
        (src_w, src_h)
    };

    // Largest centred window with the tensor aspect ratio.
    let scale = (rot_w as f32 / TENSOR_WIDTH as f32).min(rot_h as f32 / TENSOR_HEIGHT as f32);
    let origin_x = (rot_w as f32 - TENSOR_WIDTH as f32 * scale) / 2.0;
    let origin_y = (rot_h as f32 - TENSOR_HEIGHT as f32 * scale) / 2.0;

    let inv_std = normalization.std.map(|s| 1.0 / s);
    let mean = normalization.mean;

    let (r_plane, gb_plane) = out.split_at_mut(PLANE_LEN);
    let (g_plane, b_plane) = gb_plane.split_at_mut(PLANE_LEN);

    for y in 0..TENSOR_HEIGHT {
        let ry = ((origin_y + (y as f32 + 0.5) * scale) as usize).min(rot_h - 1);
        for x in 0..TENSOR_WIDTH {
            let rx = ((origin_x + (x as f32 + 0.5) * scale) as usize).min(rot_w - 1);
            let (sx, sy) = unrotate(rx, ry, src_w, src_h, rotation);
            let [r, g, b] = yuv_to_rgb(planes, sx, sy);

            let idx = y * TENSOR_WIDTH + x;
            r_plane[idx] = (r as f32 / 255.0 - mean[0]) * inv_std[0];
            g_plane[idx] = (g as f32 / 255.0 - mean[1]) * inv_std[1];
            b_plane[idx] = (b as f32 / 255.0 - mean[2]) * inv_std[2];
        }
    }

    Ok(())
}

/// Map a pixel of the clockwise-rotated image back to sensor coordinates.
#[inline]
fn unrotate(rx: usize, ry: usize, src_w: usize, src_h: usize, rotation: Rotation) -> (usize, usize) {
    match rotation {
        Rotation::Deg0 => (rx, ry),
        Rotation::Deg90 => (ry, src_h - 1 - rx),
        Rotation::Deg180 => (src_w - 1 - rx, src_h - 1 - ry),
        Rotation::Deg270 => (src_w - 1 - ry, rx),
    }
}

/// Integer BT.601 YUV → RGB, 10-bit fixed point.
#[inline]
fn yuv_to_rgb(planes: &YuvPlanes, sx: usize, sy: usize) -> [u8; 3] {
    let y = i32::from(planes.y.sample(sx, sy));
    let u = i32::from(planes.u.sample(sx / 2, sy / 2)) - 128;
    let v = i32::from(planes.v.sample(sx / 2, sy / 2)) - 128;

    let y = (y - 16).max(0) * 1192;
    let r = (y + 1634 * v) >> 10;
    let g = (y - 833 * v - 400 * u) >> 10;
    let b = (y + 2066 * u) >> 10;
    [r, g, b].map(|c| c.clamp(0, 255) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_image(width: u32, height: u32) -> RgbImage {
        // Left half red, right half blue.
        RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        })
    }

    fn rgb_at(stager: &TensorStager, x: usize, y: usize) -> [f32; 3] {
        let buf = stager.buffer();
        let idx = y * TENSOR_WIDTH + x;
        [buf[idx], buf[PLANE_LEN + idx], buf[2 * PLANE_LEN + idx]]
    }

    #[test]
    fn staging_reuses_the_same_buffer() {
        let mut stager = TensorStager::new(Normalization::IDENTITY);
        let ptr = stager.buffer().as_ptr();

        let frame = Frame::from_rgb_image(&split_image(320, 240), Rotation::Deg0, 0);
        stager.stage(&frame, Rotation::Deg0).expect("first stage");
        let first = stager.buffer().to_vec();
        stager.stage(&frame, Rotation::Deg90).expect("second stage");

        assert_eq!(stager.buffer().len(), TENSOR_LEN);
        assert_eq!(stager.buffer().as_ptr(), ptr);
        assert_ne!(stager.buffer(), first.as_slice());
    }

    #[test]
    fn identity_normalization_passes_unit_range_values() {
        let mut stager = TensorStager::new(Normalization::IDENTITY);
        let gray = RgbImage::from_pixel(200, 150, Rgb([128, 128, 128]));
        stager
            .stage(&Frame::from_rgb_image(&gray, Rotation::Deg0, 0), Rotation::Deg0)
            .expect("stage");

        for v in stager.buffer() {
            assert!((v - 128.0 / 255.0).abs() < 2.0 / 255.0, "value {v}");
        }
    }

    #[test]
    fn center_crop_keeps_the_middle_of_a_wide_frame() {
        let mut stager = TensorStager::new(Normalization::IDENTITY);
        let frame = Frame::from_rgb_image(&split_image(192, 96), Rotation::Deg0, 0);
        stager.stage(&frame, Rotation::Deg0).expect("stage");

        let left = rgb_at(&stager, 10, 48);
        let right = rgb_at(&stager, 85, 48);
        assert!(left[0] > 0.8 && left[2] < 0.2, "left {left:?}");
        assert!(right[2] > 0.8 && right[0] < 0.2, "right {right:?}");
    }

    #[test]
    fn rotation_turns_columns_into_rows() {
        let mut stager = TensorStager::new(Normalization::IDENTITY);
        let frame = Frame::from_rgb_image(&split_image(192, 96), Rotation::Deg90, 0);

        stager.stage(&frame, Rotation::Deg90).expect("stage 90");
        let top = rgb_at(&stager, 48, 10);
        let bottom = rgb_at(&stager, 48, 85);
        assert!(top[0] > 0.8 && top[2] < 0.2, "top {top:?}");
        assert!(bottom[2] > 0.8 && bottom[0] < 0.2, "bottom {bottom:?}");

        stager.stage(&frame, Rotation::Deg270).expect("stage 270");
        let top = rgb_at(&stager, 48, 10);
        assert!(top[2] > 0.8 && top[0] < 0.2, "top after 270 {top:?}");
    }

    #[test]
    fn half_turn_swaps_left_and_right() {
        let mut stager = TensorStager::new(Normalization::IDENTITY);
        let frame = Frame::from_rgb_image(&split_image(96, 96), Rotation::Deg180, 0);

        stager.stage(&frame, Rotation::Deg0).expect("stage 0");
        assert!(rgb_at(&stager, 10, 48)[0] > 0.8);

        stager.stage(&frame, Rotation::Deg180).expect("stage 180");
        let left = rgb_at(&stager, 10, 48);
        let right = rgb_at(&stager, 85, 48);
        assert!(left[2] > 0.8 && left[0] < 0.2, "left {left:?}");
        assert!(right[0] > 0.8 && right[2] < 0.2, "right {right:?}");
    }

    #[test]
    fn missing_pixels_fail_without_touching_the_buffer() {
        let mut stager = TensorStager::new(Normalization::IDENTITY);
        let gray = RgbImage::from_pixel(96, 96, Rgb([200, 200, 200]));
        stager
            .stage(&Frame::from_rgb_image(&gray, Rotation::Deg0, 0), Rotation::Deg0)
            .expect("stage");
        let before = stager.buffer().to_vec();

        let err = stager
            .stage(&Frame::unavailable(640, 480, Rotation::Deg0, 5), Rotation::Deg0)
            .unwrap_err();
        assert!(matches!(err, PipelineError::FrameUnavailable { .. }));
        assert!(!err.is_fatal());
        assert_eq!(stager.buffer(), before.as_slice());
    }

    #[test]
    fn normalization_is_applied_per_channel() {
        let norm = Normalization {
            mean: [0.5, 0.0, 0.0],
            std: [0.5, 1.0, 2.0],
        };
        let mut stager = TensorStager::new(norm);
        let white = RgbImage::from_pixel(96, 96, Rgb([255, 255, 255]));
        stager
            .stage(&Frame::from_rgb_image(&white, Rotation::Deg0, 0), Rotation::Deg0)
            .expect("stage");

        let [r, g, b] = rgb_at(&stager, 40, 40);
        assert!((r - 1.0).abs() < 0.02, "r {r}");
        assert!((g - 1.0).abs() < 0.02, "g {g}");
        assert!((b - 0.5).abs() < 0.02, "b {b}");

        let preview = stager.preview();
        assert!(preview.get_pixel(40, 40).0.iter().all(|c| *c >= 250));
    }
}
