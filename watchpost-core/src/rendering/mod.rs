//! rendering — project tensor-space detections onto the view
//!
//! The camera preview fills the view while the detector only saw a centred
//! crop, so tensor coordinates are mapped through a letterbox transform built
//! from the view's long-minus-short side. Both axes share that one `size`,
//! which matches the square centre crop the stager produces.
//!
//! Every call paints a fresh transparent RGBA canvas the size of the view:
//! four outline segments per box and the score, two decimals, at its
//! top-left corner.

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::detection::{AnalysisResult, Detection};

/// Pixel size of one glyph cell in the score labels.
const LABEL_SCALE: u32 = 3;
const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;

// ── Letterbox transform ──────────────────────────────────────────────────────

/// Affine map `view = offset + scale · tensor` for one view size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub size: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl LetterboxTransform {
    pub fn new(view_width: u32, view_height: u32, tensor_width: usize, tensor_height: usize) -> Self {
        let (size, offset_x, offset_y) = if view_height > view_width {
            let size = view_height - view_width;
            (size, 0, size / 2)
        } else {
            let size = view_width - view_height;
            (size, size / 2, 0)
        };
        Self {
            size,
            offset_x,
            offset_y,
            scale_x: size as f32 / tensor_width as f32,
            scale_y: size as f32 / tensor_height as f32,
        }
    }

    pub fn project(&self, det: &Detection) -> ProjectedBox {
        ProjectedBox {
            score: det.score,
            x0: self.offset_x as f32 + self.scale_x * det.x0,
            y0: self.offset_y as f32 + self.scale_y * det.y0,
            x1: self.offset_x as f32 + self.scale_x * det.x1,
            y1: self.offset_y as f32 + self.scale_y * det.y1,
        }
    }
}

/// A detection in view coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedBox {
    pub score: f32,
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl ProjectedBox {
    pub fn label(&self) -> String {
        format!("{:.2}", self.score)
    }

    pub fn is_finite(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1].iter().all(|v| v.is_finite())
    }
}

// ── Projector ────────────────────────────────────────────────────────────────

/// A finished overlay, ready for the view.
#[derive(Debug, Clone)]
pub struct Overlay {
    pub canvas: RgbaImage,
    pub transform: LetterboxTransform,
    pub boxes: Vec<ProjectedBox>,
}

#[derive(Debug, Clone)]
pub struct OverlayProjector {
    tensor_width: usize,
    tensor_height: usize,
    render_cap: usize,
    color: Rgba<u8>,
}

impl OverlayProjector {
    pub fn new(tensor_width: usize, tensor_height: usize, render_cap: usize, color: [u8; 4]) -> Self {
        Self {
            tensor_width,
            tensor_height,
            render_cap,
            color: Rgba(color),
        }
    }

    /// Draw the first `min(len, render_cap)` detections onto a new canvas.
    ///
    /// Outlines are clipped to the canvas. Boxes with a non-finite corner are
    /// kept in [`Overlay::boxes`] but not drawn.
    pub fn render(&self, result: &AnalysisResult, view_width: u32, view_height: u32) -> Overlay {
        let transform =
            LetterboxTransform::new(view_width, view_height, self.tensor_width, self.tensor_height);
        let mut canvas = RgbaImage::new(view_width, view_height);

        let boxes: Vec<ProjectedBox> = result
            .detections()
            .take(self.render_cap)
            .map(|det| transform.project(&det))
            .collect();

        for b in boxes.iter().filter(|b| b.is_finite()) {
            let corners = [(b.x0, b.y0), (b.x1, b.y0), (b.x1, b.y1), (b.x0, b.y1)];
            for (i, &from) in corners.iter().enumerate() {
                let to = corners[(i + 1) % corners.len()];
                if let Some((from, to)) = clip_segment(from, to, view_width, view_height) {
                    draw_line_segment_mut(&mut canvas, from, to, self.color);
                }
            }
            let label = b.label();
            if label_visible(&label, b.x0, b.y0, view_width, view_height) {
                draw_label(&mut canvas, &label, b.x0 as i32, b.y0 as i32, self.color);
            }
        }

        Overlay {
            canvas,
            transform,
            boxes,
        }
    }
}

/// Clip a segment to the pixel rectangle `[0, width) × [0, height)`
/// (Liang-Barsky). `None` when nothing of it lies on the canvas. Endpoints
/// moved by the clip are snapped to the nearest pixel.
fn clip_segment(
    from: (f32, f32),
    to: (f32, f32),
    width: u32,
    height: u32,
) -> Option<((f32, f32), (f32, f32))> {
    if width == 0 || height == 0 {
        return None;
    }
    let (x0, y0) = (f64::from(from.0), f64::from(from.1));
    let (dx, dy) = (f64::from(to.0) - x0, f64::from(to.1) - y0);
    if !dx.is_finite() || !dy.is_finite() {
        return None;
    }
    let max_x = f64::from(width - 1);
    let max_y = f64::from(height - 1);

    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, x0), (dx, max_x - x0), (-dy, y0), (dy, max_y - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let point = |t: f64, clipped: bool| {
        let (x, y) = (x0 + t * dx, y0 + t * dy);
        if clipped {
            (x.round().clamp(0.0, max_x) as f32, y.round().clamp(0.0, max_y) as f32)
        } else {
            (x as f32, y as f32)
        }
    };
    Some((point(t0, t0 > 0.0), point(t1, t1 < 1.0)))
}

/// Whether any part of a label anchored at `(x, baseline_y)` can land on the canvas.
fn label_visible(text: &str, x: f32, baseline_y: f32, width: u32, height: u32) -> bool {
    let advance = ((GLYPH_W + 1) * LABEL_SCALE) as f32;
    let text_width = advance * text.chars().count() as f32;
    let text_height = (GLYPH_H * LABEL_SCALE) as f32;
    x > -text_width
        && x < width as f32
        && baseline_y > 0.0
        && baseline_y < height as f32 + text_height
}

/// Rasterize `text` with its baseline at `baseline_y`, starting at `x`.
fn draw_label(canvas: &mut RgbaImage, text: &str, x: i32, baseline_y: i32, color: Rgba<u8>) {
    let cell = LABEL_SCALE as i32;
    let top = baseline_y - (GLYPH_H * LABEL_SCALE) as i32;
    let mut pen_x = x;
    for ch in text.chars() {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if bits & (0b100 >> col) != 0 {
                        let rect = Rect::at(pen_x + col as i32 * cell, top + row as i32 * cell)
                            .of_size(LABEL_SCALE, LABEL_SCALE);
                        draw_filled_rect_mut(canvas, rect, color);
                    }
                }
            }
        }
        pen_x += (GLYPH_W as i32 + 1) * cell;
    }
}

/// 3×5 bitmaps, one row per entry, MSB on the left.
fn glyph(ch: char) -> Option<[u8; 5]> {
    let rows = match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        _ => return None,
    };
    Some(rows)
}

// ── Text log ─────────────────────────────────────────────────────────────────

/// Newest-first log trimmed from the tail to a character budget.
#[derive(Debug, Clone)]
pub struct TextLog {
    text: String,
    budget: usize,
}

impl TextLog {
    pub fn new(budget: usize) -> Self {
        Self {
            text: String::new(),
            budget,
        }
    }

    pub fn push(&mut self, message: &str) {
        self.text.insert(0, '\n');
        self.text.insert_str(0, message);
        if let Some((cut, _)) = self.text.char_indices().nth(self.budget) {
            self.text.truncate(cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

// ── View collaborator ────────────────────────────────────────────────────────

/// The surface overlays and log text are shown on. Lives on the render side.
pub trait OverlayView {
    fn view_size(&self) -> (u32, u32);
    fn show_overlay(&mut self, overlay: Overlay);
    fn show_log(&mut self, text: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(dets: &[(f32, [f32; 4])]) -> AnalysisResult {
        AnalysisResult {
            boxes: dets.iter().flat_map(|(_, b)| *b).collect(),
            scores: dets.iter().map(|(s, _)| *s).collect(),
            ..AnalysisResult::default()
        }
    }

    #[test]
    fn portrait_view_letterboxes_vertically() {
        let t = LetterboxTransform::new(1080, 1920, 96, 96);
        assert_eq!((t.size, t.offset_x, t.offset_y), (840, 0, 420));
        assert_eq!((t.scale_x, t.scale_y), (8.75, 8.75));

        let det = Detection {
            score: 1.0,
            x0: 0.0,
            y0: 0.0,
            x1: 96.0,
            y1: 96.0,
        };
        let p = t.project(&det);
        assert_eq!((p.x0, p.y0, p.x1, p.y1), (0.0, 420.0, 840.0, 1260.0));
    }

    #[test]
    fn landscape_view_letterboxes_horizontally() {
        let t = LetterboxTransform::new(1920, 1080, 96, 96);
        assert_eq!((t.size, t.offset_x, t.offset_y), (840, 420, 0));
    }

    #[test]
    fn both_scales_follow_the_single_letterbox_size() {
        let t = LetterboxTransform::new(1080, 1920, 96, 48);
        assert_eq!(t.scale_x, 840.0 / 96.0);
        assert_eq!(t.scale_y, 840.0 / 48.0);
    }

    #[test]
    fn square_view_collapses_to_the_origin() {
        let t = LetterboxTransform::new(500, 500, 96, 96);
        assert_eq!(t.size, 0);
        assert_eq!(t.scale_x, 0.0);
    }

    #[test]
    fn render_draws_outline_and_label() {
        // size = 96, offset_x = 48, scale = 1.
        let projector = OverlayProjector::new(96, 96, 100, [0, 255, 0, 255]);
        let overlay = projector.render(&result(&[(0.9, [20.0, 30.0, 60.0, 70.0])]), 296, 200);

        assert_eq!(overlay.canvas.dimensions(), (296, 200));
        assert_eq!(overlay.boxes.len(), 1);
        let b = overlay.boxes[0];
        assert_eq!((b.x0, b.y0, b.x1, b.y1), (68.0, 30.0, 108.0, 70.0));
        assert_eq!(b.label(), "0.90");

        let green = Rgba([0, 255, 0, 255]);
        assert_eq!(*overlay.canvas.get_pixel(88, 70), green);
        assert_eq!(*overlay.canvas.get_pixel(108, 50), green);
        assert_eq!(overlay.canvas.get_pixel(88, 50).0[3], 0);
        // First row of the leading '0', just above the corner.
        assert_eq!(*overlay.canvas.get_pixel(69, 30 - GLYPH_H * LABEL_SCALE), green);
    }

    #[test]
    fn render_caps_the_number_of_boxes() {
        let dets: Vec<(f32, [f32; 4])> = (0..150).map(|i| (0.5, [i as f32, 0.0, 1.0, 1.0])).collect();
        let projector = OverlayProjector::new(96, 96, 100, [0, 255, 0, 255]);
        let overlay = projector.render(&result(&dets), 1080, 1920);
        assert_eq!(overlay.boxes.len(), 100);
        assert_eq!(overlay.boxes[99].x0, 99.0 * 8.75);
    }

    #[test]
    fn empty_result_is_a_blank_canvas() {
        let projector = OverlayProjector::new(96, 96, 100, [0, 255, 0, 255]);
        let overlay = projector.render(&AnalysisResult::default(), 64, 128);
        assert!(overlay.boxes.is_empty());
        assert!(overlay.canvas.pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn huge_and_non_finite_boxes_render_promptly() {
        use std::time::{Duration, Instant};

        let projector = OverlayProjector::new(96, 96, 100, [0, 255, 0, 255]);
        let dets = [
            (0.5, [0.0, 0.0, f32::INFINITY, 1.0]),
            (0.5, [f32::NAN, 0.0, 1.0, 1.0]),
            (0.7, [0.0, 0.0, 1e9, 1e9]),
            (0.3, [-1e9, -1e9, 1e7, 2.0]),
        ];

        let start = Instant::now();
        let overlay = projector.render(&result(&dets), 296, 200);
        assert!(start.elapsed() < Duration::from_secs(2));

        assert_eq!(overlay.boxes.len(), 4);
        assert!(!overlay.boxes[0].is_finite());
        assert!(!overlay.boxes[1].is_finite());
        // The 1e9 box still draws its visible top and left edges.
        let green = Rgba([0, 255, 0, 255]);
        assert_eq!(*overlay.canvas.get_pixel(200, 0), green);
        assert_eq!(*overlay.canvas.get_pixel(48, 150), green);
        // The wide box's bottom edge at y = 2 crosses the whole canvas.
        assert_eq!(*overlay.canvas.get_pixel(295, 2), green);
    }

    #[test]
    fn segments_are_clipped_to_the_canvas() {
        assert_eq!(
            clip_segment((-10.0, 5.0), (1e9, 5.0), 100, 50),
            Some(((0.0, 5.0), (99.0, 5.0)))
        );
        assert_eq!(clip_segment((0.0, -5.0), (99.0, -5.0), 100, 50), None);
        assert_eq!(clip_segment((120.0, 0.0), (130.0, 40.0), 100, 50), None);
        assert_eq!(
            clip_segment((10.0, 10.0), (20.0, 30.0), 100, 50),
            Some(((10.0, 10.0), (20.0, 30.0)))
        );
        assert_eq!(clip_segment((0.0, 0.0), (5.0, 5.0), 0, 50), None);
    }

    #[test]
    fn text_log_prepends_and_trims_the_tail() {
        let mut log = TextLog::new(20);
        log.push("forwardDuration:12");
        assert_eq!(log.as_str(), "forwardDuration:12\n");
        log.push("forwardDuration:7");
        assert_eq!(log.char_len(), 20);
        assert!(log.as_str().starts_with("forwardDuration:7\nfo"));
    }
}
