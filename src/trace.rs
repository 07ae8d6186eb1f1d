//! Trace accumulation and the mask the classifier sees.
//!
//! A trace is drawn as thick white strokes on a black canvas the size of the
//! camera frame, then blurred, thresholded, shrunk to the classifier's input
//! size and dilated. Both steps are pure functions of their inputs.

use image::{imageops, imageops::FilterType, GrayImage, Luma};

use crate::config::RasterConfig;
use crate::types::Point;

/// Ordered points of one gesture attempt.
#[derive(Debug, Clone, Default)]
pub struct TraceBuffer {
    points: Vec<Point>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Appends `point` unless it sits within `min_spacing` of the last
    /// accepted point. Returns whether it was appended.
    pub fn offer(&mut self, point: Point, min_spacing: f64) -> bool {
        if !point.is_valid() {
            return false;
        }
        match self.points.last() {
            Some(last) if last.distance(&point) < min_spacing => false,
            _ => {
                self.points.push(point);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Moves the points out, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<Point> {
        std::mem::take(&mut self.points)
    }
}

/// Draws `points` as connected strokes of `stroke_width` pixels.
pub fn rasterize(points: &[Point], width: u32, height: u32, stroke_width: u32) -> GrayImage {
    let mut canvas = GrayImage::new(width, height);
    let radius = (stroke_width.max(1) as f64 - 1.0) / 2.0;

    match points {
        [] => {}
        [only] => stamp(&mut canvas, only.x, only.y, radius),
        _ => {
            for pair in points.windows(2) {
                draw_segment(&mut canvas, &pair[0], &pair[1], radius);
            }
        }
    }
    canvas
}

/// Adds one stroke segment to an existing canvas.
pub fn draw_stroke(canvas: &mut GrayImage, from: &Point, to: &Point, stroke_width: u32) {
    let radius = (stroke_width.max(1) as f64 - 1.0) / 2.0;
    draw_segment(canvas, from, to, radius);
}

fn draw_segment(canvas: &mut GrayImage, from: &Point, to: &Point, radius: f64) {
    let length = from.distance(to);
    // Half-pixel steps leave no gaps between stamps.
    let steps = (length * 2.0).ceil().max(1.0) as usize;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = from.x + (to.x - from.x) * t;
        let y = from.y + (to.y - from.y) * t;
        stamp(canvas, x, y, radius);
    }
}

fn stamp(canvas: &mut GrayImage, cx: f64, cy: f64, radius: f64) {
    let (w, h) = canvas.dimensions();
    let cx = cx.round();
    let cy = cy.round();
    let reach = radius.ceil() as i64;
    let r2 = (radius + 0.5) * (radius + 0.5);

    for dy in -reach..=reach {
        for dx in -reach..=reach {
            if (dx * dx + dy * dy) as f64 > r2 {
                continue;
            }
            let px = cx as i64 + dx;
            let py = cy as i64 + dy;
            if px >= 0 && py >= 0 && (px as u32) < w && (py as u32) < h {
                canvas.put_pixel(px as u32, py as u32, Luma([255]));
            }
        }
    }
}

/// Blur, threshold, shrink and dilate a stroke mask into classifier input.
pub fn normalize(mask: &GrayImage, settings: &RasterConfig) -> GrayImage {
    let blurred = imageops::blur(mask, settings.blur_sigma);
    let binary = threshold(&blurred, settings.threshold);
    let small = imageops::resize(&binary, settings.output_size, settings.output_size, FilterType::Triangle);
    dilate(&small)
}

fn threshold(image: &GrayImage, level: u8) -> GrayImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        pixel[0] = if pixel[0] > level { 255 } else { 0 };
    }
    out
}

/// 3x3 max filter.
fn dilate(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut max = 0u8;
            for ny in y.saturating_sub(1)..=(y + 1).min(h.saturating_sub(1)) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w.saturating_sub(1)) {
                    max = max.max(image.get_pixel(nx, ny)[0]);
                }
            }
            out.put_pixel(x, y, Luma([max]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zigzag() -> Vec<Point> {
        vec![
            Point::new(100.0, 100.0),
            Point::new(300.0, 350.0),
            Point::new(500.0, 100.0),
        ]
    }

    #[test]
    fn test_offer_skips_jitter_and_invalid() {
        let mut trace = TraceBuffer::new();
        assert!(trace.offer(Point::new(10.0, 10.0), 6.0));
        assert!(!trace.offer(Point::new(12.0, 11.0), 6.0));
        assert!(!trace.offer(Point::new(f64::NAN, 50.0), 6.0));
        assert!(trace.offer(Point::new(20.0, 10.0), 6.0));
        assert_eq!(trace.len(), 2);

        let taken = trace.take();
        assert_eq!(taken.len(), 2);
        assert!(trace.is_empty());
    }

    #[test]
    fn test_rasterize_is_deterministic() {
        let a = rasterize(&zigzag(), 640, 480, 7);
        let b = rasterize(&zigzag(), 640, 480, 7);
        assert_eq!(a.as_raw(), b.as_raw());
        assert!(a.pixels().any(|p| p[0] == 255));
    }

    #[test]
    fn test_rasterize_stroke_covers_segment() {
        let points = vec![Point::new(10.0, 50.0), Point::new(90.0, 50.0)];
        let mask = rasterize(&points, 100, 100, 7);
        for x in 10..=90 {
            for y in 47..=53 {
                assert_eq!(mask.get_pixel(x, y)[0], 255, "gap at ({}, {})", x, y);
            }
        }
        assert_eq!(mask.get_pixel(50, 40)[0], 0);
        assert_eq!(mask.get_pixel(50, 60)[0], 0);
    }

    #[test]
    fn test_rasterize_clips_to_canvas() {
        let points = vec![Point::new(-20.0, 240.0), Point::new(700.0, 240.0)];
        let mask = rasterize(&points, 640, 480, 7);
        assert_eq!(mask.dimensions(), (640, 480));
        assert_eq!(mask.get_pixel(0, 240)[0], 255);
        assert_eq!(mask.get_pixel(639, 240)[0], 255);
    }

    #[test]
    fn test_normalize_shape() {
        let settings = RasterConfig::default();
        let mask = rasterize(&zigzag(), 640, 480, 7);
        let input = normalize(&mask, &settings);
        assert_eq!(input.dimensions(), (28, 28));
        assert!(input.pixels().any(|p| p[0] > 0));
        // Corners are far from every stroke.
        assert_eq!(input.get_pixel(0, 27)[0], 0);
    }

    #[test]
    fn test_normalize_empty_mask_stays_black() {
        let settings = RasterConfig::default();
        let input = normalize(&GrayImage::new(640, 480), &settings);
        assert!(input.pixels().all(|p| p[0] == 0));
    }
}
