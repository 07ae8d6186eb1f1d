use image::GrayImage;

use crate::config::DetectorConfig;

/// One connected bright region.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub centroid: (f64, f64),
    pub area: usize,
    pub circularity: f64,
    pub inertia_ratio: f64,
}

/// Finds the wand tip: the largest bright, round, compact blob in a
/// grayscale frame.
pub struct BlobDetector {
    config: DetectorConfig,
}

impl BlobDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, frame: &GrayImage) -> Option<(f64, f64)> {
        self.blobs(frame)
            .into_iter()
            .filter(|b| self.accepts(b))
            .max_by_key(|b| b.area)
            .map(|b| b.centroid)
    }

    fn accepts(&self, blob: &Blob) -> bool {
        let c = &self.config;
        blob.area >= c.min_area
            && blob.area <= c.max_area
            && blob.circularity >= c.min_circularity
            && blob.inertia_ratio >= c.min_inertia_ratio
    }

    /// All 4-connected regions at or above the brightness threshold.
    pub fn blobs(&self, frame: &GrayImage) -> Vec<Blob> {
        let (w, h) = frame.dimensions();
        let (w, h) = (w as usize, h as usize);
        let lit = |x: usize, y: usize| frame.get_pixel(x as u32, y as u32)[0] >= self.config.min_threshold;

        let mut seen = vec![false; w * h];
        let mut blobs = Vec::new();
        let mut stack = Vec::new();
        let mut pixels = Vec::new();

        for start in 0..w * h {
            if seen[start] || !lit(start % w, start / w) {
                continue;
            }
            seen[start] = true;
            stack.push(start);
            pixels.clear();

            while let Some(i) = stack.pop() {
                let (x, y) = (i % w, i / w);
                pixels.push((x, y));
                let mut visit = |nx: usize, ny: usize| {
                    let j = ny * w + nx;
                    if !seen[j] && lit(nx, ny) {
                        seen[j] = true;
                        stack.push(j);
                    }
                };
                if x > 0 {
                    visit(x - 1, y);
                }
                if x + 1 < w {
                    visit(x + 1, y);
                }
                if y > 0 {
                    visit(x, y - 1);
                }
                if y + 1 < h {
                    visit(x, y + 1);
                }
            }

            blobs.push(describe(&pixels, |x, y| {
                let inside = |nx: isize, ny: isize| {
                    nx >= 0 && ny >= 0 && (nx as usize) < w && (ny as usize) < h && lit(nx as usize, ny as usize)
                };
                let (x, y) = (x as isize, y as isize);
                !(inside(x - 1, y) && inside(x + 1, y) && inside(x, y - 1) && inside(x, y + 1))
            }));
        }

        blobs
    }
}

/// Shape measures of one region. `on_edge` tells whether a pixel touches
/// the background; the count of such pixels is the perimeter.
fn describe(pixels: &[(usize, usize)], on_edge: impl Fn(usize, usize) -> bool) -> Blob {
    let n = pixels.len() as f64;
    let (sx, sy) = pixels.iter().fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x as f64, sy + y as f64));
    let (cx, cy) = (sx / n, sy / n);

    let (mut mu20, mut mu02, mut mu11) = (0.0, 0.0, 0.0);
    let mut perimeter = 0usize;
    for &(x, y) in pixels {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        mu20 += dx * dx;
        mu02 += dy * dy;
        mu11 += dx * dy;
        if on_edge(x, y) {
            perimeter += 1;
        }
    }

    let half_sum = (mu20 + mu02) / 2.0;
    let spread = (((mu20 - mu02) / 2.0).powi(2) + mu11 * mu11).sqrt();
    let (major, minor) = (half_sum + spread, half_sum - spread);
    let inertia_ratio = if major > 0.0 { (minor / major).max(0.0) } else { 1.0 };

    let circularity = if perimeter > 0 {
        (4.0 * std::f64::consts::PI * n / (perimeter * perimeter) as f64).min(1.0)
    } else {
        0.0
    };

    Blob {
        centroid: (cx, cy),
        area: pixels.len(),
        circularity,
        inertia_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn disk(img: &mut GrayImage, cx: i32, cy: i32, r: i32) {
        for y in (cy - r)..=(cy + r) {
            for x in (cx - r)..=(cx + r) {
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                    img.put_pixel(x as u32, y as u32, Luma([255]));
                }
            }
        }
    }

    fn detector() -> BlobDetector {
        BlobDetector::new(DetectorConfig::default())
    }

    #[test]
    fn test_finds_round_tip() {
        let mut img = GrayImage::new(80, 60);
        disk(&mut img, 40, 30, 5);
        let (x, y) = detector().detect(&img).unwrap();
        assert!((x - 40.0).abs() < 1e-9);
        assert!((y - 30.0).abs() < 1e-9);

        let blob = &detector().blobs(&img)[0];
        assert_eq!(blob.area, 81);
        assert!(blob.inertia_ratio > 0.9);
    }

    #[test]
    fn test_rejects_line_and_specks() {
        let mut img = GrayImage::new(80, 60);
        for x in 10..50 {
            img.put_pixel(x, 10, Luma([255]));
        }
        img.put_pixel(70, 50, Luma([255]));
        assert_eq!(detector().detect(&img), None);
        assert_eq!(detector().blobs(&img).len(), 2);
    }

    #[test]
    fn test_rejects_oversized_glare() {
        let mut img = GrayImage::new(80, 60);
        disk(&mut img, 40, 30, 15);
        assert_eq!(detector().detect(&img), None);
    }

    #[test]
    fn test_dim_pixels_ignored() {
        let mut img = GrayImage::from_pixel(40, 40, Luma([120]));
        disk(&mut img, 20, 20, 4);
        assert_eq!(detector().blobs(&img).len(), 1);
    }

    #[test]
    fn test_largest_valid_blob_wins() {
        let mut img = GrayImage::new(100, 60);
        disk(&mut img, 20, 30, 3);
        disk(&mut img, 70, 30, 6);
        let (x, _) = detector().detect(&img).unwrap();
        assert!((x - 70.0).abs() < 1e-9);
    }
}
