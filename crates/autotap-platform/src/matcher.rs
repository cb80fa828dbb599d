//! Template matching by normalized cross-correlation.
//!
//! Scores follow OpenCV's `TM_CCOEFF_NORMED` on grayscale images: 1.0 is a
//! perfect match, 0 means no correlation. Window sums come from integral
//! images so only the template correlation term is computed per offset.

use autotap_core::TemplateMatcher;
use image::{imageops, GrayImage, RgbaImage};

/// Location and score of the best match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchLocation {
    pub x: u32,
    pub y: u32,
    pub score: f64,
}

/// Grayscale `TM_CCOEFF_NORMED` matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct CcoeffMatcher;

impl CcoeffMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Best scoring offset of `template` inside `region`. `None` when the
    /// template does not fit.
    pub fn best_match(&self, region: &RgbaImage, template: &RgbaImage) -> Option<MatchLocation> {
        let mut best: Option<MatchLocation> = None;
        scan(region, template, |loc| {
            if best.map_or(true, |b| loc.score > b.score) {
                best = Some(loc);
            }
            false
        });
        best
    }
}

impl TemplateMatcher for CcoeffMatcher {
    fn matches(&self, region: &RgbaImage, template: &RgbaImage, threshold: f64) -> bool {
        let mut found = false;
        scan(region, template, |loc| {
            found = loc.score >= threshold;
            found
        });
        found
    }
}

/// Summed-area tables of pixel values and squared values.
struct Integral {
    width: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let width = w + 1;
        let mut sum = vec![0.0; width * (h + 1)];
        let mut sq = vec![0.0; width * (h + 1)];
        for y in 0..h {
            let (mut row, mut row_sq) = (0.0, 0.0);
            for x in 0..w {
                let v = img.get_pixel(x as u32, y as u32).0[0] as f64;
                row += v;
                row_sq += v * v;
                sum[(y + 1) * width + x + 1] = sum[y * width + x + 1] + row;
                sq[(y + 1) * width + x + 1] = sq[y * width + x + 1] + row_sq;
            }
        }
        Self { width, sum, sq }
    }

    fn window(&self, table: &[f64], x: usize, y: usize, w: usize, h: usize) -> f64 {
        let at = |xx: usize, yy: usize| table[yy * self.width + xx];
        at(x + w, y + h) - at(x, y + h) - at(x + w, y) + at(x, y)
    }
}

/// Visit every offset in row-major order until `visit` returns true.
fn scan(region: &RgbaImage, template: &RgbaImage, mut visit: impl FnMut(MatchLocation) -> bool) {
    let (rw, rh) = region.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > rw || th > rh {
        return;
    }

    let image = imageops::grayscale(region);
    let tmpl = imageops::grayscale(template);
    let n = (tw * th) as f64;

    let tmpl_mean = tmpl.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
    let centered: Vec<f64> = tmpl.pixels().map(|p| p.0[0] as f64 - tmpl_mean).collect();
    let tmpl_var: f64 = centered.iter().map(|v| v * v).sum();

    let integral = Integral::new(&image);
    let (tw, th) = (tw as usize, th as usize);

    for y in 0..=(rh as usize - th) {
        for x in 0..=(rw as usize - tw) {
            let sum = integral.window(&integral.sum, x, y, tw, th);
            let sq = integral.window(&integral.sq, x, y, tw, th);
            let window_var = (sq - sum * sum / n).max(0.0);

            let score = if tmpl_var < f64::EPSILON || window_var < f64::EPSILON {
                // Flat inputs have no correlation; only flat-on-flat counts as a match.
                if tmpl_var < f64::EPSILON && window_var < f64::EPSILON {
                    1.0
                } else {
                    0.0
                }
            } else {
                let mut cross = 0.0;
                for ty in 0..th {
                    let row = &centered[ty * tw..(ty + 1) * tw];
                    for (tx, t) in row.iter().enumerate() {
                        cross += t * image.get_pixel((x + tx) as u32, (y + ty) as u32).0[0] as f64;
                    }
                }
                cross / (tmpl_var * window_var).sqrt()
            };

            if visit(MatchLocation {
                x: x as u32,
                y: y as u32,
                score,
            }) {
                return;
            }
        }
    }
}
