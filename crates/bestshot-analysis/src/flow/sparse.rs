//! Sparse flow: corners tracked with pyramidal Lucas-Kanade, then a
//! RANSAC homography spread over every pixel.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::trace;

use super::farneback::{bilinear, pyramid};
use super::{FlowEstimator, FlowField};
use crate::error::AnalysisResult;
use crate::imaging::sobel;

/// 3x3 homography, row-major.
pub type Homography = [[f64; 3]; 3];

/// Sparse corner-tracking estimator.
#[derive(Debug, Clone)]
pub struct SparseFlow {
    pub max_corners: usize,
    pub quality_level: f64,
    pub min_distance: f64,
    /// Lucas-Kanade window side
    pub win_size: usize,
    /// Extra pyramid levels above full resolution
    pub max_level: usize,
    pub max_iterations: usize,
    pub epsilon: f64,
    /// Maximum reprojection error of a RANSAC inlier, in pixels
    pub ransac_threshold: f64,
    pub ransac_iterations: usize,
    /// Seed of the RANSAC sampler, so results are reproducible
    pub seed: u64,
}

impl Default for SparseFlow {
    fn default() -> Self {
        Self {
            max_corners: 200,
            quality_level: 0.01,
            min_distance: 10.0,
            win_size: 15,
            max_level: 2,
            max_iterations: 10,
            epsilon: 0.03,
            ransac_threshold: 5.0,
            ransac_iterations: 500,
            seed: 0x5eed,
        }
    }
}

/// Fewer detected corners than this skip tracking.
pub(crate) const MIN_CORNERS: usize = 10;

/// A homography needs four correspondences.
pub(crate) const MIN_MATCHES: usize = 4;

impl SparseFlow {
    /// Shi-Tomasi corners, strongest first, at least `min_distance` apart.
    pub fn good_features(&self, img: &Array2<f32>) -> Vec<(f32, f32)> {
        let (h, w) = img.dim();
        if h < 3 || w < 3 {
            return Vec::new();
        }
        let (gx, gy) = sobel(img);

        // Minimum eigenvalue of the 3x3-summed structure tensor.
        let response = Array2::from_shape_fn((h, w), |(y, x)| {
            let mut a = 0.0f64;
            let mut b = 0.0f64;
            let mut c = 0.0f64;
            for yy in y.saturating_sub(1)..(y + 2).min(h) {
                for xx in x.saturating_sub(1)..(x + 2).min(w) {
                    let ix = gx[[yy, xx]] as f64;
                    let iy = gy[[yy, xx]] as f64;
                    a += ix * ix;
                    b += ix * iy;
                    c += iy * iy;
                }
            }
            (a + c) / 2.0 - (((a - c) / 2.0).powi(2) + b * b).sqrt()
        });

        let max_response = response.iter().fold(0.0f64, |m, &v| m.max(v));
        if max_response <= 0.0 {
            return Vec::new();
        }
        let threshold = max_response * self.quality_level;

        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let v = response[[y, x]];
                if v <= threshold {
                    continue;
                }
                let is_local_max = (y - 1..=y + 1)
                    .all(|yy| (x - 1..=x + 1).all(|xx| response[[yy, xx]] <= v));
                if is_local_max {
                    candidates.push((v, y, x));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let min_dist_sq = (self.min_distance * self.min_distance) as f32;
        let mut corners: Vec<(f32, f32)> = Vec::new();
        for (_, y, x) in candidates {
            let (px, py) = (x as f32, y as f32);
            let far_enough = corners.iter().all(|&(cx, cy)| {
                let (dx, dy) = (cx - px, cy - py);
                dx * dx + dy * dy >= min_dist_sq
            });
            if far_enough {
                corners.push((px, py));
                if corners.len() >= self.max_corners {
                    break;
                }
            }
        }
        corners
    }

    /// Pyramidal Lucas-Kanade. Returns the tracked position of each point,
    /// or `None` when tracking failed.
    pub fn track(
        &self,
        prev: &Array2<f32>,
        next: &Array2<f32>,
        points: &[(f32, f32)],
    ) -> Vec<Option<(f32, f32)>> {
        let levels = self.max_level + 1;
        let prev_pyr = pyramid(prev, 0.5, levels);
        let next_pyr = pyramid(next, 0.5, levels);
        let gradients: Vec<(Array2<f32>, Array2<f32>)> = prev_pyr
            .iter()
            .map(|img| {
                let (gx, gy) = sobel(img);
                (gx.mapv(|v| v / 8.0), gy.mapv(|v| v / 8.0))
            })
            .collect();

        let half = (self.win_size / 2) as isize;
        let (h, w) = prev.dim();

        points
            .iter()
            .map(|&(px, py)| {
                let mut guess = (0.0f32, 0.0f32);
                for level in (0..prev_pyr.len()).rev() {
                    let scale = (1u32 << level) as f32;
                    let (cx, cy) = (px / scale, py / scale);
                    let (gx, gy) = &gradients[level];
                    let img1 = &prev_pyr[level];
                    let img2 = &next_pyr[level];

                    let mut g11 = 0.0f64;
                    let mut g12 = 0.0f64;
                    let mut g22 = 0.0f64;
                    let mut window = Vec::with_capacity(((2 * half + 1) * (2 * half + 1)) as usize);
                    for oy in -half..=half {
                        for ox in -half..=half {
                            let sx = cx + ox as f32;
                            let sy = cy + oy as f32;
                            let ix = bilinear(gx, sy, sx) as f64;
                            let iy = bilinear(gy, sy, sx) as f64;
                            g11 += ix * ix;
                            g12 += ix * iy;
                            g22 += iy * iy;
                            window.push((sx, sy, bilinear(img1, sy, sx), ix, iy));
                        }
                    }
                    let det = g11 * g22 - g12 * g12;
                    let area = window.len() as f64;
                    let min_eig = ((g11 + g22) / 2.0
                        - (((g11 - g22) / 2.0).powi(2) + g12 * g12).sqrt())
                        / area;
                    if det.abs() < 1e-9 || min_eig < 1e-4 {
                        return None;
                    }

                    let mut v = (0.0f32, 0.0f32);
                    for _ in 0..self.max_iterations {
                        let mut b1 = 0.0f64;
                        let mut b2 = 0.0f64;
                        for &(sx, sy, i1, ix, iy) in &window {
                            let i2 = bilinear(img2, sy + guess.1 + v.1, sx + guess.0 + v.0);
                            let diff = (i1 - i2) as f64;
                            b1 += diff * ix;
                            b2 += diff * iy;
                        }
                        let ex = ((g22 * b1 - g12 * b2) / det) as f32;
                        let ey = ((g11 * b2 - g12 * b1) / det) as f32;
                        v.0 += ex;
                        v.1 += ey;
                        if ((ex * ex + ey * ey) as f64).sqrt() < self.epsilon {
                            break;
                        }
                    }

                    guess = (guess.0 + v.0, guess.1 + v.1);
                    if level > 0 {
                        guess = (guess.0 * 2.0, guess.1 * 2.0);
                    }
                }

                let (nx, ny) = (px + guess.0, py + guess.1);
                let inside = nx >= 0.0 && ny >= 0.0 && nx <= (w - 1) as f32 && ny <= (h - 1) as f32;
                (inside && nx.is_finite() && ny.is_finite()).then_some((nx, ny))
            })
            .collect()
    }

    /// Homography mapping `src` onto `dst`, fitted by RANSAC then refined on
    /// the inliers.
    pub fn find_homography(&self, src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Homography> {
        let n = src.len();
        if n < MIN_MATCHES || dst.len() != n {
            return None;
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let threshold_sq = self.ransac_threshold * self.ransac_threshold;
        let mut best_inliers: Vec<usize> = Vec::new();

        for _ in 0..self.ransac_iterations {
            let sample = rand::seq::index::sample(&mut rng, n, MIN_MATCHES).into_vec();
            let s: Vec<_> = sample.iter().map(|&i| src[i]).collect();
            let d: Vec<_> = sample.iter().map(|&i| dst[i]).collect();
            let Some(h) = fit_homography(&s, &d) else {
                continue;
            };

            let inliers: Vec<usize> = (0..n)
                .filter(|&i| {
                    project(&h, src[i])
                        .map(|(u, v)| (u - dst[i].0).powi(2) + (v - dst[i].1).powi(2) < threshold_sq)
                        .unwrap_or(false)
                })
                .collect();
            if inliers.len() > best_inliers.len() {
                best_inliers = inliers;
                if best_inliers.len() == n {
                    break;
                }
            }
        }

        if best_inliers.len() < MIN_MATCHES {
            return None;
        }
        let s: Vec<_> = best_inliers.iter().map(|&i| src[i]).collect();
        let d: Vec<_> = best_inliers.iter().map(|&i| dst[i]).collect();
        fit_homography(&s, &d)
    }
}

impl SparseFlow {
    /// Homography between the frames computed in-process, without OpenCV.
    pub fn homography_portable(&self, prev: &Array2<f32>, next: &Array2<f32>) -> Option<Homography> {
        let corners = self.good_features(prev);
        if corners.len() <= MIN_CORNERS {
            trace!(corners = corners.len(), "Too few corners for sparse flow");
            return None;
        }

        let (src, dst): (Vec<_>, Vec<_>) = corners
            .iter()
            .zip(self.track(prev, next, &corners))
            .filter_map(|(&(x, y), tracked)| {
                tracked.map(|(nx, ny)| ((x as f64, y as f64), (nx as f64, ny as f64)))
            })
            .unzip();
        if src.len() < MIN_MATCHES {
            return None;
        }
        self.find_homography(&src, &dst)
    }

    /// Dense flow computed in-process, without OpenCV.
    pub fn compute_portable(&self, prev: &Array2<f32>, next: &Array2<f32>) -> FlowField {
        let (h, w) = prev.dim();
        if next.dim() != prev.dim() {
            return FlowField::zeros(h, w);
        }
        match self.homography_portable(prev, next) {
            Some(homography) => homography_field(&homography, h, w),
            None => FlowField::zeros(h, w),
        }
    }
}

impl FlowEstimator for SparseFlow {
    fn name(&self) -> &'static str {
        "sparse"
    }

    fn compute(&self, prev: &Array2<f32>, next: &Array2<f32>) -> AnalysisResult<FlowField> {
        let (h, w) = prev.dim();
        if h < 3 || w < 3 || next.dim() != prev.dim() {
            return Ok(FlowField::zeros(h, w));
        }
        #[cfg(feature = "opencv")]
        let homography = crate::cv::sparse_homography(self, prev, next)?;
        #[cfg(not(feature = "opencv"))]
        let homography = self.homography_portable(prev, next);

        Ok(match homography {
            Some(homography) => homography_field(&homography, h, w),
            None => FlowField::zeros(h, w),
        })
    }
}

/// Displacement of every pixel under `homography`.
fn homography_field(homography: &Homography, h: usize, w: usize) -> FlowField {
    let mut field = FlowField::zeros(h, w);
    for y in 0..h {
        for x in 0..w {
            if let Some((u, v)) = project(homography, (x as f64, y as f64)) {
                field.dx[[y, x]] = (u - x as f64) as f32;
                field.dy[[y, x]] = (v - y as f64) as f32;
            }
        }
    }
    field
}

fn project(h: &Homography, (x, y): (f64, f64)) -> Option<(f64, f64)> {
    let w = h[2][0] * x + h[2][1] * y + h[2][2];
    if w.abs() < 1e-12 {
        return None;
    }
    Some((
        (h[0][0] * x + h[0][1] * y + h[0][2]) / w,
        (h[1][0] * x + h[1][1] * y + h[1][2]) / w,
    ))
}

/// Similarity transform moving the centroid to the origin with mean
/// distance √2. Returns `(scale, mean_x, mean_y)`.
fn normalization(points: &[(f64, f64)]) -> (f64, f64, f64) {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - mx).powi(2) + (p.1 - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let scale = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    (scale, mx, my)
}

/// Least-squares DLT with `h33 = 1` on normalized coordinates.
fn fit_homography(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Homography> {
    let (s1, mx1, my1) = normalization(src);
    let (s2, mx2, my2) = normalization(dst);

    let mut ata = [[0.0f64; 8]; 8];
    let mut atb = [0.0f64; 8];
    for (&(x, y), &(u, v)) in src.iter().zip(dst) {
        let (x, y) = ((x - mx1) * s1, (y - my1) * s1);
        let (u, v) = ((u - mx2) * s2, (v - my2) * s2);
        let rows = [
            ([x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y], u),
            ([0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y], v),
        ];
        for (row, rhs) in rows {
            for i in 0..8 {
                atb[i] += row[i] * rhs;
                for j in 0..8 {
                    ata[i][j] += row[i] * row[j];
                }
            }
        }
    }

    let p = solve8(ata, atb)?;
    let hn = [[p[0], p[1], p[2]], [p[3], p[4], p[5]], [p[6], p[7], 1.0]];

    // H = T2⁻¹ · Hn · T1
    let t1 = [[s1, 0.0, -s1 * mx1], [0.0, s1, -s1 * my1], [0.0, 0.0, 1.0]];
    let t2_inv = [[1.0 / s2, 0.0, mx2], [0.0, 1.0 / s2, my2], [0.0, 0.0, 1.0]];
    let h = matmul3(&matmul3(&t2_inv, &hn), &t1);

    if h[2][2].abs() < 1e-12 {
        return None;
    }
    let norm = h[2][2];
    Some(h.map(|row| row.map(|v| v / norm)))
}

fn matmul3(a: &Homography, b: &Homography) -> Homography {
    let mut out = [[0.0f64; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Gaussian elimination with partial pivoting.
fn solve8(mut a: [[f64; 8]; 8], mut b: [f64; 8]) -> Option<[f64; 8]> {
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..8 {
            let factor = a[row][col] / a[col][col];
            if factor != 0.0 {
                for k in col..8 {
                    a[row][k] -= factor * a[col][k];
                }
                b[row] -= factor * b[col];
            }
        }
    }

    let mut x = [0.0f64; 8];
    for row in (0..8).rev() {
        let rest: f64 = (row + 1..8).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - rest) / a[row][row];
    }
    Some(x)
}
