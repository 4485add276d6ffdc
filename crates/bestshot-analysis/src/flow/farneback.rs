//! Dense optical flow by polynomial expansion (Farneback).
//!
//! Each neighbourhood is approximated by `f(x) = xᵀAx + bᵀx + c` through a
//! Gaussian-weighted least-squares fit. A translation `d` between frames
//! turns `b` into `b - 2Ad`, so `d` is recovered per pixel from the local
//! `(A, Δb)` pair averaged over a window, refined over a few iterations and
//! coarse-to-fine over an image pyramid.

use ndarray::Array2;

use super::{FlowEstimator, FlowField};
use crate::error::AnalysisResult;
use crate::imaging::reflect101;

/// Smallest pyramid level side, in pixels.
const MIN_LEVEL_SIDE: usize = 8;

/// Parameters of [`FarnebackFlow`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FarnebackParams {
    /// Scale between pyramid levels (< 1)
    pub pyr_scale: f64,
    /// Pyramid levels including the full-resolution image
    pub levels: usize,
    /// Averaging window side
    pub winsize: usize,
    /// Refinement iterations per level
    pub iterations: usize,
    /// Neighbourhood side of the polynomial fit (odd)
    pub poly_n: usize,
    /// Gaussian sigma weighting the polynomial fit
    pub poly_sigma: f64,
}

impl Default for FarnebackParams {
    fn default() -> Self {
        Self {
            pyr_scale: 0.5,
            levels: 3,
            winsize: 15,
            iterations: 3,
            poly_n: 5,
            poly_sigma: 1.2,
        }
    }
}

impl FarnebackParams {
    /// Single level, single iteration. Used where only the flow change between
    /// pairs matters.
    pub fn coarse() -> Self {
        Self {
            levels: 1,
            iterations: 1,
            ..Self::default()
        }
    }
}

/// Per-pixel quadratic model of an image.
struct PolyExpansion {
    a11: Array2<f32>,
    a12: Array2<f32>,
    a22: Array2<f32>,
    b1: Array2<f32>,
    b2: Array2<f32>,
}

/// Dense flow estimator.
#[derive(Debug, Clone)]
pub struct FarnebackFlow {
    params: FarnebackParams,
    /// Offsets `(dy, dx)` of the fit neighbourhood
    offsets: Vec<(isize, isize)>,
    /// Least-squares projection onto `[1, x, y, x², y², xy]`, one row per basis
    kernels: [Vec<f32>; 6],
}

impl Default for FarnebackFlow {
    fn default() -> Self {
        Self::new(FarnebackParams::default())
    }
}

impl FarnebackFlow {
    pub fn new(params: FarnebackParams) -> Self {
        let radius = (params.poly_n.max(3) / 2) as isize;
        let offsets: Vec<(isize, isize)> = (-radius..=radius)
            .flat_map(|dy| (-radius..=radius).map(move |dx| (dy, dx)))
            .collect();
        let kernels = projection_kernels(&offsets, params.poly_sigma);
        Self {
            params,
            offsets,
            kernels,
        }
    }

    pub fn params(&self) -> &FarnebackParams {
        &self.params
    }

    fn expand(&self, img: &Array2<f32>) -> PolyExpansion {
        let (h, w) = img.dim();
        let mut r: [Array2<f32>; 6] = std::array::from_fn(|_| Array2::zeros((h, w)));

        for y in 0..h {
            for x in 0..w {
                let mut acc = [0.0f32; 6];
                for (j, &(dy, dx)) in self.offsets.iter().enumerate() {
                    let v = img[[
                        reflect101(y as isize + dy, h),
                        reflect101(x as isize + dx, w),
                    ]];
                    for (k, kernel) in self.kernels.iter().enumerate() {
                        acc[k] += kernel[j] * v;
                    }
                }
                for k in 0..6 {
                    r[k][[y, x]] = acc[k];
                }
            }
        }

        let [_, b1, b2, a11, a22, xy] = r;
        PolyExpansion {
            a11,
            a12: xy.mapv(|v| v * 0.5),
            a22,
            b1,
            b2,
        }
    }

    /// One refinement pass of `flow` at a single pyramid level.
    fn refine(&self, p1: &PolyExpansion, p2: &PolyExpansion, flow: &mut FlowField) {
        let (h, w) = flow.dim();
        let mut g11 = Array2::<f32>::zeros((h, w));
        let mut g12 = Array2::<f32>::zeros((h, w));
        let mut g22 = Array2::<f32>::zeros((h, w));
        let mut h1 = Array2::<f32>::zeros((h, w));
        let mut h2 = Array2::<f32>::zeros((h, w));

        for y in 0..h {
            for x in 0..w {
                let dx = flow.dx[[y, x]];
                let dy = flow.dy[[y, x]];
                let sx = x as f32 + dx;
                let sy = y as f32 + dy;

                let a11 = 0.5 * (p1.a11[[y, x]] + bilinear(&p2.a11, sy, sx));
                let a12 = 0.5 * (p1.a12[[y, x]] + bilinear(&p2.a12, sy, sx));
                let a22 = 0.5 * (p1.a22[[y, x]] + bilinear(&p2.a22, sy, sx));

                let db1 = -0.5 * (bilinear(&p2.b1, sy, sx) - p1.b1[[y, x]]) + a11 * dx + a12 * dy;
                let db2 = -0.5 * (bilinear(&p2.b2, sy, sx) - p1.b2[[y, x]]) + a12 * dx + a22 * dy;

                g11[[y, x]] = a11 * a11 + a12 * a12;
                g12[[y, x]] = a11 * a12 + a12 * a22;
                g22[[y, x]] = a12 * a12 + a22 * a22;
                h1[[y, x]] = a11 * db1 + a12 * db2;
                h2[[y, x]] = a12 * db1 + a22 * db2;
            }
        }

        let radius = self.params.winsize / 2;
        let g11 = box_sum(&g11, radius);
        let g12 = box_sum(&g12, radius);
        let g22 = box_sum(&g22, radius);
        let h1 = box_sum(&h1, radius);
        let h2 = box_sum(&h2, radius);

        for y in 0..h {
            for x in 0..w {
                let det = g11[[y, x]] * g22[[y, x]] - g12[[y, x]] * g12[[y, x]];
                if det.abs() > 1e-9 {
                    flow.dx[[y, x]] =
                        ((g22[[y, x]] * h1[[y, x]] - g12[[y, x]] * h2[[y, x]]) / det) as f32;
                    flow.dy[[y, x]] =
                        ((g11[[y, x]] * h2[[y, x]] - g12[[y, x]] * h1[[y, x]]) / det) as f32;
                }
            }
        }
    }
}

impl FarnebackFlow {
    /// Flow computed in-process, without OpenCV.
    pub fn compute_portable(&self, prev: &Array2<f32>, next: &Array2<f32>) -> FlowField {
        let (h, w) = prev.dim();
        if h == 0 || w == 0 || next.dim() != prev.dim() {
            return FlowField::zeros(h, w);
        }

        let pyr1 = pyramid(prev, self.params.pyr_scale, self.params.levels);
        let pyr2 = pyramid(next, self.params.pyr_scale, self.params.levels);

        let mut flow: Option<FlowField> = None;
        for (img1, img2) in pyr1.iter().zip(pyr2.iter()).rev() {
            let (lh, lw) = img1.dim();
            let mut level_flow = match flow.take() {
                Some(coarse) => upscale_flow(&coarse, lh, lw),
                None => FlowField::zeros(lh, lw),
            };

            let p1 = self.expand(img1);
            let p2 = self.expand(img2);
            for _ in 0..self.params.iterations.max(1) {
                self.refine(&p1, &p2, &mut level_flow);
            }
            flow = Some(level_flow);
        }

        flow.unwrap_or_else(|| FlowField::zeros(h, w))
    }
}

impl FlowEstimator for FarnebackFlow {
    fn name(&self) -> &'static str {
        "farneback"
    }

    fn compute(&self, prev: &Array2<f32>, next: &Array2<f32>) -> AnalysisResult<FlowField> {
        let (h, w) = prev.dim();
        if h == 0 || w == 0 || next.dim() != prev.dim() {
            return Ok(FlowField::zeros(h, w));
        }
        #[cfg(feature = "opencv")]
        {
            crate::cv::farneback(&self.params, prev, next)
        }
        #[cfg(not(feature = "opencv"))]
        {
            Ok(self.compute_portable(prev, next))
        }
    }
}

/// Weighted least-squares projection kernels for the quadratic basis.
fn projection_kernels(offsets: &[(isize, isize)], sigma: f64) -> [Vec<f32>; 6] {
    let basis = |dy: f64, dx: f64| [1.0, dx, dy, dx * dx, dy * dy, dx * dy];
    let weight = |d: f64| (-(d * d) / (2.0 * sigma * sigma)).exp();

    // G = Bᵀ W B
    let mut g = [[0.0f64; 6]; 6];
    for &(dy, dx) in offsets {
        let (dy, dx) = (dy as f64, dx as f64);
        let b = basis(dy, dx);
        let wgt = weight(dx) * weight(dy);
        for i in 0..6 {
            for j in 0..6 {
                g[i][j] += wgt * b[i] * b[j];
            }
        }
    }

    let Some(g_inv) = invert6(g) else {
        return std::array::from_fn(|_| vec![0.0; offsets.len()]);
    };

    // K = G⁻¹ Bᵀ W
    std::array::from_fn(|k| {
        offsets
            .iter()
            .map(|&(dy, dx)| {
                let (dy, dx) = (dy as f64, dx as f64);
                let b = basis(dy, dx);
                let wgt = weight(dx) * weight(dy);
                (0..6).map(|i| g_inv[k][i] * b[i]).sum::<f64>() as f32 * wgt as f32
            })
            .collect()
    })
}

/// Gauss-Jordan inverse with partial pivoting.
fn invert6(mut m: [[f64; 6]; 6]) -> Option<[[f64; 6]; 6]> {
    let mut inv = [[0.0f64; 6]; 6];
    for (i, row) in inv.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for col in 0..6 {
        let pivot = (col..6).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        inv.swap(col, pivot);

        let p = m[col][col];
        for j in 0..6 {
            m[col][j] /= p;
            inv[col][j] /= p;
        }
        for row in 0..6 {
            if row != col {
                let factor = m[row][col];
                if factor != 0.0 {
                    for j in 0..6 {
                        m[row][j] -= factor * m[col][j];
                        inv[row][j] -= factor * inv[col][j];
                    }
                }
            }
        }
    }
    Some(inv)
}

/// Sample `img` at a fractional position, clamped to the image.
pub(super) fn bilinear(img: &Array2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = img.dim();
    let y = y.clamp(0.0, (h - 1) as f32);
    let x = x.clamp(0.0, (w - 1) as f32);
    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = y - y0 as f32;
    let fx = x - x0 as f32;

    let top = img[[y0, x0]] * (1.0 - fx) + img[[y0, x1]] * fx;
    let bottom = img[[y1, x0]] * (1.0 - fx) + img[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Sum over a `(2r+1)²` window clipped to the image, via an integral image.
fn box_sum(src: &Array2<f32>, radius: usize) -> Array2<f64> {
    let (h, w) = src.dim();
    let mut integral = Array2::<f64>::zeros((h + 1, w + 1));
    for y in 0..h {
        let mut row = 0.0f64;
        for x in 0..w {
            row += src[[y, x]] as f64;
            integral[[y + 1, x + 1]] = integral[[y, x + 1]] + row;
        }
    }

    Array2::from_shape_fn((h, w), |(y, x)| {
        let y0 = y.saturating_sub(radius);
        let x0 = x.saturating_sub(radius);
        let y1 = (y + radius + 1).min(h);
        let x1 = (x + radius + 1).min(w);
        integral[[y1, x1]] - integral[[y0, x1]] - integral[[y1, x0]] + integral[[y0, x0]]
    })
}

/// Separable Gaussian blur with mirrored borders.
fn gaussian_blur(img: &Array2<f32>, sigma: f64) -> Array2<f32> {
    if sigma <= 0.0 {
        return img.clone();
    }
    let radius = (sigma * 3.0).ceil().max(1.0) as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|d| (-((d * d) as f64) / (2.0 * sigma * sigma)).exp() as f32)
        .collect();
    let total: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);

    let (h, w) = img.dim();
    let horizontal: Array2<f32> = Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * img[[y, reflect101(x as isize + i as isize - radius, w)]])
            .sum::<f32>()
    });
    Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * horizontal[[reflect101(y as isize + i as isize - radius, h), x]])
            .sum::<f32>()
    })
}

/// Bilinear resize with pixel-center alignment.
fn resize(img: &Array2<f32>, new_h: usize, new_w: usize) -> Array2<f32> {
    let (h, w) = img.dim();
    let sy = h as f32 / new_h as f32;
    let sx = w as f32 / new_w as f32;
    Array2::from_shape_fn((new_h, new_w), |(y, x)| {
        bilinear(
            img,
            (y as f32 + 0.5) * sy - 0.5,
            (x as f32 + 0.5) * sx - 0.5,
        )
    })
}

/// Image pyramid of up to `levels` images, full resolution first.
pub(super) fn pyramid(img: &Array2<f32>, scale: f64, levels: usize) -> Vec<Array2<f32>> {
    let count = levels;
    let mut levels = vec![img.clone()];
    let scale = scale.clamp(0.1, 0.9);
    let sigma = (1.0 / scale - 1.0) * 0.5;

    for _ in 1..count.max(1) {
        let Some(last) = levels.last() else { break };
        let (h, w) = last.dim();
        let nh = (h as f64 * scale).round() as usize;
        let nw = (w as f64 * scale).round() as usize;
        if nh < MIN_LEVEL_SIDE || nw < MIN_LEVEL_SIDE {
            break;
        }
        let blurred = gaussian_blur(last, sigma);
        levels.push(resize(&blurred, nh, nw));
    }
    levels
}

/// Carry a coarse flow to a finer level, rescaling the vectors.
fn upscale_flow(flow: &FlowField, new_h: usize, new_w: usize) -> FlowField {
    let (h, w) = flow.dim();
    let fx = new_w as f32 / w as f32;
    let fy = new_h as f32 / h as f32;
    FlowField {
        dx: resize(&flow.dx, new_h, new_w).mapv(|v| v * fx),
        dy: resize(&flow.dy, new_h, new_w).mapv(|v| v * fy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smooth texture that polynomial expansion can track.
    fn texture(h: usize, w: usize, shift_x: f32, shift_y: f32) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(y, x)| {
            let xf = x as f32 - shift_x;
            let yf = y as f32 - shift_y;
            128.0 + 60.0 * (xf * 0.3).sin() * (yf * 0.25).cos() + 30.0 * (xf * 0.11 + yf * 0.07).sin()
        })
    }

    #[test]
    fn test_kernels_reproduce_quadratic() {
        let flow = FarnebackFlow::default();
        // f = 3 + 2x - y + 0.5x² + 0.25y² + 0.1xy is fit exactly
        let img = Array2::from_shape_fn((11, 11), |(y, x)| {
            let xf = x as f32 - 5.0;
            let yf = y as f32 - 5.0;
            3.0 + 2.0 * xf - yf + 0.5 * xf * xf + 0.25 * yf * yf + 0.1 * xf * yf
        });
        let p = flow.expand(&img);
        // at the center pixel the local coordinates coincide with the global ones
        assert!((p.b1[[5, 5]] - 2.0).abs() < 1e-3);
        assert!((p.b2[[5, 5]] + 1.0).abs() < 1e-3);
        assert!((p.a11[[5, 5]] - 0.5).abs() < 1e-3);
        assert!((p.a22[[5, 5]] - 0.25).abs() < 1e-3);
        assert!((p.a12[[5, 5]] - 0.05).abs() < 1e-3);
    }

    #[test]
    fn test_identical_frames_have_no_flow() {
        let img = texture(48, 64, 0.0, 0.0);
        let flow = FarnebackFlow::default().compute_portable(&img, &img);
        let stats = flow.statistics();
        assert!(stats.mean_magnitude < 1e-3);
    }

    #[test]
    fn test_recovers_horizontal_shift() {
        let prev = texture(64, 80, 0.0, 0.0);
        let next = texture(64, 80, 2.0, 0.0);
        let flow = FarnebackFlow::default().compute_portable(&prev, &next);

        // interior average, away from borders
        let mut sum_dx = 0.0;
        let mut sum_dy = 0.0;
        let mut n = 0.0;
        for y in 16..48 {
            for x in 16..64 {
                sum_dx += flow.dx[[y, x]] as f64;
                sum_dy += flow.dy[[y, x]] as f64;
                n += 1.0;
            }
        }
        let mean_dx = sum_dx / n;
        let mean_dy = sum_dy / n;
        assert!((mean_dx - 2.0).abs() < 0.75, "dx = {mean_dx}");
        assert!(mean_dy.abs() < 0.75, "dy = {mean_dy}");
    }

    #[test]
    fn test_box_sum_clips_window() {
        let ones = Array2::from_elem((5, 5), 1.0f32);
        let sums = box_sum(&ones, 1);
        assert_eq!(sums[[0, 0]], 4.0);
        assert_eq!(sums[[2, 2]], 9.0);
        assert_eq!(sums[[4, 2]], 6.0);
    }

    #[test]
    fn test_pyramid_levels() {
        let img = Array2::<f32>::zeros((64, 80));
        let params = FarnebackParams::default();
        let levels = pyramid(&img, params.pyr_scale, params.levels);
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[1].dim(), (32, 40));
        assert_eq!(levels[2].dim(), (16, 20));

        let coarse = FarnebackParams::coarse();
        let coarse = pyramid(&img, coarse.pyr_scale, coarse.levels);
        assert_eq!(coarse.len(), 1);
    }
}
