//! Grayscale image primitives shared by the scorers, flow and shot detection.
//!
//! Images are handled as `Array2<f32>` indexed `[row, col]` with values in
//! `0..=255`. Border handling mirrors without repeating the edge pixel
//! (`gfedcb|abcdefgh|gfedcba`).
//!
//! The measures go through OpenCV when the `opencv` feature is enabled; the
//! ndarray kernels here (`laplacian`, `sobel`, `canny`) are used otherwise
//! and by the portable flow estimators.

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array2;
use std::path::Path;

use crate::error::{AnalysisError, AnalysisResult};

/// Canny hysteresis thresholds used for edge density.
pub const CANNY_LOW: f32 = 50.0;
pub const CANNY_HIGH: f32 = 150.0;

/// Load an image as 8-bit grayscale.
pub fn load_gray(path: &Path) -> AnalysisResult<GrayImage> {
    let img = image::open(path).map_err(|e| AnalysisError::image(path, e))?;
    Ok(img.to_luma8())
}

/// Downscale `img` to `max_width` when wider, keeping the aspect ratio.
pub fn fit_width(img: GrayImage, max_width: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w <= max_width || max_width == 0 {
        return img;
    }
    let new_h = ((h as u64 * max_width as u64) / w as u64).max(1) as u32;
    imageops::resize(&img, max_width, new_h, FilterType::Triangle)
}

/// Load a grayscale frame as an array, downscaled to `max_width` when wider.
pub fn load_gray_array(path: &Path, max_width: u32) -> AnalysisResult<Array2<f32>> {
    Ok(gray_to_array(&fit_width(load_gray(path)?, max_width)))
}

pub fn gray_to_array(img: &GrayImage) -> Array2<f32> {
    let (w, h) = img.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32)[0] as f32
    })
}

/// Mirror index `i` into `0..n`.
#[inline]
pub fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * (n - 1) - i;
        } else {
            return i as usize;
        }
    }
}

#[inline]
fn at(img: &Array2<f32>, y: isize, x: isize) -> f32 {
    let (h, w) = img.dim();
    img[[reflect101(y, h), reflect101(x, w)]]
}

/// 4-neighbour Laplacian.
pub fn laplacian(img: &Array2<f32>) -> Array2<f32> {
    let (h, w) = img.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let (y, x) = (y as isize, x as isize);
        at(img, y - 1, x) + at(img, y + 1, x) + at(img, y, x - 1) + at(img, y, x + 1)
            - 4.0 * at(img, y, x)
    })
}

/// Population variance of the Laplacian; higher means sharper.
pub fn laplacian_variance(img: &Array2<f32>) -> AnalysisResult<f64> {
    if img.is_empty() {
        return Ok(0.0);
    }
    #[cfg(feature = "opencv")]
    {
        crate::cv::laplacian_variance(img)
    }
    #[cfg(not(feature = "opencv"))]
    {
        let lap = laplacian(img);
        let n = lap.len() as f64;
        let mean = lap.iter().map(|&v| v as f64).sum::<f64>() / n;
        Ok(lap.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n)
    }
}

/// Pixel counts per intensity value.
pub fn intensity_histogram(img: &GrayImage) -> AnalysisResult<[u64; 256]> {
    #[cfg(feature = "opencv")]
    {
        crate::cv::intensity_histogram(img)
    }
    #[cfg(not(feature = "opencv"))]
    {
        let mut hist = [0u64; 256];
        for p in img.pixels() {
            hist[p[0] as usize] += 1;
        }
        Ok(hist)
    }
}

/// Histogram over `bins` equal-width intensity bins, normalized to sum to 1.
pub fn normalized_histogram(img: &Array2<f32>, bins: usize) -> AnalysisResult<Vec<f64>> {
    let bins = bins.max(1);
    if img.is_empty() {
        return Ok(vec![0.0; bins]);
    }
    #[cfg(feature = "opencv")]
    {
        crate::cv::normalized_histogram(img, bins)
    }
    #[cfg(not(feature = "opencv"))]
    {
        let mut hist = vec![0.0f64; bins];
        for &v in img.iter() {
            let b = ((v.clamp(0.0, 255.0) as usize) * bins / 256).min(bins - 1);
            hist[b] += 1.0;
        }
        let total: f64 = hist.iter().sum();
        hist.iter_mut().for_each(|h| *h /= total);
        Ok(hist)
    }
}

/// Symmetric chi-square distance between two normalized histograms.
pub fn chi_square_distance(h1: &[f64], h2: &[f64]) -> f64 {
    0.5 * h1
        .iter()
        .zip(h2)
        .map(|(a, b)| (a - b).powi(2) / (a + b + 1e-6))
        .sum::<f64>()
}

/// 3x3 Sobel derivatives `(dx, dy)`.
pub fn sobel(img: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (h, w) = img.dim();
    let gx = Array2::from_shape_fn((h, w), |(y, x)| {
        let (y, x) = (y as isize, x as isize);
        (at(img, y - 1, x + 1) + 2.0 * at(img, y, x + 1) + at(img, y + 1, x + 1))
            - (at(img, y - 1, x - 1) + 2.0 * at(img, y, x - 1) + at(img, y + 1, x - 1))
    });
    let gy = Array2::from_shape_fn((h, w), |(y, x)| {
        let (y, x) = (y as isize, x as isize);
        (at(img, y + 1, x - 1) + 2.0 * at(img, y + 1, x) + at(img, y + 1, x + 1))
            - (at(img, y - 1, x - 1) + 2.0 * at(img, y - 1, x) + at(img, y - 1, x + 1))
    });
    (gx, gy)
}

/// Canny edge map with L1 gradient magnitude.
pub fn canny(img: &Array2<f32>, low: f32, high: f32) -> Array2<bool> {
    let (h, w) = img.dim();
    let (gx, gy) = sobel(img);
    let mag = Array2::from_shape_fn((h, w), |(y, x)| gx[[y, x]].abs() + gy[[y, x]].abs());

    // Non-maximum suppression along the quantized gradient direction.
    const TAN_22_5: f32 = 0.414_213_57;
    let mut thin = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let m = mag[[y, x]];
            if m <= low {
                continue;
            }
            let (dx, dy) = (gx[[y, x]], gy[[y, x]]);
            let (ax, ay) = (dx.abs(), dy.abs());
            let (oy, ox): (isize, isize) = if ay <= ax * TAN_22_5 {
                (0, 1)
            } else if ay >= ax / TAN_22_5 {
                (1, 0)
            } else if (dx > 0.0) == (dy > 0.0) {
                (1, 1)
            } else {
                (1, -1)
            };
            let neighbour = |sy: isize, sx: isize| -> f32 {
                let ny = y as isize + sy;
                let nx = x as isize + sx;
                if ny < 0 || nx < 0 || ny >= h as isize || nx >= w as isize {
                    0.0
                } else {
                    mag[[ny as usize, nx as usize]]
                }
            };
            if m > neighbour(-oy, -ox) && m >= neighbour(oy, ox) {
                thin[[y, x]] = m;
            }
        }
    }

    // Hysteresis: grow strong edges through weak ones (8-connected).
    let mut edges = Array2::from_elem((h, w), false);
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if thin[[y, x]] > high {
                edges[[y, x]] = true;
                stack.push((y, x));
            }
        }
    }
    while let Some((y, x)) = stack.pop() {
        for dy in -1isize..=1 {
            for dx in -1isize..=1 {
                let ny = y as isize + dy;
                let nx = x as isize + dx;
                if ny < 0 || nx < 0 || ny >= h as isize || nx >= w as isize {
                    continue;
                }
                let (ny, nx) = (ny as usize, nx as usize);
                if !edges[[ny, nx]] && thin[[ny, nx]] > low {
                    edges[[ny, nx]] = true;
                    stack.push((ny, nx));
                }
            }
        }
    }
    edges
}

/// Fraction of pixels on a Canny edge.
pub fn edge_density(img: &Array2<f32>) -> AnalysisResult<f64> {
    if img.is_empty() {
        return Ok(0.0);
    }
    #[cfg(feature = "opencv")]
    {
        crate::cv::edge_density(img)
    }
    #[cfg(not(feature = "opencv"))]
    {
        let edges = canny(img, CANNY_LOW, CANNY_HIGH);
        Ok(edges.iter().filter(|&&e| e).count() as f64 / edges.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(size: usize, cell: usize) -> Array2<f32> {
        Array2::from_shape_fn((size, size), |(y, x)| {
            if (y / cell + x / cell) % 2 == 0 {
                0.0
            } else {
                255.0
            }
        })
    }

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(3, 5), 3);
        assert_eq!(reflect101(-3, 1), 0);
    }

    #[test]
    fn test_flat_image_has_no_laplacian_variance() {
        let flat = Array2::from_elem((16, 16), 128.0f32);
        assert_eq!(laplacian_variance(&flat).unwrap(), 0.0);
    }

    #[test]
    fn test_detail_raises_laplacian_variance() {
        let fine = checkerboard(32, 2);
        let coarse = checkerboard(32, 8);
        assert!(laplacian_variance(&fine).unwrap() > laplacian_variance(&coarse).unwrap());
    }

    #[test]
    fn test_normalized_histogram_sums_to_one() {
        let img = checkerboard(8, 1);
        let hist = normalized_histogram(&img, 64).unwrap();
        assert_eq!(hist.len(), 64);
        assert!((hist.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((hist[0] - 0.5).abs() < 1e-12);
        assert!((hist[63] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_chi_square_distance() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(chi_square_distance(&a, &a), 0.0);
        assert!((chi_square_distance(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_edge_density() {
        let flat = Array2::from_elem((32, 32), 90.0f32);
        assert_eq!(edge_density(&flat).unwrap(), 0.0);

        // Vertical step edge in the middle
        let step = Array2::from_shape_fn((32, 32), |(_, x)| if x < 16 { 0.0 } else { 255.0 });
        let density = edge_density(&step).unwrap();
        assert!(density > 0.0);
        assert!(density < 0.2);
    }

    #[test]
    fn test_canny_marks_step_column() {
        let step = Array2::from_shape_fn((16, 16), |(_, x)| if x < 8 { 0.0 } else { 255.0 });
        let edges = canny(&step, CANNY_LOW, CANNY_HIGH);
        assert!(edges.column(7).iter().any(|&e| e) || edges.column(8).iter().any(|&e| e));
        assert!(edges.column(0).iter().all(|&e| !e));
        assert!(edges.column(15).iter().all(|&e| !e));
    }

    #[test]
    fn test_laplacian_of_ramp_is_zero_inside() {
        let ramp = Array2::from_shape_fn((8, 8), |(_, x)| x as f32 * 10.0);
        let lap = laplacian(&ramp);
        assert_eq!(lap[[4, 4]], 0.0);
    }

    #[test]
    fn test_intensity_histogram_counts() {
        let img = GrayImage::from_fn(4, 2, |x, _| image::Luma([if x < 1 { 0 } else { 200 }]));
        let hist = intensity_histogram(&img).unwrap();
        assert_eq!(hist[0], 2);
        assert_eq!(hist[200], 6);
        assert_eq!(hist.iter().sum::<u64>(), 8);
    }

    #[test]
    fn test_fit_width_keeps_aspect() {
        let img = GrayImage::new(1280, 720);
        let small = fit_width(img, 320);
        assert_eq!(small.dimensions(), (320, 180));

        let narrow = GrayImage::new(200, 100);
        assert_eq!(fit_width(narrow, 320).dimensions(), (200, 100));
    }
}
