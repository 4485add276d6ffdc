//! OpenCV implementations of the image primitives and flow estimators.
//!
//! Frames arrive as `Array2<f32>` grayscale with integer values in `0..=255`
//! and are copied into 8-bit single-channel `Mat`s.

use image::GrayImage;
use ndarray::Array2;
use opencv::{
    calib3d,
    core::{self, Mat, Point2f, Scalar, Size, TermCriteria, Vec2f, Vector, CV_64F, CV_8UC1},
    imgproc,
    prelude::*,
    video,
};
use tracing::trace;

use crate::error::{AnalysisError, AnalysisResult};
use crate::flow::{FarnebackParams, FlowField, Homography, SparseFlow, MIN_CORNERS, MIN_MATCHES};
use crate::imaging::{CANNY_HIGH, CANNY_LOW};

fn cv_err(op: &'static str) -> impl FnOnce(opencv::Error) -> AnalysisError {
    move |e| AnalysisError::vision(format!("{op}: {e}"))
}

fn gray_mat(rows: usize, cols: usize, pixels: impl Iterator<Item = u8>) -> AnalysisResult<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(rows as i32, cols as i32, CV_8UC1, Scalar::all(0.0))
        .map_err(cv_err("allocate"))?;
    let data = mat.data_bytes_mut().map_err(cv_err("mat data"))?;
    for (dst, v) in data.iter_mut().zip(pixels) {
        *dst = v;
    }
    Ok(mat)
}

/// 8-bit copy of a grayscale array.
pub fn array_to_mat(img: &Array2<f32>) -> AnalysisResult<Mat> {
    let (h, w) = img.dim();
    gray_mat(h, w, img.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8))
}

pub fn gray_image_to_mat(img: &GrayImage) -> AnalysisResult<Mat> {
    let (w, h) = img.dimensions();
    gray_mat(h as usize, w as usize, img.as_raw().iter().copied())
}

/// Variance of the 4-neighbour Laplacian (aperture 1, reflected borders).
pub fn laplacian_variance(img: &Array2<f32>) -> AnalysisResult<f64> {
    let src = array_to_mat(img)?;
    let mut lap = Mat::default();
    imgproc::laplacian(&src, &mut lap, CV_64F, 1, 1.0, 0.0, core::BORDER_DEFAULT)
        .map_err(cv_err("laplacian"))?;

    let mut mean = Mat::default();
    let mut stddev = Mat::default();
    core::mean_std_dev(&lap, &mut mean, &mut stddev, &Mat::default()).map_err(cv_err("mean_std_dev"))?;
    let std = *stddev.at::<f64>(0).map_err(cv_err("stddev"))?;
    Ok(std * std)
}

/// Fraction of pixels on a Canny edge.
pub fn edge_density(img: &Array2<f32>) -> AnalysisResult<f64> {
    let src = array_to_mat(img)?;
    let mut edges = Mat::default();
    imgproc::canny(&src, &mut edges, CANNY_LOW as f64, CANNY_HIGH as f64, 3, false)
        .map_err(cv_err("canny"))?;
    let on = core::count_non_zero(&edges).map_err(cv_err("count_non_zero"))?;
    Ok(on as f64 / img.len() as f64)
}

/// Raw counts over `bins` equal-width bins of `0..256`.
fn histogram_counts(gray: Mat, bins: usize) -> AnalysisResult<Vec<f32>> {
    let channels = Vector::from_slice(&[0]);
    let hist_size = Vector::from_slice(&[bins as i32]);
    let ranges = Vector::from_slice(&[0.0f32, 256.0]);

    let mut images: Vector<Mat> = Vector::new();
    images.push(gray);
    let mask = Mat::default();
    let mut hist = Mat::default();
    imgproc::calc_hist(&images, &channels, &mask, &mut hist, &hist_size, &ranges, false)
        .map_err(cv_err("calc_hist"))?;

    (0..bins)
        .map(|i| hist.at::<f32>(i as i32).map(|v| *v).map_err(cv_err("histogram bin")))
        .collect()
}

/// Histogram normalized to sum to 1.
pub fn normalized_histogram(img: &Array2<f32>, bins: usize) -> AnalysisResult<Vec<f64>> {
    let counts = histogram_counts(array_to_mat(img)?, bins)?;
    let total: f64 = counts.iter().map(|&c| c as f64).sum();
    Ok(counts
        .iter()
        .map(|&c| if total > 0.0 { c as f64 / total } else { 0.0 })
        .collect())
}

/// Pixel counts per intensity value.
pub fn intensity_histogram(img: &GrayImage) -> AnalysisResult<[u64; 256]> {
    let counts = histogram_counts(gray_image_to_mat(img)?, 256)?;
    let mut hist = [0u64; 256];
    for (dst, c) in hist.iter_mut().zip(counts) {
        *dst = c.round() as u64;
    }
    Ok(hist)
}

/// Dense Farneback flow from `prev` to `next`.
pub fn farneback(params: &FarnebackParams, prev: &Array2<f32>, next: &Array2<f32>) -> AnalysisResult<FlowField> {
    let (h, w) = prev.dim();
    let prev_mat = array_to_mat(prev)?;
    let next_mat = array_to_mat(next)?;

    let mut flow = Mat::default();
    video::calc_optical_flow_farneback(
        &prev_mat,
        &next_mat,
        &mut flow,
        params.pyr_scale,
        params.levels as i32,
        params.winsize as i32,
        params.iterations as i32,
        params.poly_n as i32,
        params.poly_sigma,
        0,
    )
    .map_err(cv_err("farneback"))?;

    let vectors = flow.data_typed::<Vec2f>().map_err(cv_err("flow data"))?;
    if vectors.len() != h * w {
        return Err(AnalysisError::vision(format!(
            "flow has {} vectors for a {}x{} frame",
            vectors.len(),
            w,
            h
        )));
    }
    Ok(FlowField {
        dx: Array2::from_shape_fn((h, w), |(y, x)| vectors[y * w + x][0]),
        dy: Array2::from_shape_fn((h, w), |(y, x)| vectors[y * w + x][1]),
    })
}

/// Shi-Tomasi corners tracked with pyramidal Lucas-Kanade and fitted to a
/// RANSAC homography. `None` when too few points survive.
pub fn sparse_homography(
    params: &SparseFlow,
    prev: &Array2<f32>,
    next: &Array2<f32>,
) -> AnalysisResult<Option<Homography>> {
    let prev_mat = array_to_mat(prev)?;
    let next_mat = array_to_mat(next)?;

    let mut corners: Vector<Point2f> = Vector::new();
    imgproc::good_features_to_track(
        &prev_mat,
        &mut corners,
        params.max_corners as i32,
        params.quality_level,
        params.min_distance,
        &Mat::default(),
        3,
        false,
        0.04,
    )
    .map_err(cv_err("good_features_to_track"))?;
    if corners.len() <= MIN_CORNERS {
        trace!(corners = corners.len(), "Too few corners for sparse flow");
        return Ok(None);
    }

    let criteria = TermCriteria::new(
        core::TermCriteria_COUNT + core::TermCriteria_EPS,
        params.max_iterations as i32,
        params.epsilon,
    )
    .map_err(cv_err("term criteria"))?;
    let mut tracked: Vector<Point2f> = Vector::new();
    let mut status: Vector<u8> = Vector::new();
    let mut err: Vector<f32> = Vector::new();
    video::calc_optical_flow_pyr_lk(
        &prev_mat,
        &next_mat,
        &corners,
        &mut tracked,
        &mut status,
        &mut err,
        Size::new(params.win_size as i32, params.win_size as i32),
        params.max_level as i32,
        criteria,
        0,
        1e-4,
    )
    .map_err(cv_err("calc_optical_flow_pyr_lk"))?;

    let mut src: Vector<Point2f> = Vector::new();
    let mut dst: Vector<Point2f> = Vector::new();
    for ((from, to), ok) in corners.iter().zip(tracked.iter()).zip(status.iter()) {
        if ok == 1 {
            src.push(from);
            dst.push(to);
        }
    }
    if src.len() < MIN_MATCHES {
        return Ok(None);
    }

    let mut inliers = Mat::default();
    let h = calib3d::find_homography(&src, &dst, &mut inliers, calib3d::RANSAC, params.ransac_threshold)
        .map_err(cv_err("find_homography"))?;
    if h.empty() || h.rows() != 3 || h.cols() != 3 {
        return Ok(None);
    }

    let mut out = [[0.0f64; 3]; 3];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = *h.at_2d::<f64>(r as i32, c as i32).map_err(cv_err("homography"))?;
        }
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::laplacian;

    fn texture(h: usize, w: usize, shift: usize) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(y, x)| {
            let x = x as f64 - shift as f64;
            let y = y as f64;
            (127.5 + 60.0 * (x * 0.21).sin() + 60.0 * (y * 0.17).cos()).round() as f32
        })
    }

    /// 8px blocks of pseudo-random intensity, shifted right by `shift`.
    fn blocks(h: usize, w: usize, shift: usize) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(y, x)| {
            let bx = (x as i64 - shift as i64).div_euclid(8);
            let by = (y / 8) as i64;
            let hash = (bx.wrapping_mul(73_856_093) ^ by.wrapping_mul(19_349_663)).rem_euclid(256);
            hash as f32
        })
    }

    #[test]
    fn test_laplacian_variance_matches_portable() {
        let img = texture(40, 48, 0);
        let lap = laplacian(&img);
        let n = lap.len() as f64;
        let mean = lap.iter().map(|&v| v as f64).sum::<f64>() / n;
        let portable = lap.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;

        let cv = laplacian_variance(&img).unwrap();
        assert!((cv - portable).abs() <= portable * 1e-9 + 1e-9);
    }

    #[test]
    fn test_histograms_count_every_pixel() {
        let img = texture(20, 30, 0);
        let hist = normalized_histogram(&img, 64).unwrap();
        assert_eq!(hist.len(), 64);
        assert!((hist.iter().sum::<f64>() - 1.0).abs() < 1e-9);

        let gray = GrayImage::from_fn(30, 20, |x, y| image::Luma([img[[y as usize, x as usize]] as u8]));
        let counts = intensity_histogram(&gray).unwrap();
        assert_eq!(counts.iter().sum::<u64>(), 600);
    }

    #[test]
    fn test_farneback_recovers_shift() {
        let prev = texture(96, 128, 0);
        let next = texture(96, 128, 3);
        let field = farneback(&FarnebackParams::default(), &prev, &next).unwrap();

        let (h, w) = field.dim();
        let interior = field.dx.slice(ndarray::s![16..h - 16, 16..w - 16]);
        let mean_dx = interior.iter().map(|&v| v as f64).sum::<f64>() / interior.len() as f64;
        assert!((mean_dx - 3.0).abs() < 0.5, "mean dx {mean_dx}");
    }

    #[test]
    fn test_sparse_homography_is_translation() {
        let prev = blocks(120, 160, 0);
        let next = blocks(120, 160, 4);
        let h = sparse_homography(&SparseFlow::default(), &prev, &next)
            .unwrap()
            .expect("homography");
        assert!((h[0][2] / h[2][2] - 4.0).abs() < 0.5);
        assert!((h[1][2] / h[2][2]).abs() < 0.5);
    }
}
