//! Exposure penalty from the luminance histogram.

use async_trait::async_trait;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

use bestshot_models::Frame;

use super::{score_each, Scorer};
use crate::error::AnalysisResult;
use crate::imaging::{intensity_histogram, load_gray};

/// Histogram spread under which a frame is considered flat.
const LOW_CONTRAST_STD: f64 = 30.0;

/// Exposure diagnostics of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureReport {
    pub mean_brightness: f64,
    pub std_brightness: f64,
    pub bright_pixel_ratio: f64,
    pub dark_pixel_ratio: f64,
    pub is_overexposed: bool,
    pub is_underexposed: bool,
    pub penalty: f64,
}

/// Penalty score: 0 is a well exposed frame, 1 a blown out or crushed one.
///
/// Enters the composite with a negative weight.
#[derive(Debug, Clone, Copy)]
pub struct ExposureScorer {
    /// Bright-pixel fraction above which the frame is overexposed
    pub overexposed_threshold: f64,
    /// Dark-pixel fraction above which the frame is underexposed
    pub underexposed_threshold: f64,
    /// First intensity counted as bright
    pub bright_pixel_value: usize,
    /// Intensities below this count as dark
    pub dark_pixel_value: usize,
}

impl Default for ExposureScorer {
    fn default() -> Self {
        Self {
            overexposed_threshold: 0.99,
            underexposed_threshold: 0.01,
            bright_pixel_value: 250,
            dark_pixel_value: 5,
        }
    }
}

impl ExposureScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposure analysis of an already decoded frame.
    pub fn analyze(&self, img: &GrayImage) -> AnalysisResult<ExposureReport> {
        let counts = intensity_histogram(img)?;
        let total: u64 = counts.iter().sum();
        let hist: Vec<f64> = if total == 0 {
            vec![0.0; 256]
        } else {
            counts.iter().map(|&c| c as f64 / total as f64).collect()
        };

        let bright = hist[self.bright_pixel_value.min(256)..].iter().sum::<f64>();
        let dark = hist[..self.dark_pixel_value.min(256)].iter().sum::<f64>();

        let over = if bright > self.overexposed_threshold {
            (bright - self.overexposed_threshold) / (1.0 - self.overexposed_threshold)
        } else {
            0.0
        };
        let under = if dark > self.underexposed_threshold {
            (dark - self.underexposed_threshold) / (1.0 - self.underexposed_threshold)
        } else {
            0.0
        };
        let mut penalty = over.max(under);

        let mean: f64 = hist.iter().enumerate().map(|(v, p)| v as f64 * p).sum();
        let std = hist
            .iter()
            .enumerate()
            .map(|(v, p)| (v as f64 - mean).powi(2) * p)
            .sum::<f64>()
            .sqrt();

        if std < LOW_CONTRAST_STD {
            // contrast counts half
            let contrast = (LOW_CONTRAST_STD - std) / LOW_CONTRAST_STD;
            penalty = penalty.max(contrast * 0.5);
        }

        Ok(ExposureReport {
            mean_brightness: mean,
            std_brightness: std,
            bright_pixel_ratio: bright,
            dark_pixel_ratio: dark,
            is_overexposed: bright > self.overexposed_threshold,
            is_underexposed: dark > self.underexposed_threshold,
            penalty: penalty.clamp(0.0, 1.0),
        })
    }

    pub fn penalty(&self, path: &Path) -> AnalysisResult<f64> {
        Ok(self.analyze(&load_gray(path)?)?.penalty)
    }

    pub fn analyze_exposure(&self, frame: &Frame) -> AnalysisResult<ExposureReport> {
        self.analyze(&load_gray(&frame.path)?)
    }
}

#[async_trait]
impl Scorer for ExposureScorer {
    fn name(&self) -> &'static str {
        "exposure"
    }

    async fn score_frames(&self, frames: &[Frame]) -> AnalysisResult<Vec<f64>> {
        let scorer = *self;
        score_each(self.name(), frames, move |f| scorer.penalty(&f.path)).await
    }

    async fn score_frame(&self, frame: &Frame) -> AnalysisResult<f64> {
        self.penalty(&frame.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gray(f: impl Fn(u32, u32) -> u8) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| Luma([f(x, y)]))
    }

    #[test]
    fn test_white_frame_is_overexposed() {
        let report = ExposureScorer::new().analyze(&gray(|_, _| 255)).unwrap();
        assert!(report.is_overexposed);
        assert!(!report.is_underexposed);
        assert_eq!(report.bright_pixel_ratio, 1.0);
        assert!((report.penalty - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_black_frame_is_underexposed() {
        let report = ExposureScorer::new().analyze(&gray(|_, _| 0)).unwrap();
        assert!(report.is_underexposed);
        assert!((report.penalty - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_midtone_gets_contrast_penalty() {
        // std 0 -> contrast penalty 1.0 at half strength
        let report = ExposureScorer::new().analyze(&gray(|_, _| 128)).unwrap();
        assert_eq!(report.mean_brightness, 128.0);
        assert!((report.penalty - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_full_range_gradient_is_well_exposed() {
        // 8..=240 across the columns: nothing bright or dark enough to matter
        let report = ExposureScorer::new().analyze(&gray(|x, _| (x * 4 + 8).min(240) as u8)).unwrap();
        assert!(!report.is_overexposed);
        assert!(!report.is_underexposed);
        assert!(report.std_brightness > LOW_CONTRAST_STD);
        assert_eq!(report.penalty, 0.0);
    }
}
