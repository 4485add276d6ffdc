//! Per-video output artifacts: score plot, contact sheet and run report.

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tracing::info;

use bestshot_media::{create_contact_sheet, ContactSheetLayout};
use bestshot_models::{Peak, PipelineReport};

use crate::error::PipelineResult;

pub const SCORE_PLOT_FILE: &str = "score_plot.png";
pub const CONTACT_SHEET_FILE: &str = "contact_sheet.jpg";
pub const REPORT_FILE: &str = "pipeline_report.json";

const PLOT_WIDTH: u32 = 1200;
const PLOT_HEIGHT: u32 = 480;
const MARGIN: u32 = 40;
const MAX_TICKS: f64 = 20.0;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const RAW: Rgb<u8> = Rgb([160, 190, 230]);
const SMOOTHED: Rgb<u8> = Rgb([20, 60, 160]);
const PEAK: Rgb<u8> = Rgb([210, 30, 30]);

/// Maps (frame, score) into canvas pixels.
struct PlotArea {
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
    frames: usize,
}

impl PlotArea {
    fn new(frames: usize) -> Self {
        Self {
            left: MARGIN as f64,
            right: (PLOT_WIDTH - MARGIN) as f64,
            top: MARGIN as f64,
            bottom: (PLOT_HEIGHT - MARGIN) as f64,
            frames,
        }
    }

    fn x(&self, frame: f64) -> f64 {
        let span = (self.frames.max(2) - 1) as f64;
        self.left + (frame / span) * (self.right - self.left)
    }

    fn y(&self, score: f64) -> f64 {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        self.bottom - score * (self.bottom - self.top)
    }
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham line, `thickness` pixels tall.
fn draw_line(img: &mut RgbImage, from: (f64, f64), to: (f64, f64), color: Rgb<u8>, thickness: i64) {
    let (mut x0, mut y0) = (from.0.round() as i64, from.1.round() as i64);
    let (x1, y1) = (to.0.round() as i64, to.1.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        for t in 0..thickness {
            put(img, x0, y0 + t - thickness / 2, color);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn fill_circle(img: &mut RgbImage, center: (f64, f64), radius: i64, color: Rgb<u8>) {
    let (cx, cy) = (center.0.round() as i64, center.1.round() as i64);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put(img, cx + dx, cy + dy, color);
            }
        }
    }
}

fn draw_series(img: &mut RgbImage, area: &PlotArea, series: &[f64], color: Rgb<u8>, thickness: i64) {
    for (i, pair) in series.windows(2).enumerate() {
        draw_line(
            img,
            (area.x(i as f64), area.y(pair[0])),
            (area.x((i + 1) as f64), area.y(pair[1])),
            color,
            thickness,
        );
    }
}

/// Render raw and smoothed scores with peak markers.
///
/// Gridlines mark score quarters; ticks on the time axis are spaced to a
/// round number of seconds. Blocking; call from a blocking task.
pub fn render_score_plot(raw: &[f64], smoothed: &[f64], peaks: &[Peak], fps: f64) -> RgbImage {
    let mut img = RgbImage::from_pixel(PLOT_WIDTH, PLOT_HEIGHT, BACKGROUND);
    let area = PlotArea::new(raw.len().max(smoothed.len()));

    for quarter in 1..=4 {
        let y = area.y(quarter as f64 / 4.0);
        draw_line(&mut img, (area.left, y), (area.right, y), GRID, 1);
    }

    let seconds = if fps > 0.0 { area.frames as f64 / fps } else { 0.0 };
    if seconds > 0.0 {
        let step = [1.0, 2.0, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
            .into_iter()
            .find(|s| seconds / s <= MAX_TICKS)
            .unwrap_or(seconds / MAX_TICKS);
        let mut t = 0.0;
        while t <= seconds {
            let x = area.x(t * fps);
            draw_line(&mut img, (x, area.bottom), (x, area.bottom + 6.0), AXIS, 1);
            t += step;
        }
    }

    draw_series(&mut img, &area, raw, RAW, 1);
    draw_series(&mut img, &area, smoothed, SMOOTHED, 3);

    for peak in peaks {
        let x = area.x(peak.frame_index as f64);
        let mut y = area.top;
        while y < area.bottom {
            draw_line(&mut img, (x, y), (x, (y + 6.0).min(area.bottom)), PEAK, 1);
            y += 12.0;
        }
        let score = smoothed.get(peak.frame_index).copied().unwrap_or(peak.score);
        fill_circle(&mut img, (x, area.y(score)), 5, PEAK);
    }

    draw_line(&mut img, (area.left, area.top), (area.left, area.bottom), AXIS, 1);
    draw_line(&mut img, (area.left, area.bottom), (area.right, area.bottom), AXIS, 1);
    img
}

pub async fn save_score_plot(
    raw: Vec<f64>,
    smoothed: Vec<f64>,
    peaks: Vec<Peak>,
    fps: f64,
    output: PathBuf,
) -> PipelineResult<()> {
    let path = output.clone();
    tokio::task::spawn_blocking(move || render_score_plot(&raw, &smoothed, &peaks, fps).save(&output))
        .await??;
    info!("Saved score plot to {}", path.display());
    Ok(())
}

pub async fn save_contact_sheet(
    frames: Vec<PathBuf>,
    output: PathBuf,
    layout: ContactSheetLayout,
) -> PipelineResult<()> {
    tokio::task::spawn_blocking(move || create_contact_sheet(&frames, &output, layout)).await??;
    Ok(())
}

pub async fn save_report(path: &Path, report: &PipelineReport) -> PipelineResult<()> {
    let json = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(path, json).await?;
    info!("Saved report to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_marks_peaks() {
        let raw: Vec<f64> = (0..90).map(|i| if i == 45 { 0.9 } else { 0.4 }).collect();
        let smoothed = raw.clone();
        let img = render_score_plot(&raw, &smoothed, &[Peak::new(45, 0.9)], 3.0);

        assert_eq!(img.dimensions(), (PLOT_WIDTH, PLOT_HEIGHT));
        let area = PlotArea::new(90);
        let (x, y) = (area.x(45.0).round() as u32, area.y(0.9).round() as u32);
        assert_eq!(*img.get_pixel(x, y), PEAK);
    }

    #[test]
    fn test_plot_handles_single_frame() {
        let img = render_score_plot(&[0.5], &[0.5], &[], 3.0);
        assert_eq!(img.dimensions(), (PLOT_WIDTH, PLOT_HEIGHT));
    }

    #[test]
    fn test_report_is_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REPORT_FILE);
        let report = PipelineReport {
            run_id: bestshot_models::RunId::from_string("run-1"),
            generated_at: chrono::Utc::now(),
            video_info: bestshot_models::VideoInfo {
                duration: 12.0,
                width: 1280,
                height: 720,
                fps: 30.0,
                codec: "h264".to_string(),
                size: 0,
                bitrate: 0,
            },
            config: serde_json::json!({"pipeline": {"top_k": 5}}),
            scores_statistics: Default::default(),
            frames_sampled: 36,
            shots_detected: None,
            peaks_detected: 2,
            peaks_after_filtering: 2,
            clips: Vec::new(),
            diversity_analysis: None,
            processing_time: 1.5,
        };

        tokio_test::block_on(save_report(&path, &report)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"run_id\": \"run-1\""));
        assert!(!text.contains("shots_detected"));
    }

    #[tokio::test]
    async fn test_save_score_plot_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SCORE_PLOT_FILE);
        save_score_plot(vec![0.1, 0.5, 0.2], vec![0.2, 0.3, 0.2], vec![Peak::new(1, 0.3)], 3.0, path.clone())
            .await
            .unwrap();
        assert!(image::open(&path).is_ok());
    }
}
