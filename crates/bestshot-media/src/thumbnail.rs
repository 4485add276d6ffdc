//! Contact sheet of selected frames.

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use bestshot_models::encoding::{CONTACT_SHEET_COLUMNS, CONTACT_SHEET_THUMB_SIZE};

use crate::error::{MediaError, MediaResult};

/// Layout of a contact sheet grid.
#[derive(Debug, Clone, Copy)]
pub struct ContactSheetLayout {
    pub columns: u32,
    /// Cell size (width, height)
    pub thumb_size: (u32, u32),
}

impl Default for ContactSheetLayout {
    fn default() -> Self {
        Self {
            columns: CONTACT_SHEET_COLUMNS,
            thumb_size: CONTACT_SHEET_THUMB_SIZE,
        }
    }
}

impl ContactSheetLayout {
    /// Canvas size for `count` thumbnails.
    pub fn canvas_size(&self, count: usize) -> (u32, u32) {
        let columns = self.columns.max(1);
        let rows = (count as u32).div_ceil(columns);
        (columns * self.thumb_size.0, rows * self.thumb_size.1)
    }
}

/// Tile `frames` into a grid on a black canvas and save it to `output`.
///
/// Each thumbnail keeps its aspect ratio and is centered in its cell.
/// Unreadable frames leave their cell empty. Blocking; call from a blocking task.
pub fn create_contact_sheet(
    frames: &[PathBuf],
    output: &Path,
    layout: ContactSheetLayout,
) -> MediaResult<()> {
    if frames.is_empty() {
        return Err(MediaError::internal("contact sheet needs at least one frame"));
    }

    let (width, height) = layout.canvas_size(frames.len());
    let mut canvas = RgbImage::new(width, height);
    let (cell_w, cell_h) = layout.thumb_size;
    let columns = layout.columns.max(1);

    for (i, path) in frames.iter().enumerate() {
        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping {} in contact sheet: {}", path.display(), e);
                continue;
            }
        };

        let thumb = img.resize(cell_w, cell_h, FilterType::Lanczos3).to_rgb8();
        let col = i as u32 % columns;
        let row = i as u32 / columns;
        let x = col * cell_w + (cell_w - thumb.width()) / 2;
        let y = row * cell_h + (cell_h - thumb.height()) / 2;
        imageops::overlay(&mut canvas, &thumb, x as i64, y as i64);
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    canvas.save(output)?;
    info!(frames = frames.len(), "Saved contact sheet to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_canvas_size_rounds_rows_up() {
        let layout = ContactSheetLayout::default();
        assert_eq!(layout.canvas_size(5), (1280, 360));
        assert_eq!(layout.canvas_size(4), (1280, 180));
    }

    #[test]
    fn test_contact_sheet_centers_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("frame_000001.png");
        RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]))
            .save(&frame)
            .unwrap();

        let output = dir.path().join("sheet.png");
        let layout = ContactSheetLayout {
            columns: 2,
            thumb_size: (40, 20),
        };
        create_contact_sheet(&[frame], &output, layout).unwrap();

        let sheet = image::open(&output).unwrap().to_rgb8();
        assert_eq!(sheet.dimensions(), (80, 20));
        // 20x20 thumbnail centered in a 40x20 cell
        assert_eq!(sheet.get_pixel(20, 10), &Rgb([255, 255, 255]));
        assert_eq!(sheet.get_pixel(2, 10), &Rgb([0, 0, 0]));
        assert_eq!(sheet.get_pixel(60, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_contact_sheet_requires_frames() {
        let dir = tempfile::tempdir().unwrap();
        assert!(create_contact_sheet(&[], &dir.path().join("s.jpg"), Default::default()).is_err());
    }
}
