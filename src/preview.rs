use crate::error::{Error, Result};
use crate::segmentation::Mask;
use image::{Rgb, RgbImage};
use std::path::Path;

const TINT: [u8; 3] = [230, 25, 75];
const TINT_OPACITY: f32 = 0.5;

/// First frame with the predicted mask tinted and outlined
pub fn overlay(frame: &RgbImage, mask: &Mask) -> Result<RgbImage> {
    if mask.dimensions() != frame.dimensions() {
        let (width, height) = mask.dimensions();
        return Err(Error::MaskShape {
            expected: format!("{}x{} mask", frame.width(), frame.height()),
            actual: vec![height as usize, width as usize],
        });
    }

    let mut annotated = frame.clone();
    for (x, y, pixel) in annotated.enumerate_pixels_mut() {
        if !mask.get(x, y) {
            continue;
        }
        if is_edge(mask, x, y) {
            *pixel = Rgb(TINT);
        } else {
            for (channel, tint) in pixel.0.iter_mut().zip(TINT) {
                *channel = (*channel as f32 * (1.0 - TINT_OPACITY) + tint as f32 * TINT_OPACITY)
                    .round() as u8;
            }
        }
    }
    Ok(annotated)
}

/// Set pixel with an unset (or out of frame) 4-neighbour
fn is_edge(mask: &Mask, x: u32, y: u32) -> bool {
    let (width, height) = mask.dimensions();
    x == 0
        || y == 0
        || x + 1 == width
        || y + 1 == height
        || !mask.get(x - 1, y)
        || !mask.get(x + 1, y)
        || !mask.get(x, y - 1)
        || !mask.get(x, y + 1)
}

pub fn save_overlay(path: &Path, frame: &RgbImage, mask: &Mask) -> Result<()> {
    let annotated = overlay(frame, mask)?;
    annotated.save(path).map_err(|e| Error::image(path, e))?;
    tracing::info!("Wrote first-frame preview to {}", path.display());
    Ok(())
}
