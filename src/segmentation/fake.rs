//! Deterministic stand-in model for tests: segments bright pixels inside a
//! window that follows the object from frame to frame.

use super::types::{FrameMasks, Mask, ObjectId, VideoSegmentationModel};
use crate::error::{Error, Result};
use crate::frames::{extract, FrameSequence};
use crate::prompt::PointPrompt;
use crate::source::memory::MemorySource;
use image::{Rgb, RgbImage};
use ndarray::{stack, Array2, Array3, Axis};
use std::collections::BTreeMap;

pub const FRAME_WIDTH: u32 = 160;
pub const FRAME_HEIGHT: u32 = 80;
pub const SQUARE: u32 = 20;
pub const SQUARE_Y: u32 = 30;

const MARGIN: i64 = 12;

/// Left edge of the square in frame `index`
pub fn square_x(index: usize, step: u32) -> u32 {
    10 + index as u32 * step
}

/// Black frames with one white 20x20 square moving right by `step` pixels
pub fn square_frames(count: usize, step: u32) -> Vec<RgbImage> {
    (0..count)
        .map(|index| {
            let left = square_x(index, step);
            RgbImage::from_fn(FRAME_WIDTH, FRAME_HEIGHT, |x, y| {
                let inside = (left..left + SQUARE).contains(&x)
                    && (SQUARE_Y..SQUARE_Y + SQUARE).contains(&y);
                if inside {
                    Rgb([255, 255, 255])
                } else {
                    Rgb([0, 0, 0])
                }
            })
        })
        .collect()
}

/// Extract [`square_frames`] into a scratch directory
pub fn square_sequence(count: usize, step: u32) -> (tempfile::TempDir, FrameSequence) {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::new(square_frames(count, step), (10, 1));
    extract(&mut source, dir.path(), 1.0).unwrap();
    let sequence = FrameSequence::open(dir.path()).unwrap();
    (dir, sequence)
}

#[derive(Debug, Clone, Copy)]
struct Window {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

impl Window {
    fn around(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self {
            x0: x0 - MARGIN,
            y0: y0 - MARGIN,
            x1: x1 + MARGIN,
            y1: y1 + MARGIN,
        }
    }

    fn contains(&self, x: usize, y: usize) -> bool {
        let (x, y) = (x as i64, y as i64);
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }
}

pub struct BrightRegionModel {
    frames: Option<FrameSequence>,
    windows: BTreeMap<ObjectId, Window>,
    fail_at: Option<usize>,
    fail_init: bool,
}

impl BrightRegionModel {
    pub fn new() -> Self {
        Self {
            frames: None,
            windows: BTreeMap::new(),
            fail_at: None,
            fail_init: false,
        }
    }

    /// Fail `track_frame` on `frame_index`
    pub fn failing_at(mut self, frame_index: usize) -> Self {
        self.fail_at = Some(frame_index);
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    fn predict(&self, frame_index: usize, window: Window) -> Result<(Array2<f32>, Window)> {
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| Error::Inference("state not initialized".to_string()))?;
        let frame = frames.load(frame_index)?;
        let (width, height) = frame.dimensions();

        let logits = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            let pixel = frame.get_pixel(x as u32, y as u32);
            let luma = pixel.0.iter().map(|&c| c as u32).sum::<u32>() / 3;
            if window.contains(x, y) && luma > 127 {
                4.0
            } else {
                -4.0
            }
        });

        let next = match Mask::from_logits(logits.view()).bounds() {
            Some((x0, y0, x1, y1)) => Window::around(x0 as i64, y0 as i64, x1 as i64, y1 as i64),
            None => window,
        };
        Ok((logits, next))
    }

    fn stack(&self, frame_index: usize, planes: Vec<Array2<f32>>) -> Result<FrameMasks> {
        let ids: Vec<ObjectId> = self.windows.keys().copied().collect();
        let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
        let logits: Array3<f32> = stack(Axis(0), &views)?;
        FrameMasks::new(frame_index, ids, logits)
    }
}

impl VideoSegmentationModel for BrightRegionModel {
    fn init_state(&mut self, frames: &FrameSequence) -> Result<()> {
        if self.fail_init {
            return Err(Error::Inference("weights missing".to_string()));
        }
        self.frames = Some(frames.clone());
        self.windows.clear();
        Ok(())
    }

    fn reset_state(&mut self) {
        self.windows.clear();
    }

    fn add_points(
        &mut self,
        frame_index: usize,
        object_id: ObjectId,
        points: &[PointPrompt],
    ) -> Result<FrameMasks> {
        let xs = points.iter().map(|p| p.x as i64);
        let ys = points.iter().map(|p| p.y as i64);
        let window = Window::around(
            xs.clone().min().unwrap_or(0),
            ys.clone().min().unwrap_or(0),
            xs.max().unwrap_or(0),
            ys.max().unwrap_or(0),
        );
        self.windows.insert(object_id, window);

        let planes = self
            .windows
            .values()
            .map(|&w| self.predict(frame_index, w).map(|(logits, _)| logits))
            .collect::<Result<Vec<_>>>()?;
        self.stack(frame_index, planes)
    }

    fn track_frame(&mut self, frame_index: usize) -> Result<FrameMasks> {
        if self.fail_at == Some(frame_index) {
            return Err(Error::Inference(format!("injected failure at {frame_index}")));
        }

        let mut planes = Vec::with_capacity(self.windows.len());
        let mut updated = BTreeMap::new();
        for (&id, &window) in &self.windows {
            let (logits, next) = self.predict(frame_index, window)?;
            planes.push(logits);
            updated.insert(id, next);
        }
        self.windows = updated;
        self.stack(frame_index, planes)
    }
}
