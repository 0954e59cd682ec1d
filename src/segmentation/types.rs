use crate::error::{Error, Result};
use crate::frames::FrameSequence;
use crate::prompt::PointPrompt;
use ndarray::{Array2, Array3, ArrayD, ArrayView2, Axis, Ix3};

/// Caller-assigned identifier of a tracked object, starting at 1
pub type ObjectId = u32;

/// Mask predictions for one frame
///
/// `logits` always has shape `(objects, height, width)` at frame resolution;
/// plane `i` belongs to `object_ids[i]`.
#[derive(Debug, Clone)]
pub struct FrameMasks {
    pub frame_index: usize,
    pub object_ids: Vec<ObjectId>,
    pub logits: Array3<f32>,
}

impl FrameMasks {
    pub fn new(frame_index: usize, object_ids: Vec<ObjectId>, logits: Array3<f32>) -> Result<Self> {
        if logits.len_of(Axis(0)) != object_ids.len() {
            return Err(Error::MaskShape {
                expected: format!("{} object plane(s)", object_ids.len()),
                actual: logits.shape().to_vec(),
            });
        }
        Ok(Self {
            frame_index,
            object_ids,
            logits,
        })
    }

    /// Thresholded mask of `object_id`
    pub fn mask(&self, object_id: ObjectId) -> Option<Mask> {
        self.object_logits(object_id).map(Mask::from_logits)
    }

    /// Raw logit plane of `object_id`
    pub fn object_logits(&self, object_id: ObjectId) -> Option<ArrayView2<'_, f32>> {
        let plane = self.object_ids.iter().position(|&id| id == object_id)?;
        Some(self.logits.index_axis(Axis(0), plane))
    }
}

/// Binary object mask, indexed `[[y, x]]`
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    bits: Array2<bool>,
}

impl Mask {
    /// A pixel belongs to the mask iff its logit is strictly positive
    pub fn from_logits(logits: ArrayView2<f32>) -> Self {
        Self {
            bits: logits.mapv(|v| v > 0.0),
        }
    }

    #[cfg(test)]
    pub fn from_bits(bits: Array2<bool>) -> Self {
        Self { bits }
    }

    /// (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        let (rows, cols) = self.bits.dim();
        (cols as u32, rows as u32)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits
            .get((y as usize, x as usize))
            .copied()
            .unwrap_or(false)
    }

    pub fn area(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Inclusive `(min_x, min_y, max_x, max_y)` of the set pixels
    pub fn bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for ((y, x), &set) in self.bits.indexed_iter() {
            if !set {
                continue;
            }
            let (x, y) = (x as u32, y as u32);
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds
    }
}

/// Bring raw decoder logits into the canonical `(objects, height, width)` shape
///
/// Accepts a single `(H, W)` plane, an `(N, H, W)` stack, or a 4D tensor with
/// a singleton channel `(N, 1, H, W)` or batch `(1, N, H, W)` axis.
pub fn canonical_logits(logits: ArrayD<f32>) -> Result<Array3<f32>> {
    let shape = logits.shape().to_vec();
    let shape_error = || Error::MaskShape {
        expected: "(H, W), (N, H, W), (N, 1, H, W) or (1, N, H, W)".to_string(),
        actual: shape.clone(),
    };

    let stacked = match shape.len() {
        2 => logits.insert_axis(Axis(0)),
        3 => logits,
        4 if shape[1] == 1 => logits.remove_axis(Axis(1)),
        4 if shape[0] == 1 => logits.remove_axis(Axis(0)),
        _ => return Err(shape_error()),
    };

    stacked.into_dimensionality::<Ix3>().map_err(|_| shape_error())
}

/// Trait for promptable video segmentation backends
///
/// Implementations own their inference state: memoized frame features and
/// the per-object mask memory used for temporal propagation.
pub trait VideoSegmentationModel {
    /// Bind a fresh inference state to an extracted frame sequence
    fn init_state(&mut self, frames: &FrameSequence) -> Result<()>;

    /// Drop prompts and propagation history, keep loaded weights
    fn reset_state(&mut self);

    /// Register prompt points for `object_id` on `frame_index` and return
    /// the immediate prediction for that frame
    fn add_points(
        &mut self,
        frame_index: usize,
        object_id: ObjectId,
        points: &[PointPrompt],
    ) -> Result<FrameMasks>;

    /// Predict all prompted objects on `frame_index`, advancing the memory
    fn track_frame(&mut self, frame_index: usize) -> Result<FrameMasks>;
}

impl<M: VideoSegmentationModel + ?Sized> VideoSegmentationModel for Box<M> {
    fn init_state(&mut self, frames: &FrameSequence) -> Result<()> {
        (**self).init_state(frames)
    }

    fn reset_state(&mut self) {
        (**self).reset_state()
    }

    fn add_points(
        &mut self,
        frame_index: usize,
        object_id: ObjectId,
        points: &[PointPrompt],
    ) -> Result<FrameMasks> {
        (**self).add_points(frame_index, object_id, points)
    }

    fn track_frame(&mut self, frame_index: usize) -> Result<FrameMasks> {
        (**self).track_frame(frame_index)
    }
}
