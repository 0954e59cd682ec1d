#[cfg(test)]
pub mod fake;
mod memory;
mod preprocess;
mod sam2;
mod session;
pub mod types;

pub use sam2::Sam2Onnx;
pub use session::SegmentationSession;
pub use types::{canonical_logits, FrameMasks, Mask, ObjectId, VideoSegmentationModel};

use crate::config::ModelConfig;
use crate::error::Result;

/// Create the default segmentation model (SAM 2 over ONNX Runtime)
pub fn create_default_model(config: &ModelConfig) -> Result<Box<dyn VideoSegmentationModel>> {
    let model = Sam2Onnx::new(config)?;
    Ok(Box::new(model))
}
