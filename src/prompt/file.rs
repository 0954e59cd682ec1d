use super::{BoundingBox, PromptCollector};
use crate::error::{Error, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Reads boxes from a JSON array written by an external annotation tool
///
/// Each entry is `{"x": .., "y": .., "width": .., "height": ..}`; extra keys
/// such as `label` are ignored.
pub struct JsonFileCollector {
    path: PathBuf,
}

impl JsonFileCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(&self, text: &str) -> Result<Vec<BoundingBox>> {
        let boxes: Vec<BoundingBox> = serde_json::from_str(text).map_err(|e| {
            Error::InvalidPrompt(format!("{}: {}", self.path.display(), e))
        })?;
        for bbox in &boxes {
            bbox.validate()?;
        }
        Ok(boxes)
    }
}

impl PromptCollector for JsonFileCollector {
    fn collect(&mut self, frame_path: &Path, _frame: &RgbImage) -> Result<Vec<BoundingBox>> {
        tracing::info!(
            "Reading boxes for {} from {}",
            frame_path.display(),
            self.path.display()
        );
        let text = std::fs::read_to_string(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let boxes = self.parse(&text)?;
        tracing::info!("Collected {} box(es) from file", boxes.len());
        Ok(boxes)
    }
}
