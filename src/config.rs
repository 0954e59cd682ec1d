use crate::error::{Error, Result};
use crate::prompt::PromptMode;
use crate::segmentation::ObjectId;
use clap::ValueEnum;
use std::path::PathBuf;

/// SAM 2 checkpoint size
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Checkpoint {
    Tiny,
    Small,
    Base,
    Large,
}

impl Checkpoint {
    /// Directory name of the exported graphs for this checkpoint
    pub fn dir_name(self) -> &'static str {
        match self {
            Checkpoint::Tiny => "sam2_hiera_tiny",
            Checkpoint::Small => "sam2_hiera_small",
            Checkpoint::Base => "sam2_hiera_base_plus",
            Checkpoint::Large => "sam2_hiera_large",
        }
    }
}

/// Execution device for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Device {
    /// Accelerator if one registers, CPU otherwise
    Auto,
    Cpu,
    Cuda,
    #[value(name = "tensorrt")]
    TensorRt,
}

/// Numeric precision of the exported graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Precision {
    Full,
    Half,
}

impl Precision {
    pub fn file_suffix(self) -> &'static str {
        match self {
            Precision::Full => "onnx",
            Precision::Half => "fp16.onnx",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub checkpoint_dir: PathBuf,
    pub checkpoint: Checkpoint,
    pub device: Device,
    pub precision: Precision,
}

impl ModelConfig {
    /// Path of one exported graph, e.g. `checkpoints/sam2_hiera_large/image_encoder.onnx`
    pub fn graph_path(&self, graph: &str) -> PathBuf {
        self.checkpoint_dir
            .join(self.checkpoint.dir_name())
            .join(format!("{graph}.{}", self.precision.file_suffix()))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_video: PathBuf,
    pub scale_factor: f64,
    pub object_id: ObjectId,
    pub prompt_mode: PromptMode,
    pub work_dir: PathBuf,
    pub output: Option<PathBuf>,
    pub preview: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        validate_scale_factor(self.scale_factor)?;
        if self.object_id == 0 {
            return Err(Error::InvalidConfig(
                "object id must be a positive integer".to_string(),
            ));
        }
        if self.stem().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "cannot derive a file stem from {}",
                self.source_video.display()
            )));
        }
        Ok(())
    }

    pub fn stem(&self) -> String {
        self.source_video
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// `<work_dir>/<stem>/`
    pub fn frames_dir(&self) -> PathBuf {
        self.work_dir.join(self.stem())
    }

    /// `<work_dir>/<stem>-result.mp4` unless overridden
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.work_dir.join(format!("{}-result.mp4", self.stem())))
    }

    pub fn preview_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}-preview.jpeg", self.stem()))
    }
}

pub fn validate_scale_factor(scale_factor: f64) -> Result<()> {
    if scale_factor > 0.0 && scale_factor <= 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "scale factor must be in (0, 1], got {scale_factor}"
        )))
    }
}

/// Parse a `x,y,width,height` box argument
pub fn parse_bbox_arg(value: &str) -> std::result::Result<crate::prompt::BoundingBox, String> {
    crate::prompt::BoundingBox::parse(value).map_err(|err| err.to_string())
}
