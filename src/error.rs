use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage an error surfaced in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Prompt,
    Initialize,
    Propagate,
    Composite,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extract => "extract",
            Stage::Prompt => "prompt",
            Stage::Initialize => "initialize",
            Stage::Propagate => "propagate",
            Stage::Composite => "composite",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("source video {path} could not be opened: {reason}")]
    SourceNotFound { path: PathBuf, reason: String },

    #[error("failed to initialize segmentation model: {0}")]
    ModelInit(String),

    #[error("frame index {index} is out of range for a sequence of {frame_count} frames")]
    InvalidFrameIndex { index: usize, frame_count: usize },

    #[error("no bounding boxes were submitted, nothing to track")]
    EmptyPromptSet,

    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error on {path}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("video {operation} failed")]
    Video {
        operation: &'static str,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("unexpected mask shape {actual:?}, expected {expected}")]
    MaskShape { expected: String, actual: Vec<usize> },

    #[error("frame is {actual:?}, writer expects {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("video writer is already closed")]
    SinkClosed,

    #[error("frame sequence in {path} is unusable: {reason}")]
    FrameSequence { path: PathBuf, reason: String },

    #[error("propagation already consumed, reset the session before propagating again")]
    PropagationConsumed,

    #[error("{stage} stage failed{}", frame_suffix(.frame))]
    Stage {
        stage: Stage,
        frame: Option<usize>,
        #[source]
        source: Box<Error>,
    },
}

fn frame_suffix(frame: &Option<usize>) -> String {
    match frame {
        Some(index) => format!(" at frame {index}"),
        None => String::new(),
    }
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Error::Image {
            path: path.into(),
            source,
        }
    }

    pub fn video(operation: &'static str, source: ffmpeg_next::Error) -> Self {
        Error::Video { operation, source }
    }

    pub fn inference(err: impl fmt::Display) -> Self {
        Error::Inference(err.to_string())
    }

    /// Innermost error, skipping stage wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Inference(format!("tensor shape: {err}"))
    }
}

/// Attaches the pipeline stage (and frame) to an error
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T>;
    fn stage_at(self, stage: Stage, frame: usize) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|source| Error::Stage {
            stage,
            frame: None,
            source: Box::new(source),
        })
    }

    fn stage_at(self, stage: Stage, frame: usize) -> Result<T> {
        self.map_err(|source| Error::Stage {
            stage,
            frame: Some(frame),
            source: Box::new(source),
        })
    }
}
