mod composite;
mod config;
mod error;
mod frames;
mod output;
mod pipeline;
mod preview;
mod prompt;
mod segmentation;
mod source;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Checkpoint, Device, ModelConfig, PipelineConfig, Precision};
use output::FfmpegWriter;
use prompt::{
    BoundingBox, JsonFileCollector, PromptCollector, PromptMode, StaticCollector,
    TerminalCollector,
};
use source::FfmpegReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source video to segment
    source_video: PathBuf,

    /// Downscale factor applied to extracted frames, in (0, 1]
    #[arg(long, default_value_t = 0.5)]
    scale_factor: f64,

    /// SAM 2 checkpoint size
    #[arg(long, value_enum, default_value_t = Checkpoint::Large)]
    checkpoint: Checkpoint,

    /// Directory holding the exported checkpoint graphs
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,

    /// Identifier of the tracked object
    #[arg(long, default_value_t = 1)]
    object_id: u32,

    /// How boxes are turned into point prompts
    #[arg(long, value_enum, default_value_t = PromptMode::Box)]
    prompt_mode: PromptMode,

    /// Box on the first frame as x,y,width,height (repeatable)
    /// If neither --bbox nor --boxes is given, boxes are read from stdin
    #[arg(long = "bbox", value_parser = config::parse_bbox_arg)]
    bboxes: Vec<BoundingBox>,

    /// JSON file with boxes on the first frame
    #[arg(long, conflicts_with = "bboxes")]
    boxes: Option<PathBuf>,

    /// Directory for extracted frames and the result video
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Result video path (defaults to <work-dir>/<stem>-result.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Inference device
    #[arg(long, value_enum, default_value_t = Device::Auto)]
    device: Device,

    /// Numeric precision of the exported graphs
    #[arg(long, value_enum, default_value_t = Precision::Full)]
    precision: Precision,

    /// Write an annotated preview of the first-frame prediction
    #[arg(long)]
    preview: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("silhouette starting");

    let pipeline_config = PipelineConfig {
        source_video: args.source_video.clone(),
        scale_factor: args.scale_factor,
        object_id: args.object_id,
        prompt_mode: args.prompt_mode,
        work_dir: args.work_dir.clone(),
        output: args.output.clone(),
        preview: args.preview,
    };
    pipeline_config
        .validate()
        .context("Invalid configuration")?;

    let model_config = ModelConfig {
        checkpoint_dir: args.checkpoint_dir.clone(),
        checkpoint: args.checkpoint,
        device: args.device,
        precision: args.precision,
    };

    let mut reader = FfmpegReader::open(&pipeline_config.source_video)
        .context("Failed to open source video")?;

    let model = segmentation::create_default_model(&model_config)
        .context("Failed to load segmentation model")?;

    let mut collector: Box<dyn PromptCollector> = if let Some(path) = &args.boxes {
        Box::new(JsonFileCollector::new(path))
    } else if !args.bboxes.is_empty() {
        Box::new(StaticCollector::new(args.bboxes.clone()))
    } else {
        Box::new(TerminalCollector::stdio())
    };

    let summary = pipeline::run(
        &pipeline_config,
        &mut reader,
        model,
        collector.as_mut(),
        |path, info| FfmpegWriter::create(path, info),
    )
    .context("Segmentation pipeline failed")?;

    tracing::info!(
        "Result: {} ({} of {} frames)",
        summary.output.display(),
        summary.frames_written,
        summary.frames_extracted
    );

    Ok(())
}
