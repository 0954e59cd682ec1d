use crate::composite::composite_logits;
use crate::config::PipelineConfig;
use crate::error::{Error, Result, Stage, StageContext};
use crate::frames::{extract, FrameSequence};
use crate::output::FrameSink;
use crate::preview;
use crate::prompt::{derive_prompt, PromptCollector};
use crate::segmentation::{SegmentationSession, VideoSegmentationModel};
use crate::source::{FrameSource, VideoInfo};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Frame the operator annotates
const PROMPT_FRAME: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_extracted: usize,
    pub frames_written: usize,
    pub output: PathBuf,
}

/// Extract, prompt, propagate and render one object as a silhouette video
///
/// `open_sink` is called with the output path and the (scaled) stream
/// properties once prompting has succeeded. The sink is dropped on every
/// exit path; on success it is finished explicitly.
pub fn run<F, M, C, K, O>(
    config: &PipelineConfig,
    source: &mut F,
    model: M,
    collector: &mut C,
    open_sink: O,
) -> Result<RunSummary>
where
    F: FrameSource,
    M: VideoSegmentationModel,
    C: PromptCollector + ?Sized,
    K: FrameSink,
    O: FnOnce(&Path, &VideoInfo) -> Result<K>,
{
    config.validate()?;
    let started = Instant::now();

    // Extraction
    let frames_dir = config.frames_dir();
    let frames_extracted = extract(source, &frames_dir, config.scale_factor).stage(Stage::Extract)?;
    let sequence = FrameSequence::open(&frames_dir).stage(Stage::Extract)?;
    let (width, height) = sequence.dimensions().stage(Stage::Extract)?;

    // Prompt
    let first_path = sequence.path(PROMPT_FRAME).stage(Stage::Prompt)?.to_path_buf();
    let first_frame = sequence.load(PROMPT_FRAME).stage(Stage::Prompt)?;
    let boxes = collector
        .collect(&first_path, &first_frame)
        .stage(Stage::Prompt)?;
    if boxes.is_empty() {
        return Err(Error::EmptyPromptSet).stage(Stage::Prompt);
    }
    let (points, labels) = derive_prompt(&boxes, config.prompt_mode);
    tracing::info!(
        "{} box(es) -> {} point(s) ({:?} mode)",
        boxes.len(),
        points.len(),
        config.prompt_mode
    );

    let mut session = SegmentationSession::init(model, &sequence).stage(Stage::Initialize)?;
    session.reset();
    let prompted = session
        .add_point_prompt(PROMPT_FRAME, config.object_id, &points, &labels)
        .stage_at(Stage::Prompt, PROMPT_FRAME)?;

    if let Some(mask) = prompted.mask(config.object_id) {
        tracing::info!(
            "Object {} covers {} px on frame {}, bounds {:?}",
            config.object_id,
            mask.area(),
            PROMPT_FRAME,
            mask.bounds()
        );
        if config.preview {
            preview::save_overlay(&config.preview_path(), &first_frame, &mask)
                .stage_at(Stage::Prompt, PROMPT_FRAME)?;
        }
    }

    // Propagation and rendering
    let output = config.output_path();
    let info = VideoInfo {
        width,
        height,
        frame_count: sequence.len(),
        ..source.info()
    };
    let mut sink = open_sink(&output, &info).stage(Stage::Write)?;
    if sink.resolution() != (width, height) {
        return Err(Error::FrameSize {
            expected: (width, height),
            actual: sink.resolution(),
        })
        .stage(Stage::Write);
    }

    let total = session.frame_count();

    let mut frames_written = 0;
    for masks in session.propagate().stage(Stage::Propagate)? {
        let masks = masks.stage_at(Stage::Propagate, frames_written)?;
        let frame_index = masks.frame_index;

        let logits = masks
            .object_logits(config.object_id)
            .ok_or_else(|| {
                Error::Inference(format!("no mask for object {}", config.object_id))
            })
            .stage_at(Stage::Propagate, frame_index)?;
        let silhouette = composite_logits((width, height), logits.into_dyn())
            .stage_at(Stage::Composite, frame_index)?;
        sink.write_frame(&silhouette)
            .stage_at(Stage::Write, frame_index)?;
        frames_written += 1;

        if frames_written % 30 == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            tracing::info!(
                "Frame {}/{}: {:.1} frames/s",
                frames_written,
                total,
                frames_written as f64 / elapsed.max(1e-3)
            );
        }
    }
    sink.finish().stage(Stage::Write)?;

    tracing::info!(
        "Done in {:.1}s: {} frames extracted, {} written to {}",
        started.elapsed().as_secs_f64(),
        frames_extracted,
        frames_written,
        output.display()
    );

    Ok(RunSummary {
        frames_extracted,
        frames_written,
        output,
    })
}
