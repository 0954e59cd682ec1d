use super::types::{FrameMasks, ObjectId, VideoSegmentationModel};
use crate::error::{Error, Result};
use crate::frames::FrameSequence;
use crate::prompt::{Label, PointPrompt};
use std::collections::BTreeSet;

/// One video's segmentation session: the model plus its inference state
pub struct SegmentationSession<M> {
    model: M,
    frame_count: usize,
    prompted: BTreeSet<ObjectId>,
    consumed: bool,
}

impl<M: VideoSegmentationModel> SegmentationSession<M> {
    /// Bind `model` to an extracted frame sequence
    pub fn init(mut model: M, frames: &FrameSequence) -> Result<Self> {
        if frames.len() == 0 {
            return Err(Error::ModelInit(format!(
                "no frames in {}",
                frames.dir().display()
            )));
        }

        model.init_state(frames).map_err(|e| match e {
            Error::ModelInit(_) => e,
            other => Error::ModelInit(other.to_string()),
        })?;

        tracing::info!(
            "Segmentation session ready for {} frames from {}",
            frames.len(),
            frames.dir().display()
        );

        Ok(Self {
            model,
            frame_count: frames.len(),
            prompted: BTreeSet::new(),
            consumed: false,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Clear prompts and propagation history; idempotent
    pub fn reset(&mut self) {
        tracing::debug!("Resetting segmentation session");
        self.model.reset_state();
        self.prompted.clear();
        self.consumed = false;
    }

    /// Register prompt points for `object_id` on `frame_index`
    ///
    /// `points` are `[x, y]` in frame pixels, `labels` the matching point
    /// labels (1 foreground, 0 background, 2/3 box corners).
    pub fn add_point_prompt(
        &mut self,
        frame_index: usize,
        object_id: ObjectId,
        points: &[[f32; 2]],
        labels: &[u8],
    ) -> Result<FrameMasks> {
        if self.consumed {
            return Err(Error::PropagationConsumed);
        }
        if frame_index >= self.frame_count {
            return Err(Error::InvalidFrameIndex {
                index: frame_index,
                frame_count: self.frame_count,
            });
        }
        if object_id == 0 {
            return Err(Error::InvalidPrompt("object id must be at least 1".to_string()));
        }
        if points.len() != labels.len() {
            return Err(Error::InvalidPrompt(format!(
                "{} point(s) but {} label(s)",
                points.len(),
                labels.len()
            )));
        }
        if points.is_empty() {
            return Err(Error::EmptyPromptSet);
        }

        let prompts = points
            .iter()
            .zip(labels)
            .map(|(&[x, y], &label)| {
                Ok(PointPrompt {
                    x,
                    y,
                    label: Label::try_from(label)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            "Prompting object {} on frame {} with {} point(s)",
            object_id,
            frame_index,
            prompts.len()
        );

        let masks = self.model.add_points(frame_index, object_id, &prompts)?;
        self.prompted.insert(object_id);
        Ok(masks)
    }

    /// Lazily predict every frame in order, carrying all prompted objects
    ///
    /// The sequence runs once; propagating again requires [`reset`](Self::reset).
    pub fn propagate(&mut self) -> Result<Propagation<'_, M>> {
        if self.consumed {
            return Err(Error::PropagationConsumed);
        }
        if self.prompted.is_empty() {
            return Err(Error::EmptyPromptSet);
        }
        self.consumed = true;

        tracing::info!(
            "Propagating {} object(s) across {} frames",
            self.prompted.len(),
            self.frame_count
        );

        Ok(Propagation {
            session: self,
            next: 0,
            failed: false,
        })
    }
}

/// Frame-by-frame propagation; yields indices `0..frame_count` exactly once
pub struct Propagation<'a, M> {
    session: &'a mut SegmentationSession<M>,
    next: usize,
    failed: bool,
}

impl<M: VideoSegmentationModel> Iterator for Propagation<'_, M> {
    type Item = Result<FrameMasks>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.session.frame_count {
            return None;
        }

        let frame_index = self.next;
        let _span = tracing::debug_span!("propagate", frame = frame_index).entered();

        let result = self
            .session
            .model
            .track_frame(frame_index)
            .and_then(|masks| {
                if masks.frame_index == frame_index {
                    Ok(masks)
                } else {
                    Err(Error::Inference(format!(
                        "model returned frame {} while propagating frame {}",
                        masks.frame_index, frame_index
                    )))
                }
            });

        self.next += 1;
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let remaining = self.session.frame_count.saturating_sub(self.next);
        (0, Some(remaining))
    }
}
