use super::memory::{MemoryBank, MemoryEntry, MemoryInputs};
use super::preprocess::Preprocessor;
use super::types::{canonical_logits, FrameMasks, ObjectId, VideoSegmentationModel};
use crate::config::{Device, ModelConfig};
use crate::error::{Error, Result};
use crate::frames::FrameSequence;
use crate::prompt::{Label, PointPrompt};
use ndarray::{stack, Array2, Array3, Array4, ArrayD, Axis, Ix2, Ix3, Ix4};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionOutputs};
use ort::value::TensorRef;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::rc::Rc;

const INPUT_SIZE: u32 = 1024;
/// Logit filled in for objects with nothing to predict on a frame
const NO_OBJECT_LOGIT: f32 = -32.0;
/// Label of the padding point used when decoding without prompts
const PADDING_LABEL: f32 = -1.0;

/// Encoder outputs for one frame
struct FrameFeatures {
    /// `[1, 256, 64, 64]`
    image_embed: Array4<f32>,
    /// `[1, 32, 256, 256]`
    high_res_feats_0: Array4<f32>,
    /// `[1, 64, 128, 128]`
    high_res_feats_1: Array4<f32>,
    /// `[4096, 1, 256]`
    vision_pos_embed: Array3<f32>,
}

struct Decoded {
    /// Frame-resolution logits
    logits: Array2<f32>,
    /// `[1, 1, 1024, 1024]`
    mask_for_mem: Array4<f32>,
    /// `[1, 256]`
    obj_ptr: Array2<f32>,
}

#[derive(Default)]
struct ObjectTrack {
    memory: MemoryBank,
    /// Logits predicted from prompts, reused when propagation reaches the frame
    prompted: BTreeMap<usize, Array2<f32>>,
}

/// SAM 2 video predictor over four exported ONNX graphs
///
/// `image_encoder` embeds frames, `mask_decoder` turns points plus
/// (memory-conditioned) embeddings into masks, `memory_encoder` stores each
/// predicted mask as memory, and `memory_attention` conditions the current
/// frame on an object's memory bank.
pub struct Sam2Onnx {
    image_encoder: Session,
    memory_attention: Session,
    mask_decoder: Session,
    memory_encoder: Session,
    preprocessor: Preprocessor,
    frames: Option<FrameSequence>,
    frame_size: (u32, u32),
    cached: Option<(usize, Rc<FrameFeatures>)>,
    temporal_code: Option<Array4<f32>>,
    objects: BTreeMap<ObjectId, ObjectTrack>,
}

impl Sam2Onnx {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        tracing::info!(
            "Loading {} graphs from {} (device {:?}, precision {:?})",
            config.checkpoint.dir_name(),
            config.checkpoint_dir.display(),
            config.device,
            config.precision
        );

        let load = |graph: &str| load_session(&config.graph_path(graph), config.device);

        let model = Self {
            image_encoder: load("image_encoder")?,
            memory_attention: load("memory_attention")?,
            mask_decoder: load("mask_decoder")?,
            memory_encoder: load("memory_encoder")?,
            preprocessor: Preprocessor::new(INPUT_SIZE),
            frames: None,
            frame_size: (0, 0),
            cached: None,
            temporal_code: None,
            objects: BTreeMap::new(),
        };

        tracing::info!("SAM 2 model loaded successfully");
        Ok(model)
    }

    fn frames(&self) -> Result<&FrameSequence> {
        self.frames
            .as_ref()
            .ok_or_else(|| Error::Inference("inference state not initialized".to_string()))
    }

    /// Encoder features of `frame_index`, memoized for the latest frame
    fn features(&mut self, frame_index: usize) -> Result<Rc<FrameFeatures>> {
        if let Some((index, features)) = &self.cached {
            if *index == frame_index {
                return Ok(Rc::clone(features));
            }
        }

        let features = Rc::new(self.encode_frame(frame_index)?);
        self.cached = Some((frame_index, Rc::clone(&features)));
        Ok(features)
    }

    fn encode_frame(&mut self, frame_index: usize) -> Result<FrameFeatures> {
        let _span = tracing::debug_span!("image_encoder", frame = frame_index).entered();

        let frame = self.frames()?.load(frame_index)?;
        let input = self.preprocessor.preprocess(&frame);

        let outputs = self
            .image_encoder
            .run(ort::inputs![
                "image" => TensorRef::from_array_view(input.view()).map_err(Error::inference)?,
            ])
            .map_err(Error::inference)?;

        Ok(FrameFeatures {
            image_embed: output(&outputs, "image_embed")?.into_dimensionality::<Ix4>()?,
            high_res_feats_0: output(&outputs, "high_res_feats_0")?.into_dimensionality::<Ix4>()?,
            high_res_feats_1: output(&outputs, "high_res_feats_1")?.into_dimensionality::<Ix4>()?,
            vision_pos_embed: output(&outputs, "vision_pos_embed")?.into_dimensionality::<Ix3>()?,
        })
    }

    /// Condition the frame embedding on an object's memory
    fn attend(&mut self, features: &FrameFeatures, memory: &MemoryInputs) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("memory_attention").entered();

        let outputs = self
            .memory_attention
            .run(ort::inputs![
                "current_vision_feat" => tensor(&features.image_embed)?,
                "current_vision_pos_embed" => tensor(&features.vision_pos_embed)?,
                "memory_0" => tensor(&memory.obj_ptrs)?,
                "memory_1" => tensor(&memory.features)?,
                "memory_pos_embed" => tensor(&memory.pos_embed)?,
            ])
            .map_err(Error::inference)?;

        Ok(output(&outputs, "image_embed")?.into_dimensionality::<Ix4>()?)
    }

    fn decode(
        &mut self,
        features: &FrameFeatures,
        image_embed: &Array4<f32>,
        points: &[PointPrompt],
    ) -> Result<Decoded> {
        let _span = tracing::debug_span!("mask_decoder", points = points.len()).entered();

        let (coords, labels) = self.point_tensors(points);
        let outputs = self
            .mask_decoder
            .run(ort::inputs![
                "point_coords" => tensor(&coords)?,
                "point_labels" => tensor(&labels)?,
                "image_embed" => tensor(image_embed)?,
                "high_res_feats_0" => tensor(&features.high_res_feats_0)?,
                "high_res_feats_1" => tensor(&features.high_res_feats_1)?,
            ])
            .map_err(Error::inference)?;

        let obj_ptr = output(&outputs, "obj_ptr")?.into_dimensionality::<Ix2>()?;
        let mask_for_mem = output(&outputs, "mask_for_mem")?.into_dimensionality::<Ix4>()?;
        let low_res = canonical_logits(output(&outputs, "pred_mask")?)?;

        let (width, height) = self.frame_size;
        let logits = Preprocessor::resize_logits(low_res.index_axis(Axis(0), 0), width, height)?;

        Ok(Decoded {
            logits,
            mask_for_mem,
            obj_ptr,
        })
    }

    /// `[1, N, 2]` coordinates in encoder space and `[1, N]` labels
    fn point_tensors(&self, points: &[PointPrompt]) -> (Array3<f32>, Array2<f32>) {
        if points.is_empty() {
            return (
                Array3::zeros((1, 1, 2)),
                Array2::from_elem((1, 1), PADDING_LABEL),
            );
        }

        let mut coords = Array3::zeros((1, points.len(), 2));
        let mut labels = Array2::zeros((1, points.len()));
        for (i, point) in points.iter().enumerate() {
            let [x, y] = self
                .preprocessor
                .to_input_coords([point.x, point.y], self.frame_size);
            coords[[0, i, 0]] = x;
            coords[[0, i, 1]] = y;
            labels[[0, i]] = label_value(point.label);
        }
        (coords, labels)
    }

    fn encode_memory(
        &mut self,
        features: &FrameFeatures,
        decoded: &Decoded,
    ) -> Result<MemoryEntry> {
        let _span = tracing::debug_span!("memory_encoder").entered();

        let outputs = self
            .memory_encoder
            .run(ort::inputs![
                "mask_for_mem" => tensor(&decoded.mask_for_mem)?,
                "pix_feat" => tensor(&features.image_embed)?,
            ])
            .map_err(Error::inference)?;

        let entry = MemoryEntry {
            features: output(&outputs, "maskmem_features")?.into_dimensionality::<Ix4>()?,
            pos_enc: output(&outputs, "maskmem_pos_enc")?.into_dimensionality::<Ix3>()?,
            obj_ptr: decoded.obj_ptr.clone(),
        };

        if self.temporal_code.is_none() {
            let temporal_code = output(&outputs, "temporal_code")?.into_dimensionality::<Ix4>()?;
            self.temporal_code = Some(temporal_code);
        }

        Ok(entry)
    }

    fn track_object(&mut self, frame_index: usize, object_id: ObjectId) -> Result<Array2<f32>> {
        let track = self.objects.get(&object_id).ok_or_else(|| {
            Error::Inference(format!("object {object_id} has no prompts"))
        })?;

        if let Some(logits) = track.prompted.get(&frame_index) {
            return Ok(logits.clone());
        }
        if track.memory.is_empty() {
            return Ok(self.empty_plane());
        }

        let temporal_code = self
            .temporal_code
            .as_ref()
            .ok_or_else(|| Error::Inference("memory encoder has not run".to_string()))?;
        let memory = track.memory.assemble(frame_index, temporal_code)?;
        tracing::debug!(
            "Object {} frame {}: conditioning on {:?}, recent {:?}",
            object_id,
            frame_index,
            track.memory.conditioning_frames().collect::<Vec<_>>(),
            track.memory.recent_frames().collect::<Vec<_>>()
        );

        let features = self.features(frame_index)?;
        let conditioned = self.attend(&features, &memory)?;
        let decoded = self.decode(&features, &conditioned, &[])?;
        let entry = self.encode_memory(&features, &decoded)?;

        if let Some(track) = self.objects.get_mut(&object_id) {
            track.memory.push_recent(frame_index, entry);
        }
        Ok(decoded.logits)
    }

    fn empty_plane(&self) -> Array2<f32> {
        let (width, height) = self.frame_size;
        Array2::from_elem((height as usize, width as usize), NO_OBJECT_LOGIT)
    }

    fn frame_masks(&self, frame_index: usize, planes: Vec<Array2<f32>>) -> Result<FrameMasks> {
        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        let views: Vec<_> = planes.iter().map(|plane| plane.view()).collect();
        FrameMasks::new(frame_index, ids, stack(Axis(0), &views)?)
    }
}

impl VideoSegmentationModel for Sam2Onnx {
    fn init_state(&mut self, frames: &FrameSequence) -> Result<()> {
        self.frame_size = frames.dimensions()?;
        self.frames = Some(frames.clone());
        self.cached = None;
        self.objects.clear();
        tracing::debug!(
            "Inference state bound to {} ({}x{})",
            frames.dir().display(),
            self.frame_size.0,
            self.frame_size.1
        );
        Ok(())
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting SAM 2 inference state");
        self.objects.clear();
    }

    fn add_points(
        &mut self,
        frame_index: usize,
        object_id: ObjectId,
        points: &[PointPrompt],
    ) -> Result<FrameMasks> {
        let frame_count = self.frames()?.len();
        if frame_index >= frame_count {
            return Err(Error::InvalidFrameIndex {
                index: frame_index,
                frame_count,
            });
        }

        let features = self.features(frame_index)?;
        let decoded = self.decode(&features, &features.image_embed, points)?;
        let entry = self.encode_memory(&features, &decoded)?;

        let track = self.objects.entry(object_id).or_default();
        track.memory.insert_conditioning(frame_index, entry);
        track.prompted.insert(frame_index, decoded.logits);

        let planes = self
            .objects
            .values()
            .map(|track| {
                track
                    .prompted
                    .get(&frame_index)
                    .cloned()
                    .unwrap_or_else(|| self.empty_plane())
            })
            .collect();
        self.frame_masks(frame_index, planes)
    }

    fn track_frame(&mut self, frame_index: usize) -> Result<FrameMasks> {
        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        let mut planes = Vec::with_capacity(ids.len());
        for object_id in ids {
            planes.push(self.track_object(frame_index, object_id)?);
        }
        self.frame_masks(frame_index, planes)
    }
}

fn load_session(path: &Path, device: Device) -> Result<Session> {
    if !path.is_file() {
        return Err(Error::ModelInit(format!("missing graph {}", path.display())));
    }
    tracing::debug!("Loading graph {}", path.display());

    let session = Session::builder()
        .map_err(init_error)?
        .with_execution_providers(execution_providers(device))
        .map_err(init_error)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(init_error)?
        .with_intra_threads(4)
        .map_err(init_error)?
        .commit_from_file(path)
        .map_err(|e| Error::ModelInit(format!("{}: {}", path.display(), e)))?;

    Ok(session)
}

/// Accelerator policy, decided once per session
fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Auto => vec![
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ],
        Device::Cpu => vec![CPUExecutionProvider::default().build()],
        Device::Cuda => vec![CUDAExecutionProvider::default().build().error_on_failure()],
        Device::TensorRt => vec![
            TensorRTExecutionProvider::default().build().error_on_failure(),
            CUDAExecutionProvider::default().build(),
        ],
    }
}

fn label_value(label: Label) -> f32 {
    label as u8 as f32
}

fn tensor<D: ndarray::Dimension>(array: &ndarray::Array<f32, D>) -> Result<TensorRef<'_, f32>> {
    TensorRef::from_array_view(array.view()).map_err(Error::inference)
}

fn output(outputs: &SessionOutputs, name: &str) -> Result<ArrayD<f32>> {
    let value = outputs
        .get(name)
        .ok_or_else(|| Error::Inference(format!("graph has no output `{name}`")))?;
    let array = value.try_extract_array::<f32>().map_err(Error::inference)?;
    Ok(array.to_owned())
}

fn init_error(err: impl Display) -> Error {
    Error::ModelInit(err.to_string())
}
