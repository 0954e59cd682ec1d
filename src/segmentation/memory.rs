use crate::error::{Error, Result};
use ndarray::{concatenate, s, Array2, Array3, Array4, ArrayView2, Axis};
use std::collections::{BTreeMap, VecDeque};

/// Memory slots: one conditioning slot plus the most recent frames
pub const NUM_MASKMEM: usize = 7;
/// Upper bound on object pointers fed to memory attention
pub const MAX_OBJ_PTRS: usize = 16;
/// Tokens each 256-d object pointer is split into for 64-d memory attention
const PTR_TOKENS: usize = 4;

/// Encoded memory of one frame for one object
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// `[1, C, H, W]`
    pub features: Array4<f32>,
    /// `[H*W, 1, C]`
    pub pos_enc: Array3<f32>,
    /// `[1, 256]`
    pub obj_ptr: Array2<f32>,
}

/// Tensors handed to memory attention
pub struct MemoryInputs {
    /// `[P, 256]`
    pub obj_ptrs: Array2<f32>,
    /// `[N, C, H, W]`
    pub features: Array4<f32>,
    /// `[N*H*W + P*4, 1, C]`
    pub pos_embed: Array3<f32>,
}

/// Per-object memory: prompted frames are kept for good, other frames roll
#[derive(Debug, Default)]
pub struct MemoryBank {
    conditioning: BTreeMap<usize, MemoryEntry>,
    recent: VecDeque<(usize, MemoryEntry)>,
}

impl MemoryBank {
    pub fn is_empty(&self) -> bool {
        self.conditioning.is_empty() && self.recent.is_empty()
    }

    pub fn insert_conditioning(&mut self, frame_index: usize, entry: MemoryEntry) {
        self.recent.retain(|(index, _)| *index != frame_index);
        self.conditioning.insert(frame_index, entry);
    }

    /// Remember a tracked frame, evicting the oldest beyond `NUM_MASKMEM - 1`
    pub fn push_recent(&mut self, frame_index: usize, entry: MemoryEntry) {
        if self.conditioning.contains_key(&frame_index) {
            return;
        }
        self.recent.push_back((frame_index, entry));
        while self.recent.len() > NUM_MASKMEM - 1 {
            self.recent.pop_front();
        }
    }

    pub fn conditioning_frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.conditioning.keys().copied()
    }

    pub fn recent_frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.recent.iter().map(|(index, _)| *index)
    }

    /// Conditioning frame closest to `frame_index`
    fn nearest_conditioning(&self, frame_index: usize) -> Option<&MemoryEntry> {
        self.conditioning
            .iter()
            .min_by_key(|(index, _)| index.abs_diff(frame_index))
            .map(|(_, entry)| entry)
    }

    /// Stack memories for predicting `frame_index`
    ///
    /// `temporal_code` is the encoder's `[NUM_MASKMEM, 1, 1, C]` table; slot
    /// `NUM_MASKMEM - t - 1` is added to a memory `t` frames back, with
    /// conditioning memories at `t = 0`.
    pub fn assemble(
        &self,
        frame_index: usize,
        temporal_code: &Array4<f32>,
    ) -> Result<MemoryInputs> {
        let mut slots: Vec<(usize, &MemoryEntry)> = Vec::new();
        if let Some(entry) = self.nearest_conditioning(frame_index) {
            slots.push((0, entry));
        }
        for (offset, (_, entry)) in self.recent.iter().rev().enumerate() {
            slots.push((offset + 1, entry));
        }
        if slots.is_empty() {
            return Err(Error::Inference("memory bank is empty".to_string()));
        }

        let features = concatenate(
            Axis(0),
            &slots.iter().map(|(_, e)| e.features.view()).collect::<Vec<_>>(),
        )?;

        let mut pos_parts = Vec::with_capacity(slots.len());
        for (t, entry) in &slots {
            let code_index = NUM_MASKMEM.saturating_sub(t + 1);
            let code = temporal_code.slice(s![code_index, .., .., ..]);
            pos_parts.push(&entry.pos_enc + &code);
        }

        let mut ptr_views: Vec<ArrayView2<f32>> = self
            .conditioning
            .values()
            .map(|e| e.obj_ptr.view())
            .collect();
        ptr_views.extend(self.recent.iter().rev().map(|(_, e)| e.obj_ptr.view()));
        ptr_views.truncate(MAX_OBJ_PTRS);
        let obj_ptrs = concatenate(Axis(0), &ptr_views)?;

        let channels = pos_parts[0].len_of(Axis(2));
        pos_parts.push(Array3::zeros((obj_ptrs.nrows() * PTR_TOKENS, 1, channels)));
        let pos_embed = concatenate(
            Axis(0),
            &pos_parts.iter().map(|p| p.view()).collect::<Vec<_>>(),
        )?;

        Ok(MemoryInputs {
            obj_ptrs,
            features,
            pos_embed,
        })
    }
}
