use crate::config::validate_scale_factor;
use crate::error::{Error, Result};
use crate::source::{scaled_dimensions, FrameSource};
use image::{imageops, RgbImage};
use std::path::{Path, PathBuf};

pub const FRAME_EXTENSION: &str = "jpeg";

/// `00042.jpeg`
pub fn frame_file_name(index: usize) -> String {
    format!("{index:05}.{FRAME_EXTENSION}")
}

/// Decode every frame from `source`, downscale by `scale_factor` and write
/// them as a numbered image sequence into `output_dir`
///
/// Frame files already in `output_dir` are removed first so the directory
/// holds exactly this sequence. Returns the number of frames written.
pub fn extract<S: FrameSource>(
    source: &mut S,
    output_dir: &Path,
    scale_factor: f64,
) -> Result<usize> {
    validate_scale_factor(scale_factor)?;

    std::fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;
    let removed = clear_frames(output_dir)?;
    if removed > 0 {
        tracing::debug!("Removed {} stale frame(s) from {}", removed, output_dir.display());
    }

    let info = source.info();
    let (width, height) = scaled_dimensions(info.width, info.height, scale_factor);
    tracing::info!(
        "Extracting frames to {} at {}x{} (scale {})",
        output_dir.display(),
        width,
        height,
        scale_factor
    );

    let mut count = 0;
    while let Some(frame) = source.next_frame()? {
        let frame = if frame.dimensions() != (width, height) {
            let (w, h) = scaled_dimensions(frame.width(), frame.height(), scale_factor);
            imageops::resize(&frame, w, h, imageops::FilterType::Triangle)
        } else {
            frame
        };

        let path = output_dir.join(frame_file_name(count));
        frame.save(&path).map_err(|e| Error::image(&path, e))?;
        count += 1;

        if count % 100 == 0 {
            tracing::debug!("Extracted {} frames", count);
        }
    }

    tracing::info!("Extracted {} frames", count);
    Ok(count)
}

fn clear_frames(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for path in frame_files(dir)? {
        std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        removed += 1;
    }
    Ok(removed)
}

fn frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        let is_frame = path.is_file()
            && path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION))
                .unwrap_or(false);
        if is_frame {
            files.push(path);
        }
    }
    // Numeric order: `100000.jpeg` comes after `99999.jpeg`
    files.sort_by_cached_key(|path| (frame_index(path).unwrap_or(usize::MAX), path.clone()));
    Ok(files)
}

fn frame_index(path: &Path) -> Option<usize> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// Extracted frames on disk, indexed from 0
#[derive(Debug, Clone)]
pub struct FrameSequence {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl FrameSequence {
    /// Open a directory written by [`extract`]; indices must be contiguous from 0
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let paths = frame_files(&dir)?;

        if paths.is_empty() {
            return Err(Error::FrameSequence {
                path: dir,
                reason: "no frames".to_string(),
            });
        }

        for (index, path) in paths.iter().enumerate() {
            let expected = frame_file_name(index);
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            if name.as_deref() != Some(expected.as_str()) {
                return Err(Error::FrameSequence {
                    path: dir,
                    reason: format!("expected {expected}, found {}", path.display()),
                });
            }
        }

        Ok(Self { dir, paths })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn path(&self, index: usize) -> Result<&Path> {
        self.paths
            .get(index)
            .map(PathBuf::as_path)
            .ok_or(Error::InvalidFrameIndex {
                index,
                frame_count: self.paths.len(),
            })
    }

    pub fn load(&self, index: usize) -> Result<RgbImage> {
        let path = self.path(index)?;
        let image = image::open(path).map_err(|e| Error::image(path, e))?;
        Ok(image.to_rgb8())
    }

    /// Dimensions of frame 0
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        let path = self.path(0)?;
        image::image_dimensions(path).map_err(|e| Error::image(path, e))
    }
}
