use crate::error::{Error, Result};
use image::{imageops, ImageBuffer, Luma, RgbImage};
use ndarray::{Array2, Array4, ArrayView2};

const PIXEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const PIXEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessor for converting RGB frames to encoder input tensors
pub struct Preprocessor {
    input_size: u32,
}

impl Preprocessor {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    /// Preprocess an RGB frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to a square `input_size` (aspect ratio is not kept)
    /// 2. Scale to [0, 1] and normalize with the ImageNet mean/std
    /// 3. Transpose from HWC to NCHW
    ///
    /// Returns: Array4<f32> with shape [1, 3, input_size, input_size]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let size = self.input_size;
        let resized = if image.dimensions() != (size, size) {
            imageops::resize(image, size, size, imageops::FilterType::Triangle)
        } else {
            image.clone()
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                let value = pixel[channel] as f32 / 255.0;
                tensor[[0, channel, y as usize, x as usize]] =
                    (value - PIXEL_MEAN[channel]) / PIXEL_STD[channel];
            }
        }

        tensor
    }

    /// Map a point from frame pixels into the encoder's input space
    pub fn to_input_coords(&self, point: [f32; 2], frame_size: (u32, u32)) -> [f32; 2] {
        let (width, height) = frame_size;
        let size = self.input_size as f32;
        [point[0] * size / width as f32, point[1] * size / height as f32]
    }

    /// Resize a logit plane to frame resolution
    ///
    /// Bilinear interpolation keeps the sign boundary in place, so
    /// thresholding at 0 after resizing matches thresholding before.
    pub fn resize_logits(logits: ArrayView2<f32>, width: u32, height: u32) -> Result<Array2<f32>> {
        let _span = tracing::debug_span!("postprocess").entered();

        let (rows, cols) = logits.dim();
        if (cols as u32, rows as u32) == (width, height) {
            return Ok(logits.to_owned());
        }

        let plane: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
                Luma([logits[[y as usize, x as usize]]])
            });
        let resized = imageops::resize(&plane, width, height, imageops::FilterType::Triangle);

        Array2::from_shape_vec((height as usize, width as usize), resized.into_raw()).map_err(
            |e| Error::MaskShape {
                expected: format!("{width}x{height} plane ({e})"),
                actual: vec![rows, cols],
            },
        )
    }
}
