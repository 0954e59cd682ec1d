mod ffmpeg_reader;

pub use ffmpeg_reader::FfmpegReader;
pub(crate) use ffmpeg_reader::init_ffmpeg;

use crate::error::Result;
use image::RgbImage;

/// Stream properties of a decoded video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Frame rate as numerator/denominator
    pub frame_rate: (u32, u32),
    /// Declared frame count, 0 when the container does not say
    pub frame_count: usize,
}

impl VideoInfo {
    pub fn fps(&self) -> f64 {
        let (num, den) = self.frame_rate;
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    }
}

/// Slack absorbing binary representation error, e.g. `90.0 * 0.7 = 62.99999999999999`
const FLOOR_EPSILON: f64 = 1e-6;

/// `floor(dimension * scale_factor)`, never below one pixel
pub fn scaled_dimensions(width: u32, height: u32, scale_factor: f64) -> (u32, u32) {
    let scale = |dimension: u32| {
        let product = dimension as f64 * scale_factor;
        ((product + FLOOR_EPSILON).floor() as u32).max(1)
    };
    (scale(width), scale(height))
}

/// Trait for decoded video sources
pub trait FrameSource {
    /// Next frame in presentation order, `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    fn info(&self) -> VideoInfo;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_dimensions_floor() {
        assert_eq!(scaled_dimensions(1920, 1080, 0.5), (960, 540));
        assert_eq!(scaled_dimensions(101, 33, 0.5), (50, 16));
        assert_eq!(scaled_dimensions(640, 480, 1.0), (640, 480));
        assert_eq!(scaled_dimensions(3, 3, 0.1), (1, 1));
    }

    #[test]
    fn decimal_scales_floor_exactly() {
        assert_eq!(scaled_dimensions(1920, 1080, 0.7), (1344, 756));
        assert_eq!(scaled_dimensions(10, 10, 0.7), (7, 7));
        assert_eq!(scaled_dimensions(90, 180, 0.7), (63, 126));
        assert_eq!(scaled_dimensions(180, 330, 0.35), (63, 115));
        assert_eq!(scaled_dimensions(101, 75, 0.3), (30, 22));
    }

    #[test]
    fn fractional_frame_rate() {
        let info = VideoInfo {
            width: 1280,
            height: 720,
            frame_rate: (30000, 1001),
            frame_count: 240,
        };
        assert!((info.fps() - 29.97).abs() < 0.01);
        assert_eq!(VideoInfo { frame_rate: (0, 0), ..info }.fps(), 0.0);
    }
}
