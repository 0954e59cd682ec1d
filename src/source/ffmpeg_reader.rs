use super::{FrameSource, VideoInfo};
use crate::error::{Error, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Sequential FFmpeg decoder producing RGB frames
pub struct FfmpegReader {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    info: VideoInfo,
    eof_sent: bool,
}

impl FfmpegReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Opening source video {}", path.display());

        if !path.is_file() {
            return Err(not_found(path, "no such file"));
        }

        init_ffmpeg()?;

        let input = ffmpeg::format::input(&path).map_err(|e| not_found(path, e.to_string()))?;

        let (stream_index, frame_rate, frame_count, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| not_found(path, "no video stream"))?;
            (
                stream.index(),
                stream.avg_frame_rate(),
                stream.frames().max(0) as usize,
                stream.parameters(),
            )
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|context| context.decoder().video())
            .map_err(|e| Error::video("decoder setup", e))?;

        let (width, height) = (decoder.width(), decoder.height());
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| Error::video("scaler setup", e))?;

        let info = VideoInfo {
            width,
            height,
            frame_rate: rational_to_pair(frame_rate),
            frame_count,
        };

        tracing::info!(
            "Source: {}x{} @ {:.2} fps, total frames: {}",
            width,
            height,
            info.fps(),
            frame_count
        );

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            info,
            eof_sent: false,
        })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(|e| Error::video("pixel conversion", e))?;

        let (width, height) = (rgb.width(), rgb.height());
        let stride = rgb.stride(0);
        let row_bytes = width as usize * 3;
        let data = rgb.data(0);

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(&data[start..start + row_bytes]);
        }

        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| Error::video("pixel conversion", ffmpeg::Error::InvalidData))
    }
}

impl FrameSource for FfmpegReader {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }

            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder
                            .send_packet(&packet)
                            .map_err(|e| Error::video("decode", e))?;
                    }
                }
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| Error::video("decode", e))?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn info(&self) -> VideoInfo {
        self.info
    }
}

pub(crate) fn init_ffmpeg() -> Result<()> {
    ffmpeg::init().map_err(|e| Error::video("init", e))?;
    ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    Ok(())
}

fn rational_to_pair(rate: ffmpeg::Rational) -> (u32, u32) {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        (rate.numerator() as u32, rate.denominator() as u32)
    } else {
        tracing::warn!("Source does not declare a frame rate, assuming 30 fps");
        (30, 1)
    }
}

fn not_found(path: &Path, reason: impl Into<String>) -> Error {
    Error::SourceNotFound {
        path: PathBuf::from(path),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_source_not_found() {
        let result = FfmpegReader::open("/definitely/not/here.mp4");
        assert!(matches!(result, Err(Error::SourceNotFound { .. })));
    }

    #[test]
    fn directory_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = FfmpegReader::open(dir.path());
        assert!(matches!(result, Err(Error::SourceNotFound { .. })));
    }

    #[test]
    fn unknown_rate_falls_back() {
        assert_eq!(rational_to_pair(ffmpeg::Rational::new(0, 0)), (30, 1));
        assert_eq!(rational_to_pair(ffmpeg::Rational::new(25, 1)), (25, 1));
    }
}
