use super::FrameSink;
use crate::error::{Error, Result};
use crate::source::VideoInfo;
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Floor for small frames, where `width * height * 4` smears hard edges
const MIN_BIT_RATE: usize = 1_000_000;

/// MPEG-4 Part 2 video file written through FFmpeg
///
/// The container trailer is written by [`FrameSink::finish`], or on drop if
/// the writer goes out of scope early, so the file is always closed.
pub struct FfmpegWriter {
    path: PathBuf,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    frames_written: i64,
    finished: bool,
}

impl FfmpegWriter {
    pub fn create<P: AsRef<Path>>(path: P, info: &VideoInfo) -> Result<Self> {
        let path = path.as_ref();
        let (width, height) = (info.width, info.height);
        tracing::info!(
            "Opening video writer at {} ({}x{} @ {:.2} fps)",
            path.display(),
            width,
            height,
            info.fps()
        );

        crate::source::init_ffmpeg()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let mut output =
            ffmpeg::format::output(&path).map_err(|e| Error::video("open output", e))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| Error::video("find encoder", ffmpeg::Error::EncoderNotFound))?;

        let (num, den) = info.frame_rate;
        let frame_rate = ffmpeg::Rational::new(num as i32, den as i32);
        let encoder_time_base = frame_rate.invert();

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| Error::video("encoder setup", e))?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(ffmpeg::format::Pixel::YUV420P);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(frame_rate));
        encoder.set_bit_rate((width as usize * height as usize * 4).max(MIN_BIT_RATE));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .map_err(|e| Error::video("encoder open", e))?;

        let stream_index = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|e| Error::video("add stream", e))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            stream.index()
        };

        output
            .write_header()
            .map_err(|e| Error::video("write header", e))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .unwrap_or(encoder_time_base);

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::format::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| Error::video("scaler setup", e))?;

        Ok(Self {
            path: path.to_path_buf(),
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width,
            height,
            frames_written: 0,
            finished: false,
        })
    }

    /// Copy an RGB image into an FFmpeg frame, honouring the line stride
    fn to_video_frame(&self, frame: &RgbImage) -> ffmpeg::frame::Video {
        let mut rgb =
            ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, self.width, self.height);
        let stride = rgb.stride(0);
        let row_bytes = self.width as usize * 3;
        let data = rgb.data_mut(0);

        for (row, pixels) in frame.as_raw().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            data[start..start + row_bytes].copy_from_slice(pixels);
        }
        rgb
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| Error::video("write packet", e))?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if self.finished {
            return Err(Error::SinkClosed);
        }
        if frame.dimensions() != (self.width, self.height) {
            return Err(Error::FrameSize {
                expected: (self.width, self.height),
                actual: frame.dimensions(),
            });
        }

        let rgb = self.to_video_frame(frame);
        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .map_err(|e| Error::video("pixel conversion", e))?;
        yuv.set_pts(Some(self.frames_written));

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| Error::video("encode", e))?;
        self.frames_written += 1;
        self.drain_packets()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.encoder
            .send_eof()
            .map_err(|e| Error::video("encode", e))?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .map_err(|e| Error::video("write trailer", e))?;

        tracing::info!(
            "Wrote {} frames to {}",
            self.frames_written,
            self.path.display()
        );
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Closing unfinished video {}", self.path.display());
            if let Err(e) = self.finish() {
                tracing::error!("Failed to finalize {}: {:?}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::fake::{
        square_frames, square_x, FRAME_HEIGHT, FRAME_WIDTH, SQUARE, SQUARE_Y,
    };
    use crate::source::{FfmpegReader, FrameSource};

    const FRAMES: usize = 10;
    const STEP: u32 = 5;
    const TOLERANCE: i64 = 3;

    fn info() -> VideoInfo {
        VideoInfo {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            frame_rate: (10, 1),
            frame_count: FRAMES,
        }
    }

    fn read_all(path: &Path) -> (VideoInfo, Vec<RgbImage>) {
        let mut reader = FfmpegReader::open(path).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
        (reader.info(), frames)
    }

    /// Inclusive bounds of pixels brighter than mid-grey
    fn bright_bounds(frame: &RgbImage) -> Option<(i64, i64, i64, i64)> {
        let mut bounds: Option<(i64, i64, i64, i64)> = None;
        for (x, y, pixel) in frame.enumerate_pixels() {
            let luma = pixel.0.iter().map(|&c| c as u32).sum::<u32>() / 3;
            if luma <= 127 {
                continue;
            }
            let (x, y) = (x as i64, y as i64);
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds
    }

    #[test]
    fn moving_square_survives_encode_and_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("square.mp4");

        let mut writer = FfmpegWriter::create(&path, &info()).unwrap();
        assert_eq!(writer.resolution(), (FRAME_WIDTH, FRAME_HEIGHT));
        for frame in square_frames(FRAMES, STEP) {
            writer.write_frame(&frame).unwrap();
        }
        writer.finish().unwrap();
        drop(writer);

        let (decoded_info, frames) = read_all(&path);
        assert_eq!((decoded_info.width, decoded_info.height), (FRAME_WIDTH, FRAME_HEIGHT));
        assert!((decoded_info.fps() - 10.0).abs() < 0.5);
        assert_eq!(frames.len(), FRAMES);

        for (index, frame) in frames.iter().enumerate() {
            assert_eq!(frame.dimensions(), (FRAME_WIDTH, FRAME_HEIGHT));
            let (x0, y0, x1, y1) = bright_bounds(frame).expect("square lost");
            let left = square_x(index, STEP) as i64;
            let top = SQUARE_Y as i64;
            let side = SQUARE as i64;
            assert!((x0 - left).abs() <= TOLERANCE, "frame {index}: left {x0} vs {left}");
            assert!((x1 - (left + side - 1)).abs() <= TOLERANCE, "frame {index}: right {x1}");
            assert!((y0 - top).abs() <= TOLERANCE, "frame {index}: top {y0}");
            assert!((y1 - (top + side - 1)).abs() <= TOLERANCE, "frame {index}: bottom {y1}");
        }
    }

    #[test]
    fn dropping_unfinished_writer_closes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.mp4");

        {
            let mut writer = FfmpegWriter::create(&path, &info()).unwrap();
            for frame in square_frames(4, STEP) {
                writer.write_frame(&frame).unwrap();
            }
        }

        let (_, frames) = read_all(&path);
        assert_eq!(frames.len(), 4);
    }

    #[test]
    fn rejects_wrong_size_and_writes_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FfmpegWriter::create(dir.path().join("out.mp4"), &info()).unwrap();

        let wrong = RgbImage::new(FRAME_WIDTH / 2, FRAME_HEIGHT);
        assert!(matches!(
            writer.write_frame(&wrong),
            Err(Error::FrameSize { .. })
        ));

        writer.finish().unwrap();
        let frame = RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT);
        assert!(matches!(writer.write_frame(&frame), Err(Error::SinkClosed)));
    }
}
