mod video_writer;

pub use video_writer::FfmpegWriter;

use crate::error::Result;
use image::RgbImage;

/// Trait for output destinations
pub trait FrameSink {
    /// Append a frame; frames arrive in presentation order
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the destination; further writes are rejected
    fn finish(&mut self) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// What a [`MemorySink`] saw, shared with the test after the sink is gone
    #[derive(Debug, Default)]
    pub struct Recorded {
        pub frames: Vec<RgbImage>,
        pub finished: bool,
        pub dropped: bool,
    }

    pub struct MemorySink {
        resolution: (u32, u32),
        recorded: Rc<RefCell<Recorded>>,
    }

    impl MemorySink {
        pub fn new(resolution: (u32, u32)) -> (Self, Rc<RefCell<Recorded>>) {
            let recorded = Rc::new(RefCell::new(Recorded::default()));
            let sink = Self {
                resolution,
                recorded: Rc::clone(&recorded),
            };
            (sink, recorded)
        }
    }

    impl FrameSink for MemorySink {
        fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
            let mut recorded = self.recorded.borrow_mut();
            if recorded.finished {
                return Err(Error::SinkClosed);
            }
            recorded.frames.push(frame.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.recorded.borrow_mut().finished = true;
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }
    }

    impl Drop for MemorySink {
        fn drop(&mut self) {
            self.recorded.borrow_mut().dropped = true;
        }
    }
}
