use super::{BoundingBox, PromptCollector};
use crate::error::{Error, Result};
use image::RgbImage;
use std::io::{BufRead, Write};
use std::path::Path;

/// Line-oriented box entry over a reader/writer pair (stdin/stdout by default)
pub struct TerminalCollector<R, W> {
    input: R,
    output: W,
}

impl TerminalCollector<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalCollector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, frame_path: &Path, frame: &RgbImage) -> std::io::Result<()> {
        let (width, height) = frame.dimensions();
        writeln!(
            self.output,
            "First frame: {} ({}x{})",
            frame_path.display(),
            width,
            height
        )?;
        writeln!(
            self.output,
            "Enter one box per line as `x y width height`, empty line to finish:"
        )?;
        self.output.flush()
    }
}

impl<R: BufRead, W: Write> PromptCollector for TerminalCollector<R, W> {
    fn collect(&mut self, frame_path: &Path, frame: &RgbImage) -> Result<Vec<BoundingBox>> {
        self.prompt(frame_path, frame)
            .map_err(|e| Error::io("<terminal>", e))?;

        let mut boxes = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .input
                .read_line(&mut line)
                .map_err(|e| Error::io("<terminal>", e))?;
            let trimmed = line.trim();
            if read == 0 || trimmed.is_empty() {
                break;
            }
            let bbox = BoundingBox::parse(trimmed)?;
            tracing::debug!("Operator box: {:?}", bbox);
            boxes.push(bbox);
        }

        tracing::info!("Collected {} box(es) from terminal", boxes.len());
        Ok(boxes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame() -> RgbImage {
        RgbImage::new(64, 48)
    }

    #[test]
    fn reads_boxes_until_blank_line() {
        let input = Cursor::new("10 10 20 20\n30,5,8,9\n\n99 99 1 1\n");
        let mut output = Vec::new();
        let boxes = TerminalCollector::new(input, &mut output)
            .collect(Path::new("frames/00000.jpeg"), &frame())
            .unwrap();

        assert_eq!(
            boxes,
            vec![
                BoundingBox::new(10.0, 10.0, 20.0, 20.0),
                BoundingBox::new(30.0, 5.0, 8.0, 9.0),
            ]
        );
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("frames/00000.jpeg (64x48)"));
    }

    #[test]
    fn eof_without_boxes_is_empty() {
        let boxes = TerminalCollector::new(Cursor::new(""), Vec::new())
            .collect(Path::new("f.jpeg"), &frame())
            .unwrap();
        assert!(boxes.is_empty());
    }

    #[test]
    fn malformed_line_is_rejected() {
        let result = TerminalCollector::new(Cursor::new("1 2 three 4\n"), Vec::new())
            .collect(Path::new("f.jpeg"), &frame());
        assert!(matches!(result, Err(Error::InvalidPrompt(_))));
    }
}
