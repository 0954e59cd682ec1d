mod file;
mod terminal;

pub use file::JsonFileCollector;
pub use terminal::TerminalCollector;

use crate::error::{Error, Result};
use clap::ValueEnum;
use image::RgbImage;
use serde::Deserialize;
use std::path::Path;

/// Axis-aligned box in first-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Parse `x,y,width,height`; commas and whitespace both separate fields
    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|field| !field.is_empty())
            .collect();

        if fields.len() != 4 {
            return Err(Error::InvalidPrompt(format!(
                "expected `x y width height`, got {text:?}"
            )));
        }

        let mut values = [0.0f32; 4];
        for (value, field) in values.iter_mut().zip(&fields) {
            *value = field
                .parse()
                .map_err(|_| Error::InvalidPrompt(format!("{field:?} is not a number")))?;
        }

        let bbox = Self::new(values[0], values[1], values[2], values[3]);
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.width <= 0.0 || self.height <= 0.0 {
            return Err(Error::InvalidPrompt(format!(
                "box {self:?} must have finite coordinates and a positive size"
            )));
        }
        Ok(())
    }

    pub fn top_left(&self) -> [f32; 2] {
        [self.x, self.y]
    }

    pub fn bottom_right(&self) -> [f32; 2] {
        [self.x + self.width, self.y + self.height]
    }

    pub fn center(&self) -> [f32; 2] {
        [self.x + self.width / 2.0, self.y + self.height / 2.0]
    }
}

/// Point label as understood by the mask decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Label {
    Background = 0,
    Foreground = 1,
    BoxTopLeft = 2,
    BoxBottomRight = 3,
}

impl TryFrom<u8> for Label {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Label::Background),
            1 => Ok(Label::Foreground),
            2 => Ok(Label::BoxTopLeft),
            3 => Ok(Label::BoxBottomRight),
            other => Err(Error::InvalidPrompt(format!("unknown point label {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointPrompt {
    pub x: f32,
    pub y: f32,
    pub label: Label,
}

/// How boxes become point prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PromptMode {
    /// Corners of the first box as a box prompt, centres of any further
    /// boxes as foreground points
    Box,
    /// One foreground point at the box centre
    Center,
    /// One foreground point at the top-left corner only
    TopLeft,
}

/// Points and labels for `boxes`, as parallel arrays
pub fn derive_prompt(boxes: &[BoundingBox], mode: PromptMode) -> (Vec<[f32; 2]>, Vec<u8>) {
    let mut points = Vec::new();
    let mut labels = Vec::new();

    for (index, bbox) in boxes.iter().enumerate() {
        match mode {
            // one box prompt per object
            PromptMode::Box if index > 0 => {
                points.push(bbox.center());
                labels.push(Label::Foreground as u8);
            }
            PromptMode::Box => {
                points.push(bbox.top_left());
                labels.push(Label::BoxTopLeft as u8);
                points.push(bbox.bottom_right());
                labels.push(Label::BoxBottomRight as u8);
            }
            PromptMode::Center => {
                points.push(bbox.center());
                labels.push(Label::Foreground as u8);
            }
            PromptMode::TopLeft => {
                points.push(bbox.top_left());
                labels.push(Label::Foreground as u8);
            }
        }
    }

    (points, labels)
}

/// Human-in-the-loop exchange: first frame in, boxes out
pub trait PromptCollector {
    /// Blocks until the operator submits zero or more boxes
    fn collect(&mut self, frame_path: &Path, frame: &RgbImage) -> Result<Vec<BoundingBox>>;
}

/// Boxes known up front (command line)
pub struct StaticCollector {
    boxes: Vec<BoundingBox>,
}

impl StaticCollector {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes }
    }
}

impl PromptCollector for StaticCollector {
    fn collect(&mut self, _frame_path: &Path, _frame: &RgbImage) -> Result<Vec<BoundingBox>> {
        Ok(self.boxes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_and_space_separated_boxes() {
        assert_eq!(
            BoundingBox::parse("10,20,30,40").unwrap(),
            BoundingBox::new(10.0, 20.0, 30.0, 40.0)
        );
        assert_eq!(
            BoundingBox::parse(" 1.5 2 3  4 ").unwrap(),
            BoundingBox::new(1.5, 2.0, 3.0, 4.0)
        );
    }

    #[test]
    fn rejects_malformed_boxes() {
        assert!(BoundingBox::parse("1,2,3").is_err());
        assert!(BoundingBox::parse("a,b,c,d").is_err());
        assert!(BoundingBox::parse("0,0,0,10").is_err());
        assert!(BoundingBox::parse("0,0,10,-1").is_err());
    }

    #[test]
    fn box_mode_uses_both_corners() {
        let boxes = [BoundingBox::new(10.0, 20.0, 30.0, 40.0)];
        let (points, labels) = derive_prompt(&boxes, PromptMode::Box);
        assert_eq!(points, vec![[10.0, 20.0], [40.0, 60.0]]);
        assert_eq!(labels, vec![2, 3]);
    }

    #[test]
    fn box_mode_keeps_a_single_box_prompt() {
        let boxes = [
            BoundingBox::new(10.0, 20.0, 30.0, 40.0),
            BoundingBox::new(100.0, 50.0, 10.0, 30.0),
            BoundingBox::new(0.0, 0.0, 4.0, 4.0),
        ];
        let (points, labels) = derive_prompt(&boxes, PromptMode::Box);
        assert_eq!(
            points,
            vec![[10.0, 20.0], [40.0, 60.0], [105.0, 65.0], [2.0, 2.0]]
        );
        assert_eq!(labels, vec![2, 3, 1, 1]);
        assert_eq!(labels.iter().filter(|&&l| l == 2).count(), 1);
    }

    #[test]
    fn center_mode_uses_box_centre() {
        let boxes = [
            BoundingBox::new(0.0, 0.0, 20.0, 20.0),
            BoundingBox::new(100.0, 50.0, 10.0, 30.0),
        ];
        let (points, labels) = derive_prompt(&boxes, PromptMode::Center);
        assert_eq!(points, vec![[10.0, 10.0], [105.0, 65.0]]);
        assert_eq!(labels, vec![1, 1]);
    }

    #[test]
    fn top_left_mode_discards_size() {
        let boxes = [BoundingBox::new(5.0, 6.0, 70.0, 80.0)];
        let (points, labels) = derive_prompt(&boxes, PromptMode::TopLeft);
        assert_eq!(points, vec![[5.0, 6.0]]);
        assert_eq!(labels, vec![1]);
    }

    #[test]
    fn no_boxes_no_points() {
        let (points, labels) = derive_prompt(&[], PromptMode::Box);
        assert!(points.is_empty());
        assert!(labels.is_empty());
    }

    #[test]
    fn label_conversion() {
        assert_eq!(Label::try_from(1).unwrap(), Label::Foreground);
        assert_eq!(Label::try_from(3).unwrap(), Label::BoxBottomRight);
        assert!(Label::try_from(4).is_err());
    }
}
