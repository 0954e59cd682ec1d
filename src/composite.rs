use crate::error::{Error, Result};
use crate::segmentation::{canonical_logits, Mask};
use image::{Rgb, RgbImage};
use ndarray::{ArrayViewD, Axis};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// White silhouette of `mask` on black, sized `(width, height)`
pub fn composite(frame_size: (u32, u32), mask: &Mask) -> Result<RgbImage> {
    if mask.dimensions() != frame_size {
        let (width, height) = mask.dimensions();
        return Err(Error::MaskShape {
            expected: format!("{}x{} mask", frame_size.0, frame_size.1),
            actual: vec![height as usize, width as usize],
        });
    }

    let (width, height) = frame_size;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        if mask.get(x, y) {
            WHITE
        } else {
            BLACK
        }
    }))
}

/// Composite raw logits of any supported rank; the first object channel is used
pub fn composite_logits(frame_size: (u32, u32), logits: ArrayViewD<f32>) -> Result<RgbImage> {
    let stacked = canonical_logits(logits.to_owned())?;
    if stacked.len_of(Axis(0)) == 0 {
        return Err(Error::MaskShape {
            expected: "at least one object channel".to_string(),
            actual: stacked.shape().to_vec(),
        });
    }
    let mask = Mask::from_logits(stacked.index_axis(Axis(0), 0));
    composite(frame_size, &mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3, Array4};

    fn square_logits(width: usize, height: usize) -> Array2<f32> {
        Array2::from_shape_fn((height, width), |(y, x)| {
            if (2..6).contains(&x) && (1..4).contains(&y) {
                3.5
            } else {
                -0.5
            }
        })
    }

    fn assert_binary(image: &RgbImage) {
        assert!(image.pixels().all(|p| *p == WHITE || *p == BLACK));
    }

    #[test]
    fn output_is_binary_and_matches_mask() {
        let mask = Mask::from_logits(square_logits(8, 6).view());
        let image = composite((8, 6), &mask).unwrap();

        assert_binary(&image);
        assert_eq!(image.dimensions(), (8, 6));
        assert_eq!(*image.get_pixel(3, 2), WHITE);
        assert_eq!(*image.get_pixel(0, 0), BLACK);
        assert_eq!(image.pixels().filter(|p| **p == WHITE).count(), 12);
    }

    #[test]
    fn zero_logit_is_background() {
        let mask = Mask::from_logits(Array2::<f32>::zeros((2, 2)).view());
        let image = composite((2, 2), &mask).unwrap();
        assert!(image.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mask = Mask::from_logits(square_logits(8, 6).view());
        assert!(matches!(
            composite((6, 8), &mask),
            Err(Error::MaskShape { .. })
        ));
    }

    #[test]
    fn accepts_all_logit_ranks() {
        let plane = square_logits(8, 6);
        let expected = composite((8, 6), &Mask::from_logits(plane.view())).unwrap();

        let two_d = plane.clone().into_dyn();
        let three_d = plane.clone().insert_axis(Axis(0)).into_dyn();
        let four_d = plane.clone().into_shape_with_order((1, 1, 6, 8)).unwrap().into_dyn();

        for logits in [two_d, three_d, four_d] {
            let image = composite_logits((8, 6), logits.view()).unwrap();
            assert_binary(&image);
            assert_eq!(image, expected);
        }
    }

    #[test]
    fn first_object_channel_wins() {
        let mut stack = Array3::from_elem((2, 6, 8), -1.0f32);
        stack.index_axis_mut(Axis(0), 1).fill(1.0);
        let image = composite_logits((8, 6), stack.into_dyn().view()).unwrap();
        assert!(image.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn unsupported_rank_is_rejected() {
        let logits = Array4::<f32>::zeros((2, 2, 6, 8)).into_dyn();
        assert!(composite_logits((8, 6), logits.view()).is_err());
    }
}
