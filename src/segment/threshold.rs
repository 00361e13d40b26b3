//! Automatic thresholding of the a* chroma plane

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;

use crate::color::CHROMA_OFFSET;

/// Foreground / background values of a binary mask
pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Otsu level of a plane, or `None` when the histogram has a single bin
/// and there is nothing to separate.
pub fn otsu_threshold(plane: &GrayImage) -> Option<u8> {
    let mut pixels = plane.pixels().map(|p| p[0]);
    let first = pixels.next()?;
    if pixels.all(|value| value == first) {
        return None;
    }
    Some(otsu_level(plane))
}

/// Inverse binary threshold: pixels at or below `level` become foreground.
///
/// With `require_green_chroma`, only pixels on the green side of neutral
/// (a* < 0) may become foreground.
pub fn inverse_binary(plane: &GrayImage, level: u8, require_green_chroma: bool) -> GrayImage {
    let neutral = CHROMA_OFFSET as u8;
    let mut mask = GrayImage::new(plane.width(), plane.height());

    for (src, dst) in plane.pixels().zip(mask.pixels_mut()) {
        let value = src[0];
        let green_enough = !require_green_chroma || value < neutral;
        *dst = if value <= level && green_enough {
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        };
    }
    mask
}

/// Threshold an a* plane into a vegetation mask.
///
/// Returns the mask together with the Otsu level that was used (`None` for a
/// uniform plane, whose mask is empty).
pub fn green_mask(plane: &GrayImage, require_green_chroma: bool) -> (GrayImage, Option<u8>) {
    match otsu_threshold(plane) {
        Some(level) => (inverse_binary(plane, level, require_green_chroma), Some(level)),
        None => (GrayImage::new(plane.width(), plane.height()), None),
    }
}

/// Number of foreground pixels in a mask
pub fn count_foreground(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p[0] != BACKGROUND).count() as u64
}
