//! Morphological noise suppression on binary masks
//!
//! Erosion and dilation run as separate passes so each can be tuned on its
//! own. One iteration uses a 3x3 square structuring element (chessboard
//! distance 1).

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};

/// Radius of the 3x3 square structuring element
const ELEMENT_RADIUS: u8 = 1;

/// Erode `iterations` times with a 3x3 square element
pub fn erode_iterations(mask: &GrayImage, iterations: u32) -> GrayImage {
    let mut current = mask.clone();
    for _ in 0..iterations {
        current = erode(&current, Norm::LInf, ELEMENT_RADIUS);
    }
    current
}

/// Dilate `iterations` times with a 3x3 square element
pub fn dilate_iterations(mask: &GrayImage, iterations: u32) -> GrayImage {
    let mut current = mask.clone();
    for _ in 0..iterations {
        current = dilate(&current, Norm::LInf, ELEMENT_RADIUS);
    }
    current
}

/// Erosion followed by dilation: removes specks smaller than the element
/// while keeping the area of larger regions roughly intact.
pub fn suppress_noise(mask: &GrayImage, erode_count: u32, dilate_count: u32) -> GrayImage {
    let eroded = erode_iterations(mask, erode_count);
    dilate_iterations(&eroded, dilate_count)
}
