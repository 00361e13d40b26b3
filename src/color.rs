//! Color space conversion utilities
//!
//! This module handles conversion between the color spaces the segmentation
//! needs:
//! - sRGB (what cameras write into JPEG/PNG)
//! - linear RGB
//! - XYZ (device-independent color space)
//! - CIE L*a*b* (perceptually uniform; green sits on the negative a* axis)

use cgmath::{Matrix3, Vector3};
use image::{GrayImage, Luma, RgbImage};

/// Standard linear sRGB to XYZ conversion matrix (D65 white point)
/// Source: IEC 61966-2-1:1999 (sRGB standard)
const SRGB_TO_XYZ: [[f32; 3]; 3] = [
    [0.4124, 0.3576, 0.1805],
    [0.2126, 0.7152, 0.0722],
    [0.0193, 0.1192, 0.9505],
];

/// D65 reference white
const WHITE_D65: [f32; 3] = [0.950_47, 1.0, 1.088_83];

/// CIE constants for the L*a*b* transfer function
const LAB_EPSILON: f32 = 216.0 / 24389.0;
const LAB_KAPPA: f32 = 24389.0 / 27.0;

/// Offset used when storing a*/b* in an 8-bit plane (0 chroma = 128)
pub const CHROMA_OFFSET: f32 = 128.0;

/// A color in CIE L*a*b*
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    /// Lightness, 0..=100
    pub l: f32,
    /// Green (negative) to red (positive)
    pub a: f32,
    /// Blue (negative) to yellow (positive)
    pub b: f32,
}

fn srgb_to_xyz_matrix() -> Matrix3<f32> {
    // cgmath is column-major
    Matrix3::new(
        SRGB_TO_XYZ[0][0], SRGB_TO_XYZ[1][0], SRGB_TO_XYZ[2][0], // Column 0
        SRGB_TO_XYZ[0][1], SRGB_TO_XYZ[1][1], SRGB_TO_XYZ[2][1], // Column 1
        SRGB_TO_XYZ[0][2], SRGB_TO_XYZ[1][2], SRGB_TO_XYZ[2][2], // Column 2
    )
}

/// Undo the sRGB transfer curve for one 8-bit channel
fn srgb_to_linear(value: u8) -> f32 {
    let c = value as f32 / 255.0;
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        (LAB_KAPPA * t + 16.0) / 116.0
    }
}

/// Lookup table from 8-bit sRGB to linear light, built once per conversion
fn linear_table() -> [f32; 256] {
    let mut table = [0.0; 256];
    for (value, slot) in table.iter_mut().enumerate() {
        *slot = srgb_to_linear(value as u8);
    }
    table
}

fn xyz_to_lab(xyz: Vector3<f32>) -> Lab {
    let fx = lab_f(xyz.x / WHITE_D65[0]);
    let fy = lab_f(xyz.y / WHITE_D65[1]);
    let fz = lab_f(xyz.z / WHITE_D65[2]);

    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

/// Convert one 8-bit sRGB pixel to L*a*b*
pub fn srgb_to_lab(rgb: [u8; 3]) -> Lab {
    let linear = Vector3::new(
        srgb_to_linear(rgb[0]),
        srgb_to_linear(rgb[1]),
        srgb_to_linear(rgb[2]),
    );
    xyz_to_lab(srgb_to_xyz_matrix() * linear)
}

/// Encode a chroma value into the 8-bit convention (a* + 128, clamped)
pub fn encode_chroma(value: f32) -> u8 {
    (value + CHROMA_OFFSET).round().clamp(0.0, 255.0) as u8
}

/// Extract the a* (green-red) channel of an image as an 8-bit plane.
///
/// Neutral pixels land on 128, green pixels below it, red/magenta above.
pub fn a_channel(image: &RgbImage) -> GrayImage {
    let matrix = srgb_to_xyz_matrix();
    let table = linear_table();

    let mut plane = GrayImage::new(image.width(), image.height());
    for (src, dst) in image.pixels().zip(plane.pixels_mut()) {
        let linear = Vector3::new(
            table[src[0] as usize],
            table[src[1] as usize],
            table[src[2] as usize],
        );
        let lab = xyz_to_lab(matrix * linear);
        *dst = Luma([encode_chroma(lab.a)]);
    }
    plane
}
