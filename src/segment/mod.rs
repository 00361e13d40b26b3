//! Vegetation segmentation
//!
//! Turns a color photograph into a green-coverage measurement:
//! 1. sRGB -> L*a*b*, keep the a* (green-red) plane
//! 2. Otsu threshold with an inverse binary rule (green becomes foreground)
//! 3. Erosion then dilation to remove specks
//! 4. External contours, small ones dropped
//! 5. Surviving contours filled into a fresh mask, which is what gets counted
//! 6. Contours drawn onto a copy of the input for visual checks

pub mod contours;
pub mod morphology;
pub mod threshold;

use image::{DynamicImage, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::color;

/// Tunable thresholds of the segmentation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SegmentationParams {
    /// Erosion passes with a 3x3 element (default 2)
    pub erode_iterations: u32,

    /// Dilation passes with a 3x3 element (default 2)
    pub dilate_iterations: u32,

    /// Contours enclosing less than this many pixel units are noise
    /// (default 500.0)
    pub min_contour_area: f64,

    /// Only pixels with negative a* may be foreground (default false)
    /// - Keeps scenes without vegetation at zero instead of letting Otsu
    ///   split neutral from red
    /// - Rejects leaves under a warm or magenta light cast, so leave it off
    ///   unless the lighting is neutral
    pub require_green_chroma: bool,

    /// Outline color on the contour image (default pure green)
    pub highlight: [u8; 3],

    /// Outline width in pixels (default 3)
    pub stroke_width: u32,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            erode_iterations: 2,
            dilate_iterations: 2,
            min_contour_area: 500.0,
            require_green_chroma: false,
            highlight: [0, 255, 0],
            stroke_width: 3,
        }
    }
}

/// Outcome of segmenting one photograph
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    /// Foreground pixels of the filtered mask
    pub green_pixel_count: u64,
    /// Filtered vegetation mask (255 = vegetation)
    pub mask: GrayImage,
    /// Input image with the surviving contours drawn on it
    pub contour_image: RgbImage,
    /// Contours that survived the area filter
    pub contour_count: usize,
    /// Otsu level used on the a* plane, `None` for a uniform plane
    pub threshold: Option<u8>,
}

impl SegmentationResult {
    /// No contour survived: a valid zero measurement
    pub fn is_degenerate(&self) -> bool {
        self.contour_count == 0
    }
}

/// Segment a decoded image.
///
/// Deterministic: identical pixels always give identical results.
pub fn segment(image: &DynamicImage, params: &SegmentationParams) -> SegmentationResult {
    let rgb = image.to_rgb8();
    segment_rgb(&rgb, params)
}

/// Segment an 8-bit RGB buffer
pub fn segment_rgb(rgb: &RgbImage, params: &SegmentationParams) -> SegmentationResult {
    let (width, height) = rgb.dimensions();

    // Step 1: a* plane
    let a_plane = color::a_channel(rgb);

    // Step 2: automatic threshold, green is the low side
    let (raw_mask, level) = threshold::green_mask(&a_plane, params.require_green_chroma);

    // Step 3: noise suppression
    let cleaned = morphology::suppress_noise(
        &raw_mask,
        params.erode_iterations,
        params.dilate_iterations,
    );

    // Step 4: contour filter
    let blobs = contours::filter_by_area(contours::external_blobs(&cleaned), params.min_contour_area);

    // Step 5-6: filtered mask is authoritative
    let mask = contours::rasterize(width, height, &blobs);
    let green_pixel_count = threshold::count_foreground(&mask);

    // Step 7: overlay
    let mut contour_image = rgb.clone();
    contours::draw_outlines(&mut contour_image, &blobs, params.highlight, params.stroke_width);

    tracing::debug!(
        "🌿 Segmented {}x{}: threshold {:?}, {} contour(s), {} green pixels",
        width,
        height,
        level,
        blobs.len(),
        green_pixel_count
    );

    SegmentationResult {
        green_pixel_count,
        mask,
        contour_image,
        contour_count: blobs.len(),
        threshold: level,
    }
}

/// Decode image bytes (PNG/JPEG) and segment them
pub fn segment_bytes(
    bytes: &[u8],
    params: &SegmentationParams,
) -> Result<SegmentationResult, image::ImageError> {
    let image = image::load_from_memory(bytes)?;
    Ok(segment(&image, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    const LEAF: Rgb<u8> = Rgb([50, 150, 40]);
    const SOIL: Rgb<u8> = Rgb([120, 110, 100]);

    /// Soil background with square leaves at the given (x, y, side)
    fn scene(width: u32, height: u32, leaves: &[(u32, u32, u32)]) -> RgbImage {
        let mut image = RgbImage::from_pixel(width, height, SOIL);
        for &(x0, y0, side) in leaves {
            for y in y0..y0 + side {
                for x in x0..x0 + side {
                    image.put_pixel(x, y, LEAF);
                }
            }
        }
        image
    }

    #[test]
    fn test_default_params() {
        let params = SegmentationParams::default();
        assert_eq!(params.erode_iterations, 2);
        assert_eq!(params.dilate_iterations, 2);
        assert_eq!(params.min_contour_area, 500.0);
    }

    #[test]
    fn test_counts_leaf_and_drops_noise() {
        let image = scene(120, 100, &[(10, 10, 40), (90, 70, 10), (100, 20, 2)]);
        let result = segment_rgb(&image, &SegmentationParams::default());

        assert_eq!(result.contour_count, 1);
        assert_eq!(result.green_pixel_count, 1600);
        assert_eq!(result.mask.dimensions(), (120, 100));
        assert_eq!(result.contour_image.dimensions(), (120, 100));
        // Outline drawn on the leaf border, noise blob untouched
        assert_eq!(*result.contour_image.get_pixel(10, 10), Rgb([0, 255, 0]));
        assert_eq!(*result.contour_image.get_pixel(95, 75), LEAF);
    }

    #[test]
    fn test_deterministic() {
        let image = scene(80, 80, &[(5, 5, 30), (40, 45, 28)]);
        let params = SegmentationParams::default();
        let first = segment_rgb(&image, &params);
        let second = segment_rgb(&image, &params);
        assert_eq!(first.green_pixel_count, second.green_pixel_count);
        assert_eq!(first.mask, second.mask);
    }

    #[test]
    fn test_black_image_is_zero() {
        let image = RgbImage::new(64, 64);
        let result = segment_rgb(&image, &SegmentationParams::default());
        assert_eq!(result.green_pixel_count, 0);
        assert!(result.is_degenerate());
        assert_eq!(result.contour_image, image);
    }

    #[test]
    fn test_green_chroma_guard_keeps_background_at_zero() {
        // Soil with a red marker: two classes, neither green
        let mut image = RgbImage::from_pixel(64, 64, SOIL);
        for y in 0..30 {
            for x in 0..30 {
                image.put_pixel(x, y, Rgb([200, 30, 30]));
            }
        }
        let guarded = SegmentationParams {
            require_green_chroma: true,
            ..SegmentationParams::default()
        };
        let result = segment_rgb(&image, &guarded);
        assert_eq!(result.green_pixel_count, 0);
        assert_eq!(result.contour_image, image);

        // Plain Otsu takes the less red class as foreground
        let plain = segment_rgb(&image, &SegmentationParams::default());
        assert!(plain.green_pixel_count > 0);
    }

    #[test]
    fn test_leaf_under_warm_light_is_counted() {
        // Magenta tray and a leaf whose a* is slightly positive
        let mut image = RgbImage::from_pixel(100, 100, Rgb([200, 120, 170]));
        for y in 20..80 {
            for x in 20..80 {
                image.put_pixel(x, y, Rgb([150, 130, 120]));
            }
        }

        let result = segment_rgb(&image, &SegmentationParams::default());
        assert_eq!(result.green_pixel_count, 3600);

        let guarded = SegmentationParams {
            require_green_chroma: true,
            ..SegmentationParams::default()
        };
        assert_eq!(segment_rgb(&image, &guarded).green_pixel_count, 0);
    }

    #[test]
    fn test_min_area_is_configurable() {
        let image = scene(60, 60, &[(10, 10, 15)]);
        let strict = segment_rgb(&image, &SegmentationParams::default());
        assert_eq!(strict.green_pixel_count, 0);

        let lenient = SegmentationParams {
            min_contour_area: 50.0,
            ..SegmentationParams::default()
        };
        assert_eq!(segment_rgb(&image, &lenient).green_pixel_count, 225);
    }

    #[test]
    fn test_segment_bytes_decodes_png() {
        let image = scene(70, 70, &[(10, 10, 40)]);
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let result = segment_bytes(&bytes, &SegmentationParams::default()).unwrap();
        assert_eq!(result.green_pixel_count, 1600);
        assert!(segment_bytes(b"not an image", &SegmentationParams::default()).is_err());
    }
}
