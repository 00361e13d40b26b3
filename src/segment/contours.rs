//! Contour extraction, area filtering and drawing

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
use imageproc::point::Point;

use super::threshold::FOREGROUND;

/// One external contour with its enclosed area
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// Boundary pixels in tracing order
    pub points: Vec<Point<i32>>,
    /// Polygon area enclosed by the boundary (shoelace formula)
    pub area: f64,
}

/// Area enclosed by a closed polygon through the given points
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(p, q)| p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64)
        .sum();
    twice_area.abs() as f64 / 2.0
}

/// Outermost contours of a binary mask (holes and nested shapes are ignored)
pub fn external_blobs(mask: &GrayImage) -> Vec<Blob> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
        .map(|contour| {
            let area = polygon_area(&contour.points);
            Blob {
                points: contour.points,
                area,
            }
        })
        .collect()
}

/// Keep blobs whose area reaches `min_area`
pub fn filter_by_area(blobs: Vec<Blob>, min_area: f64) -> Vec<Blob> {
    blobs.into_iter().filter(|blob| blob.area >= min_area).collect()
}

/// Fill the given blobs into a fresh mask of the given size.
///
/// Interiors (including any holes) and the boundary pixels themselves are
/// foreground.
pub fn rasterize(width: u32, height: u32, blobs: &[Blob]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let white = Luma([FOREGROUND]);

    for blob in blobs {
        let mut polygon = blob.points.clone();
        // draw_polygon_mut rejects closed point lists
        while polygon.len() > 1 && polygon.first() == polygon.last() {
            polygon.pop();
        }
        if polygon.len() >= 3 {
            draw_polygon_mut(&mut mask, &polygon, white);
        }
        for point in &blob.points {
            if point.x >= 0 && point.y >= 0 && (point.x as u32) < width && (point.y as u32) < height
            {
                mask.put_pixel(point.x as u32, point.y as u32, white);
            }
        }
    }
    mask
}

/// Stroke blob outlines onto an image
pub fn draw_outlines(image: &mut RgbImage, blobs: &[Blob], color: [u8; 3], stroke_width: u32) {
    let radius = (stroke_width / 2) as i32;
    let (width, height) = image.dimensions();

    for blob in blobs {
        for point in &blob.points {
            if radius == 0 {
                if point.x >= 0
                    && point.y >= 0
                    && (point.x as u32) < width
                    && (point.y as u32) < height
                {
                    image.put_pixel(point.x as u32, point.y as u32, Rgb(color));
                }
            } else {
                draw_filled_circle_mut(image, (point.x, point.y), radius, Rgb(color));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::threshold::count_foreground;

    fn square_mask(size: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        let mut mask = GrayImage::new(size, size);
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        mask
    }

    #[test]
    fn test_polygon_area() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(polygon_area(&square), 100.0);
        assert_eq!(polygon_area(&square[..2]), 0.0);
    }

    #[test]
    fn test_square_blob_area() {
        let mask = square_mask(50, 10, 10, 30);
        let blobs = external_blobs(&mask);
        assert_eq!(blobs.len(), 1);
        // Boundary runs through pixel centers, so a 30px square encloses 29x29
        assert_eq!(blobs[0].area, 841.0);
    }

    #[test]
    fn test_nested_shapes_are_not_external() {
        // Ring with a separate blob inside its hole
        let mut mask = square_mask(60, 5, 5, 50);
        for y in 10..50 {
            for x in 10..50 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        for y in 25..35 {
            for x in 25..35 {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        assert_eq!(external_blobs(&mask).len(), 1);
    }

    #[test]
    fn test_filter_and_rasterize() {
        let mut mask = square_mask(80, 5, 5, 30);
        for y in 60..70 {
            for x in 60..70 {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }

        let blobs = filter_by_area(external_blobs(&mask), 500.0);
        assert_eq!(blobs.len(), 1);

        let filled = rasterize(80, 80, &blobs);
        assert_eq!(count_foreground(&filled), 900);
        assert_eq!(filled.get_pixel(65, 65)[0], 0);
    }

    #[test]
    fn test_ring_fill_covers_hole() {
        let mut mask = square_mask(40, 5, 5, 30);
        for y in 10..30 {
            for x in 10..30 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        let filled = rasterize(40, 40, &external_blobs(&mask));
        assert_eq!(count_foreground(&filled), 900);
    }

    #[test]
    fn test_draw_outlines() {
        let mask = square_mask(20, 5, 5, 10);
        let blobs = external_blobs(&mask);
        let mut canvas = RgbImage::new(20, 20);
        draw_outlines(&mut canvas, &blobs, [0, 255, 0], 1);
        assert_eq!(*canvas.get_pixel(5, 5), Rgb([0, 255, 0]));
        assert_eq!(*canvas.get_pixel(10, 10), Rgb([0, 0, 0]));
    }
}
