//! Growth trend chart
//!
//! Line chart of green pixel count against capture time, rendered as SVG.

use std::path::Path;

use chrono::DateTime;
use plotters::prelude::*;
use plotters::style::FontTransform;

use super::GreenAreaMeasurement;
use crate::error::ChartError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Size and title of the rendered chart
#[derive(Debug, Clone)]
pub struct ChartStyle {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 600,
            title: "Green Leaf Area Over Time".to_string(),
        }
    }
}

/// Render the series as an SVG document
pub fn render_growth_svg(
    series: &[GreenAreaMeasurement],
    style: &ChartStyle,
) -> Result<String, ChartError> {
    if series.is_empty() {
        return Err(ChartError::EmptySeries);
    }

    let points: Vec<(i64, u64)> = series
        .iter()
        .map(|m| (m.captured_at.and_utc().timestamp(), m.green_pixel_count))
        .collect();

    let (x_min, x_max) = time_range(&points);
    let y_max = points.iter().map(|&(_, y)| y).max().unwrap_or(0);
    let y_top = y_max + y_max / 10 + 1;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (style.width, style.height)).into_drawing_area();
        root.fill(&WHITE).map_err(drawing)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&style.title, ("sans-serif", 28))
            .margin(20)
            .x_label_area_size(110)
            .y_label_area_size(90)
            .build_cartesian_2d(x_min..x_max, 0u64..y_top)
            .map_err(drawing)?;

        chart
            .configure_mesh()
            .x_desc("Date")
            .y_desc("Green Leaf Area (pixels)")
            .x_labels(10)
            .x_label_formatter(&|ts| format_tick(*ts))
            .x_label_style(("sans-serif", 12).into_font().transform(FontTransform::Rotate90))
            .draw()
            .map_err(drawing)?;

        chart
            .draw_series(LineSeries::new(points.iter().copied(), BLUE.stroke_width(2)))
            .map_err(drawing)?;
        chart
            .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())))
            .map_err(drawing)?;

        root.present().map_err(drawing)?;
    }

    Ok(svg)
}

/// Render the series to an SVG file
pub fn render_growth_chart(
    series: &[GreenAreaMeasurement],
    path: &Path,
    style: &ChartStyle,
) -> Result<(), ChartError> {
    let svg = render_growth_svg(series, style)?;
    std::fs::write(path, svg).map_err(|e| ChartError::Drawing(e.to_string()))?;
    tracing::info!("📊 Growth chart saved to {}", path.display());
    Ok(())
}

/// X range covering every point; a single instant is widened by a day
fn time_range(points: &[(i64, u64)]) -> (i64, i64) {
    let min = points.iter().map(|&(x, _)| x).min().unwrap_or(0);
    let max = points.iter().map(|&(x, _)| x).max().unwrap_or(0);
    if min == max {
        (min - SECONDS_PER_DAY, max + SECONDS_PER_DAY)
    } else {
        (min, max)
    }
}

fn format_tick(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.naive_utc().format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn drawing<E: std::fmt::Display>(e: E) -> ChartError {
    ChartError::Drawing(e.to_string())
}
