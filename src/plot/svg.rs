//! SVG efficiency figure rendered with Plotters.
//!
//! Layout:
//! - logarithmic energy axis, linear efficiency axis
//! - shaded 1σ band, fitted curve on top
//! - rescaled observations with vertical error bars, one colour per source

use std::error::Error;
use std::path::Path;

use plotters::prelude::*;

use crate::domain::CurveGrid;
use crate::error::AppError;
use crate::report::ScaledPoint;

/// Pixel size of the figure.
pub const DEFAULT_SVG_SIZE: (u32, u32) = (1024, 720);

/// Draw the figure to `path`.
pub fn render_svg(path: &Path, points: &[ScaledPoint], grid: &CurveGrid, size: (u32, u32)) -> Result<(), AppError> {
    draw(path, points, grid, size)
        .map_err(|e| AppError::new(2, format!("Failed to render SVG '{}': {e}", path.display())))
}

fn draw(path: &Path, points: &[ScaledPoint], grid: &CurveGrid, size: (u32, u32)) -> Result<(), Box<dyn Error>> {
    let (e_min, e_max) = bounds(points.iter().map(|p| p.energy).chain(grid.energy.iter().copied()))
        .ok_or("nothing to plot")?;
    let (y_lo, y_hi) = bounds(
        points
            .iter()
            .flat_map(|p| [p.eff - p.eff_err, p.eff + p.eff_err])
            .chain(grid.lower.iter().copied())
            .chain(grid.upper.iter().copied()),
    )
    .ok_or("nothing to plot")?;
    let pad = 0.05 * (y_hi - y_lo);

    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Detector efficiency", ("sans-serif", 24))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d((e_min * 0.9..e_max * 1.1).log_scale(), (y_lo - pad).max(0.0)..y_hi + pad)?;

    chart
        .configure_mesh()
        .x_desc("Energy (keV)")
        .y_desc("Efficiency")
        .y_label_formatter(&|v| format!("{v:.3e}"))
        .draw()?;

    // Band polygon: upper edge left to right, lower edge back.
    let band: Vec<(f64, f64)> = grid
        .energy
        .iter()
        .copied()
        .zip(grid.upper.iter().copied())
        .chain(grid.energy.iter().copied().zip(grid.lower.iter().copied()).rev())
        .collect();
    if band.len() >= 3 {
        chart.draw_series(std::iter::once(Polygon::new(band, BLUE.mix(0.2).filled())))?;
    }

    chart
        .draw_series(LineSeries::new(
            grid.energy.iter().copied().zip(grid.central.iter().copied()),
            BLUE.stroke_width(2),
        ))?
        .label("fit")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.stroke_width(2)));

    let n_sources = points.iter().map(|p| p.source + 1).max().unwrap_or(0);
    for s in 0..n_sources {
        let color = Palette99::pick(s + 1).to_rgba();
        chart
            .draw_series(points.iter().filter(|p| p.source == s).map(|p| {
                ErrorBar::new_vertical(p.energy, p.eff - p.eff_err, p.eff, p.eff + p.eff_err, color.filled(), 6)
            }))?
            .label(format!("source #{s}"))
            .legend(move |(x, y)| Circle::new((x + 10, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    (lo.is_finite() && hi > lo).then_some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_an_svg_document() {
        let grid = CurveGrid {
            energy: vec![50.0, 100.0, 500.0, 1500.0],
            central: vec![0.8, 1.0, 0.5, 0.2],
            lower: vec![0.75, 0.95, 0.47, 0.18],
            upper: vec![0.85, 1.05, 0.53, 0.22],
        };
        let points = [
            ScaledPoint {
                source: 0,
                energy: 121.8,
                energy_err: 0.1,
                eff: 0.95,
                eff_err: 0.03,
                fit: 0.97,
                pull: -0.7,
            },
            ScaledPoint {
                source: 1,
                energy: 661.7,
                energy_err: 0.1,
                eff: 0.42,
                eff_err: 0.02,
                fit: 0.41,
                pull: 0.5,
            },
        ];
        let path = std::env::temp_dir().join(format!("geff-plot-{}.svg", std::process::id()));
        render_svg(&path, &points, &grid, (640, 480)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("<svg"));
        assert!(text.contains("source #1"));
    }

    #[test]
    fn empty_input_is_an_error() {
        let path = std::env::temp_dir().join(format!("geff-plot-empty-{}.svg", std::process::id()));
        assert!(render_svg(&path, &[], &CurveGrid::default(), (640, 480)).is_err());
    }
}
