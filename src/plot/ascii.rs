//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid, logarithmic energy axis),
//! optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - fitted curve: `-`
//! - 1σ band edges: `:`
//! - rescaled observations: the source index `0`–`9` (`o` beyond that)

use crate::domain::{CurveFile, CurveGrid};
use crate::report::ScaledPoint;

/// Render the curve, its band and the rescaled observations.
pub fn render_ascii_plot(points: &[ScaledPoint], grid: &CurveGrid, width: usize, height: usize) -> String {
    render_plot(points, grid, width, height)
}

/// Render a saved curve JSON file (curve and band only).
pub fn render_ascii_plot_from_curve_file(curve: &CurveFile, width: usize, height: usize) -> String {
    render_plot(&[], &curve.grid, width, height)
}

fn render_plot(points: &[ScaledPoint], grid: &CurveGrid, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (e_min, e_max) = energy_range(points, grid).unwrap_or((1.0, 4500.0));
    let (y_min, y_max) = y_range(points, grid).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut cells = vec![vec![' '; width]; height];
    let frame = Frame {
        e_min,
        e_max,
        y_min,
        y_max,
        width,
        height,
    };

    // Curve first, band edges only fill blanks, points overlay both.
    draw_curve(&mut cells, &frame, &grid.energy, &grid.central, '-');
    draw_curve(&mut cells, &frame, &grid.energy, &grid.lower, ':');
    draw_curve(&mut cells, &frame, &grid.energy, &grid.upper, ':');

    for p in points {
        if p.energy <= 0.0 {
            continue;
        }
        let x = frame.map_x(p.energy);
        let y = frame.map_y(p.eff);
        cells[y][x] = char::from_digit(p.source as u32, 10).unwrap_or('o');
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: E=[{e_min:.1}, {e_max:.1}] keV (log) | eff=[{y_min:.4e}, {y_max:.4e}]\n"
    ));
    for row in cells {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

struct Frame {
    e_min: f64,
    e_max: f64,
    y_min: f64,
    y_max: f64,
    width: usize,
    height: usize,
}

impl Frame {
    fn map_x(&self, e: f64) -> usize {
        let u = ((e.ln() - self.e_min.ln()) / (self.e_max.ln() - self.e_min.ln())).clamp(0.0, 1.0);
        (u * (self.width as f64 - 1.0)).round() as usize
    }

    fn map_y(&self, y: f64) -> usize {
        let u = ((y - self.y_min) / (self.y_max - self.y_min)).clamp(0.0, 1.0);
        // y=top is max -> row 0
        (self.height as f64 - 1.0 - (u * (self.height as f64 - 1.0))).round() as usize
    }
}

fn energy_range(points: &[ScaledPoint], grid: &CurveGrid) -> Option<(f64, f64)> {
    let energies = points.iter().map(|p| p.energy).chain(grid.energy.iter().copied());
    finite_range(energies.filter(|e| *e > 0.0))
}

fn y_range(points: &[ScaledPoint], grid: &CurveGrid) -> Option<(f64, f64)> {
    let values = points
        .iter()
        .map(|p| p.eff)
        .chain(grid.lower.iter().copied())
        .chain(grid.upper.iter().copied())
        .chain(grid.central.iter().copied());
    finite_range(values)
}

fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    (min.is_finite() && max.is_finite() && max > min).then_some((min, max))
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn draw_curve(cells: &mut [Vec<char>], frame: &Frame, energy: &[f64], y: &[f64], ch: char) {
    let mut prev = None;
    for (&e, &v) in energy.iter().zip(y) {
        if !(e > 0.0 && v.is_finite()) {
            continue;
        }
        let x = frame.map_x(e);
        let yy = frame.map_y(v);
        match prev {
            Some((x0, y0)) => draw_line(cells, x0, y0, x, yy, ch),
            None if cells[yy][x] == ' ' => cells[yy][x] = ch,
            None => {}
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(cells: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < cells.len()
            && x0 >= 0
            && (x0 as usize) < cells[0].len()
            && cells[y0 as usize][x0 as usize] == ' '
        {
            cells[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plot_golden_snapshot_small() {
        let grid = CurveGrid {
            energy: vec![10.0, 1000.0],
            central: vec![1.0, 1.0],
            lower: vec![1.0, 1.0],
            upper: vec![1.0, 1.0],
        };
        let points = [ScaledPoint {
            source: 0,
            energy: 10.0,
            energy_err: 0.0,
            eff: 2.0,
            eff_err: 0.1,
            fit: 1.0,
            pull: 10.0,
        }];

        let txt = render_ascii_plot(&points, &grid, 10, 5);
        let expected = concat!(
            "Plot: E=[10.0, 1000.0] keV (log) | eff=[9.5000e-1, 2.0500e0]\n",
            "0         \n",
            "          \n",
            "          \n",
            "          \n",
            "----------\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn band_edges_are_drawn_around_curve() {
        let grid = CurveGrid {
            energy: vec![10.0, 100.0, 1000.0],
            central: vec![1.0, 1.0, 1.0],
            lower: vec![0.5, 0.5, 0.5],
            upper: vec![1.5, 1.5, 1.5],
        };
        let txt = render_ascii_plot(&[], &grid, 20, 9);
        let rows: Vec<&str> = txt.lines().skip(1).collect();
        assert_eq!(rows.len(), 9);
        assert!(rows[0].chars().all(|c| c == ':'));
        assert!(rows[4].chars().all(|c| c == '-'));
        assert!(rows[8].chars().all(|c| c == ':'));
    }
}
