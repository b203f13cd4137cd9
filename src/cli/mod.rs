//! Command-line parsing for the `geff` efficiency fitter.
//!
//! Argument parsing and command dispatch stay separate from the fitting code.
//! Every fit/output flag is optional: when given it overrides the value loaded
//! from the settings file and environment (see [`crate::settings`]).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{ScaleSeed, ShapeSeed};
use crate::settings::Settings;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "geff", version, about = "Global multi-source detector efficiency fit")]
pub struct Cli {
    /// TOML settings file.
    #[arg(long, global = true, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Log filter (e.g. `info`, `debug`, `geff::fit=trace`).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit efficiency (and normalization) files, print the report, write outputs.
    Fit(FitArgs),
    /// Plot a previously exported curve JSON.
    Plot(PlotArgs),
    /// Run the full pipeline on synthetic multi-source data.
    Demo(DemoArgs),
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Efficiency file (energy, energy error, efficiency, efficiency error). Repeat per source.
    #[arg(short = 'e', long = "eff", value_name = "FILE", required = true)]
    pub efficiency: Vec<PathBuf>,

    /// Normalization file (value, error) for the source at the same position.
    #[arg(short = 'n', long = "norm", value_name = "FILE")]
    pub normalization: Vec<PathBuf>,

    #[command(flatten)]
    pub fit: FitOptions,

    #[command(flatten)]
    pub output: OutputOptions,
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Random seed for the synthetic sources.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Relative 1σ noise of each synthetic efficiency point.
    #[arg(long, default_value_t = 0.03)]
    pub rel_error: f64,

    #[command(flatten)]
    pub fit: FitOptions,

    #[command(flatten)]
    pub output: OutputOptions,
}

/// Options for plotting a saved curve.
#[derive(Debug, Args, Clone)]
pub struct PlotArgs {
    /// Curve JSON file produced by `geff fit --export-curve`.
    #[arg(long, value_name = "JSON")]
    pub curve: PathBuf,

    /// Also render the curve to this SVG file.
    #[arg(short = 'o', long = "out", value_name = "SVG")]
    pub svg: Option<PathBuf>,

    /// Plot width (columns).
    #[arg(long)]
    pub width: Option<usize>,

    /// Plot height (rows).
    #[arg(long)]
    pub height: Option<usize>,
}

/// Engine overrides shared by `fit` and `demo`.
#[derive(Debug, Args, Clone, Default)]
pub struct FitOptions {
    /// Fit range in keV as `low:upp`; either side may be left empty.
    #[arg(short = 'r', long, value_parser = parse_range, allow_hyphen_values = true)]
    pub range: Option<EnergyRange>,

    /// Number of shape coefficients.
    #[arg(short = 'k', long)]
    pub shape_order: Option<usize>,

    /// Reference energy E₀ (keV).
    #[arg(long)]
    pub e0: Option<f64>,

    /// Comma-separated shape seed (length must equal the shape order).
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub shape_seed: Option<Vec<f64>>,

    #[arg(long, value_enum)]
    pub seed_mode: Option<ShapeSeed>,

    #[arg(long, value_enum)]
    pub scale_seed: Option<ScaleSeed>,

    /// Fold energy errors into the efficiency errors.
    #[arg(long)]
    pub effective_variance: bool,

    /// Scale the covariance by χ²/ndf.
    #[arg(long)]
    pub normalize_errors: bool,

    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Source whose units the curve is expressed in.
    #[arg(long)]
    pub anchor: Option<usize>,

    /// External scale factor applied to the shape instead of the anchor's fitted scale.
    #[arg(long)]
    pub scale_factor: Option<f64>,

    /// Curve grid step (keV).
    #[arg(long)]
    pub step: Option<f64>,
}

/// Output overrides shared by `fit` and `demo`.
#[derive(Debug, Args, Clone, Default)]
pub struct OutputOptions {
    /// SVG figure path.
    #[arg(short = 'o', long = "out", value_name = "SVG")]
    pub svg: Option<PathBuf>,

    /// Skip the SVG figure.
    #[arg(long)]
    pub no_svg: bool,

    /// Text fit report path.
    #[arg(long)]
    pub fit_result: Option<PathBuf>,

    /// Skip the text fit report.
    #[arg(long)]
    pub no_fit_result: bool,

    /// Export the curve (parameters, covariance, grid) to JSON.
    #[arg(long = "export-curve", value_name = "JSON")]
    pub curve_json: Option<PathBuf>,

    /// Export the curve grid to CSV.
    #[arg(long = "export-csv", value_name = "CSV")]
    pub curve_csv: Option<PathBuf>,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long)]
    pub width: Option<usize>,

    /// Plot height (rows).
    #[arg(long)]
    pub height: Option<usize>,
}

/// A `low:upp` energy range; a missing side keeps the configured bound.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnergyRange {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// Parse `low:upp` (e.g. `1:4500`, `50:`, `:2000`).
pub fn parse_range(text: &str) -> Result<EnergyRange, String> {
    let (low, upp) = text
        .split_once(':')
        .ok_or_else(|| format!("range '{text}' must look like low:upp"))?;
    let side = |s: &str| -> Result<Option<f64>, String> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        s.parse::<f64>()
            .map(Some)
            .map_err(|e| format!("bad range bound '{s}': {e}"))
    };
    Ok(EnergyRange {
        start: side(low)?,
        end: side(upp)?,
    })
}

impl FitOptions {
    /// Overlay the given flags on `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(range) = self.range {
            if let Some(start) = range.start {
                settings.fit.range_start = start;
            }
            if let Some(end) = range.end {
                settings.fit.range_end = end;
            }
        }
        if let Some(k) = self.shape_order {
            settings.fit.n_shape = k;
        }
        if let Some(e0) = self.e0 {
            settings.fit.e0 = e0;
        }
        if let Some(seed) = &self.shape_seed {
            settings.fit.shape_seed = Some(seed.clone());
        }
        if let Some(mode) = self.seed_mode {
            settings.fit.shape_seed_mode = mode;
        }
        if let Some(mode) = self.scale_seed {
            settings.fit.scale_seed = mode;
        }
        settings.fit.effective_variance |= self.effective_variance;
        settings.fit.normalize_errors |= self.normalize_errors;
        if let Some(n) = self.max_iterations {
            settings.solver.max_iterations = n;
        }
        if let Some(anchor) = self.anchor {
            settings.curve.anchor = anchor;
        }
        if let Some(factor) = self.scale_factor {
            settings.curve.scale_factor = Some(factor);
        }
        if let Some(step) = self.step {
            settings.curve.step = step;
        }
    }
}

impl OutputOptions {
    /// Overlay the given flags on `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        let out = &mut settings.output;
        if let Some(path) = &self.svg {
            out.svg = Some(path.clone());
        }
        if self.no_svg {
            out.svg = None;
        }
        if let Some(path) = &self.fit_result {
            out.fit_result = Some(path.clone());
        }
        if self.no_fit_result {
            out.fit_result = None;
        }
        if let Some(path) = &self.curve_json {
            out.curve_json = Some(path.clone());
        }
        if let Some(path) = &self.curve_csv {
            out.curve_csv = Some(path.clone());
        }
        if self.no_plot {
            out.plot = false;
        }
        if let Some(w) = self.width {
            out.plot_width = w;
        }
        if let Some(h) = self.height {
            out.plot_height = h;
        }
    }
}
