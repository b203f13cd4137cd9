//! Run settings.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults
//! 2. an optional TOML file (`--config geff.toml`)
//! 3. `GEFF_`-prefixed environment variables, with `__` separating nested
//!    keys (e.g. `GEFF_FIT__N_SHAPE=4`, `GEFF_LOG__LEVEL=debug`)
//!
//! Command-line flags are applied on top by the app layer.

use std::path::{Path, PathBuf};

use config::Config as eConfig;
use serde::{Deserialize, Serialize};

use crate::domain::{DEFAULT_E0, DEFAULT_E_END, DEFAULT_E_START, DEFAULT_SHAPE_SEED, FitConfig, ScaleSeed, ShapeSeed};
use crate::error::AppError;
use crate::fit::LmConfig;
use crate::plot::DEFAULT_SVG_SIZE;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub fit: FitSettings,
    pub solver: LmConfig,
    pub curve: CurveSettings,
    pub output: OutputSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitSettings {
    pub e0: f64,
    pub range_start: f64,
    pub range_end: f64,
    pub n_shape: usize,
    pub shape_seed: Option<Vec<f64>>,
    pub shape_seed_mode: ShapeSeed,
    pub scale_seed: ScaleSeed,
    pub effective_variance: bool,
    pub normalize_errors: bool,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            e0: DEFAULT_E0,
            range_start: DEFAULT_E_START,
            range_end: DEFAULT_E_END,
            n_shape: DEFAULT_SHAPE_SEED.len(),
            shape_seed: None,
            shape_seed_mode: ShapeSeed::Fixed,
            scale_seed: ScaleSeed::Unity,
            effective_variance: false,
            normalize_errors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CurveSettings {
    /// Source whose units the curve is expressed in.
    pub anchor: usize,
    /// External multiplier; `None` gives the absolute curve.
    pub scale_factor: Option<f64>,
    /// Grid step (keV) of the exported curve.
    pub step: f64,
}

impl Default for CurveSettings {
    fn default() -> Self {
        Self {
            anchor: 0,
            scale_factor: None,
            step: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    /// Text fit report; `None` disables it.
    pub fit_result: Option<PathBuf>,
    pub svg: Option<PathBuf>,
    pub curve_json: Option<PathBuf>,
    pub curve_csv: Option<PathBuf>,
    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
    pub svg_width: u32,
    pub svg_height: u32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            fit_result: Some(PathBuf::from("fitresult.txt")),
            svg: Some(PathBuf::from("efficiency.svg")),
            curve_json: None,
            curve_csv: None,
            plot: true,
            plot_width: 100,
            plot_height: 25,
            svg_width: DEFAULT_SVG_SIZE.0,
            svg_height: DEFAULT_SVG_SIZE.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load defaults, then `path` (when given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = eConfig::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let parsed = builder
            .add_source(
                config::Environment::with_prefix("GEFF")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::new(2, format!("Failed to read settings: {e}")))?;

        parsed
            .try_deserialize()
            .map_err(|e| AppError::new(2, format!("Invalid settings: {e}")))
    }

    /// Engine configuration described by these settings.
    pub fn fit_config(&self) -> FitConfig {
        FitConfig {
            e0: self.fit.e0,
            e_start: self.fit.range_start,
            e_end: self.fit.range_end,
            n_shape: self.fit.n_shape,
            shape_seed: self.fit.shape_seed.clone(),
            shape_seed_mode: self.fit.shape_seed_mode,
            scale_seed: self.fit.scale_seed,
            expected_sources: None,
            effective_variance: self.fit.effective_variance,
            normalize_errors: self.fit.normalize_errors,
            solver: self.solver,
        }
    }
}
