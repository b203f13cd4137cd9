//! Shared fit pipeline used by the `fit` and `demo` commands.
//!
//! measurement set -> global fit -> anchored curve -> grid + rescaled points
//!
//! The commands only differ in where the measurement set comes from and can
//! focus on presentation.

use tracing::info;

use crate::curve::{CurveScale, EfficiencyCurve};
use crate::domain::{CurveFile, CurveGrid, FitResult, MeasurementSet};
use crate::error::AppError;
use crate::fit::fit_global;
use crate::io::build_curve_file;
use crate::report::{ScaledPoint, rescale_points};
use crate::settings::Settings;

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub set: MeasurementSet,
    pub fit: FitResult,
    pub curve: EfficiencyCurve,
    pub grid: CurveGrid,
    pub points: Vec<ScaledPoint>,
}

impl RunOutput {
    /// Curve JSON document for this run.
    pub fn curve_file(&self) -> CurveFile {
        build_curve_file(&self.fit, &self.curve, self.grid.clone())
    }
}

/// Fit `set` and evaluate the curve over the configured range.
pub fn run_fit(set: MeasurementSet, settings: &Settings) -> Result<RunOutput, AppError> {
    let config = settings.fit_config();
    let fit = fit_global(set.clone(), &config)?;

    let scale = match settings.curve.scale_factor {
        Some(factor) => CurveScale::Factor(factor),
        None => CurveScale::Absolute,
    };
    let curve = EfficiencyCurve::anchored(&fit, settings.curve.anchor, scale)?;
    let grid: CurveGrid = curve
        .grid(config.e_start, config.e_end, settings.curve.step)?
        .collect();
    info!(
        "curve anchored on source #{} (multiplier {:.6}), {} grid points",
        curve.anchor(),
        curve.multiplier(),
        grid.energy.len()
    );

    let points = rescale_points(&set, &fit, &curve);
    Ok(RunOutput {
        set,
        fit,
        curve,
        grid,
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DEMO_SOURCES, SampleConfig, generate_sample};

    #[test]
    fn demo_pipeline_produces_consistent_outputs() {
        let sample = generate_sample(&DEMO_SOURCES, &SampleConfig::default()).unwrap();
        let mut settings = Settings::default();
        settings.fit.range_end = 2000.0;
        settings.curve.step = 10.0;

        let run = run_fit(sample.set, &settings).unwrap();
        let n_points: usize = run.set.sources().iter().map(|s| s.efficiency.len()).sum();
        assert_eq!(run.points.len(), n_points);
        assert_eq!(run.grid.energy.len(), 200);
        assert_eq!(run.grid.energy[0], 1.0);
        for p in run.grid.points() {
            assert!(p.lower <= p.central && p.central <= p.upper);
        }
        assert_eq!(run.curve_file().grid, run.grid);
    }

    #[test]
    fn bad_anchor_is_a_config_error() {
        let sample = generate_sample(&DEMO_SOURCES, &SampleConfig::default()).unwrap();
        let mut settings = Settings::default();
        settings.curve.anchor = 9;
        assert_eq!(run_fit(sample.set, &settings).unwrap_err().exit_code(), 2);
    }
}
