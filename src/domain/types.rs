//! Shared domain types.
//!
//! These types flow through the whole pipeline:
//!
//! - input observations (`EfficiencyPoint`, `NormalizationPoint`, `Source`, `MeasurementSet`)
//! - engine configuration (`FitConfig`, `ShapeSeed`, `ScaleSeed`)
//! - the flat parameter layout (`ParamLayout`)
//! - fit outputs (`FitResult`, `FitDiagnostics`, `CurvePoint`, `CurveFile`)

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::fit::{LmConfig, Termination};

/// Reference energy `E₀` (keV) of the log-polynomial.
pub const DEFAULT_E0: f64 = 350.0;

/// Default fit/plot range (keV).
pub const DEFAULT_E_START: f64 = 1.0;
pub const DEFAULT_E_END: f64 = 4500.0;

/// Upper bound on the number of shape coefficients.
///
/// Ten coefficients is already a 9th order polynomial in `ln(E/E₀)`; anything
/// beyond that is rejected instead of silently fitted.
pub const MAX_SHAPE_COEFFS: usize = 10;

/// Starting shape coefficients `a, b, c, d, e`.
pub const DEFAULT_SHAPE_SEED: [f64; 5] = [2.75, -0.7, -0.04, 0.11, -0.04];

/// One efficiency observation: energy (keV) and relative efficiency (arb. units).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyPoint {
    pub energy: f64,
    pub energy_err: f64,
    pub eff: f64,
    pub eff_err: f64,
}

impl EfficiencyPoint {
    pub fn new(energy: f64, energy_err: f64, eff: f64, eff_err: f64) -> Self {
        Self {
            energy,
            energy_err,
            eff,
            eff_err,
        }
    }
}

impl From<(f64, f64, f64, f64)> for EfficiencyPoint {
    fn from((energy, energy_err, eff, eff_err): (f64, f64, f64, f64)) -> Self {
        Self::new(energy, energy_err, eff, eff_err)
    }
}

/// One independent measurement of a source's scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationPoint {
    pub value: f64,
    pub error: f64,
}

impl NormalizationPoint {
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }
}

impl From<(f64, f64)> for NormalizationPoint {
    fn from((value, error): (f64, f64)) -> Self {
        Self::new(value, error)
    }
}

/// A calibration source: efficiency data plus optional normalization data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub efficiency: Vec<EfficiencyPoint>,
    pub normalization: Vec<NormalizationPoint>,
}

impl Source {
    pub fn new(efficiency: Vec<EfficiencyPoint>) -> Self {
        Self {
            efficiency,
            normalization: Vec::new(),
        }
    }

    pub fn with_normalization(mut self, normalization: Vec<NormalizationPoint>) -> Self {
        self.normalization = normalization;
        self
    }
}

/// All sources of one calibration, in source-index order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSet {
    sources: Vec<Source>,
}

impl MeasurementSet {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    /// Build from parallel per-source lists as produced by the file loader.
    ///
    /// Sources without a normalization list get an empty one. More
    /// normalization lists than efficiency lists cannot be attributed to a
    /// source and are rejected.
    pub fn from_columns(
        efficiency: Vec<Vec<EfficiencyPoint>>,
        normalization: Vec<Vec<NormalizationPoint>>,
    ) -> Result<Self, FitError> {
        if normalization.len() > efficiency.len() {
            return Err(FitError::insufficient(format!(
                "{} normalization lists for {} efficiency sources",
                normalization.len(),
                efficiency.len()
            )));
        }

        let mut norms = normalization.into_iter();
        let sources = efficiency
            .into_iter()
            .map(|eff| Source::new(eff).with_normalization(norms.next().unwrap_or_default()))
            .collect();
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// True when at least one source carries a normalization observation.
    pub fn has_normalization(&self) -> bool {
        self.sources.iter().any(|s| !s.normalization.is_empty())
    }
}

/// How the shape coefficients are seeded before minimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ShapeSeed {
    /// Documented constants (`DEFAULT_SHAPE_SEED`, or the configured seed).
    Fixed,
    /// Weighted linear fit of `ln y` against powers of `ln(E/E₀)`.
    LogLinear,
}

/// How the per-source scale factors are seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleSeed {
    /// Every scale starts at 1.0.
    Unity,
    /// Every scale starts at the first normalization value in the set.
    FirstNormalization,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    /// Reference energy `E₀` (keV).
    pub e0: f64,
    /// Fit range (keV). Observations outside are dropped.
    pub e_start: f64,
    pub e_end: f64,
    /// Number of shape coefficients `K`.
    pub n_shape: usize,
    /// Explicit shape seed; must have length `n_shape` when set.
    pub shape_seed: Option<Vec<f64>>,
    pub shape_seed_mode: ShapeSeed,
    pub scale_seed: ScaleSeed,
    /// When set, the measurement set must contain exactly this many sources.
    pub expected_sources: Option<usize>,
    /// Fold energy errors into the efficiency errors.
    pub effective_variance: bool,
    /// Scale the covariance by `χ²/ndf`.
    pub normalize_errors: bool,
    pub solver: LmConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            e0: DEFAULT_E0,
            e_start: DEFAULT_E_START,
            e_end: DEFAULT_E_END,
            n_shape: DEFAULT_SHAPE_SEED.len(),
            shape_seed: None,
            shape_seed_mode: ShapeSeed::Fixed,
            scale_seed: ScaleSeed::Unity,
            expected_sources: None,
            effective_variance: false,
            normalize_errors: false,
            solver: LmConfig::default(),
        }
    }
}

impl FitConfig {
    /// Config with `n_shape` coefficients and everything else at defaults.
    pub fn with_shape_order(n_shape: usize) -> Self {
        Self {
            n_shape,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), FitError> {
        if self.n_shape == 0 || self.n_shape > MAX_SHAPE_COEFFS {
            return Err(FitError::config(format!(
                "shape coefficient count must be in 1..={MAX_SHAPE_COEFFS}, got {}",
                self.n_shape
            )));
        }
        if let Some(seed) = &self.shape_seed {
            if seed.len() != self.n_shape {
                return Err(FitError::config(format!(
                    "shape seed has {} coefficients, expected {}",
                    seed.len(),
                    self.n_shape
                )));
            }
            if seed.iter().any(|v| !v.is_finite()) {
                return Err(FitError::config("shape seed contains non-finite values"));
            }
        }
        if !(self.e0.is_finite() && self.e0 > 0.0) {
            return Err(FitError::config(format!(
                "reference energy must be finite and > 0, got {}",
                self.e0
            )));
        }
        if !(self.e_start.is_finite() && self.e_end.is_finite() && self.e_end > self.e_start) {
            return Err(FitError::config(format!(
                "invalid fit range {}:{}",
                self.e_start, self.e_end
            )));
        }
        self.solver.validate()
    }

    /// Seed shape coefficients for the fixed seeding mode.
    ///
    /// The default seed is truncated or zero-padded to `n_shape`.
    pub fn fixed_shape_seed(&self) -> Vec<f64> {
        match &self.shape_seed {
            Some(seed) => seed.clone(),
            None => (0..self.n_shape)
                .map(|i| DEFAULT_SHAPE_SEED.get(i).copied().unwrap_or(0.0))
                .collect(),
        }
    }
}

/// Offsets of the flat parameter vector.
///
/// `[a₀ … a_{K-1} | n₀ … n_{S-1}]`: shape coefficients occupy `0..K`, the
/// scale factor of source `s` sits at `K + s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamLayout {
    pub n_shape: usize,
    pub n_sources: usize,
}

impl ParamLayout {
    pub fn new(n_shape: usize, n_sources: usize) -> Self {
        Self { n_shape, n_sources }
    }

    pub fn len(&self) -> usize {
        self.n_shape + self.n_sources
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape_range(&self) -> std::ops::Range<usize> {
        0..self.n_shape
    }

    pub fn scale_range(&self) -> std::ops::Range<usize> {
        self.n_shape..self.len()
    }

    pub fn scale_index(&self, source: usize) -> usize {
        self.n_shape + source
    }

    /// Parameter names: `a, b, c, …` for the shape and `n_0, n_1, …` for scales.
    pub fn names(&self) -> Vec<String> {
        let shape = (0..self.n_shape).map(|i| char::from(b'a' + i as u8).to_string());
        let scales = (0..self.n_sources).map(|s| format!("n_{s}"));
        shape.chain(scales).collect()
    }
}

/// Where the absolute scale of the fit comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizationMode {
    /// At least one source carried measured normalization data.
    Measured,
    /// No normalization data at all: source 0 was fixed to `n = 1 ± 0`.
    Substituted,
}

/// Per-source counts and chi-square contribution at the optimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDiagnostics {
    pub index: usize,
    /// Efficiency points used in the fit.
    pub n_efficiency: usize,
    /// Efficiency points dropped (outside the range or zero error).
    pub n_dropped: usize,
    pub n_normalization: usize,
    /// Shape coefficients plus this source's scale, when free.
    pub free_params: usize,
    pub chi_square: f64,
}

/// Diagnostics collected while assembling and minimizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub sources: Vec<SourceDiagnostics>,
    pub initial_chi_square: f64,
    pub iterations: usize,
    pub initial_params: Vec<f64>,
    /// Criterion that stopped the minimizer.
    pub termination: Termination,
    /// Scaled gradient at the optimum.
    pub final_gradient: f64,
}

/// Output of the global fit. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    layout: ParamLayout,
    e0: f64,
    params: Vec<f64>,
    covariance: DMatrix<f64>,
    fixed: Vec<bool>,
    chi_square: f64,
    n_observations: usize,
    normalization: NormalizationMode,
    diagnostics: FitDiagnostics,
}

impl FitResult {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        layout: ParamLayout,
        e0: f64,
        params: Vec<f64>,
        covariance: DMatrix<f64>,
        fixed: Vec<bool>,
        chi_square: f64,
        n_observations: usize,
        normalization: NormalizationMode,
        diagnostics: FitDiagnostics,
    ) -> Self {
        Self {
            layout,
            e0,
            params,
            covariance,
            fixed,
            chi_square,
            n_observations,
            normalization,
            diagnostics,
        }
    }

    pub fn layout(&self) -> ParamLayout {
        self.layout
    }

    pub fn e0(&self) -> f64 {
        self.e0
    }

    /// Full parameter vector `[shape | scales]`.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn shape_params(&self) -> &[f64] {
        &self.params[self.layout.shape_range()]
    }

    pub fn scales(&self) -> &[f64] {
        &self.params[self.layout.scale_range()]
    }

    pub fn scale(&self, source: usize) -> Option<f64> {
        self.scales().get(source).copied()
    }

    /// `(K+S)×(K+S)` covariance. Rows/columns of fixed parameters are zero.
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// The `K×K` shape block of the covariance.
    pub fn shape_covariance(&self) -> DMatrix<f64> {
        let k = self.layout.n_shape;
        self.covariance.view((0, 0), (k, k)).into_owned()
    }

    /// 1σ parameter errors (square roots of the covariance diagonal).
    pub fn errors(&self) -> Vec<f64> {
        self.covariance.diagonal().iter().map(|v| v.max(0.0).sqrt()).collect()
    }

    /// Correlation matrix; entries involving fixed parameters are zero.
    pub fn correlation(&self) -> DMatrix<f64> {
        let err = self.errors();
        DMatrix::from_fn(self.layout.len(), self.layout.len(), |i, j| {
            let d = err[i] * err[j];
            if d > 0.0 { self.covariance[(i, j)] / d } else { 0.0 }
        })
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        self.fixed.get(index).copied().unwrap_or(false)
    }

    pub fn chi_square(&self) -> f64 {
        self.chi_square
    }

    /// Total observations, including a substituted anchor observation.
    pub fn n_observations(&self) -> usize {
        self.n_observations
    }

    /// Degrees of freedom: observations minus `K+S`.
    pub fn ndf(&self) -> i64 {
        self.n_observations as i64 - self.layout.len() as i64
    }

    pub fn reduced_chi_square(&self) -> Option<f64> {
        let ndf = self.ndf();
        (ndf > 0).then(|| self.chi_square / ndf as f64)
    }

    pub fn normalization(&self) -> NormalizationMode {
        self.normalization
    }

    pub fn diagnostics(&self) -> &FitDiagnostics {
        &self.diagnostics
    }

    pub fn param_names(&self) -> Vec<String> {
        self.layout.names()
    }
}

/// One evaluated point of the efficiency curve and its 1σ band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub energy: f64,
    pub central: f64,
    pub lower: f64,
    pub upper: f64,
}

impl CurvePoint {
    pub fn sigma(&self) -> f64 {
        0.5 * (self.upper - self.lower)
    }
}

/// A saved curve file (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveFile {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub e0: f64,
    pub n_shape: usize,
    pub anchor_source: usize,
    pub normalization: NormalizationMode,
    pub param_names: Vec<String>,
    pub params: Vec<f64>,
    pub errors: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    pub chi_square: f64,
    pub ndf: i64,
    pub grid: CurveGrid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveGrid {
    pub energy: Vec<f64>,
    pub central: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl CurveGrid {
    pub fn points(&self) -> impl Iterator<Item = CurvePoint> + '_ {
        self.energy
            .iter()
            .zip(&self.central)
            .zip(self.lower.iter().zip(&self.upper))
            .map(|((&energy, &central), (&lower, &upper))| CurvePoint {
                energy,
                central,
                lower,
                upper,
            })
    }
}

impl FromIterator<CurvePoint> for CurveGrid {
    fn from_iter<I: IntoIterator<Item = CurvePoint>>(iter: I) -> Self {
        let mut grid = CurveGrid::default();
        for p in iter {
            grid.energy.push(p.energy);
            grid.central.push(p.central);
            grid.lower.push(p.lower);
            grid.upper.push(p.upper);
        }
        grid
    }
}
