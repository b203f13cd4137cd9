//! The fitted efficiency curve as a function of energy.
//!
//! The curve is expressed in the units of an anchor source `a`:
//!
//! ```text
//! central(E) = shape(E) / n_a · m
//! σ(E)       = shape(E) / n_a · sqrt(pᵀ C p) · m
//! ```
//!
//! With the default [`CurveScale::Absolute`] the multiplier `m` is the fitted
//! `n_a` itself, which yields the absolute shape. A caller-supplied factor
//! expresses the curve in any other unit system.

use nalgebra::DMatrix;

use crate::curve::propagate::relative_variance;
use crate::domain::{CurvePoint, FitResult};
use crate::error::FitError;
use crate::models::shape;

/// Largest number of points a curve grid may hold.
pub const MAX_GRID_POINTS: usize = 10_000_000;

/// Multiplier applied after dividing by the anchor scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurveScale {
    /// Multiply back by the anchor's fitted scale.
    Absolute,
    /// Multiply by an external factor.
    Factor(f64),
}

#[derive(Debug, Clone)]
pub struct EfficiencyCurve {
    e0: f64,
    coeffs: Vec<f64>,
    shape_cov: DMatrix<f64>,
    anchor: usize,
    anchor_scale: f64,
    multiplier: f64,
}

impl EfficiencyCurve {
    /// Absolute curve anchored on source 0.
    pub fn from_fit(fit: &FitResult) -> Result<Self, FitError> {
        Self::anchored(fit, 0, CurveScale::Absolute)
    }

    pub fn anchored(fit: &FitResult, anchor: usize, scale: CurveScale) -> Result<Self, FitError> {
        let anchor_scale = fit.scale(anchor).ok_or_else(|| {
            FitError::config(format!(
                "anchor source #{anchor} out of range ({} sources)",
                fit.layout().n_sources
            ))
        })?;
        let multiplier = match scale {
            CurveScale::Absolute => anchor_scale,
            CurveScale::Factor(m) if m.is_finite() && m > 0.0 => m,
            CurveScale::Factor(m) => {
                return Err(FitError::config(format!("curve scale factor must be finite and > 0, got {m}")));
            }
        };

        Ok(Self {
            e0: fit.e0(),
            coeffs: fit.shape_params().to_vec(),
            shape_cov: fit.shape_covariance(),
            anchor,
            anchor_scale,
            multiplier,
        })
    }

    pub fn anchor(&self) -> usize {
        self.anchor
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn value(&self, energy: f64) -> f64 {
        shape(energy, &self.coeffs, self.e0) / self.anchor_scale * self.multiplier
    }

    pub fn sigma(&self, energy: f64) -> f64 {
        self.value(energy) * relative_variance(energy, &self.shape_cov, self.e0).sqrt()
    }

    pub fn eval(&self, energy: f64) -> CurvePoint {
        let central = self.value(energy);
        let sigma = central * relative_variance(energy, &self.shape_cov, self.e0).sqrt();
        CurvePoint {
            energy,
            central,
            lower: central - sigma,
            upper: central + sigma,
        }
    }

    /// Lazy evaluation at `start, start + step, …` up to and including `end`.
    pub fn grid(&self, start: f64, end: f64, step: f64) -> Result<CurveGridIter<'_>, FitError> {
        if !(start.is_finite() && start > 0.0) {
            return Err(FitError::config(format!("grid start must be finite and > 0, got {start}")));
        }
        if !(step.is_finite() && step > 0.0) {
            return Err(FitError::config(format!("grid step must be finite and > 0, got {step}")));
        }
        if !(end.is_finite() && end > start) {
            return Err(FitError::config(format!("grid end {end} must exceed start {start}")));
        }

        // Tolerate rounding so that `end` itself is included when it lies on the grid.
        let intervals = ((end - start) / step + 1e-9).floor();
        if !(intervals < MAX_GRID_POINTS as f64) {
            return Err(FitError::config(format!(
                "grid {start}..{end} keV in steps of {step} keV exceeds {MAX_GRID_POINTS} points"
            )));
        }
        let len = intervals as usize + 1;
        Ok(CurveGridIter {
            curve: self,
            start,
            step,
            index: 0,
            len,
        })
    }
}

/// Grid iterator. Energies are `start + index · step`, so cloning restarts it
/// without accumulated rounding.
#[derive(Debug, Clone)]
pub struct CurveGridIter<'a> {
    curve: &'a EfficiencyCurve,
    start: f64,
    step: f64,
    index: usize,
    len: usize,
}

impl Iterator for CurveGridIter<'_> {
    type Item = CurvePoint;

    fn next(&mut self) -> Option<CurvePoint> {
        if self.index >= self.len {
            return None;
        }
        let energy = self.start + self.index as f64 * self.step;
        self.index += 1;
        Some(self.curve.eval(energy))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.len - self.index;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for CurveGridIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurveGrid, EfficiencyPoint, FitConfig, MeasurementSet, NormalizationPoint, Source};
    use crate::fit::fit_global;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn scenario_fit() -> FitResult {
        let set = MeasurementSet::new(vec![
            Source::new(vec![
                EfficiencyPoint::new(100.0, 1.0, 50.0, 2.0),
                EfficiencyPoint::new(200.0, 1.0, 40.0, 2.0),
            ])
            .with_normalization(vec![NormalizationPoint::new(1.0, 0.05)]),
            Source::new(vec![
                EfficiencyPoint::new(100.0, 1.0, 25.0, 1.0),
                EfficiencyPoint::new(200.0, 1.0, 20.0, 1.0),
            ]),
        ]);
        fit_global(set, &FitConfig::with_shape_order(2)).unwrap()
    }

    #[test]
    fn scenario_band_is_not_degenerate() {
        let curve = EfficiencyCurve::from_fit(&scenario_fit()).unwrap();
        let p = curve.eval(100.0);
        assert_relative_eq!(p.central, 50.0, max_relative = 1e-6);
        assert!(p.sigma() > 0.0);
        assert!(p.lower < p.central && p.central < p.upper);
    }

    #[test]
    fn absolute_scale_is_independent_of_anchor() {
        let fit = scenario_fit();
        let a = EfficiencyCurve::anchored(&fit, 0, CurveScale::Absolute).unwrap();
        let b = EfficiencyCurve::anchored(&fit, 1, CurveScale::Absolute).unwrap();
        assert_relative_eq!(a.value(300.0), b.value(300.0), max_relative = 1e-12);
    }

    #[test]
    fn external_factor_rescales_curve_and_band() {
        let fit = scenario_fit();
        let abs = EfficiencyCurve::anchored(&fit, 1, CurveScale::Absolute).unwrap();
        let unit = EfficiencyCurve::anchored(&fit, 1, CurveScale::Factor(1.0)).unwrap();
        // Source 1 units: half the absolute efficiency.
        assert_relative_eq!(unit.value(150.0) * fit.scale(1).unwrap(), abs.value(150.0), max_relative = 1e-12);
        assert_relative_eq!(unit.sigma(150.0) * fit.scale(1).unwrap(), abs.sigma(150.0), max_relative = 1e-12);
    }

    #[test]
    fn rejects_bad_anchor_and_factor() {
        let fit = scenario_fit();
        assert!(matches!(
            EfficiencyCurve::anchored(&fit, 2, CurveScale::Absolute),
            Err(FitError::Configuration { .. })
        ));
        assert!(EfficiencyCurve::anchored(&fit, 0, CurveScale::Factor(-1.0)).is_err());
    }

    #[test]
    fn grid_is_finite_inclusive_and_restartable() {
        let fit = scenario_fit();
        let curve = EfficiencyCurve::from_fit(&fit).unwrap();
        let iter = curve.grid(100.0, 1000.0, 100.0).unwrap();
        assert_eq!(iter.len(), 10);
        let first: CurveGrid = iter.clone().collect();
        let second: CurveGrid = iter.collect();
        assert_eq!(first.energy, second.energy);
        assert_eq!(first.energy.last().copied(), Some(1000.0));
    }

    #[test]
    fn grid_validates_bounds() {
        let fit = scenario_fit();
        let curve = EfficiencyCurve::from_fit(&fit).unwrap();
        assert!(curve.grid(0.0, 100.0, 1.0).is_err());
        assert!(curve.grid(10.0, 100.0, 0.0).is_err());
        assert!(curve.grid(100.0, 100.0, 1.0).is_err());
        assert!(curve.grid(100.0, 50.0, 1.0).is_err());
        assert!(matches!(curve.grid(1.0, 1e30, 1.0), Err(FitError::Configuration { .. })));
        assert!(curve.grid(1.0, 4500.0, 1e-4).is_err());
        assert_eq!(curve.grid(1.0, 4500.0, 0.5).unwrap().len(), 8999);
    }

    proptest! {
        #[test]
        fn band_brackets_central(energy in 1.0f64..4500.0) {
            let fit = scenario_fit();
            let p = EfficiencyCurve::from_fit(&fit).unwrap().eval(energy);
            prop_assert!(p.lower <= p.central && p.central <= p.upper);
            prop_assert!(p.sigma() >= 0.0);
        }
    }
}
