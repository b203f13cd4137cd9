//! Joint chi-square over all sources.
//!
//! ```text
//! χ²(a, n) = Σ_s Σ_eff [ (y − shape(E; a) / n_s)² / σy² ]
//!          + Σ_s Σ_norm [ (N − n_s)² / σN² ]
//! ```
//!
//! The objective owns the assembled datasets and maps the flat parameter
//! vector `[a₀ … a_{K-1} | n₀ … n_{S-1}]` onto them. Pinned scales are held
//! fixed: the minimizer only sees the free subset, and `expand` rebuilds the
//! full vector with pinned values in place.
//!
//! Every evaluation is a pure fold from parameters to residuals; sources are
//! always visited in index order so diagnostics are reproducible.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::{EfficiencyPoint, ParamLayout};
use crate::fit::dataset::{AssembledData, SourceData};
use crate::fit::minimizer::LeastSquaresProblem;
use crate::models::{fill_design_row, shape, shape_slope};

#[derive(Debug, Clone)]
pub struct GlobalObjective {
    data: AssembledData,
    layout: ParamLayout,
    e0: f64,
    effective_variance: bool,
    /// Indices into the full vector that the minimizer varies.
    free: Vec<usize>,
    /// Pinned values, indexed like the full vector.
    pinned: Vec<Option<f64>>,
    n_residuals: usize,
}

impl GlobalObjective {
    pub fn new(data: AssembledData, n_shape: usize, e0: f64, effective_variance: bool) -> Self {
        let layout = ParamLayout::new(n_shape, data.n_sources());
        let mut pinned = vec![None; layout.len()];
        for s in &data.sources {
            pinned[layout.scale_index(s.index)] = s.pinned_scale;
        }
        let free = (0..layout.len()).filter(|&i| pinned[i].is_none()).collect();
        let n_residuals = data.n_residuals();

        Self {
            data,
            layout,
            e0,
            effective_variance,
            free,
            pinned,
            n_residuals,
        }
    }

    pub fn layout(&self) -> ParamLayout {
        self.layout
    }

    pub fn data(&self) -> &AssembledData {
        &self.data
    }

    pub fn e0(&self) -> f64 {
        self.e0
    }

    pub fn free_indices(&self) -> &[usize] {
        &self.free
    }

    /// `true` for every parameter held fixed.
    pub fn fixed_mask(&self) -> Vec<bool> {
        self.pinned.iter().map(Option::is_some).collect()
    }

    /// Whether source `s` has a free scale factor.
    pub fn scale_is_free(&self, source: usize) -> bool {
        self.pinned[self.layout.scale_index(source)].is_none()
    }

    /// Rebuild the full parameter vector from the free subset.
    pub fn expand(&self, free: &[f64]) -> Vec<f64> {
        let mut full: Vec<f64> = self.pinned.iter().map(|p| p.unwrap_or(0.0)).collect();
        for (&idx, &v) in self.free.iter().zip(free) {
            full[idx] = v;
        }
        full
    }

    /// Extract the free subset, replacing pinned entries by their pinned values.
    pub fn restrict(&self, full: &[f64]) -> Vec<f64> {
        self.free.iter().map(|&i| full[i]).collect()
    }

    /// Apply pins to a full vector (used when seeding).
    pub fn apply_pins(&self, full: &mut [f64]) {
        for (slot, pin) in full.iter_mut().zip(&self.pinned) {
            if let Some(v) = pin {
                *slot = *v;
            }
        }
    }

    /// Total chi-square at the full parameter vector.
    pub fn chi_square(&self, params: &[f64]) -> f64 {
        self.data
            .sources
            .iter()
            .map(|s| self.source_chi_square(s, params))
            .sum()
    }

    /// Per-source chi-square contributions, in source order.
    pub fn contributions(&self, params: &[f64]) -> Vec<f64> {
        self.data
            .sources
            .par_iter()
            .map(|s| self.source_chi_square(s, params))
            .collect()
    }

    /// Statistical weight `1/σ²` of an efficiency observation at `params`.
    pub fn efficiency_weight(&self, point: &EfficiencyPoint, source: usize, params: &[f64]) -> f64 {
        let sigma = self.efficiency_sigma(point, source, params);
        1.0 / (sigma * sigma)
    }

    fn source_chi_square(&self, source: &SourceData, params: &[f64]) -> f64 {
        let coeffs = &params[self.layout.shape_range()];
        let scale = params[self.layout.scale_index(source.index)];

        let eff: f64 = source
            .efficiency
            .iter()
            .map(|p| {
                let r = (p.eff - shape(p.energy, coeffs, self.e0) / scale)
                    / self.efficiency_sigma(p, source.index, params);
                r * r
            })
            .sum();
        let norm: f64 = source
            .normalization
            .iter()
            .map(|n| {
                let r = (n.value - scale) / n.error;
                r * r
            })
            .sum();

        eff + norm
    }

    fn efficiency_sigma(&self, p: &EfficiencyPoint, source: usize, params: &[f64]) -> f64 {
        if !self.effective_variance || p.energy_err == 0.0 {
            return p.eff_err;
        }
        let coeffs = &params[self.layout.shape_range()];
        let scale = params[self.layout.scale_index(source)];
        let slope = shape_slope(p.energy, coeffs, self.e0) / scale;
        (p.eff_err * p.eff_err + (slope * p.energy_err).powi(2)).sqrt()
    }
}

impl LeastSquaresProblem for GlobalObjective {
    fn n_params(&self) -> usize {
        self.free.len()
    }

    fn n_residuals(&self) -> usize {
        self.n_residuals
    }

    fn residuals(&self, free: &DVector<f64>) -> DVector<f64> {
        let params = self.expand(free.as_slice());
        let coeffs = &params[self.layout.shape_range()];

        let mut out = DVector::zeros(self.n_residuals);
        let mut row = 0;
        for s in &self.data.sources {
            let scale = params[self.layout.scale_index(s.index)];
            for p in &s.efficiency {
                let sigma = self.efficiency_sigma(p, s.index, &params);
                out[row] = (p.eff - shape(p.energy, coeffs, self.e0) / scale) / sigma;
                row += 1;
            }
            for n in &s.normalization {
                out[row] = (n.value - scale) / n.error;
                row += 1;
            }
        }
        out
    }

    fn jacobian(&self, free: &DVector<f64>) -> DMatrix<f64> {
        let params = self.expand(free.as_slice());
        let k = self.layout.n_shape;
        let coeffs = &params[self.layout.shape_range()];

        // Column of each full-vector index in the free Jacobian.
        let mut column = vec![None; self.layout.len()];
        for (c, &idx) in self.free.iter().enumerate() {
            column[idx] = Some(c);
        }

        let mut jac = DMatrix::zeros(self.n_residuals, self.free.len());
        let mut powers = vec![0.0; k];
        let mut row = 0;
        for s in &self.data.sources {
            let scale_idx = self.layout.scale_index(s.index);
            let scale = params[scale_idx];
            for p in &s.efficiency {
                // σ_eff is held constant within one linearization.
                let sigma = self.efficiency_sigma(p, s.index, &params);
                let pred = shape(p.energy, coeffs, self.e0) / scale;
                fill_design_row(p.energy, self.e0, &mut powers);
                for (i, &pw) in powers.iter().enumerate() {
                    if let Some(c) = column[i] {
                        jac[(row, c)] = -pred * pw / sigma;
                    }
                }
                if let Some(c) = column[scale_idx] {
                    jac[(row, c)] = pred / (scale * sigma);
                }
                row += 1;
            }
            for n in &s.normalization {
                if let Some(c) = column[scale_idx] {
                    jac[(row, c)] = -1.0 / n.error;
                }
                row += 1;
            }
        }
        jac
    }

    /// Free scale factors must stay strictly positive: `shape/n` has a pole
    /// at `n = 0` and flattens to zero beyond it.
    fn is_feasible(&self, free: &DVector<f64>) -> bool {
        let scales = self.layout.scale_range();
        self.free
            .iter()
            .zip(free.iter())
            .all(|(idx, &v)| !scales.contains(idx) || v > 0.0)
    }
}
