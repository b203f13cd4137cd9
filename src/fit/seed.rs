//! Starting point of the minimization.
//!
//! Scales are seeded first (unity or the first normalization value), then
//! the shape either takes the configured constants or comes from a weighted
//! linear fit of `ln(n_s · y)` on powers of `ln(E/E₀)` at those scales.
//! Pinned scales always start at their pinned value.

use tracing::{debug, warn};

use crate::domain::{FitConfig, ScaleSeed, ShapeSeed};
use crate::fit::objective::GlobalObjective;
use crate::math::{log_powers, solve_weighted_least_squares};

/// Full initial parameter vector `[shape | scales]`.
pub fn initial_params(objective: &GlobalObjective, config: &FitConfig) -> Vec<f64> {
    let layout = objective.layout();
    let mut params = vec![0.0; layout.len()];

    let scale = match config.scale_seed {
        ScaleSeed::Unity => 1.0,
        ScaleSeed::FirstNormalization => first_normalization(objective).unwrap_or(1.0),
    };
    params[layout.scale_range()].fill(scale);
    objective.apply_pins(&mut params);

    let shape = match config.shape_seed_mode {
        ShapeSeed::Fixed => config.fixed_shape_seed(),
        ShapeSeed::LogLinear => log_linear_shape(objective, &params).unwrap_or_else(|| {
            warn!("log-linear shape seed failed; falling back to fixed coefficients");
            config.fixed_shape_seed()
        }),
    };
    params[layout.shape_range()].copy_from_slice(&shape);

    debug!(?params, "initial parameters");
    params
}

fn first_normalization(objective: &GlobalObjective) -> Option<f64> {
    objective.data().sources.iter().find_map(|s| {
        s.normalization
            .first()
            .map(|n| n.value)
            .or(s.pinned_scale)
    })
}

fn log_linear_shape(objective: &GlobalObjective, params: &[f64]) -> Option<Vec<f64>> {
    let layout = objective.layout();
    let k = layout.n_shape;

    let mut rows = Vec::new();
    let mut y = Vec::new();
    let mut w = Vec::new();
    for s in &objective.data().sources {
        let scale = params[layout.scale_index(s.index)];
        for p in s.efficiency.iter().filter(|p| p.eff > 0.0) {
            rows.push(log_powers(p.energy, objective.e0(), k));
            y.push((scale * p.eff).ln());
            // σ(ln y) ≈ σy / y
            w.push((p.eff / p.eff_err).powi(2));
        }
    }
    if rows.len() < k {
        return None;
    }

    let beta = solve_weighted_least_squares(&rows, &y, &w)?;
    Some(beta.iter().copied().collect())
}
