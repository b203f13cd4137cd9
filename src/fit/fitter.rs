//! Global fit orchestration.
//!
//! Given a measurement set and a configuration we:
//! - assemble per-source datasets (range filter, pins, substitution)
//! - check that the free parameters are constrained at all
//! - seed and minimize the joint chi-square
//! - derive the covariance from the weighted Jacobian at the optimum
//!
//! and return an immutable [`FitResult`].

use nalgebra::{DMatrix, DVector};
use tracing::info;

use crate::domain::{FitConfig, FitDiagnostics, FitResult, MeasurementSet, SourceDiagnostics};
use crate::error::FitError;
use crate::fit::dataset::assemble;
use crate::fit::minimizer::{LeastSquaresProblem, LevenbergMarquardt};
use crate::fit::objective::GlobalObjective;
use crate::fit::seed::initial_params;
use crate::math::{invert_spd, symmetrize};

/// Fit the shared shape and per-source scales to every source at once.
pub fn fit_global(set: MeasurementSet, config: &FitConfig) -> Result<FitResult, FitError> {
    config.validate()?;

    let data = assemble(set, config)?;
    let normalization = data.normalization;
    let objective = GlobalObjective::new(data, config.n_shape, config.e0, config.effective_variance);
    let layout = objective.layout();

    info!(
        "global fit: {} sources, {} shape coefficients, E0 = {} keV",
        layout.n_sources, layout.n_shape, config.e0
    );
    for s in &objective.data().sources {
        let free = layout.n_shape + usize::from(objective.scale_is_free(s.index));
        info!(
            "source #{} has {} efficiency data points and {} free parameters",
            s.index,
            s.efficiency.len(),
            free
        );
        info!("source #{} has {} normalization data points", s.index, s.n_normalization());
    }

    let n_free = objective.n_params();
    let n_residuals = objective.n_residuals();
    if n_residuals <= n_free {
        return Err(FitError::insufficient(format!(
            "{n_residuals} weighted observations cannot constrain {n_free} free parameters"
        )));
    }

    let initial = initial_params(&objective, config);
    let initial_chi_square = objective.chi_square(&initial);
    info!(chi2 = initial_chi_square, "initial chi-square");

    let solver = LevenbergMarquardt::new(config.solver);
    let outcome = solver.minimize(&objective, DVector::from_vec(objective.restrict(&initial)))?;
    let params = objective.expand(outcome.params.as_slice());

    for (s, &n) in params[layout.scale_range()].iter().enumerate() {
        if !(n.is_finite() && n > 0.0) {
            return Err(FitError::Convergence {
                iterations: outcome.iterations,
                chi_square: outcome.chi_square,
                reason: format!("scale factor n_{s} converged to non-positive value {n}"),
            });
        }
    }

    let jac = objective.jacobian(&outcome.params);
    let free_cov = invert_spd(&jac.tr_mul(&jac)).map_err(FitError::singular)?;
    let mut covariance = expand_covariance(&free_cov, objective.free_indices(), layout.len());

    let chi_square = objective.chi_square(&params);
    let n_observations = objective.data().n_observations();
    let ndf = n_observations as i64 - layout.len() as i64;
    if config.normalize_errors && ndf > 0 {
        let factor = chi_square / ndf as f64;
        info!(factor, "scaling covariance by chi2/ndf");
        covariance *= factor;
    }

    let contributions = objective.contributions(&params);
    let sources = objective
        .data()
        .sources
        .iter()
        .zip(contributions)
        .map(|(s, chi_square)| SourceDiagnostics {
            index: s.index,
            n_efficiency: s.efficiency.len(),
            n_dropped: s.n_dropped,
            n_normalization: s.n_normalization(),
            free_params: layout.n_shape + usize::from(objective.scale_is_free(s.index)),
            chi_square,
        })
        .collect();

    info!(
        chi2 = chi_square,
        ndf,
        iterations = outcome.iterations,
        termination = ?outcome.termination,
        "global fit converged"
    );

    Ok(FitResult::new(
        layout,
        config.e0,
        params,
        covariance,
        objective.fixed_mask(),
        chi_square,
        n_observations,
        normalization,
        FitDiagnostics {
            sources,
            initial_chi_square,
            iterations: outcome.iterations,
            initial_params: initial,
            termination: outcome.termination,
            final_gradient: outcome.gradient,
        },
    ))
}

/// Embed the free-parameter covariance in the full `(K+S)×(K+S)` matrix.
fn expand_covariance(free_cov: &DMatrix<f64>, free: &[usize], n: usize) -> DMatrix<f64> {
    let mut full = DMatrix::zeros(n, n);
    for (a, &i) in free.iter().enumerate() {
        for (b, &j) in free.iter().enumerate() {
            full[(i, j)] = free_cov[(a, b)];
        }
    }
    symmetrize(&full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EfficiencyPoint, NormalizationMode, NormalizationPoint, Source};
    use crate::fit::LmConfig;
    use crate::math::sorted_eigenvalues;
    use crate::models::shape;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use rand_distr::Normal;

    const TRUTH: [f64; 4] = [2.9, -0.65, -0.05, 0.08];

    fn scenario() -> MeasurementSet {
        MeasurementSet::new(vec![
            Source::new(vec![
                EfficiencyPoint::new(100.0, 1.0, 50.0, 2.0),
                EfficiencyPoint::new(200.0, 1.0, 40.0, 2.0),
            ])
            .with_normalization(vec![NormalizationPoint::new(1.0, 0.05)]),
            Source::new(vec![
                EfficiencyPoint::new(100.0, 1.0, 25.0, 1.0),
                EfficiencyPoint::new(200.0, 1.0, 20.0, 1.0),
            ]),
        ])
    }

    /// Sources at interleaved energies, exact or with 1% gaussian noise.
    fn synthetic(scales: &[f64], noise: Option<u64>, with_norm: bool) -> MeasurementSet {
        let mut rng = noise.map(StdRng::seed_from_u64);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let sources = scales
            .iter()
            .enumerate()
            .map(|(s, &n)| {
                let points = (0..10)
                    .map(|i| {
                        let e = 60.0 * (1.35_f64).powi(i) * (1.0 + 0.07 * s as f64);
                        let y = shape(e, &TRUTH, 350.0) / n;
                        let dy = 0.01 * y;
                        let jitter = rng.as_mut().map_or(0.0, |r| r.sample(normal));
                        EfficiencyPoint::new(e, 0.5, y + jitter * dy, dy)
                    })
                    .collect();
                let source = Source::new(points);
                if with_norm && s == 0 {
                    source.with_normalization(vec![NormalizationPoint::new(n, 0.01 * n)])
                } else {
                    source
                }
            })
            .collect();
        MeasurementSet::new(sources)
    }

    #[test]
    fn two_source_scenario_recovers_relative_scale() {
        let fit = fit_global(scenario(), &FitConfig::with_shape_order(2)).unwrap();
        assert_relative_eq!(fit.scale(0).unwrap(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(fit.scale(1).unwrap(), 2.0, epsilon = 1e-6);
        assert_eq!(fit.normalization(), NormalizationMode::Measured);
        assert_eq!(fit.n_observations(), 5);
        assert_eq!(fit.ndf(), 1);
        assert!(fit.chi_square() < 1e-9);
        assert!(fit.errors().iter().all(|e| *e > 0.0));
    }

    #[test]
    fn zero_noise_recovers_generating_parameters() {
        let scales = [1.0, 2.5, 0.4];
        let fit = fit_global(synthetic(&scales, None, true), &FitConfig::with_shape_order(4)).unwrap();
        for (got, want) in fit.shape_params().iter().zip(TRUTH) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
        for (got, want) in fit.scales().iter().zip(scales) {
            assert_relative_eq!(*got, want, epsilon = 1e-6);
        }
        assert!(fit.chi_square() < 1e-9);
        assert_eq!(fit.diagnostics().sources.len(), 3);
    }

    #[test]
    fn missing_normalization_keeps_scales_positive() {
        let fit = fit_global(synthetic(&[1.0, 3.0], Some(7), false), &FitConfig::with_shape_order(4)).unwrap();
        assert_eq!(fit.normalization(), NormalizationMode::Substituted);
        assert!(fit.scales().iter().all(|n| *n > 0.0));
        assert_eq!(fit.scale(0), Some(1.0));
        assert!(fit.is_fixed(4));
        assert!(!fit.is_fixed(5));
        assert_eq!(fit.covariance()[(4, 4)], 0.0);
        assert_eq!(fit.errors()[4], 0.0);
        assert_relative_eq!(fit.scale(1).unwrap(), 3.0, epsilon = 0.05);
        // 20 efficiency points plus the substituted anchor
        assert_eq!(fit.n_observations(), 21);
    }

    #[test]
    fn covariance_is_symmetric_positive_semidefinite() {
        let fit = fit_global(synthetic(&[1.0, 2.0, 0.5], Some(11), true), &FitConfig::with_shape_order(4)).unwrap();
        let cov = fit.covariance();
        assert_eq!(cov, &cov.transpose());
        let scale = cov.diagonal().max();
        assert!(sorted_eigenvalues(cov).iter().all(|&ev| ev >= -1e-12 * scale));
    }

    #[test]
    fn larger_sigma_widens_shape_covariance() {
        let cfg = FitConfig::with_shape_order(4);
        let base = fit_global(synthetic(&[1.0, 2.0], None, true), &cfg).unwrap();

        let mut loose = synthetic(&[1.0, 2.0], None, true);
        let widened = loose.sources()[1]
            .efficiency
            .iter()
            .map(|p| EfficiencyPoint::new(p.energy, p.energy_err, p.eff, 3.0 * p.eff_err))
            .collect();
        let norm = loose.sources()[1].normalization.clone();
        let mut sources = loose.sources().to_vec();
        sources[1] = Source::new(widened).with_normalization(norm);
        loose = MeasurementSet::new(sources);
        let wide = fit_global(loose, &cfg).unwrap();

        let (b, w) = (base.shape_covariance(), wide.shape_covariance());
        for i in 0..4 {
            assert!(w[(i, i)] >= b[(i, i)] * (1.0 - 1e-9));
        }
        assert!((0..4).any(|i| w[(i, i)] > b[(i, i)] * 1.01));
    }

    #[test]
    fn normalize_errors_scales_by_reduced_chi_square() {
        let set = || synthetic(&[1.0, 2.0], Some(3), true);
        let plain = fit_global(set(), &FitConfig::with_shape_order(3)).unwrap();
        let cfg = FitConfig {
            normalize_errors: true,
            ..FitConfig::with_shape_order(3)
        };
        let scaled = fit_global(set(), &cfg).unwrap();
        let factor = plain.reduced_chi_square().unwrap();
        assert_relative_eq!(
            scaled.covariance()[(0, 0)],
            plain.covariance()[(0, 0)] * factor,
            max_relative = 1e-9
        );
    }

    #[test]
    fn single_observation_is_insufficient() {
        let set = MeasurementSet::new(vec![Source::new(vec![EfficiencyPoint::new(300.0, 1.0, 10.0, 1.0)])]);
        let err = fit_global(set, &FitConfig::with_shape_order(1)).unwrap_err();
        assert!(matches!(err, FitError::InsufficientData { .. }));
    }

    #[test]
    fn too_many_shape_coefficients_is_configuration_error() {
        let err = fit_global(scenario(), &FitConfig::with_shape_order(11)).unwrap_err();
        assert!(matches!(err, FitError::Configuration { .. }));
    }

    #[test]
    fn exhausted_budget_is_convergence_error() {
        let cfg = FitConfig {
            solver: LmConfig {
                max_iterations: 1,
                ..LmConfig::default()
            },
            ..FitConfig::with_shape_order(4)
        };
        let err = fit_global(synthetic(&[1.0, 2.0], Some(5), true), &cfg).unwrap_err();
        assert!(matches!(err, FitError::Convergence { .. }));
    }

    #[test]
    fn wide_scale_ratio_without_normalization_stays_positive() {
        let scales = [1.0, 4.7, 0.2];
        let fit = fit_global(synthetic(&scales, None, false), &FitConfig::with_shape_order(4)).unwrap();
        assert_eq!(fit.normalization(), NormalizationMode::Substituted);
        for (got, want) in fit.scales().iter().zip(scales) {
            assert_relative_eq!(*got, want, max_relative = 1e-6);
        }
        assert!(fit.chi_square() < 1e-9);
    }

    #[test]
    fn small_scale_next_to_large_one_is_recovered() {
        let scales = [1.0, 4.707125723682541, 0.2];
        let fit = fit_global(synthetic(&scales, None, true), &FitConfig::with_shape_order(4)).unwrap();
        for (got, want) in fit.scales().iter().zip(scales) {
            assert_relative_eq!(*got, want, max_relative = 1e-6);
        }
        assert!(fit.diagnostics().iterations > 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn recovers_arbitrary_relative_scales(n1 in 0.2f64..5.0, n2 in 0.2f64..5.0) {
            let fit = fit_global(synthetic(&[1.0, n1, n2], None, true), &FitConfig::with_shape_order(4)).unwrap();
            prop_assert!((fit.scale(1).unwrap() / n1 - 1.0).abs() < 1e-6);
            prop_assert!((fit.scale(2).unwrap() / n2 - 1.0).abs() < 1e-6);
            let cov = fit.covariance();
            prop_assert!(sorted_eigenvalues(cov).iter().all(|&ev| ev >= -1e-12 * cov.diagonal().max()));
        }
    }
}
