//! Assembly of the per-source fit datasets.
//!
//! Turns a caller-owned `MeasurementSet` into validated, range-restricted
//! datasets the objective can sum over:
//!
//! - efficiency points outside `[e_start, e_end]` are dropped
//! - efficiency points with zero error carry no weight and are dropped
//! - a normalization point with zero error pins that source's scale exactly
//! - with no normalization data anywhere, source 0 is pinned to `n = 1`
//!
//! Every drop and substitution is logged; nothing is silently discarded.

use tracing::{info, warn};

use crate::domain::{EfficiencyPoint, FitConfig, MeasurementSet, NormalizationMode, NormalizationPoint};
use crate::error::FitError;

/// Validated data of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceData {
    pub index: usize,
    pub efficiency: Vec<EfficiencyPoint>,
    /// Normalization points with a positive error (they enter the chi-square).
    pub normalization: Vec<NormalizationPoint>,
    /// Exact scale, from a zero-error normalization point or the substitution.
    pub pinned_scale: Option<f64>,
    pub n_dropped: usize,
}

impl SourceData {
    /// Normalization observations attributed to this source, pins included.
    pub fn n_normalization(&self) -> usize {
        self.normalization.len() + usize::from(self.pinned_scale.is_some())
    }
}

/// All sources, ready for the objective.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledData {
    pub sources: Vec<SourceData>,
    pub normalization: NormalizationMode,
}

impl AssembledData {
    /// Observations entering the degrees of freedom (pins included).
    pub fn n_observations(&self) -> usize {
        self.sources
            .iter()
            .map(|s| s.efficiency.len() + s.n_normalization())
            .sum()
    }

    /// Observations that constrain free parameters through a residual.
    pub fn n_residuals(&self) -> usize {
        self.sources
            .iter()
            .map(|s| s.efficiency.len() + s.normalization.len())
            .sum()
    }

    pub fn n_sources(&self) -> usize {
        self.sources.len()
    }
}

/// Validate and assemble the measurement set.
pub fn assemble(set: MeasurementSet, config: &FitConfig) -> Result<AssembledData, FitError> {
    if set.is_empty() {
        return Err(FitError::insufficient("no calibration sources supplied"));
    }
    if let Some(expected) = config.expected_sources {
        if expected != set.len() {
            return Err(FitError::insufficient(format!(
                "configured for {expected} sources but {} were supplied",
                set.len()
            )));
        }
    }

    let has_normalization = set.has_normalization();
    let mut sources = Vec::with_capacity(set.len());

    for (index, source) in set.sources().iter().enumerate() {
        let mut efficiency = Vec::with_capacity(source.efficiency.len());
        let mut n_out_of_range = 0usize;
        let mut n_zero_error = 0usize;

        for p in &source.efficiency {
            validate_efficiency(index, p)?;
            if p.energy < config.e_start || p.energy > config.e_end {
                n_out_of_range += 1;
                continue;
            }
            if p.eff_err == 0.0 {
                n_zero_error += 1;
                continue;
            }
            efficiency.push(*p);
        }

        if n_out_of_range > 0 {
            info!(
                source = index,
                dropped = n_out_of_range,
                "dropped efficiency points outside {}:{} keV",
                config.e_start,
                config.e_end
            );
        }
        if n_zero_error > 0 {
            warn!(source = index, dropped = n_zero_error, "dropped efficiency points with zero error");
        }
        if efficiency.is_empty() {
            return Err(FitError::insufficient(format!(
                "source #{index} has no usable efficiency observations"
            )));
        }

        let mut normalization = Vec::with_capacity(source.normalization.len());
        let mut pinned_scale = None;
        for n in &source.normalization {
            validate_normalization(index, n)?;
            if n.error > 0.0 {
                normalization.push(*n);
            } else if pinned_scale.is_none() {
                info!(source = index, value = n.value, "scale pinned by zero-error normalization");
                pinned_scale = Some(n.value);
            } else {
                warn!(
                    source = index,
                    value = n.value,
                    "ignoring additional zero-error normalization"
                );
            }
        }

        sources.push(SourceData {
            index,
            efficiency,
            normalization,
            pinned_scale,
            n_dropped: n_out_of_range + n_zero_error,
        });
    }

    let normalization = if has_normalization {
        NormalizationMode::Measured
    } else {
        warn!("no normalization data supplied; fixing source #0 to n = 1 and continuing");
        sources[0].pinned_scale = Some(1.0);
        NormalizationMode::Substituted
    };

    Ok(AssembledData {
        sources,
        normalization,
    })
}

fn validate_efficiency(index: usize, p: &EfficiencyPoint) -> Result<(), FitError> {
    let invalid = |message: String| FitError::InvalidObservation {
        source_index: index,
        message,
    };
    if !(p.energy.is_finite() && p.energy > 0.0) {
        return Err(invalid(format!("energy must be finite and > 0, got {}", p.energy)));
    }
    if !p.eff.is_finite() {
        return Err(invalid(format!("non-finite efficiency at {} keV", p.energy)));
    }
    if !(p.energy_err.is_finite() && p.energy_err >= 0.0) {
        return Err(invalid(format!("invalid energy error {} at {} keV", p.energy_err, p.energy)));
    }
    if !(p.eff_err.is_finite() && p.eff_err >= 0.0) {
        return Err(invalid(format!("invalid efficiency error {} at {} keV", p.eff_err, p.energy)));
    }
    Ok(())
}

fn validate_normalization(index: usize, n: &NormalizationPoint) -> Result<(), FitError> {
    if !(n.value.is_finite() && n.value > 0.0) {
        return Err(FitError::InvalidObservation {
            source_index: index,
            message: format!("normalization must be finite and > 0, got {}", n.value),
        });
    }
    if !(n.error.is_finite() && n.error >= 0.0) {
        return Err(FitError::InvalidObservation {
            source_index: index,
            message: format!("invalid normalization error {}", n.error),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Source;

    fn eff(e: f64, y: f64, dy: f64) -> EfficiencyPoint {
        EfficiencyPoint::new(e, 0.5, y, dy)
    }

    #[test]
    fn substitutes_anchor_when_no_normalization() {
        let set = MeasurementSet::new(vec![
            Source::new(vec![eff(100.0, 50.0, 2.0)]),
            Source::new(vec![eff(200.0, 20.0, 1.0)]),
        ]);
        let data = assemble(set, &FitConfig::default()).unwrap();
        assert_eq!(data.normalization, NormalizationMode::Substituted);
        assert_eq!(data.sources[0].pinned_scale, Some(1.0));
        assert_eq!(data.sources[1].pinned_scale, None);
        assert_eq!(data.n_observations(), 3);
        assert_eq!(data.n_residuals(), 2);
    }

    #[test]
    fn drops_out_of_range_and_zero_error_points() {
        let set = MeasurementSet::new(vec![Source::new(vec![
            eff(0.5, 10.0, 1.0),
            eff(100.0, 50.0, 0.0),
            eff(300.0, 30.0, 1.0),
            eff(9000.0, 1.0, 0.1),
        ])
        .with_normalization(vec![NormalizationPoint::new(1.0, 0.1)])]);
        let data = assemble(set, &FitConfig::default()).unwrap();
        assert_eq!(data.sources[0].efficiency.len(), 1);
        assert_eq!(data.sources[0].n_dropped, 3);
        assert_eq!(data.normalization, NormalizationMode::Measured);
    }

    #[test]
    fn source_emptied_by_range_is_insufficient() {
        let mut cfg = FitConfig::default();
        cfg.e_start = 500.0;
        let set = MeasurementSet::new(vec![Source::new(vec![eff(100.0, 50.0, 2.0)])]);
        assert!(matches!(assemble(set, &cfg), Err(FitError::InsufficientData { .. })));
    }

    #[test]
    fn source_count_mismatch_is_insufficient() {
        let cfg = FitConfig {
            expected_sources: Some(3),
            ..FitConfig::default()
        };
        let set = MeasurementSet::new(vec![Source::new(vec![eff(100.0, 50.0, 2.0)])]);
        assert!(matches!(assemble(set, &cfg), Err(FitError::InsufficientData { .. })));
    }

    #[test]
    fn zero_error_normalization_pins_scale() {
        let set = MeasurementSet::new(vec![Source::new(vec![eff(100.0, 50.0, 2.0)])
            .with_normalization(vec![NormalizationPoint::new(0.8, 0.0)])]);
        let data = assemble(set, &FitConfig::default()).unwrap();
        assert_eq!(data.sources[0].pinned_scale, Some(0.8));
        assert!(data.sources[0].normalization.is_empty());
        assert_eq!(data.normalization, NormalizationMode::Measured);
    }

    #[test]
    fn negative_error_is_invalid() {
        let set = MeasurementSet::new(vec![Source::new(vec![eff(100.0, 50.0, -2.0)])]);
        assert!(matches!(
            assemble(set, &FitConfig::default()),
            Err(FitError::InvalidObservation { source_index: 0, .. })
        ));
    }
}
