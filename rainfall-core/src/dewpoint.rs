//! Dew point estimation for stations that only report relative humidity.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Which estimator the normalizer uses.
///
/// `Linear` is the approximation the classifier was trained against and must
/// stay the default for result parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DewPointMode {
    #[default]
    Linear,
    Strict,
}

/// `temperature - (100 - humidity) / 5`, applied as-is to any input.
pub fn estimate(temperature_c: f64, relative_humidity_pct: f64) -> f64 {
    temperature_c - ((100.0 - relative_humidity_pct) / 5.0)
}

/// Same formula, but rejects humidity outside `[0, 100]` and non-finite values.
pub fn estimate_strict(temperature_c: f64, relative_humidity_pct: f64) -> PipelineResult<f64> {
    if !temperature_c.is_finite() || !relative_humidity_pct.is_finite() {
        return Err(PipelineError::InvalidInput(format!(
            "dew point inputs must be finite (temperature={temperature_c}, humidity={relative_humidity_pct})"
        )));
    }
    if !(0.0..=100.0).contains(&relative_humidity_pct) {
        return Err(PipelineError::InvalidInput(format!(
            "relative humidity {relative_humidity_pct}% is outside 0..=100"
        )));
    }
    Ok(estimate(temperature_c, relative_humidity_pct))
}

impl DewPointMode {
    pub fn estimate(self, temperature_c: f64, relative_humidity_pct: f64) -> PipelineResult<f64> {
        match self {
            DewPointMode::Linear => Ok(estimate(temperature_c, relative_humidity_pct)),
            DewPointMode::Strict => estimate_strict(temperature_c, relative_humidity_pct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_formula_matches_reference_value() {
        assert_eq!(estimate(28.0, 78.0), 28.0 - (22.0 / 5.0));
        assert!((estimate(28.0, 78.0) - 23.6).abs() < 1e-12);
    }

    #[test]
    fn saturated_air_has_dew_point_equal_to_temperature() {
        for t in [-10.0, 0.0, 15.5, 40.0] {
            assert_eq!(estimate(t, 100.0), t);
        }
    }

    #[test]
    fn linear_mode_does_not_clamp_out_of_range_humidity() {
        assert_eq!(estimate(20.0, 120.0), 24.0);
        assert_eq!(DewPointMode::Linear.estimate(20.0, -5.0).unwrap(), -1.0);
    }

    #[test]
    fn strict_mode_rejects_out_of_range_humidity() {
        let err = estimate_strict(20.0, 120.0).unwrap_err();
        assert!(err.to_string().contains("outside 0..=100"));
        assert!(DewPointMode::Strict.estimate(20.0, f64::NAN).is_err());
        assert_eq!(DewPointMode::Strict.estimate(28.0, 75.0).unwrap(), 23.0);
    }
}
