//! Pre-fitted feature scaling.

use std::{fs, path::Path};

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, PipelineResult},
    model::FEATURE_COUNT,
};

pub trait Scaler: Send + Sync + std::fmt::Debug {
    fn transform(&self, features: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>>;

    fn inverse_transform(&self, scaled: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>>;
}

/// Persisted scaler parameters, one entry per feature column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalerArtifact {
    MinMax {
        data_min: Vec<f64>,
        data_max: Vec<f64>,
        #[serde(default = "default_feature_range")]
        feature_range: (f64, f64),
    },
    Standard {
        mean: Vec<f64>,
        std: Vec<f64>,
    },
}

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

fn check_width(found: usize) -> PipelineResult<()> {
    if found == FEATURE_COUNT {
        Ok(())
    } else {
        Err(PipelineError::Shape { expected: FEATURE_COUNT, found })
    }
}

/// Column-wise `x * scale + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineScaler {
    scale: Array1<f64>,
    offset: Array1<f64>,
}

impl AffineScaler {
    pub fn from_artifact(artifact: &ScalerArtifact) -> PipelineResult<Self> {
        match artifact {
            ScalerArtifact::MinMax { data_min, data_max, feature_range } => {
                check_width(data_min.len())?;
                check_width(data_max.len())?;
                let (lo, hi) = *feature_range;
                if hi <= lo {
                    return Err(PipelineError::InvalidInput(format!(
                        "feature range ({lo}, {hi}) is empty"
                    )));
                }

                let scale: Array1<f64> = data_min
                    .iter()
                    .zip(data_max)
                    .map(|(min, max)| {
                        let range = max - min;
                        // Constant columns scale by one, as scikit-learn does.
                        let range = if range == 0.0 { 1.0 } else { range };
                        (hi - lo) / range
                    })
                    .collect();
                let offset = Array1::from_iter(
                    data_min.iter().zip(scale.iter()).map(|(min, s)| lo - min * s),
                );
                Ok(Self { scale, offset })
            }
            ScalerArtifact::Standard { mean, std } => {
                check_width(mean.len())?;
                check_width(std.len())?;

                let scale: Array1<f64> =
                    std.iter().map(|s| if *s == 0.0 { 1.0 } else { 1.0 / s }).collect();
                let offset =
                    Array1::from_iter(mean.iter().zip(scale.iter()).map(|(m, s)| -m * s));
                Ok(Self { scale, offset })
            }
        }
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let artifact_err = |reason: String| PipelineError::Artifact { path: path.to_path_buf(), reason };

        let contents = fs::read_to_string(path).map_err(|e| artifact_err(e.to_string()))?;
        let artifact: ScalerArtifact =
            serde_json::from_str(&contents).map_err(|e| artifact_err(e.to_string()))?;

        Self::from_artifact(&artifact).map_err(|e| artifact_err(e.to_string()))
    }
}

impl Scaler for AffineScaler {
    fn transform(&self, features: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>> {
        check_width(features.ncols())?;
        Ok(&features * &self.scale + &self.offset)
    }

    fn inverse_transform(&self, scaled: ArrayView2<'_, f64>) -> PipelineResult<Array2<f64>> {
        check_width(scaled.ncols())?;
        Ok((&scaled - &self.offset) / &self.scale)
    }
}
