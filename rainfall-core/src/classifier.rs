//! Inference-only recurrent rain classifier.
//!
//! Weights are exported from the trained model as JSON, in the kernel layout
//! `(inputs, 4 * units)` with gates ordered input, forget, cell, output.

use std::{fs, path::Path};

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, PipelineResult},
    model::FEATURE_COUNT,
};

pub trait RainfallClassifier: Send + Sync + std::fmt::Debug {
    /// Probability of rain for the first sequence in a `(batch, time, 11)` tensor.
    fn predict(&self, input: &Array3<f64>) -> PipelineResult<f64>;
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Linear,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
            Activation::Linear => x,
        }
    }
}

/// Row-major matrix as stored in the weight file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMatrix {
    pub shape: (usize, usize),
    pub data: Vec<f64>,
}

impl StoredMatrix {
    fn to_array(&self, what: &str) -> PipelineResult<Array2<f64>> {
        Array2::from_shape_vec(self.shape, self.data.clone()).map_err(|e| {
            PipelineError::InvalidInput(format!("{what}: {e} (shape {:?})", self.shape))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLstmLayer {
    pub kernel: StoredMatrix,
    pub recurrent_kernel: StoredMatrix,
    pub bias: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDenseLayer {
    pub kernel: StoredMatrix,
    pub bias: Vec<f64>,
    pub activation: Activation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    pub lstm: Vec<StoredLstmLayer>,
    pub dense: Vec<StoredDenseLayer>,
}

#[derive(Debug, Clone)]
struct LstmLayer {
    kernel: Array2<f64>,
    recurrent: Array2<f64>,
    bias: Array1<f64>,
    units: usize,
}

impl LstmLayer {
    /// Run the whole sequence and return every hidden state, `(time, units)`.
    fn forward(&self, sequence: ArrayView2<'_, f64>) -> Array2<f64> {
        let u = self.units;
        let mut h = Array1::<f64>::zeros(u);
        let mut c = Array1::<f64>::zeros(u);
        let mut outputs = Array2::<f64>::zeros((sequence.nrows(), u));

        for (t, x) in sequence.outer_iter().enumerate() {
            let z = x.dot(&self.kernel) + h.dot(&self.recurrent) + &self.bias;

            let i = z.slice(s![0..u]).mapv(sigmoid);
            let f = z.slice(s![u..2 * u]).mapv(sigmoid);
            let g = z.slice(s![2 * u..3 * u]).mapv(f64::tanh);
            let o = z.slice(s![3 * u..4 * u]).mapv(sigmoid);

            c = &f * &c + &i * &g;
            h = &o * &c.mapv(f64::tanh);
            outputs.row_mut(t).assign(&h);
        }

        outputs
    }
}

#[derive(Debug, Clone)]
struct DenseLayer {
    kernel: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

impl DenseLayer {
    fn forward(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        (x.dot(&self.kernel) + &self.bias).mapv(|v| self.activation.apply(v))
    }
}

#[derive(Debug, Clone)]
pub struct LstmClassifier {
    lstm: Vec<LstmLayer>,
    dense: Vec<DenseLayer>,
}

impl LstmClassifier {
    pub fn from_artifact(artifact: &ClassifierArtifact) -> PipelineResult<Self> {
        if artifact.lstm.is_empty() {
            return Err(PipelineError::InvalidInput("classifier has no recurrent layer".into()));
        }

        let mut width = FEATURE_COUNT;
        let mut lstm = Vec::with_capacity(artifact.lstm.len());
        for (n, stored) in artifact.lstm.iter().enumerate() {
            let kernel = stored.kernel.to_array(&format!("lstm[{n}].kernel"))?;
            let recurrent = stored.recurrent_kernel.to_array(&format!("lstm[{n}].recurrent_kernel"))?;
            let units = kernel.ncols() / 4;

            let consistent = kernel.nrows() == width
                && kernel.ncols() == 4 * units
                && units > 0
                && recurrent.dim() == (units, 4 * units)
                && stored.bias.len() == 4 * units;
            if !consistent {
                return Err(PipelineError::InvalidInput(format!(
                    "lstm[{n}] weights do not chain: input width {width}, kernel {:?}, recurrent {:?}, bias {}",
                    kernel.dim(),
                    recurrent.dim(),
                    stored.bias.len()
                )));
            }

            lstm.push(LstmLayer { kernel, recurrent, bias: Array1::from(stored.bias.clone()), units });
            width = units;
        }

        let mut dense = Vec::with_capacity(artifact.dense.len());
        for (n, stored) in artifact.dense.iter().enumerate() {
            let kernel = stored.kernel.to_array(&format!("dense[{n}].kernel"))?;
            if kernel.nrows() != width || stored.bias.len() != kernel.ncols() {
                return Err(PipelineError::InvalidInput(format!(
                    "dense[{n}] weights do not chain: input width {width}, kernel {:?}, bias {}",
                    kernel.dim(),
                    stored.bias.len()
                )));
            }
            width = kernel.ncols();
            dense.push(DenseLayer {
                kernel,
                bias: Array1::from(stored.bias.clone()),
                activation: stored.activation,
            });
        }

        if width != 1 {
            return Err(PipelineError::InvalidInput(format!(
                "classifier must end in a single output, found {width}"
            )));
        }

        Ok(Self { lstm, dense })
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let artifact_err = |reason: String| PipelineError::Artifact { path: path.to_path_buf(), reason };

        let contents = fs::read_to_string(path).map_err(|e| artifact_err(e.to_string()))?;
        let artifact: ClassifierArtifact =
            serde_json::from_str(&contents).map_err(|e| artifact_err(e.to_string()))?;

        Self::from_artifact(&artifact).map_err(|e| artifact_err(e.to_string()))
    }

    fn check_input(input: &Array3<f64>) -> PipelineResult<()> {
        let (batch, time, width) = input.dim();
        if width != FEATURE_COUNT {
            return Err(PipelineError::Shape { expected: FEATURE_COUNT, found: width });
        }
        if batch == 0 || time == 0 {
            return Err(PipelineError::InvalidInput(format!(
                "empty input tensor {:?}",
                input.dim()
            )));
        }
        Ok(())
    }

    fn forward_one(&self, sequence: ArrayView2<'_, f64>) -> f64 {
        let mut hidden = sequence.to_owned();
        for layer in &self.lstm {
            hidden = layer.forward(hidden.view());
        }

        let mut x = hidden.row(hidden.nrows() - 1).to_owned();
        for layer in &self.dense {
            x = layer.forward(x.view());
        }
        x[0].clamp(0.0, 1.0)
    }

    /// One probability per sequence in the batch.
    pub fn predict_batch(&self, input: &Array3<f64>) -> PipelineResult<Vec<f64>> {
        Self::check_input(input)?;
        Ok(input.axis_iter(Axis(0)).map(|seq| self.forward_one(seq)).collect())
    }
}

impl RainfallClassifier for LstmClassifier {
    fn predict(&self, input: &Array3<f64>) -> PipelineResult<f64> {
        Self::check_input(input)?;
        Ok(self.forward_one(input.index_axis(Axis(0), 0)))
    }
}
