//! Reshaping scaled feature rows into the classifier's `(batch, time, features)` layout.

use ndarray::{Array1, Array3, ArrayView2, Axis, s};

use crate::{
    error::{PipelineError, PipelineResult},
    model::{FEATURE_COUNT, FeatureVector},
};

/// Training windows and the label that follows each one.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceBatch {
    pub inputs: Array3<f64>,
    pub labels: Array1<f64>,
}

fn check_rows(rows: &ArrayView2<'_, f64>, timesteps: usize, needed: usize) -> PipelineResult<()> {
    if timesteps == 0 {
        return Err(PipelineError::InvalidInput("timesteps must be at least 1".into()));
    }
    if rows.ncols() != FEATURE_COUNT {
        return Err(PipelineError::Shape { expected: FEATURE_COUNT, found: rows.ncols() });
    }
    if rows.nrows() < needed {
        return Err(PipelineError::InsufficientHistory { needed, available: rows.nrows() });
    }
    Ok(())
}

/// `(1, timesteps, 11)` tensor built from the most recent `timesteps` rows.
pub fn shape(rows: ArrayView2<'_, f64>, timesteps: usize) -> PipelineResult<Array3<f64>> {
    check_rows(&rows, timesteps, timesteps)?;

    let start = rows.nrows() - timesteps;
    let window = rows.slice(s![start.., ..]).to_owned();
    Ok(window.insert_axis(Axis(0)))
}

/// Single-point path: one vector becomes a `(1, 1, 11)` tensor.
pub fn shape_single(vector: &FeatureVector) -> Array3<f64> {
    let arr = vector.to_array();
    Array3::from_shape_fn((1, 1, FEATURE_COUNT), |(_, _, k)| arr[k])
}

/// Sliding windows of length `timesteps`; window `i` is labelled with
/// `labels[i + timesteps]`.
pub fn windows(
    rows: ArrayView2<'_, f64>,
    labels: &[f64],
    timesteps: usize,
) -> PipelineResult<SequenceBatch> {
    check_rows(&rows, timesteps, timesteps + 1)?;
    if labels.len() != rows.nrows() {
        return Err(PipelineError::InvalidInput(format!(
            "{} labels for {} rows",
            labels.len(),
            rows.nrows()
        )));
    }

    let count = rows.nrows() - timesteps;
    let inputs = Array3::from_shape_fn((count, timesteps, FEATURE_COUNT), |(i, t, k)| {
        rows[[i + t, k]]
    });
    let labels = Array1::from(labels[timesteps..].to_vec());

    Ok(SequenceBatch { inputs, labels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn rows(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, FEATURE_COUNT), |(i, k)| (i * 100 + k) as f64)
    }

    #[test]
    fn single_vector_becomes_rank_three() {
        let v = FeatureVector::from_slice(&[1.0; FEATURE_COUNT]).unwrap();
        assert_eq!(shape_single(&v).dim(), (1, 1, FEATURE_COUNT));

        let t = shape(FeatureVector::to_matrix(&[v]).view(), 1).unwrap();
        assert_eq!(t.dim(), (1, 1, FEATURE_COUNT));
        assert_eq!(t, shape_single(&v));
    }

    #[test]
    fn shape_keeps_most_recent_rows_in_order() {
        let t = shape(rows(5).view(), 3).unwrap();
        assert_eq!(t.dim(), (1, 3, FEATURE_COUNT));
        assert_eq!(t[[0, 0, 0]], 200.0);
        assert_eq!(t[[0, 2, 10]], 410.0);
    }

    #[test]
    fn too_few_rows_is_insufficient_history() {
        let err = shape(rows(2).view(), 3).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientHistory { needed: 3, available: 2 }));

        let err = windows(rows(3).view(), &[0.0; 3], 3).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientHistory { needed: 4, available: 3 }));
    }

    #[test]
    fn windows_are_labelled_with_the_following_observation() {
        let labels = [0.0, 0.0, 1.0, 0.0, 1.0];
        let batch = windows(rows(5).view(), &labels, 2).unwrap();

        assert_eq!(batch.inputs.dim(), (3, 2, FEATURE_COUNT));
        assert_eq!(batch.labels, array![1.0, 0.0, 1.0]);
        assert_eq!(batch.inputs[[1, 0, 0]], 100.0);
        assert_eq!(batch.inputs[[1, 1, 0]], 200.0);
    }

    #[test]
    fn wrong_width_and_zero_timesteps_are_rejected() {
        let narrow = Array2::<f64>::zeros((4, 7));
        assert!(matches!(shape(narrow.view(), 1), Err(PipelineError::Shape { .. })));
        assert!(matches!(shape(rows(4).view(), 0), Err(PipelineError::InvalidInput(_))));
    }
}
