use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Tabulated observations `f = f(X)` to interpolate.
///
/// Inputs `X` are given as a (n, nx) matrix, outputs `f` as a (n,) vector,
/// optional observational uncertainties `sigma` as a (n,) vector.
/// Shapes and finiteness are checked once at construction.
#[derive(Clone, Debug)]
pub struct TrainingSet<F: Float> {
    x: Array2<F>,
    f: Array1<F>,
    sigma: Option<Array1<F>>,
}

impl<F: Float> TrainingSet<F> {
    /// Constructor given (n, nx) inputs and (n,) outputs
    pub fn new(x: Array2<F>, f: Array1<F>) -> Result<Self> {
        if x.nrows() != f.len() {
            return Err(GpError::DataShapeError(format!(
                "inputs have {} rows while outputs have {} values",
                x.nrows(),
                f.len()
            )));
        }
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(GpError::DataShapeError(format!(
                "training inputs should be a non empty (n, nx) matrix, got ({}, {})",
                x.nrows(),
                x.ncols()
            )));
        }
        if let Some((i, _)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(GpError::DataShapeError(format!(
                "non finite input value at {i:?}"
            )));
        }
        if let Some((i, _)) = f.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(GpError::DataShapeError(format!(
                "non finite output value at row {i}"
            )));
        }
        Ok(TrainingSet { x, f, sigma: None })
    }

    /// Attach per point observational uncertainties (standard deviations)
    pub fn with_uncertainty(mut self, sigma: Array1<F>) -> Result<Self> {
        if sigma.len() != self.f.len() {
            return Err(GpError::DataShapeError(format!(
                "uncertainties have {} values while outputs have {} values",
                sigma.len(),
                self.f.len()
            )));
        }
        if sigma.iter().any(|v| !v.is_finite() || *v < F::zero()) {
            return Err(GpError::DataShapeError(
                "uncertainties should be finite and non negative".to_string(),
            ));
        }
        self.sigma = Some(sigma);
        Ok(self)
    }

    /// Training inputs (n, nx)
    pub fn x(&self) -> ArrayView2<'_, F> {
        self.x.view()
    }

    /// Training outputs (n,)
    pub fn f(&self) -> ArrayView1<'_, F> {
        self.f.view()
    }

    /// Observational uncertainties if any
    pub fn sigma(&self) -> Option<ArrayView1<'_, F>> {
        self.sigma.as_ref().map(|s| s.view())
    }

    /// Number of observations
    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    /// Input dimension
    pub fn ncols(&self) -> usize {
        self.x.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_training_set() {
        let ts = TrainingSet::new(array![[0.], [1.], [2.]], array![0., 1., 4.]).unwrap();
        assert_eq!(ts.n_obs(), 3);
        assert_eq!(ts.ncols(), 1);
        assert!(ts.sigma().is_none());
        let ts = ts.with_uncertainty(array![0.1, 0.1, 0.2]).unwrap();
        assert_eq!(ts.sigma().unwrap()[2], 0.2);
    }

    #[test]
    fn test_training_set_bad_shapes() {
        let res = TrainingSet::new(array![[0.], [1.]], array![0., 1., 4.]);
        assert!(matches!(res, Err(GpError::DataShapeError(_))));
        let res = TrainingSet::new(array![[0.], [f64::NAN]], array![0., 1.]);
        assert!(matches!(res, Err(GpError::DataShapeError(_))));
        let res = TrainingSet::new(array![[0.], [1.]], array![0., f64::INFINITY]);
        assert!(matches!(res, Err(GpError::DataShapeError(_))));
        let res = TrainingSet::new(array![[0.], [1.]], array![0., 1.])
            .and_then(|ts| ts.with_uncertainty(array![0.1]));
        assert!(matches!(res, Err(GpError::DataShapeError(_))));
    }
}
