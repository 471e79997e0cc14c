//! Tempered log posterior shared by hyperparameter optimization and sampling.
//!
//! `log_prob(free) = log_marginal_likelihood(merge(free)) / temperature + log_prior(free)`

use crate::algorithm::GaussianProcessModel;
use crate::errors::{GpError, Result};
use crate::hyperparameters::HyperParams;
use crate::kernels::Kernel;
use crate::prior::LogPrior;
use log::debug;
use ndarray::{Array1, ArrayView1};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A model giving the log marginal likelihood of its training data
pub trait Likelihood {
    /// Log marginal likelihood
    fn log_likelihood(&self) -> f64;
    /// Gradient of the log marginal likelihood wrt every hyperparameter in registry order
    fn log_likelihood_grad(&self) -> Result<Array1<f64>>;
}

impl<K: Kernel<f64> + ?Sized> Likelihood for GaussianProcessModel<'_, f64, K> {
    fn log_likelihood(&self) -> f64 {
        self.log_marginal_likelihood()
    }

    fn log_likelihood_grad(&self) -> Result<Array1<f64>> {
        self.log_marginal_likelihood_grad()
    }
}

/// Builds an independent model for each hyperparameter point.
///
/// Implemented by any `Fn(&HyperParams<f64>) -> Result<M>` closure, typically
/// `|params| GaussianProcessModel::fit(&kernel, &data, params.clone(), noise)`.
pub trait ModelFactory: Sync {
    /// Built model
    type Model: Likelihood;
    /// Build the model at the given hyperparameters
    fn build(&self, params: &HyperParams<f64>) -> Result<Self::Model>;
}

impl<F, M> ModelFactory for F
where
    F: Fn(&HyperParams<f64>) -> Result<M> + Sync,
    M: Likelihood,
{
    type Model = M;

    fn build(&self, params: &HyperParams<f64>) -> Result<M> {
        self(params)
    }
}

/// Whether the error comes from a failed factorization at a given point
/// as opposed to a problem which does not depend on hyperparameter values
fn is_numerical(err: &GpError) -> bool {
    matches!(err, GpError::NumericalError(_) | GpError::LinalgError(_))
}

/// Tempered log posterior over free hyperparameters.
///
/// Points outside the prior bounds are given `-inf` without building any model,
/// points where the model fails to factorize are given `-inf` and counted as failures.
pub struct TemperedPosterior<'a, M: ModelFactory> {
    factory: &'a M,
    prior: &'a LogPrior,
    temperature: f64,
    n_eval: AtomicUsize,
    n_failed: AtomicUsize,
}

impl<'a, M: ModelFactory> TemperedPosterior<'a, M> {
    /// Constructor, the temperature should be strictly positive
    pub fn new(factory: &'a M, prior: &'a LogPrior, temperature: f64) -> Result<Self> {
        if !(temperature > 0. && temperature.is_finite()) {
            return Err(GpError::ConstraintError(format!(
                "temperature should be strictly positive, got {temperature}"
            )));
        }
        Ok(TemperedPosterior {
            factory,
            prior,
            temperature,
            n_eval: AtomicUsize::new(0),
            n_failed: AtomicUsize::new(0),
        })
    }

    /// Prior of the free hyperparameters
    pub fn prior(&self) -> &LogPrior {
        self.prior
    }

    /// Temperature dividing the log likelihood
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Number of models built so far
    pub fn n_eval(&self) -> usize {
        self.n_eval.load(Ordering::Relaxed)
    }

    /// Number of models which failed to factorize so far
    pub fn n_failed(&self) -> usize {
        self.n_failed.load(Ordering::Relaxed)
    }

    fn build(&self, free: ArrayView1<f64>) -> Result<Option<M::Model>> {
        self.n_eval.fetch_add(1, Ordering::Relaxed);
        match self.factory.build(&self.prior.merge(free)) {
            Ok(model) => Ok(Some(model)),
            Err(err) if is_numerical(&err) => {
                self.n_failed.fetch_add(1, Ordering::Relaxed);
                debug!("Model building failed at {free}: {err}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Tempered log posterior at the given free hyperparameters.
    ///
    /// Only errors not related to the point (e.g. data and kernel mismatch) are returned.
    pub fn log_prob(&self, free: ArrayView1<f64>) -> Result<f64> {
        let logprior = self.prior.value(free);
        if !logprior.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        let value = self
            .build(free)?
            .map(|model| model.log_likelihood() / self.temperature + logprior)
            .filter(|v| !v.is_nan())
            .unwrap_or(f64::NEG_INFINITY);
        Ok(value)
    }

    /// Tempered log posterior and its gradient wrt the free hyperparameters.
    ///
    /// The prior being piecewise constant, its gradient is zero where it is finite.
    /// When the log posterior is `-inf` the returned gradient is zero.
    pub fn log_prob_with_grad(&self, free: ArrayView1<f64>) -> Result<(f64, Array1<f64>)> {
        let zeros = Array1::zeros(free.len());
        let logprior = self.prior.value(free);
        if !logprior.is_finite() {
            return Ok((f64::NEG_INFINITY, zeros));
        }
        let model = match self.build(free)? {
            Some(model) => model,
            None => return Ok((f64::NEG_INFINITY, zeros)),
        };
        let value = model.log_likelihood() / self.temperature + logprior;
        if value.is_nan() {
            return Ok((f64::NEG_INFINITY, zeros));
        }
        let grad = match model.log_likelihood_grad() {
            Ok(grad) => grad,
            Err(err) if is_numerical(&err) => return Ok((f64::NEG_INFINITY, zeros)),
            Err(err) => return Err(err),
        };
        let free_grad = self
            .prior
            .free_indices()
            .iter()
            .map(|&i| grad[i] / self.temperature)
            .collect();
        Ok((value, free_grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TrainingSet;
    use crate::kernels::SquaredExponentialKernel;
    use crate::prior::{Bound, Fixed};
    use approx::assert_abs_diff_eq;
    use finitediff::FiniteDiff;
    use ndarray::{array, Array, Axis};

    fn sin_data() -> TrainingSet<f64> {
        let xt = Array::linspace(0., 6., 8).insert_axis(Axis(1));
        let ft = xt.column(0).mapv(f64::sin);
        TrainingSet::new(xt, ft).unwrap()
    }

    #[test]
    fn test_out_of_bounds_short_circuit() {
        let data = sin_data();
        let kernel = SquaredExponentialKernel::new(1);
        let factory =
            |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.01);
        let prior = LogPrior::build(kernel.registry(), &[Bound::new("length0", 0.1, 10.)], &[])
            .unwrap();
        let posterior = TemperedPosterior::new(&factory, &prior, 1.).unwrap();
        assert_eq!(
            posterior.log_prob(array![1., 20.].view()).unwrap(),
            f64::NEG_INFINITY
        );
        assert_eq!(posterior.n_eval(), 0);
        assert!(posterior.log_prob(array![1., 2.].view()).unwrap().is_finite());
        assert_eq!(posterior.n_eval(), 1);
    }

    #[test]
    fn test_tempering() {
        let data = sin_data();
        let kernel = SquaredExponentialKernel::new(1);
        let factory =
            |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.01);
        let prior = LogPrior::build(
            kernel.registry(),
            &[Bound::new("length0", 0.5, 2.5)],
            &[Fixed::new("sigma", 1.)],
        )
        .unwrap();
        let params = prior.merge(array![1.5].view());
        let lml = factory(&params).unwrap().log_marginal_likelihood();
        let posterior = TemperedPosterior::new(&factory, &prior, 4.).unwrap();
        assert_abs_diff_eq!(
            posterior.log_prob(array![1.5].view()).unwrap(),
            lml / 4. - 2f64.ln(),
            epsilon = 1e-12
        );
        assert!(matches!(
            TemperedPosterior::new(&factory, &prior, 0.),
            Err(GpError::ConstraintError(_))
        ));
    }

    #[test]
    fn test_log_prob_grad() {
        let data = sin_data();
        let kernel = SquaredExponentialKernel::new(1);
        let factory =
            |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.05);
        let prior = LogPrior::build(kernel.registry(), &[], &[]).unwrap();
        let posterior = TemperedPosterior::new(&factory, &prior, 2.).unwrap();
        let x = vec![1.3, 0.9];
        let (_, grad) = posterior.log_prob_with_grad(Array1::from(x.clone()).view()).unwrap();
        let fdiff = x.central_diff(&|x: &Vec<f64>| -> f64 {
            posterior.log_prob(ArrayView1::from(x)).unwrap()
        });
        assert_abs_diff_eq!(grad, Array1::from(fdiff), epsilon = 1e-5);
    }

    #[test]
    fn test_failures_are_counted() {
        let data = sin_data();
        let kernel = SquaredExponentialKernel::new(1);
        let factory =
            |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.);
        let prior = LogPrior::build(kernel.registry(), &[], &[]).unwrap();
        let posterior = TemperedPosterior::new(&factory, &prior, 1.).unwrap();
        // zero length scale gives a non finite covariance matrix
        assert_eq!(
            posterior.log_prob(array![1., 0.].view()).unwrap(),
            f64::NEG_INFINITY
        );
        assert_eq!(posterior.n_failed(), 1);
    }

    #[test]
    fn test_hard_errors_propagate() {
        let data = sin_data();
        let kernel = SquaredExponentialKernel::new(2);
        let factory =
            |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.);
        let prior = LogPrior::build(kernel.registry(), &[], &[]).unwrap();
        let posterior = TemperedPosterior::new(&factory, &prior, 1.).unwrap();
        assert!(matches!(
            posterior.log_prob(array![1., 1., 1.].view()),
            Err(GpError::DataShapeError(_))
        ));
    }
}
