//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) interpolation
//! of tabulated data, the hyperparameters of the covariance kernel being calibrated against the data
//! either by optimization or by ensemble MCMC sampling of their posterior.
//!
//! Kernels ([Kernel]) expose their hyperparameters through a stable name registry
//! ([ParamRegistry]). Given a [TrainingSet], [GaussianProcessModel] conditions a kernel at fixed
//! hyperparameters and gives predictive means, variances, gradients, covariances, posterior
//! draws and the log marginal likelihood.
//!
//! Hyperparameters may be fixed or bounded ([LogPrior]) and the tempered log posterior
//! ([TemperedPosterior]) is then either maximized by [HyperparameterOptimizer] (multistart
//! COBYLA or SLSQP) or sampled by [HyperparameterSampler] (affine invariant stretch move).
//!
//! ```no_run
//! use mgpi_gp::*;
//! use ndarray::{Array, Axis};
//!
//! let xt = Array::linspace(0., 6., 20).insert_axis(Axis(1));
//! let ft = xt.column(0).mapv(f64::sin);
//! let data = TrainingSet::new(xt, ft).unwrap();
//!
//! let kernel = SquaredExponentialKernel::new(1);
//! let prior = LogPrior::build(kernel.registry(), &[Bound::new("length0", 0.1, 10.)], &[]).unwrap();
//! let factory = |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.01);
//!
//! let optimizer = HyperparameterOptimizer::new(HyperparameterOptimizer::params().seed(Some(42))).unwrap();
//! let init = HyperParams::from_elem(kernel.registry().clone(), 1.);
//! let best = optimizer.optimize(&factory, &prior, &init).unwrap();
//!
//! let gp = GaussianProcessModel::fit(&kernel, &data, best.params, 0.01).unwrap();
//! let xtest = Array::linspace(0., 6., 50).insert_axis(Axis(1));
//! let (mean, variance) = gp.predict(&xtest).unwrap();
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod dataset;
mod errors;
mod hyperparameters;
pub mod kernels;
mod optimization;
mod parameters;
mod posterior;
mod prior;
mod sampling;
mod utils;

pub use algorithm::*;
pub use dataset::*;
pub use errors::*;
pub use hyperparameters::*;
pub use kernels::*;
pub use optimization::*;
pub use parameters::*;
pub use posterior::*;
pub use prior::*;
pub use sampling::*;
pub use utils::seeded_rng;

/// Default number of optimization starts
pub const OPTIM_N_START: usize = 10;
/// Default max number of posterior evaluations during one optimization run
pub const OPTIM_MAX_EVAL: usize = 500;
/// Min number of posterior evaluations during one optimization run
pub const OPTIM_MIN_EVAL: usize = 25;
/// Default number of discarded sampler iterations
pub const SAMPLER_N_BURNIN: usize = 100;
/// Default number of retained sampler iterations
pub const SAMPLER_N_SAMPLES: usize = 100;
/// Default number of consecutive fully rejected sampler iterations tolerated
pub const SAMPLER_REJECT_STREAK: usize = 100;
