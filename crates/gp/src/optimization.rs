use crate::errors::{GpError, Result};
use crate::hyperparameters::HyperParams;
use crate::parameters::{OptimMethod, OptimizerParams, OptimizerValidParams};
use crate::posterior::{ModelFactory, TemperedPosterior};
use crate::prior::LogPrior;
use crate::utils::seeded_rng;

use linfa::ParamGuard;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_rand::rand::Rng;
use rayon::prelude::*;
use std::time::Instant;

/// Half width of the search window of unconstrained hyperparameters relative to `|x0| + 1`
const UNBOUNDED_WINDOW: f64 = 1e6;

/// Result of a hyperparameter optimization
#[derive(Clone, Debug)]
pub struct OptimResult {
    /// Best hyperparameters, fixed values included
    pub params: HyperParams<f64>,
    /// Tempered log posterior at best hyperparameters
    pub objective: f64,
    /// Number of models built during the search
    pub n_eval: usize,
    /// Number of models which failed to factorize during the search
    pub n_failed: usize,
}

/// Deterministic search of the hyperparameters maximizing the tempered log posterior
///
/// `log_marginal_likelihood(params) / temperature + log_prior(free params)`
///
/// over the free hyperparameters of a [`LogPrior`], the fixed ones being inserted
/// before each model is built.
///
/// Several runs are started in parallel: the first one from the given starting point,
/// the others from points drawn uniformly within bounds (and around the starting point
/// for unconstrained hyperparameters). The best result is kept, it is never worse than
/// the starting point.
///
/// # Example
///
/// ```no_run
/// use mgpi_gp::*;
/// use ndarray::{array, Array, Axis};
///
/// let xt = Array::linspace(0., 6., 20).insert_axis(Axis(1));
/// let data = TrainingSet::new(xt.clone(), xt.column(0).mapv(f64::sin)).expect("valid data");
/// let kernel = SquaredExponentialKernel::new(1);
/// let factory = |p: &HyperParams<f64>| GaussianProcessModel::fit(&kernel, &data, p.clone(), 0.01);
///
/// let prior = LogPrior::build(
///     kernel.registry(),
///     &[Bound::new("length0", 0.1, 10.)],
///     &[Fixed::new("sigma", 1.)],
/// )
/// .expect("valid prior");
/// let init = HyperParams::from_elem(kernel.registry().clone(), 1.);
///
/// let optimizer = HyperparameterOptimizer::new(HyperparameterOptimizer::params().seed(Some(42)))
///     .expect("valid parameters");
/// let best = optimizer.optimize(&factory, &prior, &init).expect("optimized");
/// println!("best params: {} (objective={})", best.params, best.objective);
/// ```
#[derive(Clone, Debug)]
pub struct HyperparameterOptimizer {
    params: OptimizerValidParams,
}

impl HyperparameterOptimizer {
    /// Default optimizer parameters
    pub fn params() -> OptimizerParams {
        OptimizerParams::new()
    }

    /// Constructor from checked parameters
    pub fn new(params: OptimizerParams) -> Result<Self> {
        Ok(HyperparameterOptimizer {
            params: params.check()?,
        })
    }

    /// Optimizer parameters
    pub fn valid_params(&self) -> &OptimizerValidParams {
        &self.params
    }

    /// Maximize the tempered log posterior starting from `init`.
    ///
    /// Fails with [`GpError::NumericalError`] when every built model failed to factorize.
    pub fn optimize<M: ModelFactory>(
        &self,
        factory: &M,
        prior: &LogPrior,
        init: &HyperParams<f64>,
    ) -> Result<OptimResult> {
        let posterior = TemperedPosterior::new(factory, prior, self.params.temperature())?;
        let x0 = prior.split(&prior.feasible_start(init)?);
        let f0 = posterior.log_prob(x0.view())?;
        debug!("Starting point {} objective={f0}", prior.merge(x0.view()));

        let (x_best, f_best) = if prior.n_free() == 0 {
            (x0, f0)
        } else {
            let bounds = search_bounds(prior, &x0);
            let starts = self.multistart(&x0, prior, &bounds);
            let now = Instant::now();
            let (x_opt, f_opt) = (0..starts.nrows())
                .into_par_iter()
                .map(|i| {
                    let (x, f) = self.run(&posterior, starts.row(i), &bounds);
                    debug!("Run {i} from {} -> objective={f}", starts.row(i));
                    (x, f)
                })
                .reduce(
                    || (x0.clone(), f64::NEG_INFINITY),
                    |a, b| if b.1 > a.1 { b } else { a },
                );
            debug!("elapsed optim = {:?}", now.elapsed().as_millis());
            if f_opt > f0 {
                (x_opt, f_opt)
            } else {
                (x0, f0)
            }
        };

        let (n_eval, n_failed) = (posterior.n_eval(), posterior.n_failed());
        if n_eval > 0 && n_failed == n_eval {
            return Err(GpError::NumericalError(format!(
                "every one of the {n_eval} trials failed to factorize the covariance matrix"
            )));
        }
        if !f_best.is_finite() {
            return Err(GpError::NumericalError(
                "no hyperparameters with a finite objective were found".to_string(),
            ));
        }
        if n_failed > 0 {
            warn!("{n_failed} of {n_eval} trials failed to factorize the covariance matrix");
        }
        let params = prior.merge(x_best.view());
        info!("Best objective={f_best} at {params} ({n_eval} evaluations)");
        Ok(OptimResult {
            params,
            objective: f_best,
            n_eval,
            n_failed,
        })
    }

    /// Starting points as a (n_start, d) matrix, the first one being `x0`
    fn multistart(&self, x0: &Array1<f64>, prior: &LogPrior, bounds: &[(f64, f64)]) -> Array2<f64> {
        let n_start = self.params.n_start();
        let mut rng = seeded_rng(self.params.seed());
        let mut starts = Array2::zeros((n_start, x0.len()));
        starts.row_mut(0).assign(x0);
        for mut start in starts.rows_mut().into_iter().skip(1) {
            for (j, xj) in start.iter_mut().enumerate() {
                *xj = match prior.bounds()[j] {
                    Some(_) => rng.gen_range(bounds[j].0..=bounds[j].1),
                    None => {
                        let half_width = 0.5 * x0[j].abs().max(1.);
                        x0[j] + rng.gen_range(-half_width..=half_width)
                    }
                }
            }
        }
        starts
    }

    /// One local search, returns the best point and its objective
    fn run<M: ModelFactory>(
        &self,
        posterior: &TemperedPosterior<M>,
        start: ArrayView1<f64>,
        bounds: &[(f64, f64)],
    ) -> (Array1<f64>, f64) {
        let xinit = start.to_vec();
        let (y_opt, x_opt) = match self.params.method() {
            OptimMethod::Cobyla => {
                use cobyla::{minimize, Func, RhoBeg, StopTols};

                let objfn =
                    |x: &[f64], _u: &mut ()| -> f64 { -log_prob_or_reject(posterior, x.into()) };
                let cons: Vec<&dyn Func<()>> = vec![];
                let rhobeg = initial_steps(&xinit, posterior.prior(), bounds);
                match minimize(
                    objfn,
                    &xinit,
                    bounds,
                    &cons,
                    (),
                    self.params.max_eval(),
                    RhoBeg::Set(rhobeg),
                    Some(StopTols {
                        ftol_rel: self.params.ftol_rel(),
                        ..StopTols::default()
                    }),
                ) {
                    Ok((_, x_opt, y_opt)) => (y_opt, x_opt),
                    Err((status, x_opt, _)) => {
                        debug!("Cobyla run stopped with status={status:?}");
                        (f64::INFINITY, x_opt)
                    }
                }
            }
            OptimMethod::Slsqp => {
                let objfn = |x: &[f64], gradient: Option<&mut [f64]>, _u: &mut ()| -> f64 {
                    let x = ArrayView1::from(x);
                    match gradient {
                        Some(gradient) => match posterior.log_prob_with_grad(x) {
                            Ok((value, grad)) if value.is_finite() => {
                                gradient
                                    .iter_mut()
                                    .zip(grad.iter())
                                    .for_each(|(g, d)| *g = -d);
                                -value
                            }
                            Ok(_) => {
                                gradient.iter_mut().for_each(|g| *g = 0.);
                                f64::INFINITY
                            }
                            Err(err) => {
                                debug!("Trial rejected at {x}: {err}");
                                gradient.iter_mut().for_each(|g| *g = 0.);
                                f64::INFINITY
                            }
                        },
                        None => -log_prob_or_reject(posterior, x),
                    }
                };
                let cons: Vec<fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64> = vec![];
                match slsqp::minimize(
                    objfn,
                    &xinit,
                    bounds,
                    &cons,
                    (),
                    self.params.max_eval(),
                    Some(slsqp::StopTols {
                        ftol_rel: self.params.ftol_rel(),
                        ..slsqp::StopTols::default()
                    }),
                ) {
                    Ok((_, x_opt, y_opt)) => (y_opt, x_opt),
                    Err((status, x_opt, _)) => {
                        debug!("Slsqp run stopped with status={status:?}");
                        (f64::INFINITY, x_opt)
                    }
                }
            }
        };
        let objective = if y_opt.is_nan() { f64::NEG_INFINITY } else { -y_opt };
        (Array1::from(x_opt), objective)
    }
}

/// Tempered log posterior within a local search, where any error rejects the trial point
fn log_prob_or_reject<M: ModelFactory>(
    posterior: &TemperedPosterior<M>,
    x: ArrayView1<f64>,
) -> f64 {
    posterior.log_prob(x).unwrap_or_else(|err| {
        debug!("Trial rejected at {x}: {err}");
        f64::NEG_INFINITY
    })
}

/// Bounds given to the local searches: prior bounds, or a wide window around
/// the starting point for unconstrained hyperparameters
fn search_bounds(prior: &LogPrior, x0: &Array1<f64>) -> Vec<(f64, f64)> {
    prior
        .bounds()
        .iter()
        .zip(x0.iter())
        .map(|(bound, &x)| match bound {
            Some(bound) => *bound,
            None => {
                let half_width = UNBOUNDED_WINDOW * (x.abs() + 1.);
                (x - half_width, x + half_width)
            }
        })
        .collect()
}

/// Initial trust region radius per hyperparameter
fn initial_steps(x: &[f64], prior: &LogPrior, bounds: &[(f64, f64)]) -> Vec<f64> {
    x.iter()
        .zip(prior.bounds().iter().zip(bounds.iter()))
        .map(|(&xj, (bound, (lo, up)))| match bound {
            Some(_) => 0.1 * (up - lo),
            None => 0.5 * xj.abs().max(1.),
        })
        .collect()
}
