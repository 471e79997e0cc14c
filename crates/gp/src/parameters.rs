use crate::errors::{GpError, Result};
use crate::{
    OPTIM_MAX_EVAL, OPTIM_MIN_EVAL, OPTIM_N_START, SAMPLER_N_BURNIN, SAMPLER_N_SAMPLES,
    SAMPLER_REJECT_STREAK,
};
use linfa::ParamGuard;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deterministic search strategy used to maximize the tempered log posterior
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum OptimMethod {
    /// Gradient free search respecting bounds
    #[default]
    Cobyla,
    /// Gradient based search respecting bounds, using the likelihood gradient
    Slsqp,
}

impl FromStr for OptimMethod {
    type Err = GpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cobyla" => Ok(OptimMethod::Cobyla),
            "slsqp" => Ok(OptimMethod::Slsqp),
            _ => Err(GpError::InvalidValueError(format!(
                "unknown optimization method `{s}`, expected cobyla or slsqp"
            ))),
        }
    }
}

impl fmt::Display for OptimMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptimMethod::Cobyla => write!(f, "cobyla"),
            OptimMethod::Slsqp => write!(f, "slsqp"),
        }
    }
}

fn check_temperature(temperature: f64) -> Result<()> {
    if !(temperature > 0. && temperature.is_finite()) {
        return Err(GpError::ConstraintError(format!(
            "temperature should be strictly positive, got {temperature}"
        )));
    }
    Ok(())
}

/// A set of validated hyperparameter optimizer parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct OptimizerValidParams {
    /// Search strategy
    pub(crate) method: OptimMethod,
    /// Number of optimization starts, the first one being the given starting point
    pub(crate) n_start: usize,
    /// Max number of posterior evaluations during one optimization run
    pub(crate) max_eval: usize,
    /// Relative tolerance on the objective to stop one run
    pub(crate) ftol_rel: f64,
    /// Divisor of the log likelihood
    pub(crate) temperature: f64,
    /// Seed of the multistart draws
    pub(crate) seed: Option<u64>,
}

impl Default for OptimizerValidParams {
    fn default() -> OptimizerValidParams {
        OptimizerValidParams {
            method: OptimMethod::default(),
            n_start: OPTIM_N_START,
            max_eval: OPTIM_MAX_EVAL,
            ftol_rel: 1e-6,
            temperature: 1.,
            seed: None,
        }
    }
}

impl OptimizerValidParams {
    /// Get search strategy
    pub fn method(&self) -> OptimMethod {
        self.method
    }

    /// Get the number of optimization starts
    pub fn n_start(&self) -> usize {
        self.n_start
    }

    /// Get the max number of posterior evaluations during one run
    pub fn max_eval(&self) -> usize {
        self.max_eval
    }

    /// Get the relative tolerance on the objective
    pub fn ftol_rel(&self) -> f64 {
        self.ftol_rel
    }

    /// Get the temperature
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Get the seed of multistart draws
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[derive(Clone, Debug, Default)]
/// The set of parameters that can be specified for the execution of
/// the [hyperparameter optimizer](crate::HyperparameterOptimizer).
pub struct OptimizerParams(OptimizerValidParams);

impl OptimizerParams {
    /// A constructor with default parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the search strategy
    pub fn method(mut self, method: OptimMethod) -> Self {
        self.0.method = method;
        self
    }

    /// Set the number of optimization starts
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the max number of posterior evaluations during one run.
    /// Given max_eval is raised to [crate::OPTIM_MIN_EVAL] if lower.
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.max_eval = OPTIM_MIN_EVAL.max(max_eval);
        self
    }

    /// Set the relative tolerance on the objective
    pub fn ftol_rel(mut self, ftol_rel: f64) -> Self {
        self.0.ftol_rel = ftol_rel;
        self
    }

    /// Set the temperature dividing the log likelihood
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.0.temperature = temperature;
        self
    }

    /// Set the seed of the multistart draws
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.0.seed = seed;
        self
    }
}

impl From<OptimizerValidParams> for OptimizerParams {
    fn from(valid: OptimizerValidParams) -> Self {
        OptimizerParams(valid)
    }
}

impl ParamGuard for OptimizerParams {
    type Checked = OptimizerValidParams;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        check_temperature(self.0.temperature)?;
        if self.0.n_start == 0 {
            return Err(GpError::InvalidValueError(
                "`n_start` should be at least 1".to_string(),
            ));
        }
        if !(self.0.ftol_rel > 0.) {
            return Err(GpError::InvalidValueError(format!(
                "`ftol_rel` should be strictly positive, got {}",
                self.0.ftol_rel
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

/// A set of validated ensemble sampler parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SamplerValidParams {
    /// Ensemble size, `2 * d + 2` when not given
    pub(crate) n_walkers: Option<usize>,
    /// Number of discarded first iterations
    pub(crate) n_burnin: usize,
    /// Number of retained iterations
    pub(crate) n_samples: usize,
    /// Divisor of the log likelihood
    pub(crate) temperature: f64,
    /// Stretch move scale `a > 1`
    pub(crate) stretch: f64,
    /// Relative spread of initial walkers around the starting point
    pub(crate) init_spread: f64,
    /// Max number of draws of one initial walker to get a finite prior
    pub(crate) max_init_draws: usize,
    /// Number of consecutive fully rejected iterations tolerated
    pub(crate) max_reject_streak: usize,
    /// Seed of the sampler generator
    pub(crate) seed: Option<u64>,
}

impl Default for SamplerValidParams {
    fn default() -> SamplerValidParams {
        SamplerValidParams {
            n_walkers: None,
            n_burnin: SAMPLER_N_BURNIN,
            n_samples: SAMPLER_N_SAMPLES,
            temperature: 1.,
            stretch: 2.,
            init_spread: 0.125,
            max_init_draws: 1000,
            max_reject_streak: SAMPLER_REJECT_STREAK,
            seed: None,
        }
    }
}

impl SamplerValidParams {
    /// Get the ensemble size if given
    pub fn n_walkers(&self) -> Option<usize> {
        self.n_walkers
    }

    /// Get the number of burn-in iterations
    pub fn n_burnin(&self) -> usize {
        self.n_burnin
    }

    /// Get the number of retained iterations
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Get the temperature
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Get the stretch move scale
    pub fn stretch(&self) -> f64 {
        self.stretch
    }

    /// Get the relative spread of initial walkers
    pub fn init_spread(&self) -> f64 {
        self.init_spread
    }

    /// Get the max number of draws of one initial walker
    pub fn max_init_draws(&self) -> usize {
        self.max_init_draws
    }

    /// Get the number of tolerated consecutive fully rejected iterations
    pub fn max_reject_streak(&self) -> usize {
        self.max_reject_streak
    }

    /// Get the seed
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[derive(Clone, Debug, Default)]
/// The set of parameters that can be specified for the execution of
/// the [ensemble sampler](crate::HyperparameterSampler).
pub struct SamplerParams(SamplerValidParams);

impl SamplerParams {
    /// A constructor with default parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ensemble size, should be at least `2 * d + 2` with `d` the number of free hyperparameters
    pub fn n_walkers(mut self, n_walkers: Option<usize>) -> Self {
        self.0.n_walkers = n_walkers;
        self
    }

    /// Set the number of discarded first iterations
    pub fn n_burnin(mut self, n_burnin: usize) -> Self {
        self.0.n_burnin = n_burnin;
        self
    }

    /// Set the number of retained iterations
    pub fn n_samples(mut self, n_samples: usize) -> Self {
        self.0.n_samples = n_samples;
        self
    }

    /// Set the temperature dividing the log likelihood
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.0.temperature = temperature;
        self
    }

    /// Set the stretch move scale
    pub fn stretch(mut self, stretch: f64) -> Self {
        self.0.stretch = stretch;
        self
    }

    /// Set the relative spread of initial walkers around the starting point
    pub fn init_spread(mut self, init_spread: f64) -> Self {
        self.0.init_spread = init_spread;
        self
    }

    /// Set the max number of draws of one initial walker
    pub fn max_init_draws(mut self, max_init_draws: usize) -> Self {
        self.0.max_init_draws = max_init_draws;
        self
    }

    /// Set the number of consecutive fully rejected iterations tolerated
    /// before failing with [`GpError::SamplerDivergence`]
    pub fn max_reject_streak(mut self, max_reject_streak: usize) -> Self {
        self.0.max_reject_streak = max_reject_streak;
        self
    }

    /// Set the seed of the sampler generator
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.0.seed = seed;
        self
    }
}

impl From<SamplerValidParams> for SamplerParams {
    fn from(valid: SamplerValidParams) -> Self {
        SamplerParams(valid)
    }
}

impl ParamGuard for SamplerParams {
    type Checked = SamplerValidParams;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        check_temperature(self.0.temperature)?;
        if !(self.0.stretch > 1.) || !self.0.stretch.is_finite() {
            return Err(GpError::InvalidValueError(format!(
                "stretch move scale should be greater than 1, got {}",
                self.0.stretch
            )));
        }
        if self.0.n_samples == 0 {
            return Err(GpError::InvalidValueError(
                "`n_samples` should be at least 1".to_string(),
            ));
        }
        if !(self.0.init_spread > 0.) {
            return Err(GpError::InvalidValueError(format!(
                "`init_spread` should be strictly positive, got {}",
                self.0.init_spread
            )));
        }
        if self.0.max_init_draws == 0 {
            return Err(GpError::InvalidValueError(
                "`max_init_draws` should be at least 1".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
