//! Affine invariant ensemble sampler (Goodman & Weare stretch move) over the
//! free hyperparameters of a [`LogPrior`], targeting the tempered log posterior.
//!
//! Every random draw (initial walkers, stretch factors, partners, acceptance) comes from
//! one generator seeded once, draws being made sequentially. Only posterior evaluations
//! of the proposals of a half ensemble run in parallel, so a seed reproduces a chain exactly.

use crate::errors::{GpError, Result};
use crate::hyperparameters::HyperParams;
use crate::parameters::{SamplerParams, SamplerValidParams};
use crate::posterior::{ModelFactory, TemperedPosterior};
use crate::prior::LogPrior;
use crate::utils::seeded_rng;

use linfa::ParamGuard;
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use ndarray_rand::rand::Rng;
use ndarray_stats::QuantileExt;
use rayon::prelude::*;
use std::ops::Range;

/// Stretch move `y = c + z (x - c)` with `z` drawn from `g(z) ~ 1/sqrt(z)` on `[1/a, a]`
#[derive(Clone, Copy, Debug)]
pub struct StretchMove {
    a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        StretchMove { a: 2. }
    }
}

impl StretchMove {
    /// Stretch move of scale `a > 1`
    pub fn new(a: f64) -> Result<Self> {
        if !(a > 1.) || !a.is_finite() {
            return Err(GpError::InvalidValueError(format!(
                "stretch move scale should be greater than 1, got {a}"
            )));
        }
        Ok(StretchMove { a })
    }

    /// Scale of the move
    pub fn a(&self) -> f64 {
        self.a
    }

    /// Draw a stretch factor `z = ((a - 1) u + 1)^2 / a` with `u ~ U(0, 1)`
    pub fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        ((self.a - 1.) * u + 1.).powi(2) / self.a
    }

    /// Proposal for the walker at `current` using a partner drawn among `complementary` walkers.
    /// Returns the proposal and the stretch factor.
    pub fn propose<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        current: ArrayView1<f64>,
        complementary: ArrayView2<f64>,
    ) -> (Array1<f64>, f64) {
        let z = self.sample_z(rng);
        let partner = complementary.row(rng.gen_range(0..complementary.nrows()));
        let proposal = &partner + &((&current - &partner) * z);
        (proposal, z)
    }

    /// Acceptance test of a move of stretch factor `z` in dimension `dim` given a uniform draw `u`:
    /// accepted when `u < z^(dim - 1) exp(new - old)`
    pub fn accept(&self, u: f64, z: f64, dim: usize, log_prob_old: f64, log_prob_new: f64) -> bool {
        if !log_prob_new.is_finite() {
            return false;
        }
        if !log_prob_old.is_finite() {
            return true;
        }
        let log_ratio = (dim as f64 - 1.) * z.ln() + log_prob_new - log_prob_old;
        u.ln() < log_ratio
    }

    /// One sampler iteration: first half walkers move against the second half,
    /// then second half walkers move against the updated first half.
    /// Returns the number of accepted proposals.
    ///
    /// Within a half, proposals only use positions of the other half, so the second
    /// half sees the first half moves of the same iteration, as in emcee.
    pub fn step<M: ModelFactory, R: Rng>(
        &self,
        state: &mut SamplerState,
        posterior: &TemperedPosterior<M>,
        rng: &mut R,
    ) -> Result<usize> {
        let n = state.n_walkers();
        let half = n / 2;
        let mut n_accepted = 0;
        n_accepted += self.update_group(state, 0..half, half..n, posterior, rng)?;
        n_accepted += self.update_group(state, half..n, 0..half, posterior, rng)?;
        state.iteration += 1;
        Ok(n_accepted)
    }

    fn update_group<M: ModelFactory, R: Rng>(
        &self,
        state: &mut SamplerState,
        active: Range<usize>,
        complementary: Range<usize>,
        posterior: &TemperedPosterior<M>,
        rng: &mut R,
    ) -> Result<usize> {
        let proposals: Vec<(Array1<f64>, f64)> = {
            let others = state.positions.slice(s![complementary, ..]);
            active
                .clone()
                .map(|i| self.propose(rng, state.positions.row(i), others))
                .collect()
        };
        let log_probs = proposals
            .par_iter()
            .map(|(proposal, _)| posterior.log_prob(proposal.view()))
            .collect::<Result<Vec<f64>>>()?;

        let dim = state.n_params();
        let mut n_accepted = 0;
        for (i, ((proposal, z), log_prob_new)) in active.zip(proposals.iter().zip(log_probs)) {
            let u: f64 = rng.gen();
            if self.accept(u, *z, dim, state.log_probs[i], log_prob_new) {
                state.positions.row_mut(i).assign(proposal);
                state.log_probs[i] = log_prob_new;
                state.n_accepted[i] += 1;
                n_accepted += 1;
            }
        }
        Ok(n_accepted)
    }
}

/// Ensemble of walkers in free hyperparameter space
#[derive(Clone, Debug)]
pub struct SamplerState {
    positions: Array2<f64>,
    log_probs: Array1<f64>,
    iteration: usize,
    n_accepted: Vec<usize>,
}

impl SamplerState {
    /// State given (n_walkers, d) positions and their log posterior values
    pub fn new(positions: Array2<f64>, log_probs: Array1<f64>) -> Result<Self> {
        if positions.nrows() != log_probs.len() {
            return Err(GpError::DataShapeError(format!(
                "{} walkers for {} log posterior values",
                positions.nrows(),
                log_probs.len()
            )));
        }
        if positions.nrows() < 4 {
            return Err(GpError::ConstraintError(format!(
                "an ensemble needs at least 4 walkers, got {}",
                positions.nrows()
            )));
        }
        let n_walkers = positions.nrows();
        Ok(SamplerState {
            positions,
            log_probs,
            iteration: 0,
            n_accepted: vec![0; n_walkers],
        })
    }

    /// Walker positions (n_walkers, d)
    pub fn positions(&self) -> ArrayView2<'_, f64> {
        self.positions.view()
    }

    /// Walker log posterior values
    pub fn log_probs(&self) -> ArrayView1<'_, f64> {
        self.log_probs.view()
    }

    /// Number of iterations done
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Number of walkers
    pub fn n_walkers(&self) -> usize {
        self.positions.nrows()
    }

    /// Number of sampled hyperparameters
    pub fn n_params(&self) -> usize {
        self.positions.ncols()
    }

    /// Fraction of accepted proposals of each walker
    pub fn acceptance_fraction(&self) -> Array1<f64> {
        let iterations = self.iteration.max(1) as f64;
        self.n_accepted
            .iter()
            .map(|&n| n as f64 / iterations)
            .collect()
    }
}

/// Posterior samples of hyperparameters
#[derive(Clone, Debug)]
pub struct SampleChain {
    /// Names of all hyperparameters (sample columns)
    pub names: Vec<String>,
    /// Names of the sampled hyperparameters
    pub free_names: Vec<String>,
    /// Samples as full hyperparameter vectors, fixed values included, ordered by
    /// iteration then walker: (n_samples * n_walkers, n_params)
    pub samples: Array2<f64>,
    /// Tempered log posterior of each sample
    pub log_probs: Array1<f64>,
    /// Fraction of accepted proposals of each walker
    pub acceptance_fraction: Array1<f64>,
    /// Ensemble size
    pub n_walkers: usize,
}

impl SampleChain {
    /// Mean of walkers acceptance fractions
    pub fn mean_acceptance_fraction(&self) -> f64 {
        self.acceptance_fraction.mean().unwrap_or(0.)
    }

    /// Sample of highest tempered log posterior and its value
    pub fn best(&self) -> Result<(ArrayView1<'_, f64>, f64)> {
        let i = self
            .log_probs
            .argmax()
            .map_err(|err| GpError::InvalidValueError(format!("no best sample: {err}")))?;
        Ok((self.samples.row(i), self.log_probs[i]))
    }

    /// Samples of the named hyperparameter
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|j| self.samples.column(j))
    }
}

/// Ensemble MCMC sampling of the hyperparameters posterior
///
/// `log_marginal_likelihood(params) / temperature + log_prior(free params)`
///
/// Walkers start around the given starting point (uniform relative perturbation,
/// redrawn until the prior is finite). Burn-in iterations are discarded.
#[derive(Clone, Debug)]
pub struct HyperparameterSampler {
    params: SamplerValidParams,
}

impl HyperparameterSampler {
    /// Default sampler parameters
    pub fn params() -> SamplerParams {
        SamplerParams::new()
    }

    /// Constructor from checked parameters
    pub fn new(params: SamplerParams) -> Result<Self> {
        Ok(HyperparameterSampler {
            params: params.check()?,
        })
    }

    /// Sampler parameters
    pub fn valid_params(&self) -> &SamplerValidParams {
        &self.params
    }

    /// Sample the tempered posterior starting around `init`.
    ///
    /// Fails with [`GpError::ConstraintError`] before any evaluation when there are less than
    /// `2 * d + 2` walkers for `d` free hyperparameters, with [`GpError::SamplerDivergence`] when
    /// more than `max_reject_streak` consecutive iterations reject every proposal.
    pub fn sample<M: ModelFactory>(
        &self,
        factory: &M,
        prior: &LogPrior,
        init: &HyperParams<f64>,
    ) -> Result<SampleChain> {
        let dim = prior.n_free();
        if dim == 0 {
            return Err(GpError::ConstraintError(
                "every hyperparameter is fixed, nothing to sample".to_string(),
            ));
        }
        let min_walkers = 2 * dim + 2;
        let n_walkers = self.params.n_walkers().unwrap_or(min_walkers);
        if n_walkers < min_walkers {
            return Err(GpError::ConstraintError(format!(
                "{n_walkers} walkers given, at least {min_walkers} needed for {dim} free hyperparameters"
            )));
        }
        let stretch = StretchMove::new(self.params.stretch())?;
        let posterior = TemperedPosterior::new(factory, prior, self.params.temperature())?;
        let mut rng = seeded_rng(self.params.seed());

        let x0 = prior.split(&prior.feasible_start(init)?);
        let positions = self.initial_positions(&x0, prior, n_walkers, &mut rng)?;
        let log_probs = (0..n_walkers)
            .into_par_iter()
            .map(|i| posterior.log_prob(positions.row(i)))
            .collect::<Result<Vec<f64>>>()?;
        if log_probs.iter().all(|v| !v.is_finite()) {
            return Err(GpError::NumericalError(
                "no initial walker has a finite log posterior".to_string(),
            ));
        }
        let mut state = SamplerState::new(positions, Array1::from(log_probs))?;

        let (n_burnin, n_samples) = (self.params.n_burnin(), self.params.n_samples());
        info!(
            "Sampling {} with {n_walkers} walkers, {n_burnin} burn-in and {n_samples} retained iterations",
            prior.free_names().join(", ")
        );
        let n_full = prior.registry().len();
        let mut samples = Array2::zeros((n_samples * n_walkers, n_full));
        let mut sample_log_probs = Array1::zeros(n_samples * n_walkers);
        let mut reject_streak = 0;
        for it in 0..(n_burnin + n_samples) {
            let n_accepted = stretch.step(&mut state, &posterior, &mut rng)?;
            debug!("Iteration {it}: {n_accepted}/{n_walkers} proposals accepted");
            if n_accepted == 0 {
                reject_streak += 1;
                warn!("Iteration {it}: every proposal rejected ({reject_streak} in a row)");
                if reject_streak > self.params.max_reject_streak() {
                    return Err(GpError::SamplerDivergence(format!(
                        "every proposal rejected during {reject_streak} consecutive iterations"
                    )));
                }
            } else {
                reject_streak = 0;
            }
            if it >= n_burnin {
                let offset = (it - n_burnin) * n_walkers;
                for (w, position) in state.positions().rows().into_iter().enumerate() {
                    samples
                        .row_mut(offset + w)
                        .assign(&prior.merge(position).values());
                    sample_log_probs[offset + w] = state.log_probs()[w];
                }
            }
        }

        let acceptance_fraction = state.acceptance_fraction();
        let chain = SampleChain {
            names: prior.registry().names().to_vec(),
            free_names: prior.free_names().to_vec(),
            samples,
            log_probs: sample_log_probs,
            acceptance_fraction,
            n_walkers,
        };
        info!(
            "Mean acceptance fraction: {:.3} ({} models built, {} failed)",
            chain.mean_acceptance_fraction(),
            posterior.n_eval(),
            posterior.n_failed()
        );
        Ok(chain)
    }

    /// Walkers uniformly drawn around `x0` within `init_spread` relative distance, each one
    /// redrawn until its prior is finite
    fn initial_positions<R: Rng>(
        &self,
        x0: &Array1<f64>,
        prior: &LogPrior,
        n_walkers: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        let spread = self.params.init_spread();
        let scales = x0.mapv(|v| if v != 0. { v.abs() } else { 1. });
        let mut positions = Array2::zeros((n_walkers, x0.len()));
        for mut walker in positions.rows_mut() {
            let mut n_draws = 0;
            loop {
                if n_draws == self.params.max_init_draws() {
                    return Err(GpError::ConstraintError(format!(
                        "no initial walker of finite prior found in {n_draws} draws around {}",
                        prior.merge(x0.view())
                    )));
                }
                n_draws += 1;
                for (j, wj) in walker.iter_mut().enumerate() {
                    *wj = x0[j] + spread * scales[j] * rng.gen_range(-1.0..=1.0);
                }
                if prior.value(walker.view()).is_finite() {
                    break;
                }
            }
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::ParamRegistry;
    use crate::posterior::Likelihood;
    use crate::prior::{Bound, Fixed};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Axis};
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Gaussian likelihood of variance 1/2 centered on `center`
    struct Quadratic {
        x: Array1<f64>,
        center: Array1<f64>,
    }

    impl Likelihood for Quadratic {
        fn log_likelihood(&self) -> f64 {
            -(&self.x - &self.center).mapv(|d| d * d).sum()
        }

        fn log_likelihood_grad(&self) -> Result<Array1<f64>> {
            Ok((&self.x - &self.center).mapv(|d| -2. * d))
        }
    }

    fn registry() -> Arc<ParamRegistry> {
        Arc::new(ParamRegistry::new(["a", "b", "c"]).unwrap())
    }

    fn quadratic(p: &HyperParams<f64>) -> Result<Quadratic> {
        Ok(Quadratic {
            x: p.values().to_owned(),
            center: array![1., -2., 3.],
        })
    }

    fn sampler(n_walkers: Option<usize>, seed: u64) -> HyperparameterSampler {
        HyperparameterSampler::new(
            HyperparameterSampler::params()
                .n_walkers(n_walkers)
                .n_burnin(200)
                .n_samples(500)
                .seed(Some(seed)),
        )
        .unwrap()
    }

    #[test]
    fn test_stretch_move() {
        let stretch = StretchMove::default();
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        for _ in 0..100 {
            let z = stretch.sample_z(&mut rng);
            assert!((0.5..=2.).contains(&z));
        }
        let others = array![[1., 1.], [1., 1.]];
        let (proposal, z) = stretch.propose(&mut rng, array![2., 3.].view(), others.view());
        assert_abs_diff_eq!(proposal, array![1. + z, 1. + 2. * z], epsilon = 1e-12);
        assert!(StretchMove::new(1.).is_err());
    }

    #[test]
    fn test_acceptance() {
        let stretch = StretchMove::default();
        assert!(stretch.accept(0.99, 1., 2, -1., 0.));
        assert!(!stretch.accept(0.5, 1., 2, 0., -10.));
        assert!(!stretch.accept(0., 1., 2, 0., f64::NEG_INFINITY));
        assert!(stretch.accept(0.99, 1., 2, f64::NEG_INFINITY, -1e3));
        // z^(d-1) factor
        assert!(stretch.accept(0.99, 2., 3, 0., -1.));
    }

    struct Flat;

    impl Likelihood for Flat {
        fn log_likelihood(&self) -> f64 {
            0.
        }

        fn log_likelihood_grad(&self) -> Result<Array1<f64>> {
            Ok(Array1::zeros(1))
        }
    }

    #[test]
    fn test_second_half_uses_updated_first_half() {
        let registry = Arc::new(ParamRegistry::new(["a"]).unwrap());
        let prior = LogPrior::build(&registry, &[], &[]).unwrap();
        let flat = |_: &HyperParams<f64>| -> Result<Flat> { Ok(Flat) };
        let posterior = TemperedPosterior::new(&flat, &prior, 1.).unwrap();
        let positions = array![[0.], [1.], [10.], [11.]];
        let mut state = SamplerState::new(positions.clone(), Array1::zeros(4)).unwrap();
        let stretch = StretchMove::default();
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let mut replay = rng.clone();

        // flat posterior in dimension 1: every proposal is accepted
        let n_accepted = stretch.step(&mut state, &posterior, &mut rng).unwrap();
        assert_eq!(n_accepted, 4);
        assert_eq!(state.iteration(), 1);

        let mut expected = positions;
        for i in 0..2 {
            let others = expected.slice(s![2..4, ..]).to_owned();
            let (proposal, _) = stretch.propose(&mut replay, expected.row(i), others.view());
            expected.row_mut(i).assign(&proposal);
        }
        let _: (f64, f64) = (replay.gen(), replay.gen());
        for i in 2..4 {
            let others = expected.slice(s![0..2, ..]).to_owned();
            let (proposal, _) = stretch.propose(&mut replay, expected.row(i), others.view());
            expected.row_mut(i).assign(&proposal);
        }
        assert_eq!(state.positions(), expected);
    }

    #[test]
    fn test_sample_gaussian() {
        let prior = LogPrior::build(&registry(), &[], &[Fixed::new("c", 0.)]).unwrap();
        let init = HyperParams::new(registry(), array![0.5, -1.5, 0.]).unwrap();
        let chain = sampler(Some(16), 0).sample(&quadratic, &prior, &init).unwrap();
        assert_eq!(chain.samples.dim(), (500 * 16, 3));
        assert_eq!(chain.log_probs.len(), 500 * 16);
        assert_eq!(chain.free_names, vec!["a", "b"]);
        let mean = chain.samples.mean_axis(Axis(0)).unwrap();
        assert_abs_diff_eq!(mean, array![1., -2., 0.], epsilon = 0.15);
        let var_a = chain.column("a").unwrap().var(0.);
        assert_abs_diff_eq!(var_a, 0.5, epsilon = 0.15);
        let (best, _) = chain.best().unwrap();
        assert_abs_diff_eq!(best, array![1., -2., 0.], epsilon = 0.2);
        let acceptance = chain.mean_acceptance_fraction();
        assert!(acceptance > 0.2 && acceptance < 0.9, "{acceptance}");
    }

    #[test]
    fn test_fixed_and_bounds_honored() {
        let prior = LogPrior::build(
            &registry(),
            &[Bound::new("a", 0.5, 0.8)],
            &[Fixed::new("b", 7.)],
        )
        .unwrap();
        let init = HyperParams::from_elem(registry(), 0.6);
        let chain = sampler(None, 1).sample(&quadratic, &prior, &init).unwrap();
        assert_eq!(chain.n_walkers, 6);
        assert!(chain.column("b").unwrap().iter().all(|&b| b == 7.));
        assert!(chain
            .column("a")
            .unwrap()
            .iter()
            .all(|&a| (0.5..=0.8).contains(&a)));
    }

    #[test]
    fn test_reproducible_chain() {
        let prior = LogPrior::build(&registry(), &[Bound::new("c", 0., 10.)], &[]).unwrap();
        let init = HyperParams::from_elem(registry(), 1.);
        let chain1 = sampler(Some(10), 5).sample(&quadratic, &prior, &init).unwrap();
        let chain2 = sampler(Some(10), 5).sample(&quadratic, &prior, &init).unwrap();
        assert_eq!(chain1.samples, chain2.samples);
        assert_eq!(chain1.log_probs, chain2.log_probs);
        let chain3 = sampler(Some(10), 6).sample(&quadratic, &prior, &init).unwrap();
        assert_ne!(chain1.samples, chain3.samples);
    }

    #[test]
    fn test_not_enough_walkers() {
        let n_calls = AtomicUsize::new(0);
        let counting = |p: &HyperParams<f64>| {
            n_calls.fetch_add(1, Ordering::Relaxed);
            quadratic(p)
        };
        let prior = LogPrior::build(&registry(), &[], &[]).unwrap();
        let init = HyperParams::from_elem(registry(), 1.);
        let res = sampler(Some(7), 0).sample(&counting, &prior, &init);
        assert!(matches!(res, Err(GpError::ConstraintError(_))));
        assert_eq!(n_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_all_fixed() {
        let prior = LogPrior::build(
            &registry(),
            &[],
            &[Fixed::new("a", 1.), Fixed::new("b", 2.), Fixed::new("c", 3.)],
        )
        .unwrap();
        let init = HyperParams::from_elem(registry(), 1.);
        let res = sampler(None, 0).sample(&quadratic, &prior, &init);
        assert!(matches!(res, Err(GpError::ConstraintError(_))));
    }

    #[test]
    fn test_divergence() {
        // only the initial walkers get a model
        let n_calls = AtomicUsize::new(0);
        let failing_after_init = |p: &HyperParams<f64>| {
            if n_calls.fetch_add(1, Ordering::Relaxed) < 8 {
                quadratic(p)
            } else {
                Err(GpError::NumericalError("not positive definite".to_string()))
            }
        };
        let prior = LogPrior::build(&registry(), &[], &[]).unwrap();
        let init = HyperParams::from_elem(registry(), 1.);
        let sampler = HyperparameterSampler::new(
            HyperparameterSampler::params()
                .n_walkers(Some(8))
                .n_burnin(10)
                .n_samples(10)
                .max_reject_streak(3)
                .seed(Some(0)),
        )
        .unwrap();
        let res = sampler.sample(&failing_after_init, &prior, &init);
        assert!(matches!(res, Err(GpError::SamplerDivergence(_))));
    }

    #[test]
    fn test_initial_walkers_all_fail() {
        let failing = |_: &HyperParams<f64>| -> Result<Quadratic> {
            Err(GpError::NumericalError("not positive definite".to_string()))
        };
        let prior = LogPrior::build(&registry(), &[], &[]).unwrap();
        let init = HyperParams::from_elem(registry(), 1.);
        let res = sampler(None, 0).sample(&failing, &prior, &init);
        assert!(matches!(res, Err(GpError::NumericalError(_))));
    }
}
