use crate::dataset::TrainingSet;
use crate::errors::{GpError, Result};
use crate::hyperparameters::HyperParams;
use crate::kernels::Kernel;
use crate::utils::clip_negative;

use linfa::Float;
use linfa_linalg::{cholesky::*, eigh::*, triangular::*};
use log::debug;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix2};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use std::fmt;

/// Maximum number of diagonal jitter increases before giving up factorization
pub const MAX_JITTER_ATTEMPTS: usize = 10;
/// First jitter relative to the mean of the covariance diagonal
const JITTER_BASE: f64 = 1e-10;
/// Jitter growth factor between two attempts
const JITTER_GROWTH: f64 = 10.;

/// Gaussian process conditioned on a training set for one hyperparameter point.
///
/// The model is a zero mean gaussian process `Z(x)` of covariance `k(x, x')` given by
/// a [`Kernel`] at hyperparameters `theta`, observed with a white noise of standard
/// deviation `noise` (plus per point uncertainties if the training set has some).
///
/// At construction the covariance matrix of the training inputs
///
/// `K = k(X, X) + diag(noise^2 + sigma_i^2)`
///
/// is factorized as `L L^t` (adding a growing diagonal jitter when `K` is not numerically
/// positive definite) and the weights `alpha = K^-1 f` are cached.
/// A model is never mutated afterwards: a new hyperparameter point means a new model.
///
/// # Predictions
///
/// * mean: `K(X*, X) alpha`,
/// * variance: `diag(K(X*, X*)) - colsum((L^-1 K(X, X*))^2)`, clipped at zero,
/// * derivatives of both wrt `X*` using [`Kernel::grad_x`].
///
/// # Example
///
/// ```no_run
/// use mgpi_gp::{GaussianProcessModel, HyperParams, Kernel, SquaredExponentialKernel, TrainingSet};
/// use ndarray::{array, Array, Axis};
///
/// let xt = Array::linspace(0., 6., 10).insert_axis(Axis(1));
/// let ft = xt.column(0).mapv(f64::sin);
/// let data = TrainingSet::new(xt, ft).expect("valid data");
///
/// let kernel = SquaredExponentialKernel::new(1);
/// let params = HyperParams::new(kernel.registry().clone(), array![1., 1.]).expect("2 values");
/// let gp = GaussianProcessModel::fit(&kernel, &data, params, 0.).expect("GP fitted");
///
/// let (mean, var) = gp.predict(&array![[0.5], [2.5]]).expect("prediction");
/// println!("mean = {mean}, variance = {var}");
/// println!("log marginal likelihood = {}", gp.log_marginal_likelihood());
/// ```
pub struct GaussianProcessModel<'a, F: Float, K: Kernel<F> + ?Sized> {
    kernel: &'a K,
    data: &'a TrainingSet<F>,
    params: HyperParams<F>,
    noise: F,
    /// Diagonal jitter finally added to `K`
    jitter: F,
    /// Lower cholesky factor of `K + jitter I`
    chol: Array2<F>,
    /// `K^-1 f`
    alpha: Array1<F>,
}

impl<'a, F: Float, K: Kernel<F> + ?Sized> GaussianProcessModel<'a, F, K> {
    /// Condition the gaussian process of the given kernel and hyperparameters
    /// on the training data with a white `noise` standard deviation.
    ///
    /// Fails with [`GpError::NumericalError`] when the covariance matrix cannot be
    /// factorized even after [`MAX_JITTER_ATTEMPTS`] jitter increases.
    pub fn fit(
        kernel: &'a K,
        data: &'a TrainingSet<F>,
        params: HyperParams<F>,
        noise: F,
    ) -> Result<Self> {
        if params.registry().as_ref() != kernel.registry().as_ref() {
            return Err(GpError::InvalidValueError(format!(
                "hyperparameters ({}) do not match kernel {}",
                params.registry().names().join(", "),
                kernel
            )));
        }
        if let Some(dim) = kernel.input_dim() {
            if dim != data.ncols() {
                return Err(GpError::DataShapeError(format!(
                    "kernel {kernel} expects {dim}-dimensional inputs, training inputs are {}-dimensional",
                    data.ncols()
                )));
            }
        }

        let mut k = kernel.evaluate(params.values(), data.x(), data.x());
        let mut diag = k.diag_mut();
        diag += noise * noise;
        if let Some(sigma) = data.sigma() {
            diag += &sigma.mapv(|s| s * s);
        }
        if k.iter().any(|v| !v.is_finite()) {
            return Err(GpError::NumericalError(format!(
                "non finite covariance matrix at {params}"
            )));
        }

        let (chol, jitter) = stable_cholesky(&k)?;
        let f = data.f().insert_axis(Axis(1));
        let y = chol.solve_triangular(&f, UPLO::Lower)?;
        let alpha = chol.t().solve_triangular_into(y, UPLO::Upper)?;

        Ok(GaussianProcessModel {
            kernel,
            data,
            params,
            noise,
            jitter,
            chol,
            alpha: alpha.remove_axis(Axis(1)),
        })
    }

    /// Kernel of the gaussian process
    pub fn kernel(&self) -> &'a K {
        self.kernel
    }

    /// Training data the process is conditioned on
    pub fn data(&self) -> &'a TrainingSet<F> {
        self.data
    }

    /// Hyperparameters of the kernel
    pub fn params(&self) -> &HyperParams<F> {
        &self.params
    }

    /// White noise standard deviation
    pub fn noise(&self) -> F {
        self.noise
    }

    /// Diagonal jitter which was needed to factorize the covariance matrix (zero most of the time)
    pub fn jitter(&self) -> F {
        self.jitter
    }

    /// Lower cholesky factor `L` of the training covariance matrix
    pub fn cholesky(&self) -> ArrayView2<'_, F> {
        self.chol.view()
    }

    /// Compressed representation of the training data `alpha = K^-1 f`,
    /// predicted mean values only need `K(X*, X) alpha`
    pub fn compress(&self) -> ArrayView1<'_, F> {
        self.alpha.view()
    }

    fn check_query(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        if x.ncols() != self.data.ncols() {
            return Err(GpError::InvalidValueError(format!(
                "query points should be {}-dimensional, got {}",
                self.data.ncols(),
                x.ncols()
            )));
        }
        Ok(())
    }

    /// `L^-1 K(X, X*)` of shape (n, m)
    fn whitened_cross_cov(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        let k_x_xt = self
            .kernel
            .evaluate(self.params.values(), self.data.x(), x.view());
        Ok(self.chol.solve_triangular(&k_x_xt, UPLO::Lower)?)
    }

    /// Predict mean values at the given (m, nx) points
    pub fn predict_mean(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.check_query(x)?;
        let k_xt_x = self
            .kernel
            .evaluate(self.params.values(), x.view(), self.data.x());
        Ok(k_xt_x.dot(&self.alpha))
    }

    /// Predict mean values and variances at the given (m, nx) points
    pub fn predict(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        let mean = self.predict_mean(x)?;
        let v = self.whitened_cross_cov(x)?;
        let var = self.kernel.diag(self.params.values(), x.view())
            - v.mapv(|e| e * e).sum_axis(Axis(0));
        Ok((mean, clip_negative(&var)))
    }

    /// Conditioned covariance matrix `K(X*, X*) - K(X*, X) K^-1 K(X, X*)` at the given (m, nx) points
    pub fn covariance(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        self.check_query(x)?;
        let v = self.whitened_cross_cov(x)?;
        let k_xt_xt = self
            .kernel
            .evaluate(self.params.values(), x.view(), x.view());
        Ok(k_xt_xt - v.t().dot(&v))
    }

    /// Predict derivatives of the mean and of the variance wrt the components of
    /// the given (m, nx) points, returned as two (m, nx) matrices.
    ///
    /// Kernels are assumed stationary so that `k(x, x)` does not depend on `x`.
    pub fn predict_gradients(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array2<F>, Array2<F>)> {
        self.check_query(x)?;
        let theta = self.params.values();
        let mut mean_grads = Array2::zeros((x.nrows(), x.ncols()));
        let mut var_grads = Array2::zeros((x.nrows(), x.ncols()));
        let two = F::cast(2.);
        for (i, xi) in x.rows().into_iter().enumerate() {
            // (n, nx) derivatives of k(x, X) wrt x
            let dk = self.kernel.grad_x(theta, xi, self.data.x());
            mean_grads.row_mut(i).assign(&dk.t().dot(&self.alpha));

            let v = self.whitened_cross_cov(&xi.insert_axis(Axis(0)))?;
            let dv = self.chol.solve_triangular(&dk, UPLO::Lower)?;
            let dvar = v.t().dot(&dv).remove_axis(Axis(0)).mapv(|e| -two * e);
            var_grads.row_mut(i).assign(&dvar);
        }
        Ok((mean_grads, var_grads))
    }

    /// Draw `n_traj` realizations of the conditioned gaussian process at the given (m, nx) points.
    ///
    /// Returns a (m, n_traj) matrix. The conditioned covariance matrix is decomposed with
    /// its eigenvalues, clipped at zero, which copes better with ill-conditioning than
    /// a cholesky decomposition as the number of points grows.
    pub fn sample<R: Rng>(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
        rng: &mut R,
    ) -> Result<Array2<F>> {
        let mean = self.predict_mean(x)?;
        let cov = self.covariance(x)?;
        let (eigvals, eigvecs) = cov.eigh_into()?;
        let sqrt_eigvals = eigvals.mapv(|v| {
            // lower bound at 1e-9
            if v < F::cast(1e-9) {
                F::zero()
            } else {
                v.sqrt()
            }
        });
        let c = eigvecs * sqrt_eigvals.insert_axis(Axis(0));
        let normal =
            Array2::<f64>::random_using((x.nrows(), n_traj), StandardNormal, rng).mapv(F::cast);
        Ok(mean.insert_axis(Axis(1)) + c.dot(&normal))
    }

    /// Log marginal likelihood `-1/2 f^t alpha - sum(log(diag(L))) - n/2 log(2 pi)`
    pub fn log_marginal_likelihood(&self) -> F {
        let n = F::cast(self.data.n_obs());
        let data_fit = self.data.f().dot(&self.alpha);
        let logdet = self.chol.diag().mapv(|v| v.ln()).sum();
        -F::cast(0.5) * data_fit - logdet - F::cast(0.5) * n * F::cast(std::f64::consts::TAU).ln()
    }

    /// Gradient of the log marginal likelihood wrt the kernel hyperparameters, in registry order:
    ///
    /// `1/2 (alpha^t dK alpha - trace(K^-1 dK))`
    pub fn log_marginal_likelihood_grad(&self) -> Result<Array1<F>> {
        let n = self.data.n_obs();
        let chol_inv = self
            .chol
            .solve_triangular(&Array2::eye(n), UPLO::Lower)?;
        let k_inv = chol_inv.t().dot(&chol_inv);
        let half = F::cast(0.5);
        let grads = self
            .kernel
            .grad_params(self.params.values(), self.data.x(), self.data.x());
        Ok(grads
            .iter()
            .map(|dk| {
                let fit = self.alpha.dot(&dk.dot(&self.alpha));
                let trace = (&k_inv * dk).sum();
                half * (fit - trace)
            })
            .collect())
    }
}

impl<F: Float, K: Kernel<F> + ?Sized> fmt::Display for GaussianProcessModel<'_, F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(kernel={}, params=[{}], noise={}, jitter={})",
            self.kernel, self.params, self.noise, self.jitter
        )
    }
}

fn try_cholesky<F: Float>(k: &Array2<F>) -> Option<Array2<F>> {
    k.cholesky()
        .ok()
        .filter(|l| l.diag().iter().all(|v| v.is_finite() && *v > F::zero()))
}

/// Cholesky factorization of `k`, retrying with an exponentially growing diagonal jitter.
/// Returns the lower factor and the jitter which was added.
fn stable_cholesky<F: Float>(k: &Array2<F>) -> Result<(Array2<F>, F)> {
    if let Some(chol) = try_cholesky(k) {
        return Ok((chol, F::zero()));
    }
    let mut scale = k.diag().sum() / F::cast(k.nrows());
    if !(scale > F::epsilon()) {
        scale = F::one();
    }
    let mut jitter = scale * F::cast(JITTER_BASE);
    for attempt in 1..=MAX_JITTER_ATTEMPTS {
        let mut kj = k.to_owned();
        let mut diag = kj.diag_mut();
        diag += jitter;
        if let Some(chol) = try_cholesky(&kj) {
            debug!("Covariance matrix factorized with jitter={jitter:e} (attempt {attempt})");
            return Ok((chol, jitter));
        }
        jitter *= F::cast(JITTER_GROWTH);
    }
    Err(GpError::NumericalError(format!(
        "covariance matrix not positive definite after {MAX_JITTER_ATTEMPTS} jitter attempts \
        (last jitter={:e})",
        jitter / F::cast(JITTER_GROWTH)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::*;
    use approx::assert_abs_diff_eq;
    use finitediff::FiniteDiff;
    use ndarray::{array, Array};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use paste::paste;
    use rand_xoshiro::Xoshiro256Plus;

    fn sin_data(n: usize) -> TrainingSet<f64> {
        let xt = Array::linspace(0., std::f64::consts::TAU, n).insert_axis(Axis(1));
        let ft = xt.column(0).mapv(f64::sin);
        TrainingSet::new(xt, ft).unwrap()
    }

    fn fitted<'a, K: Kernel<f64>>(
        kernel: &'a K,
        data: &'a TrainingSet<f64>,
        values: Array1<f64>,
        noise: f64,
    ) -> GaussianProcessModel<'a, f64, K> {
        let params = HyperParams::new(kernel.registry().clone(), values).unwrap();
        GaussianProcessModel::fit(kernel, data, params, noise).unwrap()
    }

    #[test]
    fn test_cholesky_round_trip() {
        let data = sin_data(15);
        let kernel = SquaredExponentialKernel::new(1);
        let theta = array![1.2, 0.8];
        let gp = fitted(&kernel, &data, theta.clone(), 0.05);
        let mut k = kernel.evaluate(theta.view(), data.x(), data.x());
        k.diag_mut().mapv_inplace(|v| v + 0.05 * 0.05);

        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let v = Array1::<f64>::random_using(15, Uniform::new(-1., 1.), &mut rng);
        let l = gp.cholesky();
        assert_abs_diff_eq!(l.dot(&l.t().dot(&v)), k.dot(&v), epsilon = 1e-10);
        assert_eq!(gp.jitter(), 0.);
    }

    #[test]
    fn test_jitter_on_duplicated_points() {
        let xt = array![[0.], [1.], [1.], [2.]];
        let data = TrainingSet::new(xt, array![0., 1., 1., 0.]).unwrap();
        let kernel = SquaredExponentialKernel::new(1);
        let gp = fitted(&kernel, &data, array![1., 1.], 0.);
        assert!(gp.log_marginal_likelihood().is_finite());
        let (mean, _) = gp.predict(&array![[1.5]]).unwrap();
        assert!(mean[0].is_finite());
    }

    #[test]
    fn test_stable_cholesky() {
        let (chol, jitter) =
            stable_cholesky::<f64>(&array![[1., 1.], [1., 1. - 1e-12]]).unwrap();
        assert!(jitter > 0.);
        assert!(chol.iter().all(|v| v.is_finite()));
        let res = stable_cholesky::<f64>(&array![[-1., 0.], [0., -1.]]);
        assert!(matches!(res, Err(GpError::NumericalError(_))));
    }

    #[test]
    fn test_non_finite_covariance() {
        let data = sin_data(5);
        let kernel = SquaredExponentialKernel::new(1);
        let params = HyperParams::new(kernel.registry().clone(), array![1., 0.]).unwrap();
        let res = GaussianProcessModel::fit(&kernel, &data, params, 0.);
        assert!(matches!(res, Err(GpError::NumericalError(_))));
    }

    #[test]
    fn test_interpolation_at_training_points() {
        let data = sin_data(10);
        let kernel = SquaredExponentialKernel::new(1);
        let gp = fitted(&kernel, &data, array![1., 1.], 0.);
        let (mean, var) = gp.predict(&data.x()).unwrap();
        assert_abs_diff_eq!(mean, data.f(), epsilon = 1e-6);
        assert!(var.iter().all(|&v| (0. ..1e-8).contains(&v)), "{var}");
        // far away the prior is recovered
        let (mean, var) = gp.predict(&array![[50.]]).unwrap();
        assert_abs_diff_eq!(mean[0], 0., epsilon = 1e-10);
        assert_abs_diff_eq!(var[0], 1., epsilon = 1e-10);
    }

    #[test]
    fn test_uncertainty_on_diagonal() {
        let data = sin_data(10);
        let noisy = sin_data(10).with_uncertainty(Array1::from_elem(10, 0.1)).unwrap();
        let kernel = SquaredExponentialKernel::new(1);
        let gp = fitted(&kernel, &data, array![1., 1.], 0.1);
        let gp_noisy = fitted(&kernel, &noisy, array![1., 1.], 0.);
        assert_abs_diff_eq!(gp.cholesky(), gp_noisy.cholesky(), epsilon = 1e-14);
    }

    #[test]
    fn test_covariance_and_samples() {
        let data = sin_data(10);
        let kernel = Matern52Kernel::new(1);
        let gp = fitted(&kernel, &data, array![1., 1.5], 0.);
        let x = Array::linspace(0., 6., 7).insert_axis(Axis(1));
        let cov = gp.covariance(&x).unwrap();
        let (_, var) = gp.predict(&x).unwrap();
        assert_abs_diff_eq!(cov.diag().mapv(|v| v.max(0.)), var, epsilon = 1e-12);
        assert_abs_diff_eq!(cov, cov.t(), epsilon = 1e-12);

        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let traj = gp.sample(&x, 500, &mut rng).unwrap();
        assert_eq!(traj.dim(), (7, 500));
        let mean = gp.predict_mean(&x).unwrap();
        let traj_mean = traj.mean_axis(Axis(1)).unwrap();
        assert_abs_diff_eq!(traj_mean, mean, epsilon = 0.1);
    }

    #[test]
    fn test_lml_known_value() {
        // single observation: K = sigma^2 + noise^2
        let data = TrainingSet::new(array![[0.3]], array![2.]).unwrap();
        let kernel = SquaredExponentialKernel::new(1);
        let gp = fitted(&kernel, &data, array![1.5, 1.], 0.5);
        let k: f64 = 1.5 * 1.5 + 0.5 * 0.5;
        let expected = -0.5 * 4. / k - 0.5 * k.ln() - 0.5 * std::f64::consts::TAU.ln();
        assert_abs_diff_eq!(gp.log_marginal_likelihood(), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(gp.compress()[0], 2. / k, epsilon = 1e-12);
    }

    #[test]
    fn test_bad_query_dimension() {
        let data = sin_data(5);
        let kernel = SquaredExponentialKernel::new(1);
        let gp = fitted(&kernel, &data, array![1., 1.], 0.);
        assert!(matches!(
            gp.predict(&array![[0., 1.]]),
            Err(GpError::InvalidValueError(_))
        ));
    }

    #[test]
    fn test_kernel_dimension_mismatch() {
        let data = sin_data(5);
        let kernel = SquaredExponentialKernel::new(2);
        let params = HyperParams::from_elem(kernel.registry().clone(), 1.);
        assert!(matches!(
            GaussianProcessModel::fit(&kernel, &data, params, 0.),
            Err(GpError::DataShapeError(_))
        ));
    }

    macro_rules! test_gp_derivatives {
        ($kernel:ident) => {
            paste! {
                #[test]
                fn [<test_lml_grad_ $kernel:snake>]() {
                    let mut rng = Xoshiro256Plus::seed_from_u64(7);
                    let xt = Array2::<f64>::random_using((12, 2), Uniform::new(0., 3.), &mut rng);
                    let ft = xt.map_axis(Axis(1), |r| r[0].sin() * r[1].cos());
                    let data = TrainingSet::new(xt, ft).unwrap();
                    let kernel = [<$kernel Kernel>]::new(2);
                    let theta = vec![0.9, 1.1, 1.7];
                    let lml = |t: &Vec<f64>| -> f64 {
                        fitted(&kernel, &data, Array1::from(t.clone()), 0.1).log_marginal_likelihood()
                    };
                    let fdiff = theta.central_diff(&lml);
                    let grad = fitted(&kernel, &data, Array1::from(theta.clone()), 0.1)
                        .log_marginal_likelihood_grad()
                        .unwrap();
                    assert_abs_diff_eq!(grad, Array1::from(fdiff), epsilon = 1e-5);
                }

                #[test]
                fn [<test_predict_gradients_ $kernel:snake>]() {
                    let mut rng = Xoshiro256Plus::seed_from_u64(3);
                    let xt = Array2::<f64>::random_using((15, 2), Uniform::new(0., 3.), &mut rng);
                    let ft = xt.map_axis(Axis(1), |r| r[0].sin() + r[1] * r[1]);
                    let data = TrainingSet::new(xt, ft).unwrap();
                    let kernel = [<$kernel Kernel>]::new(2);
                    let gp = fitted(&kernel, &data, array![2., 1., 1.5], 0.01);

                    let x = array![[1.23, 2.11], [0.37, 0.52]];
                    let (mean_grads, var_grads) = gp.predict_gradients(&x).unwrap();
                    let e = 1e-6;
                    for i in 0..x.nrows() {
                        for j in 0..2 {
                            let mut up = x.row(i).to_owned().insert_axis(Axis(0));
                            up[[0, j]] += e;
                            let mut down = x.row(i).to_owned().insert_axis(Axis(0));
                            down[[0, j]] -= e;
                            let (m_up, v_up) = gp.predict(&up).unwrap();
                            let (m_down, v_down) = gp.predict(&down).unwrap();
                            assert_abs_diff_eq!(mean_grads[[i, j]], (m_up[0] - m_down[0]) / (2. * e), epsilon = 1e-5);
                            assert_abs_diff_eq!(var_grads[[i, j]], (v_up[0] - v_down[0]) / (2. * e), epsilon = 1e-5);
                        }
                    }
                }
            }
        };
    }

    test_gp_derivatives!(SquaredExponential);
    test_gp_derivatives!(Matern32);
    test_gp_derivatives!(Matern52);

    #[test]
    fn test_sum_kernel_model() {
        let data = sin_data(12);
        let kernel = SumKernel::new(vec![
            Box::new(SquaredExponentialKernel::new(1)) as Box<dyn Kernel<f64>>,
            Box::new(WhiteNoiseKernel::new()),
        ])
        .unwrap();
        let se = SquaredExponentialKernel::new(1);
        let gp = fitted(&kernel, &data, array![1., 1., 0.1], 0.);
        let gp_noise = fitted(&se, &data, array![1., 1.], 0.1);
        assert_abs_diff_eq!(
            gp.log_marginal_likelihood(),
            gp_noise.log_marginal_likelihood(),
            epsilon = 1e-10
        );
        assert_eq!(gp.log_marginal_likelihood_grad().unwrap().len(), 3);
    }
}
