//! A module for covariance kernels used to model tabulated data as a gaussian process.
//!
//! The following kernel families are implemented:
//! * squared exponential,
//! * matern 3/2,
//! * matern 5/2,
//! * exponential (matern 1/2),
//! * white noise,
//! * sum of kernels.
//!
//! Stationary kernels are anisotropic: they are parameterized by an amplitude `sigma`
//! and one length scale per input dimension `length0`, ..., `length{nx-1}`.

use crate::errors::{GpError, Result};
use crate::hyperparameters::ParamRegistry;
use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use std::fmt;
use std::sync::Arc;

/// A trait for a differentiable covariance function `k(x, x')` over nx-dimensional inputs.
///
/// Hyperparameter values `theta` are given in the order of the kernel [`ParamRegistry`].
pub trait Kernel<F: Float>: fmt::Display + Send + Sync {
    /// Hyperparameter names, fixed at kernel construction
    fn registry(&self) -> &Arc<ParamRegistry>;

    /// Expected input dimension, `None` when the kernel accepts any dimension
    fn input_dim(&self) -> Option<usize>;

    /// Covariance matrix `K(x1, x2)` of shape (n1, n2) given `x1` (n1, nx) and `x2` (n2, nx)
    fn evaluate(&self, theta: ArrayView1<F>, x1: ArrayView2<F>, x2: ArrayView2<F>) -> Array2<F>;

    /// Derivatives of `K(x1, x2)` wrt each hyperparameter, one (n1, n2) matrix per registry entry
    fn grad_params(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: ArrayView2<F>,
    ) -> Vec<Array2<F>>;

    /// Derivatives of `k(x, xt_i)` wrt the components of the query point `x`
    /// given training points `xt` (n, nx). Returns a (n, nx) matrix.
    fn grad_x(&self, theta: ArrayView1<F>, x: ArrayView1<F>, xt: ArrayView2<F>) -> Array2<F>;

    /// Self covariances `k(x_i, x_i)` as a (n,) vector
    fn diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Array1<F> {
        x.rows()
            .into_iter()
            .map(|row| {
                let row = row.insert_axis(Axis(0));
                self.evaluate(theta, row, row)[[0, 0]]
            })
            .collect()
    }

    /// Number of hyperparameters
    fn n_params(&self) -> usize {
        self.registry().len()
    }
}

impl<F: Float> Kernel<F> for Box<dyn Kernel<F>> {
    fn registry(&self) -> &Arc<ParamRegistry> {
        self.as_ref().registry()
    }

    fn input_dim(&self) -> Option<usize> {
        self.as_ref().input_dim()
    }

    fn evaluate(&self, theta: ArrayView1<F>, x1: ArrayView2<F>, x2: ArrayView2<F>) -> Array2<F> {
        self.as_ref().evaluate(theta, x1, x2)
    }

    fn grad_params(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: ArrayView2<F>,
    ) -> Vec<Array2<F>> {
        self.as_ref().grad_params(theta, x1, x2)
    }

    fn grad_x(&self, theta: ArrayView1<F>, x: ArrayView1<F>, xt: ArrayView2<F>) -> Array2<F> {
        self.as_ref().grad_x(theta, x, xt)
    }

    fn diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Array1<F> {
        self.as_ref().diag(theta, x)
    }
}

/// Shape `g(r2)` of a stationary kernel as a function of the scaled squared distance
/// `r2 = sum_j (x_j - x'_j)^2 / length_j^2`.
pub trait RadialProfile: Clone + Copy + Default + fmt::Display + Send + Sync {
    /// Value `g(r2)` with `g(0) = 1`
    fn value<F: Float>(&self, r2: F) -> F;

    /// Derivative `dg/dr2`
    fn derivative<F: Float>(&self, r2: F) -> F;
}

/// Squared exponential profile `exp(-r2)`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SquaredExponential;

impl RadialProfile for SquaredExponential {
    fn value<F: Float>(&self, r2: F) -> F {
        F::exp(-r2)
    }

    fn derivative<F: Float>(&self, r2: F) -> F {
        -F::exp(-r2)
    }
}

impl fmt::Display for SquaredExponential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SquaredExponential")
    }
}

/// Matern 3/2 profile `(1 + sqrt(3) r) exp(-sqrt(3) r)`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Matern32;

impl RadialProfile for Matern32 {
    fn value<F: Float>(&self, r2: F) -> F {
        let sqrt3_r = F::cast(3.).sqrt() * r2.sqrt();
        (F::one() + sqrt3_r) * F::exp(-sqrt3_r)
    }

    fn derivative<F: Float>(&self, r2: F) -> F {
        let sqrt3_r = F::cast(3.).sqrt() * r2.sqrt();
        F::cast(-1.5) * F::exp(-sqrt3_r)
    }
}

impl fmt::Display for Matern32 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern32")
    }
}

/// Matern 5/2 profile `(1 + sqrt(5) r + 5/3 r^2) exp(-sqrt(5) r)`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Matern52;

impl RadialProfile for Matern52 {
    fn value<F: Float>(&self, r2: F) -> F {
        let sqrt5_r = F::cast(5.).sqrt() * r2.sqrt();
        (F::one() + sqrt5_r + F::cast(5. / 3.) * r2) * F::exp(-sqrt5_r)
    }

    fn derivative<F: Float>(&self, r2: F) -> F {
        let sqrt5_r = F::cast(5.).sqrt() * r2.sqrt();
        F::cast(-5. / 6.) * (F::one() + sqrt5_r) * F::exp(-sqrt5_r)
    }
}

impl fmt::Display for Matern52 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern52")
    }
}

/// Exponential profile `exp(-r)`, not differentiable at `r = 0` where a zero derivative is used
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Exponential;

impl RadialProfile for Exponential {
    fn value<F: Float>(&self, r2: F) -> F {
        F::exp(-r2.sqrt())
    }

    fn derivative<F: Float>(&self, r2: F) -> F {
        if r2 > F::zero() {
            let r = r2.sqrt();
            -F::exp(-r) / (F::cast(2.) * r)
        } else {
            F::zero()
        }
    }
}

impl fmt::Display for Exponential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Exponential")
    }
}

/// Anisotropic stationary kernel `k(x, x') = sigma^2 g(sum_j (x_j - x'_j)^2 / length_j^2)`
#[derive(Clone, Debug)]
pub struct StationaryKernel<P: RadialProfile> {
    profile: P,
    dim: usize,
    registry: Arc<ParamRegistry>,
}

/// Squared exponential kernel `sigma^2 exp(-sum_j (x_j - x'_j)^2 / length_j^2)`
pub type SquaredExponentialKernel = StationaryKernel<SquaredExponential>;
/// Matern 3/2 kernel
pub type Matern32Kernel = StationaryKernel<Matern32>;
/// Matern 5/2 kernel
pub type Matern52Kernel = StationaryKernel<Matern52>;
/// Exponential kernel (matern 1/2)
pub type ExponentialKernel = StationaryKernel<Exponential>;

impl<P: RadialProfile> StationaryKernel<P> {
    /// Kernel over `dim`-dimensional inputs with hyperparameters `sigma, length0, ...`
    ///
    /// **Panics** if `dim` is 0.
    pub fn new(dim: usize) -> Self {
        Self::with_prefix(dim, "")
    }

    /// Same as [`StationaryKernel::new`] with every hyperparameter name prefixed,
    /// which allows summing kernels of the same family.
    ///
    /// **Panics** if `dim` is 0.
    pub fn with_prefix(dim: usize, prefix: &str) -> Self {
        assert!(dim > 0, "kernel input dimension should be at least 1");
        let names = std::iter::once(format!("{prefix}sigma"))
            .chain((0..dim).map(|i| format!("{prefix}length{i}")))
            .collect();
        StationaryKernel {
            profile: P::default(),
            dim,
            registry: Arc::new(ParamRegistry::from_unique(names)),
        }
    }

    /// Hyperparameter names `sigma, length0, ...`
    pub fn registry(&self) -> &Arc<ParamRegistry> {
        &self.registry
    }

    /// Input dimension
    pub fn dim(&self) -> usize {
        self.dim
    }

    fn split<F: Float>(&self, theta: ArrayView1<F>) -> (F, Array1<F>) {
        let sigma = theta[0];
        let inv_l2 = theta.slice(s![1..]).mapv(|l| F::one() / (l * l));
        (sigma, inv_l2)
    }
}

fn scaled_sqdist<F: Float>(a: ArrayView1<F>, b: ArrayView1<F>, inv_l2: &Array1<F>) -> F {
    let mut r2 = F::zero();
    Zip::from(&a).and(&b).and(inv_l2).for_each(|&ai, &bi, &w| {
        let d = ai - bi;
        r2 += d * d * w;
    });
    r2
}

impl<F: Float, P: RadialProfile> Kernel<F> for StationaryKernel<P> {
    fn registry(&self) -> &Arc<ParamRegistry> {
        &self.registry
    }

    fn input_dim(&self) -> Option<usize> {
        Some(self.dim)
    }

    fn evaluate(&self, theta: ArrayView1<F>, x1: ArrayView2<F>, x2: ArrayView2<F>) -> Array2<F> {
        let (sigma, inv_l2) = self.split(theta);
        let sigma2 = sigma * sigma;
        let profile = self.profile;
        let mut k = Array2::zeros((x1.nrows(), x2.nrows()));
        Zip::from(k.rows_mut())
            .and(x1.rows())
            .par_for_each(|mut k_i, x1_i| {
                Zip::from(&mut k_i).and(x2.rows()).for_each(|k_ij, x2_j| {
                    *k_ij = sigma2 * profile.value(scaled_sqdist(x1_i, x2_j, &inv_l2));
                });
            });
        k
    }

    fn grad_params(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: ArrayView2<F>,
    ) -> Vec<Array2<F>> {
        let (sigma, inv_l2) = self.split(theta);
        let lengths = theta.slice(s![1..]);
        let two = F::cast(2.);
        let sigma2 = sigma * sigma;
        let mut grads = vec![Array2::zeros((x1.nrows(), x2.nrows())); 1 + self.dim];
        for (i, x1_i) in x1.rows().into_iter().enumerate() {
            for (j, x2_j) in x2.rows().into_iter().enumerate() {
                let r2 = scaled_sqdist(x1_i, x2_j, &inv_l2);
                grads[0][[i, j]] = two * sigma * self.profile.value(r2);
                // dr2/dlength_k = -2 d_k^2 / length_k^3
                let dg = self.profile.derivative(r2);
                for k in 0..self.dim {
                    let d = x1_i[k] - x2_j[k];
                    grads[k + 1][[i, j]] = -two * sigma2 * dg * d * d * inv_l2[k] / lengths[k];
                }
            }
        }
        grads
    }

    fn grad_x(&self, theta: ArrayView1<F>, x: ArrayView1<F>, xt: ArrayView2<F>) -> Array2<F> {
        let (sigma, inv_l2) = self.split(theta);
        let two = F::cast(2.);
        let sigma2 = sigma * sigma;
        let mut jac = Array2::zeros((xt.nrows(), self.dim));
        Zip::from(jac.rows_mut())
            .and(xt.rows())
            .for_each(|mut jac_i, xt_i| {
                let dg = self.profile.derivative(scaled_sqdist(x, xt_i, &inv_l2));
                Zip::from(&mut jac_i)
                    .and(&x)
                    .and(&xt_i)
                    .and(&inv_l2)
                    .for_each(|jac_ij, &xj, &xtj, &w| {
                        *jac_ij = two * sigma2 * dg * (xj - xtj) * w;
                    });
            });
        jac
    }

    fn diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Array1<F> {
        Array1::from_elem(x.nrows(), theta[0] * theta[0] * self.profile.value(F::zero()))
    }
}

impl<P: RadialProfile> fmt::Display for StationaryKernel<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.profile, self.registry.names().join(", "))
    }
}

/// White noise kernel `k(x, x') = noise^2 delta(x - x')`, accepts inputs of any dimension
#[derive(Clone, Debug)]
pub struct WhiteNoiseKernel {
    registry: Arc<ParamRegistry>,
}

impl Default for WhiteNoiseKernel {
    fn default() -> Self {
        Self::with_name("noise")
    }
}

impl WhiteNoiseKernel {
    /// White noise kernel with its amplitude named `noise`
    pub fn new() -> Self {
        Self::default()
    }

    /// White noise kernel with a custom amplitude name
    pub fn with_name(name: &str) -> Self {
        WhiteNoiseKernel {
            registry: Arc::new(ParamRegistry::from_unique(vec![name.to_string()])),
        }
    }

    /// Single hyperparameter name
    pub fn registry(&self) -> &Arc<ParamRegistry> {
        &self.registry
    }

    fn delta<F: Float>(x1: ArrayView2<F>, x2: ArrayView2<F>) -> Array2<F> {
        let mut d = Array2::zeros((x1.nrows(), x2.nrows()));
        Zip::from(d.rows_mut())
            .and(x1.rows())
            .for_each(|mut d_i, x1_i| {
                Zip::from(&mut d_i).and(x2.rows()).for_each(|d_ij, x2_j| {
                    if x1_i == x2_j {
                        *d_ij = F::one();
                    }
                });
            });
        d
    }
}

impl<F: Float> Kernel<F> for WhiteNoiseKernel {
    fn registry(&self) -> &Arc<ParamRegistry> {
        &self.registry
    }

    fn input_dim(&self) -> Option<usize> {
        None
    }

    fn evaluate(&self, theta: ArrayView1<F>, x1: ArrayView2<F>, x2: ArrayView2<F>) -> Array2<F> {
        let noise2 = theta[0] * theta[0];
        Self::delta(x1, x2).mapv(|v| v * noise2)
    }

    fn grad_params(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: ArrayView2<F>,
    ) -> Vec<Array2<F>> {
        let two_noise = F::cast(2.) * theta[0];
        vec![Self::delta(x1, x2).mapv(|v| v * two_noise)]
    }

    fn grad_x(&self, _theta: ArrayView1<F>, x: ArrayView1<F>, xt: ArrayView2<F>) -> Array2<F> {
        Array2::zeros((xt.nrows(), x.len()))
    }

    fn diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Array1<F> {
        Array1::from_elem(x.nrows(), theta[0] * theta[0])
    }
}

impl fmt::Display for WhiteNoiseKernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "WhiteNoise({})", self.registry.names()[0])
    }
}

/// Sum of kernels `k(x, x') = sum_c k_c(x, x')`.
///
/// Its registry is the concatenation of the component registries in order.
pub struct SumKernel<F: Float> {
    kernels: Vec<Box<dyn Kernel<F>>>,
    offsets: Vec<usize>,
    dim: Option<usize>,
    registry: Arc<ParamRegistry>,
}

impl<F: Float> SumKernel<F> {
    /// Constructor from a non empty list of kernels.
    ///
    /// Fails when components disagree on input dimension or share a hyperparameter name.
    pub fn new(kernels: Vec<Box<dyn Kernel<F>>>) -> Result<Self> {
        if kernels.is_empty() {
            return Err(GpError::InvalidValueError(
                "sum kernel needs at least one component".to_string(),
            ));
        }
        let mut dim = None;
        for kernel in kernels.iter() {
            match (dim, kernel.input_dim()) {
                (Some(d), Some(kd)) if d != kd => {
                    return Err(GpError::ConstraintError(format!(
                        "conflict in dimensionality of summed kernels: {d} vs {kd}"
                    )));
                }
                (None, Some(kd)) => dim = Some(kd),
                _ => (),
            }
        }
        let mut offsets = Vec::with_capacity(kernels.len());
        let mut names = vec![];
        for kernel in kernels.iter() {
            offsets.push(names.len());
            names.extend(kernel.registry().names().iter().cloned());
        }
        let registry = Arc::new(ParamRegistry::new(names)?);
        Ok(SumKernel {
            kernels,
            offsets,
            dim,
            registry,
        })
    }

    /// Summed kernels
    pub fn kernels(&self) -> &[Box<dyn Kernel<F>>] {
        &self.kernels
    }

    fn components<'a>(
        &'a self,
        theta: ArrayView1<'a, F>,
    ) -> impl Iterator<Item = (&'a dyn Kernel<F>, ArrayView1<'a, F>)> + 'a {
        self.kernels
            .iter()
            .zip(self.offsets.iter())
            .map(move |(kernel, &offset)| {
                let n = kernel.n_params();
                (kernel.as_ref(), theta.slice_move(s![offset..offset + n]))
            })
    }
}

impl<F: Float> Kernel<F> for SumKernel<F> {
    fn registry(&self) -> &Arc<ParamRegistry> {
        &self.registry
    }

    fn input_dim(&self) -> Option<usize> {
        self.dim
    }

    fn evaluate(&self, theta: ArrayView1<F>, x1: ArrayView2<F>, x2: ArrayView2<F>) -> Array2<F> {
        let mut k = Array2::zeros((x1.nrows(), x2.nrows()));
        for (kernel, theta_c) in self.components(theta.reborrow()) {
            k += &kernel.evaluate(theta_c, x1, x2);
        }
        k
    }

    fn grad_params(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: ArrayView2<F>,
    ) -> Vec<Array2<F>> {
        self.components(theta.reborrow())
            .flat_map(|(kernel, theta_c)| kernel.grad_params(theta_c, x1, x2))
            .collect()
    }

    fn grad_x(&self, theta: ArrayView1<F>, x: ArrayView1<F>, xt: ArrayView2<F>) -> Array2<F> {
        let mut jac = Array2::zeros((xt.nrows(), x.len()));
        for (kernel, theta_c) in self.components(theta.reborrow()) {
            jac += &kernel.grad_x(theta_c, x, xt);
        }
        jac
    }

    fn diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Array1<F> {
        let mut d = Array1::zeros(x.nrows());
        for (kernel, theta_c) in self.components(theta.reborrow()) {
            d += &kernel.diag(theta_c, x);
        }
        d
    }
}

impl<F: Float> fmt::Display for SumKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let terms: Vec<String> = self.kernels.iter().map(|k| k.to_string()).collect();
        write!(f, "{}", terms.join(" + "))
    }
}
