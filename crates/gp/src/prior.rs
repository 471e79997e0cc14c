//! Construction of the log prior over kernel hyperparameters.
//!
//! Each hyperparameter of a kernel registry is either
//! * fixed to a value: it is removed from the searched space,
//! * bounded within `[min, max]`: uniform prior, `-inf` outside,
//! * unconstrained: flat improper prior.
//!
//! Searches (optimization or sampling) operate on the vector of free hyperparameters
//! (registry order with fixed ones removed), [`LogPrior::merge`] builds back the full vector.

use crate::errors::{GpError, Result};
use crate::hyperparameters::{HyperParams, ParamRegistry};
use ndarray::{Array1, ArrayView1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Inclusive range constraint `[min, max]` on a named hyperparameter
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Bound {
    /// Hyperparameter name
    pub name: String,
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl Bound {
    /// Constructor
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Bound {
            name: name.into(),
            min,
            max,
        }
    }
}

/// Named hyperparameter held constant
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Fixed {
    /// Hyperparameter name
    pub name: String,
    /// Held value
    pub value: f64,
}

impl Fixed {
    /// Constructor
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Fixed {
            name: name.into(),
            value,
        }
    }
}

/// Log prior over the free hyperparameters of a kernel
#[derive(Clone, Debug)]
pub struct LogPrior {
    registry: Arc<ParamRegistry>,
    /// Registry indices of free hyperparameters
    free: Vec<usize>,
    free_names: Vec<String>,
    /// Bounds of free hyperparameters if any
    bounds: Vec<Option<(f64, f64)>>,
    /// Registry indices and values of fixed hyperparameters
    fixed: Vec<(usize, f64)>,
}

impl LogPrior {
    /// Build the prior of hyperparameters of the given registry.
    ///
    /// Fails with [`GpError::ConstraintError`] when a bound is empty (`min >= max`),
    /// when a name is unknown, given twice, or both fixed and bounded.
    pub fn build(registry: &Arc<ParamRegistry>, bounds: &[Bound], fixed: &[Fixed]) -> Result<Self> {
        let lookup = |name: &str| {
            registry.index_of(name).ok_or_else(|| {
                GpError::ConstraintError(format!(
                    "unknown hyperparameter `{name}`, expected one of {}",
                    registry.names().join(", ")
                ))
            })
        };

        let mut fixed_values: Vec<Option<f64>> = vec![None; registry.len()];
        for Fixed { name, value } in fixed {
            let i = lookup(name)?;
            if !value.is_finite() {
                return Err(GpError::ConstraintError(format!(
                    "fixed value of `{name}` should be finite, got {value}"
                )));
            }
            if fixed_values[i].replace(*value).is_some() {
                return Err(GpError::ConstraintError(format!(
                    "hyperparameter `{name}` is fixed twice"
                )));
            }
        }

        let mut bounded: Vec<Option<(f64, f64)>> = vec![None; registry.len()];
        for Bound { name, min, max } in bounds {
            let i = lookup(name)?;
            if !(min.is_finite() && max.is_finite()) || min >= max {
                return Err(GpError::ConstraintError(format!(
                    "bound of `{name}` should satisfy min < max, got [{min}, {max}]"
                )));
            }
            if fixed_values[i].is_some() {
                return Err(GpError::ConstraintError(format!(
                    "hyperparameter `{name}` cannot be both fixed and bounded"
                )));
            }
            if bounded[i].replace((*min, *max)).is_some() {
                return Err(GpError::ConstraintError(format!(
                    "hyperparameter `{name}` is bounded twice"
                )));
            }
        }

        let mut prior = LogPrior {
            registry: registry.clone(),
            free: vec![],
            free_names: vec![],
            bounds: vec![],
            fixed: vec![],
        };
        for (i, name) in registry.names().iter().enumerate() {
            match fixed_values[i] {
                Some(value) => prior.fixed.push((i, value)),
                None => {
                    prior.free.push(i);
                    prior.free_names.push(name.clone());
                    prior.bounds.push(bounded[i]);
                }
            }
        }
        Ok(prior)
    }

    /// Registry of the full hyperparameter vector
    pub fn registry(&self) -> &Arc<ParamRegistry> {
        &self.registry
    }

    /// Names of the free hyperparameters in registry order
    pub fn free_names(&self) -> &[String] {
        &self.free_names
    }

    /// Number of free hyperparameters
    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    /// Bounds of free hyperparameters, `None` when unconstrained
    pub fn bounds(&self) -> &[Option<(f64, f64)>] {
        &self.bounds
    }

    /// Fixed hyperparameters as (name, value) pairs
    pub fn fixed(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.fixed
            .iter()
            .map(|&(i, v)| (self.registry.names()[i].as_str(), v))
    }

    /// Log prior value at the given free hyperparameters:
    /// `sum(-log(max - min))` over bounded ones when all lie within their bounds, `-inf` otherwise.
    pub fn value(&self, free: ArrayView1<f64>) -> f64 {
        debug_assert_eq!(free.len(), self.n_free());
        let mut logprior = 0.;
        for (x, bound) in free.iter().zip(self.bounds.iter()) {
            match bound {
                Some((min, max)) if (*min..=*max).contains(x) => logprior -= (max - min).ln(),
                Some(_) => return f64::NEG_INFINITY,
                None if x.is_nan() => return f64::NEG_INFINITY,
                None => (),
            }
        }
        logprior
    }

    /// Full hyperparameters given free values, fixed values inserted
    pub fn merge(&self, free: ArrayView1<f64>) -> HyperParams<f64> {
        let mut params = HyperParams::from_elem(self.registry.clone(), 0.);
        for (&i, &v) in self.free.iter().zip(free.iter()) {
            params.set_at(i, v);
        }
        for &(i, v) in self.fixed.iter() {
            params.set_at(i, v);
        }
        params
    }

    /// Free values extracted from full hyperparameters
    pub fn split(&self, params: &HyperParams<f64>) -> Array1<f64> {
        let values = params.values();
        self.free.iter().map(|&i| values[i]).collect()
    }

    /// Registry indices of the free hyperparameters
    pub(crate) fn free_indices(&self) -> &[usize] {
        &self.free
    }

    /// Starting point of finite prior built from `init`: fixed values are enforced
    /// and bounded values lying outside their bounds are moved to the middle of the bounds.
    pub fn feasible_start(&self, init: &HyperParams<f64>) -> Result<HyperParams<f64>> {
        if init.registry().as_ref() != self.registry.as_ref() {
            return Err(GpError::InvalidValueError(format!(
                "starting point hyperparameters ({}) do not match prior ones ({})",
                init.registry().names().join(", "),
                self.registry.names().join(", ")
            )));
        }
        let mut free = self.split(init);
        for (x, bound) in free.iter_mut().zip(self.bounds.iter()) {
            match bound {
                Some((min, max)) if !(*min..=*max).contains(&*x) => *x = 0.5 * (min + max),
                None if !x.is_finite() => {
                    return Err(GpError::InvalidValueError(
                        "starting value of an unconstrained hyperparameter should be finite"
                            .to_string(),
                    ))
                }
                _ => (),
            }
        }
        Ok(self.merge(free.view()))
    }
}
