//! Named hyperparameter vectors.
//!
//! A kernel fixes once and for all the ordered list of its hyperparameter names
//! (its [`ParamRegistry`]). Every hyperparameter point is then a plain vector of values
//! laid out in registry order ([`HyperParams`]).

use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array1, ArrayView1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable name to index mapping of kernel hyperparameters
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct ParamRegistry {
    names: Vec<String>,
}

impl ParamRegistry {
    /// Registry constructor, names must be unique
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(|s| s.into()).collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(GpError::ConstraintError(format!(
                    "hyperparameter name `{name}` is registered twice"
                )));
            }
        }
        Ok(ParamRegistry { names })
    }

    /// Registry from names already known to be unique
    pub(crate) fn from_unique(names: Vec<String>) -> Self {
        debug_assert!(ParamRegistry::new(names.clone()).is_ok());
        ParamRegistry { names }
    }

    /// Number of registered hyperparameters
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no hyperparameter is registered
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of the given hyperparameter name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Whether the name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Hyperparameter names in registry order
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A point in hyperparameter space: values in the order of their registry
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize",
        deserialize = "F: Deserialize<'de>"
    ))
)]
pub struct HyperParams<F: Float> {
    registry: Arc<ParamRegistry>,
    values: Array1<F>,
}

impl<F: Float> HyperParams<F> {
    /// Constructor given values laid out in registry order
    pub fn new(registry: Arc<ParamRegistry>, values: Array1<F>) -> Result<Self> {
        if values.len() != registry.len() {
            return Err(GpError::InvalidValueError(format!(
                "expected {} hyperparameter values ({}), got {}",
                registry.len(),
                registry.names().join(", "),
                values.len()
            )));
        }
        Ok(HyperParams { registry, values })
    }

    /// Every hyperparameter set to the same value
    pub fn from_elem(registry: Arc<ParamRegistry>, value: F) -> Self {
        let values = Array1::from_elem(registry.len(), value);
        HyperParams { registry, values }
    }

    /// Registry describing the values
    pub fn registry(&self) -> &Arc<ParamRegistry> {
        &self.registry
    }

    /// Values in registry order
    pub fn values(&self) -> ArrayView1<'_, F> {
        self.values.view()
    }

    /// Number of hyperparameters
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there is no hyperparameter
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the named hyperparameter
    pub fn get(&self, name: &str) -> Option<F> {
        self.registry.index_of(name).map(|i| self.values[i])
    }

    /// Set the named hyperparameter
    pub fn set(&mut self, name: &str, value: F) -> Result<()> {
        match self.registry.index_of(name) {
            Some(i) => {
                self.values[i] = value;
                Ok(())
            }
            None => Err(GpError::ConstraintError(format!(
                "unknown hyperparameter `{name}`, expected one of {}",
                self.registry.names().join(", ")
            ))),
        }
    }

    /// Set the hyperparameter at the given registry index
    pub fn set_at(&mut self, index: usize, value: F) {
        self.values[index] = value;
    }

    /// (name, value) pairs in registry order
    pub fn iter(&self) -> impl Iterator<Item = (&str, F)> + '_ {
        self.registry
            .names()
            .iter()
            .map(|n| n.as_str())
            .zip(self.values.iter().copied())
    }
}

impl<F: Float> fmt::Display for HyperParams<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let items: Vec<String> = self
            .iter()
            .map(|(name, value)| format!("{name}={value:.3e}"))
            .collect();
        write!(f, "{}", items.join(", "))
    }
}
