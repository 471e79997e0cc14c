use mgpi_gp::kernels::{
    Exponential, Kernel, Matern32, Matern52, RadialProfile, SquaredExponential, StationaryKernel,
    SumKernel, WhiteNoiseKernel,
};
use mgpi_gp::{GpError, HyperParams, ParamRegistry, Result, TrainingSet};
use ndarray::{Array1, Array2};
use ndarray_npy::read_npy;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|err| {
        GpError::ConfigError(format!("cannot read {}: {err}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|err| GpError::ConfigError(format!("cannot parse {}: {err}", path.display())))
}

/// Files of one data section, relative to the configuration file
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSection {
    /// (n, nx) inputs `.npy` file
    pub x: PathBuf,
    /// (n,) outputs `.npy` file
    pub f: PathBuf,
    /// (n,) observational uncertainties `.npy` file
    #[serde(default)]
    pub sigma: Option<PathBuf>,
}

/// Named sections of tabulated data
///
/// ```json
/// { "sin": { "x": "x.npy", "f": "f.npy", "sigma": "sigma.npy" } }
/// ```
#[derive(Clone, Debug)]
pub struct DataConfig {
    base: PathBuf,
    sections: BTreeMap<String, DataSection>,
}

impl DataConfig {
    /// Read the configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let sections: BTreeMap<String, DataSection> = read_json(path)?;
        if sections.is_empty() {
            return Err(GpError::ConfigError(format!(
                "no data section in {}",
                path.display()
            )));
        }
        Ok(DataConfig {
            base: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            sections,
        })
    }

    /// Section names
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Training set of the named section, the section may be omitted when there is only one
    pub fn training_set(&self, section: Option<&str>) -> Result<TrainingSet<f64>> {
        let section = match section {
            Some(name) => self.sections.get(name).ok_or_else(|| {
                GpError::ConfigError(format!(
                    "unknown data section `{name}`, expected one of {}",
                    self.sections().collect::<Vec<_>>().join(", ")
                ))
            })?,
            None if self.sections.len() == 1 => self.sections.values().next().ok_or_else(|| {
                GpError::ConfigError("no data section".to_string())
            })?,
            None => {
                return Err(GpError::ConfigError(format!(
                    "a data section should be selected among {}",
                    self.sections().collect::<Vec<_>>().join(", ")
                )))
            }
        };
        let x: Array2<f64> = self.read_array(&section.x)?;
        let f: Array1<f64> = self.read_array(&section.f)?;
        let data = TrainingSet::new(x, f)?;
        match &section.sigma {
            Some(path) => data.with_uncertainty(self.read_array(path)?),
            None => Ok(data),
        }
    }

    fn read_array<T: ndarray_npy::ReadNpyExt>(&self, path: &Path) -> Result<T> {
        let path = self.base.join(path);
        read_npy(&path)
            .map_err(|err| GpError::ConfigError(format!("cannot read {}: {err}", path.display())))
    }
}

/// Kernel definition, hyperparameter names get the optional prefix
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum KernelSpec {
    /// Squared exponential kernel
    SquaredExponential {
        /// Input dimension
        dim: usize,
        /// Hyperparameter names prefix
        #[serde(default)]
        prefix: String,
    },
    /// Matern 3/2 kernel
    Matern32 {
        /// Input dimension
        dim: usize,
        /// Hyperparameter names prefix
        #[serde(default)]
        prefix: String,
    },
    /// Matern 5/2 kernel
    Matern52 {
        /// Input dimension
        dim: usize,
        /// Hyperparameter names prefix
        #[serde(default)]
        prefix: String,
    },
    /// Exponential kernel
    Exponential {
        /// Input dimension
        dim: usize,
        /// Hyperparameter names prefix
        #[serde(default)]
        prefix: String,
    },
    /// White noise kernel
    WhiteNoise {
        /// Name of the noise amplitude
        #[serde(default = "default_noise_name")]
        name: String,
    },
}

fn default_noise_name() -> String {
    "noise".to_string()
}

fn stationary<P: RadialProfile + 'static>(
    dim: usize,
    prefix: &str,
) -> Result<Box<dyn Kernel<f64>>> {
    if dim == 0 {
        return Err(GpError::ConfigError(
            "kernel input dimension should be at least 1".to_string(),
        ));
    }
    Ok(Box::new(StationaryKernel::<P>::with_prefix(dim, prefix)))
}

impl KernelSpec {
    /// Build the kernel
    pub fn build(&self) -> Result<Box<dyn Kernel<f64>>> {
        match self {
            KernelSpec::SquaredExponential { dim, prefix } => {
                stationary::<SquaredExponential>(*dim, prefix)
            }
            KernelSpec::Matern32 { dim, prefix } => stationary::<Matern32>(*dim, prefix),
            KernelSpec::Matern52 { dim, prefix } => stationary::<Matern52>(*dim, prefix),
            KernelSpec::Exponential { dim, prefix } => stationary::<Exponential>(*dim, prefix),
            KernelSpec::WhiteNoise { name } => Ok(Box::new(WhiteNoiseKernel::with_name(name))),
        }
    }
}

/// Interpolator definition
///
/// ```json
/// {
///     "kernels": [
///         { "kind": "squared_exponential", "dim": 1 },
///         { "kind": "white_noise" }
///     ],
///     "init": { "length0": 0.5 },
///     "noise": 0.0,
///     "num_walkers": 8
/// }
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterpolatorConfig {
    /// Summed kernels
    pub kernels: Vec<KernelSpec>,
    /// Starting hyperparameter values, 1 when not given
    #[serde(default)]
    pub init: BTreeMap<String, f64>,
    /// White noise standard deviation added to the covariance diagonal
    #[serde(default)]
    pub noise: f64,
    /// Number of optimization starts
    #[serde(default)]
    pub n_start: Option<usize>,
    /// Max number of posterior evaluations of one optimization run
    #[serde(default)]
    pub max_eval: Option<usize>,
    /// Ensemble size
    #[serde(default)]
    pub num_walkers: Option<usize>,
    /// Number of discarded sampler iterations
    #[serde(default)]
    pub num_burnin: Option<usize>,
    /// Number of retained sampler iterations
    #[serde(default)]
    pub num_samples: Option<usize>,
    /// Stretch move scale
    #[serde(default)]
    pub stretch: Option<f64>,
}

impl InterpolatorConfig {
    /// Read the configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let config: InterpolatorConfig = read_json(path)?;
        if config.kernels.is_empty() {
            return Err(GpError::ConfigError(format!(
                "no kernel defined in {}",
                path.display()
            )));
        }
        if !(config.noise >= 0. && config.noise.is_finite()) {
            return Err(GpError::ConfigError(format!(
                "noise should be finite and non negative, got {}",
                config.noise
            )));
        }
        Ok(config)
    }

    /// Kernel of the interpolator, the sum of the defined kernels when more than one
    pub fn kernel(&self) -> Result<Box<dyn Kernel<f64>>> {
        let mut kernels = self
            .kernels
            .iter()
            .map(KernelSpec::build)
            .collect::<Result<Vec<_>>>()?;
        if kernels.len() == 1 {
            if let Some(kernel) = kernels.pop() {
                return Ok(kernel);
            }
        }
        Ok(Box::new(SumKernel::new(kernels)?))
    }

    /// Starting hyperparameters: 1 by default, then values of `init`, then `overrides`
    pub fn initial_params(
        &self,
        registry: &Arc<ParamRegistry>,
        overrides: &[(String, f64)],
    ) -> Result<HyperParams<f64>> {
        let mut params = HyperParams::from_elem(registry.clone(), 1.);
        for (name, value) in self.init.iter() {
            params.set(name, *value)?;
        }
        for (name, value) in overrides {
            params.set(name, *value)?;
        }
        Ok(params)
    }
}
