use crate::config::{DataConfig, InterpolatorConfig};
use clap::{ArgAction, Args};
use log::info;
use mgpi_gp::kernels::Kernel;
use mgpi_gp::{
    Bound, Fixed, GaussianProcessModel, GpError, HyperParams, LogPrior, Result, TrainingSet,
};
use std::path::PathBuf;

/// Arguments shared by the calibration binaries
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// JSON configuration of the tabulated data
    pub data: PathBuf,
    /// JSON configuration of the interpolator
    pub interpolator: PathBuf,
    /// Output file
    pub outpath: PathBuf,
    /// Data section to interpolate, optional when there is only one
    #[arg(long)]
    pub section: Option<String>,
    /// Starting value of a hyperparameter
    #[arg(long, num_args = 2, value_names = ["NAME", "VALUE"], action = ArgAction::Append)]
    pub kernel_params: Vec<String>,
    /// Divisor of the log likelihood
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f64,
    /// Seed of the random generator, drawn from entropy when not given
    #[arg(long)]
    pub seed: Option<u64>,
    /// Hold a hyperparameter at the given value
    #[arg(long, num_args = 2, value_names = ["NAME", "VALUE"], action = ArgAction::Append)]
    pub fix: Vec<String>,
    /// Restrict a hyperparameter to [MIN, MAX]
    #[arg(
        long,
        visible_alias = "limits",
        num_args = 3,
        value_names = ["NAME", "MIN", "MAX"],
        action = ArgAction::Append
    )]
    pub bound: Vec<String>,
    /// Log debug diagnostics
    #[arg(short, long)]
    pub verbose: bool,
    /// Report durations of loading, calibration and writing
    #[arg(long)]
    pub time_execution: bool,
}

fn parse_value(name: &str, value: &str) -> Result<f64> {
    value.parse().map_err(|_| {
        GpError::InvalidValueError(format!("value of `{name}` should be a number, got `{value}`"))
    })
}

/// (name, value) pairs from flattened `NAME VALUE` arguments
pub fn parse_named_values(values: &[String]) -> Result<Vec<(String, f64)>> {
    if values.len() % 2 != 0 {
        return Err(GpError::InvalidValueError(format!(
            "expected NAME VALUE pairs, got {}",
            values.join(" ")
        )));
    }
    values
        .chunks(2)
        .map(|pair| Ok((pair[0].clone(), parse_value(&pair[0], &pair[1])?)))
        .collect()
}

/// Fixed hyperparameters from flattened `NAME VALUE` arguments
pub fn parse_fixed(values: &[String]) -> Result<Vec<Fixed>> {
    Ok(parse_named_values(values)?
        .into_iter()
        .map(|(name, value)| Fixed::new(name, value))
        .collect())
}

/// Bounds from flattened `NAME MIN MAX` arguments
pub fn parse_bounds(values: &[String]) -> Result<Vec<Bound>> {
    if values.len() % 3 != 0 {
        return Err(GpError::InvalidValueError(format!(
            "expected NAME MIN MAX triplets, got {}",
            values.join(" ")
        )));
    }
    values
        .chunks(3)
        .map(|triplet| {
            let name = &triplet[0];
            Ok(Bound::new(
                name.clone(),
                parse_value(name, &triplet[1])?,
                parse_value(name, &triplet[2])?,
            ))
        })
        .collect()
}

/// Everything needed to calibrate an interpolator: data, kernel, prior and starting point
pub struct Calibration {
    /// Training data
    pub data: TrainingSet<f64>,
    /// Interpolator configuration
    pub config: InterpolatorConfig,
    /// Kernel of the interpolator
    pub kernel: Box<dyn Kernel<f64>>,
    /// Prior built from fixed values and bounds
    pub prior: LogPrior,
    /// Starting hyperparameters
    pub init: HyperParams<f64>,
}

impl Calibration {
    /// Load configuration files and build the prior from the arguments
    pub fn load(args: &CommonArgs) -> Result<Self> {
        let data = DataConfig::load(&args.data)?.training_set(args.section.as_deref())?;
        let config = InterpolatorConfig::load(&args.interpolator)?;
        let kernel = config.kernel()?;
        let registry = kernel.registry().clone();
        info!(
            "Interpolating {} points of dimension {} with {kernel}",
            data.n_obs(),
            data.ncols()
        );
        let prior = LogPrior::build(
            &registry,
            &parse_bounds(&args.bound)?,
            &parse_fixed(&args.fix)?,
        )?;
        let init = config.initial_params(&registry, &parse_named_values(&args.kernel_params)?)?;
        Ok(Calibration {
            data,
            config,
            kernel,
            prior,
            init,
        })
    }

    /// Interpolator conditioned at the given hyperparameters
    pub fn fit(
        &self,
        params: HyperParams<f64>,
    ) -> Result<GaussianProcessModel<'_, f64, dyn Kernel<f64>>> {
        GaussianProcessModel::fit(self.kernel.as_ref(), &self.data, params, self.config.noise)
    }
}
