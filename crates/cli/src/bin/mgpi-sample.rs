use clap::Parser;
use log::info;
use mgpi::{init_logger, write_samples, Calibration, CommonArgs, Stopwatch};
use mgpi_gp::{HyperParams, HyperparameterSampler};

/// Draw posterior samples of the hyperparameters of a gaussian process interpolator
/// given tabulated data with an ensemble sampler
#[derive(Parser, Debug)]
#[command(name = "mgpi-sample", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    /// Ensemble size, at least 2 * d + 2 for d free hyperparameters
    #[arg(long)]
    num_walkers: Option<usize>,
    /// Number of discarded first iterations
    #[arg(long)]
    num_burnin: Option<usize>,
    /// Number of retained iterations
    #[arg(long)]
    num_samples: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.common.verbose);
    let mut stopwatch = Stopwatch::start(cli.common.time_execution);

    let calibration = Calibration::load(&cli.common)?;
    stopwatch.lap("Loading");

    let config = &calibration.config;
    let mut params = HyperparameterSampler::params()
        .n_walkers(cli.num_walkers.or(config.num_walkers))
        .temperature(cli.common.temperature)
        .seed(cli.common.seed);
    if let Some(n_burnin) = cli.num_burnin.or(config.num_burnin) {
        params = params.n_burnin(n_burnin);
    }
    if let Some(n_samples) = cli.num_samples.or(config.num_samples) {
        params = params.n_samples(n_samples);
    }
    if let Some(stretch) = config.stretch {
        params = params.stretch(stretch);
    }
    let sampler = HyperparameterSampler::new(params)?;
    let factory = |p: &HyperParams<f64>| calibration.fit(p.clone());
    let chain = sampler.sample(&factory, &calibration.prior, &calibration.init)?;
    stopwatch.lap("Sampling");
    let (best, log_prob) = chain.best()?;
    let best = HyperParams::new(calibration.prior.registry().clone(), best.to_owned())?;
    info!(
        "{} samples drawn, best log posterior {log_prob:.6} at {best}",
        chain.samples.nrows()
    );

    write_samples(&cli.common.outpath, &chain)?;
    stopwatch.lap("Writing");
    Ok(())
}
