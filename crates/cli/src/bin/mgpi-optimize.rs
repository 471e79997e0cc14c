use clap::Parser;
use log::info;
use mgpi::{init_logger, write_optimum, Calibration, CommonArgs, Stopwatch};
use mgpi_gp::{HyperParams, HyperparameterOptimizer, OptimMethod};

/// Find the hyperparameters of a gaussian process interpolator maximizing
/// their tempered log posterior given tabulated data
#[derive(Parser, Debug)]
#[command(name = "mgpi-optimize", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    /// Optimization method: cobyla or slsqp
    #[arg(long, default_value = "cobyla")]
    method: OptimMethod,
    /// Number of optimization starts
    #[arg(long)]
    n_start: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.common.verbose);
    let mut stopwatch = Stopwatch::start(cli.common.time_execution);

    let calibration = Calibration::load(&cli.common)?;
    stopwatch.lap("Loading");

    let mut params = HyperparameterOptimizer::params()
        .method(cli.method)
        .temperature(cli.common.temperature)
        .seed(cli.common.seed);
    if let Some(n_start) = cli.n_start.or(calibration.config.n_start) {
        params = params.n_start(n_start);
    }
    if let Some(max_eval) = calibration.config.max_eval {
        params = params.max_eval(max_eval);
    }
    let optimizer = HyperparameterOptimizer::new(params)?;
    let factory = |p: &HyperParams<f64>| calibration.fit(p.clone());
    let result = optimizer.optimize(&factory, &calibration.prior, &calibration.init)?;
    stopwatch.lap("Optimization");
    info!(
        "Best hyperparameters: {} (objective={:.6}, {} models built, {} failed)",
        result.params, result.objective, result.n_eval, result.n_failed
    );

    write_optimum(&cli.common.outpath, &result)?;
    stopwatch.lap("Writing");
    Ok(())
}
