use log::info;
use mgpi_gp::{OptimResult, Result, SampleChain};
use ndarray::{s, Array2};
use ndarray_npy::write_npy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

/// Name of the log posterior column of written samples
pub const LOG_PROB_COLUMN: &str = "log_prob";

/// Samples as a (n_samples * n_walkers, n_params + 1) table: full hyperparameter
/// vectors followed by their tempered log posterior
pub fn samples_table(chain: &SampleChain) -> Array2<f64> {
    let (n_rows, n_params) = chain.samples.dim();
    let mut table = Array2::zeros((n_rows, n_params + 1));
    table.slice_mut(s![.., ..n_params]).assign(&chain.samples);
    table.column_mut(n_params).assign(&chain.log_probs);
    table
}

/// Write samples table as `.npy`
pub fn write_samples(path: &Path, chain: &SampleChain) -> Result<()> {
    write_npy(path, &samples_table(chain)).map_err(io::Error::other)?;
    info!(
        "Samples written to {} with columns {}, {LOG_PROB_COLUMN}",
        path.display(),
        chain.names.join(", ")
    );
    Ok(())
}

#[derive(Serialize)]
struct Optimum<'a> {
    params: BTreeMap<&'a str, f64>,
    objective: f64,
}

/// Write best hyperparameters as JSON `{ "params": { name: value }, "objective": value }`
pub fn write_optimum(path: &Path, result: &OptimResult) -> Result<()> {
    let optimum = Optimum {
        params: result.params.iter().collect(),
        objective: result.objective,
    };
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &optimum).map_err(io::Error::from)?;
    info!("Best hyperparameters written to {}", path.display());
    Ok(())
}
