//! Command line calibration of Gaussian process interpolators.
//!
//! Two binaries share this library:
//! * `mgpi-optimize` finds the hyperparameters maximizing the tempered log posterior
//!   and writes them as JSON,
//! * `mgpi-sample` draws posterior samples of the hyperparameters with an ensemble
//!   sampler and writes them as a `.npy` table.
//!
//! Tabulated data and interpolator definitions are read from JSON configuration files
//! (see [`DataConfig`] and [`InterpolatorConfig`]).
#![warn(missing_docs)]
mod args;
mod config;
mod output;

pub use args::*;
pub use config::*;
pub use output::*;

use env_logger::{Builder, Env};
use log::info;
use std::time::Instant;

/// Environment variable controlling the log level
pub const MGPI_LOG: &str = "MGPI_LOG";

/// Initialize logging on stdout, `info` level unless `verbose` or set otherwise with [`MGPI_LOG`]
pub fn init_logger(verbose: bool) {
    let env = Env::new().filter_or(MGPI_LOG, if verbose { "debug" } else { "info" });
    let mut builder = Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();
}

/// Reports wall clock durations of successive steps when enabled
pub struct Stopwatch {
    enabled: bool,
    last: Instant,
}

impl Stopwatch {
    /// Start timing
    pub fn start(enabled: bool) -> Self {
        Stopwatch {
            enabled,
            last: Instant::now(),
        }
    }

    /// Log the time elapsed since the previous lap
    pub fn lap(&mut self, step: &str) {
        if self.enabled {
            info!("{step} took {:.3?}", self.last.elapsed());
        }
        self.last = Instant::now();
    }
}
