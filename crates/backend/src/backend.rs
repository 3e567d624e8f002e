//! The capability every target execution environment implements.

use anyhow::Result;
use platbench_ir::{OperatorSet, ProgramCore, Sample};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A self-contained driver written for one benchmarked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverArtifact {
    /// Name of the program the driver times.
    pub name: String,
    /// Directory owned by this driver.
    pub dir: PathBuf,
    /// File the backend runs (or builds from).
    pub entry: PathBuf,
    /// Number of sampled rows embedded in the driver.
    pub rows: usize,
}

pub trait Backend: Send + Sync {
    /// Platform name; also names the driver and report directories.
    fn name(&self) -> &str;

    /// Language passed to the optimizer's `compile` command.
    fn lang(&self) -> &str;

    /// Unit printed after the duration on the driver's output line.
    fn time_unit(&self) -> &str;

    /// Operators the platform supports, for synthesis.
    fn operators(&self) -> OperatorSet;

    /// Write an executable driver for `core` into `dir`, embedding `sample`'s
    /// rows as literals. `core` must already carry compiled text.
    fn generate_driver(&self, core: &ProgramCore, sample: &Sample, dir: &Path)
        -> Result<DriverArtifact>;

    /// Ahead-of-time compilation; a no-op for interpreted targets.
    fn build(&self, artifacts: &[DriverArtifact]) -> Result<()>;

    /// Run every driver `num_runs` times, one at a time, and return the mean
    /// duration per driver in [`Backend::time_unit`], in artifact order.
    fn execute(&self, artifacts: &[DriverArtifact], num_runs: usize) -> Result<Vec<f64>>;
}

pub type DynBackend = Arc<dyn Backend>;
