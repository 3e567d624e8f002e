//! Runner configuration, loadable from TOML.

use anyhow::{Context, Result};
use platbench_ir::sanitize_key;
use platbench_optimizer::ProcessLauncher;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How to start the optimizer. The launcher appends `--platform <name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerCommand {
    pub program: String,
    /// Server script passed as the first argument, when set.
    pub script: Option<PathBuf>,
    pub args: Vec<String>,
}

impl Default for OptimizerCommand {
    fn default() -> Self {
        Self {
            program: "racket".to_string(),
            script: None,
            args: Vec::new(),
        }
    }
}

impl OptimizerCommand {
    pub fn launcher(&self) -> ProcessLauncher {
        let mut launcher = ProcessLauncher::new(&self.program);
        if let Some(script) = &self.script {
            launcher = launcher.arg(script);
        }
        launcher.args(&self.args)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Optimizer platform; also names driver and report directories.
    pub platform: String,
    /// Registered backend that generates and times drivers.
    pub backend: String,
    pub working_dir: PathBuf,
    pub optimizer: OptimizerCommand,
    /// Points sampled per program.
    pub num_points: usize,
    /// Timed runs averaged per driver.
    pub num_runs: usize,
    /// Worker pool size for sampling and error scoring, and the thread count
    /// handed to `improve`.
    pub threads: usize,
    /// Seed for the local sampler.
    pub seed: u64,
    /// Sample every program locally instead of through the optimizer.
    pub force_local_sampling: bool,
    /// Optional subdirectory of the report directory.
    pub report_key: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            platform: "python".to_string(),
            backend: "python".to_string(),
            working_dir: PathBuf::from("platbench-out"),
            optimizer: OptimizerCommand::default(),
            num_points: 10_000,
            num_runs: 100,
            threads: 1,
            seed: 0x5eed,
            force_local_sampling: false,
            report_key: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid runner configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.working_dir.join("cache")
    }

    pub fn drivers_dir(&self) -> PathBuf {
        self.working_dir
            .join("drivers")
            .join(sanitize_key(&self.platform))
    }

    pub fn report_dir(&self) -> PathBuf {
        let dir = self
            .working_dir
            .join("report")
            .join(sanitize_key(&self.platform));
        match &self.report_key {
            Some(key) => dir.join(sanitize_key(key)),
            None => dir,
        }
    }

    /// Output directory handed to `improve` for its result file.
    pub fn improve_dir(&self) -> PathBuf {
        self.working_dir.join("improve")
    }
}
