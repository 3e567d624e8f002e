//! CLI wiring for the platbench runner.

use crate::config::RunnerConfig;
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::report::format_times;
use anyhow::Result;
use clap::{Parser, Subcommand};
use platbench_cache::Cache;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "platbench",
    about = "Benchmark optimizer-generated floating-point programs"
)]
pub struct Cli {
    /// TOML file with runner settings; flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub working_dir: Option<PathBuf>,
    #[arg(long)]
    pub platform: Option<String>,
    #[arg(long)]
    pub backend: Option<String>,
    /// Optimizer server script.
    #[arg(long)]
    pub herbie: Option<PathBuf>,
    #[arg(long)]
    pub num_points: Option<usize>,
    #[arg(long)]
    pub num_runs: Option<usize>,
    #[arg(long)]
    pub threads: Option<usize>,
    #[arg(long, default_value_t = false)]
    pub force_local_sampling: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Time every operator the backend supports against the baseline.
    Ops,
    /// Improve a corpus of programs and time the generated variants.
    Improve {
        /// Corpus file or directory.
        #[arg(long)]
        input: PathBuf,
        /// Generate variants on this platform and desugar them into ours.
        #[arg(long)]
        source_platform: Option<String>,
    },
    /// Print how many entries the cache holds.
    CacheStats,
}

impl Cli {
    pub fn resolve_config(&self) -> Result<RunnerConfig> {
        let mut config = match &self.config {
            Some(path) => RunnerConfig::load(path)?,
            None => RunnerConfig::default(),
        };
        if let Some(dir) = &self.working_dir {
            config.working_dir = dir.clone();
        }
        if let Some(platform) = &self.platform {
            config.platform = platform.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend = backend.clone();
        }
        if let Some(script) = &self.herbie {
            config.optimizer.script = Some(script.clone());
        }
        if let Some(num_points) = self.num_points {
            config.num_points = num_points;
        }
        if let Some(num_runs) = self.num_runs {
            config.num_runs = num_runs;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if self.force_local_sampling {
            config.force_local_sampling = true;
        }
        Ok(config)
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = cli.resolve_config()?;
    match cli.command {
        Command::Ops => {
            let mut orchestrator = Orchestrator::from_config(config)?;
            let summary = orchestrator.run_ops()?;
            print_summary(&summary, orchestrator.backend().time_unit());
        }
        Command::Improve {
            input,
            source_platform,
        } => {
            let mut orchestrator = Orchestrator::from_config(config)?;
            let summary = orchestrator.run_improve(&input, source_platform.as_deref())?;
            print_summary(&summary, orchestrator.backend().time_unit());
            for (key, points) in &summary.key_frontiers {
                println!("{}: {} frontier points", key, points.len());
            }
            for (cost, error) in &summary.frontier {
                println!("frontier: cost={} error={}", cost, error);
            }
        }
        Command::CacheStats => {
            let cache = Cache::open(config.cache_dir())?;
            println!(
                "cache={} samples={} variants={}",
                cache.root().display(),
                cache.count_samples(),
                cache.count_variants()
            );
        }
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, unit: &str) {
    print!("{}", format_times(&summary.names(), &summary.times(), unit));
    for name in &summary.skipped {
        println!("skipped (no sample): {}", name);
    }
    for name in &summary.desugar_failures {
        println!("desugar failed: {}", name);
    }
    info!(
        inputs = summary.inputs,
        variants = summary.variants,
        cached_samples = summary.cached_samples,
        report = %summary.report_dir.display(),
        "run complete"
    );
}
