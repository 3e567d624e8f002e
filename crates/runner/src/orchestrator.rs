//! The benchmarking pipeline.
//!
//! An [`Orchestrator`] owns the cache, the optimizer client and one backend,
//! and runs a batch of programs through strictly sequential stages:
//!
//! ```text
//! Synthesize/Read -> Compile -> Sample -> Improve -> Desugar -> Cost
//!     -> Error -> Pareto -> GenerateDrivers -> Execute -> Report
//! ```
//!
//! Only sampling and error scoring fan out across the worker pool.

use crate::config::RunnerConfig;
use crate::error::ConfigError;
use crate::report::{Frontiers, ReportWriter};
use crate::sampler::{SampleOutcome, SampleTable, Sampler};
use anyhow::{bail, Context, Result};
use platbench_backend::{BackendRegistry, DriverArtifact, DynBackend};
use platbench_cache::Cache;
use platbench_ir::{synthesize, ProgramCore, ProgramKey};
use platbench_optimizer::{
    combine_frontiers, frontier, pareto_groups, OptimizerClient, Point, ProtocolError,
};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Synthesize,
    Read,
    Compile,
    Sample,
    Improve,
    Desugar,
    Cost,
    Error,
    Pareto,
    GenerateDrivers,
    Execute,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Synthesize => "synthesize",
            Stage::Read => "read",
            Stage::Compile => "compile",
            Stage::Sample => "sample",
            Stage::Improve => "improve",
            Stage::Desugar => "desugar",
            Stage::Cost => "cost",
            Stage::Error => "error",
            Stage::Pareto => "pareto",
            Stage::GenerateDrivers => "generate-drivers",
            Stage::Execute => "execute",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variants adapted to this platform, with input cores substituted for keys
/// that had no valid rewriting.
#[derive(Debug, Clone, Default)]
pub struct Desugared {
    pub cores: Vec<ProgramCore>,
    /// Names of variants the optimizer could not rewrite.
    pub failed: Vec<String>,
}

/// Drivers written for the benchmarkable cores of a batch.
#[derive(Debug, Clone, Default)]
pub struct Drivers {
    /// Compiled cores, parallel to `artifacts`.
    pub cores: Vec<ProgramCore>,
    pub artifacts: Vec<DriverArtifact>,
    /// Names of cores left out because they have no sample.
    pub skipped: Vec<String>,
}

impl Drivers {
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.artifacts.iter().map(|a| a.dir.clone()).collect()
    }
}

/// What a full run did, for callers and tests.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub stages: Vec<Stage>,
    pub inputs: usize,
    pub variants: usize,
    pub cached_samples: usize,
    pub unsamplable: Vec<String>,
    pub desugar_failures: Vec<String>,
    pub skipped: Vec<String>,
    /// `(name, mean time)` per benchmarked core, in driver order.
    pub timings: Vec<(String, f64)>,
    /// Whole-batch frontier.
    pub frontier: Vec<Point>,
    /// Frontier of each logical program, in first-seen key order.
    pub key_frontiers: Vec<(ProgramKey, Vec<Point>)>,
    pub report_dir: PathBuf,
}

impl RunSummary {
    pub fn names(&self) -> Vec<String> {
        self.timings.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn times(&self) -> Vec<f64> {
        self.timings.iter().map(|(_, time)| *time).collect()
    }
}

pub struct Orchestrator {
    config: RunnerConfig,
    cache: Cache,
    client: OptimizerClient,
    backend: DynBackend,
    pool: Arc<ThreadPool>,
    stages: Vec<Stage>,
}

impl Orchestrator {
    pub fn new(
        config: RunnerConfig,
        cache: Cache,
        client: OptimizerClient,
        backend: DynBackend,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads.max(1))
            .thread_name(|index| format!("platbench-worker-{index}"))
            .build()
            .context("failed to build worker pool")?;

        for dir in [config.drivers_dir(), config.report_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        info!(
            runner = %config.platform,
            backend = backend.name(),
            samples = cache.count_samples(),
            variants = cache.count_variants(),
            "runner ready"
        );
        Ok(Self {
            config,
            cache,
            client,
            backend,
            pool: Arc::new(pool),
            stages: Vec::new(),
        })
    }

    /// Resolve the backend, restore the cache and launch the optimizer the
    /// way `config` describes.
    pub fn from_config(config: RunnerConfig) -> Result<Self> {
        let registry = BackendRegistry::with_default_backends();
        let backend = registry
            .find(&config.backend)
            .ok_or_else(|| ConfigError::UnknownBackend(config.backend.clone()))?;
        if let Some(script) = &config.optimizer.script {
            if !script.exists() {
                return Err(ConfigError::MissingPath(script.clone()).into());
            }
        }

        let client = OptimizerClient::new(
            Arc::new(config.optimizer.launcher()),
            config.platform.clone(),
        );
        let cache = Cache::open(config.cache_dir())?;
        Self::new(config, cache, client, backend)
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn backend(&self) -> &DynBackend {
        &self.backend
    }

    /// Stages entered so far, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn enter(&mut self, stage: Stage) {
        info!(runner = %self.config.platform, %stage, "entering stage");
        self.stages.push(stage);
    }

    /// The baseline plus one program per operator the backend supports.
    pub fn synthesize(&mut self) -> Vec<ProgramCore> {
        self.enter(Stage::Synthesize);
        let cores = synthesize(&self.backend.operators());
        info!(cores = cores.len(), "synthesized operator programs");
        cores
    }

    pub fn read(&mut self, path: &Path) -> Result<Vec<ProgramCore>> {
        self.enter(Stage::Read);
        if !path.exists() {
            return Err(ConfigError::MissingPath(path.to_path_buf()).into());
        }
        let cores = self.client.read(path)?;
        info!(path = %path.display(), cores = cores.len(), "read input programs");
        Ok(cores)
    }

    /// Compile every core to the backend's language in one session.
    pub fn compile(&mut self, cores: &mut [ProgramCore]) -> Result<()> {
        self.enter(Stage::Compile);
        self.client.compile(self.backend.lang(), cores)
    }

    pub fn sample(&mut self, cores: &[ProgramCore]) -> Result<SampleOutcome> {
        self.enter(Stage::Sample);
        let sampler = Sampler::new(self.client.clone(), Arc::clone(&self.pool), self.config.seed)
            .with_force_local(self.config.force_local_sampling);
        sampler.sample(&mut self.cache, cores, self.config.num_points)
    }

    /// Improved variants of every input, generated on `source_platform`
    /// (this runner's platform by default). Keys already cached for that
    /// platform are not sent to the optimizer.
    pub fn improve(
        &mut self,
        inputs: &[ProgramCore],
        source_platform: Option<&str>,
    ) -> Result<Vec<ProgramCore>> {
        self.enter(Stage::Improve);

        let mut seen = HashSet::new();
        for core in inputs {
            if !seen.insert(core.name.as_str()) {
                return Err(ConfigError::DuplicateName(core.name.clone()).into());
            }
        }

        let platform = source_platform
            .unwrap_or(&self.config.platform)
            .to_string();
        let client = self.client.for_platform(platform.as_str());

        let mut generated: Vec<(ProgramKey, Vec<ProgramCore>)> =
            Vec::with_capacity(inputs.len());
        let mut uncached = Vec::new();
        let mut cached = 0;
        for core in inputs {
            match self.cache.get_variants(&platform, core.key()) {
                Some(variants) => {
                    cached += variants.len();
                    generated.push((core.key().clone(), variants.to_vec()));
                }
                None => {
                    uncached.push(core.clone());
                    generated.push((core.key().clone(), Vec::new()));
                }
            }
        }

        let mut improved = 0;
        if !uncached.is_empty() {
            let report =
                client.improve(&uncached, self.config.threads, &self.config.improve_dir())?;
            let keys: HashMap<&str, &ProgramKey> = uncached
                .iter()
                .map(|core| (core.name.as_str(), core.key()))
                .collect();

            for test in &report.tests {
                let key = keys
                    .get(test.name.as_str())
                    .map(|key| (*key).clone())
                    .ok_or_else(|| ProtocolError::Failed {
                        command: "improve",
                        detail: format!("result for unknown program `{}`", test.name),
                    })?;
                let source = client.resugar(test)?;
                let mut core = ProgramCore::parse(&source, key.clone())
                    .map_err(|e| ProtocolError::malformed("resugar", source.as_str(), e))?;
                core.cost = Some(test.cost);
                core.error = Some(test.end_error);
                core.metadata = Some(test.raw.clone());

                if let Some((_, variants)) = generated.iter_mut().find(|(k, _)| *k == key) {
                    variants.push(core);
                    improved += 1;
                }
            }

            for (key, variants) in &generated {
                if uncached.iter().any(|core| core.key() == key) {
                    self.cache.put_variants(&platform, key, variants.clone())?;
                }
            }
        }

        info!(platform = %platform, improved, cached, "generated variants");
        Ok(generated.into_iter().flat_map(|(_, cores)| cores).collect())
    }

    /// Rewrite variants from another platform into this one. A variant with
    /// no valid rewriting is dropped; when every variant of a key is dropped
    /// the input core stands in for them.
    pub fn desugar(
        &mut self,
        inputs: &[ProgramCore],
        variants: &[ProgramCore],
    ) -> Result<Desugared> {
        self.enter(Stage::Desugar);
        let rewritten = self.client.desugar(variants)?;

        let surviving: HashSet<&ProgramKey> = variants
            .iter()
            .zip(&rewritten)
            .filter(|(_, text)| text.is_some())
            .map(|(core, _)| core.key())
            .collect();
        let inputs_by_key: HashMap<&ProgramKey, &ProgramCore> =
            inputs.iter().map(|core| (core.key(), core)).collect();

        let mut result = Desugared::default();
        let mut restored: HashSet<&ProgramKey> = HashSet::new();
        for (variant, text) in variants.iter().zip(rewritten) {
            match text {
                Some(text) => {
                    let mut core = ProgramCore::parse(&text, variant.key().clone())
                        .map_err(|e| ProtocolError::malformed("desugar", text.as_str(), e))?;
                    core.metadata = variant.metadata.clone();
                    result.cores.push(core);
                }
                None => {
                    warn!(core = %variant.name, "failed to desugar variant");
                    result.failed.push(variant.name.clone());
                    let key = variant.key();
                    if surviving.contains(key) || restored.contains(key) {
                        continue;
                    }
                    if let Some(input) = inputs_by_key.get(key) {
                        warn!(key = %key, "no desugared variant left, restoring input");
                        result.cores.push((*input).clone());
                        restored.insert(key);
                    }
                }
            }
        }

        for input in inputs {
            let key = input.key();
            if !surviving.contains(key) && !restored.contains(key) {
                warn!(key = %key, "no variant for input, restoring input");
                result.cores.push(input.clone());
            }
        }

        info!(
            cores = result.cores.len(),
            failed = result.failed.len(),
            "desugared variants"
        );
        Ok(result)
    }

    pub fn cost(&mut self, cores: &mut [ProgramCore]) -> Result<()> {
        self.enter(Stage::Cost);
        if cores.is_empty() {
            return Ok(());
        }
        self.client.cost(cores)?;
        info!(cores = cores.len(), "costed cores");
        Ok(())
    }

    /// Score every core against its key's sample, one session per core on
    /// the worker pool. Cores without a sample are left unscored.
    pub fn error(&mut self, cores: &mut [ProgramCore], samples: &SampleTable) -> Result<()> {
        self.enter(Stage::Error);
        let client = &self.client;
        let scored: Vec<Result<Option<f64>>> = self.pool.install(|| {
            cores
                .par_iter()
                .map(|core| match samples.get(core.key()) {
                    Some(sample) => client.error(core, sample).map(Some),
                    None => Ok(None),
                })
                .collect()
        });

        let mut unscored = 0;
        for (core, score) in cores.iter_mut().zip(scored) {
            core.error = score?;
            if core.error.is_none() {
                warn!(core = %core.name, "no sample, error not computed");
                unscored += 1;
            }
        }
        info!(cores = cores.len(), unscored, "computed errors");
        Ok(())
    }

    /// Per-key frontiers plus the optimizer's whole-batch frontier. Cores are
    /// grouped by logical key before anything is sent.
    pub fn pareto(&mut self, cores: &[ProgramCore]) -> Result<Frontiers> {
        self.enter(Stage::Pareto);
        let groups = pareto_groups(cores);
        let points: Vec<Vec<Point>> = groups.iter().map(|(_, points)| points.clone()).collect();
        let batch = frontier(&self.client.pareto(&points)?);

        let groups = groups
            .into_iter()
            .map(|(key, points)| (key, frontier(&points)))
            .collect::<Vec<_>>();
        info!(groups = groups.len(), points = batch.len(), "computed frontier");
        Ok(Frontiers { groups, batch })
    }

    /// Fresh `<drivers>/<i>` directories, one per benchmarked core.
    pub fn make_driver_dirs(&self, count: usize) -> Result<Vec<PathBuf>> {
        let root = self.config.drivers_dir();
        (0..count)
            .map(|index| {
                let dir = root.join(index.to_string());
                if dir.exists() {
                    fs::remove_dir_all(&dir)
                        .with_context(|| format!("failed to clear {}", dir.display()))?;
                }
                fs::create_dir_all(&dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                Ok(dir)
            })
            .collect()
    }

    /// Write a driver for every core that has a sample. Cores still lacking
    /// compiled text are compiled first, in one session.
    pub fn generate_drivers(
        &mut self,
        cores: Vec<ProgramCore>,
        samples: &SampleTable,
    ) -> Result<Drivers> {
        self.enter(Stage::GenerateDrivers);

        let mut drivers = Drivers::default();
        for core in cores {
            if samples.get(core.key()).is_some() {
                drivers.cores.push(core);
            } else {
                warn!(core = %core.name, "no sample, skipping benchmark");
                drivers.skipped.push(core.name);
            }
        }

        let missing: Vec<usize> = drivers
            .cores
            .iter()
            .enumerate()
            .filter(|(_, core)| core.compiled.is_none())
            .map(|(index, _)| index)
            .collect();
        if !missing.is_empty() {
            let mut batch: Vec<ProgramCore> =
                missing.iter().map(|&index| drivers.cores[index].clone()).collect();
            self.client.compile(self.backend.lang(), &mut batch)?;
            for (index, core) in missing.into_iter().zip(batch) {
                drivers.cores[index] = core;
            }
        }

        let dirs = self.make_driver_dirs(drivers.cores.len())?;
        for (core, dir) in drivers.cores.iter().zip(&dirs) {
            let sample = samples
                .get(core.key())
                .with_context(|| format!("sample for `{}` disappeared", core.name))?;
            let artifact = self
                .backend
                .generate_driver(core, sample, dir)
                .with_context(|| format!("failed to generate driver for `{}`", core.name))?;
            drivers.artifacts.push(artifact);
        }

        info!(
            drivers = drivers.artifacts.len(),
            skipped = drivers.skipped.len(),
            "generated drivers"
        );
        Ok(drivers)
    }

    /// Build, then time every driver sequentially.
    pub fn execute(&mut self, drivers: &Drivers) -> Result<Vec<f64>> {
        self.enter(Stage::Execute);
        self.backend.build(&drivers.artifacts)?;
        let times = self
            .backend
            .execute(&drivers.artifacts, self.config.num_runs)?;
        if times.len() != drivers.artifacts.len() {
            bail!(
                "backend `{}` returned {} timings for {} drivers",
                self.backend.name(),
                times.len(),
                drivers.artifacts.len()
            );
        }
        info!(drivers = times.len(), runs = self.config.num_runs, "executed drivers");
        Ok(times)
    }

    pub fn report_writer(&self) -> Result<ReportWriter> {
        ReportWriter::new(self.config.report_dir())
    }

    /// Time every operator the backend supports against the baseline.
    pub fn run_ops(&mut self) -> Result<RunSummary> {
        let mut cores = self.synthesize();
        self.compile(&mut cores)?;
        let outcome = self.sample(&cores)?;
        let table = SampleTable::new(&cores, &outcome.samples);

        let drivers = self.generate_drivers(cores.clone(), &table)?;
        let times = self.execute(&drivers)?;

        self.enter(Stage::Report);
        let writer = self.report_writer()?;
        let frontiers = Frontiers::default();
        writer.write_report(&cores, &drivers.cores, &drivers.dirs(), &times, &frontiers)?;
        writer.write_samples(&cores, &drivers.cores, &samples_for(&drivers.cores, &table))?;

        Ok(self.summarize(&cores, &drivers, times, outcome, Vec::new(), frontiers))
    }

    /// Read `path` and run the full improvement pipeline over it.
    pub fn run_improve(
        &mut self,
        path: &Path,
        source_platform: Option<&str>,
    ) -> Result<RunSummary> {
        let inputs = self.read(path)?;
        self.run_batch(inputs, source_platform)
    }

    /// Improve, score and time a batch of input programs.
    pub fn run_batch(
        &mut self,
        mut inputs: Vec<ProgramCore>,
        source_platform: Option<&str>,
    ) -> Result<RunSummary> {
        self.compile(&mut inputs)?;
        let outcome = self.sample(&inputs)?;
        let table = SampleTable::new(&inputs, &outcome.samples);

        let mut variants = self.improve(&inputs, source_platform)?;
        let cross_platform = source_platform.filter(|p| *p != self.config.platform);
        let mut desugar_failures = Vec::new();
        let mut baseline_frontier = None;
        if cross_platform.is_some() {
            baseline_frontier = Some(local_frontier(&variants));
            let desugared = self.desugar(&inputs, &variants)?;
            desugar_failures = desugared.failed;
            variants = desugared.cores;
        }

        self.cost(&mut variants)?;
        self.error(&mut variants, &table)?;
        let frontiers = self.pareto(&variants)?;

        let drivers = self.generate_drivers(variants, &table)?;
        let times = self.execute(&drivers)?;

        self.enter(Stage::Report);
        let writer = self.report_writer()?;
        writer.write_report(
            &inputs,
            &drivers.cores,
            &drivers.dirs(),
            &times,
            &frontiers,
        )?;
        writer.write_samples(&inputs, &drivers.cores, &samples_for(&drivers.cores, &table))?;
        if let Some(baseline) = &baseline_frontier {
            writer.write_baseline_report(&frontiers.batch, baseline)?;
        }

        Ok(self.summarize(
            &inputs,
            &drivers,
            times,
            outcome,
            desugar_failures,
            frontiers,
        ))
    }

    fn summarize(
        &self,
        inputs: &[ProgramCore],
        drivers: &Drivers,
        times: Vec<f64>,
        outcome: SampleOutcome,
        desugar_failures: Vec<String>,
        frontiers: Frontiers,
    ) -> RunSummary {
        RunSummary {
            stages: self.stages.clone(),
            inputs: inputs.len(),
            variants: drivers.cores.len() + drivers.skipped.len(),
            cached_samples: outcome.cached,
            unsamplable: outcome.unsamplable,
            desugar_failures,
            skipped: drivers.skipped.clone(),
            timings: drivers
                .cores
                .iter()
                .map(|core| core.name.clone())
                .zip(times)
                .collect(),
            frontier: frontiers.batch,
            key_frontiers: frontiers.groups,
            report_dir: self.config.report_dir(),
        }
    }
}

fn samples_for(cores: &[ProgramCore], table: &SampleTable) -> Vec<Option<platbench_ir::Sample>> {
    cores
        .iter()
        .map(|core| table.get(core.key()).cloned())
        .collect()
}

/// Batch frontier of the metrics variants already carry, combined per key
/// without asking the optimizer.
fn local_frontier(cores: &[ProgramCore]) -> Vec<Point> {
    let groups: Vec<Vec<Point>> = pareto_groups(cores)
        .into_iter()
        .map(|(_, points)| points)
        .collect();
    combine_frontiers(&groups)
}
