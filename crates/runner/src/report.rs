//! JSON reports joining input programs with their benchmarked variants.

use anyhow::{bail, Context, Result};
use platbench_ir::real::Real;
use platbench_ir::{ProgramCore, ProgramKey, Sample};
use platbench_optimizer::Point;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const REPORT_FILE: &str = "report.json";
pub const SAMPLES_FILE: &str = "sample.json";
pub const BASELINE_REPORT_FILE: &str = "baseline_report.json";

/// Output of the Pareto stage.
#[derive(Debug, Clone, Default)]
pub struct Frontiers {
    /// One frontier per logical key, in first-seen key order.
    pub groups: Vec<(ProgramKey, Vec<Point>)>,
    /// Best whole-batch totals: one variant per key, costs and errors summed.
    pub batch: Vec<Point>,
}

#[derive(Serialize)]
struct TimedVariant<'a> {
    platform_core: &'a ProgramCore,
    dir: String,
    time: Real,
}

#[derive(Serialize)]
struct TimedCore<'a> {
    input_core: &'a ProgramCore,
    platform_cores: Vec<TimedVariant<'a>>,
}

#[derive(Serialize)]
struct KeyFrontier<'a> {
    key: &'a ProgramKey,
    frontier: Vec<(Real, Real)>,
}

#[derive(Serialize)]
struct Report<'a> {
    cores: Vec<TimedCore<'a>>,
    frontier: Vec<(Real, Real)>,
    key_frontiers: Vec<KeyFrontier<'a>>,
}

#[derive(Serialize)]
struct SampledVariant<'a> {
    platform_core: &'a ProgramCore,
    sample: Option<&'a Sample>,
}

#[derive(Serialize)]
struct SampledCore<'a> {
    input_core: &'a ProgramCore,
    platform_cores: Vec<SampledVariant<'a>>,
}

#[derive(Serialize)]
struct BaselineReport {
    frontier: Vec<(Real, Real)>,
    baseline_frontier: Vec<(Real, Real)>,
}

pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create report directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Input cores joined with their variants' driver directories and
    /// timings, plus the batch frontier and every per-key frontier.
    /// `variants`, `dirs` and `times` are parallel.
    pub fn write_report(
        &self,
        inputs: &[ProgramCore],
        variants: &[ProgramCore],
        dirs: &[PathBuf],
        times: &[f64],
        frontiers: &Frontiers,
    ) -> Result<PathBuf> {
        if variants.len() != dirs.len() || variants.len() != times.len() {
            bail!(
                "report needs one directory and time per variant ({} variants, {} dirs, {} times)",
                variants.len(),
                dirs.len(),
                times.len()
            );
        }

        let timed: Vec<(&ProgramCore, TimedVariant<'_>)> = variants
            .iter()
            .zip(dirs)
            .zip(times)
            .map(|((core, dir), time)| {
                let variant = TimedVariant {
                    platform_core: core,
                    dir: dir.display().to_string(),
                    time: Real(*time),
                };
                (core, variant)
            })
            .collect();

        let report = Report {
            cores: join_by_key(inputs, timed)
                .into_iter()
                .map(|(input_core, platform_cores)| TimedCore {
                    input_core,
                    platform_cores,
                })
                .collect(),
            frontier: to_reals(&frontiers.batch),
            key_frontiers: frontiers
                .groups
                .iter()
                .map(|(key, points)| KeyFrontier {
                    key,
                    frontier: to_reals(points),
                })
                .collect(),
        };
        self.write_json(REPORT_FILE, &report)
    }

    /// Input cores joined with their variants and the raw samples they were
    /// timed on. `variants` and `samples` are parallel.
    pub fn write_samples(
        &self,
        inputs: &[ProgramCore],
        variants: &[ProgramCore],
        samples: &[Option<Sample>],
    ) -> Result<PathBuf> {
        if variants.len() != samples.len() {
            bail!(
                "sample report needs one sample per variant ({} variants, {} samples)",
                variants.len(),
                samples.len()
            );
        }

        let sampled = variants
            .iter()
            .zip(samples)
            .map(|(core, sample)| {
                let variant = SampledVariant {
                    platform_core: core,
                    sample: sample.as_ref(),
                };
                (core, variant)
            })
            .collect();

        let report: Vec<SampledCore<'_>> = join_by_key(inputs, sampled)
            .into_iter()
            .map(|(input_core, platform_cores)| SampledCore {
                input_core,
                platform_cores,
            })
            .collect();
        self.write_json(SAMPLES_FILE, &report)
    }

    pub fn write_baseline_report(
        &self,
        frontier: &[Point],
        baseline_frontier: &[Point],
    ) -> Result<PathBuf> {
        let report = BaselineReport {
            frontier: to_reals(frontier),
            baseline_frontier: to_reals(baseline_frontier),
        };
        self.write_json(BASELINE_REPORT_FILE, &report)
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(file);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote report");
        Ok(path)
    }
}

/// Attach each variant to the input sharing its key, in input order.
fn join_by_key<'a, V>(
    inputs: &'a [ProgramCore],
    variants: Vec<(&'a ProgramCore, V)>,
) -> Vec<(&'a ProgramCore, Vec<V>)> {
    let mut joined: Vec<(&ProgramKey, &ProgramCore, Vec<V>)> = inputs
        .iter()
        .map(|input| (input.key(), input, Vec::new()))
        .collect();
    for (core, variant) in variants {
        if let Some((_, _, members)) = joined.iter_mut().find(|(key, _, _)| *key == core.key()) {
            members.push(variant);
        }
    }
    joined
        .into_iter()
        .map(|(_, input, members)| (input, members))
        .collect()
}

fn to_reals(points: &[Point]) -> Vec<(Real, Real)> {
    points
        .iter()
        .map(|(cost, error)| (Real(*cost), Real(*error)))
        .collect()
}

/// Timing table: the baseline first, then every other program sorted
/// case-insensitively by name.
pub fn format_times(names: &[String], times: &[f64], unit: &str) -> String {
    let mut rows: Vec<(&str, f64)> = names
        .iter()
        .map(String::as_str)
        .zip(times.iter().copied())
        .collect();
    rows.sort_by_key(|(name, _)| name.to_lowercase());

    let mut out = format!("op | time ({})\n", unit);
    for (name, time) in rows.iter().filter(|(name, _)| *name == "baseline") {
        out.push_str(&format!("{}: {}\n", name, time));
    }
    for (name, time) in rows.iter().filter(|(name, _)| *name != "baseline") {
        out.push_str(&format!("[{} {}]\n", name, time));
    }
    out
}
