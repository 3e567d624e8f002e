//! Input sampling with cache reuse and a parallel fallback.

use anyhow::Result;
use platbench_cache::{Cache, SampleEntry};
use platbench_ir::{ProgramCore, ProgramKey, Sample};
use platbench_optimizer::OptimizerClient;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one sampling pass, in request order.
#[derive(Debug, Clone, Default)]
pub struct SampleOutcome {
    pub samples: Vec<Option<Sample>>,
    /// Cores answered from the cache.
    pub cached: usize,
    /// Names of cores with no usable sampling domain.
    pub unsamplable: Vec<String>,
}

pub struct Sampler {
    client: OptimizerClient,
    pool: Arc<ThreadPool>,
    seed: u64,
    force_local: bool,
}

impl Sampler {
    pub fn new(client: OptimizerClient, pool: Arc<ThreadPool>, seed: u64) -> Self {
        Self {
            client,
            pool,
            seed,
            force_local: false,
        }
    }

    pub fn with_force_local(mut self, force_local: bool) -> Self {
        self.force_local = force_local;
        self
    }

    /// One sample per core, reusing cached samples of the requested size.
    ///
    /// A cached entry of another size is purged and recomputed. Fresh samples,
    /// including "unsamplable" outcomes, are written back to `cache`.
    pub fn sample(
        &self,
        cache: &mut Cache,
        cores: &[ProgramCore],
        num_points: usize,
    ) -> Result<SampleOutcome> {
        let mut slots: Vec<Option<Option<Sample>>> = Vec::with_capacity(cores.len());
        let mut cached = 0;

        for core in cores {
            if core.arg_count == 0 {
                slots.push(Some(Some(Sample::empty())));
                continue;
            }
            let stale = match cache.get_sample(core.key()) {
                Some(entry) if entry.num_points == num_points => {
                    slots.push(Some(entry.sample.clone()));
                    cached += 1;
                    continue;
                }
                Some(_) => true,
                None => false,
            };
            if stale {
                cache.clear_sample(core.key())?;
            }
            slots.push(None);
        }

        let pending: Vec<&ProgramCore> = cores
            .iter()
            .zip(&slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(core, _)| core)
            .collect();

        let fresh: Vec<Result<Option<Sample>>> = self.pool.install(|| {
            pending
                .par_iter()
                .map(|core| self.sample_one(core, num_points))
                .collect()
        });

        let mut fresh = fresh.into_iter();
        let mut samples = Vec::with_capacity(cores.len());
        let mut unsamplable = Vec::new();
        for (core, slot) in cores.iter().zip(slots) {
            let sample = match slot {
                Some(sample) => sample,
                None => {
                    let sample = match fresh.next() {
                        Some(result) => result?,
                        None => anyhow::bail!("sampler lost the result for `{}`", core.name),
                    };
                    cache.put_sample(SampleEntry::new(
                        core.key().clone(),
                        num_points,
                        sample.clone(),
                    ))?;
                    sample
                }
            };
            if sample.is_none() {
                warn!(core = %core.name, "no usable sampling domain");
                unsamplable.push(core.name.clone());
            }
            samples.push(sample);
        }

        info!(
            cores = cores.len(),
            cached,
            sampled = pending.len(),
            unsamplable = unsamplable.len(),
            "sampled cores"
        );
        Ok(SampleOutcome {
            samples,
            cached,
            unsamplable,
        })
    }

    fn sample_one(&self, core: &ProgramCore, num_points: usize) -> Result<Option<Sample>> {
        if self.force_local || core.local_sample {
            let seed = core_seed(self.seed, core.key());
            return local_sample(core.arg_count, num_points, seed).map(Some);
        }
        self.client.sample(core, num_points)
    }
}

/// `arg_count` columns of values drawn uniformly over IEEE-754 bit patterns,
/// so NaN, infinities and subnormals all occur. No ground truths.
pub fn local_sample(arg_count: usize, num_points: usize, seed: u64) -> Result<Sample> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let inputs = (0..arg_count)
        .map(|_| {
            (0..num_points)
                .map(|_| f64::from_bits(rng.u64(..)))
                .collect()
        })
        .collect();
    Sample::new(inputs, vec![None; num_points])
}

/// Per-core seed, independent of scheduling order.
fn core_seed(seed: u64, key: &ProgramKey) -> u64 {
    key.as_str()
        .bytes()
        .fold(seed ^ 0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
}

/// Samples looked up by logical key, shared by every variant of a program.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    by_key: HashMap<ProgramKey, Option<Sample>>,
}

impl SampleTable {
    pub fn new(cores: &[ProgramCore], samples: &[Option<Sample>]) -> Self {
        let by_key = cores
            .iter()
            .zip(samples)
            .map(|(core, sample)| (core.key().clone(), sample.clone()))
            .collect();
        Self { by_key }
    }

    /// The sample for `key`, or `None` when it is unsamplable or unknown.
    pub fn get(&self, key: &ProgramKey) -> Option<&Sample> {
        self.by_key.get(key).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platbench_ir::synthesize_op;
    use platbench_optimizer::testing::ScriptedLauncher;
    use tempfile::TempDir;

    fn pool(threads: usize) -> Arc<ThreadPool> {
        Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap(),
        )
    }

    fn sample_response(request: &str) -> Vec<String> {
        // `(sample N ...)` answered with N single-argument points
        let n: usize = request
            .split_whitespace()
            .nth(1)
            .unwrap()
            .parse()
            .unwrap();
        let records: Vec<String> = (0..n).map(|i| format!("{}.0,{}.0", i, i)).collect();
        vec![records.join("|")]
    }

    fn sampler(launcher: &ScriptedLauncher, threads: usize) -> Sampler {
        let client = OptimizerClient::new(Arc::new(launcher.clone()), "python");
        Sampler::new(client, pool(threads), 7)
    }

    #[test]
    fn zero_argument_cores_never_reach_the_optimizer() {
        let dir = TempDir::new().unwrap();
        let mut cache = Cache::new(dir.path());
        let launcher = ScriptedLauncher::new(|_, _| Ok(vec!["#f".to_string()]));

        let outcome = sampler(&launcher, 2)
            .sample(&mut cache, &[platbench_ir::baseline()], 0)
            .unwrap();
        assert_eq!(outcome.samples, vec![Some(Sample::empty())]);
        assert_eq!(launcher.sessions_opened(), 0);
        assert_eq!(cache.count_samples(), 0);
    }

    #[test]
    fn order_is_preserved_across_workers() {
        let dir = TempDir::new().unwrap();
        let mut cache = Cache::new(dir.path());
        let launcher = ScriptedLauncher::new(|_, request| {
            if request.contains("\"cos\"") {
                Ok(vec!["#f".to_string()])
            } else {
                Ok(sample_response(request))
            }
        });
        let cores = vec![
            synthesize_op("sin", 1),
            synthesize_op("cos", 1),
            synthesize_op("exp", 1),
        ];

        let outcome = sampler(&launcher, 3).sample(&mut cache, &cores, 4).unwrap();
        assert_eq!(outcome.samples.len(), 3);
        assert_eq!(outcome.samples[0].as_ref().unwrap().num_points(), 4);
        assert!(outcome.samples[1].is_none());
        assert_eq!(outcome.samples[2].as_ref().unwrap().num_points(), 4);
        assert_eq!(outcome.unsamplable, vec!["cos".to_string()]);
        assert_eq!(outcome.cached, 0);

        // unsamplable outcomes are cached too
        assert_eq!(cache.count_samples(), 3);
        assert!(cache.get_sample(cores[1].key()).unwrap().sample.is_none());
    }

    #[test]
    fn cached_samples_are_reused() {
        let dir = TempDir::new().unwrap();
        let mut cache = Cache::new(dir.path());
        let launcher = ScriptedLauncher::new(|_, request| Ok(sample_response(request)));
        let cores = vec![synthesize_op("sin", 1)];
        let sampler = sampler(&launcher, 1);

        let first = sampler.sample(&mut cache, &cores, 5).unwrap();
        let second = sampler.sample(&mut cache, &cores, 5).unwrap();
        assert_eq!(launcher.count("sample"), 1);
        assert_eq!(second.cached, 1);
        assert_eq!(first.samples, second.samples);
    }

    #[test]
    fn size_mismatch_purges_and_resamples() {
        let dir = TempDir::new().unwrap();
        let mut cache = Cache::new(dir.path());
        let launcher = ScriptedLauncher::new(|_, request| Ok(sample_response(request)));
        let cores = vec![synthesize_op("sin", 1)];
        let sampler = sampler(&launcher, 1);

        sampler.sample(&mut cache, &cores, 5).unwrap();
        let resized = sampler.sample(&mut cache, &cores, 3).unwrap();
        assert_eq!(launcher.count("sample"), 2);
        assert_eq!(resized.cached, 0);
        assert_eq!(resized.samples[0].as_ref().unwrap().num_points(), 3);

        let mut restored = Cache::open(dir.path()).unwrap();
        assert_eq!(restored.get_sample(cores[0].key()).unwrap().num_points, 3);
        restored.restore().unwrap();
        assert_eq!(restored.count_samples(), 1);
    }

    #[test]
    fn local_sampling_skips_the_optimizer() {
        let dir = TempDir::new().unwrap();
        let mut cache = Cache::new(dir.path());
        let launcher = ScriptedLauncher::new(|_, _| Ok(vec!["#f".to_string()]));
        let cores = vec![synthesize_op("lgamma", 1), synthesize_op("+", 2)];

        let outcome = sampler(&launcher, 2)
            .with_force_local(true)
            .sample(&mut cache, &cores, 16)
            .unwrap();
        assert_eq!(launcher.sessions_opened(), 0);
        let add = outcome.samples[1].as_ref().unwrap();
        assert_eq!(add.arg_count(), 2);
        assert_eq!(add.num_points(), 16);
        assert!(add.ground_truths.iter().all(Option::is_none));
    }

    #[test]
    fn local_samples_are_deterministic_per_key() {
        let a = local_sample(2, 8, core_seed(1, &ProgramKey::new("synth:+"))).unwrap();
        let b = local_sample(2, 8, core_seed(1, &ProgramKey::new("synth:+"))).unwrap();
        let c = local_sample(2, 8, core_seed(1, &ProgramKey::new("synth:-"))).unwrap();
        // NaN draws break float equality, so compare bit patterns
        let bits = |s: &Sample| -> Vec<Vec<u64>> {
            s.inputs
                .iter()
                .map(|column| column.iter().map(|v| v.to_bits()).collect())
                .collect()
        };
        assert_eq!(bits(&a), bits(&b));
        assert_ne!(bits(&a), bits(&c));
    }

    #[test]
    fn sample_table_flattens_unsamplable_entries() {
        let cores = vec![synthesize_op("sin", 1), synthesize_op("cos", 1)];
        let table = SampleTable::new(&cores, &[Some(Sample::empty()), None]);
        assert_eq!(table.len(), 2);
        assert!(table.get(cores[0].key()).is_some());
        assert!(table.get(cores[1].key()).is_none());
        assert!(table.get(&ProgramKey::new("other")).is_none());
    }
}
