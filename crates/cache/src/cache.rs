//! Write-through cache persisted as one JSON file per entry.
//!
//! Layout under the cache root:
//!
//! ```text
//! samples/<key>.json
//! variants/<platform>/<key>.json
//! ```
//!
//! Keys longer than `MAX_STEM` bytes are shortened to a prefix plus a hash
//! of the full key. Entries carry their full key, so restoring never looks at
//! the file name.
//!
//! Every write goes to a temporary file in the target directory and is then
//! renamed over the entry, so a crash never leaves a half-written entry that
//! [`Cache::restore`] would pick up.

use anyhow::{Context, Result};
use platbench_ir::{sanitize_key, ProgramCore, ProgramKey, Sample};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

const SAMPLES_DIR: &str = "samples";
const VARIANTS_DIR: &str = "variants";
/// Longest file stem written, well below the usual 255-byte name limit.
const MAX_STEM: usize = 160;

/// Cached sampling outcome for one logical program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEntry {
    pub key: ProgramKey,
    /// Point count that was requested when the entry was produced.
    pub num_points: usize,
    /// `None` records that the program has no usable sampling domain.
    pub sample: Option<Sample>,
}

impl SampleEntry {
    pub fn new(key: ProgramKey, num_points: usize, sample: Option<Sample>) -> Self {
        Self {
            key,
            num_points,
            sample,
        }
    }
}

/// All variants generated for one logical program on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantEntry {
    pub platform: String,
    pub key: ProgramKey,
    pub cores: Vec<ProgramCore>,
}

#[derive(Debug, Default)]
pub struct Cache {
    root: PathBuf,
    samples: HashMap<ProgramKey, SampleEntry>,
    variants: HashMap<(String, ProgramKey), Vec<ProgramCore>>,
}

impl Cache {
    /// An empty cache rooted at `root`. Nothing is read until [`Cache::restore`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            samples: HashMap::new(),
            variants: HashMap::new(),
        }
    }

    /// Create a cache and load everything already persisted under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let mut cache = Self::new(root);
        cache.restore()?;
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace the in-memory tables with what is on disk.
    pub fn restore(&mut self) -> Result<()> {
        self.samples.clear();
        self.variants.clear();

        for entry in load_entries::<SampleEntry>(&self.root.join(SAMPLES_DIR))? {
            self.samples.insert(entry.key.clone(), entry);
        }

        let variants_root = self.root.join(VARIANTS_DIR);
        if variants_root.is_dir() {
            for platform_dir in fs::read_dir(&variants_root)
                .with_context(|| format!("reading {}", variants_root.display()))?
            {
                let platform_dir = platform_dir?.path();
                if !platform_dir.is_dir() {
                    continue;
                }
                for entry in load_entries::<VariantEntry>(&platform_dir)? {
                    self.variants
                        .insert((entry.platform, entry.key), entry.cores);
                }
            }
        }
        Ok(())
    }

    pub fn get_sample(&self, key: &ProgramKey) -> Option<&SampleEntry> {
        self.samples.get(key)
    }

    pub fn put_sample(&mut self, entry: SampleEntry) -> Result<()> {
        write_atomic(&self.sample_path(&entry.key), &entry)?;
        self.samples.insert(entry.key.clone(), entry);
        Ok(())
    }

    pub fn clear_sample(&mut self, key: &ProgramKey) -> Result<()> {
        self.samples.remove(key);
        let path = self.sample_path(key);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
        }
        Ok(())
    }

    pub fn get_variants(&self, platform: &str, key: &ProgramKey) -> Option<&[ProgramCore]> {
        self.variants
            .get(&(platform.to_string(), key.clone()))
            .map(Vec::as_slice)
    }

    pub fn put_variants(
        &mut self,
        platform: &str,
        key: &ProgramKey,
        cores: Vec<ProgramCore>,
    ) -> Result<()> {
        let entry = VariantEntry {
            platform: platform.to_string(),
            key: key.clone(),
            cores,
        };
        write_atomic(&self.variant_path(platform, key), &entry)?;
        self.variants
            .insert((entry.platform, entry.key), entry.cores);
        Ok(())
    }

    /// Number of cached sample entries, including unsamplable ones.
    pub fn count_samples(&self) -> usize {
        self.samples.len()
    }

    /// Number of cached variant cores across all platforms and keys.
    pub fn count_variants(&self) -> usize {
        self.variants.values().map(Vec::len).sum()
    }

    fn sample_path(&self, key: &ProgramKey) -> PathBuf {
        self.root
            .join(SAMPLES_DIR)
            .join(format!("{}.json", file_stem(key.as_str())))
    }

    fn variant_path(&self, platform: &str, key: &ProgramKey) -> PathBuf {
        self.root
            .join(VARIANTS_DIR)
            .join(file_stem(&sanitize_key(platform)))
            .join(format!("{}.json", file_stem(key.as_str())))
    }
}

/// `name` itself when short enough, otherwise a prefix and a 64-bit FNV-1a
/// hash of the whole name. Sanitised keys are ASCII, so byte slicing is safe.
fn file_stem(name: &str) -> String {
    if name.len() <= MAX_STEM {
        return name.to_string();
    }
    let hash = name
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        });
    let prefix = name.get(..MAX_STEM - 17).unwrap_or(name);
    format!("{}-{:016x}", prefix, hash)
}

fn load_entries<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for file in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = file?.path();
        // uncommitted temporaries have no `.json` extension
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let blob = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        match serde_json::from_slice(&blob) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable cache entry"),
        }
    }
    Ok(entries)
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let blob = serde_json::to_vec_pretty(value)?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(&blob)?;
    file.as_file().sync_all()?;
    file.persist(path)
        .with_context(|| format!("committing {}", path.display()))?;
    Ok(())
}
