//! Typed client: one method per protocol command.

use crate::error::ProtocolError;
use crate::pareto::Point;
use crate::protocol;
use crate::results::{ImproveReport, ImprovedTest, RESULTS_FILE};
use crate::session::{Session, SessionLauncher};
use anyhow::{bail, Context, Result};
use platbench_ir::{ProgramCore, ProgramKey, Sample};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Drives the optimizer for one platform.
///
/// Every call opens a fresh session, so clients are cheap to clone and safe to
/// share across worker threads; concurrent calls never share a pipe.
#[derive(Clone)]
pub struct OptimizerClient {
    launcher: Arc<dyn SessionLauncher>,
    platform: String,
}

impl OptimizerClient {
    pub fn new(launcher: Arc<dyn SessionLauncher>, platform: impl Into<String>) -> Self {
        Self {
            launcher,
            platform: platform.into(),
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// A client for another platform sharing the same launcher.
    pub fn for_platform(&self, platform: impl Into<String>) -> Self {
        Self::new(Arc::clone(&self.launcher), platform)
    }

    fn open(&self) -> Result<Box<dyn Session>> {
        self.launcher
            .open(&self.platform)
            .with_context(|| format!("opening optimizer session for `{}`", self.platform))
    }

    /// Send `request` and read its single response line.
    fn exchange(
        session: &mut dyn Session,
        command: &'static str,
        request: &str,
    ) -> Result<String> {
        session.send(request)?;
        match session.read_line()? {
            Some(line) => Ok(line),
            None => Err(ProtocolError::UnexpectedEof { command }.into()),
        }
    }

    /// Sample `num_points` inputs. `None` means the program has no usable
    /// sampling domain.
    pub fn sample(&self, core: &ProgramCore, num_points: usize) -> Result<Option<Sample>> {
        let mut session = self.open()?;
        let response = Self::exchange(
            session.as_mut(),
            "sample",
            &protocol::sample_request(num_points, core),
        )?;
        session.close()?;
        Ok(protocol::parse_sample(&response, core.arg_count, num_points)?)
    }

    /// Fill `compiled` for every core, in one session.
    pub fn compile(&self, lang: &str, cores: &mut [ProgramCore]) -> Result<()> {
        let mut session = self.open()?;
        for core in cores.iter_mut() {
            let response = Self::exchange(
                session.as_mut(),
                "compile",
                &protocol::compile_request(lang, core),
            )?;
            core.compiled = Some(protocol::parse_compiled(&response));
        }
        session.close()?;
        debug!(platform = %self.platform, lang, cores = cores.len(), "compiled cores");
        Ok(())
    }

    /// Overwrite `cost` for every core, in one session.
    pub fn cost(&self, cores: &mut [ProgramCore]) -> Result<()> {
        let mut session = self.open()?;
        for core in cores.iter_mut() {
            let response =
                Self::exchange(session.as_mut(), "cost", &protocol::cost_request(core))?;
            core.cost = Some(protocol::parse_scalar("cost", &response)?);
        }
        session.close()?;
        Ok(())
    }

    /// Rewrite each core into this platform's vocabulary. `None` entries mark
    /// cores with no valid rewriting.
    pub fn desugar(&self, cores: &[ProgramCore]) -> Result<Vec<Option<String>>> {
        let mut session = self.open()?;
        let mut rewritten = Vec::with_capacity(cores.len());
        for core in cores {
            let response =
                Self::exchange(session.as_mut(), "desugar", &protocol::desugar_request(core))?;
            rewritten.push(protocol::parse_desugar(&response));
        }
        session.close()?;
        Ok(rewritten)
    }

    /// Empirical error of `core` over a pre-sampled point set.
    pub fn error(&self, core: &ProgramCore, sample: &Sample) -> Result<f64> {
        let mut session = self.open()?;
        let response = Self::exchange(
            session.as_mut(),
            "error",
            &protocol::error_request(core, sample),
        )?;
        session.close()?;
        Ok(protocol::parse_scalar("error", &response)?)
    }

    /// Run the full search over `cores`. The optimizer reports through
    /// `<dir>/results.json` rather than the pipe.
    pub fn improve(&self, cores: &[ProgramCore], threads: usize, dir: &Path) -> Result<ImproveReport> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let results = dir.join(RESULTS_FILE);
        if results.exists() {
            fs::remove_file(&results)
                .with_context(|| format!("removing stale {}", results.display()))?;
        }

        let mut session = self.open()?;
        session.send(&protocol::improve_request(cores, threads, dir))?;
        session.close()?;

        if !results.exists() {
            return Err(ProtocolError::Failed {
                command: "improve",
                detail: format!("no result file at {}", results.display()),
            }
            .into());
        }
        ImproveReport::load(&results).map_err(|e| {
            ProtocolError::Failed {
                command: "improve",
                detail: format!("{:#}", e),
            }
            .into()
        })
    }

    /// Rebuild a full program definition from an `improve` record.
    pub fn resugar(&self, test: &ImprovedTest) -> Result<String> {
        let mut session = self.open()?;
        session.send(&protocol::resugar_request(test))?;
        let output = session.close()?;
        let program = output.trim();
        if program.is_empty() {
            return Err(ProtocolError::malformed("resugar", output.clone(), "empty response").into());
        }
        Ok(program.to_string())
    }

    /// The optimizer's whole-batch frontier over `groups`, one group per
    /// logical program.
    pub fn pareto(&self, groups: &[Vec<Point>]) -> Result<Vec<Point>> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let mut session = self.open()?;
        let response =
            Self::exchange(session.as_mut(), "pareto", &protocol::pareto_request(groups))?;
        session.close()?;
        Ok(protocol::parse_pareto(&response)?)
    }

    /// Read a corpus file, or every file under a directory recursively.
    /// Each program is keyed by its source path and output line index.
    pub fn read(&self, path: &Path) -> Result<Vec<ProgramCore>> {
        if !path.exists() {
            bail!("path does not exist: {}", path.display());
        }
        if path.is_dir() {
            let mut entries = fs::read_dir(path)
                .with_context(|| format!("reading {}", path.display()))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<PathBuf>>>()?;
            entries.sort();
            let mut cores = Vec::new();
            for entry in entries {
                cores.extend(self.read(&entry)?);
            }
            return Ok(cores);
        }

        let mut session = self.open()?;
        session.send(&protocol::read_request(path))?;
        let output = session.close()?;

        let mut cores = Vec::new();
        for (index, line) in output.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let key = ProgramKey::new(&format!("file:{}:{}", path.display(), index));
            let core = ProgramCore::parse(line, key)
                .map_err(|e| ProtocolError::malformed("read", line, e))?;
            cores.push(core);
        }
        debug!(path = %path.display(), cores = cores.len(), "read corpus file");
        Ok(cores)
    }
}
