//! Backend that times programs compiled to Python under CPython.

use crate::backend::{Backend, DriverArtifact};
use crate::timing::{parse_duration, repeat_mean};
use anyhow::{bail, Context, Result};
use platbench_ir::{OperatorSet, ProgramCore, Sample};
use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

pub const DRIVER_FILE: &str = "main.py";

/// Function name the optimizer's Python output defines when no `def` is found.
const DEFAULT_ENTRY: &str = "foo";

const UNARY_OPS: &[&str] = &[
    "neg", "acos", "acosh", "asin", "asinh", "atan", "atanh", "ceil", "cos", "cosh", "erf",
    "erfc", "exp", "expm1", "fabs", "floor", "lgamma", "log", "log10", "log2", "log1p", "sin",
    "sinh", "sqrt", "tan", "tanh", "tgamma", "trunc",
];

const BINARY_OPS: &[&str] = &[
    "+", "-", "*", "/", "atan2", "copysign", "fmax", "fmin", "fmod", "hypot", "pow", "remainder",
];

const NARY_OPS: &[(usize, &str)] = &[(3, "sum3"), (4, "sum4")];

#[derive(Debug, Clone)]
pub struct PythonBackend {
    interpreter: OsString,
}

impl Default for PythonBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonBackend {
    pub fn new() -> Self {
        Self {
            interpreter: OsString::from("python3"),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<OsString>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    fn run_driver(&self, artifact: &DriverArtifact) -> Result<f64> {
        let output = Command::new(&self.interpreter)
            .arg(&artifact.entry)
            .current_dir(&artifact.dir)
            .output()
            .with_context(|| {
                format!(
                    "failed to launch {:?} for driver {}",
                    self.interpreter,
                    artifact.entry.display()
                )
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            bail!(
                "driver {} exited with {}: {}",
                artifact.entry.display(),
                output.status,
                stderr.trim()
            );
        }
        if !stderr.trim().is_empty() {
            debug!(driver = %artifact.name, stderr = %stderr.trim(), "driver diagnostics");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_duration(&stdout, self.time_unit())
            .with_context(|| format!("driver {}", artifact.entry.display()))
    }
}

impl Backend for PythonBackend {
    fn name(&self) -> &str {
        "python"
    }

    fn lang(&self) -> &str {
        "python"
    }

    fn time_unit(&self) -> &str {
        "ms"
    }

    fn operators(&self) -> OperatorSet {
        OperatorSet {
            unary: UNARY_OPS.iter().map(|op| op.to_string()).collect(),
            binary: BINARY_OPS.iter().map(|op| op.to_string()).collect(),
            ternary: Vec::new(),
            nary: NARY_OPS
                .iter()
                .map(|(arity, op)| (*arity, op.to_string()))
                .collect(),
        }
    }

    fn generate_driver(
        &self,
        core: &ProgramCore,
        sample: &Sample,
        dir: &Path,
    ) -> Result<DriverArtifact> {
        let compiled = core
            .compiled
            .as_deref()
            .with_context(|| format!("`{}` has no compiled Python text", core.name))?;
        if !sample.is_empty() && sample.arg_count() != core.arg_count {
            bail!(
                "`{}` takes {} arguments but its sample has {} columns",
                core.name,
                core.arg_count,
                sample.arg_count()
            );
        }

        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create driver directory {}", dir.display()))?;
        let entry = dir.join(DRIVER_FILE);
        let source = render_driver(compiled, core.arg_count, sample);
        fs::write(&entry, source)
            .with_context(|| format!("failed to write driver {}", entry.display()))?;

        Ok(DriverArtifact {
            name: core.name.clone(),
            dir: dir.to_path_buf(),
            entry,
            rows: sample.num_points(),
        })
    }

    fn build(&self, artifacts: &[DriverArtifact]) -> Result<()> {
        debug!(drivers = artifacts.len(), "python drivers are interpreted; nothing to build");
        Ok(())
    }

    fn execute(&self, artifacts: &[DriverArtifact], num_runs: usize) -> Result<Vec<f64>> {
        info!(drivers = artifacts.len(), runs = num_runs, "executing python drivers");
        repeat_mean(artifacts, num_runs, |artifact, run| {
            let elapsed = self.run_driver(artifact)?;
            debug!(driver = %artifact.name, run, elapsed_ms = elapsed, "driver finished");
            Ok(elapsed)
        })
    }
}

/// Python spelling of a float literal; non-finite values go through `math`.
pub fn python_literal(value: f64) -> String {
    if value.is_nan() {
        "math.nan".to_string()
    } else if value.is_infinite() {
        let literal = if value > 0.0 { "math.inf" } else { "-math.inf" };
        literal.to_string()
    } else {
        format!("{value:?}")
    }
}

/// The function the harness calls: `foo` when the fragment defines it,
/// otherwise the last top-level `def`, so leading helpers are never timed.
fn entry_point(compiled: &str) -> &str {
    let defined: Vec<&str> = compiled
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("def ")?;
            let end = rest.find('(')?;
            Some(rest[..end].trim())
        })
        .filter(|name| !name.is_empty())
        .collect();
    if defined.contains(&DEFAULT_ENTRY) {
        return DEFAULT_ENTRY;
    }
    defined.last().copied().unwrap_or(DEFAULT_ENTRY)
}

fn render_driver(compiled: &str, arg_count: usize, sample: &Sample) -> String {
    let rows = sample.num_points();
    let entry = entry_point(compiled);
    let mut out = String::new();

    out.push_str("import math\nimport sys\nimport time\n\n");
    out.push_str(compiled.trim_end());
    out.push_str("\n\n");

    for (position, column) in sample.inputs.iter().enumerate() {
        let _ = writeln!(out, "x{position} = [");
        for value in column {
            let _ = writeln!(out, "    {},", python_literal(*value));
        }
        out.push_str("]\n");
    }

    let args: Vec<String> = (0..arg_count).map(|i| format!("x{i}[j]")).collect();
    let _ = write!(
        out,
        "\ndef _run_row(j):\n    \
         try:\n        \
         {entry}({args})\n        \
         return True\n    \
         except Exception:\n        \
         return False\n\n",
        args = args.join(", ")
    );
    out.push_str(
        "if __name__ == \"__main__\":\n    \
         skipped = 0\n    \
         start = time.perf_counter_ns()\n",
    );
    if rows > 0 {
        let _ = write!(
            out,
            "    for j in range({rows}):\n        \
             if not _run_row(j):\n            \
             skipped += 1\n"
        );
    }
    out.push_str(
        "    end = time.perf_counter_ns()\n    \
         if skipped:\n        \
         print(f\"skipped {skipped} rows\", file=sys.stderr)\n    \
         print(f\"{(end - start) / 1e6} ms\")\n",
    );
    out
}
