//! The result file the optimizer writes after an `improve` run.

use anyhow::{anyhow, Context, Result};
use platbench_ir::real::Real;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// File name `improve` writes into its output directory.
pub const RESULTS_FILE: &str = "results.json";

/// One generated variant, as reported by `improve`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImprovedTest {
    /// Name of the input program this variant came from.
    pub name: String,
    pub vars: Vec<String>,
    pub precision: String,
    /// Domain predicate.
    pub pre: String,
    pub spec: String,
    /// Rewritten program body.
    pub output: String,
    /// Cost of the best point on the cost/accuracy curve.
    pub cost: f64,
    /// Final error of the rewritten program.
    pub end_error: f64,
    /// The record exactly as the optimizer wrote it.
    pub raw: serde_json::Value,
}

#[derive(Deserialize)]
struct TestFields {
    vars: Vec<String>,
    name: String,
    prec: String,
    pre: String,
    spec: String,
    output: String,
    #[serde(rename = "cost-accuracy")]
    cost_accuracy: Vec<serde_json::Value>,
    end: Real,
}

impl ImprovedTest {
    pub fn from_value(raw: serde_json::Value) -> Result<Self> {
        let fields = TestFields::deserialize(&raw).context("invalid improve test record")?;
        // [initial point, best point, other points...], each point [cost, accuracy, ...]
        let cost = fields
            .cost_accuracy
            .get(1)
            .and_then(|best| best.get(0))
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| anyhow!("test `{}` has no best cost/accuracy point", fields.name))?;

        Ok(Self {
            name: fields.name,
            vars: fields.vars,
            precision: fields.prec,
            pre: fields.pre,
            spec: fields.spec,
            output: fields.output,
            cost,
            end_error: fields.end.0,
            raw,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImproveReport {
    pub tests: Vec<ImprovedTest>,
}

impl ImproveReport {
    pub fn from_json(json: &str) -> Result<Self> {
        let mut document: serde_json::Value = serde_json::from_str(json)?;
        let tests = match document.get_mut("tests").map(serde_json::Value::take) {
            Some(serde_json::Value::Array(tests)) => tests,
            _ => return Err(anyhow!("improve results have no `tests` array")),
        };
        let tests = tests
            .into_iter()
            .map(ImprovedTest::from_value)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tests })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing {}", path.display()))
    }
}
