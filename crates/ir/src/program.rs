//! Program cores: the unit every pipeline stage passes around.

use crate::fpcore::parse_header;
use crate::real;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identity shared by every variant derived from one input program.
///
/// Keys are lowercased and escaped so they double as file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramKey(String);

impl ProgramKey {
    pub fn new(raw: &str) -> Self {
        Self(sanitize_key(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase `raw`, keep `[a-z0-9.-]`, and escape every other byte as `_xx`.
pub fn sanitize_key(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    for byte in lowered.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' => out.push(byte as char),
            other => out.push_str(&format!("_{:02x}", other)),
        }
    }
    out
}

/// A numeric program plus its identity and optimizer-derived metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramCore {
    /// Program text in the optimizer's representation language.
    pub source: String,
    key: ProgramKey,
    pub name: String,
    pub arg_count: usize,
    #[serde(default, with = "real::opt", skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, with = "real::opt", skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
    /// Backend source fragment produced by the optimizer's `compile` command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled: Option<String>,
    /// Raw improvement record, kept verbatim for reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Sample locally instead of asking the optimizer's sampler.
    #[serde(default)]
    pub local_sample: bool,
}

impl ProgramCore {
    pub fn new(
        source: impl Into<String>,
        key: ProgramKey,
        name: impl Into<String>,
        arg_count: usize,
    ) -> Self {
        Self {
            source: source.into(),
            key,
            name: name.into(),
            arg_count,
            cost: None,
            error: None,
            compiled: None,
            metadata: None,
            local_sample: false,
        }
    }

    /// Build a core from program text, recovering name and arity from its header.
    pub fn parse(source: &str, key: ProgramKey) -> Result<Self> {
        let source = source.trim();
        let header = parse_header(source)?;
        let name = header
            .name
            .ok_or_else(|| anyhow!("program has no :name property: {}", source))?;
        Ok(Self::new(source, key, name, header.arg_count))
    }

    pub fn with_local_sample(mut self, local_sample: bool) -> Self {
        self.local_sample = local_sample;
        self
    }

    pub fn key(&self) -> &ProgramKey {
        &self.key
    }

    /// The `(cost, error)` point once both metrics are known.
    pub fn pareto_point(&self) -> Option<(f64, f64)> {
        Some((self.cost?, self.error?))
    }
}

/// Group cores by logical key, keeping first-seen key order and input order
/// within each group.
pub fn group_by_key(cores: &[ProgramCore]) -> Vec<(&ProgramKey, Vec<&ProgramCore>)> {
    let mut groups: Vec<(&ProgramKey, Vec<&ProgramCore>)> = Vec::new();
    for core in cores {
        match groups.iter_mut().find(|(key, _)| *key == core.key()) {
            Some((_, members)) => members.push(core),
            None => groups.push((core.key(), vec![core])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_is_lowercase_and_path_safe() {
        let key = sanitize_key("File:/tmp/Bench.fpcore:3");
        assert_eq!(key, "file_3a_2ftmp_2fbench.fpcore_3a3");
        assert!(!key.contains('/'));
    }

    #[test]
    fn sanitize_keeps_distinct_operators_distinct() {
        assert_ne!(sanitize_key("synth:+"), sanitize_key("synth:*"));
        assert_ne!(sanitize_key("a_b"), sanitize_key("a:b"));
    }

    #[test]
    fn parse_recovers_name_and_arity() {
        let core = ProgramCore::parse(
            "(FPCore (x y) :name \"hypot\" (sqrt (+ (* x x) (* y y))))",
            ProgramKey::new("file:a:0"),
        )
        .unwrap();
        assert_eq!(core.name, "hypot");
        assert_eq!(core.arg_count, 2);
        assert_eq!(core.key().as_str(), "file_3aa_3a0");
    }

    #[test]
    fn parse_requires_a_name() {
        let result = ProgramCore::parse("(FPCore (x) x)", ProgramKey::new("k"));
        assert!(result.is_err());
    }

    #[test]
    fn groups_follow_first_seen_order() {
        let a = ProgramKey::new("a");
        let b = ProgramKey::new("b");
        let cores = vec![
            ProgramCore::new("(FPCore () 0)", b.clone(), "b0", 0),
            ProgramCore::new("(FPCore () 1)", a.clone(), "a0", 0),
            ProgramCore::new("(FPCore () 2)", b.clone(), "b1", 0),
        ];
        let groups = group_by_key(&cores);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, &b);
        let names: Vec<_> = groups[0].1.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b0", "b1"]);
        assert_eq!(groups[1].0, &a);
    }

    #[test]
    fn pareto_point_needs_both_metrics() {
        let mut core = ProgramCore::new("(FPCore () 0)", ProgramKey::new("k"), "k", 0);
        core.cost = Some(3.0);
        assert_eq!(core.pareto_point(), None);
        core.error = Some(0.5);
        assert_eq!(core.pareto_point(), Some((3.0, 0.5)));
    }
}
