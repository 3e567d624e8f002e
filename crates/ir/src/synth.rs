//! Synthesis of one benchmark program per platform operator.

use crate::program::{ProgramCore, ProgramKey};
use serde::{Deserialize, Serialize};

/// Operators the optimizer's own sampler handles poorly.
const LOCALLY_SAMPLED: &[&str] = &["lgamma", "tgamma"];

/// Operators a platform supports, grouped by arity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorSet {
    pub unary: Vec<String>,
    pub binary: Vec<String>,
    pub ternary: Vec<String>,
    pub nary: Vec<(usize, String)>,
}

impl OperatorSet {
    pub fn len(&self) -> usize {
        self.unary.len() + self.binary.len() + self.ternary.len() + self.nary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The zero-argument reference program used to measure harness overhead.
pub fn baseline() -> ProgramCore {
    ProgramCore::new(
        "(FPCore () :name \"baseline\" 0)",
        ProgramKey::new("synth:baseline"),
        "baseline",
        0,
    )
}

/// `(FPCore (x0 .. xn) :name "<op>" (<op> x0 .. xn))`
pub fn synthesize_op(op: &str, arg_count: usize) -> ProgramCore {
    let head = if op == "neg" { "-" } else { op };
    let vars: Vec<String> = (0..arg_count).map(|i| format!("x{}", i)).collect();
    let mut app = vec![head.to_string()];
    app.extend(vars.iter().cloned());
    let source = format!(
        "(FPCore ({}) :name \"{}\" ({}))",
        vars.join(" "),
        op,
        app.join(" ")
    );
    ProgramCore::new(source, ProgramKey::new(&format!("synth:{}", op)), op, arg_count)
        .with_local_sample(LOCALLY_SAMPLED.contains(&op))
}

/// The baseline followed by one core per operator, unary first.
pub fn synthesize(ops: &OperatorSet) -> Vec<ProgramCore> {
    let mut cores = Vec::with_capacity(ops.len() + 1);
    cores.push(baseline());
    cores.extend(ops.unary.iter().map(|op| synthesize_op(op, 1)));
    cores.extend(ops.binary.iter().map(|op| synthesize_op(op, 2)));
    cores.extend(ops.ternary.iter().map(|op| synthesize_op(op, 3)));
    cores.extend(ops.nary.iter().map(|(n, op)| synthesize_op(op, *n)));
    cores
}
