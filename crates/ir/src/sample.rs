//! Sampled input points and their ground truths.

use crate::literal::{format_real, format_value};
use crate::real;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Input points for one program: one column per argument position, each
/// `num_points` long, plus a ground truth per point when an oracle exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sample {
    #[serde(with = "real::rows")]
    pub inputs: Vec<Vec<f64>>,
    #[serde(with = "real::opt_seq")]
    pub ground_truths: Vec<Option<f64>>,
}

impl Sample {
    pub fn new(inputs: Vec<Vec<f64>>, ground_truths: Vec<Option<f64>>) -> Result<Self> {
        for (position, column) in inputs.iter().enumerate() {
            if column.len() != ground_truths.len() {
                bail!(
                    "argument {} has {} points but there are {} ground truths",
                    position,
                    column.len(),
                    ground_truths.len()
                );
            }
        }
        Ok(Self {
            inputs,
            ground_truths,
        })
    }

    /// The sample of a zero-argument program: no columns, no points.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn num_points(&self) -> usize {
        self.ground_truths.len()
    }

    pub fn arg_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_points() == 0
    }

    /// Arguments of the `index`-th point, in argument order.
    pub fn row(&self, index: usize) -> Vec<f64> {
        self.inputs.iter().map(|column| column[index]).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<f64>> + '_ {
        (0..self.num_points()).map(move |index| self.row(index))
    }

    /// Render as the optimizer's point context: `(((x y) gt) ...)`.
    pub fn to_pcontext(&self) -> String {
        let points: Vec<String> = self
            .rows()
            .zip(self.ground_truths.iter())
            .map(|(row, truth)| {
                let args: Vec<String> = row.into_iter().map(format_real).collect();
                format!("(({}) {})", args.join(" "), format_value(*truth))
            })
            .collect();
        format!("({})", points.join(" "))
    }
}

/// Bitwise equality, so NaN points compare equal to themselves.
impl PartialEq for Sample {
    fn eq(&self, other: &Self) -> bool {
        let same_bits = |a: &f64, b: &f64| a.to_bits() == b.to_bits();
        self.inputs.len() == other.inputs.len()
            && self
                .inputs
                .iter()
                .zip(other.inputs.iter())
                .all(|(a, b)| a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| same_bits(x, y)))
            && self.ground_truths.len() == other.ground_truths.len()
            && self
                .ground_truths
                .iter()
                .zip(other.ground_truths.iter())
                .all(|(a, b)| match (a, b) {
                    (Some(x), Some(y)) => same_bits(x, y),
                    (None, None) => true,
                    _ => false,
                })
    }
}
