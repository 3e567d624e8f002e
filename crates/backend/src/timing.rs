//! Parsing and aggregation of driver timing output.

use anyhow::{anyhow, bail, Result};

/// Extract the duration a driver printed as `<value> <unit>`.
///
/// The last matching line wins so drivers may print diagnostics before it.
pub fn parse_duration(output: &str, unit: &str) -> Result<f64> {
    let value = output
        .lines()
        .rev()
        .find_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(value), Some(found), None) if found == unit => value.parse::<f64>().ok(),
                _ => None,
            }
        })
        .ok_or_else(|| anyhow!("driver output has no `<value> {unit}` line: {output:?}"))?;

    if !value.is_finite() || value < 0.0 {
        bail!("driver reported an invalid duration {value} {unit}");
    }
    Ok(value)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Run `measure` `num_runs` times per item, one invocation at a time, and
/// return the mean per item.
pub fn repeat_mean<T, F>(items: &[T], num_runs: usize, mut measure: F) -> Result<Vec<f64>>
where
    F: FnMut(&T, usize) -> Result<f64>,
{
    let num_runs = num_runs.max(1);
    items
        .iter()
        .map(|item| {
            let mut runs = Vec::with_capacity(num_runs);
            for run in 0..num_runs {
                runs.push(measure(item, run)?);
            }
            Ok(mean(&runs))
        })
        .collect()
}
