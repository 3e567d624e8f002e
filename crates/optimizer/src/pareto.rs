//! Cost/error domination and per-key grouping.
//!
//! The optimizer computes the batch frontier over the protocol; these helpers
//! decide what gets sent (one group per logical key), reduce each group to
//! its own frontier and rebuild a batch frontier locally when no optimizer
//! is involved.

use platbench_ir::{group_by_key, ProgramCore, ProgramKey};

/// A `(cost, error)` pair. Lower is better in both dimensions.
pub type Point = (f64, f64);

/// `a` is no worse than `b` in both dimensions and strictly better in one.
pub fn dominates(a: Point, b: Point) -> bool {
    a.0 <= b.0 && a.1 <= b.1 && (a.0 < b.0 || a.1 < b.1)
}

/// Non-dominated subset of `points`, sorted by cost. Duplicates collapse to one
/// point and points with a NaN coordinate are dropped.
pub fn frontier(points: &[Point]) -> Vec<Point> {
    let candidates: Vec<Point> = points
        .iter()
        .copied()
        .filter(|(cost, error)| !cost.is_nan() && !error.is_nan())
        .collect();

    let mut result: Vec<Point> = candidates
        .iter()
        .copied()
        .filter(|p| !candidates.iter().any(|q| dominates(*q, *p)))
        .collect();
    result.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    result.dedup();
    result
}

/// Whole-batch frontier: every way of picking one point per group, with
/// costs and errors summed, reduced to its non-dominated set.
///
/// Groups are folded one at a time and pruned after each step. A dominated
/// partial sum can only produce dominated totals, so pruning loses nothing.
/// Empty groups are ignored; no groups yields no points.
pub fn combine_frontiers(groups: &[Vec<Point>]) -> Vec<Point> {
    let mut groups = groups
        .iter()
        .map(|group| frontier(group))
        .filter(|group| !group.is_empty());
    let Some(first) = groups.next() else {
        return Vec::new();
    };
    groups.fold(first, |acc, group| {
        let sums: Vec<Point> = acc
            .iter()
            .flat_map(|a| group.iter().map(move |b| (a.0 + b.0, a.1 + b.1)))
            .collect();
        frontier(&sums)
    })
}

/// Points grouped by logical key, in first-seen key order. Cores without both
/// metrics are left out; keys with no scored cores yield no group.
pub fn pareto_groups(cores: &[ProgramCore]) -> Vec<(ProgramKey, Vec<Point>)> {
    group_by_key(cores)
        .into_iter()
        .filter_map(|(key, members)| {
            let points: Vec<Point> = members.iter().filter_map(|c| c.pareto_point()).collect();
            (!points.is_empty()).then(|| (key.clone(), points))
        })
        .collect()
}
