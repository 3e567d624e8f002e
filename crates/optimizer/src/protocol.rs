//! Request rendering and response grammars, one pair per command.

use crate::error::ProtocolError;
use crate::pareto::Point;
use crate::results::ImprovedTest;
use platbench_ir::{format_real, parse_real, parse_value, ProgramCore, Sample};
use std::path::Path;

/// Sentinel the optimizer prints when a command has no result.
pub const FAILURE: &str = "#f";

pub fn sample_request(num_points: usize, core: &ProgramCore) -> String {
    format!("(sample {} {})", num_points, core.source)
}

/// `#f`, or `num_points` records `<x0 x1 ..>,<truth>` separated by `|`.
pub fn parse_sample(
    response: &str,
    arg_count: usize,
    num_points: usize,
) -> Result<Option<Sample>, ProtocolError> {
    let response = response.trim();
    if response == FAILURE {
        return Ok(None);
    }

    let mut inputs = vec![Vec::with_capacity(num_points); arg_count];
    let mut truths = Vec::with_capacity(num_points);
    if !response.is_empty() {
        for record in response.split('|') {
            let (point, truth) = record
                .split_once(',')
                .ok_or_else(|| ProtocolError::malformed("sample", response, "point without `,`"))?;
            let values: Vec<&str> = point.split_whitespace().collect();
            if values.len() != arg_count {
                return Err(ProtocolError::malformed(
                    "sample",
                    response,
                    format!("expected {} inputs per point, got {}", arg_count, values.len()),
                ));
            }
            for (column, value) in inputs.iter_mut().zip(values) {
                let value = parse_real(value)
                    .map_err(|e| ProtocolError::malformed("sample", response, e))?;
                column.push(value);
            }
            let truth =
                parse_value(truth).map_err(|e| ProtocolError::malformed("sample", response, e))?;
            truths.push(truth);
        }
    }

    if truths.len() != num_points {
        return Err(ProtocolError::malformed(
            "sample",
            response,
            format!("expected {} points, got {}", num_points, truths.len()),
        ));
    }
    Sample::new(inputs, truths)
        .map(Some)
        .map_err(|e| ProtocolError::malformed("sample", response, e))
}

pub fn compile_request(lang: &str, core: &ProgramCore) -> String {
    format!("(compile {} {})", lang, core.source)
}

/// Compiled source arrives on one line with `\n`, `\t` and `\\` escaped.
/// Any other backslash is kept as written.
pub fn parse_compiled(response: &str) -> String {
    let mut out = String::with_capacity(response.len());
    let mut chars = response.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out.trim().to_string()
}

pub fn cost_request(core: &ProgramCore) -> String {
    format!("(cost {})", core.source)
}

pub fn desugar_request(core: &ProgramCore) -> String {
    format!("(desugar {})", core.source)
}

/// Rewritten program text, or `None` when no rewriting exists.
pub fn parse_desugar(response: &str) -> Option<String> {
    let response = response.trim();
    (response != FAILURE).then(|| response.to_string())
}

pub fn error_request(core: &ProgramCore, sample: &Sample) -> String {
    format!("(error {} {})", core.source, sample.to_pcontext())
}

/// A single float; used by `cost` and `error`.
pub fn parse_scalar(command: &'static str, response: &str) -> Result<f64, ProtocolError> {
    parse_real(response).map_err(|e| ProtocolError::malformed(command, response, e))
}

pub fn improve_request(cores: &[ProgramCore], threads: usize, dir: &Path) -> String {
    let sources: Vec<&str> = cores.iter().map(|core| core.source.as_str()).collect();
    format!(
        "(improve ({}) {} {})",
        sources.join(" "),
        threads.max(1),
        quote(&dir.display().to_string())
    )
}

pub fn resugar_request(test: &ImprovedTest) -> String {
    format!(
        "(resugar ({}) {} {} {} {} {})",
        test.vars.join(" "),
        quote(&test.name),
        test.precision,
        test.pre,
        test.spec,
        test.output
    )
}

/// `(pareto ((c e) ..) ((c e) ..) ..)`, one parenthesised group per key.
pub fn pareto_request(groups: &[Vec<Point>]) -> String {
    let groups: Vec<String> = groups
        .iter()
        .map(|group| {
            let points: Vec<String> = group
                .iter()
                .map(|(cost, error)| format!("({} {})", format_real(*cost), format_real(*error)))
                .collect();
            format!("({})", points.join(" "))
        })
        .collect();
    format!("(pareto {})", groups.join(" "))
}

/// The batch frontier: points separated by `|`, each exactly `cost err`.
pub fn parse_pareto(response: &str) -> Result<Vec<Point>, ProtocolError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::malformed("pareto", response, "empty frontier"));
    }
    trimmed
        .split('|')
        .map(|segment| {
            let values = segment
                .split_whitespace()
                .map(parse_real)
                .collect::<anyhow::Result<Vec<f64>>>()
                .map_err(|e| ProtocolError::malformed("pareto", response, e))?;
            match values[..] {
                [cost, error] => Ok((cost, error)),
                _ => Err(ProtocolError::malformed(
                    "pareto",
                    response,
                    format!("point `{}` is not a cost/error pair", segment.trim()),
                )),
            }
        })
        .collect()
}

pub fn read_request(path: &Path) -> String {
    format!("(read {})", quote(&path.display().to_string()))
}

/// Racket string literal: double quotes with `\\` and `"` escaped.
fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
