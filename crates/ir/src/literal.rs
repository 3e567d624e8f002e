//! Number literals in the optimizer's textual syntax.

use anyhow::{anyhow, Result};

/// Render a float the way the optimizer reads it back (`+nan.0`, `+inf.0`, ...).
pub fn format_real(value: f64) -> String {
    if value.is_nan() {
        "+nan.0".to_string()
    } else if value.is_infinite() {
        let literal = if value > 0.0 { "+inf.0" } else { "-inf.0" };
        literal.to_string()
    } else {
        format!("{:?}", value)
    }
}

/// Render a possibly-missing value; missing values are written as `#f`.
pub fn format_value(value: Option<f64>) -> String {
    value.map(format_real).unwrap_or_else(|| "#f".to_string())
}

/// Parse a number printed by the optimizer. `#f` yields `None`.
pub fn parse_value(text: &str) -> Result<Option<f64>> {
    let text = text.trim();
    let value = match text {
        "#f" => return Ok(None),
        "+nan.0" | "-nan.0" | "+nan.f" | "-nan.f" => f64::NAN,
        "+inf.0" | "+inf.f" => f64::INFINITY,
        "-inf.0" | "-inf.f" => f64::NEG_INFINITY,
        _ => match text.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num
                    .parse()
                    .map_err(|_| anyhow!("invalid rational literal `{}`", text))?;
                let den: f64 = den
                    .parse()
                    .map_err(|_| anyhow!("invalid rational literal `{}`", text))?;
                num / den
            }
            None => text
                .parse()
                .map_err(|_| anyhow!("invalid number literal `{}`", text))?,
        },
    };
    Ok(Some(value))
}

/// Parse a number that must be present.
pub fn parse_real(text: &str) -> Result<f64> {
    parse_value(text)?.ok_or_else(|| anyhow!("expected a number, got `{}`", text.trim()))
}
