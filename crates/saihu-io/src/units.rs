//! Unit-string parsing.
//!
//! Quantities in network descriptions follow `<number><SI-prefix><base>`:
//! `10ms`, `1.5kB`, `100Mbps`. Pure numbers take the description's declared
//! default unit. Bases: `s`/`m`/`h` for time, `b`/`B` for data,
//! `<data>p<time>` (e.g. `bps`, `Bpm`) for rates.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("cannot parse quantity {0:?}")]
    Malformed(String),
    #[error("unknown unit {0:?}")]
    UnknownUnit(String),
}

const PREFIXES: [(&str, f64); 13] = [
    ("a", 1e-18),
    ("f", 1e-15),
    ("p", 1e-12),
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("", 1.0),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

fn prefix_factor(prefix: &str) -> Option<f64> {
    PREFIXES.iter().find(|(p, _)| *p == prefix).map(|(_, f)| *f)
}

fn time_base(base: &str) -> Option<f64> {
    match base {
        "s" => Some(1.0),
        "m" => Some(60.0),
        "h" => Some(3600.0),
        _ => None,
    }
}

fn data_base(base: &str) -> Option<f64> {
    match base {
        "b" => Some(1.0),
        "B" => Some(8.0),
        _ => None,
    }
}

/// Rate unit `<data>p<time>`: bits (or bytes) per time base.
fn rate_base(base: &str) -> Option<f64> {
    let mut chars = base.chars();
    let data = data_base(&chars.next()?.to_string())?;
    if chars.next()? != 'p' {
        return None;
    }
    let time = time_base(&chars.next()?.to_string())?;
    if chars.next().is_some() {
        return None;
    }
    Some(data / time)
}

/// Split a quantity string into its numeric part and its unit part.
fn split_quantity(text: &str) -> Result<(f64, &str), UnitError> {
    let text = text.trim();
    let split = text
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+' || *c == 'e' || *c == 'E'))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    // a trailing exponent letter with no digits after belongs to the unit
    let (mut number, mut unit) = text.split_at(split);
    if number.ends_with(['e', 'E']) && !unit.is_empty() {
        number = &number[..number.len() - 1];
        unit = &text[number.len()..];
    }
    let value: f64 = number
        .parse()
        .map_err(|_| UnitError::Malformed(text.to_string()))?;
    Ok((value, unit))
}

fn parse_with(
    text: &str,
    base_of: fn(&str) -> Option<f64>,
    default_factor: f64,
) -> Result<f64, UnitError> {
    let (value, unit) = split_quantity(text)?;
    if unit.is_empty() {
        return Ok(value * default_factor);
    }
    // try the whole suffix as a bare base first, then prefix + base
    if let Some(base) = base_of(unit) {
        return Ok(value * base);
    }
    for (prefix, factor) in PREFIXES {
        if prefix.is_empty() {
            continue;
        }
        if let Some(rest) = unit.strip_prefix(prefix) {
            if let Some(base) = base_of(rest) {
                return Ok(value * factor * base);
            }
        }
    }
    Err(UnitError::UnknownUnit(unit.to_string()))
}

/// Declared default units of a description.
#[derive(Debug, Clone)]
pub struct DefaultUnits {
    pub time: f64,
    pub data: f64,
    pub rate: f64,
}

impl Default for DefaultUnits {
    fn default() -> Self {
        Self {
            time: 1.0,
            data: 1.0,
            rate: 1.0,
        }
    }
}

impl DefaultUnits {
    /// Parse the declared defaults themselves (`"ms"`, `"B"`, `"kbps"`).
    pub fn from_strings(
        time: Option<&str>,
        data: Option<&str>,
        rate: Option<&str>,
    ) -> Result<Self, UnitError> {
        let parse_unit = |text: Option<&str>, base_of: fn(&str) -> Option<f64>| -> Result<f64, UnitError> {
            match text {
                None => Ok(1.0),
                Some(text) => parse_with(&format!("1{text}"), base_of, 1.0),
            }
        };
        Ok(Self {
            time: parse_unit(time, time_base)?,
            data: parse_unit(data, data_base)?,
            rate: parse_unit(rate, rate_base)?,
        })
    }
}

/// Parse a duration into seconds.
pub fn parse_time(text: &str, defaults: &DefaultUnits) -> Result<f64, UnitError> {
    parse_with(text, time_base, defaults.time)
}

/// Parse a data amount into bits.
pub fn parse_data(text: &str, defaults: &DefaultUnits) -> Result<f64, UnitError> {
    parse_with(text, data_base, defaults.data)
}

/// Parse a rate into bits per second.
pub fn parse_rate(text: &str, defaults: &DefaultUnits) -> Result<f64, UnitError> {
    parse_with(text, rate_base, defaults.rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d() -> DefaultUnits {
        DefaultUnits::default()
    }

    #[test]
    fn test_time_parsing() {
        assert_eq!(parse_time("10ms", &d()).unwrap(), 0.01);
        assert_eq!(parse_time("2s", &d()).unwrap(), 2.0);
        assert_eq!(parse_time("1m", &d()).unwrap(), 60.0);
        assert_eq!(parse_time("1h", &d()).unwrap(), 3600.0);
        assert_eq!(parse_time("5us", &d()).unwrap(), 5e-6);
    }

    #[test]
    fn test_data_parsing() {
        assert_eq!(parse_data("64B", &d()).unwrap(), 512.0);
        assert_eq!(parse_data("1kb", &d()).unwrap(), 1000.0);
        assert_eq!(parse_data("1500", &d()).unwrap(), 1500.0);
    }

    #[test]
    fn test_rate_parsing() {
        assert_eq!(parse_rate("100Mbps", &d()).unwrap(), 1e8);
        assert_eq!(parse_rate("1Bps", &d()).unwrap(), 8.0);
        assert_eq!(parse_rate("60bpm", &d()).unwrap(), 1.0);
    }

    #[test]
    fn test_defaults_apply_to_bare_numbers() {
        let defaults = DefaultUnits::from_strings(Some("ms"), Some("B"), Some("kbps")).unwrap();
        assert_eq!(parse_time("10", &defaults).unwrap(), 0.01);
        assert_eq!(parse_data("2", &defaults).unwrap(), 16.0);
        assert_eq!(parse_rate("3", &defaults).unwrap(), 3000.0);
    }

    #[test]
    fn test_scientific_notation() {
        assert_eq!(parse_time("1e-3", &d()).unwrap(), 1e-3);
        assert_eq!(parse_time("1e-3s", &d()).unwrap(), 1e-3);
        assert_eq!(parse_rate("2.5e6bps", &d()).unwrap(), 2.5e6);
    }

    #[test]
    fn test_rejects_unknown_unit() {
        assert!(matches!(
            parse_time("10parsec", &d()),
            Err(UnitError::UnknownUnit(_))
        ));
        assert!(matches!(
            parse_time("abc", &d()),
            Err(UnitError::Malformed(_))
        ));
    }
}
