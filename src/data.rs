use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use thiserror::Error;

/// Cell spellings that mean "no value". Both load paths store them as NULL and
/// type inference ignores them.
pub const NULL_SENTINELS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

pub fn is_null_sentinel(value: &str) -> bool {
    NULL_SENTINELS.contains(&value.trim())
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

pub fn looks_like_datetime(value: &str) -> bool {
    parse_naive_datetime(value).is_ok() || parse_naive_date(value).is_ok()
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Storage class a target column prefers, derived from its declared type the
/// way SQLite derives column affinity, with booleans split out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Real,
    Boolean,
    Numeric,
    Text,
}

impl Affinity {
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("BOOL") {
            Affinity::Boolean
        } else if upper.contains("INT") {
            Affinity::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Affinity::Text
        } else if upper.is_empty() || upper.contains("BLOB") {
            Affinity::Text
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Affinity::Integer => "integer",
            Affinity::Real => "real",
            Affinity::Boolean => "boolean",
            Affinity::Numeric => "numeric",
            Affinity::Text => "text",
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot store '{value}' as {affinity}")]
pub struct ConversionError {
    pub value: String,
    pub affinity: Affinity,
}

/// Converts a raw cell into the value the bulk path binds for a column of the
/// given affinity. Infinities have no storage representation and become NULL.
pub fn typed_value(raw: &str, affinity: Affinity) -> Result<Value, ConversionError> {
    if is_null_sentinel(raw) {
        return Ok(Value::Null);
    }
    let trimmed = raw.trim();
    let failed = || ConversionError {
        value: raw.to_string(),
        affinity,
    };
    let value = match affinity {
        Affinity::Text => Value::Text(raw.to_string()),
        Affinity::Integer => match trimmed.parse::<i64>() {
            Ok(parsed) => Value::Integer(parsed),
            Err(_) => match trimmed.parse::<f64>() {
                Ok(parsed) if parsed.fract() == 0.0 && fits_i64(parsed) => {
                    Value::Integer(parsed as i64)
                }
                _ => return Err(failed()),
            },
        },
        Affinity::Real => match trimmed.parse::<f64>() {
            Ok(parsed) => finite_real(parsed),
            Err(_) => return Err(failed()),
        },
        Affinity::Boolean => match parse_boolean(trimmed) {
            Some(flag) => Value::Integer(i64::from(flag)),
            None => match trimmed.parse::<i64>() {
                Ok(parsed @ (0 | 1)) => Value::Integer(parsed),
                _ => return Err(failed()),
            },
        },
        Affinity::Numeric => {
            if let Ok(parsed) = trimmed.parse::<i64>() {
                Value::Integer(parsed)
            } else if let Ok(parsed) = trimmed.parse::<f64>() {
                finite_real(parsed)
            } else {
                Value::Text(raw.to_string())
            }
        }
    };
    Ok(value)
}

/// The fallback path binds text as-is. Null sentinels become NULL, and so do
/// infinities headed for a floating or numeric column.
pub fn raw_value(raw: &str, affinity: Affinity) -> Value {
    if is_null_sentinel(raw) {
        return Value::Null;
    }
    let floating = matches!(affinity, Affinity::Real | Affinity::Numeric);
    if floating
        && raw
            .trim()
            .parse::<f64>()
            .is_ok_and(|parsed| parsed.is_infinite())
    {
        return Value::Null;
    }
    Value::Text(raw.to_string())
}

/// `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
fn fits_i64(parsed: f64) -> bool {
    parsed >= i64::MIN as f64 && parsed < i64::MAX as f64
}

fn finite_real(parsed: f64) -> Value {
    if parsed.is_finite() {
        Value::Real(parsed)
    } else {
        Value::Null
    }
}
