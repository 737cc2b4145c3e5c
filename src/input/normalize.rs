//! Parameter Normalization
//!
//! Canonicalizes raw detector and sampler values into deterministic,
//! validated lists. Raw values come either from the configuration file
//! (any YAML shape) or from the command line (a list of tokens).

use std::collections::HashSet;

use log::debug;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipeError, Result};

/// A raw, unvalidated parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RawParameter {
    /// A single string, possibly holding several space-separated tokens
    Text(String),
    /// A list of strings
    List(Vec<String>),
    /// Any other shape; kept so normalization can report it
    Unsupported(String),
}

impl<'de> Deserialize<'de> for RawParameter {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val = Value::deserialize(deserializer)?;
        Ok(match val {
            Value::String(s) => RawParameter::Text(s),
            Value::Array(arr) => {
                let mut items = Vec::with_capacity(arr.len());
                for v in arr {
                    match v {
                        Value::String(s) => items.push(s),
                        other => return Ok(RawParameter::Unsupported(format!("[.., {}, ..]", other))),
                    }
                }
                RawParameter::List(items)
            }
            other => RawParameter::Unsupported(other.to_string()),
        })
    }
}

impl From<&str> for RawParameter {
    fn from(s: &str) -> Self {
        RawParameter::Text(s.to_string())
    }
}

impl From<Vec<String>> for RawParameter {
    fn from(items: Vec<String>) -> Self {
        RawParameter::List(items)
    }
}

impl From<Vec<&str>> for RawParameter {
    fn from(items: Vec<&str>) -> Self {
        RawParameter::List(items.into_iter().map(String::from).collect())
    }
}

/// Splits "H1 L1" into ["H1", "L1"], dropping empty tokens.
fn split_by_space(s: &str) -> Vec<String> {
    s.split(' ')
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Expands a raw value into tokens.
///
/// A single-element list is treated like the bare string it contains.
fn tokens(field: &str, raw: &RawParameter) -> Result<Vec<String>> {
    match raw {
        RawParameter::Text(s) => Ok(split_by_space(s)),
        RawParameter::List(items) if items.len() == 1 => Ok(split_by_space(&items[0])),
        RawParameter::List(items) => Ok(items.clone()),
        RawParameter::Unsupported(shape) => Err(PipeError::invalid(
            field,
            format!("{} not understood; expected a string or a list of strings", shape),
        )),
    }
}

/// Normalizes a detector specification.
///
/// Tokens are uppercased, sorted and deduplicated. Every token must be in
/// `known`.
///
/// # Example
///
/// ```
/// use pipegen::input::normalize::{normalize_instruments, RawParameter};
///
/// let known = vec!["H1".to_string(), "L1".to_string(), "V1".to_string()];
/// let detectors = normalize_instruments(&RawParameter::from("l1 H1"), &known).unwrap();
/// assert_eq!(detectors, vec!["H1", "L1"]);
/// ```
pub fn normalize_instruments(raw: &RawParameter, known: &[String]) -> Result<Vec<String>> {
    let mut detectors: Vec<String> = tokens("detectors", raw)?
        .into_iter()
        .map(|d| d.to_uppercase())
        .collect();
    detectors.sort();
    detectors.dedup();

    for element in &detectors {
        if !known.iter().any(|k| k == element) {
            return Err(PipeError::invalid(
                "detectors",
                format!(
                    "\"{}\" is not in the known detectors list {:?}",
                    element, known
                ),
            ));
        }
    }

    if detectors.is_empty() {
        return Err(PipeError::EmptySet {
            field: "detectors".to_string(),
        });
    }

    debug!("Normalized detectors: {:?}", detectors);
    Ok(detectors)
}

/// Normalizes a sampler specification.
///
/// Insertion order is kept; repeated samplers keep their first position.
pub fn normalize_samplers(raw: &RawParameter) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut samplers = Vec::new();

    for token in tokens("sampler", raw)? {
        let valid = token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PipeError::invalid(
                "sampler",
                format!("\"{}\" contains characters not allowed in a sampler name", token),
            ));
        }
        if seen.insert(token.clone()) {
            samplers.push(token);
        }
    }

    if samplers.is_empty() {
        return Err(PipeError::EmptySet {
            field: "sampler".to_string(),
        });
    }

    debug!("Normalized samplers: {:?}", samplers);
    Ok(samplers)
}
