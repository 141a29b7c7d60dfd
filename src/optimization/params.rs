// src/optimization/params.rs
//! Simulation parameter values and external-input mapping
//!
//! [`ParamValue`] is the typed form of one task parameter as it appears in
//! YAML and on the rendered command line. The input map resolves the
//! optimization config's parameter sources (literals, external argument
//! names, or mixed lists of both) against the argument set supplied by the
//! outer search algorithm.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One task parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<f64>),
}

impl ParamValue {
    /// Render the value as it appears on the simulation command line:
    /// booleans as `0`/`1`, lists as a bracket-free comma-joined sequence.
    pub fn render(&self) -> String {
        match self {
            ParamValue::Bool(true) => "1".to_string(),
            ParamValue::Bool(false) => "0".to_string(),
            ParamValue::Number(value) => format_number(*value),
            ParamValue::Text(text) => text.clone(),
            ParamValue::List(values) => values
                .iter()
                .map(|v| format_number(*v))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Numeric view, used for timeout extraction
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Integral values print without a fractional part
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Where one parameter's value comes from: a named external argument, a
/// fixed literal, or a list mixing both
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InputSource {
    Name(String),
    Literal(f64),
    Mixed(Vec<InputEntry>),
}

/// One element of a list-valued input source
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InputEntry {
    Name(String),
    Literal(f64),
}

/// Build the per-run parameter overrides from the input map and the
/// external argument set.
///
/// A named source missing from `args` is a configuration error: the outer
/// search algorithm promised that argument.
pub fn resolve_input_map(
    input_map: &BTreeMap<String, InputSource>,
    args: &BTreeMap<String, f64>,
) -> Result<BTreeMap<String, ParamValue>> {
    let lookup = |name: &str| -> Result<f64> {
        args.get(name).copied().ok_or_else(|| {
            EngineError::Configuration(format!("input argument <{name}> was not supplied"))
        })
    };

    let mut params = BTreeMap::new();
    for (tag, source) in input_map {
        let value = match source {
            InputSource::Name(name) => ParamValue::Number(lookup(name)?),
            InputSource::Literal(value) => ParamValue::Number(*value),
            InputSource::Mixed(entries) => {
                let mut values = Vec::with_capacity(entries.len());
                for entry in entries {
                    values.push(match entry {
                        InputEntry::Name(name) => lookup(name)?,
                        InputEntry::Literal(value) => *value,
                    });
                }
                ParamValue::List(values)
            }
        };
        params.insert(tag.clone(), value);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_bool() {
        assert_eq!(ParamValue::Bool(true).render(), "1");
        assert_eq!(ParamValue::Bool(false).render(), "0");
    }

    #[test]
    fn test_render_numbers() {
        assert_eq!(ParamValue::Number(120.0).render(), "120");
        assert_eq!(ParamValue::Number(0.25).render(), "0.25");
        assert_eq!(ParamValue::Number(-3.0).render(), "-3");
    }

    #[test]
    fn test_render_list_without_brackets() {
        let value = ParamValue::List(vec![1.0, 2.5, 3.0]);
        assert_eq!(value.render(), "1,2.5,3");
    }

    #[test]
    fn test_render_text_verbatim() {
        assert_eq!(ParamValue::Text("ocean_waves".into()).render(), "ocean_waves");
    }

    #[test]
    fn test_yaml_parsing() {
        assert_eq!(
            serde_yaml::from_str::<ParamValue>("true").unwrap(),
            ParamValue::Bool(true)
        );
        assert_eq!(
            serde_yaml::from_str::<ParamValue>("2.5").unwrap(),
            ParamValue::Number(2.5)
        );
        assert_eq!(
            serde_yaml::from_str::<ParamValue>("[1, 2]").unwrap(),
            ParamValue::List(vec![1.0, 2.0])
        );
        assert_eq!(
            serde_yaml::from_str::<ParamValue>("world").unwrap(),
            ParamValue::Text("world".into())
        );
    }

    #[test]
    fn test_resolve_named_and_literal() {
        let input_map: BTreeMap<String, InputSource> = serde_yaml::from_str(
            "gain_p: x0\nsaturation: 1200.0\ngains: [x0, x1, 0.5]\n",
        )
        .unwrap();
        let args = BTreeMap::from([("x0".to_string(), 4.0), ("x1".to_string(), 7.0)]);

        let params = resolve_input_map(&input_map, &args).unwrap();
        assert_eq!(params["gain_p"], ParamValue::Number(4.0));
        assert_eq!(params["saturation"], ParamValue::Number(1200.0));
        assert_eq!(params["gains"], ParamValue::List(vec![4.0, 7.0, 0.5]));
    }

    #[test]
    fn test_resolve_missing_argument() {
        let input_map: BTreeMap<String, InputSource> =
            serde_yaml::from_str("gain_p: x0\n").unwrap();
        let err = resolve_input_map(&input_map, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
