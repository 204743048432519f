//! Typed config values.
//!
//! Cluster services carry raw string values keyed by parameter name. Every
//! consumer (validator, variable compiler) goes through [`ParamValue::parse`]
//! with the declared [`ParamType`] and list flag of the parameter.

use crate::service::{ParamType, ServiceConfig};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i32),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<ParamValue>),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseValueError {
    #[error("{value:?} is not a valid {expected}")]
    Scalar { value: String, expected: ParamType },

    #[error("{value:?} is not a JSON array of {expected}")]
    List { value: String, expected: ParamType },
}

impl ParamValue {
    /// Parse a raw value according to its declared type.
    pub fn parse(raw: &str, ty: ParamType, is_list: bool) -> Result<Self, ParseValueError> {
        if is_list {
            Self::parse_list(raw, ty)
        } else {
            Self::parse_scalar(raw, ty).ok_or_else(|| ParseValueError::Scalar {
                value: raw.to_string(),
                expected: ty,
            })
        }
    }

    /// Parse a raw value against a parameter schema entry.
    pub fn parse_for(raw: &str, config: &ServiceConfig) -> Result<Self, ParseValueError> {
        Self::parse(raw, config.param_type, config.is_list)
    }

    fn parse_scalar(raw: &str, ty: ParamType) -> Option<Self> {
        match ty {
            ParamType::Int => raw.parse::<i32>().ok().map(ParamValue::Int),
            ParamType::Float => raw.parse::<f64>().ok().map(ParamValue::Float),
            ParamType::Bool => parse_bool(raw).map(ParamValue::Bool),
            ParamType::String => Some(ParamValue::Str(raw.to_string())),
        }
    }

    fn parse_list(raw: &str, ty: ParamType) -> Result<Self, ParseValueError> {
        let err = || ParseValueError::List {
            value: raw.to_string(),
            expected: ty,
        };
        let items: Vec<Value> = serde_json::from_str(raw).map_err(|_| err())?;
        items
            .iter()
            .map(|item| element(item, ty).ok_or_else(err))
            .collect::<Result<Vec<_>, _>>()
            .map(ParamValue::List)
    }

    /// JSON form handed to the automation executor.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Int(i) => Value::from(*i),
            ParamValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Str(s) => Value::String(s.clone()),
            ParamValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

fn element(item: &Value, ty: ParamType) -> Option<ParamValue> {
    match ty {
        ParamType::Int => item
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(ParamValue::Int),
        ParamType::Float => item.as_f64().map(ParamValue::Float),
        ParamType::Bool => item.as_bool().map(ParamValue::Bool),
        ParamType::String => item.as_str().map(|s| ParamValue::Str(s.to_string())),
    }
}

/// Accepts the same spellings as the automation tooling's boolean parser.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
