//! Named transform functions.
//!
//! The registry maps function names (the `function` / `foo` key of a
//! transform spec) to implementations. A default set covers the common
//! string and datetime munging; callers register their own on top.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::EngineError;

/// Signature of a registered function: positional input values plus the
/// spec's params, producing positional output values.
pub type TransformFn =
    dyn Fn(&[Value], &BTreeMap<String, Value>) -> Result<Vec<Value>, EngineError> + Send + Sync;

#[derive(Clone)]
pub struct TransformRegistry {
    funcs: BTreeMap<String, Arc<TransformFn>>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TransformRegistry {
    pub fn empty() -> Self {
        TransformRegistry {
            funcs: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::empty();
        r.register("split_keep_part", split_keep_part);
        r.register("lowercase", |inputs, _| map_strings(inputs, |s| s.to_lowercase()));
        r.register("uppercase", |inputs, _| map_strings(inputs, |s| s.to_uppercase()));
        r.register("trim", |inputs, _| map_strings(inputs, |s| s.trim().to_string()));
        r.register("concat", concat);
        r.register("parse_datetime", parse_datetime);
        r
    }

    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value], &BTreeMap<String, Value>) -> Result<Vec<Value>, EngineError>
            + Send
            + Sync
            + 'static,
    {
        self.funcs.insert(name.to_string(), Arc::new(func));
    }

    pub fn get(&self, name: &str) -> Result<Arc<TransformFn>, EngineError> {
        self.funcs
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTransform(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }
}

// ============================================================================
// Builtins
// ============================================================================

fn as_str(v: &Value) -> Result<&str, EngineError> {
    v.as_str()
        .ok_or_else(|| EngineError::TransformInput(format!("expected a string, got: {v}")))
}

fn map_strings(
    inputs: &[Value],
    f: impl Fn(&str) -> String,
) -> Result<Vec<Value>, EngineError> {
    inputs
        .iter()
        .map(|v| Ok(Value::String(f(as_str(v)?))))
        .collect()
}

/// Split the input on `sep` and keep selected parts. `keep` is a single
/// (possibly negative) index, or a list of indexes rejoined with `sep`.
fn split_keep_part(
    inputs: &[Value],
    params: &BTreeMap<String, Value>,
) -> Result<Vec<Value>, EngineError> {
    let [input] = inputs else {
        return Err(EngineError::TransformInput(format!(
            "split_keep_part takes one input, got {}",
            inputs.len()
        )));
    };
    let text = as_str(input)?;
    let sep = params
        .get("sep")
        .and_then(Value::as_str)
        .unwrap_or("/");
    let parts: Vec<&str> = text.split(sep).collect();

    let pick = |idx: i64| -> Result<&str, EngineError> {
        let n = parts.len() as i64;
        let resolved = if idx < 0 { n + idx } else { idx };
        if resolved < 0 || resolved >= n {
            return Err(EngineError::TransformInput(format!(
                "split_keep_part: index {idx} out of range for '{text}'"
            )));
        }
        Ok(parts[resolved as usize])
    };

    let kept = match params.get("keep") {
        None | Some(Value::Null) => parts
            .last()
            .copied()
            .unwrap_or_default()
            .to_string(),
        Some(Value::Number(n)) => {
            let idx = n.as_i64().ok_or_else(|| {
                EngineError::TransformInput(format!("split_keep_part: bad keep index {n}"))
            })?;
            pick(idx)?.to_string()
        }
        Some(Value::Array(indexes)) => {
            let mut selected = Vec::with_capacity(indexes.len());
            for v in indexes {
                let idx = v.as_i64().ok_or_else(|| {
                    EngineError::TransformInput(format!("split_keep_part: bad keep index {v}"))
                })?;
                selected.push(pick(idx)?);
            }
            selected.join(sep)
        }
        Some(other) => {
            return Err(EngineError::TransformInput(format!(
                "split_keep_part: keep must be an index or a list, got: {other}"
            )))
        }
    };
    Ok(vec![Value::String(kept)])
}

/// Join all inputs into one string, with an optional `sep` param.
fn concat(inputs: &[Value], params: &BTreeMap<String, Value>) -> Result<Vec<Value>, EngineError> {
    let sep = params.get("sep").and_then(Value::as_str).unwrap_or("");
    let parts = inputs
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(EngineError::TransformInput(format!(
                "concat: expected string or number, got: {other}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(vec![Value::String(parts.join(sep))])
}

/// Parse a datetime with the `format` param (chrono strftime syntax) and
/// re-emit it in ISO form. Date-only formats are accepted.
fn parse_datetime(
    inputs: &[Value],
    params: &BTreeMap<String, Value>,
) -> Result<Vec<Value>, EngineError> {
    let [input] = inputs else {
        return Err(EngineError::TransformInput(format!(
            "parse_datetime takes one input, got {}",
            inputs.len()
        )));
    };
    let text = as_str(input)?;
    let format = params
        .get("format")
        .and_then(Value::as_str)
        .unwrap_or("%Y-%m-%dT%H:%M:%S");

    let parsed = NaiveDateTime::parse_from_str(text, format)
        .or_else(|_| {
            NaiveDate::parse_from_str(text, format).map(|d| {
                d.and_hms_opt(0, 0, 0)
                    .unwrap_or_else(|| NaiveDateTime::default())
            })
        })
        .map_err(|e| {
            EngineError::TransformInput(format!("parse_datetime: '{text}' ({e})"))
        })?;
    Ok(vec![Value::String(
        parsed.format("%Y-%m-%dT%H:%M:%S").to_string(),
    )])
}
