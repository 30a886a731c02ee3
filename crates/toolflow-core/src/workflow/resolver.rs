//! `${...}` reference substitution for node params.
//!
//! A reference is `${root.path.to.field}`. `root` is either `params` (the
//! run's initial parameters) or the id of a completed node; the remaining
//! dotted segments walk into objects by key and into arrays by index.
//!
//! A string that is exactly one reference resolves to the referenced value
//! with its type intact. References embedded in a longer string are
//! interpolated: strings verbatim, everything else as compact JSON.
//! Object keys are never substituted, and an unterminated `${` is literal.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

/// Failure to resolve a single reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("unresolved reference '${{{reference}}}': no value named '{root}'")]
    MissingRoot { reference: String, root: String },

    #[error("unresolved reference '${{{reference}}}': no field '{segment}'")]
    MissingField { reference: String, segment: String },

    #[error("unresolved reference '${{{reference}}}': cannot index {kind} with '{segment}'")]
    NotIndexable {
        reference: String,
        segment: String,
        kind: &'static str,
    },
}

/// Resolve every reference in a node's params against `variables`.
///
/// Pure: `variables` is only read, so resolving the same params twice
/// against an unchanged mapping yields identical output.
pub fn resolve_params(
    params: &Map<String, Value>,
    variables: &HashMap<String, Value>,
) -> Result<Map<String, Value>, ResolutionError> {
    params
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, variables)?)))
        .collect()
}

/// Resolve references inside an arbitrary JSON value.
pub fn resolve_value(
    value: &Value,
    variables: &HashMap<String, Value>,
) -> Result<Value, ResolutionError> {
    match value {
        Value::String(s) => resolve_string(s, variables),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, variables))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_params(map, variables).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Root names of every reference in `params`, deduplicated, in order of
/// first appearance.
pub fn references(params: &Map<String, Value>) -> Vec<String> {
    let mut roots = Vec::new();
    for value in params.values() {
        collect_roots(value, &mut roots);
    }
    roots
}

fn collect_roots(value: &Value, roots: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for expr in reference_exprs(s) {
                let root = expr.split('.').next().unwrap_or_default();
                if !roots.iter().any(|r| r == root) {
                    roots.push(root.to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_roots(item, roots)),
        Value::Object(map) => map.values().for_each(|item| collect_roots(item, roots)),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// String scanning
// ---------------------------------------------------------------------------

/// The inner expression if `s` is exactly one `${...}` reference.
fn whole_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    (!inner.contains('}')).then_some(inner)
}

/// Every terminated `${...}` expression in `s`, left to right.
fn reference_exprs(s: &str) -> Vec<&str> {
    let mut exprs = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        exprs.push(&after[..end]);
        rest = &after[end + 1..];
    }
    exprs
}

fn resolve_string(s: &str, variables: &HashMap<String, Value>) -> Result<Value, ResolutionError> {
    if let Some(expr) = whole_reference(s) {
        return lookup(expr, variables).cloned();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        match lookup(&after[..end], variables)? {
            Value::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn lookup<'a>(
    expr: &str,
    variables: &'a HashMap<String, Value>,
) -> Result<&'a Value, ResolutionError> {
    let mut segments = expr.split('.');
    let root = segments.next().unwrap_or_default();
    let mut current = variables
        .get(root)
        .ok_or_else(|| ResolutionError::MissingRoot {
            reference: expr.to_string(),
            root: root.to_string(),
        })?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            scalar => {
                return Err(ResolutionError::NotIndexable {
                    reference: expr.to_string(),
                    segment: segment.to_string(),
                    kind: kind_of(scalar),
                });
            }
        }
        .ok_or_else(|| ResolutionError::MissingField {
            reference: expr.to_string(),
            segment: segment.to_string(),
        })?;
    }
    Ok(current)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
