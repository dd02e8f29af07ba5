//! Single-pass `${...}` variable substitution over a task's parameter tree.
//!
//! Two reference forms are recognized inside string leaves:
//!   `${variables.NAME}`            — a workflow-level variable
//!   `${tasks.NAME.output.PATH}`    — a dotted path into a completed task's output
//!
//! A leaf containing only a single reference and no other text resolves to the
//! referenced JSON value directly (preserving its type); a leaf that mixes a
//! reference with surrounding text is resolved by string interpolation.

use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unresolved reference: {0}")]
    Unresolved(String),
}

pub struct ResolverContext<'a> {
    pub variables: &'a BTreeMap<String, Value>,
    pub task_outputs: &'a BTreeMap<String, Value>,
}

/// Resolve every `${...}` reference in `parameters`, returning the fully
/// substituted tree or the first unresolved reference encountered.
pub fn resolve(parameters: &Value, ctx: &ResolverContext<'_>) -> Result<Value, ResolveError> {
    match parameters {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve(item, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(input: &str, ctx: &ResolverContext<'_>) -> Result<Value, ResolveError> {
    if let Some(path) = whole_reference(input) {
        return lookup(path, ctx).map_err(|_| ResolveError::Unresolved(input.to_string()));
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            out.push_str(rest);
            rest = "";
            break;
        };
        out.push_str(&rest[..start]);
        let path = &rest[start + 2..start + end];
        let value = lookup(path, ctx).map_err(|_| ResolveError::Unresolved(input.to_string()))?;
        out.push_str(&scalar_to_string(&value));
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// If `input` is exactly one `${...}` reference with no other characters,
/// return the inner path.
fn whole_reference(input: &str) -> Option<&str> {
    let trimmed = input.strip_prefix("${")?.strip_suffix('}')?;
    if trimmed.contains("${") {
        return None;
    }
    Some(trimmed)
}

fn lookup(path: &str, ctx: &ResolverContext<'_>) -> Result<Value, ()> {
    let mut segments = path.split('.');
    match segments.next() {
        Some("variables") => {
            let name = segments.next().ok_or(())?;
            if segments.next().is_some() {
                return Err(());
            }
            ctx.variables.get(name).cloned().ok_or(())
        }
        Some("tasks") => {
            let task_name = segments.next().ok_or(())?;
            if segments.next() != Some("output") {
                return Err(());
            }
            let root = ctx.task_outputs.get(task_name).ok_or(())?;
            let remainder: Vec<&str> = segments.collect();
            if remainder.is_empty() {
                Ok(root.clone())
            } else {
                dig(root, &remainder).cloned().ok_or(())
            }
        }
        _ => Err(()),
    }
}

fn dig<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(
        variables: &BTreeMap<String, Value>,
        task_outputs: &BTreeMap<String, Value>,
    ) -> ResolverContext<'_> {
        ResolverContext {
            variables,
            task_outputs,
        }
    }

    #[test]
    fn resolves_whole_variable_reference_preserving_type() {
        let mut variables = BTreeMap::new();
        variables.insert("count".to_string(), json!(42));
        let outputs = BTreeMap::new();
        let resolved = resolve(&json!("${variables.count}"), &ctx(&variables, &outputs)).unwrap();
        assert_eq!(resolved, json!(42));
    }

    #[test]
    fn resolves_nested_task_output_path() {
        let variables = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        outputs.insert("fetch".to_string(), json!({ "body": { "title": "hello" } }));
        let resolved = resolve(
            &json!("${tasks.fetch.output.body.title}"),
            &ctx(&variables, &outputs),
        )
        .unwrap();
        assert_eq!(resolved, json!("hello"));
    }

    #[test]
    fn interpolates_mixed_text() {
        let mut variables = BTreeMap::new();
        variables.insert("name".to_string(), json!("world"));
        let outputs = BTreeMap::new();
        let resolved = resolve(&json!("hello ${variables.name}!"), &ctx(&variables, &outputs))
            .unwrap();
        assert_eq!(resolved, json!("hello world!"));
    }

    #[test]
    fn reports_first_unresolved_reference() {
        let variables = BTreeMap::new();
        let outputs = BTreeMap::new();
        let err = resolve(&json!("${variables.missing}"), &ctx(&variables, &outputs)).unwrap_err();
        assert!(matches!(err, ResolveError::Unresolved(_)));
    }

    #[test]
    fn recurses_into_objects_and_arrays() {
        let mut variables = BTreeMap::new();
        variables.insert("x".to_string(), json!(1));
        let outputs = BTreeMap::new();
        let input = json!({ "a": ["${variables.x}", "plain"], "b": 2 });
        let resolved = resolve(&input, &ctx(&variables, &outputs)).unwrap();
        assert_eq!(resolved, json!({ "a": [1, "plain"], "b": 2 }));
    }
}
