//! Copy-by-value marshalling between page values and JSON.
//!
//! Mirrors what a remote evaluation with `returnByValue` does: functions and
//! `undefined` properties are dropped from objects, non-finite numbers become
//! `null`, and nesting deeper than [`MAX_DEPTH`] is cut off with `null`.

use serde_json::{Map, Number};

use super::{Array, Object, Value};

/// Nesting limit when serializing. Page object graphs can be cyclic.
pub const MAX_DEPTH: usize = 64;

impl Value {
    /// Serialize to JSON. `undefined` at the top level becomes `None`, which
    /// the transport reports as "no value".
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Undefined => None,
            other => Some(to_json_at(other, 0)),
        }
    }

    /// Build a page value from JSON.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect::<Array>())
            }
            serde_json::Value::Object(map) => Value::Object(Object::from_props(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))),
            )),
        }
    }
}

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Whole numbers serialize as JSON integers, as they do in a JSON text.
fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::from(n as i64);
    }
    Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn to_json_at(value: &Value, depth: usize) -> serde_json::Value {
    if depth > MAX_DEPTH {
        return serde_json::Value::Null;
    }
    match value {
        Value::Undefined | Value::Null | Value::Function(_) => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Array(a) => serde_json::Value::Array(
            a.to_vec().iter().map(|v| to_json_at(v, depth + 1)).collect(),
        ),
        Value::Object(o) => {
            let mut map = Map::new();
            for (key, v) in o.entries() {
                if matches!(v, Value::Undefined | Value::Function(_)) {
                    continue;
                }
                map.insert(key, to_json_at(&v, depth + 1));
            }
            serde_json::Value::Object(map)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::runtime::Function;

    #[test]
    fn test_undefined_has_no_json_value() {
        assert!(Value::Undefined.to_json().is_none());
        assert_eq!(Value::Null.to_json(), Some(json!(null)));
    }

    #[test]
    fn test_functions_and_undefined_dropped_from_objects() {
        let obj = Object::from_props([
            ("a", Value::from(1.0)),
            ("b", Value::Undefined),
            ("c", Value::from(Function::new("c", |_, _| Ok(Value::Null)))),
        ]);
        assert_eq!(Value::from(obj).to_json(), Some(json!({"a": 1})));
    }

    #[test]
    fn test_whole_numbers_become_integers() {
        assert_eq!(Value::from(3.0).to_json(), Some(json!(3)));
        assert_eq!(Value::from(-2.0).to_json(), Some(json!(-2)));
        assert_eq!(Value::from(0.25).to_json(), Some(json!(0.25)));
        assert_eq!(Value::from(f64::NAN).to_json(), Some(json!(null)));
    }

    #[test]
    fn test_non_finite_numbers_become_null() {
        assert_eq!(Value::from(f64::INFINITY).to_json(), Some(json!(null)));
    }

    #[test]
    fn test_cyclic_graph_is_cut_off() {
        let obj = Object::new();
        obj.set("self", obj.clone());
        // Must terminate.
        let json = Value::from(obj.clone()).to_json().unwrap();
        assert!(json.get("self").is_some());
        obj.remove("self");
    }

    #[test]
    fn test_from_json_builds_objects_and_arrays() {
        let value = Value::from_json(&json!({"name": "stage", "children": [1, 2]}));
        assert_eq!(value.get("name").as_str(), Some("stage"));
        assert_eq!(value.get("children").get("length").as_f64(), Some(2.0));
    }
}
