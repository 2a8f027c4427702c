//! Raw attribute trees as observed from the external system.
//!
//! The tree is a plain `serde_json::Value`; every traversal matches on the
//! variant explicitly. `Null` and a missing key both mean "not observed".

use serde_json::Value;

use crate::path::{ConcretePath, Step};

/// A mapping from attribute name to value: the argument map sent to, and the
/// state map received from, the external system.
pub type Attributes = serde_json::Map<String, Value>;

pub fn is_unset(v: Option<&Value>) -> bool {
    matches!(v, None | Some(Value::Null))
}

/// Empty string, empty list or empty map.
pub fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Null => true,
        Value::Bool(_) | Value::Number(_) => false,
    }
}

pub fn shape_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Text form of a scalar: strings verbatim, numbers and bools via JSON.
pub fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn get_concrete<'a>(root: &'a Value, path: &ConcretePath) -> Option<&'a Value> {
    let mut cur = root;
    for step in path.steps() {
        cur = match (step, cur) {
            (Step::Key(k), Value::Object(map)) => map.get(k)?,
            (Step::Index(i), Value::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Write `value` at `path`, creating intermediate maps for key steps.
/// List elements are never created; returns false when a step cannot be
/// followed.
pub fn set_concrete(root: &mut Value, path: &ConcretePath, value: Value) -> bool {
    let steps = path.steps();
    let Some((last, parents)) = steps.split_last() else {
        *root = value;
        return true;
    };
    let mut cur = root;
    for step in parents {
        cur = match step {
            Step::Key(k) => {
                if cur.is_null() {
                    *cur = Value::Object(Attributes::new());
                }
                match cur {
                    Value::Object(map) => map.entry(k.clone()).or_insert(Value::Null),
                    _ => return false,
                }
            }
            Step::Index(i) => match cur {
                Value::Array(arr) => match arr.get_mut(*i) {
                    Some(v) => v,
                    None => return false,
                },
                _ => return false,
            },
        };
    }
    match last {
        Step::Key(k) => {
            if cur.is_null() {
                *cur = Value::Object(Attributes::new());
            }
            match cur {
                Value::Object(map) => {
                    map.insert(k.clone(), value);
                    true
                }
                _ => false,
            }
        }
        Step::Index(i) => match cur {
            Value::Array(arr) => match arr.get_mut(*i) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            _ => false,
        },
    }
}

pub fn remove_concrete(root: &mut Value, path: &ConcretePath) -> Option<Value> {
    let (last, parents) = path.steps().split_last()?;
    let mut cur = root;
    for step in parents {
        cur = match (step, cur) {
            (Step::Key(k), Value::Object(map)) => map.get_mut(k)?,
            (Step::Index(i), Value::Array(arr)) => arr.get_mut(*i)?,
            _ => return None,
        };
    }
    match (last, cur) {
        (Step::Key(k), Value::Object(map)) => map.remove(k),
        // Keep list positions stable for the remaining elements.
        (Step::Index(i), Value::Array(arr)) => arr.get_mut(*i).map(std::mem::take),
        _ => None,
    }
}

/// Follow a minimal json-path-like grammar: dot fields and a single `[index]`
/// per segment, e.g. `status.atProvider.endpoints[0]`.
pub fn lookup_json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix('.').unwrap_or(path);
    let mut cur = root;
    for seg in path.split('.') {
        if seg.is_empty() {
            return None;
        }
        let (key, idx_opt) = match seg.find('[') {
            Some(brk) => {
                let end = seg.get(brk + 1..)?.find(']')? + brk + 1;
                let idx: usize = seg.get(brk + 1..end)?.parse().ok()?;
                (seg.get(..brk)?, Some(idx))
            }
            None => (seg, None),
        };
        cur = match cur {
            Value::Object(map) => map.get(key)?,
            _ => return None,
        };
        if let Some(i) = idx_opt {
            cur = match cur {
                Value::Array(arr) => arr.get(i)?,
                _ => return None,
            };
        }
    }
    Some(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concrete_get_set_remove() {
        let mut v = json!({ "rule": [ { "user": "a" }, { "user": "b" } ] });
        let p = ConcretePath::root().key("rule").index(1).key("user");
        assert_eq!(get_concrete(&v, &p), Some(&json!("b")));

        assert!(set_concrete(&mut v, &p, json!("c")));
        assert_eq!(v["rule"][1]["user"], json!("c"));

        let nested = ConcretePath::root().key("a").key("b");
        let mut empty = json!({});
        assert!(set_concrete(&mut empty, &nested, json!(1)));
        assert_eq!(empty, json!({ "a": { "b": 1 } }));

        let out_of_range = ConcretePath::root().key("rule").index(5).key("user");
        assert!(!set_concrete(&mut v, &out_of_range, json!("x")));

        assert_eq!(remove_concrete(&mut v, &p), Some(json!("c")));
        assert!(get_concrete(&v, &p).is_none());
    }

    #[test]
    fn json_path_lookup_handles_indexes() {
        let v = json!({ "status": { "atProvider": { "arn": "arn:x", "endpoints": ["e0", "e1"] } } });
        assert_eq!(lookup_json_path(&v, "status.atProvider.arn"), Some(&json!("arn:x")));
        assert_eq!(lookup_json_path(&v, ".status.atProvider.endpoints[1]"), Some(&json!("e1")));
        assert!(lookup_json_path(&v, "status.atProvider.missing").is_none());
        assert!(lookup_json_path(&v, "status..arn").is_none());
    }

    #[test]
    fn emptiness_and_text() {
        assert!(is_empty_value(&json!("")));
        assert!(is_empty_value(&json!([])));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
        assert_eq!(scalar_text(&json!(100)), Some("100".to_string()));
        assert_eq!(scalar_text(&json!({})), None);
        assert!(is_unset(Some(&Value::Null)));
        assert!(is_unset(None));
    }
}
