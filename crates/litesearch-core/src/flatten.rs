//! Flattening of nested JSON documents into field-path projections.
//!
//! Object keys extend the path with [`PATH_SEPARATOR`]; list elements are
//! collected under the path of the list itself, so `{"tags": ["a", "b"]}`
//! becomes `{"tags": ["a", "b"]}` rather than `tags.0`, `tags.1`.

use crate::errors::{Result, StoreError};
use crate::model::{DocumentFields, Primitive};
use serde_json::Value as JsonValue;

pub const PATH_SEPARATOR: &str = ".";

/// Deepest nesting of objects and lists accepted in a document source.
pub const MAX_SOURCE_DEPTH: usize = 64;

/// Flattens a document into its field projection. Never fails; callers are
/// expected to run [`validate_source`] first.
pub fn flatten(document: &JsonValue) -> DocumentFields {
    let mut out = DocumentFields::new();
    let mut path = Vec::new();
    flatten_into(document, &mut path, &mut out);
    out
}

fn flatten_into<'a>(item: &'a JsonValue, path: &mut Vec<&'a str>, out: &mut DocumentFields) {
    match item {
        JsonValue::Object(map) => {
            for (key, value) in map {
                path.push(key);
                flatten_into(value, path, out);
                path.pop();
            }
        }
        JsonValue::Array(items) => {
            for value in items {
                flatten_into(value, path, out);
            }
        }
        leaf => {
            if let Some(value) = Primitive::from_json(leaf) {
                out.entry(path.join(PATH_SEPARATOR)).or_default().push(value);
            }
        }
    }
}

/// Checks that a document source is an object made of nested objects, lists
/// and primitive leaves, no deeper than [`MAX_SOURCE_DEPTH`].
pub fn validate_source(source: &JsonValue) -> Result<()> {
    if !source.is_object() {
        return Err(StoreError::Validation(format!(
            "document source must be an object, got {}",
            json_type_name(source)
        )));
    }
    check_depth(source, "$", 0)
}

fn check_depth(value: &JsonValue, at: &str, depth: usize) -> Result<()> {
    if depth > MAX_SOURCE_DEPTH {
        return Err(StoreError::Validation(format!(
            "{at}: nesting deeper than {MAX_SOURCE_DEPTH} levels"
        )));
    }
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                check_depth(child, &format!("{at}.{key}"), depth + 1)?;
            }
            Ok(())
        }
        JsonValue::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                check_depth(child, &format!("{at}[{i}]"), depth + 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_join_with_dots() {
        let fields = flatten(&json!({"a": {"b": 1}}));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["a.b"], vec![Primitive::from(1)]);
    }

    #[test]
    fn colliding_paths_follow_source_order() {
        let fields = flatten(&json!({"a.b": 1, "a": {"b": 2}}));
        assert_eq!(fields["a.b"], vec![Primitive::from(1), Primitive::from(2)]);
        let fields = flatten(&json!({"a": {"b": 2}, "a.b": 1}));
        assert_eq!(fields["a.b"], vec![Primitive::from(2), Primitive::from(1)]);
    }

    #[test]
    fn lists_keep_the_parent_path() {
        let fields = flatten(&json!({"a": [1, 2, 3]}));
        assert_eq!(
            fields["a"],
            vec![Primitive::from(1), Primitive::from(2), Primitive::from(3)]
        );
    }

    #[test]
    fn empty_object_flattens_to_nothing() {
        assert!(flatten(&json!({})).is_empty());
    }

    #[test]
    fn objects_inside_lists_share_paths() {
        let doc = json!({
            "users": [
                {"name": "ann", "age": 30},
                {"name": "bob", "tags": [["x"], "y"]}
            ],
            "ok": true,
            "missing": null
        });
        let fields = flatten(&doc);
        assert_eq!(fields["users.name"], vec![Primitive::from("ann"), Primitive::from("bob")]);
        assert_eq!(fields["users.age"], vec![Primitive::from(30)]);
        assert_eq!(fields["users.tags"], vec![Primitive::from("x"), Primitive::from("y")]);
        assert_eq!(fields["ok"], vec![Primitive::Bool(true)]);
        assert_eq!(fields["missing"], vec![Primitive::Null]);
    }

    #[test]
    fn empty_lists_contribute_no_field() {
        let fields = flatten(&json!({"a": [], "b": {"c": []}}));
        assert!(fields.is_empty());
    }

    #[test]
    fn flattening_is_deterministic() {
        let doc = json!({"z": 1, "a": {"y": [true, null], "b": "s"}});
        assert_eq!(flatten(&doc), flatten(&doc));
    }

    #[test]
    fn validation_rejects_non_object_roots() {
        assert!(validate_source(&json!({"a": [1, {"b": null}]})).is_ok());
        let err = validate_source(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(validate_source(&json!("text")).is_err());
    }

    #[test]
    fn validation_limits_depth() {
        let mut doc = json!(1);
        for _ in 0..=MAX_SOURCE_DEPTH {
            doc = json!({ "k": doc });
        }
        let err = validate_source(&doc).unwrap_err();
        assert!(err.to_string().contains("nesting deeper"));

        let mut shallow = json!(1);
        for _ in 0..MAX_SOURCE_DEPTH {
            shallow = json!({ "k": shallow });
        }
        assert!(validate_source(&shallow).is_ok());
    }
}
