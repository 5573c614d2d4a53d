// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Redaction of sensitive keys and bounding of untrusted nested data.
//!
//! [`sanitize`] turns a [`Value`] graph into a fresh JSON tree:
//!
//! - entries whose key contains a configured pattern (case-insensitive) become `[FILTERED]`
//! - strings longer than [`MAX_STRING_LENGTH`] characters are cut and suffixed with `...`
//! - anything deeper than [`MAX_DEPTH`] becomes `[DEPTH]`
//! - a map reached again while it is still being visited becomes `[CIRCULAR]`
//!
//! Cycle detection only looks at the maps on the current path. A map shared between two
//! sibling branches is not a cycle and is emitted once per branch.

use crate::constants::{
    CIRCULAR_SENTINEL, DEFAULT_FILTER_KEYS, DEPTH_SENTINEL, FILTERED, MAX_DEPTH,
    MAX_STRING_LENGTH, TRUNCATION_MARKER,
};
use crate::value::{Map, Value};
use serde_json::Value as JsonValue;

/// Case-insensitive substring patterns identifying sensitive keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFilter {
    patterns: Vec<String>,
}

impl KeyFilter {
    /// Builds a filter from patterns. Patterns are lower-cased; empty ones are ignored since
    /// they would match every key.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    #[must_use]
    pub fn is_sensitive(&self, key: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let key = key.to_lowercase();
        self.patterns.iter().any(|p| key.contains(p.as_str()))
    }
}

impl Default for KeyFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_KEYS)
    }
}

/// Returns a redacted, bounded copy of `value`.
#[must_use]
pub fn sanitize(value: &Value, filter: &KeyFilter) -> JsonValue {
    Sanitizer::new(filter).visit(value, 0)
}

/// Same as [`sanitize`] for a top-level map, returning the JSON object directly.
#[must_use]
pub fn sanitize_map(map: &Map, filter: &KeyFilter) -> serde_json::Map<String, JsonValue> {
    Sanitizer::new(filter).visit_map(map, 0)
}

/// Cuts `s` to [`MAX_STRING_LENGTH`] characters, appending `...` when anything was removed.
#[must_use]
pub fn truncate(s: &str) -> String {
    truncate_to(s, MAX_STRING_LENGTH)
}

pub(crate) fn truncate_to(s: &str, max_length: usize) -> String {
    match s.char_indices().nth(max_length) {
        Some((cut, _)) => {
            let mut truncated = String::with_capacity(cut + TRUNCATION_MARKER.len());
            truncated.push_str(&s[..cut]);
            truncated.push_str(TRUNCATION_MARKER);
            truncated
        }
        None => s.to_string(),
    }
}

struct Sanitizer<'a> {
    filter: &'a KeyFilter,
    // Identities of the maps currently being visited, outermost first.
    path: Vec<usize>,
}

impl<'a> Sanitizer<'a> {
    fn new(filter: &'a KeyFilter) -> Self {
        Self {
            filter,
            path: Vec::new(),
        }
    }

    fn visit(&mut self, value: &Value, depth: usize) -> JsonValue {
        if depth > MAX_DEPTH {
            return JsonValue::String(DEPTH_SENTINEL.to_string());
        }

        match value {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Integer(i) => JsonValue::from(*i),
            // NaN and infinities have no JSON representation
            Value::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number)
            }
            Value::String(s) | Value::Symbol(s) => JsonValue::String(truncate(s)),
            Value::List(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| self.visit(item, depth + 1))
                    .collect(),
            ),
            Value::Map(map) => {
                if self.path.contains(&map.id()) {
                    JsonValue::String(CIRCULAR_SENTINEL.to_string())
                } else {
                    JsonValue::Object(self.visit_map(map, depth))
                }
            }
        }
    }

    fn visit_map(&mut self, map: &Map, depth: usize) -> serde_json::Map<String, JsonValue> {
        self.path.push(map.id());
        // The read guard stays held while children are visited. Children that are this same
        // map are caught by the path check above before any second lock is taken.
        let object = map.read(|entries| {
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = key.to_string();
                let sanitized = if self.filter.is_sensitive(&key) {
                    JsonValue::String(FILTERED.to_string())
                } else {
                    self.visit(value, depth + 1)
                };
                object.insert(key, sanitized);
            }
            object
        });
        self.path.pop();
        object
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::value::Key;
    use serde_json::json;

    fn filter() -> KeyFilter {
        KeyFilter::new(["password", "token"])
    }

    #[test]
    fn test_redacts_nested_sensitive_keys() {
        let input = Value::from(json!({
            "password": "x",
            "nested": {"token": "y", "safe": "z"}
        }));

        let output = sanitize(&input, &filter());

        assert_eq!(
            output,
            json!({
                "password": "[FILTERED]",
                "nested": {"token": "[FILTERED]", "safe": "z"}
            })
        );
    }

    #[test]
    fn test_key_match_is_partial_and_case_insensitive() {
        let input = Value::from(json!({
            "User_PASSWORD_hash": "a",
            "x-auth-Token": "b",
            "username": "c",
        }));

        let output = sanitize(&input, &filter());

        assert_eq!(output["User_PASSWORD_hash"], "[FILTERED]");
        assert_eq!(output["x-auth-Token"], "[FILTERED]");
        assert_eq!(output["username"], "c");
    }

    #[test]
    fn test_redaction_applies_to_any_value_type() {
        let input = Value::from(json!({
            "password": {"inner": [1, 2, 3]},
            "token": 42,
            "tokens": null,
        }));

        let output = sanitize(&input, &filter());

        assert_eq!(output["password"], "[FILTERED]");
        assert_eq!(output["token"], "[FILTERED]");
        assert_eq!(output["tokens"], "[FILTERED]");
    }

    #[test]
    fn test_symbol_and_integer_keys_are_stringified() {
        let map: Map = [
            (Key::Symbol("password".to_string()), Value::from("hunter2")),
            (Key::Integer(7), Value::symbol("ok")),
        ]
        .into_iter()
        .collect();

        let output = sanitize(&Value::Map(map), &filter());

        assert_eq!(output, json!({"password": "[FILTERED]", "7": "ok"}));
    }

    #[test]
    fn test_lists_keep_order_and_recurse() {
        let input = Value::from(json!([{"token": "t"}, "b", 3, true, null]));

        let output = sanitize(&input, &filter());

        assert_eq!(output, json!([{"token": "[FILTERED]"}, "b", 3, true, null]));
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(sanitize(&Value::Integer(-5), &filter()), json!(-5));
        assert_eq!(sanitize(&Value::Float(1.5), &filter()), json!(1.5));
        assert_eq!(sanitize(&Value::Bool(false), &filter()), json!(false));
        assert_eq!(sanitize(&Value::Null, &filter()), JsonValue::Null);
        assert_eq!(sanitize(&Value::Float(f64::NAN), &filter()), JsonValue::Null);
    }

    #[test]
    fn test_long_strings_are_truncated() {
        let long = "a".repeat(MAX_STRING_LENGTH + 50);

        let output = sanitize(&Value::from(long), &filter());
        let output = output.as_str().unwrap();

        assert_eq!(output.chars().count(), MAX_STRING_LENGTH + 3);
        assert!(output.ends_with("..."));
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let long: String = "é".repeat(MAX_STRING_LENGTH + 1);
        let truncated = truncate(&long);

        assert_eq!(truncated.chars().count(), MAX_STRING_LENGTH + 3);
        assert!(truncated.starts_with('é'));

        let exact: String = "é".repeat(MAX_STRING_LENGTH);
        assert_eq!(truncate(&exact), exact);
    }

    #[test]
    fn test_long_symbols_are_truncated() {
        let output = sanitize(&Value::symbol("s".repeat(MAX_STRING_LENGTH + 1)), &filter());
        assert!(output.as_str().unwrap().ends_with("..."));
    }

    #[test]
    fn test_depth_sentinel_replaces_deep_values() {
        // depth 0 is the outer map; the leaf sits at depth MAX_DEPTH + 2
        let mut value = Value::from("leaf");
        for _ in 0..=MAX_DEPTH + 1 {
            value = Value::Map([("child", value)].into_iter().collect());
        }

        let output = sanitize(&value, &filter());

        let mut cursor = &output;
        for _ in 0..=MAX_DEPTH {
            assert!(cursor.is_object());
            cursor = &cursor["child"];
        }
        assert_eq!(cursor, &json!("[DEPTH]"));
    }

    #[test]
    fn test_values_at_max_depth_are_kept() {
        let mut value = Value::from("leaf");
        for _ in 0..MAX_DEPTH {
            value = Value::Map([("child", value)].into_iter().collect());
        }

        let output = sanitize(&value, &filter());

        let mut cursor = &output;
        for _ in 0..MAX_DEPTH {
            cursor = &cursor["child"];
        }
        assert_eq!(cursor, &json!("leaf"));
    }

    #[test]
    fn test_cycle_is_replaced_by_sentinel() {
        let root = Map::new();
        let child = Map::new();
        root.insert("name", "root");
        root.insert("child", child.clone());
        child.insert("parent", root.clone());
        child.insert("self", child.clone());

        let output = sanitize(&Value::Map(root), &filter());

        assert_eq!(
            output,
            json!({
                "name": "root",
                "child": {"parent": "[CIRCULAR]", "self": "[CIRCULAR]"}
            })
        );
    }

    #[test]
    fn test_shared_acyclic_map_is_emitted_per_path() {
        let shared: Map = [("token", "t"), ("v", "1")].into_iter().collect();
        let root: Map = [
            ("left", Value::Map(shared.clone())),
            ("right", Value::Map(shared)),
        ]
        .into_iter()
        .collect();

        let output = sanitize(&Value::Map(root), &filter());

        let expected = json!({"token": "[FILTERED]", "v": "1"});
        assert_eq!(output["left"], expected);
        assert_eq!(output["right"], expected);
    }

    #[test]
    fn test_output_is_independent_of_input() {
        let map: Map = [("a", "1")].into_iter().collect();
        let output = sanitize_map(&map, &filter());

        map.insert("a", "2");

        assert_eq!(output.get("a"), Some(&json!("1")));
    }

    #[test]
    fn test_empty_patterns_are_ignored() {
        let filter = KeyFilter::new(["", "  ", "Secret"]);
        assert_eq!(filter.patterns(), &["secret".to_string()]);
        assert!(!filter.is_sensitive("anything"));
        assert!(filter.is_sensitive("CLIENT_SECRET"));
    }

    #[test]
    fn test_default_filter() {
        let filter = KeyFilter::default();
        assert!(filter.is_sensitive("password_confirmation"));
        assert!(filter.is_sensitive("HTTP_AUTHORIZATION"));
        assert!(!filter.is_sensitive("email"));
    }
}
