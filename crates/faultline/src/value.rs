// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loosely-typed values handed to the pipeline by collectors.
//!
//! Context, request and user data arrive as arbitrary nested structures. [`Value`] models them
//! as a tagged union so the sanitizer can visit every shape exhaustively. [`Map`] is a shared
//! handle: cloning it clones the reference, not the entries, which lets collectors hand over
//! graphs with shared or even cyclic substructures. The sanitizer relies on [`Map::id`] to
//! detect the cycles.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A JSON-like value with an additional `Symbol` variant for symbolic names (enum
/// discriminants, atoms, interned identifiers) that serialize as plain strings.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(String),
    List(Vec<Value>),
    Map(Map),
}

impl Value {
    #[must_use]
    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

/// Map key. Non-string keys are stringified when a notice is sanitized.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    String(String),
    Symbol(String),
    Integer(i64),
}

impl Key {
    /// Compares the stringified form of this key with `name`.
    fn matches(&self, name: &str) -> bool {
        match self {
            Key::String(s) | Key::Symbol(s) => s == name,
            Key::Integer(i) => i.to_string() == name,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::String(s) | Key::Symbol(s) => write!(f, "{s}"),
            Key::Integer(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Integer(value)
    }
}

/// Shared, insertion-ordered map.
///
/// Keys are unique by their stringified form: inserting `"id"` replaces an existing
/// `Key::Symbol("id")`. Interior mutability is what allows building self-referential maps, so
/// every accessor takes `&self`.
#[derive(Clone, Default)]
pub struct Map {
    entries: Arc<RwLock<Vec<(Key, Value)>>>,
}

impl Map {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of the underlying allocation. Two handles share an id iff they are clones of
    /// each other.
    #[must_use]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.entries) as *const () as usize
    }

    /// Inserts or replaces an entry, returning the previous value for that key.
    pub fn insert(&self, key: impl Into<Key>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let name = key.to_string();
        match entries.iter_mut().find(|(k, _)| k.matches(&name)) {
            Some((existing_key, existing_value)) => {
                *existing_key = key;
                Some(std::mem::replace(existing_value, value))
            }
            None => {
                entries.push((key, value));
                None
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.read(|entries| {
            entries
                .iter()
                .find(|(k, _)| k.matches(name))
                .map(|(_, v)| v.clone())
        })
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let position = entries.iter().position(|(k, _)| k.matches(name))?;
        Some(entries.remove(position).1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read(<[(Key, Value)]>::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Snapshot of the entries. Nested maps in the snapshot are still shared handles.
    #[must_use]
    pub fn entries(&self) -> Vec<(Key, Value)> {
        self.read(<[(Key, Value)]>::to_vec)
    }

    /// New map holding this map's entries overridden by `overrides` on key collision.
    #[must_use]
    pub fn merged(&self, overrides: &Map) -> Map {
        let merged: Map = self.entries().into_iter().collect();
        for (key, value) in overrides.entries() {
            merged.insert(key, value);
        }
        merged
    }

    /// Runs `f` with read access to the entries.
    pub fn read<R>(&self, f: impl FnOnce(&[(Key, Value)]) -> R) -> R {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f(&entries)
    }
}

// Maps may be cyclic, so Debug prints identity and size instead of recursing.
impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("len", &self.len())
            .finish()
    }
}

impl<K: Into<Key>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Map::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(object) => Value::Map(object.into_iter().collect()),
        }
    }
}
