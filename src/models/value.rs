//! Literal value trees exchanged with check hooks.
//!
//! A [`StateValue`] is what a check hook sees as `request`, `response` and
//! `state`. Only literal trees (scalars, lists and string-keyed dicts) can be
//! serialized; [`StateValue::Opaque`] stands for interpreter values such as
//! functions that have no literal form.

use std::collections::BTreeMap;

use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A literal-valued tree, or an opaque interpreter value.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    /// Absence of a value.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Floating point literal; non-finite values are not literals.
    Float(f64),
    /// String literal.
    Str(String),
    /// Ordered list of values.
    List(Vec<StateValue>),
    /// String-keyed dictionary; keys are kept sorted.
    Dict(BTreeMap<String, StateValue>),
    /// A value with no literal form, named by its type (e.g. `function`).
    Opaque(String),
}

impl StateValue {
    /// An empty dictionary, the default live state of a check.
    #[must_use]
    pub fn empty_dict() -> Self {
        Self::Dict(BTreeMap::new())
    }

    /// Whether this value is a dictionary (a "tree" in check terms).
    #[must_use]
    pub fn is_dict(&self) -> bool {
        matches!(self, Self::Dict(_))
    }

    /// Whether every node of this tree is a literal.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        match self {
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Str(_) => true,
            Self::Float(x) => x.is_finite(),
            Self::List(items) => items.iter().all(Self::is_literal),
            Self::Dict(map) => map.values().all(Self::is_literal),
            Self::Opaque(_) => false,
        }
    }

    /// Name of this value's type, as reported in error messages.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Opaque(kind) => kind,
        }
    }

    /// Look up `key` when this value is a dictionary.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        match self {
            Self::Dict(map) => map.get(key),
            _ => None,
        }
    }

    /// Mutable dictionary view, or `None` for any other variant.
    pub fn as_dict_mut(&mut self) -> Option<&mut BTreeMap<String, StateValue>> {
        match self {
            Self::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Canonical JSON text of this tree.
    ///
    /// Dictionary keys are sorted, so two equal trees always produce the same
    /// text.
    ///
    /// # Errors
    ///
    /// Returns the serializer error when the tree holds an opaque value or a
    /// non-finite float.
    pub fn to_canonical_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Default for StateValue {
    fn default() -> Self {
        Self::empty_dict()
    }
}

impl Serialize for StateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) if x.is_finite() => serializer.serialize_f64(*x),
            Self::Float(x) => Err(S::Error::custom(format!(
                "float {x} has no literal form"
            ))),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) => items.serialize(serializer),
            Self::Dict(map) => map.serialize(serializer),
            Self::Opaque(kind) => Err(S::Error::custom(format!(
                "value of type {kind} has no literal form"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for StateValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => Self::Dict(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for StateValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}
