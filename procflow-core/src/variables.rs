//! Typed process variables.
//!
//! Every instance owns a [`Variables`] snapshot. Values are a small closed
//! set of types so guard evaluation never has to coerce between them:
//!
//! ```json
//! {"prc_confirmation": true, "retries": 3, "region": "north"}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// The type of a process variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    Bool,
    Int,
    #[serde(alias = "str")]
    String,
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Bool => f.write_str("bool"),
            VarType::Int => f.write_str("int"),
            VarType::String => f.write_str("string"),
        }
    }
}

/// A process variable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl VarValue {
    pub fn var_type(&self) -> VarType {
        match self {
            VarValue::Bool(_) => VarType::Bool,
            VarValue::Int(_) => VarType::Int,
            VarValue::Str(_) => VarType::String,
        }
    }

    /// Parses a command-line literal: `true`/`false`, an integer, or text.
    pub fn parse_literal(s: &str) -> Self {
        match s {
            "true" => VarValue::Bool(true),
            "false" => VarValue::Bool(false),
            _ => match s.parse::<i64>() {
                Ok(n) => VarValue::Int(n),
                Err(_) => VarValue::Str(s.trim_matches('"').to_string()),
            },
        }
    }
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Bool(b) => write!(f, "{}", b),
            VarValue::Int(n) => write!(f, "{}", n),
            VarValue::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<bool> for VarValue {
    fn from(b: bool) -> Self {
        VarValue::Bool(b)
    }
}

impl From<i64> for VarValue {
    fn from(n: i64) -> Self {
        VarValue::Int(n)
    }
}

impl From<i32> for VarValue {
    fn from(n: i32) -> Self {
        VarValue::Int(n as i64)
    }
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        VarValue::Str(s.to_string())
    }
}

impl From<String> for VarValue {
    fn from(s: String) -> Self {
        VarValue::Str(s)
    }
}

/// A snapshot of named variables.
///
/// Ordered by name so that display and serialization are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, VarValue>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    ///
    /// ```
    /// use procflow_core::Variables;
    ///
    /// let vars = Variables::new()
    ///     .with("prc_confirmation", true)
    ///     .with("prc_is_cost_accepted", false);
    /// assert_eq!(vars.len(), 2);
    /// ```
    pub fn with(mut self, name: impl Into<String>, value: impl Into<VarValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a variable, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<VarValue>) -> Option<VarValue> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, VarValue> {
        self.0.iter()
    }

    /// Merges `other` into this snapshot. Existing keys are overwritten,
    /// nothing is removed.
    pub fn merge(&mut self, other: &Variables) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Variables
where
    K: Into<String>,
    V: Into<VarValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Variables {
    type Item = (&'a String, &'a VarValue);
    type IntoIter = btree_map::Iter<'a, String, VarValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
