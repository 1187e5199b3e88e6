//! Typed binding: deserializes an evaluated subtree into a serde type.
//!
//! The tree only stores text, so scalars are coerced to the most specific
//! TOML type (boolean, integer, float, or string) before deserialization.

use serde::de::DeserializeOwned;
use toml::{Table, Value};

use super::node::Node;
use super::tree::Configuration;
use super::ConfigError;

impl Configuration {
    /// Deserializes the evaluated tree (below the root) into `T`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        bind_node(self.root())
    }
}

/// Deserializes the evaluated subtree rooted at `node` into `T`.
pub(crate) fn bind_node<T: DeserializeOwned>(node: Node<'_>) -> Result<T, ConfigError> {
    let value = to_value(node)?;
    value.try_into().map_err(ConfigError::DeserializeError)
}

/// Converts a node to a TOML value.
///
/// Attributes become scalar entries. Same-named entries (compared
/// case-insensitively) collapse into an array in document order, keyed by
/// their common spelling or, when spellings differ, the lower-cased name.
/// A section with nothing but a scalar value becomes that scalar.
pub(crate) fn to_value(node: Node<'_>) -> Result<Value, ConfigError> {
    if node.is_attribute() {
        let value = node.value()?.unwrap_or_default();
        return Ok(coerce_value(&value));
    }

    if node.attribute_count() == 0 && node.child_count() == 0 {
        if let Some(value) = node.value()? {
            return Ok(coerce_value(&value));
        }
    }

    let mut table = Table::new();
    for entry in node.attributes().chain(node.children()) {
        let (key, repeated) = group_key(node, entry.name());
        let value = to_value(entry)?;
        if !repeated {
            table.insert(key, value);
            continue;
        }
        if let Some(Value::Array(items)) = table.get_mut(&key) {
            items.push(value);
        } else {
            table.insert(key, Value::Array(vec![value]));
        }
    }
    Ok(Value::Table(table))
}

/// Returns the table key for entries named `name` and whether there is more
/// than one of them.
fn group_key(node: Node<'_>, name: &str) -> (String, bool) {
    let group: Vec<&str> = node
        .attributes()
        .chain(node.children())
        .map(|n| n.name())
        .filter(|n| n.eq_ignore_ascii_case(name))
        .collect();
    let key = if group.iter().all(|n| *n == name) {
        name.to_string()
    } else {
        name.to_ascii_lowercase()
    };
    (key, group.len() > 1)
}

/// Coerces a string to the most specific TOML scalar:
/// boolean, integer, float, or string (fallback).
pub(crate) fn coerce_value(s: &str) -> Value {
    // Try boolean first (case-insensitive)
    if s.eq_ignore_ascii_case("true") {
        return Value::Boolean(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return Value::Boolean(false);
    }

    // Try integer (only if it looks like an integer: optional minus, then digits)
    if looks_like_integer(s) {
        if let Ok(i) = s.parse::<i64>() {
            return Value::Integer(i);
        }
    }

    // Try float (if contains decimal point)
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            return Value::Float(f);
        }
    }

    // Fallback to string
    Value::String(s.to_string())
}

fn looks_like_integer(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}
