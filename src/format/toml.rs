//! TOML codec. The document is the root section, named
//! [`DEFAULT_ROOT_NAME`](crate::config::DEFAULT_ROOT_NAME) on read since
//! TOML has no root name.
//!
//! Tables are sections, scalars are attributes, and arrays hold same-named
//! entries. A section's own value lives under the `-section-value` key.

use toml::{Table, Value};

use super::json::SECTION_VALUE_KEY;
use super::{parse_error, write_error, Format};
use crate::config::{ConfigError, Configuration, Node, NodeId};

pub(super) fn parse(text: &str) -> Result<Configuration, ConfigError> {
    let table: Table = text
        .parse()
        .map_err(|e: toml::de::Error| parse_error(Format::Toml, e.message()))?;

    let mut conf = Configuration::new();
    let root = conf.root_id();
    read_table(&mut conf, root, table)?;
    Ok(conf)
}

fn read_table(conf: &mut Configuration, section: NodeId, table: Table) -> Result<(), ConfigError> {
    for (key, value) in table {
        if key == SECTION_VALUE_KEY {
            conf.set_value(section, Some(&scalar_text(&value)))?;
            continue;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    read_entry(conf, section, &key, item)?;
                }
            }
            other => read_entry(conf, section, &key, other)?,
        }
    }
    Ok(())
}

fn read_entry(
    conf: &mut Configuration,
    section: NodeId,
    name: &str,
    value: Value,
) -> Result<(), ConfigError> {
    match value {
        Value::Table(table) => {
            let child = conf.add_section(section, name, None)?;
            read_table(conf, child, table)
        }
        Value::Array(_) => Err(parse_error(
            Format::Toml,
            format!("nested arrays are not supported ('{name}')"),
        )),
        scalar => conf
            .add_attribute(section, name, Some(&scalar_text(&scalar)))
            .map(|_| ()),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Values are written as strings; null attributes become empty strings.
pub(super) fn write(section: Node<'_>) -> Result<String, ConfigError> {
    toml::to_string(&section_table(section)).map_err(|e| write_error(Format::Toml, e.to_string()))
}

fn section_table(section: Node<'_>) -> Table {
    let mut table = Table::new();
    if let Some(value) = section.verbatim_value() {
        table.insert(SECTION_VALUE_KEY.to_string(), Value::String(value.to_string()));
    }

    let entries = section
        .attributes()
        .map(|a| {
            let text = a.verbatim_value().unwrap_or_default();
            (a.name(), Value::String(text.to_string()))
        })
        .chain(section.children().map(|c| (c.name(), Value::Table(section_table(c)))));

    for (name, value) in entries {
        // Names that differ only in case share the first entry's key.
        let key = table
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map_or_else(|| name.to_string(), String::clone);
        match table.get_mut(&key) {
            None => {
                table.insert(key, value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = std::mem::replace(existing, Value::Array(Vec::new()));
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    table
}
