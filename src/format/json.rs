//! JSON codec: `{"root": { ... }}`.
//!
//! Scalars are attributes, objects are sections, and arrays hold
//! same-named entries. A section's own value lives under
//! [`SECTION_VALUE_KEY`].

use serde_json::{Map, Value};

use super::{parse_error, write_error, Format};
use crate::config::{ConfigError, Configuration, Node, NodeId};

pub(crate) const SECTION_VALUE_KEY: &str = "-section-value";

pub(super) fn parse(text: &str) -> Result<Configuration, ConfigError> {
    let document: Value =
        serde_json::from_str(text).map_err(|e| parse_error(Format::Json, e.to_string()))?;

    let Value::Object(top) = document else {
        return Err(parse_error(Format::Json, "document must be an object"));
    };
    let mut entries = top.into_iter();
    let (Some((name, body)), None) = (entries.next(), entries.next()) else {
        return Err(parse_error(
            Format::Json,
            "document must hold exactly one root entry",
        ));
    };

    let mut conf = Configuration::with_root(&name);
    let root = conf.root_id();
    match body {
        Value::Object(map) => read_section(&mut conf, root, map)?,
        Value::Array(_) => {
            return Err(parse_error(Format::Json, "the root must be an object"));
        }
        scalar => conf.set_value(root, scalar_text(&scalar).as_deref())?,
    }
    Ok(conf)
}

fn read_section(
    conf: &mut Configuration,
    section: NodeId,
    map: Map<String, Value>,
) -> Result<(), ConfigError> {
    for (key, value) in map {
        if key == SECTION_VALUE_KEY {
            conf.set_value(section, scalar_text(&value).as_deref())?;
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
        Value::Object(map) => {
            let child = conf.add_section(section, name, None)?;
            read_section(conf, child, map)
        }
        Value::Array(_) => Err(parse_error(
            Format::Json,
            format!("nested arrays are not supported ('{name}')"),
        )),
        scalar => conf
            .add_attribute(section, name, scalar_text(&scalar).as_deref())
            .map(|_| ()),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(super) fn write(section: Node<'_>) -> Result<String, ConfigError> {
    let mut top = Map::new();
    top.insert(section.name().to_string(), section_object(section));
    serde_json::to_string_pretty(&Value::Object(top))
        .map_err(|e| write_error(Format::Json, e.to_string()))
}

fn section_object(section: Node<'_>) -> Value {
    let mut map = Map::new();
    if let Some(value) = section.verbatim_value() {
        map.insert(SECTION_VALUE_KEY.to_string(), Value::String(value.to_string()));
    }

    let entries = section
        .attributes()
        .map(|a| (a.name(), attribute_value(a)))
        .chain(section.children().map(|c| (c.name(), section_object(c))));

    for (name, value) in entries {
        // Names that differ only in case share the first entry's key.
        let key = map
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map_or_else(|| name.to_string(), String::clone);
        match map.get_mut(&key) {
            None => {
                map.insert(key, value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    Value::Object(map)
}

fn attribute_value(attr: Node<'_>) -> Value {
    match attr.verbatim_value() {
        Some(value) => Value::String(value.to_string()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars_objects_arrays() {
        let conf = parse(
            r#"{
                "app": {
                    "-section-value": "main",
                    "port": 8080,
                    "ratio": 0.5,
                    "debug": true,
                    "none": null,
                    "tags": ["a", "b"],
                    "replica": [{"host": "r1"}, {"host": "r2"}]
                }
            }"#,
        )
        .unwrap();

        let root = conf.root();
        assert_eq!(root.name(), "app");
        assert_eq!(root.verbatim_value(), Some("main"));
        assert_eq!(root.attribute("port").verbatim_value(), Some("8080"));
        assert_eq!(root.attribute("ratio").verbatim_value(), Some("0.5"));
        assert_eq!(root.attribute("debug").verbatim_value(), Some("true"));
        assert!(root.attribute("none").exists());
        assert_eq!(root.attribute("none").verbatim_value(), None);
        assert_eq!(root.attribute_at(5).verbatim_value(), Some("b"));
        assert_eq!(root.child_count(), 2);
        assert_eq!(conf.navigate("/replica[1]/$host").unwrap().verbatim_value(), Some("r2"));
    }

    #[test]
    fn test_write_groups_same_names() {
        let conf = super::super::laconic::parse("r{ a=1 a=2 s{ x=1 } s{ x=2 } t=v{} }").unwrap();
        let text = write(conf.root()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["r"]["a"], serde_json::json!(["1", "2"]));
        assert_eq!(value["r"]["s"][1]["x"], "2");
        assert_eq!(value["r"]["t"][SECTION_VALUE_KEY], "v");
    }

    #[test]
    fn test_names_differing_in_case_keep_their_order() {
        let conf = super::super::laconic::parse("r{ Item=1 item=2 ITEM=3 }").unwrap();
        let text = write(conf.root()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["r"]["Item"], serde_json::json!(["1", "2", "3"]));

        let reread = parse(&text).unwrap();
        assert!(crate::config::structurally_equal(conf.root(), reread.root()));
    }

    #[test]
    fn test_rejects_bad_documents() {
        for bad in ["[]", "{}", r#"{"a": {}, "b": {}}"#, r#"{"a": []}"#, "{", r#"{"a": {"x": [[1]]}}"#] {
            assert!(
                matches!(parse(bad), Err(ConfigError::ParseError { .. })),
                "{bad} should fail"
            );
        }
    }
}
