//! XML codec: elements are sections, XML attributes are attributes, and
//! the text content of an element is the section value.
//!
//! Section values are written as CDATA and read back exactly. Plain text is
//! trimmed, and whitespace-only text between child elements is dropped.
//!
//! XML cannot express a null attribute (written as `""`) nor two attributes
//! of the same name on one element (a write error).

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{parse_error, write_error, Format};
use crate::config::{ConfigError, Configuration, Node, NodeId};

fn err(e: impl std::fmt::Display) -> ConfigError {
    parse_error(Format::Xml, e.to_string())
}

pub(super) fn parse(text: &str) -> Result<Configuration, ConfigError> {
    let mut reader = Reader::from_str(text);
    let mut conf: Option<Configuration> = None;
    let mut stack: Vec<Open> = Vec::new();

    loop {
        let event = reader.read_event().map_err(err)?;
        match event {
            Event::Start(start) => {
                let id = open_element(&mut conf, &stack, &start)?;
                stack.push(Open {
                    id,
                    text: String::new(),
                    verbatim: false,
                });
            }
            Event::Empty(start) => {
                open_element(&mut conf, &stack, &start)?;
            }
            Event::End(_) => {
                let Some(open) = stack.pop() else {
                    return Err(err("unbalanced closing tag"));
                };
                let text = if open.verbatim {
                    open.text.as_str()
                } else {
                    open.text.trim()
                };
                if let Some(conf) = conf.as_mut().filter(|_| open.verbatim || !text.is_empty()) {
                    conf.set_value(open.id, Some(text))?;
                }
            }
            Event::Text(t) => {
                let t = t.unescape().map_err(err)?;
                if t.trim().is_empty() {
                    continue;
                }
                match stack.last_mut() {
                    Some(open) => open.text.push_str(&t),
                    None => return Err(err("text outside the root element")),
                }
            }
            Event::CData(c) => {
                let bytes = c.into_inner();
                let t = std::str::from_utf8(&bytes).map_err(err)?;
                match stack.last_mut() {
                    Some(open) => {
                        open.text.push_str(t);
                        open.verbatim = true;
                    }
                    None => return Err(err("CDATA outside the root element")),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(err("unclosed element"));
    }
    conf.ok_or_else(|| err("document has no root element"))
}

/// An element whose closing tag has not been read yet.
struct Open {
    id: NodeId,
    text: String,
    /// Set once CDATA is seen; the text is then kept untrimmed.
    verbatim: bool,
}

/// Creates the section for `start` (the root if none exists yet) with its attributes.
fn open_element(
    conf: &mut Option<Configuration>,
    stack: &[Open],
    start: &BytesStart<'_>,
) -> Result<NodeId, ConfigError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(err)?
        .to_string();

    let parent = match (conf.is_some(), stack.last()) {
        (false, _) => {
            *conf = Some(Configuration::with_root(&name));
            None
        }
        (true, Some(open)) => Some(open.id),
        (true, None) => return Err(err("more than one root element")),
    };
    let Some(conf) = conf.as_mut() else {
        return Err(err("document has no root element"));
    };
    let id = match parent {
        Some(parent) => conf.add_section(parent, &name, None)?,
        None => conf.root_id(),
    };

    for attr in start.attributes() {
        let attr = attr.map_err(err)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(err)?;
        let value = attr.unescape_value().map_err(err)?;
        conf.add_attribute(id, key, Some(&value))?;
    }
    Ok(id)
}

pub(super) fn write(section: Node<'_>) -> Result<String, ConfigError> {
    let mut out = String::new();
    write_element(&mut out, section, 0)?;
    Ok(out)
}

fn write_element(out: &mut String, section: Node<'_>, depth: usize) -> Result<(), ConfigError> {
    let name = xml_name(section.name())?;
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(name);

    let mut seen: Vec<&str> = Vec::new();
    for attr in section.attributes() {
        let key = xml_name(attr.name())?;
        if seen.contains(&key) {
            return Err(write_error(
                Format::Xml,
                format!("duplicate attribute '{key}' on '{}'", section.root_path()),
            ));
        }
        seen.push(key);
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        push_attribute_value(out, attr.verbatim_value().unwrap_or(""));
        out.push('"');
    }

    let value = section.verbatim_value().unwrap_or("");
    if value.is_empty() && section.child_count() == 0 {
        out.push_str("/>\n");
        return Ok(());
    }
    out.push('>');
    push_cdata(out, value);
    if section.child_count() > 0 {
        out.push('\n');
        for child in section.children() {
            write_element(out, child, depth + 1)?;
        }
        out.push_str(&indent);
    }
    out.push_str("</");
    out.push_str(name);
    out.push_str(">\n");
    Ok(())
}

/// Escapes markup, and writes whitespace other than spaces as character
/// references so that readers do not normalize it away.
fn push_attribute_value(out: &mut String, value: &str) {
    for ch in escape(value).chars() {
        match ch {
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
}

/// `]]>` cannot appear inside one CDATA section, so it is split across two.
fn push_cdata(out: &mut String, value: &str) {
    if value.is_empty() {
        return;
    }
    out.push_str("<![CDATA[");
    out.push_str(&value.replace("]]>", "]]]]><![CDATA[>"));
    out.push_str("]]>");
}

/// Accepts names usable as XML element/attribute names.
fn xml_name(name: &str) -> Result<&str, ConfigError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(name)
    } else {
        Err(write_error(Format::Xml, format!("'{name}' is not a valid XML name")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_elements_attributes_text() {
        let conf = parse(
            r#"<?xml version="1.0"?>
            <!-- settings -->
            <app mode="prod">
              main
              <db host="localhost" port="5432"/>
              <greeting>a &amp; b</greeting>
              <raw><![CDATA[<x>]]></raw>
            </app>"#,
        )
        .unwrap();

        let root = conf.root();
        assert_eq!(root.name(), "app");
        assert_eq!(root.verbatim_value(), Some("main"));
        assert_eq!(root.attribute("mode").verbatim_value(), Some("prod"));
        assert_eq!(conf.navigate("/db/$port").unwrap().verbatim_value(), Some("5432"));
        assert_eq!(root.child("greeting").verbatim_value(), Some("a & b"));
        assert_eq!(root.child("raw").verbatim_value(), Some("<x>"));
    }

    #[test]
    fn test_write_escapes_and_nests() {
        let mut conf = Configuration::with_root("r");
        let root = conf.root_id();
        conf.add_attribute(root, "q", Some("a \"b\" <c>")).unwrap();
        let child = conf.add_section(root, "child", Some("x & y")).unwrap();
        conf.add_section(child, "leaf", None).unwrap();

        let text = write(conf.root()).unwrap();
        let reread = parse(&text).unwrap();
        assert_eq!(reread.root().attribute("q").verbatim_value(), Some("a \"b\" <c>"));
        assert_eq!(reread.root().child("child").verbatim_value(), Some("x & y"));
        assert!(reread.navigate("/child/leaf").unwrap().exists());
    }

    #[test]
    fn test_values_keep_surrounding_whitespace() {
        let mut conf = Configuration::with_root("r");
        let root = conf.root_id();
        conf.set_value(root, Some("  padded  ")).unwrap();
        conf.add_attribute(root, "a", Some(" x\ty\n ")).unwrap();
        conf.add_section(root, "blank", Some("   ")).unwrap();
        let nested = conf.add_section(root, "tricky", Some("\n a]]>b ")).unwrap();
        conf.add_section(nested, "leaf", None).unwrap();

        let text = write(conf.root()).unwrap();
        let reread = parse(&text).unwrap();
        let root = reread.root();
        assert_eq!(root.verbatim_value(), Some("  padded  "), "{text}");
        assert_eq!(root.attribute("a").verbatim_value(), Some(" x\ty\n "));
        assert_eq!(root.child("blank").verbatim_value(), Some("   "));
        assert_eq!(root.child("tricky").verbatim_value(), Some("\n a]]>b "));
        assert!(reread.navigate("/tricky/leaf").unwrap().exists());
    }

    #[test]
    fn test_indentation_between_children_is_not_a_value() {
        let conf = parse("<r>\n  <a/>\n  <b>\n    <c/>\n  </b>\n</r>").unwrap();
        assert_eq!(conf.root().verbatim_value(), None);
        assert_eq!(conf.root().child("b").verbatim_value(), None);
    }

    #[test]
    fn test_write_rejects_unrepresentable() {
        let mut conf = Configuration::with_root("r");
        let root = conf.root_id();
        conf.add_attribute(root, "a", Some("1")).unwrap();
        conf.add_attribute(root, "a", Some("2")).unwrap();
        assert!(matches!(write(conf.root()), Err(ConfigError::WriteError { .. })));

        let conf = Configuration::with_root("has space");
        assert!(matches!(write(conf.root()), Err(ConfigError::WriteError { .. })));
    }

    #[test]
    fn test_rejects_bad_documents() {
        for bad in ["", "<a>", "<a></a><b/>", "text", "<a></b>"] {
            assert!(
                matches!(parse(bad), Err(ConfigError::ParseError { .. })),
                "{bad:?} should fail"
            );
        }
    }
}
