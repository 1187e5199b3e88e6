use dragon_conf::{structurally_equal, Configuration, Format, Node, NodeId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Shape {
    name: String,
    value: Option<String>,
    attributes: Vec<(String, Option<String>)>,
    children: Vec<Shape>,
}

/// Mixed-case names plus names that only a positional `[n]` or `$[n]`
/// path segment can reach.
fn name() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => prop_oneof![Just("item".to_string()), Just("Item".to_string())],
        4 => "[a-zA-Z_][a-zA-Z0-9_.-]{0,5}",
        2 => prop_oneof![
            Just(".".to_string()),
            Just("..".to_string()),
            Just("$x".to_string()),
            Just("!bang".to_string()),
            "[a-z]([a-z /;|$!=(){}'\"\\\\\\[\\].-]{0,4}[a-z])?",
        ],
    ]
}

/// Values with surrounding whitespace and characters that need quoting or
/// escaping. `$(` is left out so every value is literal.
fn value() -> impl Strategy<Value = Option<String>> {
    let text = ("[ \t\n]{0,2}", "[a-zA-Z0-9 .:/,=\"'{}\\\\$()\\[\\];|<>&-]{0,10}", "[ \t\n]{0,2}")
        .prop_map(|(lead, body, trail)| format!("{lead}{body}{trail}"))
        .prop_filter("literal values only", |v| !v.contains("$("));
    proptest::option::of(text)
}

/// Short names so that repeated attribute names are common.
fn attributes() -> impl Strategy<Value = Vec<(String, Option<String>)>> {
    let attr_name = prop_oneof![
        Just("a".to_string()),
        Just("A".to_string()),
        Just("b".to_string()),
        name(),
    ];
    prop::collection::vec((attr_name, value()), 0..5)
}

fn section() -> impl Strategy<Value = Shape> {
    let leaf = (name(), value(), attributes()).prop_map(|(name, value, attributes)| Shape {
        name,
        value,
        attributes,
        children: Vec::new(),
    });
    leaf.prop_recursive(3, 24, 4, |inner| {
        (name(), value(), attributes(), prop::collection::vec(inner, 0..4)).prop_map(
            |(name, value, attributes, children)| Shape {
                name,
                value,
                attributes,
                children,
            },
        )
    })
}

fn build(shape: &Shape) -> Configuration {
    fn fill(conf: &mut Configuration, id: NodeId, shape: &Shape) {
        for (name, value) in &shape.attributes {
            conf.add_attribute(id, name, value.as_deref()).unwrap();
        }
        for child in &shape.children {
            let child_id = conf.add_section(id, &child.name, child.value.as_deref()).unwrap();
            fill(conf, child_id, child);
        }
    }

    let mut conf = Configuration::with_root(&shape.name);
    let root = conf.root_id();
    conf.set_value(root, shape.value.as_deref()).unwrap();
    fill(&mut conf, root, shape);
    conf
}

fn all_nodes<'a>(node: Node<'a>, out: &mut Vec<Node<'a>>) {
    out.push(node);
    out.extend(node.attributes());
    for child in node.children() {
        all_nodes(child, out);
    }
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// XML has no syntax for names outside its name grammar or for two
/// attributes of the same name on one element. Null attributes are written
/// as `""`, which the comparer already treats as equal.
fn xml_can_represent(shape: &Shape) -> bool {
    let mut attr_names: Vec<&str> = shape.attributes.iter().map(|(n, _)| n.as_str()).collect();
    attr_names.sort_unstable();
    let unique = attr_names.windows(2).all(|w| w[0] != w[1]);

    unique
        && is_xml_name(&shape.name)
        && attr_names.iter().all(|n| is_xml_name(n))
        && shape.children.iter().all(xml_can_represent)
}

proptest! {
    #[test]
    fn round_trip_through_every_text_format(shape in section()) {
        let conf = build(&shape);
        for format in [Format::Laconic, Format::Json, Format::Xml] {
            if format == Format::Xml && !xml_can_represent(&shape) {
                continue;
            }
            let text = conf.write(format).unwrap();
            let reread = Configuration::parse(&text, format).unwrap();
            prop_assert!(
                structurally_equal(conf.root(), reread.root()),
                "{:?} round trip differs:\n{}",
                format,
                text
            );
        }
    }

    #[test]
    fn root_paths_navigate_back(shape in section()) {
        let conf = build(&shape);
        let mut nodes = Vec::new();
        all_nodes(conf.root(), &mut nodes);

        for node in nodes {
            let path = node.root_path();
            let found = conf.navigate(&path).unwrap();
            prop_assert_eq!(found, node, "path {} resolved elsewhere", path);
            prop_assert_eq!(found.root_path(), path);
        }
    }

    #[test]
    fn literal_values_evaluate_to_themselves(shape in section()) {
        let conf = build(&shape);
        let mut nodes = Vec::new();
        all_nodes(conf.root(), &mut nodes);

        for node in nodes {
            let value = node.value().unwrap();
            prop_assert_eq!(value.as_deref(), node.verbatim_value());
        }
    }
}
