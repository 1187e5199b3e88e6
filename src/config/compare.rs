//! Canonical structural comparison of two subtrees.

use super::node::Node;

/// Compares two subtrees, possibly from different configurations.
///
/// Names compare case-insensitively and verbatim values compare exactly,
/// with an empty value equal to an absent one. Attributes and child sections
/// are compared per name: the relative order of same-named entries matters,
/// the interleaving of differently named entries does not.
pub fn structurally_equal(a: Node<'_>, b: Node<'_>) -> bool {
    if a.exists() != b.exists() {
        return false;
    }
    if !a.exists() {
        return true;
    }
    if a.is_section() != b.is_section() || !a.name().eq_ignore_ascii_case(b.name()) {
        return false;
    }
    if normalized(a.verbatim_value()) != normalized(b.verbatim_value()) {
        return false;
    }
    if a.is_attribute() {
        return true;
    }

    let attrs_a = grouped(a.attributes());
    let attrs_b = grouped(b.attributes());
    let children_a = grouped(a.children());
    let children_b = grouped(b.children());

    attrs_a.len() == attrs_b.len()
        && children_a.len() == children_b.len()
        && attrs_a
            .into_iter()
            .zip(attrs_b)
            .chain(children_a.into_iter().zip(children_b))
            .all(|(x, y)| structurally_equal(x, y))
}

fn normalized(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Stable sort by lower-cased name keeps same-named entries in order.
fn grouped<'a>(nodes: impl Iterator<Item = Node<'a>>) -> Vec<Node<'a>> {
    let mut nodes: Vec<Node<'a>> = nodes.collect();
    nodes.sort_by_cached_key(|n| n.name().to_lowercase());
    nodes
}
