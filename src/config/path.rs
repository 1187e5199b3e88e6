//! Path navigation over the configuration tree.
//!
//! Grammar:
//!
//! ```text
//! expr        := ['!'] alternative ((';' | '|') alternative)*
//! alternative := ['/'] segment ('/' segment)*
//! segment     := '.' | '..' | '$' name | '$[' n ']' | [name] ['[' selector ']']
//! selector    := n | attr '=' value
//! ```
//!
//! Alternatives are tried left to right and the first existing node wins.
//! Absence yields `None` unless the expression starts with `!`.

use super::resolve::Evaluator;
use super::tree::{Configuration, NodeId};
use super::ConfigError;

#[derive(Debug, PartialEq)]
enum Segment<'p> {
    Current,
    Parent,
    Section {
        name: Option<&'p str>,
        selector: Option<Selector<'p>>,
    },
    AttributeByName(&'p str),
    AttributeAt(usize),
}

#[derive(Debug, PartialEq)]
enum Selector<'p> {
    Index(usize),
    Match { attr: &'p str, value: &'p str },
}

/// Resolves `expr` starting at `from`.
pub(crate) fn navigate(
    evaluator: &mut Evaluator<'_>,
    from: Option<NodeId>,
    expr: &str,
) -> Result<Option<NodeId>, ConfigError> {
    let trimmed = expr.trim();
    let (required, body) = match trimmed.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    for alternative in split_outside_brackets(body, &[';', '|']) {
        let alternative = alternative.trim();
        if alternative.is_empty() {
            continue;
        }
        if let Some(id) = resolve_alternative(evaluator, from, alternative)? {
            return Ok(Some(id));
        }
    }

    if required {
        Err(ConfigError::NavigationFailed(expr.to_string()))
    } else {
        Ok(None)
    }
}

fn resolve_alternative(
    evaluator: &mut Evaluator<'_>,
    from: Option<NodeId>,
    path: &str,
) -> Result<Option<NodeId>, ConfigError> {
    let conf = evaluator.configuration();
    let mut current = if path.starts_with('/') {
        Some(conf.root_id())
    } else {
        from
    };

    // Parse everything up front so malformed paths fail even when an
    // earlier segment is already absent.
    let segments = split_outside_brackets(path, &['/'])
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_segment(path, s))
        .collect::<Result<Vec<_>, _>>()?;

    for segment in segments {
        let Some(id) = current else {
            return Ok(None);
        };
        current = step(evaluator, id, &segment)?;
    }

    Ok(current)
}

fn step(
    evaluator: &mut Evaluator<'_>,
    id: NodeId,
    segment: &Segment<'_>,
) -> Result<Option<NodeId>, ConfigError> {
    let conf = evaluator.configuration();
    let Some(node) = conf.live(id) else {
        return Ok(None);
    };

    match segment {
        Segment::Current => Ok(Some(id)),
        Segment::Parent => Ok(node.parent),
        Segment::AttributeByName(name) => Ok(node
            .attributes()
            .iter()
            .copied()
            .find(|a| name_matches(conf, *a, name))),
        Segment::AttributeAt(index) => Ok(node.attributes().get(*index).copied()),
        Segment::Section { name, selector } => {
            let mut candidates = node
                .children()
                .iter()
                .copied()
                .filter(|c| name.map_or(true, |n| name_matches(conf, *c, n)));

            match selector {
                None => Ok(candidates.next()),
                Some(Selector::Index(index)) => Ok(candidates.nth(*index)),
                Some(Selector::Match { attr, value }) => {
                    let candidates: Vec<NodeId> = candidates.collect();
                    for candidate in candidates {
                        let attr_id = conf.live(candidate).and_then(|c| {
                            c.attributes()
                                .iter()
                                .copied()
                                .find(|a| name_matches(conf, *a, attr))
                        });
                        if let Some(attr_id) = attr_id {
                            let actual = evaluator.node_value(attr_id)?;
                            if actual.as_deref().unwrap_or("") == *value {
                                return Ok(Some(candidate));
                            }
                        }
                    }
                    Ok(None)
                }
            }
        }
    }
}

fn name_matches(conf: &Configuration, id: NodeId, name: &str) -> bool {
    conf.live(id)
        .is_some_and(|n| n.name.eq_ignore_ascii_case(name))
}

/// Splits on any of `separators` outside of brackets and quotes.
fn split_outside_brackets<'e>(expr: &'e str, separators: &[char]) -> Vec<&'e str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, ch) in expr.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if depth > 0 => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, c) if depth == 0 && separators.contains(&c) => {
                parts.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expr[start..]);
    parts
}

fn parse_segment<'p>(path: &str, segment: &'p str) -> Result<Segment<'p>, ConfigError> {
    let malformed = |reason: &str| ConfigError::MalformedPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    match segment {
        "." => return Ok(Segment::Current),
        ".." => return Ok(Segment::Parent),
        _ => {}
    }

    if let Some(attr) = segment.strip_prefix('$') {
        let attr = attr.trim();
        if let Some(inner) = attr.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| malformed("unclosed '[' after '$'"))?;
            let index = inner
                .trim()
                .parse::<usize>()
                .map_err(|_| malformed("attribute indexer must be a number"))?;
            return Ok(Segment::AttributeAt(index));
        }
        if attr.is_empty() {
            return Err(malformed("missing attribute name after '$'"));
        }
        if attr.contains(['[', ']']) {
            return Err(malformed("attribute names cannot carry a selector"));
        }
        return Ok(Segment::AttributeByName(attr));
    }

    let (name, selector) = match segment.find('[') {
        None => {
            if segment.contains(']') {
                return Err(malformed("unexpected ']'"));
            }
            (segment, None)
        }
        Some(open) => {
            let inner = segment[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| malformed("unclosed '['"))?;
            (&segment[..open], Some(parse_selector(inner).ok_or_else(|| {
                malformed("selector must be an index or attr=value")
            })?))
        }
    };

    let name = name.trim();
    Ok(Segment::Section {
        name: (!name.is_empty()).then_some(name),
        selector,
    })
}

fn parse_selector(inner: &str) -> Option<Selector<'_>> {
    match inner.split_once('=') {
        Some((attr, value)) => {
            let attr = attr.trim().trim_start_matches('$').trim();
            if attr.is_empty() {
                return None;
            }
            Some(Selector::Match {
                attr,
                value: unquote(value.trim()),
            })
        }
        None => inner.trim().parse().ok().map(Selector::Index),
    }
}

fn unquote(value: &str) -> &str {
    for q in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Computes the canonical absolute path of a live node.
///
/// Same-named siblings get a `name[k]` indexer; names that cannot be
/// written as a plain segment fall back to the positional `[n]` form.
pub(crate) fn root_path(conf: &Configuration, id: NodeId) -> String {
    let Some(node) = conf.live(id) else {
        return String::new();
    };
    let Some(parent_id) = node.parent else {
        return "/".to_string();
    };
    let Some(parent) = conf.live(parent_id) else {
        return String::new();
    };

    let mut path = root_path(conf, parent_id);
    if !path.ends_with('/') {
        path.push('/');
    }

    if node.is_section() {
        let siblings = parent.children();
        let position = siblings.iter().position(|c| *c == id).unwrap_or(0);
        if !is_plain_name(&node.name) {
            path.push_str(&format!("[{position}]"));
            return path;
        }
        let same: Vec<NodeId> = siblings
            .iter()
            .copied()
            .filter(|c| name_matches(conf, *c, &node.name))
            .collect();
        path.push_str(&node.name);
        if same.len() > 1 {
            let k = same.iter().position(|c| *c == id).unwrap_or(0);
            path.push_str(&format!("[{k}]"));
        }
    } else {
        let siblings = parent.attributes();
        let unique = siblings
            .iter()
            .filter(|a| name_matches(conf, **a, &node.name))
            .count()
            == 1;
        if unique && is_plain_name(&node.name) {
            path.push('$');
            path.push_str(&node.name);
        } else {
            let position = siblings.iter().position(|a| *a == id).unwrap_or(0);
            path.push_str(&format!("$[{position}]"));
        }
    }
    path
}

fn is_plain_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && !name.starts_with('$')
        && !name.starts_with('!')
        && !name.contains(['/', '[', ']', ';', '|'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Configuration {
        let mut conf = Configuration::new();
        let root = conf.root_id();
        let servers = conf.add_section(root, "servers", None).unwrap();
        let a = conf.add_section(servers, "server", None).unwrap();
        conf.add_attribute(a, "name", Some("alpha")).unwrap();
        conf.add_attribute(a, "port", Some("80")).unwrap();
        let b = conf.add_section(servers, "server", None).unwrap();
        conf.add_attribute(b, "name", Some("beta")).unwrap();
        conf.add_attribute(b, "port", Some("$(/defaults/$port)")).unwrap();
        let defaults = conf.add_section(root, "defaults", None).unwrap();
        conf.add_attribute(defaults, "port", Some("8080")).unwrap();
        conf
    }

    #[test]
    fn test_absolute_and_relative() {
        let conf = sample();
        let servers = conf.navigate("/servers").unwrap();
        assert!(servers.exists());

        let first = servers.navigate("server").unwrap();
        assert_eq!(first.attribute("name").verbatim_value(), Some("alpha"));
        assert_eq!(first.navigate("..").unwrap(), servers);
        assert_eq!(first.navigate(".").unwrap(), first);
        assert_eq!(first.navigate("../../defaults/$port").unwrap().verbatim_value(), Some("8080"));
    }

    #[test]
    fn test_indexers() {
        let conf = sample();
        let beta = conf.navigate("/servers/server[1]").unwrap();
        assert_eq!(beta.attribute("name").verbatim_value(), Some("beta"));
        assert_eq!(conf.navigate("/[1]").unwrap().name(), "defaults");
        assert_eq!(conf.navigate("/servers/server[1]/$[1]").unwrap().name(), "port");
        assert!(!conf.navigate("/servers/server[5]").unwrap().exists());
    }

    #[test]
    fn test_attribute_filter_uses_evaluated_value() {
        let conf = sample();
        let beta = conf.navigate("/servers/server[name=beta]").unwrap();
        assert_eq!(beta.name(), "server");
        let by_port = conf.navigate("/servers/server[port='8080']").unwrap();
        assert_eq!(by_port, beta);
    }

    #[test]
    fn test_coalescing_alternatives() {
        let conf = sample();
        let node = conf.navigate("/missing/$x ; /nope | /defaults/$port").unwrap();
        assert_eq!(node.verbatim_value(), Some("8080"));
        assert!(!conf.navigate("/a;/b|/c").unwrap().exists());
    }

    #[test]
    fn test_selector_values_may_contain_separators() {
        let mut conf = Configuration::new();
        let root = conf.root_id();
        for (url, port) in [("http://a", "1"), ("http://b", "2"), ("x;y|z", "3")] {
            let svc = conf.add_section(root, "svc", None).unwrap();
            conf.add_attribute(svc, "url", Some(url)).unwrap();
            conf.add_attribute(svc, "port", Some(port)).unwrap();
        }

        let port = conf.navigate("/svc[url=http://b]/$port").unwrap();
        assert_eq!(port.verbatim_value(), Some("2"));
        let port = conf.navigate("/svc[url='x;y|z']/$port").unwrap();
        assert_eq!(port.verbatim_value(), Some("3"));
        let port = conf.navigate("/svc[url=http://c]/$port ; /svc[url=\"http://a\"]/$port").unwrap();
        assert_eq!(port.verbatim_value(), Some("1"));
    }

    #[test]
    fn test_required_navigation() {
        let conf = sample();
        assert!(matches!(
            conf.navigate("!/missing"),
            Err(ConfigError::NavigationFailed(_))
        ));
        assert!(conf.navigate("!/missing;/defaults").unwrap().exists());
    }

    #[test]
    fn test_whitespace_is_insignificant() {
        let conf = sample();
        let node = conf.navigate("  / servers / server [1] / $name ").unwrap();
        assert_eq!(node.verbatim_value(), Some("beta"));
    }

    #[test]
    fn test_malformed_paths() {
        let conf = sample();
        for bad in ["/servers/server[1", "/a]b", "/$", "/$[x]", "/servers/server[]"] {
            assert!(
                matches!(conf.navigate(bad), Err(ConfigError::MalformedPath { .. })),
                "{bad} should be malformed"
            );
        }
    }

    #[test]
    fn test_root_paths() {
        let conf = sample();
        assert_eq!(conf.root().root_path(), "/");
        let beta = conf.navigate("/servers/server[1]").unwrap();
        assert_eq!(beta.root_path(), "/servers/server[1]");
        assert_eq!(beta.attribute("port").root_path(), "/servers/server[1]/$port");
        assert_eq!(conf.navigate("/defaults").unwrap().root_path(), "/defaults");
    }

    #[test]
    fn test_root_path_round_trips_for_odd_names() {
        let mut conf = Configuration::new();
        let root = conf.root_id();
        let odd = conf.add_section(root, "section_$(/$i)", None).unwrap();
        let attr = conf.add_attribute(odd, "a/b", Some("1")).unwrap();

        for id in [odd, attr] {
            let path = conf.node(id).root_path();
            assert_eq!(conf.navigate(&path).unwrap().id(), Some(id), "{path}");
        }
    }
}
