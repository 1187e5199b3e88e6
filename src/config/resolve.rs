//! Variable evaluation for configuration values.
//!
//! Supports `$(expr)` syntax inside any verbatim value, where `expr` is one of:
//!
//! - a path, resolved relative to the referencing node (`$(/db/$host)`, `$(../$port)`);
//! - an environment variable, `$(~HOME)`;
//! - any of the above followed by a macro call, `$(/db/$port::as type=int dflt=5432)`,
//!   or a bare macro call, `$(::now fmt=%Y)`.
//!
//! A leading `!` (`$(!/db/$host)`) makes an unresolved reference an error;
//! otherwise it evaluates to an empty string. Use `$(###)` to produce a
//! literal `$(`.

use super::macros::MacroArgs;
use super::path;
use super::tree::{Configuration, NodeId};
use super::ConfigError;

/// Body of the escape occurrence, `$(###)`.
const ESCAPE: &str = "###";

/// Maximum number of substitutions a single evaluation may perform.
const MAX_SUBSTITUTIONS: usize = 4096;

/// Maximum depth of nested node evaluations.
const MAX_DEPTH: usize = 256;

/// Per-call evaluation state.
///
/// The in-progress stack lives here, never on the nodes, so concurrent
/// readers of one configuration each carry their own. Dropping the
/// evaluator discards whatever is left on it.
pub(crate) struct Evaluator<'a> {
    conf: &'a Configuration,
    stack: Vec<NodeId>,
    substitutions: usize,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(conf: &'a Configuration) -> Self {
        Self {
            conf,
            stack: Vec::new(),
            substitutions: 0,
        }
    }

    pub(crate) fn configuration(&self) -> &'a Configuration {
        self.conf
    }

    /// Evaluates the value of a node.
    pub(crate) fn node_value(&mut self, id: NodeId) -> Result<Option<String>, ConfigError> {
        let Some(node) = self.conf.live(id) else {
            return Ok(None);
        };
        let Some(raw) = node.value.as_deref() else {
            return Ok(None);
        };
        if !raw.contains("$(") {
            return Ok(Some(raw.to_string()));
        }

        if let Some(start) = self.stack.iter().position(|n| *n == id) {
            let cycle = self.stack[start..]
                .iter()
                .chain(std::iter::once(&id))
                .map(|n| path::root_path(self.conf, *n))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ConfigError::RecursiveVariable(cycle));
        }
        if self.stack.len() >= MAX_DEPTH {
            return Err(ConfigError::EvaluationLimit(path::root_path(self.conf, id)));
        }

        // Attributes resolve relative paths against their owning section.
        let context = if node.is_section() {
            Some(id)
        } else {
            node.parent
        };

        self.stack.push(id);
        let result = self.evaluate_text(context, raw);
        self.stack.pop();
        result.map(Some)
    }

    /// Substitutes every `$(...)` occurrence in `text`.
    pub(crate) fn evaluate_text(
        &mut self,
        context: Option<NodeId>,
        text: &str,
    ) -> Result<String, ConfigError> {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("$(") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end =
                closing_paren(after).ok_or_else(|| ConfigError::UnclosedVariable(text.to_string()))?;
            let body = &after[..end];
            rest = &after[end + 1..];

            if body.trim() == ESCAPE {
                result.push_str("$(");
                continue;
            }

            self.substitutions += 1;
            if self.substitutions > MAX_SUBSTITUTIONS {
                return Err(ConfigError::EvaluationLimit(text.to_string()));
            }

            let resolved = self.resolve_variable(context, body)?;
            result.push_str(&resolved);
        }

        result.push_str(rest);
        Ok(result)
    }

    /// Resolves the body of one `$(...)` occurrence.
    fn resolve_variable(
        &mut self,
        context: Option<NodeId>,
        body: &str,
    ) -> Result<String, ConfigError> {
        let (reference, macro_call) = match body.find("::") {
            Some(i) => (&body[..i], Some(&body[i + 2..])),
            None => (body, None),
        };
        let reference = reference.trim();
        let (required, reference) = match reference.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, reference),
        };

        let input = if reference.is_empty() {
            None
        } else if let Some(name) = reference.strip_prefix('~') {
            self.conf.env_resolver().try_resolve(name.trim())
        } else {
            match path::navigate(self, context, reference)? {
                Some(id) => Some(self.node_value(id)?.unwrap_or_default()),
                None => None,
            }
        };

        if required && input.is_none() {
            return Err(ConfigError::RequiredValueMissing {
                reference: reference.to_string(),
                context: context
                    .map(|id| path::root_path(self.conf, id))
                    .unwrap_or_default(),
            });
        }

        match macro_call {
            None => Ok(input.unwrap_or_default()),
            Some(call) => {
                let (name, args) = MacroArgs::parse(call)?;
                self.conf
                    .macro_provider()
                    .invoke(&name, &args, input.as_deref())
            }
        }
    }
}

/// Finds the `)` closing an occurrence whose `$(` was already consumed.
fn closing_paren(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None // Delimiter not found
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::env::MapEnvResolver;

    fn make_conf(attrs: &[(&str, &str)]) -> Configuration {
        let mut conf = Configuration::new();
        let root = conf.root_id();
        for (name, value) in attrs {
            conf.add_attribute(root, name, Some(value)).unwrap();
        }
        conf
    }

    fn value(conf: &Configuration, path: &str) -> Result<Option<String>, ConfigError> {
        conf.navigate(path).unwrap().value()
    }

    #[test]
    fn test_simple_reference() {
        let conf = make_conf(&[("host", "localhost"), ("url", "http://$($host)/api")]);
        assert_eq!(value(&conf, "/$url").unwrap().as_deref(), Some("http://localhost/api"));
    }

    #[test]
    fn test_nested_path() {
        let mut conf = Configuration::new();
        let root = conf.root_id();
        let server = conf.add_section(root, "server", None).unwrap();
        conf.add_attribute(server, "host", Some("example.com")).unwrap();
        conf.add_attribute(server, "port", Some("8080")).unwrap();
        let client = conf.add_section(root, "client", None).unwrap();
        conf.add_attribute(
            client,
            "endpoint",
            Some("https://$(/server/$host):$(../server/$port)"),
        )
        .unwrap();

        assert_eq!(
            value(&conf, "/client/$endpoint").unwrap().as_deref(),
            Some("https://example.com:8080")
        );
    }

    #[test]
    fn test_chained_references() {
        let conf = make_conf(&[("a", "hello"), ("b", "$($a) world"), ("c", "$($b)!")]);
        assert_eq!(value(&conf, "/$c").unwrap().as_deref(), Some("hello world!"));
    }

    #[test]
    fn test_section_value_is_relative_to_itself() {
        let mut conf = Configuration::new();
        let root = conf.root_id();
        let s = conf.add_section(root, "s", Some("[$($x)]")).unwrap();
        conf.add_attribute(s, "x", Some("inner")).unwrap();
        assert_eq!(value(&conf, "/s").unwrap().as_deref(), Some("[inner]"));
    }

    #[test]
    fn test_escape_sequence() {
        let conf = make_conf(&[("value", "use $(###)/path) literally")]);
        assert_eq!(
            value(&conf, "/$value").unwrap().as_deref(),
            Some("use $(/path) literally")
        );
    }

    #[test]
    fn test_circular_reference() {
        let conf = make_conf(&[("a", "$($b)"), ("b", "$($a)")]);

        let err = value(&conf, "/$a").unwrap_err();
        match err {
            ConfigError::RecursiveVariable(cycle) => assert_eq!(cycle, "/$a -> /$b -> /$a"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            value(&conf, "/$b"),
            Err(ConfigError::RecursiveVariable(_))
        ));
        assert_eq!(conf.navigate("/$a").unwrap().verbatim_value(), Some("$($b)"));
    }

    #[test]
    fn test_self_reference() {
        let conf = make_conf(&[("a", "x$($a)")]);
        assert!(matches!(
            value(&conf, "/$a"),
            Err(ConfigError::RecursiveVariable(_))
        ));
    }

    #[test]
    fn test_repeated_reference_is_not_a_cycle() {
        let conf = make_conf(&[("a", "1"), ("b", "$($a)$($a)"), ("c", "$($b)-$($b)")]);
        assert_eq!(value(&conf, "/$c").unwrap().as_deref(), Some("11-11"));
    }

    #[test]
    fn test_stack_is_clean_after_error() {
        let conf = make_conf(&[("a", "$($b)"), ("b", "$($a)"), ("ok", "$($x)"), ("x", "1")]);
        let mut evaluator = Evaluator::new(&conf);
        let a = conf.navigate("/$a").unwrap().require().unwrap();
        let ok = conf.navigate("/$ok").unwrap().require().unwrap();

        assert!(evaluator.node_value(a).is_err());
        assert!(evaluator.stack.is_empty());
        assert_eq!(evaluator.node_value(ok).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_missing_reference_is_empty() {
        let conf = make_conf(&[("url", "[$(/nonexistent/$path)]")]);
        assert_eq!(value(&conf, "/$url").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_required_reference() {
        let conf = make_conf(&[("url", "$(!/nonexistent/$path)")]);
        assert!(matches!(
            value(&conf, "/$url"),
            Err(ConfigError::RequiredValueMissing { .. })
        ));
    }

    #[test]
    fn test_coalescing_reference() {
        let conf = make_conf(&[("fallback", "dflt"), ("v", "$($missing;$fallback)")]);
        assert_eq!(value(&conf, "/$v").unwrap().as_deref(), Some("dflt"));
    }

    #[test]
    fn test_environment_variables() {
        let mut conf = make_conf(&[("home", "$(~HOME)/x"), ("none", "<$(~NOT_SET)>")]);
        conf.set_env_resolver(Arc::new(MapEnvResolver::from([("HOME", "/home/me")])));

        assert_eq!(value(&conf, "/$home").unwrap().as_deref(), Some("/home/me/x"));
        assert_eq!(value(&conf, "/$none").unwrap().as_deref(), Some("<>"));
    }

    #[test]
    fn test_unclosed_variable() {
        let conf = make_conf(&[("a", "$(/b")]);
        assert!(matches!(
            value(&conf, "/$a"),
            Err(ConfigError::UnclosedVariable(_))
        ));
    }

    #[test]
    fn test_macro_chain() {
        let conf = make_conf(&[("port", ""), ("v", "$($port::default dflt=5432)")]);
        assert_eq!(value(&conf, "/$v").unwrap().as_deref(), Some("5432"));
    }

    #[test]
    fn test_unknown_macro() {
        let conf = make_conf(&[("v", "$(::nope)")]);
        assert!(matches!(value(&conf, "/$v"), Err(ConfigError::UnknownMacro(_))));
    }
}
