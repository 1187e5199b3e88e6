//! Read-only handle over a node of a [`Configuration`].

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;

use super::bind;
use super::path;
use super::resolve::Evaluator;
use super::tree::{Configuration, NodeData, NodeId};
use super::ConfigError;

/// A borrowed view of a section or attribute.
///
/// Failed lookups return the *non-existent* node instead of an error, so
/// lookups can be chained freely:
///
/// ```
/// use dragon_conf::Configuration;
///
/// let conf = Configuration::new();
/// let missing = conf.root().child("a").child("b").attribute("c");
/// assert!(!missing.exists());
/// assert_eq!(missing.value().unwrap(), None);
/// ```
#[derive(Clone, Copy)]
pub struct Node<'a> {
    conf: &'a Configuration,
    id: Option<NodeId>,
}

impl<'a> Node<'a> {
    pub(crate) fn new(conf: &'a Configuration, id: Option<NodeId>) -> Self {
        Self { conf, id }
    }

    fn data(&self) -> Option<&'a NodeData> {
        self.id.and_then(|id| self.conf.live(id))
    }

    fn wrap(&self, id: Option<NodeId>) -> Node<'a> {
        Node::new(self.conf, id)
    }

    pub fn configuration(&self) -> &'a Configuration {
        self.conf
    }

    /// False only for the shared non-existent node.
    pub fn exists(&self) -> bool {
        self.data().is_some()
    }

    pub fn id(&self) -> Option<NodeId> {
        self.data().and(self.id)
    }

    /// Returns the id, failing for the non-existent node.
    ///
    /// Use before handing the node to a mutating `Configuration` method.
    pub fn require(&self) -> Result<NodeId, ConfigError> {
        self.id().ok_or_else(|| {
            ConfigError::NonExistentNode("cannot operate on a non-existent node".to_string())
        })
    }

    pub fn is_section(&self) -> bool {
        self.data().is_some_and(NodeData::is_section)
    }

    pub fn is_attribute(&self) -> bool {
        self.data().is_some_and(|d| !d.is_section())
    }

    /// The node name, or an empty string for the non-existent node.
    pub fn name(&self) -> &'a str {
        self.data().map(|d| d.name.as_str()).unwrap_or("")
    }

    /// The raw stored value, without variable substitution.
    pub fn verbatim_value(&self) -> Option<&'a str> {
        self.data().and_then(|d| d.value.as_deref())
    }

    /// The value with every `$(...)` variable substituted.
    ///
    /// Computed on every call.
    pub fn value(&self) -> Result<Option<String>, ConfigError> {
        match self.id() {
            Some(id) => Evaluator::new(self.conf).node_value(id),
            None => Ok(None),
        }
    }

    /// Substitutes variables in arbitrary text as if it were this node's value.
    pub fn evaluate(&self, text: &str) -> Result<String, ConfigError> {
        let context = if self.is_attribute() {
            self.parent().id()
        } else {
            self.id()
        };
        Evaluator::new(self.conf).evaluate_text(context, text)
    }

    /// The evaluated value, or `default` when absent.
    pub fn value_or(&self, default: &str) -> Result<String, ConfigError> {
        Ok(self.value()?.unwrap_or_else(|| default.to_string()))
    }

    /// Parses the evaluated value as `T`. Absent values yield `Ok(None)`.
    pub fn value_as<T>(&self) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.value()? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidValue {
                    path: self.root_path(),
                    reason: format!("'{raw}': {e}"),
                }),
        }
    }

    /// Deserializes the evaluated subtree into `T`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        bind::bind_node(*self)
    }

    pub fn modified(&self) -> bool {
        self.data().is_some_and(|d| d.modified)
    }

    pub fn parent(&self) -> Node<'a> {
        self.wrap(self.data().and_then(|d| d.parent))
    }

    pub fn children(&self) -> impl Iterator<Item = Node<'a>> + 'a {
        let conf = self.conf;
        self.data()
            .map(NodeData::children)
            .unwrap_or(&[])
            .iter()
            .map(move |id| Node::new(conf, Some(*id)))
    }

    pub fn attributes(&self) -> impl Iterator<Item = Node<'a>> + 'a {
        let conf = self.conf;
        self.data()
            .map(NodeData::attributes)
            .unwrap_or(&[])
            .iter()
            .map(move |id| Node::new(conf, Some(*id)))
    }

    pub fn child_count(&self) -> usize {
        self.data().map_or(0, |d| d.children().len())
    }

    pub fn attribute_count(&self) -> usize {
        self.data().map_or(0, |d| d.attributes().len())
    }

    /// First child section whose name matches case-insensitively.
    pub fn child(&self, name: &str) -> Node<'a> {
        self.children()
            .find(|c| c.is_named(name))
            .unwrap_or_else(|| self.wrap(None))
    }

    pub fn child_at(&self, index: usize) -> Node<'a> {
        self.wrap(self.data().and_then(|d| d.children().get(index).copied()))
    }

    /// First attribute whose name matches case-insensitively.
    pub fn attribute(&self, name: &str) -> Node<'a> {
        self.attributes()
            .find(|a| a.is_named(name))
            .unwrap_or_else(|| self.wrap(None))
    }

    pub fn attribute_at(&self, index: usize) -> Node<'a> {
        self.wrap(self.data().and_then(|d| d.attributes().get(index).copied()))
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.exists() && self.name().eq_ignore_ascii_case(name.trim())
    }

    /// Resolves a path expression relative to this node.
    ///
    /// Absence yields the non-existent node; only a `!`-prefixed expression
    /// or a malformed path produces an error.
    pub fn navigate(&self, path: &str) -> Result<Node<'a>, ConfigError> {
        let mut evaluator = Evaluator::new(self.conf);
        let id = path::navigate(&mut evaluator, self.id(), path)?;
        Ok(self.wrap(id))
    }

    /// Canonical absolute path of this node. Empty for the non-existent node.
    pub fn root_path(&self) -> String {
        match self.id() {
            Some(id) => path::root_path(self.conf, id),
            None => String::new(),
        }
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.exists() {
            return f.write_str("Node(<non-existent>)");
        }
        f.debug_struct("Node")
            .field("path", &self.root_path())
            .field("value", &self.verbatim_value())
            .finish()
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.conf, other.conf) && self.id() == other.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_shared_and_inert() {
        let conf = Configuration::new();
        let missing = conf.root().child("nope");

        assert!(!missing.exists());
        assert_eq!(missing.name(), "");
        assert_eq!(missing.verbatim_value(), None);
        assert_eq!(missing.child_count(), 0);
        assert!(!missing.parent().exists());
        assert!(missing.require().is_err());
        assert_eq!(missing, conf.root().attribute("nope"));
    }

    #[test]
    fn test_value_as_parses() {
        let mut conf = Configuration::new();
        let root = conf.root_id();
        conf.add_attribute(root, "port", Some("8080")).unwrap();
        conf.add_attribute(root, "bad", Some("eighty")).unwrap();

        assert_eq!(conf.root().attribute("port").value_as::<u16>().unwrap(), Some(8080));
        assert!(conf.root().attribute("bad").value_as::<u16>().is_err());
        assert_eq!(conf.root().attribute("none").value_as::<u16>().unwrap(), None);
    }

    #[test]
    fn test_literal_value_is_verbatim() {
        let mut conf = Configuration::new();
        let root = conf.root_id();
        let id = conf.add_attribute(root, "a", Some("plain $ text (x)")).unwrap();

        let node = conf.node(id);
        assert_eq!(node.value().unwrap().as_deref(), node.verbatim_value());
    }
}
