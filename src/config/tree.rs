//! The configuration tree: an arena of sections and attributes owned by a
//! single [`Configuration`].
//!
//! Nodes are addressed by [`NodeId`]. Reads go through the borrowed
//! [`Node`] handle; every structural mutation goes through the
//! `Configuration` itself so that the read-only flag and modification
//! tracking are enforced in one place.

use std::sync::Arc;

use super::env::{EnvResolver, OsEnvResolver};
use super::macros::{BuiltinMacros, MacroProvider};
use super::node::Node;
use super::path;
use super::ConfigError;

/// Name given to the root section of an empty configuration.
pub const DEFAULT_ROOT_NAME: &str = "configuration";

/// Stable identity of a node within its owning [`Configuration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Section {
        children: Vec<NodeId>,
        attributes: Vec<NodeId>,
    },
    Attribute,
}

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub(crate) name: String,
    pub(crate) value: Option<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) modified: bool,
    pub(crate) deleted: bool,
}

impl NodeData {
    pub(crate) fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Section { children, .. } => children,
            NodeKind::Attribute => &[],
        }
    }

    pub(crate) fn attributes(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Section { attributes, .. } => attributes,
            NodeKind::Attribute => &[],
        }
    }

    pub(crate) fn is_section(&self) -> bool {
        matches!(self.kind, NodeKind::Section { .. })
    }
}

/// A mutable tree of named sections and attributes.
///
/// A configuration owns exactly one root section. It is mutable until
/// [`freeze`](Self::freeze) is called; after that every mutation fails with
/// [`ConfigError::ReadOnly`].
///
/// Reading a value evaluates `$(...)` variables on every call, so the tree
/// may be freely mutated between reads.
///
/// ## Example
///
/// ```
/// use dragon_conf::Configuration;
///
/// let mut conf = Configuration::new();
/// let root = conf.root_id();
/// let db = conf.add_section(root, "db", None)?;
/// conf.add_attribute(db, "host", Some("localhost"))?;
/// conf.add_attribute(db, "url", Some("tcp://$($host):5432"))?;
///
/// let url = conf.navigate("/db/$url")?.value()?;
/// assert_eq!(url.as_deref(), Some("tcp://localhost:5432"));
/// # Ok::<(), dragon_conf::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Configuration {
    nodes: Vec<NodeData>,
    root: NodeId,
    read_only: bool,
    env: Arc<dyn EnvResolver>,
    macros: Arc<dyn MacroProvider>,
    type_search_paths: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    /// Creates an empty configuration whose root is named `configuration`.
    pub fn new() -> Self {
        Self::with_root(DEFAULT_ROOT_NAME)
    }

    /// Creates an empty configuration with the given root name.
    ///
    /// Invalid (blank) names fall back to the default root name.
    pub fn with_root(name: &str) -> Self {
        let name = match validate_name(name) {
            Ok(name) => name.to_string(),
            Err(_) => DEFAULT_ROOT_NAME.to_string(),
        };
        Self {
            nodes: vec![NodeData {
                name,
                value: None,
                parent: None,
                kind: NodeKind::Section {
                    children: Vec::new(),
                    attributes: Vec::new(),
                },
                modified: false,
                deleted: false,
            }],
            root: NodeId(0),
            read_only: false,
            env: Arc::new(OsEnvResolver),
            macros: Arc::new(BuiltinMacros::new()),
            type_search_paths: Vec::new(),
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Returns the root section.
    pub fn root(&self) -> Node<'_> {
        Node::new(self, Some(self.root))
    }

    /// Returns a handle for `id`, or the non-existent node if `id` was deleted.
    pub fn node(&self, id: NodeId) -> Node<'_> {
        Node::new(self, self.live(id).map(|_| id))
    }

    /// Navigates from the root section. See [`Node::navigate`].
    pub fn navigate(&self, path: &str) -> Result<Node<'_>, ConfigError> {
        self.root().navigate(path)
    }

    pub fn env_resolver(&self) -> &Arc<dyn EnvResolver> {
        &self.env
    }

    pub fn set_env_resolver(&mut self, resolver: Arc<dyn EnvResolver>) {
        self.env = resolver;
    }

    pub fn macro_provider(&self) -> &Arc<dyn MacroProvider> {
        &self.macros
    }

    pub fn set_macro_provider(&mut self, provider: Arc<dyn MacroProvider>) {
        self.macros = provider;
    }

    /// Namespaces searched when a binding layer instantiates types by name.
    pub fn type_search_paths(&self) -> &[String] {
        &self.type_search_paths
    }

    pub fn set_type_search_paths(&mut self, paths: Vec<String>) {
        self.type_search_paths = paths;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Makes the configuration read-only. There is no way back.
    pub fn freeze(&mut self) {
        self.read_only = true;
    }

    /// A deep copy that is writable even if `self` is frozen.
    pub(crate) fn unfrozen_copy(&self) -> Configuration {
        let mut copy = self.clone();
        copy.read_only = false;
        copy
    }

    /// True if any live node was modified since the last reset.
    pub fn is_modified(&self) -> bool {
        self.nodes.iter().any(|n| !n.deleted && n.modified)
    }

    /// Clears the modified flag on every node.
    pub fn reset_modified(&mut self) {
        for node in &mut self.nodes {
            node.modified = false;
        }
    }

    /// Appends a child section to `parent`.
    pub fn add_section(
        &mut self,
        parent: NodeId,
        name: &str,
        value: Option<&str>,
    ) -> Result<NodeId, ConfigError> {
        self.append(parent, name, value, true)
    }

    /// Appends an attribute to `section`.
    pub fn add_attribute(
        &mut self,
        section: NodeId,
        name: &str,
        value: Option<&str>,
    ) -> Result<NodeId, ConfigError> {
        self.append(section, name, value, false)
    }

    /// Replaces the verbatim value of a section or attribute.
    pub fn set_value(&mut self, id: NodeId, value: Option<&str>) -> Result<(), ConfigError> {
        self.check_writable()?;
        let node = self.live_mut(id)?;
        node.value = value.map(str::to_string);
        node.modified = true;
        Ok(())
    }

    pub fn rename(&mut self, id: NodeId, name: &str) -> Result<(), ConfigError> {
        self.check_writable()?;
        let name = validate_name(name)?.to_string();
        let node = self.live_mut(id)?;
        node.name = name;
        node.modified = true;
        Ok(())
    }

    /// Detaches a node (and its whole subtree) from the tree.
    ///
    /// The root section cannot be deleted.
    pub fn delete(&mut self, id: NodeId) -> Result<(), ConfigError> {
        self.check_writable()?;
        let parent = self.live(id).ok_or_else(|| self.missing(id))?.parent;
        let Some(parent) = parent else {
            return Err(ConfigError::NonExistentNode(
                "the root section cannot be deleted".to_string(),
            ));
        };

        let parent_node = self.live_mut(parent)?;
        if let NodeKind::Section {
            children,
            attributes,
        } = &mut parent_node.kind
        {
            children.retain(|c| *c != id);
            attributes.retain(|a| *a != id);
        }
        parent_node.modified = true;
        self.mark_deleted(id);
        Ok(())
    }

    /// Removes every attribute and child section of `section`.
    pub fn clear(&mut self, section: NodeId) -> Result<(), ConfigError> {
        self.check_writable()?;
        let (children, attributes) = {
            let node = self.section_data(section)?;
            (node.children().to_vec(), node.attributes().to_vec())
        };
        for id in children.into_iter().chain(attributes) {
            self.mark_deleted(id);
        }
        let node = self.live_mut(section)?;
        if let NodeKind::Section {
            children,
            attributes,
        } = &mut node.kind
        {
            children.clear();
            attributes.clear();
        }
        node.modified = true;
        Ok(())
    }

    /// Deep-copies `node` of `other` under `parent`, returning the new id.
    ///
    /// This is the only way content moves between two configurations.
    pub fn import(
        &mut self,
        parent: NodeId,
        other: &Configuration,
        node: NodeId,
    ) -> Result<NodeId, ConfigError> {
        let data = other.live(node).ok_or_else(|| other.missing(node))?;
        match &data.kind {
            NodeKind::Attribute => self.add_attribute(parent, &data.name, data.value.as_deref()),
            NodeKind::Section {
                children,
                attributes,
            } => {
                let id = self.add_section(parent, &data.name, data.value.as_deref())?;
                for attr in attributes {
                    self.import(id, other, *attr)?;
                }
                for child in children {
                    self.import(id, other, *child)?;
                }
                Ok(id)
            }
        }
    }

    /// Replaces name, value, attributes, and children of this configuration's
    /// root with a copy of `other`'s root.
    pub fn import_root(&mut self, other: &Configuration) -> Result<(), ConfigError> {
        let root = self.root;
        let source = other.root();
        self.clear(root)?;
        self.rename(root, source.name())?;
        self.set_value(root, source.verbatim_value())?;
        for attr in source.attributes() {
            self.import(root, other, attr.require()?)?;
        }
        for child in source.children() {
            self.import(root, other, child.require()?)?;
        }
        Ok(())
    }

    pub(crate) fn live(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).filter(|n| !n.deleted)
    }

    pub(crate) fn section_data(&self, id: NodeId) -> Result<&NodeData, ConfigError> {
        let node = self.live(id).ok_or_else(|| self.missing(id))?;
        if node.is_section() {
            Ok(node)
        } else {
            Err(ConfigError::NotASection(path::root_path(self, id)))
        }
    }

    fn live_mut(&mut self, id: NodeId) -> Result<&mut NodeData, ConfigError> {
        match self.nodes.get_mut(id.0) {
            Some(node) if !node.deleted => Ok(node),
            _ => Err(ConfigError::NonExistentNode(format!("#{}", id.0))),
        }
    }

    fn missing(&self, id: NodeId) -> ConfigError {
        ConfigError::NonExistentNode(format!("#{}", id.0))
    }

    fn check_writable(&self) -> Result<(), ConfigError> {
        if self.read_only {
            Err(ConfigError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn append(
        &mut self,
        parent: NodeId,
        name: &str,
        value: Option<&str>,
        section: bool,
    ) -> Result<NodeId, ConfigError> {
        self.check_writable()?;
        let name = validate_name(name)?.to_string();
        self.section_data(parent)?;

        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            name,
            value: value.map(str::to_string),
            parent: Some(parent),
            kind: if section {
                NodeKind::Section {
                    children: Vec::new(),
                    attributes: Vec::new(),
                }
            } else {
                NodeKind::Attribute
            },
            modified: true,
            deleted: false,
        });

        let parent_node = self.live_mut(parent)?;
        if let NodeKind::Section {
            children,
            attributes,
        } = &mut parent_node.kind
        {
            if section {
                children.push(id);
            } else {
                attributes.push(id);
            }
        }
        parent_node.modified = true;
        Ok(id)
    }

    fn mark_deleted(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(current.0) {
                node.deleted = true;
                node.parent = None;
                pending.extend_from_slice(node.children());
                pending.extend_from_slice(node.attributes());
            }
        }
    }
}

/// Names must contain at least one non-whitespace character; surrounding
/// whitespace is dropped.
pub(crate) fn validate_name(name: &str) -> Result<&str, ConfigError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(ConfigError::InvalidName(name.to_string()))
    } else {
        Ok(trimmed)
    }
}
