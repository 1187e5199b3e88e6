//! Override/merge engine.
//!
//! Later configurations override earlier ones. Attributes merge by name
//! (source wins, new names appended); child sections merge recursively when
//! they match by name and, if the source carries one, by the value of the
//! match attribute (`name` by default). Each target section may restrict
//! how it is merged through the policy attribute (`_override` by default).

use std::fmt;
use std::str::FromStr;

use tracing::{debug, trace};

use super::node::Node;
use super::path;
use super::tree::{Configuration, NodeId};
use super::ConfigError;

/// Per-section merge strategy, declared on the *target* section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverridePolicy {
    /// Attributes and sections both merge recursively.
    #[default]
    All,
    /// Only attributes (and the section value) merge; children are untouched.
    Attributes,
    /// Only child sections merge.
    Sections,
    /// The source subtree replaces the target subtree.
    Replace,
    /// The source is ignored for this subtree.
    Stop,
    /// A matching source subtree is a merge conflict.
    Fail,
}

impl FromStr for OverridePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "attributes" => Ok(Self::Attributes),
            "sections" => Ok(Self::Sections),
            "replace" => Ok(Self::Replace),
            "stop" => Ok(Self::Stop),
            "fail" => Ok(Self::Fail),
            _ => Err(()),
        }
    }
}

impl fmt::Display for OverridePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Attributes => "attributes",
            Self::Sections => "sections",
            Self::Replace => "replace",
            Self::Stop => "stop",
            Self::Fail => "fail",
        })
    }
}

/// Knobs for [`Configuration::override_by`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRules {
    /// Append source sections that carry no match attribute instead of
    /// merging them into the first same-named target section.
    pub append_sections_without_match_attr: bool,
    /// Attribute whose value identifies same-named sections.
    pub match_attribute: String,
    /// Reserved attribute declaring a section's [`OverridePolicy`].
    pub policy_attribute: String,
}

impl Default for OverrideRules {
    fn default() -> Self {
        Self {
            append_sections_without_match_attr: false,
            match_attribute: "name".to_string(),
            policy_attribute: "_override".to_string(),
        }
    }
}

impl OverrideRules {
    pub fn appending() -> Self {
        Self {
            append_sections_without_match_attr: true,
            ..Self::default()
        }
    }
}

impl Configuration {
    /// Merges `source`'s root into this configuration's root, in place.
    ///
    /// Not transactional: on error the target may be partially merged.
    pub fn override_by(
        &mut self,
        source: &Configuration,
        rules: &OverrideRules,
    ) -> Result<(), ConfigError> {
        let root = self.root_id();
        self.override_section_by(root, source.root(), rules)
    }

    /// Merges `source` (a section of any configuration) into `target`.
    pub fn override_section_by(
        &mut self,
        target: NodeId,
        source: Node<'_>,
        rules: &OverrideRules,
    ) -> Result<(), ConfigError> {
        if !source.is_section() {
            return Err(ConfigError::NotASection(source.root_path()));
        }
        self.section_data(target)?;
        self.merge_section(target, source, rules)
    }

    /// Builds a new configuration by applying `b` onto a deep copy of `a`.
    pub fn create_from_merge(
        a: &Configuration,
        b: &Configuration,
        rules: &OverrideRules,
    ) -> Result<Configuration, ConfigError> {
        let mut merged = a.unfrozen_copy();
        merged.override_by(b, rules)?;
        Ok(merged)
    }

    /// Reads the override policy of a target section.
    pub fn override_policy(
        &self,
        section: NodeId,
        rules: &OverrideRules,
    ) -> Result<OverridePolicy, ConfigError> {
        let attr = self.node(section).attribute(&rules.policy_attribute);
        let Some(value) = attr.value()? else {
            return Ok(OverridePolicy::All);
        };
        value.parse().map_err(|_| ConfigError::InvalidPolicy {
            path: path::root_path(self, section),
            value,
        })
    }

    fn merge_section(
        &mut self,
        target: NodeId,
        source: Node<'_>,
        rules: &OverrideRules,
    ) -> Result<(), ConfigError> {
        let policy = self.override_policy(target, rules)?;
        trace!(path = %path::root_path(self, target), %policy, "merging section");

        match policy {
            OverridePolicy::Stop => {
                debug!(path = %path::root_path(self, target), "override stopped by policy");
                Ok(())
            }
            OverridePolicy::Fail => Err(ConfigError::MergeConflict {
                path: path::root_path(self, target),
                reason: format!(
                    "section declares {}={} but the source overrides it",
                    rules.policy_attribute, policy
                ),
            }),
            OverridePolicy::Replace => {
                debug!(path = %path::root_path(self, target), "replacing section");
                self.clear(target)?;
                self.set_value(target, source.verbatim_value())?;
                self.copy_content(target, source)
            }
            OverridePolicy::Attributes => {
                self.merge_value(target, source)?;
                self.merge_attributes(target, source)
            }
            OverridePolicy::Sections => self.merge_children(target, source, rules),
            OverridePolicy::All => {
                self.merge_value(target, source)?;
                self.merge_attributes(target, source)?;
                self.merge_children(target, source, rules)
            }
        }
    }

    fn merge_value(&mut self, target: NodeId, source: Node<'_>) -> Result<(), ConfigError> {
        match source.verbatim_value() {
            Some(value) if self.node(target).verbatim_value() != Some(value) => {
                self.set_value(target, Some(value))
            }
            _ => Ok(()),
        }
    }

    /// The k-th source attribute of a name overrides the k-th target
    /// attribute of that name; surplus source attributes are appended.
    fn merge_attributes(&mut self, target: NodeId, source: Node<'_>) -> Result<(), ConfigError> {
        let mut seen: Vec<Node<'_>> = Vec::new();
        for attr in source.attributes() {
            let k = seen.iter().filter(|s| s.is_named(attr.name())).count();
            seen.push(attr);
            let existing = self
                .node(target)
                .attributes()
                .filter(|a| a.is_named(attr.name()))
                .nth(k)
                .map(|a| (a.id(), a.verbatim_value() != attr.verbatim_value()));
            match existing {
                Some((Some(id), changed)) => {
                    if changed {
                        self.set_value(id, attr.verbatim_value())?;
                    }
                }
                _ => {
                    self.add_attribute(target, attr.name(), attr.verbatim_value())?;
                }
            }
        }
        Ok(())
    }

    fn merge_children(
        &mut self,
        target: NodeId,
        source: Node<'_>,
        rules: &OverrideRules,
    ) -> Result<(), ConfigError> {
        for child in source.children() {
            match self.find_match(target, child, rules)? {
                Some(matched) => self.merge_section(matched, child, rules)?,
                None => {
                    trace!(name = child.name(), "appending section");
                    self.import(target, child.configuration(), child.require()?)?;
                }
            }
        }
        Ok(())
    }

    fn copy_content(&mut self, target: NodeId, source: Node<'_>) -> Result<(), ConfigError> {
        let from = source.configuration();
        for attr in source.attributes() {
            self.import(target, from, attr.require()?)?;
        }
        for child in source.children() {
            self.import(target, from, child.require()?)?;
        }
        Ok(())
    }

    /// Finds the target child a source section merges into.
    fn find_match(
        &self,
        target: NodeId,
        source: Node<'_>,
        rules: &OverrideRules,
    ) -> Result<Option<NodeId>, ConfigError> {
        let candidates: Vec<Node<'_>> = self
            .node(target)
            .children()
            .filter(|c| c.is_named(source.name()))
            .collect();

        let key = source.attribute(&rules.match_attribute);
        if !key.exists() {
            if rules.append_sections_without_match_attr {
                return Ok(None);
            }
            return Ok(candidates.first().and_then(Node::id));
        }

        let wanted = key.value()?.unwrap_or_default();
        for candidate in candidates {
            let actual = candidate.attribute(&rules.match_attribute).value()?;
            if actual.as_deref() == Some(wanted.as_str()) {
                return Ok(candidate.id());
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::structurally_equal;
    use crate::format::Format;

    fn parse(text: &str) -> Configuration {
        Configuration::parse(text, Format::Laconic).unwrap()
    }

    #[test]
    fn test_default_merge_collapses_same_named_sections() {
        let a = parse("r{ a{} c{} }");
        let b = parse("r{ b{z=1} c{y=2} c{z=3} }");

        let merged = Configuration::create_from_merge(&a, &b, &OverrideRules::default()).unwrap();
        let root = merged.root();
        let names: Vec<&str> = root.children().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
        let c = root.child("c");
        assert_eq!(c.attribute("y").verbatim_value(), Some("2"));
        assert_eq!(c.attribute("z").verbatim_value(), Some("3"));
    }

    #[test]
    fn test_append_without_match_attr() {
        let a = parse("r{ a{} c{} }");
        let b = parse("r{ b{z=1} c{y=2} c{z=3} }");

        let merged = Configuration::create_from_merge(&a, &b, &OverrideRules::appending()).unwrap();
        let names: Vec<&str> = merged.root().children().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a", "c", "b", "c", "c"]);
        assert_eq!(merged.root().child("c").attribute_count(), 0);
    }

    #[test]
    fn test_match_attribute_identity() {
        let a = parse("r{ db{name=main host=a} db{name=audit host=b} }");
        let b = parse("r{ db{name=audit host=c} db{name=cache host=d} }");

        let merged = Configuration::create_from_merge(&a, &b, &OverrideRules::default()).unwrap();
        let root = merged.root();
        assert_eq!(root.child_count(), 3);
        assert_eq!(
            merged.navigate("/db[name=main]/$host").unwrap().verbatim_value(),
            Some("a")
        );
        assert_eq!(
            merged.navigate("/db[name=audit]/$host").unwrap().verbatim_value(),
            Some("c")
        );
        assert_eq!(
            merged.navigate("/db[name=cache]/$host").unwrap().verbatim_value(),
            Some("d")
        );
    }

    #[test]
    fn test_attributes_source_wins_and_order_is_kept() {
        let mut a = parse("r{ x=1 y=2 }");
        let b = parse("r{ y=20 z=30 X=10 }");
        a.override_by(&b, &OverrideRules::default()).unwrap();

        let attrs: Vec<(&str, Option<&str>)> = a
            .root()
            .attributes()
            .map(|n| (n.name(), n.verbatim_value()))
            .collect();
        assert_eq!(
            attrs,
            vec![("x", Some("10")), ("y", Some("20")), ("z", Some("30"))]
        );
    }

    #[test]
    fn test_repeated_attributes_pair_by_position() {
        let attrs = |conf: &Configuration| -> Vec<String> {
            conf.root()
                .attributes()
                .map(|n| format!("{}={}", n.name(), n.verbatim_value().unwrap_or("")))
                .collect()
        };

        let mut a = parse("r{ a=1 b=x a=2 }");
        a.override_by(&parse("r{ A=10 a=20 a=30 }"), &OverrideRules::default())
            .unwrap();
        assert_eq!(attrs(&a), ["a=10", "b=x", "a=20", "a=30"]);

        let mut a = parse("r{ a=1 a=2 a=3 }");
        a.override_by(&parse("r{ a=10 }"), &OverrideRules::default())
            .unwrap();
        assert_eq!(attrs(&a), ["a=10", "a=2", "a=3"]);
    }

    #[test]
    fn test_stop_policy_leaves_section_unchanged() {
        let a = parse("r{ s{_override=stop a=1 k{v=1} } t{a=1} }");
        let b = parse("r{ s=val{ a=2 b=3 k{v=2} extra{} } t{a=2} }");

        let mut merged = a.clone();
        merged.reset_modified();
        merged.override_by(&b, &OverrideRules::default()).unwrap();

        let before = a.navigate("/s").unwrap();
        let after = merged.navigate("/s").unwrap();
        assert!(structurally_equal(before, after));
        assert_eq!(
            Format::Laconic.write_node(before).unwrap(),
            Format::Laconic.write_node(after).unwrap()
        );
        assert!(!after.modified());
        assert_eq!(merged.navigate("/t/$a").unwrap().verbatim_value(), Some("2"));
    }

    #[test]
    fn test_fail_policy_is_a_conflict() {
        let a = parse("r{ s{_override=fail a=1} }");
        let b = parse("r{ s{a=2} }");
        let result = Configuration::create_from_merge(&a, &b, &OverrideRules::default());
        assert!(matches!(result, Err(ConfigError::MergeConflict { .. })));

        // No conflicting source subtree, no error.
        let c = parse("r{ other{} }");
        assert!(Configuration::create_from_merge(&a, &c, &OverrideRules::default()).is_ok());
    }

    #[test]
    fn test_replace_policy() {
        let a = parse("r{ s{_override=replace a=1 k{} } }");
        let b = parse("r{ s=new{ b=2 } }");
        let merged = Configuration::create_from_merge(&a, &b, &OverrideRules::default()).unwrap();

        let s = merged.root().child("s");
        assert_eq!(s.verbatim_value(), Some("new"));
        assert_eq!(s.attribute_count(), 1);
        assert_eq!(s.attribute("b").verbatim_value(), Some("2"));
        assert!(!s.child("k").exists());
    }

    #[test]
    fn test_attributes_and_sections_policies() {
        let a = parse("r{ s{_override=attributes a=1 k{v=1} } t{_override=sections a=1 k{v=1} } }");
        let b = parse("r{ s{a=2 k{v=2}} t{a=2 k{v=2}} }");
        let merged = Configuration::create_from_merge(&a, &b, &OverrideRules::default()).unwrap();

        assert_eq!(merged.navigate("/s/$a").unwrap().verbatim_value(), Some("2"));
        assert_eq!(merged.navigate("/s/k/$v").unwrap().verbatim_value(), Some("1"));
        assert_eq!(merged.navigate("/t/$a").unwrap().verbatim_value(), Some("1"));
        assert_eq!(merged.navigate("/t/k/$v").unwrap().verbatim_value(), Some("2"));
    }

    #[test]
    fn test_invalid_policy() {
        let a = parse("r{ s{_override=sometimes} }");
        let b = parse("r{ s{a=1} }");
        assert!(matches!(
            Configuration::create_from_merge(&a, &b, &OverrideRules::default()),
            Err(ConfigError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_merge_into_frozen_copy_is_allowed() {
        let mut a = parse("r{ x=1 }");
        a.freeze();
        let b = parse("r{ x=2 }");

        let merged = Configuration::create_from_merge(&a, &b, &OverrideRules::default()).unwrap();
        assert_eq!(merged.navigate("/$x").unwrap().verbatim_value(), Some("2"));
        assert!(matches!(
            a.override_by(&b, &OverrideRules::default()),
            Err(ConfigError::ReadOnly)
        ));
    }
}
