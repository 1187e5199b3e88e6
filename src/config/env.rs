//! Environment access: the `$(~NAME)` resolver boundary and the
//! prefix-mapped environment source used by the builder.

use std::collections::HashMap;

use tracing::trace;

use super::source::ConfigSource;
use super::tree::Configuration;
use super::ConfigError;

/// Resolves `$(~NAME)` references.
///
/// Absence is not an error: `None` evaluates to an empty string (or lets a
/// chained `default` macro supply a fallback).
pub trait EnvResolver: Send + Sync + std::fmt::Debug {
    fn try_resolve(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEnvResolver;

impl EnvResolver for OsEnvResolver {
    fn try_resolve(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables, handy for tests and sandboxed evaluation.
#[derive(Debug, Clone, Default)]
pub struct MapEnvResolver {
    vars: HashMap<String, String>,
}

impl MapEnvResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for MapEnvResolver {
    fn from(pairs: [(K, V); N]) -> Self {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvResolver for MapEnvResolver {
    fn try_resolve(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Maps prefixed environment variables onto a configuration tree.
///
/// `MYAPP__DATABASE__HOST=db` with prefix `MYAPP` and separator `__`
/// becomes attribute `host` of section `database`. Path segments are
/// lower-cased.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
    separator: String,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        let separator = separator.into();
        assert!(!separator.is_empty(), "separator must not be empty");
        Self {
            prefix: prefix.into(),
            separator,
        }
    }

    fn load_from<I>(&self, vars: I) -> Result<Configuration, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix_with_sep = format!("{}{}", self.prefix, self.separator);
        let mut conf = Configuration::new();

        for (key, value) in vars {
            let Some(path_str) = key.strip_prefix(&prefix_with_sep) else {
                continue;
            };
            let path: Vec<String> = path_str
                .split(&self.separator)
                .map(|s| s.trim().to_lowercase())
                .collect();
            let Some((attr, sections)) = path.split_last() else {
                continue;
            };
            if attr.is_empty() || sections.iter().any(|s| s.is_empty()) {
                continue;
            }

            let mut section = conf.root_id();
            for name in sections {
                let existing = conf.node(section).child(name).id();
                section = match existing {
                    Some(existing) => existing,
                    None => conf.add_section(section, name, None)?,
                };
            }
            trace!(variable = %key, "mapped environment variable");
            let existing = conf.node(section).attribute(attr).id();
            match existing {
                Some(existing) => conf.set_value(existing, Some(&value))?,
                None => {
                    conf.add_attribute(section, attr, Some(&value))?;
                }
            }
        }

        conf.reset_modified();
        Ok(conf)
    }
}

impl ConfigSource for EnvSource {
    fn load(&self) -> Result<Option<Configuration>, ConfigError> {
        self.load_from(std::env::vars()).map(Some)
    }
}
