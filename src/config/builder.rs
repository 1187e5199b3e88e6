use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::env::{EnvResolver, EnvSource};
use super::file::FileSource;
use super::macros::MacroProvider;
use super::merge::OverrideRules;
use super::source::ConfigSource;
use super::tree::Configuration;
use super::ConfigError;
use crate::script::ScriptRunner;

/// Builder for layering configuration from multiple sources.
///
/// Sources are merged in registration order, with later sources overriding
/// earlier ones under the [`OverrideRules`] in effect. Sections can opt out
/// of (or restrict) overriding with the `_override` attribute.
///
/// ## Variable References
///
/// Values can reference other values using `$(path)` syntax, evaluated
/// lazily whenever a value is read:
///
/// ```text
/// app
/// {
///   server { host=localhost port=8080 url="http://$($host):$($port)/api" }
/// }
/// ```
///
/// ## Example
///
/// ```no_run
/// use dragon_conf::Configuration;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct MyConfig {
///     name: String,
///     port: u16,
/// }
///
/// let config: MyConfig = Configuration::builder()
///     .with_file("config/default.laconf", true)
///     .with_file("config/local.json", false)
///     .build_into()?;
/// # Ok::<(), dragon_conf::ConfigError>(())
/// ```
#[derive(Debug, Default)]
#[must_use = "builders do nothing until .build() is called"]
pub struct ConfigurationBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    rules: OverrideRules,
    env_resolver: Option<Arc<dyn EnvResolver>>,
    macros: Option<Arc<dyn MacroProvider>>,
    type_search_paths: Vec<String>,
    script: Option<ScriptRunner>,
    frozen: bool,
}

impl Configuration {
    /// Creates a new configuration builder.
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }
}

impl ConfigurationBuilder {
    /// Adds a configuration file to be loaded.
    ///
    /// If `required` is `true`, the build will fail if the file doesn't exist.
    /// Optional files that are missing are silently skipped.
    ///
    /// Sources are applied in registration order, so later sources override earlier ones.
    pub fn with_file(self, path: impl AsRef<Path>, required: bool) -> Self {
        self.with_source(FileSource::new(path, required))
    }

    /// Loads configuration from environment variables with the given prefix.
    ///
    /// Environment variables are mapped to config paths by:
    /// 1. Removing the prefix and separator
    /// 2. Splitting remaining segments on the separator
    /// 3. Converting path segments to lowercase
    ///
    /// The last segment names an attribute, the others name sections.
    ///
    /// ```no_run
    /// # use dragon_conf::Configuration;
    /// // defaults -> env overrides -> local file overrides env
    /// let conf = Configuration::builder()
    ///     .with_file("config/default.laconf", true)
    ///     .with_env("MYAPP", "__")
    ///     .with_file("config/local.laconf", false)
    ///     .build()?;
    /// # Ok::<(), dragon_conf::ConfigError>(())
    /// ```
    pub fn with_env(self, prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        self.with_source(EnvSource::new(prefix, separator))
    }

    pub fn with_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn with_rules(mut self, rules: OverrideRules) -> Self {
        self.rules = rules;
        self
    }

    /// Resolver used for `$(~NAME)` references in the built configuration.
    pub fn with_env_resolver(mut self, resolver: Arc<dyn EnvResolver>) -> Self {
        self.env_resolver = Some(resolver);
        self
    }

    pub fn with_macro_provider(mut self, provider: Arc<dyn MacroProvider>) -> Self {
        self.macros = Some(provider);
        self
    }

    pub fn with_type_search_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Runs the merged tree through a script runner; the result tree is
    /// what [`build`](Self::build) returns.
    pub fn with_script(mut self, runner: ScriptRunner) -> Self {
        self.script = Some(runner);
        self
    }

    /// Freezes the built configuration.
    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Loads and merges every source, then applies resolvers, the optional
    /// script pass, and freezing.
    pub fn build(self) -> Result<Configuration, ConfigError> {
        let mut merged: Option<Configuration> = None;

        for source in &self.sources {
            let Some(layer) = source.load()? else {
                continue;
            };
            debug!(?source, "applying configuration layer");
            match merged.as_mut() {
                None => merged = Some(layer),
                Some(base) => base.override_by(&layer, &self.rules)?,
            }
        }

        let mut conf = merged.unwrap_or_default();
        if let Some(resolver) = self.env_resolver {
            conf.set_env_resolver(resolver);
        }
        if let Some(provider) = self.macros {
            conf.set_macro_provider(provider);
        }
        conf.set_type_search_paths(self.type_search_paths);

        if let Some(runner) = &self.script {
            let mut result = Configuration::new();
            result.set_env_resolver(conf.env_resolver().clone());
            result.set_macro_provider(conf.macro_provider().clone());
            result.set_type_search_paths(conf.type_search_paths().to_vec());
            runner.execute(&mut conf, &mut result)?;
            conf = result;
        }

        conf.reset_modified();
        if self.frozen {
            conf.freeze();
        }
        Ok(conf)
    }

    /// Builds the configuration and deserializes it into `T`.
    pub fn build_into<T: DeserializeOwned>(self) -> Result<T, ConfigError> {
        self.build()?.bind()
    }
}
