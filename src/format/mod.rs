//! Surface-syntax codecs that build and serialize a [`Configuration`].
//!
//! | Format    | Extensions                   | Sections        | Attributes        |
//! |-----------|------------------------------|-----------------|-------------------|
//! | Laconic   | `.laconf`, `.lac`, `.conf`   | `name{ ... }`   | `name=value`      |
//! | JSON      | `.json`                      | objects         | scalars           |
//! | XML       | `.xml`                       | elements        | XML attributes    |
//! | TOML      | `.toml`                      | tables          | key/value pairs   |
//!
//! Every reader produces a configuration with no modified nodes.

mod json;
mod laconic;
mod toml;
mod xml;

use std::path::Path;

use crate::config::{ConfigError, Configuration, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Compact brace notation.
    Laconic,
    Json,
    Xml,
    Toml,
}

impl Format {
    /// Picks a format from the file extension, case-insensitively.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Format> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "laconf" | "lac" | "conf" => Some(Format::Laconic),
            "json" => Some(Format::Json),
            "xml" => Some(Format::Xml),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Format::Laconic => "laconic",
            Format::Json => "json",
            Format::Xml => "xml",
            Format::Toml => "toml",
        }
    }

    pub fn parse(&self, text: &str) -> Result<Configuration, ConfigError> {
        let mut conf = match self {
            Format::Laconic => laconic::parse(text)?,
            Format::Json => json::parse(text)?,
            Format::Xml => xml::parse(text)?,
            Format::Toml => toml::parse(text)?,
        };
        conf.reset_modified();
        Ok(conf)
    }

    pub fn write(&self, conf: &Configuration) -> Result<String, ConfigError> {
        self.write_node(conf.root())
    }

    /// Serializes the subtree rooted at `section` as a standalone document.
    pub fn write_node(&self, section: Node<'_>) -> Result<String, ConfigError> {
        if !section.is_section() {
            return Err(ConfigError::NotASection(section.root_path()));
        }
        match self {
            Format::Laconic => Ok(laconic::write(section)),
            Format::Json => json::write(section),
            Format::Xml => xml::write(section),
            Format::Toml => toml::write(section),
        }
    }
}

impl Configuration {
    /// Builds a configuration from text in the given format.
    ///
    /// ```
    /// use dragon_conf::{Configuration, Format};
    ///
    /// let conf = Configuration::parse("app{ port=8080 db{ host=localhost } }", Format::Laconic)?;
    /// assert_eq!(conf.root().name(), "app");
    /// assert_eq!(conf.navigate("/db/$host")?.verbatim_value(), Some("localhost"));
    /// # Ok::<(), dragon_conf::ConfigError>(())
    /// ```
    pub fn parse(text: &str, format: Format) -> Result<Configuration, ConfigError> {
        format.parse(text)
    }

    /// Serializes the whole tree with verbatim (unevaluated) values.
    pub fn write(&self, format: Format) -> Result<String, ConfigError> {
        format.write(self)
    }
}

fn parse_error(format: Format, message: impl Into<String>) -> ConfigError {
    ConfigError::ParseError {
        format: format.name(),
        message: message.into(),
    }
}

fn write_error(format: Format, message: impl Into<String>) -> ConfigError {
    ConfigError::WriteError {
        format: format.name(),
        message: message.into(),
    }
}
