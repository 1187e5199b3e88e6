//! File-based configuration source.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::source::ConfigSource;
use super::tree::Configuration;
use super::ConfigError;
use crate::format::Format;

/// A configuration source that loads a file in any supported format.
///
/// Files can be marked as required or optional. Required files that don't exist
/// cause an error; optional files that don't exist are silently skipped.
/// The format is inferred from the extension unless given explicitly.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    required: bool,
    format: Option<Format>,
}

impl FileSource {
    /// Creates a new file source.
    ///
    /// If `required` is true, the build will fail if the file doesn't exist.
    pub fn new(path: impl AsRef<Path>, required: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            required,
            format: None,
        }
    }

    /// Overrides extension-based format detection.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<Option<Configuration>, ConfigError> {
        let format = match self.format.or_else(|| Format::from_path(&self.path)) {
            Some(format) => format,
            None => return Err(ConfigError::UnknownFormat(self.path.clone())),
        };
        load_config_file(&self.path, self.required, format)
    }
}

/// Loads and parses a config file.
///
/// Returns `Ok(None)` if the file doesn't exist and `required` is false.
fn load_config_file(
    path: &Path,
    required: bool,
    format: Format,
) -> Result<Option<Configuration>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            debug!(path = %path.display(), ?format, "loading configuration file");
            Configuration::parse(&contents, format).map(Some)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if required {
                Err(ConfigError::FileNotFound(path.to_path_buf()))
            } else {
                warn!(path = %path.display(), "optional configuration file not found");
                Ok(None)
            }
        }
        Err(e) => Err(ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
