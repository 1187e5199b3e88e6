use super::tree::Configuration;
use super::ConfigError;

/// A layer in the [`ConfigurationBuilder`](super::ConfigurationBuilder) pipeline.
///
/// `Ok(None)` means the source is optional and currently absent; it is
/// skipped without error.
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    fn load(&self) -> Result<Option<Configuration>, ConfigError>;
}

/// A configuration that already lives in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    conf: Configuration,
}

impl MemorySource {
    pub fn new(conf: Configuration) -> Self {
        Self { conf }
    }
}

impl ConfigSource for MemorySource {
    fn load(&self) -> Result<Option<Configuration>, ConfigError> {
        Ok(Some(self.conf.clone()))
    }
}
