pub mod config;
pub mod format;
pub mod script;
mod error;

pub use config::{
    structurally_equal, ConfigError, Configuration, ConfigurationBuilder, Node, NodeId,
    OverridePolicy, OverrideRules,
};
pub use error::Error;
pub use format::Format;
pub use script::ScriptRunner;
