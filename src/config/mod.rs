//! The configuration tree and the engines that operate on it: path
//! navigation, variable evaluation, override/merge, and layered loading.

mod bind;
mod builder;
mod compare;
mod env;
mod error;
mod file;
mod macros;
mod merge;
mod node;
mod path;
mod resolve;
mod source;
mod tree;

pub use builder::ConfigurationBuilder;
pub use compare::structurally_equal;
pub use env::{EnvResolver, EnvSource, MapEnvResolver, OsEnvResolver};
pub use error::ConfigError;
pub use file::FileSource;
pub use macros::{BuiltinMacros, MacroArgs, MacroProvider};
pub use merge::{OverridePolicy, OverrideRules};
pub use node::Node;
pub use source::{ConfigSource, MemorySource};
pub use tree::{Configuration, NodeId, DEFAULT_ROOT_NAME};

pub(crate) use macros::parse_bool;
