use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("required config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot infer configuration format of '{0}'")]
    UnknownFormat(PathBuf),

    #[error("failed to parse {format} configuration: {message}")]
    ParseError {
        format: &'static str,
        message: String,
    },

    #[error("failed to write {format} configuration: {message}")]
    WriteError {
        format: &'static str,
        message: String,
    },

    #[error("failed to deserialize config: {0}")]
    DeserializeError(#[from] toml::de::Error),

    #[error("path '{0}' does not resolve to an existing node")]
    NavigationFailed(String),

    #[error("malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("recursive variable evaluation: {0}")]
    RecursiveVariable(String),

    #[error("required variable '{reference}' referenced from '{context}' is not resolved")]
    RequiredValueMissing { reference: String, context: String },

    #[error("unclosed variable (missing ')') in '{0}'")]
    UnclosedVariable(String),

    #[error("variable evaluation limit exceeded at '{0}'")]
    EvaluationLimit(String),

    #[error("unknown macro '{0}'")]
    UnknownMacro(String),

    #[error("macro '{name}' failed: {reason}")]
    MacroFailed { name: String, reason: String },

    #[error("merge conflict at '{path}': {reason}")]
    MergeConflict { path: String, reason: String },

    #[error("invalid override policy '{value}' at '{path}'")]
    InvalidPolicy { path: String, value: String },

    #[error("'_else' at '{0}' does not directly follow an '_if'")]
    OrphanElse(String),

    #[error("unknown script control '{name}' at '{path}'")]
    UnknownControl { name: String, path: String },

    #[error("assignment target '{target}' from '{path}' does not exist")]
    AssignTargetMissing { target: String, path: String },

    #[error("malformed script at '{path}': {reason}")]
    MalformedScript { path: String, reason: String },

    #[error("script expression '{expr}' failed: {reason}")]
    Expression { expr: String, reason: String },

    #[error("script execution budget exceeded after {steps} steps ({elapsed_ms} ms)")]
    ScriptTimeout { steps: u64, elapsed_ms: u128 },

    #[error("invalid value at '{path}': {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("configuration is read-only")]
    ReadOnly,

    #[error("node does not exist: {0}")]
    NonExistentNode(String),

    #[error("invalid node name '{0}'")]
    InvalidName(String),

    #[error("'{0}' is not a section")]
    NotASection(String),
}
