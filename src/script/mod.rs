//! Tree-rewriting script language: control sections embedded in a
//! configuration, interpreted by [`ScriptRunner`].

mod expr;
mod runner;

pub use expr::{evaluate, Value};
pub use runner::{ScriptRunner, SCRIPT_ONLY_ATTRIBUTE};
