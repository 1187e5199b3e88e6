//! Named macros invoked from variables: `$(lhs::name key=value ...)`.

use std::fmt::Write;
use std::sync::Arc;

use chrono::{Local, Utc};

use super::bind::coerce_value;
use super::ConfigError;

/// Parsed `key=value` arguments of a macro call.
///
/// Values may be quoted with `'` or `"` to include whitespace. Keys are
/// matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacroArgs {
    args: Vec<(String, String)>,
}

impl MacroArgs {
    /// Parses `name key=value ...`, returning the macro name and its arguments.
    pub fn parse(call: &str) -> Result<(String, MacroArgs), ConfigError> {
        let mut tokens = tokenize(call).into_iter();
        let name = tokens
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ConfigError::UnknownMacro(call.trim().to_string()))?;

        let mut args = Vec::new();
        for token in tokens {
            match token.split_once('=') {
                Some((key, value)) => args.push((key.trim().to_string(), unquote(value))),
                None => args.push((token, String::new())),
            }
        }
        Ok((name, MacroArgs { args }))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Splits on whitespace, keeping quoted runs together.
fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in s.chars() {
        match quote {
            Some(q) if ch == q => {
                quote = None;
                current.push(ch);
            }
            Some(_) => current.push(ch),
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                current.push(ch);
            }
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    for q in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

/// Resolves macro calls.
///
/// `input` is the dereferenced value to the left of `::`, if any.
/// Unknown names must fail with [`ConfigError::UnknownMacro`].
pub trait MacroProvider: Send + Sync + std::fmt::Debug {
    fn invoke(
        &self,
        name: &str,
        args: &MacroArgs,
        input: Option<&str>,
    ) -> Result<String, ConfigError>;
}

/// Built-in macros.
///
/// | name | arguments | result |
/// |------|-----------|--------|
/// | `now` | `fmt` (strftime), `utc` | current time, RFC 3339 by default |
/// | `default`, `or` | `dflt` | input, or `dflt` when the input is empty |
/// | `as` | `type` (`string`, `int`, `real`, `bool`, `auto`), `dflt` | input coerced to `type` |
/// | `decipher`, `decrypt` | backend specific | delegated to the fallback provider |
///
/// Any other name is handed to the fallback provider, if one is installed.
#[derive(Debug, Clone, Default)]
pub struct BuiltinMacros {
    fallback: Option<Arc<dyn MacroProvider>>,
}

impl BuiltinMacros {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a provider for `decipher`/`decrypt` and any custom names.
    pub fn with_fallback(provider: Arc<dyn MacroProvider>) -> Self {
        Self {
            fallback: Some(provider),
        }
    }

    fn delegate(
        &self,
        name: &str,
        args: &MacroArgs,
        input: Option<&str>,
    ) -> Result<String, ConfigError> {
        match &self.fallback {
            Some(provider) => provider.invoke(name, args, input),
            None => Err(ConfigError::UnknownMacro(name.to_string())),
        }
    }
}

impl MacroProvider for BuiltinMacros {
    fn invoke(
        &self,
        name: &str,
        args: &MacroArgs,
        input: Option<&str>,
    ) -> Result<String, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "now" => now(args),
            "default" | "or" => Ok(match input.filter(|v| !v.trim().is_empty()) {
                Some(value) => value.to_string(),
                None => args.get("dflt").unwrap_or("").to_string(),
            }),
            "as" => coerce(args, input),
            "decipher" | "decrypt" => match &self.fallback {
                Some(provider) => provider.invoke(name, args, input),
                None => Err(ConfigError::MacroFailed {
                    name: name.to_string(),
                    reason: "no decipher backend is installed".to_string(),
                }),
            },
            _ => self.delegate(name, args, input),
        }
    }
}

fn now(args: &MacroArgs) -> Result<String, ConfigError> {
    let utc = args
        .get("utc")
        .is_some_and(|v| v.is_empty() || v.eq_ignore_ascii_case("true"));
    let Some(fmt) = args.get("fmt") else {
        return Ok(if utc {
            Utc::now().to_rfc3339()
        } else {
            Local::now().to_rfc3339()
        });
    };

    // An invalid strftime string surfaces as a formatting error.
    let mut out = String::new();
    let written = if utc {
        write!(out, "{}", Utc::now().format(fmt))
    } else {
        write!(out, "{}", Local::now().format(fmt))
    };
    written.map_err(|_| ConfigError::MacroFailed {
        name: "now".to_string(),
        reason: format!("invalid time format '{fmt}'"),
    })?;
    Ok(out)
}

fn coerce(args: &MacroArgs, input: Option<&str>) -> Result<String, ConfigError> {
    let ty = args.get("type").unwrap_or("auto").to_ascii_lowercase();
    let raw = input.unwrap_or("").trim();

    let coerced = match ty.as_str() {
        "string" | "str" => Some(raw.to_string()),
        "int" | "integer" | "long" => raw.parse::<i64>().ok().map(|i| i.to_string()),
        "real" | "float" | "double" => raw.parse::<f64>().ok().map(|f| f.to_string()),
        "bool" | "boolean" => parse_bool(raw).map(|b| b.to_string()),
        "auto" => Some(match coerce_value(raw) {
            toml::Value::String(s) => s,
            other => other.to_string(),
        }),
        _ => {
            return Err(ConfigError::MacroFailed {
                name: "as".to_string(),
                reason: format!("unsupported type '{ty}'"),
            })
        }
    };

    match (coerced, args.get("dflt")) {
        (Some(value), _) => Ok(value),
        (None, Some(dflt)) => Ok(dflt.to_string()),
        (None, None) => Err(ConfigError::MacroFailed {
            name: "as".to_string(),
            reason: format!("'{raw}' is not a valid {ty}"),
        }),
    }
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
