use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::expr;
use crate::config::{parse_bool, ConfigError, Configuration, NodeId};

/// Attribute marking a section as a subroutine that is never copied on its own.
pub const SCRIPT_ONLY_ATTRIBUTE: &str = "script-only";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Set,
    Loop,
    If,
    Else,
    Call,
}

impl Control {
    fn parse(name: &str) -> Option<Control> {
        match name.to_ascii_lowercase().as_str() {
            "_set" => Some(Control::Set),
            "_loop" => Some(Control::Loop),
            "_if" => Some(Control::If),
            "_else" => Some(Control::Else),
            "_call" => Some(Control::Call),
            _ => None,
        }
    }
}

/// Interprets the control sections embedded in a source tree and writes the
/// generated sections into a result tree.
///
/// Reserved section names, recognized only while a script runs:
///
/// | Section                         | Action                                             |
/// |---------------------------------|----------------------------------------------------|
/// | `_set{ path=... to=<expr> }`    | assigns the evaluated expression to an existing node |
/// | `_loop=<expr>{ ... }`           | runs the body while the expression holds           |
/// | `_if=<expr>{ ... }`             | runs the body when the expression holds            |
/// | `_else{ ... }`                  | runs when the directly preceding `_if` did not     |
/// | `_call=<path>{}`                | splices in the body of the addressed section       |
///
/// Every other section is copied into the result with its name, value, and
/// attributes evaluated, unless it carries `script-only=true`.
///
/// ## Example
///
/// ```
/// use dragon_conf::{Configuration, Format, ScriptRunner};
///
/// let mut source = Configuration::parse(
///     "r{ i=0 _loop='$(/$i)<3'{ section_$(/$i){} _set{ path=/$i to=$(/$i)+1 } } }",
///     Format::Laconic,
/// )?;
/// let mut result = Configuration::new();
/// ScriptRunner::new().execute(&mut source, &mut result)?;
///
/// let names: Vec<&str> = result.root().children().map(|c| c.name()).collect();
/// assert_eq!(names, ["section_0", "section_1", "section_2"]);
/// # Ok::<(), dragon_conf::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    timeout: Duration,
    max_steps: u64,
    max_depth: usize,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_steps: 1_000_000,
            max_depth: 128,
        }
    }
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wall-clock ceiling for one [`execute`](Self::execute) call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ceiling on visited sections plus loop iterations.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Ceiling on nested blocks and calls.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Runs the script rooted at `source`'s root section into `result`.
    ///
    /// `result`'s root is cleared and takes the source root's name and
    /// evaluated value and attributes. `_set` writes into `source`, which is
    /// how loop counters advance. A failure leaves both trees partially
    /// mutated.
    pub fn execute(
        &self,
        source: &mut Configuration,
        result: &mut Configuration,
    ) -> Result<(), ConfigError> {
        let mut run = Run {
            runner: self,
            started: Instant::now(),
            steps: 0,
        };
        debug!(root = source.root().name(), "script started");

        let source_root = source.root_id();
        let target = result.root_id();
        let (name, value, attributes) = evaluated_header(source, source_root)?;
        result.clear(target)?;
        result.rename(target, &name)?;
        result.set_value(target, value.as_deref())?;
        for (attr_name, attr_value) in &attributes {
            result.add_attribute(target, attr_name, attr_value.as_deref())?;
        }

        run.block(source, source_root, result, target, 0)?;

        debug!(
            steps = run.steps,
            elapsed_ms = run.started.elapsed().as_millis() as u64,
            "script finished"
        );
        Ok(())
    }
}

/// Budget and bookkeeping for one `execute` call.
struct Run<'r> {
    runner: &'r ScriptRunner,
    started: Instant,
    steps: u64,
}

impl Run<'_> {
    fn tick(&mut self) -> Result<(), ConfigError> {
        self.steps += 1;
        let elapsed = self.started.elapsed();
        if self.steps > self.runner.max_steps || elapsed > self.runner.timeout {
            return Err(ConfigError::ScriptTimeout {
                steps: self.steps,
                elapsed_ms: elapsed.as_millis(),
            });
        }
        Ok(())
    }

    /// Executes the children of `block`, appending output under `target`.
    fn block(
        &mut self,
        source: &mut Configuration,
        block: NodeId,
        result: &mut Configuration,
        target: NodeId,
        depth: usize,
    ) -> Result<(), ConfigError> {
        if depth > self.runner.max_depth {
            return Err(ConfigError::MalformedScript {
                path: source.node(block).root_path(),
                reason: format!("nesting deeper than {}", self.runner.max_depth),
            });
        }

        // Snapshot: sections added to `source` while running are not visited.
        let children: Vec<NodeId> = source
            .node(block)
            .children()
            .filter_map(|c| c.id())
            .collect();

        // Outcome of the directly preceding `_if`, if the previous sibling was one.
        let mut previous_if: Option<bool> = None;

        for id in children {
            self.tick()?;
            let node = source.node(id);
            if !node.exists() {
                continue;
            }
            let after_if = previous_if.take();

            let Some(control) = Control::parse(node.name()) else {
                if node.name().starts_with('_') {
                    return Err(ConfigError::UnknownControl {
                        name: node.name().to_string(),
                        path: node.root_path(),
                    });
                }
                self.copy(source, id, result, target, depth)?;
                continue;
            };
            trace!(?control, path = %node.root_path(), "script control");

            match control {
                Control::If => {
                    let taken = condition(source, id)?;
                    if taken {
                        self.block(source, id, result, target, depth + 1)?;
                    }
                    previous_if = Some(taken);
                }
                Control::Else => match after_if {
                    None => return Err(ConfigError::OrphanElse(node.root_path())),
                    Some(true) => {}
                    Some(false) => self.block(source, id, result, target, depth + 1)?,
                },
                Control::Loop => {
                    while condition(source, id)? {
                        self.tick()?;
                        self.block(source, id, result, target, depth + 1)?;
                    }
                }
                Control::Set => assign(source, id)?,
                Control::Call => {
                    let callee = call_target(source, id)?;
                    self.block(source, callee, result, target, depth + 1)?;
                }
            }
        }
        Ok(())
    }

    /// Copies an ordinary section into `target` and runs its body.
    fn copy(
        &mut self,
        source: &mut Configuration,
        id: NodeId,
        result: &mut Configuration,
        target: NodeId,
        depth: usize,
    ) -> Result<(), ConfigError> {
        if is_script_only(source, id)? {
            return Ok(());
        }
        let (name, value, attributes) = evaluated_header(source, id)?;
        let copied = result.add_section(target, &name, value.as_deref())?;
        for (attr_name, attr_value) in &attributes {
            result.add_attribute(copied, attr_name, attr_value.as_deref())?;
        }
        self.block(source, id, result, copied, depth + 1)
    }
}

type Header = (String, Option<String>, Vec<(String, Option<String>)>);

/// Evaluated name, value, and attributes of a section, minus `script-only`.
///
/// The name is evaluated in the context of the enclosing section so that
/// `item_$($n){}` reads `n` next to the item rather than on it.
fn evaluated_header(conf: &Configuration, id: NodeId) -> Result<Header, ConfigError> {
    let node = conf.node(id);
    let name = if node.parent().exists() {
        node.parent().evaluate(node.name())?
    } else {
        node.evaluate(node.name())?
    };
    let value = node.value()?;
    let mut attributes = Vec::with_capacity(node.attribute_count());
    for attr in node.attributes() {
        if attr.is_named(SCRIPT_ONLY_ATTRIBUTE) {
            continue;
        }
        attributes.push((attr.name().to_string(), attr.value()?));
    }
    Ok((name, value, attributes))
}

fn is_script_only(conf: &Configuration, id: NodeId) -> Result<bool, ConfigError> {
    let flag = conf.node(id).attribute(SCRIPT_ONLY_ATTRIBUTE).value()?;
    Ok(flag.as_deref().and_then(parse_bool).unwrap_or(false))
}

/// Evaluates the value of a `_loop` or `_if` section as a boolean expression.
fn condition(conf: &Configuration, id: NodeId) -> Result<bool, ConfigError> {
    let text = conf.node(id).value()?.unwrap_or_default();
    Ok(expr::evaluate(&text)?.is_truthy())
}

/// `_set{ path=<target> to=<expr> }`
fn assign(source: &mut Configuration, id: NodeId) -> Result<(), ConfigError> {
    let (target, value) = {
        let node = source.node(id);
        let Some(path) = node.attribute("path").value()? else {
            return Err(ConfigError::MalformedScript {
                path: node.root_path(),
                reason: "'_set' requires a 'path' attribute".to_string(),
            });
        };
        let text = node.attribute("to").value()?.unwrap_or_default();
        let value = expr::evaluate(&text)?.to_string();

        let target = node.navigate(&path)?;
        let Some(target) = target.id() else {
            return Err(ConfigError::AssignTargetMissing {
                target: path,
                path: node.root_path(),
            });
        };
        (target, value)
    };
    source.set_value(target, Some(&value))
}

/// Resolves the section a `_call` splices in.
fn call_target(conf: &Configuration, id: NodeId) -> Result<NodeId, ConfigError> {
    let node = conf.node(id);
    let path = node.value()?.unwrap_or_default();
    let callee = node.navigate(&path)?;
    match callee.id() {
        Some(callee) if conf.node(callee).is_section() => Ok(callee),
        _ => Err(ConfigError::MalformedScript {
            path: node.root_path(),
            reason: format!("call target '{path}' is not a section"),
        }),
    }
}
