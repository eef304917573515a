//! In-memory reference engine.
//!
//! `ScratchEngine` keeps a variable workspace and a table of callable
//! functions. It understands a deliberately small command language:
//!
//! ```text
//! x = [1, 2, 3]     assign a JSON literal
//! x                 read a variable (returning eval)
//! clear x y         remove variables
//! clear             remove everything
//! ```
//!
//! Functions declare how many outputs they naturally produce. Results are
//! shaped by the requested [`Returns`]: no value for `Nothing` or a count of
//! zero, a scalar for one output, a JSON array for several.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Value};

use super::{Engine, EngineOutcome};
use crate::callable::{Callable, Returns};
use crate::error::EngineError;

type FunctionBody = Box<dyn FnMut(&[Value], usize) -> Result<Vec<Value>, EngineError> + Send>;

/// A function callable through `feval`.
pub struct EngineFunction {
    /// Output count used when the caller does not ask for one.
    outputs: usize,
    body: FunctionBody,
}

impl EngineFunction {
    /// `body` receives the arguments and the number of outputs wanted, and
    /// must return at least that many values.
    pub fn new<F>(outputs: usize, body: F) -> Self
    where
        F: FnMut(&[Value], usize) -> Result<Vec<Value>, EngineError> + Send + 'static,
    {
        Self {
            outputs,
            body: Box::new(body),
        }
    }
}

/// Single-threaded in-memory engine.
pub struct ScratchEngine {
    workspace: BTreeMap<String, Value>,
    functions: HashMap<String, EngineFunction>,
    exited: bool,
}

impl Default for ScratchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchEngine {
    /// Engine with the built-in functions registered.
    pub fn new() -> Self {
        let mut engine = Self {
            workspace: BTreeMap::new(),
            functions: HashMap::new(),
            exited: false,
        };
        engine.register_builtins();
        engine
    }

    pub fn register_function(&mut self, name: impl Into<String>, function: EngineFunction) {
        self.functions.insert(name.into(), function);
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    fn register_builtins(&mut self) {
        self.register_function(
            "plus",
            EngineFunction::new(1, |args, _| {
                let mut sum = 0.0;
                for arg in args {
                    sum += number(arg)?;
                }
                Ok(vec![json!(sum)])
            }),
        );

        // One output per argument.
        self.register_function(
            "echo",
            EngineFunction::new(1, |args, wanted| {
                if wanted > args.len().max(1) {
                    return Err(too_many_outputs("echo"));
                }
                Ok(args.to_vec())
            }),
        );

        self.register_function(
            "minmax",
            EngineFunction::new(2, |args, _| {
                let values = match args {
                    [Value::Array(values)] if !values.is_empty() => values,
                    _ => {
                        return Err(EngineError::with_identifier(
                            "Engine:minmax:invalidInput",
                            "minmax expects one non-empty array",
                        ))
                    }
                };
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                for v in values {
                    let n = number(v)?;
                    min = min.min(n);
                    max = max.max(n);
                }
                Ok(vec![json!(min), json!(max)])
            }),
        );

        self.register_function(
            "size",
            EngineFunction::new(1, |args, _| {
                let len = match args {
                    [Value::Array(values)] => values.len(),
                    [Value::Object(map)] => map.len(),
                    [Value::String(s)] => s.chars().count(),
                    [_] => 1,
                    _ => {
                        return Err(EngineError::with_identifier(
                            "Engine:size:invalidInput",
                            "size expects exactly one argument",
                        ))
                    }
                };
                Ok(vec![json!(len)])
            }),
        );
    }

    fn eval(&mut self, command: &str, returns: Returns) -> EngineOutcome {
        let command = command.trim();

        if command.is_empty() {
            return shape(Vec::new(), returns, 0, "eval");
        }

        if command == "clear" {
            self.workspace.clear();
            return shape(Vec::new(), returns, 0, "clear");
        }

        if let Some(names) = command.strip_prefix("clear ") {
            for name in names.split_whitespace() {
                self.workspace.remove(name);
            }
            return shape(Vec::new(), returns, 0, "clear");
        }

        if let Some((name, literal)) = command.split_once('=') {
            let name = name.trim();
            check_identifier(name)?;
            let value: Value = serde_json::from_str(literal.trim()).map_err(|e| {
                EngineError::with_identifier(
                    "Engine:parse",
                    format!("Invalid value for '{name}': {e}"),
                )
            })?;
            self.workspace.insert(name.to_string(), value);
            return shape(Vec::new(), returns, 0, "assignment");
        }

        check_identifier(command)?;
        let value = self.lookup(command)?;
        shape(vec![value], returns, 1, command)
    }

    fn feval(&mut self, function: &str, args: &[Value], returns: Returns) -> EngineOutcome {
        let entry = self.functions.get_mut(function).ok_or_else(|| {
            EngineError::with_identifier(
                "Engine:undefinedFunction",
                format!("Undefined function '{function}'"),
            )
        })?;

        let wanted = match returns {
            Returns::Nothing => 0,
            Returns::Default => entry.outputs,
            Returns::Count(n) => n,
        };

        let outputs = (entry.body)(args, wanted)?;
        shape(outputs, returns, entry.outputs, function)
    }

    fn lookup(&self, name: &str) -> Result<Value, EngineError> {
        self.workspace.get(name).cloned().ok_or_else(|| {
            EngineError::with_identifier(
                "Engine:undefinedVariable",
                format!("Undefined function or variable '{name}'"),
            )
        })
    }
}

impl Engine for ScratchEngine {
    fn run(&mut self, callable: &Callable) -> EngineOutcome {
        if self.exited {
            return Err(EngineError::with_identifier(
                "Engine:exited",
                "The engine has exited",
            ));
        }

        match callable {
            Callable::Eval { command, returns } => self.eval(command, *returns),
            Callable::Feval {
                function,
                args,
                returns,
            } => self.feval(function, args, *returns),
            Callable::GetVariable { name } => self.lookup(name).map(Some),
            Callable::SetVariable { name, value } => {
                check_identifier(name)?;
                self.workspace.insert(name.clone(), value.clone());
                Ok(None)
            }
            Callable::Exit => {
                tracing::info!("Scratch engine exiting");
                self.exited = true;
                self.workspace.clear();
                Ok(None)
            }
        }
    }
}

/// Shape raw outputs according to the requested return mode.
fn shape(
    mut outputs: Vec<Value>,
    returns: Returns,
    natural: usize,
    what: &str,
) -> EngineOutcome {
    let wanted = match returns {
        Returns::Nothing | Returns::Count(0) => return Ok(None),
        Returns::Default => natural,
        Returns::Count(n) => n,
    };

    if wanted == 0 {
        return Ok(None);
    }
    if outputs.len() < wanted {
        return Err(too_many_outputs(what));
    }

    outputs.truncate(wanted);
    if wanted == 1 {
        Ok(outputs.pop())
    } else {
        Ok(Some(Value::Array(outputs)))
    }
}

fn too_many_outputs(what: &str) -> EngineError {
    EngineError::with_identifier(
        "Engine:TooManyOutputs",
        format!("Too many output arguments for '{what}'"),
    )
}

fn number(value: &Value) -> Result<f64, EngineError> {
    value.as_f64().ok_or_else(|| {
        EngineError::with_identifier(
            "Engine:notNumeric",
            format!("Expected a number, got {value}"),
        )
    })
}

fn check_identifier(name: &str) -> Result<(), EngineError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(EngineError::with_identifier(
            "Engine:invalidName",
            format!("'{name}' is not a valid variable name"),
        ))
    }
}
