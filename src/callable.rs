//! Units of work for the engine thread.
//!
//! A [`Callable`] describes one request: what to run and how many result
//! values to hand back. It is plain data so the remote strategy can ship it
//! across the process boundary unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How many result values a request wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "count", rename_all = "snake_case")]
pub enum Returns {
    /// Run for side effect only.
    Nothing,
    /// Whatever the engine's implicit output count is for this call.
    Default,
    /// Exactly this many outputs. Zero is valid.
    Count(usize),
}

/// One operation to run on the engine's execution thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Callable {
    Eval {
        command: String,
        returns: Returns,
    },
    Feval {
        function: String,
        #[serde(default)]
        args: Vec<Value>,
        returns: Returns,
    },
    GetVariable {
        name: String,
    },
    SetVariable {
        name: String,
        value: Value,
    },
    Exit,
}

impl Callable {
    pub fn eval(command: impl Into<String>) -> Self {
        Callable::Eval {
            command: command.into(),
            returns: Returns::Nothing,
        }
    }

    pub fn returning_eval(command: impl Into<String>, return_count: usize) -> Self {
        Callable::Eval {
            command: command.into(),
            returns: Returns::Count(return_count),
        }
    }

    pub fn feval(function: impl Into<String>, args: Vec<Value>) -> Self {
        Callable::Feval {
            function: function.into(),
            args,
            returns: Returns::Nothing,
        }
    }

    pub fn returning_feval(function: impl Into<String>, args: Vec<Value>) -> Self {
        Callable::Feval {
            function: function.into(),
            args,
            returns: Returns::Default,
        }
    }

    pub fn returning_feval_with_count(
        function: impl Into<String>,
        args: Vec<Value>,
        return_count: usize,
    ) -> Self {
        Callable::Feval {
            function: function.into(),
            args,
            returns: Returns::Count(return_count),
        }
    }

    pub fn get_variable(name: impl Into<String>) -> Self {
        Callable::GetVariable { name: name.into() }
    }

    pub fn set_variable(name: impl Into<String>, value: Value) -> Self {
        Callable::SetVariable {
            name: name.into(),
            value,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Callable::Eval { .. } => "eval",
            Callable::Feval { .. } => "feval",
            Callable::GetVariable { .. } => "get_variable",
            Callable::SetVariable { .. } => "set_variable",
            Callable::Exit => "exit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_callable_wire_format() {
        let call = Callable::returning_feval_with_count("minmax", vec![json!([3, 1, 2])], 1);
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({
                "kind": "feval",
                "function": "minmax",
                "args": [[3, 1, 2]],
                "returns": {"mode": "count", "count": 1}
            })
        );

        assert_eq!(
            serde_json::to_value(Callable::Exit).unwrap(),
            json!({"kind": "exit"})
        );
    }

    #[test]
    fn test_default_and_explicit_returns_differ() {
        let implicit = Callable::returning_feval("minmax", vec![]);
        let explicit = Callable::returning_feval_with_count("minmax", vec![], 1);
        assert_ne!(implicit, explicit);
    }

    #[test]
    fn test_feval_args_default_to_empty() {
        let call: Callable = serde_json::from_value(json!({
            "kind": "feval",
            "function": "rand",
            "returns": {"mode": "default"}
        }))
        .unwrap();
        assert_eq!(call, Callable::returning_feval("rand", vec![]));
    }
}
