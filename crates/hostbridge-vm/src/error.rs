//! Script engine errors.

use thiserror::Error;

use crate::Value;

/// Errors raised by the script engine.
///
/// `Runtime` carries the raised error value unchanged so that callers can
/// recover structured errors (for example, host exception objects).
#[derive(Debug, Clone, Error)]
pub enum LuaError {
    /// An error value raised by a function or metamethod.
    #[error("{}", .0.describe_error())]
    Runtime(Value),

    /// The value stack or the call depth exceeded its capacity.
    #[error("stack overflow")]
    StackOverflow,

    /// An error escaped an unprotected call and went through the panic hook.
    #[error("{0}")]
    Panic(String),
}

impl LuaError {
    /// Create a runtime error carrying a string message.
    pub fn runtime(message: impl Into<String>) -> Self {
        let message: String = message.into();
        LuaError::Runtime(Value::string(message))
    }

    /// The value a protected call leaves on the stack for this error.
    pub fn to_value(&self) -> Value {
        match self {
            LuaError::Runtime(value) => value.clone(),
            other => Value::string(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_string_displays_message() {
        let err = LuaError::runtime("boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn runtime_non_string_displays_type() {
        let err = LuaError::Runtime(Value::Boolean(true));
        assert_eq!(err.to_string(), "(error object is a boolean value)");
    }

    #[test]
    fn to_value_of_overflow_is_string() {
        let value = LuaError::StackOverflow.to_value();
        assert_eq!(value.as_str(), Some("stack overflow"));
    }
}
