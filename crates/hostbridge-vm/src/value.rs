//! Script values and runtime type tags.

use std::fmt;
use std::rc::Rc;

use crate::{FunctionRef, TableRef, UserDataRef};

/// Runtime type tag of a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Index does not refer to a valid slot.
    None,
    Nil,
    Boolean,
    LightUserData,
    Number,
    String,
    Table,
    Function,
    UserData,
}

impl ValueType {
    /// Script-facing name of the tag.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::None => "no value",
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::LightUserData | ValueType::UserData => "userdata",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Table => "table",
            ValueType::Function => "function",
        }
    }
}

/// A script value.
///
/// Tables, functions and userdata are reference types; cloning a `Value`
/// clones the reference, not the referent.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    LightUserData(usize),
    Number(f64),
    String(Rc<str>),
    Table(TableRef),
    Function(FunctionRef),
    UserData(UserDataRef),
}

impl Value {
    /// Create a string value.
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    /// Runtime type tag.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::LightUserData(_) => ValueType::LightUserData,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Table(_) => ValueType::Table,
            Value::Function(_) => ValueType::Function,
            Value::UserData(_) => ValueType::UserData,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<&UserDataRef> {
        match self {
            Value::UserData(u) => Some(u),
            _ => None,
        }
    }

    /// Primitive equality: by value for scalars, by identity for references.
    pub fn raw_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::LightUserData(a), Value::LightUserData(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::UserData(a), Value::UserData(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Message used when this value is raised as an error.
    pub fn describe_error(&self) -> String {
        match self {
            Value::String(s) => s.to_string(),
            Value::Number(n) => format_number(*n),
            other => format!("(error object is a {} value)", other.value_type().name()),
        }
    }
}

/// Format a number the way the script engine prints it.
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::LightUserData(p) => write!(f, "lightuserdata({p:#x})"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Table(t) => write!(f, "table: {:#x}", t.as_ptr()),
            Value::Function(func) => write!(f, "function: {}", func.name()),
            Value::UserData(u) => write!(f, "userdata({})", u.handle()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<TableRef> for Value {
    fn from(t: TableRef) -> Self {
        Value::Table(t)
    }
}

impl From<FunctionRef> for Value {
    fn from(f: FunctionRef) -> Self {
        Value::Function(f)
    }
}

impl From<UserDataRef> for Value {
    fn from(u: UserDataRef) -> Self {
        Value::UserData(u)
    }
}

/// Hashable form of a table key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) enum TableKey {
    Boolean(bool),
    Number(u64),
    String(Rc<str>),
    Pointer(usize),
}

impl TableKey {
    /// `None` for keys a table cannot hold (`nil`, NaN).
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Nil => None,
            Value::Boolean(b) => Some(TableKey::Boolean(*b)),
            Value::Number(n) if n.is_nan() => None,
            // -0.0 and 0.0 are the same key
            Value::Number(n) => Some(TableKey::Number(if *n == 0.0 { 0 } else { n.to_bits() })),
            Value::String(s) => Some(TableKey::String(s.clone())),
            Value::LightUserData(p) => Some(TableKey::Pointer(*p)),
            Value::Table(t) => Some(TableKey::Pointer(t.as_ptr())),
            Value::Function(f) => Some(TableKey::Pointer(f.as_ptr())),
            Value::UserData(u) => Some(TableKey::Pointer(u.as_ptr())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn zero_keys_collapse() {
        assert!(TableKey::from_value(&Value::Number(0.0)) == TableKey::from_value(&Value::Number(-0.0)));
        assert!(TableKey::from_value(&Value::Number(f64::NAN)).is_none());
    }

    #[test]
    fn reference_equality_is_identity() {
        let a = TableRef::new();
        let b = TableRef::new();
        assert!(Value::Table(a.clone()).raw_equal(&Value::Table(a)));
        assert!(!Value::Table(b).raw_equal(&Value::Table(TableRef::new())));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(8.0), "8");
        assert_eq!(format_number(2.5), "2.5");
    }
}
