//! Conversion traits between Rust values and [`HostValue`].
//!
//! - [`FromHost`]: extract a Rust value from a [`HostValue`]
//! - [`IntoHost`]: convert a Rust value into a [`HostValue`]
//!
//! Integer extraction accepts any integral variant and range-checks it into
//! the requested width; floats accept any numeric variant.

use std::rc::Rc;

use crate::error::ConversionError;
use crate::{HostArray, HostObject, HostValue};

/// Extract a Rust value from a host value.
pub trait FromHost: Sized {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError>;
}

/// Convert a Rust value into a host value.
pub trait IntoHost {
    fn into_host(self) -> HostValue;
}

fn as_integer(value: &HostValue) -> Option<i128> {
    Some(match value {
        HostValue::Int8(v) => *v as i128,
        HostValue::Int16(v) => *v as i128,
        HostValue::Int32(v) => *v as i128,
        HostValue::Int64(v) => *v as i128,
        HostValue::UInt8(v) => *v as i128,
        HostValue::UInt16(v) => *v as i128,
        HostValue::UInt32(v) => *v as i128,
        HostValue::UInt64(v) => *v as i128,
        HostValue::Char(c) => *c as u32 as i128,
        // integral doubles come from script numbers
        HostValue::Double(v) if v.fract() == 0.0 => *v as i128,
        _ => return None,
    })
}

// ============================================================================
// Integer implementations
// ============================================================================

macro_rules! impl_int {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromHost for $ty {
                fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
                    let v = as_integer(value).ok_or(ConversionError::TypeMismatch {
                        expected: stringify!($ty),
                        actual: value.type_name(),
                    })?;
                    <$ty>::try_from(v).map_err(|_| ConversionError::IntegerOverflow {
                        value: v,
                        target_type: stringify!($ty),
                    })
                }
            }

            impl IntoHost for $ty {
                fn into_host(self) -> HostValue {
                    HostValue::$variant(self)
                }
            }
        )*
    };
}

impl_int!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
);

// ============================================================================
// Float, bool, char, string
// ============================================================================

impl FromHost for f64 {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        value.as_f64().ok_or(ConversionError::TypeMismatch {
            expected: "double",
            actual: value.type_name(),
        })
    }
}

impl IntoHost for f64 {
    fn into_host(self) -> HostValue {
        HostValue::Double(self)
    }
}

impl FromHost for f32 {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        f64::from_host(value).map(|v| v as f32)
    }
}

impl IntoHost for f32 {
    fn into_host(self) -> HostValue {
        HostValue::Float(self)
    }
}

impl FromHost for bool {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::Bool(b) => Ok(*b),
            other => Err(ConversionError::TypeMismatch {
                expected: "bool",
                actual: other.type_name(),
            }),
        }
    }
}

impl IntoHost for bool {
    fn into_host(self) -> HostValue {
        HostValue::Bool(self)
    }
}

impl FromHost for char {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::Char(c) => Ok(*c),
            other => {
                let code = u32::from_host(other)?;
                char::from_u32(code).ok_or(ConversionError::IntegerOverflow {
                    value: code as i128,
                    target_type: "char",
                })
            }
        }
    }
}

impl IntoHost for char {
    fn into_host(self) -> HostValue {
        HostValue::Char(self)
    }
}

impl FromHost for String {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::String(s) => Ok(s.to_string()),
            HostValue::Null => Err(ConversionError::NullValue { expected: "string" }),
            other => Err(ConversionError::TypeMismatch {
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }
}

impl IntoHost for String {
    fn into_host(self) -> HostValue {
        HostValue::String(self.into())
    }
}

impl IntoHost for &str {
    fn into_host(self) -> HostValue {
        HostValue::String(self.into())
    }
}

impl FromHost for Rc<str> {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::String(s) => Ok(s.clone()),
            other => Err(ConversionError::TypeMismatch {
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }
}

// ============================================================================
// Reference types and wrappers
// ============================================================================

impl FromHost for HostValue {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

impl IntoHost for HostValue {
    fn into_host(self) -> HostValue {
        self
    }
}

impl FromHost for HostObject {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::Object(obj) => Ok(obj.clone()),
            HostValue::Null => Err(ConversionError::NullValue { expected: "object" }),
            other => Err(ConversionError::TypeMismatch {
                expected: "object",
                actual: other.type_name(),
            }),
        }
    }
}

impl IntoHost for HostObject {
    fn into_host(self) -> HostValue {
        HostValue::Object(self)
    }
}

impl FromHost for HostArray {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::Array(arr) => Ok(arr.clone()),
            other => Err(ConversionError::TypeMismatch {
                expected: "array",
                actual: other.type_name(),
            }),
        }
    }
}

impl IntoHost for HostArray {
    fn into_host(self) -> HostValue {
        HostValue::Array(self)
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn from_host(value: &HostValue) -> Result<Self, ConversionError> {
        match value {
            HostValue::Null => Ok(None),
            other => T::from_host(other).map(Some),
        }
    }
}

impl<T: IntoHost> IntoHost for Option<T> {
    fn into_host(self) -> HostValue {
        self.map(IntoHost::into_host).unwrap_or_default()
    }
}

impl IntoHost for () {
    fn into_host(self) -> HostValue {
        HostValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_range_check() {
        assert_eq!(i32::from_host(&HostValue::Int64(5)), Ok(5));
        assert!(matches!(
            u8::from_host(&HostValue::Int32(300)),
            Err(ConversionError::IntegerOverflow { value: 300, .. })
        ));
        assert!(matches!(u32::from_host(&HostValue::Int32(-1)), Err(ConversionError::IntegerOverflow { .. })));
    }

    #[test]
    fn integral_doubles_convert_to_integers() {
        assert_eq!(i32::from_host(&HostValue::Double(8.0)), Ok(8));
        assert!(i32::from_host(&HostValue::Double(8.5)).is_err());
    }

    #[test]
    fn strings_are_not_integers() {
        assert!(matches!(
            i32::from_host(&HostValue::string("5")),
            Err(ConversionError::TypeMismatch { expected: "i32", actual: "string" })
        ));
    }

    #[test]
    fn option_maps_null() {
        assert_eq!(Option::<i32>::from_host(&HostValue::Null), Ok(None));
        assert_eq!(Some(3i32).into_host(), HostValue::Int32(3));
        assert_eq!(None::<i32>.into_host(), HostValue::Null);
    }

    #[test]
    fn char_from_number() {
        assert_eq!(char::from_host(&HostValue::Int32(66)), Ok('B'));
    }
}
