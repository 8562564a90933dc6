//! DataType - a host type reference with parameter modifiers.
//!
//! ```
//! use hostbridge_core::{DataType, RefModifier, primitives};
//!
//! let plain = DataType::simple(primitives::INT32);
//! let out = DataType::simple(primitives::INT32).as_out();
//! assert_eq!(out.ref_modifier, RefModifier::Out);
//! assert!(out.is_output_only());
//! assert_eq!(out.stripped(), plain);
//! ```

use std::fmt::{self, Display, Formatter};

use crate::{TypeHash, primitives};

/// Reference modifier for parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RefModifier {
    /// Passed by value
    #[default]
    None,
    /// By-reference input that the callee may overwrite; consumes an
    /// argument and is returned as an extra result
    InOut,
    /// Output-only; consumes no argument, returned as an extra result
    Out,
}

impl Display for RefModifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RefModifier::None => Ok(()),
            RefModifier::InOut => write!(f, "&"),
            RefModifier::Out => write!(f, "&out"),
        }
    }
}

/// A type reference as it appears in a signature.
///
/// `Copy` so signatures can be cloned into process-wide caches without
/// touching session data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    /// Base type (element type when `is_array` is set)
    pub type_hash: TypeHash,
    pub ref_modifier: RefModifier,
    /// Nullable value wrapper (`int?`)
    pub is_nullable: bool,
    /// Array of `type_hash`
    pub is_array: bool,
}

impl DataType {
    pub const fn simple(type_hash: TypeHash) -> Self {
        Self {
            type_hash,
            ref_modifier: RefModifier::None,
            is_nullable: false,
            is_array: false,
        }
    }

    pub const fn void() -> Self {
        Self::simple(primitives::VOID)
    }

    pub const fn object() -> Self {
        Self::simple(primitives::OBJECT)
    }

    pub const fn array_of(element: TypeHash) -> Self {
        Self {
            is_array: true,
            ..Self::simple(element)
        }
    }

    pub const fn as_out(self) -> Self {
        Self {
            ref_modifier: RefModifier::Out,
            ..self
        }
    }

    pub const fn as_ref(self) -> Self {
        Self {
            ref_modifier: RefModifier::InOut,
            ..self
        }
    }

    pub const fn as_nullable(self) -> Self {
        Self {
            is_nullable: true,
            ..self
        }
    }

    /// Same type without by-reference and nullable wrapping.
    pub const fn stripped(self) -> Self {
        Self {
            ref_modifier: RefModifier::None,
            is_nullable: false,
            ..self
        }
    }

    /// Element type of an array type.
    pub const fn element(self) -> Self {
        Self::simple(self.type_hash)
    }

    /// Identity of the (stripped) type, distinguishing arrays from elements.
    pub fn identity(self) -> TypeHash {
        if self.is_array {
            TypeHash::array_of(self.type_hash)
        } else {
            self.type_hash
        }
    }

    pub fn is_void(self) -> bool {
        !self.is_array && self.type_hash == primitives::VOID
    }

    pub fn is_output_only(self) -> bool {
        self.ref_modifier == RefModifier::Out
    }

    /// Whether the parameter is returned to the caller after invocation.
    pub fn is_by_ref(self) -> bool {
        self.ref_modifier != RefModifier::None
    }
}

impl Default for DataType {
    fn default() -> Self {
        Self::void()
    }
}

impl From<TypeHash> for DataType {
    fn from(type_hash: TypeHash) -> Self {
        Self::simple(type_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripping_removes_wrappers_only() {
        let t = DataType::array_of(primitives::INT32).as_ref().as_nullable();
        let s = t.stripped();
        assert!(s.is_array);
        assert_eq!(s.ref_modifier, RefModifier::None);
        assert!(!s.is_nullable);
    }

    #[test]
    fn array_identity_differs_from_element() {
        let arr = DataType::array_of(primitives::INT32);
        assert_ne!(arr.identity(), arr.element().identity());
    }

    #[test]
    fn by_ref_classification() {
        assert!(DataType::simple(primitives::INT32).as_ref().is_by_ref());
        assert!(!DataType::simple(primitives::INT32).as_ref().is_output_only());
        assert!(DataType::simple(primitives::INT32).as_out().is_output_only());
        assert!(DataType::void().is_void());
    }
}
