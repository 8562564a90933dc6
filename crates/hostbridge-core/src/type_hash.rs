//! Deterministic hash-based type identity.
//!
//! [`TypeHash`] is a 64-bit hash identifying host types, methods and
//! constructors. Hashes are computed from names and signatures, so the same
//! name always yields the same identity and lookups need no secondary
//! name-to-id maps.
//!
//! # Examples
//!
//! ```
//! use hostbridge_core::{TypeHash, primitives};
//!
//! let int_hash = TypeHash::from_name("int");
//! assert_eq!(int_hash, primitives::INT32);
//!
//! let add_int = TypeHash::from_method(TypeHash::from_name("Counter"), "Add", &[primitives::INT32]);
//! let add_dbl = TypeHash::from_method(TypeHash::from_name("Counter"), "Add", &[primitives::DOUBLE]);
//! assert_ne!(add_int, add_dbl);
//! ```

use std::fmt;

use xxhash_rust::const_xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Separator constant used when folding parameter hashes.
    pub const SEP: u64 = 0x4bc94d6bd06053ad;

    /// Domain marker for type hashes
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for method hashes
    pub const METHOD: u64 = 0x7d3c8b4a92e15f6d;

    /// Domain marker for constructor hashes
    pub const CONSTRUCTOR: u64 = 0x9a7f3d5e2b8c4601;

    /// Domain marker for array type hashes
    pub const ARRAY: u64 = 0x3e9f5d2a8c7b1403;

    /// Parameter position mixing constants.
    pub const PARAM_MARKERS: [u64; 16] = [
        0x9e3779b97f4a7c15,
        0xbf58476d1ce4e5b9,
        0x94d049bb133111eb,
        0xd6e8feb86659fd93,
        0xe7037ed1a0b428db,
        0xc6a4a7935bd1e995,
        0x8648dbbc94d49b8d,
        0xa2b48b2c69e0d657,
        0x7c3e9f2a5b8d1403,
        0x5d8c7b4a3e9f2106,
        0x3f1e9d8c7b5a4203,
        0x1a2b3c4d5e6f7089,
        0x9f8e7d6c5b4a3210,
        0x2468ace013579bdf,
        0xfdb97531eca86420,
        0x123456789abcdef0,
    ];
}

/// A deterministic 64-bit hash identifying a type, method or constructor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Create a type hash from a qualified type name.
    #[inline]
    pub const fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    /// Create a method hash from owner type, method name and parameter types.
    ///
    /// Parameter order matters: `(int, float)` and `(float, int)` differ.
    #[inline]
    pub fn from_method(owner: TypeHash, name: &str, param_hashes: &[TypeHash]) -> Self {
        let hash = hash_constants::METHOD ^ owner.0 ^ xxh64(name.as_bytes(), 0);
        TypeHash(fold_params(hash, param_hashes))
    }

    /// Create a constructor hash from owner type and parameter types.
    #[inline]
    pub fn from_constructor(owner: TypeHash, param_hashes: &[TypeHash]) -> Self {
        TypeHash(fold_params(hash_constants::CONSTRUCTOR ^ owner.0, param_hashes))
    }

    /// Hash of the array type with the given element type.
    #[inline]
    pub fn array_of(element: TypeHash) -> Self {
        TypeHash(fold_params(hash_constants::ARRAY, &[element]))
    }

    /// Check if this is an empty/invalid hash.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Get the underlying u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

fn fold_params(mut hash: u64, param_hashes: &[TypeHash]) -> u64 {
    for (i, param) in param_hashes.iter().enumerate() {
        let marker = hash_constants::PARAM_MARKERS
            .get(i)
            .copied()
            .unwrap_or_else(|| hash_constants::PARAM_MARKERS[0].wrapping_add(i as u64));
        // wrapping_mul makes parameter order matter (XOR alone is commutative)
        hash = hash.wrapping_mul(hash_constants::SEP).wrapping_add(marker ^ param.0);
    }
    hash
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Well-known hashes for built-in types.
pub mod primitives {
    use super::TypeHash;

    pub const VOID: TypeHash = TypeHash::from_name("void");
    pub const BOOL: TypeHash = TypeHash::from_name("bool");
    pub const INT8: TypeHash = TypeHash::from_name("int8");
    pub const INT16: TypeHash = TypeHash::from_name("int16");
    pub const INT32: TypeHash = TypeHash::from_name("int");
    pub const INT64: TypeHash = TypeHash::from_name("int64");
    pub const UINT8: TypeHash = TypeHash::from_name("uint8");
    pub const UINT16: TypeHash = TypeHash::from_name("uint16");
    pub const UINT32: TypeHash = TypeHash::from_name("uint");
    pub const UINT64: TypeHash = TypeHash::from_name("uint64");
    pub const FLOAT: TypeHash = TypeHash::from_name("float");
    pub const DOUBLE: TypeHash = TypeHash::from_name("double");
    pub const CHAR: TypeHash = TypeHash::from_name("char");
    pub const STRING: TypeHash = TypeHash::from_name("string");

    /// The generic-object type every host value is assignable to.
    pub const OBJECT: TypeHash = TypeHash::from_name("object");

    /// Script table reference.
    pub const TABLE: TypeHash = TypeHash::from_name("table");

    /// Script function reference.
    pub const FUNCTION: TypeHash = TypeHash::from_name("function");

    /// Script userdata reference.
    pub const USERDATA: TypeHash = TypeHash::from_name("userdata");

    /// A reference to a host type itself.
    pub const TYPE: TypeHash = TypeHash::from_name("type");

    /// Unresolved generic parameter; the concrete type is picked from the
    /// script value.
    pub const GENERIC: TypeHash = TypeHash(0x7FFF_FFFF_FFFF_FFFE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_deterministic() {
        assert_eq!(TypeHash::from_name("Counter"), TypeHash::from_name("Counter"));
        assert_ne!(TypeHash::from_name("Counter"), TypeHash::from_name("counter"));
    }

    #[test]
    fn primitive_constants_match_names() {
        assert_eq!(primitives::INT32, TypeHash::from_name("int"));
        assert_eq!(primitives::STRING, TypeHash::from_name("string"));
    }

    #[test]
    fn method_param_order_matters() {
        let owner = TypeHash::from_name("T");
        let a = TypeHash::from_method(owner, "f", &[primitives::INT32, primitives::DOUBLE]);
        let b = TypeHash::from_method(owner, "f", &[primitives::DOUBLE, primitives::INT32]);
        assert_ne!(a, b);
    }

    #[test]
    fn method_owner_matters() {
        let a = TypeHash::from_method(TypeHash::from_name("A"), "f", &[]);
        let b = TypeHash::from_method(TypeHash::from_name("B"), "f", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn constructor_differs_from_method() {
        let owner = TypeHash::from_name("T");
        assert_ne!(TypeHash::from_constructor(owner, &[]), TypeHash::from_method(owner, "", &[]));
    }

    #[test]
    fn array_hash_depends_on_element() {
        assert_ne!(TypeHash::array_of(primitives::INT32), TypeHash::array_of(primitives::DOUBLE));
    }
}
