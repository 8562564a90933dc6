//! Host values and reference-identity objects.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use hostbridge_vm::{FunctionRef, TableRef, UserDataRef};

use crate::entries::MethodEntry;
use crate::{DataType, Delegate, HostError, PrimitiveKind, TypeHash, primitives};

// ============================================================================
// HostValue
// ============================================================================

/// A value on the host side of the boundary.
///
/// Scalars are held by value; objects and arrays by shared reference with
/// identity semantics. Script references (`Table`, `Function`, `UserData`)
/// keep the referenced script value alive for as long as the host holds them.
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Char(char),
    String(Rc<str>),
    Object(HostObject),
    Array(HostArray),
    /// Reference to a host type itself
    Type(TypeHash),
    Table(TableRef),
    Function(FunctionRef),
    UserData(UserDataRef),
}

impl HostValue {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        HostValue::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Runtime type identity; `EMPTY` for null.
    pub fn type_hash(&self) -> TypeHash {
        match self {
            HostValue::Null => TypeHash::EMPTY,
            HostValue::Bool(_) => primitives::BOOL,
            HostValue::Int8(_) => primitives::INT8,
            HostValue::Int16(_) => primitives::INT16,
            HostValue::Int32(_) => primitives::INT32,
            HostValue::Int64(_) => primitives::INT64,
            HostValue::UInt8(_) => primitives::UINT8,
            HostValue::UInt16(_) => primitives::UINT16,
            HostValue::UInt32(_) => primitives::UINT32,
            HostValue::UInt64(_) => primitives::UINT64,
            HostValue::Float(_) => primitives::FLOAT,
            HostValue::Double(_) => primitives::DOUBLE,
            HostValue::Char(_) => primitives::CHAR,
            HostValue::String(_) => primitives::STRING,
            HostValue::Object(obj) => obj.type_hash(),
            HostValue::Array(arr) => TypeHash::array_of(arr.element_type()),
            HostValue::Type(_) => primitives::TYPE,
            HostValue::Table(_) => primitives::TABLE,
            HostValue::Function(_) => primitives::FUNCTION,
            HostValue::UserData(_) => primitives::USERDATA,
        }
    }

    /// Short name of the runtime variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "bool",
            HostValue::Int8(_) => "int8",
            HostValue::Int16(_) => "int16",
            HostValue::Int32(_) => "int",
            HostValue::Int64(_) => "int64",
            HostValue::UInt8(_) => "uint8",
            HostValue::UInt16(_) => "uint16",
            HostValue::UInt32(_) => "uint",
            HostValue::UInt64(_) => "uint64",
            HostValue::Float(_) => "float",
            HostValue::Double(_) => "double",
            HostValue::Char(_) => "char",
            HostValue::String(_) => "string",
            HostValue::Object(_) => "object",
            HostValue::Array(_) => "array",
            HostValue::Type(_) => "type",
            HostValue::Table(_) => "table",
            HostValue::Function(_) => "function",
            HostValue::UserData(_) => "userdata",
        }
    }

    /// Numeric value widened to `f64`, `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match self {
            HostValue::Int8(v) => *v as f64,
            HostValue::Int16(v) => *v as f64,
            HostValue::Int32(v) => *v as f64,
            HostValue::Int64(v) => *v as f64,
            HostValue::UInt8(v) => *v as f64,
            HostValue::UInt16(v) => *v as f64,
            HostValue::UInt32(v) => *v as f64,
            HostValue::UInt64(v) => *v as f64,
            HostValue::Float(v) => *v as f64,
            HostValue::Double(v) => *v,
            HostValue::Char(c) => *c as u32 as f64,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&HostArray> {
        match self {
            HostValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Convert a number into the given numeric primitive.
    ///
    /// Integral targets truncate toward zero and saturate; `None` when `kind`
    /// is not numeric.
    pub fn from_number(n: f64, kind: PrimitiveKind) -> Option<HostValue> {
        Some(match kind {
            PrimitiveKind::Int8 => HostValue::Int8(n as i8),
            PrimitiveKind::Int16 => HostValue::Int16(n as i16),
            PrimitiveKind::Int32 => HostValue::Int32(n as i32),
            PrimitiveKind::Int64 => HostValue::Int64(n as i64),
            PrimitiveKind::Uint8 => HostValue::UInt8(n as u8),
            PrimitiveKind::Uint16 => HostValue::UInt16(n as u16),
            PrimitiveKind::Uint32 => HostValue::UInt32(n as u32),
            PrimitiveKind::Uint64 => HostValue::UInt64(n as u64),
            PrimitiveKind::Float => HostValue::Float(n as f32),
            PrimitiveKind::Double => HostValue::Double(n),
            PrimitiveKind::Char => HostValue::Char(char::from_u32(n as u32)?),
            PrimitiveKind::Void | PrimitiveKind::Bool | PrimitiveKind::String => return None,
        })
    }

    /// The zero value a host default produces for `data_type`.
    pub fn default_for(data_type: DataType) -> HostValue {
        if data_type.is_array || data_type.is_nullable {
            return HostValue::Null;
        }
        match PrimitiveKind::from_type_hash(data_type.type_hash) {
            Some(PrimitiveKind::Bool) => HostValue::Bool(false),
            Some(kind) if kind.is_numeric() => HostValue::from_number(0.0, kind).unwrap_or_default(),
            _ => HostValue::Null,
        }
    }
}

impl PartialEq for HostValue {
    /// Scalars compare by value, reference types by identity.
    fn eq(&self, other: &Self) -> bool {
        use HostValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int8(a), Int8(b)) => a == b,
            (Int16(a), Int16(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (UInt8(a), UInt8(b)) => a == b,
            (UInt16(a), UInt16(b)) => a == b,
            (UInt32(a), UInt32(b)) => a == b,
            (UInt64(a), UInt64(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Object(a), Object(b)) => a.ptr_eq(b),
            (Array(a), Array(b)) => a.ptr_eq(b),
            (Type(a), Type(b)) => a == b,
            (Table(a), Table(b)) => a.ptr_eq(b),
            (Function(a), Function(b)) => a.ptr_eq(b),
            (UserData(a), UserData(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => write!(f, "Null"),
            HostValue::Bool(v) => write!(f, "Bool({v})"),
            HostValue::Int8(v) => write!(f, "Int8({v})"),
            HostValue::Int16(v) => write!(f, "Int16({v})"),
            HostValue::Int32(v) => write!(f, "Int32({v})"),
            HostValue::Int64(v) => write!(f, "Int64({v})"),
            HostValue::UInt8(v) => write!(f, "UInt8({v})"),
            HostValue::UInt16(v) => write!(f, "UInt16({v})"),
            HostValue::UInt32(v) => write!(f, "UInt32({v})"),
            HostValue::UInt64(v) => write!(f, "UInt64({v})"),
            HostValue::Float(v) => write!(f, "Float({v})"),
            HostValue::Double(v) => write!(f, "Double({v})"),
            HostValue::Char(v) => write!(f, "Char({v:?})"),
            HostValue::String(v) => write!(f, "String({v:?})"),
            HostValue::Object(obj) => write!(f, "Object({:?})", obj.type_hash()),
            HostValue::Array(arr) => f.debug_list().entries(arr.to_vec()).finish(),
            HostValue::Type(hash) => write!(f, "Type({hash:?})"),
            HostValue::Table(t) => write!(f, "Table({:#x})", t.as_ptr()),
            HostValue::Function(func) => write!(f, "Function({})", func.name()),
            HostValue::UserData(u) => write!(f, "UserData({})", u.handle()),
        }
    }
}

// ============================================================================
// HostObject
// ============================================================================

/// Per-instance method overrides installed by an adapter.
///
/// Virtual dispatch consults the overrides before running the type's own
/// implementation.
pub trait MethodOverrides {
    /// Run the override for `method`, or `None` to fall through to the
    /// base implementation.
    fn dispatch(&self, method: &MethodEntry, args: &mut [HostValue]) -> Option<Result<HostValue, HostError>>;

    fn as_any(&self) -> &dyn Any;
}

struct ObjectData {
    type_hash: TypeHash,
    value: RefCell<Box<dyn Any>>,
    overrides: RefCell<Option<Rc<dyn MethodOverrides>>>,
}

/// A host object with reference identity.
///
/// Clones share the same object; [`HostObject::ptr_eq`] and
/// [`HostObject::identity`] compare by reference, never by value.
#[derive(Clone)]
pub struct HostObject(Rc<ObjectData>);

impl HostObject {
    pub fn new<T: Any>(type_hash: TypeHash, value: T) -> Self {
        Self(Rc::new(ObjectData {
            type_hash,
            value: RefCell::new(Box::new(value)),
            overrides: RefCell::new(None),
        }))
    }

    /// Wrap a delegate as an object of the delegate type.
    pub fn delegate(type_hash: TypeHash, delegate: Delegate) -> Self {
        Self::new(type_hash, delegate)
    }

    pub fn type_hash(&self) -> TypeHash {
        self.0.type_hash
    }

    /// Whether the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.0
            .value
            .try_borrow()
            .map(|v| v.is::<T>())
            .unwrap_or(false)
    }

    /// Shared access to the payload.
    pub fn borrow<T: Any>(&self) -> Result<Ref<'_, T>, HostError> {
        let guard = self
            .0
            .value
            .try_borrow()
            .map_err(|_| HostError::exception("object is being modified by an active call"))?;
        Ref::filter_map(guard, |v| v.downcast_ref::<T>())
            .map_err(|_| HostError::invalid_cast(format!("object is not a {}", std::any::type_name::<T>())))
    }

    /// Exclusive access to the payload.
    pub fn borrow_mut<T: Any>(&self) -> Result<RefMut<'_, T>, HostError> {
        let guard = self
            .0
            .value
            .try_borrow_mut()
            .map_err(|_| HostError::exception("object is already in use by an active call"))?;
        RefMut::filter_map(guard, |v| v.downcast_mut::<T>())
            .map_err(|_| HostError::invalid_cast(format!("object is not a {}", std::any::type_name::<T>())))
    }

    /// Clone out the delegate payload, if this object wraps one.
    pub fn as_delegate(&self) -> Option<Delegate> {
        self.borrow::<Delegate>().ok().map(|d| d.clone())
    }

    pub fn overrides(&self) -> Option<Rc<dyn MethodOverrides>> {
        self.0.overrides.borrow().clone()
    }

    pub fn set_overrides(&self, overrides: Option<Rc<dyn MethodOverrides>>) {
        *self.0.overrides.borrow_mut() = overrides;
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Reference identity, stable for the object's lifetime.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("type_hash", &self.type_hash())
            .field("identity", &format_args!("{:#x}", self.identity()))
            .finish()
    }
}

// ============================================================================
// HostArray
// ============================================================================

struct ArrayData {
    element: TypeHash,
    items: RefCell<Vec<HostValue>>,
}

/// A fixed-length host array with reference identity.
#[derive(Clone)]
pub struct HostArray(Rc<ArrayData>);

impl HostArray {
    pub fn new(element: TypeHash, items: Vec<HostValue>) -> Self {
        Self(Rc::new(ArrayData {
            element,
            items: RefCell::new(items),
        }))
    }

    /// Longest array [`with_len`](Self::with_len) allocates.
    pub const MAX_LEN: usize = 1 << 24;

    /// `len` default elements of `element`.
    pub fn with_len(element: TypeHash, len: usize) -> Result<Self, HostError> {
        if len > Self::MAX_LEN {
            return Err(HostError::index_out_of_range(format!(
                "array length {len} exceeds the maximum of {}",
                Self::MAX_LEN
            )));
        }
        let mut items = Vec::new();
        items
            .try_reserve_exact(len)
            .map_err(|err| HostError::argument(format!("cannot allocate array of {len} elements: {err}")))?;
        items.resize(len, HostValue::default_for(DataType::simple(element)));
        Ok(Self::new(element, items))
    }

    pub fn element_type(&self) -> TypeHash {
        self.0.element
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<HostValue> {
        self.0.items.borrow().get(index).cloned()
    }

    pub fn set(&self, index: usize, value: HostValue) -> Result<(), HostError> {
        let mut items = self.0.items.borrow_mut();
        let len = items.len();
        let slot = items
            .get_mut(index)
            .ok_or_else(|| HostError::index_out_of_range(format!("index {index} outside array of length {len}")))?;
        *slot = value;
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<HostValue> {
        self.0.items.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &HostArray) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for HostArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExceptionKind;

    struct Point {
        x: i32,
    }

    #[test]
    fn objects_compare_by_identity() {
        let hash = TypeHash::from_name("Point");
        let a = HostObject::new(hash, Point { x: 1 });
        let b = HostObject::new(hash, Point { x: 1 });
        assert_eq!(HostValue::Object(a.clone()), HostValue::Object(a.clone()));
        assert_ne!(HostValue::Object(a), HostValue::Object(b));
    }

    #[test]
    fn borrow_downcasts_payload() {
        let obj = HostObject::new(TypeHash::from_name("Point"), Point { x: 3 });
        assert_eq!(obj.borrow::<Point>().unwrap().x, 3);
        obj.borrow_mut::<Point>().unwrap().x = 4;
        assert_eq!(obj.borrow::<Point>().unwrap().x, 4);
        assert!(obj.borrow::<String>().is_err());
    }

    #[test]
    fn conflicting_borrow_is_an_error() {
        let obj = HostObject::new(TypeHash::from_name("Point"), Point { x: 0 });
        let _guard = obj.borrow_mut::<Point>().unwrap();
        assert!(obj.borrow::<Point>().is_err());
    }

    #[test]
    fn number_conversion_truncates() {
        assert_eq!(HostValue::from_number(3.9, PrimitiveKind::Int32), Some(HostValue::Int32(3)));
        assert_eq!(HostValue::from_number(65.0, PrimitiveKind::Char), Some(HostValue::Char('A')));
        assert_eq!(HostValue::from_number(1.0, PrimitiveKind::String), None);
    }

    #[test]
    fn defaults_by_type() {
        assert_eq!(HostValue::default_for(DataType::simple(primitives::INT32)), HostValue::Int32(0));
        assert_eq!(HostValue::default_for(DataType::simple(primitives::BOOL)), HostValue::Bool(false));
        assert_eq!(HostValue::default_for(DataType::simple(primitives::STRING)), HostValue::Null);
    }

    #[test]
    fn array_bounds() {
        let arr = HostArray::with_len(primitives::INT32, 2).unwrap();
        assert_eq!(arr.get(1), Some(HostValue::Int32(0)));
        arr.set(0, HostValue::Int32(5)).unwrap();
        assert_eq!(arr.get(0), Some(HostValue::Int32(5)));
        assert!(arr.set(2, HostValue::Int32(1)).is_err());
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        let err = HostArray::with_len(primitives::INT32, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::IndexOutOfRange);
        let err = HostArray::with_len(primitives::INT32, HostArray::MAX_LEN + 1).unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::IndexOutOfRange);
        assert_eq!(HostArray::with_len(primitives::INT32, 0).unwrap().len(), 0);
    }
}
