//! Host type system for the script bridge.
//!
//! This crate defines what the host side of the boundary looks like:
//! identities ([`TypeHash`]), signatures ([`DataType`]), values
//! ([`HostValue`], [`HostObject`], [`HostArray`], [`Delegate`]), registry
//! entries describing types and members, and the native calling convention
//! ([`NativeFn`], [`CallContext`]).

mod convert;
mod data_type;
mod delegate;
pub mod entries;
mod error;
mod native_fn;
mod primitive_kind;
mod type_hash;
mod value;

pub use convert::{FromHost, IntoHost};
pub use data_type::{DataType, RefModifier};
pub use delegate::{Delegate, DelegateTarget};
pub use entries::{
    Dispatch, EventEntry, IndexerEntry, MethodEntry, MethodFlags, ParamEntry, PropertyEntry, PropertyKind, TypeEntry,
    TypeFlags, TypeKind,
};
pub use error::{ConversionError, ExceptionKind, HostError};
pub use native_fn::{CallContext, NativeCallable, NativeFn};
pub use primitive_kind::PrimitiveKind;
pub use type_hash::{TypeHash, hash_constants, primitives};
pub use value::{HostArray, HostObject, HostValue, MethodOverrides};
