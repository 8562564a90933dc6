//! Embedded script engine contract.
//!
//! This crate provides the small stack-based interpreter surface the
//! marshaling core is written against:
//!
//! - a value stack addressed 1-based from the bottom of the current frame
//!   or negatively from the top
//! - runtime type tags ([`ValueType`])
//! - tables with metatables (`__index`, `__newindex`, `__call`, `__tostring`)
//! - native functions and userdata carrying an integer handle
//! - protected calls that turn errors into a status instead of unwinding
//! - pinned references, a weak object mirror and a finalizer hook
//!
//! There is no compiler here. "Script" functions are native closures
//! registered through [`LuaState::create_function`].

mod error;
mod function;
mod state;
mod table;
mod userdata;
mod value;

pub use error::LuaError;
pub use function::{FunctionRef, NativeFunction};
pub use state::{FinalizerHook, LuaState, MULTRET, PanicHandler, WeakState};
pub use table::{Table, TableRef};
pub use userdata::UserDataRef;
pub use value::{Value, ValueType};
