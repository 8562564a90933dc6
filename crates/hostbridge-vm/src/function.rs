//! Native functions callable from the script side.

use std::fmt;
use std::rc::Rc;

use crate::{LuaError, LuaState};

/// Signature of a function callable by the engine.
///
/// Arguments are at stack positions `1..=top()` of the callee's frame; the
/// function pushes its results and returns how many it pushed.
pub type NativeFunction = dyn Fn(&LuaState) -> Result<usize, LuaError>;

struct Function {
    name: Rc<str>,
    func: Box<NativeFunction>,
}

/// Shared reference to a function value.
#[derive(Clone)]
pub struct FunctionRef(Rc<Function>);

impl FunctionRef {
    /// Wrap a closure as a function value. `name` shows up in error locations.
    pub fn new<F>(name: impl Into<Rc<str>>, func: F) -> Self
    where
        F: Fn(&LuaState) -> Result<usize, LuaError> + 'static,
    {
        Self(Rc::new(Function {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        self.0.name.clone()
    }

    pub(crate) fn invoke(&self, state: &LuaState) -> Result<usize, LuaError> {
        (self.0.func)(state)
    }

    pub fn ptr_eq(&self, other: &FunctionRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_ptr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FunctionRef").field(&self.name()).finish()
    }
}
