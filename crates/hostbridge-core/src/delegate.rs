//! Callable host delegates.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::{HostError, HostValue};

/// The behavior behind a [`Delegate`].
///
/// `args` holds one slot per declared parameter; by-reference and output
/// parameters are written back into their slots.
pub trait DelegateTarget {
    fn invoke(&self, args: &mut [HostValue]) -> Result<HostValue, HostError>;

    fn as_any(&self) -> &dyn Any;
}

struct FnTarget<F>(F);

impl<F> DelegateTarget for FnTarget<F>
where
    F: Fn(&mut [HostValue]) -> Result<HostValue, HostError> + 'static,
{
    fn invoke(&self, args: &mut [HostValue]) -> Result<HostValue, HostError> {
        (self.0)(args)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A host-callable function value.
#[derive(Clone)]
pub struct Delegate {
    target: Rc<dyn DelegateTarget>,
}

impl Delegate {
    pub fn new(target: Rc<dyn DelegateTarget>) -> Self {
        Self { target }
    }

    /// Delegate backed by a Rust closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&mut [HostValue]) -> Result<HostValue, HostError> + 'static,
    {
        Self::new(Rc::new(FnTarget(f)))
    }

    pub fn invoke(&self, args: &mut [HostValue]) -> Result<HostValue, HostError> {
        self.target.invoke(args)
    }

    pub fn target(&self) -> &Rc<dyn DelegateTarget> {
        &self.target
    }

    pub fn ptr_eq(&self, other: &Delegate) -> bool {
        Rc::ptr_eq(&self.target, &other.target)
    }
}

impl fmt::Debug for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate").finish_non_exhaustive()
    }
}
