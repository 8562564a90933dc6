//! Native function storage and the call context handed to implementations.

use std::any::Any;
use std::cell::{Ref, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::convert::{FromHost, IntoHost};
use crate::{HostError, HostObject, HostValue, TypeHash};

/// Type-erased native implementation of a method, constructor or accessor.
///
/// Each `NativeFn` carries the identity of the entry it implements.
#[derive(Clone)]
pub struct NativeFn {
    pub id: TypeHash,
    inner: Rc<dyn NativeCallable>,
}

impl NativeFn {
    pub fn new<F>(id: TypeHash, f: F) -> Self
    where
        F: NativeCallable + 'static,
    {
        Self { id, inner: Rc::new(f) }
    }

    pub fn call(&self, ctx: &mut CallContext) -> Result<(), HostError> {
        self.inner.call(ctx)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Trait for callable native functions.
pub trait NativeCallable {
    fn call(&self, ctx: &mut CallContext) -> Result<(), HostError>;
}

impl<F> NativeCallable for F
where
    F: Fn(&mut CallContext) -> Result<(), HostError>,
{
    fn call(&self, ctx: &mut CallContext) -> Result<(), HostError> {
        (self)(ctx)
    }
}

/// Context for a native call: receiver, argument slots and return value.
///
/// Argument slots are mutable so by-reference and output parameters can be
/// written back:
///
/// ```ignore
/// let n: i32 = ctx.arg(0)?;
/// ctx.set_arg(1, n * 2);
/// ctx.set_return(true);
/// ```
pub struct CallContext<'a> {
    this: Option<&'a HostObject>,
    args: &'a mut [HostValue],
    ret: HostValue,
}

impl<'a> CallContext<'a> {
    pub fn new(this: Option<&'a HostObject>, args: &'a mut [HostValue]) -> Self {
        Self {
            this,
            args,
            ret: HostValue::Null,
        }
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg_slot(&self, index: usize) -> Result<&HostValue, HostError> {
        let count = self.args.len();
        self.args
            .get(index)
            .ok_or_else(|| HostError::argument(format!("argument {index} out of bounds ({count} arguments)")))
    }

    /// Typed argument access.
    pub fn arg<T: FromHost>(&self, index: usize) -> Result<T, HostError> {
        Ok(T::from_host(self.arg_slot(index)?)?)
    }

    /// Write a by-reference or output argument.
    pub fn set_arg<T: IntoHost>(&mut self, index: usize, value: T) -> Result<(), HostError> {
        let count = self.args.len();
        let slot = self
            .args
            .get_mut(index)
            .ok_or_else(|| HostError::argument(format!("argument {index} out of bounds ({count} arguments)")))?;
        *slot = value.into_host();
        Ok(())
    }

    pub fn args_mut(&mut self) -> &mut [HostValue] {
        self.args
    }

    pub fn set_return<T: IntoHost>(&mut self, value: T) {
        self.ret = value.into_host();
    }

    pub fn take_return(&mut self) -> HostValue {
        std::mem::take(&mut self.ret)
    }

    /// The receiver object.
    pub fn this_object(&self) -> Result<&'a HostObject, HostError> {
        self.this
            .ok_or_else(|| HostError::null_reference("instance method called without a target object"))
    }

    /// Shared access to the receiver's payload.
    pub fn this<T: Any>(&self) -> Result<Ref<'a, T>, HostError> {
        self.this_object()?.borrow::<T>()
    }

    /// Exclusive access to the receiver's payload.
    pub fn this_mut<T: Any>(&self) -> Result<RefMut<'a, T>, HostError> {
        self.this_object()?.borrow_mut::<T>()
    }
}

impl fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("has_this", &self.this.is_some())
            .field("arg_count", &self.arg_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Acc {
        total: i32,
    }

    #[test]
    fn closure_reads_args_and_sets_return() {
        let f = NativeFn::new(TypeHash::from_name("add"), |ctx: &mut CallContext| {
            let a: i32 = ctx.arg(0)?;
            let b: i32 = ctx.arg(1)?;
            ctx.set_return(a + b);
            Ok(())
        });
        let mut args = [HostValue::Int32(2), HostValue::Int32(3)];
        let mut ctx = CallContext::new(None, &mut args);
        f.call(&mut ctx).unwrap();
        assert_eq!(ctx.take_return(), HostValue::Int32(5));
    }

    #[test]
    fn receiver_is_mutable_through_context() {
        let obj = HostObject::new(TypeHash::from_name("Acc"), Acc { total: 1 });
        let f = NativeFn::new(TypeHash::from_name("bump"), |ctx: &mut CallContext| {
            let mut this = ctx.this_mut::<Acc>()?;
            this.total += 1;
            ctx.set_return(this.total);
            Ok(())
        });
        let mut no_args: [HostValue; 0] = [];
        let mut ctx = CallContext::new(Some(&obj), &mut no_args);
        f.call(&mut ctx).unwrap();
        assert_eq!(ctx.take_return(), HostValue::Int32(2));
    }

    #[test]
    fn missing_receiver_is_null_reference() {
        let mut no_args: [HostValue; 0] = [];
        let ctx = CallContext::new(None, &mut no_args);
        assert!(ctx.this::<Acc>().is_err());
    }

    #[test]
    fn out_argument_written_back() {
        let mut args = [HostValue::Null];
        let mut ctx = CallContext::new(None, &mut args);
        ctx.set_arg(0, 9i32).unwrap();
        assert!(ctx.set_arg(3, 1i32).is_err());
        assert_eq!(args[0], HostValue::Int32(9));
    }
}
