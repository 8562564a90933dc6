//! Methods, constructors and their parameters.

use bitflags::bitflags;

use crate::{CallContext, DataType, HostError, HostObject, HostValue, NativeFn, TypeHash};

bitflags! {
    /// Method modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u8 {
        const STATIC = 1 << 0;
        /// Overridable by adapters
        const VIRTUAL = 1 << 1;
        /// Virtual with no body
        const ABSTRACT = 1 << 2;
        const CONSTRUCTOR = 1 << 3;
    }
}

/// A declared parameter.
#[derive(Debug, Clone)]
pub struct ParamEntry {
    pub name: String,
    pub data_type: DataType,
    /// Substituted when the caller supplies fewer arguments
    pub default: Option<HostValue>,
    /// Trailing parameter collecting the remaining arguments into an array
    pub is_variadic: bool,
}

impl ParamEntry {
    pub fn new(name: impl Into<String>, data_type: impl Into<DataType>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            default: None,
            is_variadic: false,
        }
    }

    /// Variadic parameter of `element`s; its declared type is the array.
    pub fn variadic(name: impl Into<String>, element: TypeHash) -> Self {
        Self {
            is_variadic: true,
            ..Self::new(name, DataType::array_of(element))
        }
    }

    pub fn with_default(mut self, default: HostValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// How virtual methods are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Consult per-instance overrides first
    Virtual,
    /// Run the declared implementation, skipping overrides
    Base,
}

/// A method or constructor of a host type.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub name: String,
    pub owner: TypeHash,
    pub hash: TypeHash,
    pub params: Vec<ParamEntry>,
    pub return_type: DataType,
    pub flags: MethodFlags,
    pub implementation: Option<NativeFn>,
}

impl MethodEntry {
    pub fn new(owner: TypeHash, name: impl Into<String>, params: Vec<ParamEntry>, return_type: DataType) -> Self {
        let name = name.into();
        let ids: Vec<TypeHash> = params.iter().map(|p| p.data_type.identity()).collect();
        Self {
            hash: TypeHash::from_method(owner, &name, &ids),
            name,
            owner,
            params,
            return_type,
            flags: MethodFlags::empty(),
            implementation: None,
        }
    }

    /// A constructor returning an instance of `owner`.
    pub fn constructor(owner: TypeHash, params: Vec<ParamEntry>) -> Self {
        let ids: Vec<TypeHash> = params.iter().map(|p| p.data_type.identity()).collect();
        Self {
            hash: TypeHash::from_constructor(owner, &ids),
            name: ".ctor".to_string(),
            owner,
            params,
            return_type: DataType::simple(owner),
            flags: MethodFlags::CONSTRUCTOR | MethodFlags::STATIC,
            implementation: None,
        }
    }

    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_implementation(mut self, implementation: NativeFn) -> Self {
        self.implementation = Some(implementation);
        self
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    pub fn is_overridable(&self) -> bool {
        self.flags.intersects(MethodFlags::VIRTUAL | MethodFlags::ABSTRACT)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    pub fn returns_void(&self) -> bool {
        self.return_type.is_void()
    }

    /// Parameter type identities, in order.
    pub fn param_types(&self) -> Vec<TypeHash> {
        self.params.iter().map(|p| p.data_type.identity()).collect()
    }

    /// Indices of parameters returned after the call (by-ref and out).
    pub fn out_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.data_type.is_by_ref())
            .map(|(i, _)| i)
    }

    /// Invoke with one slot per declared parameter.
    ///
    /// Errors raised by the implementation come back wrapped in
    /// [`HostError::Invocation`]. An overridable method with no
    /// implementation and no override yields the return type's default.
    pub fn invoke(
        &self,
        this: Option<&HostObject>,
        args: &mut [HostValue],
        dispatch: Dispatch,
    ) -> Result<HostValue, HostError> {
        if dispatch == Dispatch::Virtual && self.is_overridable() {
            if let Some(overrides) = this.and_then(HostObject::overrides) {
                if let Some(result) = overrides.dispatch(self, args) {
                    return result;
                }
            }
        }
        match &self.implementation {
            Some(native) => {
                let mut ctx = CallContext::new(this, args);
                native.call(&mut ctx).map_err(HostError::invocation)?;
                Ok(ctx.take_return())
            }
            None if self.is_overridable() => Ok(HostValue::default_for(self.return_type)),
            None => Err(HostError::exception(format!("method '{}' has no implementation", self.name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::rc::Rc;

    use super::*;
    use crate::{MethodOverrides, primitives};

    fn owner() -> TypeHash {
        TypeHash::from_name("Widget")
    }

    fn doubler() -> MethodEntry {
        MethodEntry::new(
            owner(),
            "Twice",
            vec![ParamEntry::new("x", primitives::INT32)],
            DataType::simple(primitives::INT32),
        )
        .with_flags(MethodFlags::VIRTUAL)
        .with_implementation(NativeFn::new(TypeHash::from_name("Twice"), |ctx: &mut CallContext| {
            let x: i32 = ctx.arg(0)?;
            ctx.set_return(x * 2);
            Ok(())
        }))
    }

    struct PlusOne;

    impl MethodOverrides for PlusOne {
        fn dispatch(&self, method: &MethodEntry, args: &mut [HostValue]) -> Option<Result<HostValue, HostError>> {
            if method.name != "Twice" {
                return None;
            }
            let HostValue::Int32(x) = args[0] else { return None };
            Some(Ok(HostValue::Int32(x + 1)))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn overloads_hash_differently() {
        let a = MethodEntry::new(owner(), "f", vec![ParamEntry::new("x", primitives::INT32)], DataType::void());
        let b = MethodEntry::new(owner(), "f", vec![ParamEntry::new("x", primitives::DOUBLE)], DataType::void());
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn virtual_dispatch_prefers_override() {
        let method = doubler();
        let obj = HostObject::new(owner(), ());
        obj.set_overrides(Some(Rc::new(PlusOne)));
        let mut args = [HostValue::Int32(10)];
        assert_eq!(method.invoke(Some(&obj), &mut args, Dispatch::Virtual).unwrap(), HostValue::Int32(11));
        assert_eq!(method.invoke(Some(&obj), &mut args, Dispatch::Base).unwrap(), HostValue::Int32(20));
    }

    #[test]
    fn abstract_without_override_returns_default() {
        let method = MethodEntry::new(owner(), "Count", vec![], DataType::simple(primitives::INT32))
            .with_flags(MethodFlags::ABSTRACT);
        assert_eq!(method.invoke(None, &mut [], Dispatch::Virtual).unwrap(), HostValue::Int32(0));
    }

    #[test]
    fn implementation_errors_are_wrapped() {
        let method = MethodEntry::new(owner(), "Fail", vec![], DataType::void()).with_implementation(NativeFn::new(
            TypeHash::from_name("Fail"),
            |_: &mut CallContext| Err(HostError::argument("nope")),
        ));
        let err = method.invoke(None, &mut [], Dispatch::Virtual).unwrap_err();
        assert!(matches!(err, HostError::Invocation(_)));
        assert_eq!(err.message(), "nope");
    }

    #[test]
    fn out_indices_cover_by_ref_params() {
        let method = MethodEntry::new(
            owner(),
            "TryGet",
            vec![
                ParamEntry::new("key", primitives::STRING),
                ParamEntry::new("value", DataType::simple(primitives::INT32).as_out()),
                ParamEntry::new("hits", DataType::simple(primitives::INT32).as_ref()),
            ],
            DataType::simple(primitives::BOOL),
        );
        assert_eq!(method.out_indices().collect::<Vec<_>>(), vec![1, 2]);
    }
}
