//! Fluent builders for registering Rust types and interfaces.
//!
//! # Example
//!
//! ```
//! use hostbridge_core::{CallContext, ParamEntry, primitives};
//! use hostbridge_registry::TypeRegistry;
//!
//! struct Counter {
//!     value: i32,
//! }
//!
//! let mut registry = TypeRegistry::new();
//! registry
//!     .register_class::<Counter>("Counter")
//!     .constructor(vec![], |_| Ok(Counter { value: 0 }))
//!     .field("Value", primitives::INT32, |c: &Counter| c.value, |c: &mut Counter, v| {
//!         c.value = v;
//!         Ok(())
//!     })
//!     .method("Add", vec![ParamEntry::new("n", primitives::INT32)], primitives::INT32, |ctx: &mut CallContext| {
//!         let n: i32 = ctx.arg(0)?;
//!         let mut counter = ctx.this_mut::<Counter>()?;
//!         counter.value += n;
//!         ctx.set_return(counter.value);
//!         Ok(())
//!     })
//!     .build()
//!     .unwrap();
//! ```

use std::any::Any;
use std::marker::PhantomData;
use std::rc::Rc;

use hostbridge_core::{
    CallContext, DataType, EventEntry, FromHost, HostError, HostObject, HostValue, IndexerEntry, IntoHost,
    MethodEntry, MethodFlags, NativeFn, ParamEntry, PropertyEntry, TypeEntry, TypeHash, TypeKind,
};
use hostbridge_core::entries::{event_accessor, getter, index_getter, index_setter, setter};

use crate::{RegistrationError, TypeRegistry};

fn receiver(this: Option<&HostObject>) -> Result<&HostObject, HostError> {
    this.ok_or_else(|| HostError::null_reference("instance member accessed without a target object"))
}

/// Builder for a class backed by Rust type `T`.
///
/// Created by [`TypeRegistry::register_class`]. Name lookups (base type,
/// interfaces) are resolved as they are declared; the first failure is
/// reported by [`build`](Self::build).
pub struct ClassBuilder<'r, T: Any> {
    registry: &'r mut TypeRegistry,
    entry: TypeEntry,
    error: Option<RegistrationError>,
    _marker: PhantomData<T>,
}

impl<'r, T: Any> ClassBuilder<'r, T> {
    pub(crate) fn new(registry: &'r mut TypeRegistry, name: &str) -> Self {
        Self {
            registry,
            entry: TypeEntry::new(name, TypeKind::Class),
            error: None,
            _marker: PhantomData,
        }
    }

    fn hash(&self) -> TypeHash {
        self.entry.type_hash
    }

    fn resolve(&mut self, name: &str) -> Option<TypeHash> {
        let found = self.registry.lookup(name).map(|entry| entry.type_hash);
        if found.is_none() && self.error.is_none() {
            self.error = Some(RegistrationError::UnknownType(name.to_string()));
        }
        found
    }

    // ========================================================================
    // Shape
    // ========================================================================

    pub fn base(mut self, name: &str) -> Self {
        if let Some(base) = self.resolve(name) {
            self.entry.base = Some(base);
        }
        self
    }

    pub fn implements(mut self, name: &str) -> Self {
        if let Some(interface) = self.resolve(name) {
            match self.registry.get(interface) {
                Some(entry) if entry.is_interface() => self.entry.interfaces.push(interface),
                _ => {
                    self.error.get_or_insert(RegistrationError::InvalidBase(name.to_string()));
                }
            }
        }
        self
    }

    /// Cannot be constructed from script; adapters may still subclass it.
    pub fn abstract_type(mut self) -> Self {
        self.entry = self.entry.as_abstract();
        self
    }

    pub fn sealed(mut self) -> Self {
        self.entry = self.entry.as_sealed();
        self
    }

    /// Nested type reachable as `Outer.name`.
    pub fn nested(mut self, name: &str, type_name: &str) -> Self {
        self.entry = self.entry.with_nested(name, TypeHash::from_name(type_name));
        self
    }

    /// Custom string form used by script-side `tostring`.
    pub fn display<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> String + 'static,
    {
        self.entry.display = Some(Rc::new(move |obj: &HostObject| match obj.borrow::<T>() {
            Ok(value) => f(&*value),
            Err(_) => String::new(),
        }));
        self
    }

    // ========================================================================
    // Constructors and methods
    // ========================================================================

    pub fn constructor<F>(mut self, params: Vec<ParamEntry>, f: F) -> Self
    where
        F: Fn(&mut CallContext) -> Result<T, HostError> + 'static,
    {
        let hash = self.hash();
        let ctor = MethodEntry::constructor(hash, params);
        let id = ctor.hash;
        self.entry = self.entry.with_constructor(ctor.with_implementation(NativeFn::new(
            id,
            move |ctx: &mut CallContext| {
                let value = f(ctx)?;
                ctx.set_return(HostObject::new(hash, value));
                Ok(())
            },
        )));
        self
    }

    fn push_method<F>(
        mut self,
        name: &str,
        params: Vec<ParamEntry>,
        return_type: DataType,
        flags: MethodFlags,
        f: Option<F>,
    ) -> Self
    where
        F: Fn(&mut CallContext) -> Result<(), HostError> + 'static,
    {
        let mut method = MethodEntry::new(self.hash(), name, params, return_type).with_flags(flags);
        if let Some(f) = f {
            let id = method.hash;
            method = method.with_implementation(NativeFn::new(id, f));
        }
        self.entry = self.entry.with_method(method);
        self
    }

    pub fn method<F>(self, name: &str, params: Vec<ParamEntry>, return_type: impl Into<DataType>, f: F) -> Self
    where
        F: Fn(&mut CallContext) -> Result<(), HostError> + 'static,
    {
        self.push_method(name, params, return_type.into(), MethodFlags::empty(), Some(f))
    }

    /// Method an adapter may override.
    pub fn virtual_method<F>(
        self,
        name: &str,
        params: Vec<ParamEntry>,
        return_type: impl Into<DataType>,
        f: F,
    ) -> Self
    where
        F: Fn(&mut CallContext) -> Result<(), HostError> + 'static,
    {
        self.push_method(name, params, return_type.into(), MethodFlags::VIRTUAL, Some(f))
    }

    /// Method with no body; adapters supply it.
    pub fn abstract_method(self, name: &str, params: Vec<ParamEntry>, return_type: impl Into<DataType>) -> Self {
        self.push_method::<fn(&mut CallContext) -> Result<(), HostError>>(
            name,
            params,
            return_type.into(),
            MethodFlags::ABSTRACT,
            None,
        )
    }

    pub fn static_method<F>(
        self,
        name: &str,
        params: Vec<ParamEntry>,
        return_type: impl Into<DataType>,
        f: F,
    ) -> Self
    where
        F: Fn(&mut CallContext) -> Result<(), HostError> + 'static,
    {
        self.push_method(name, params, return_type.into(), MethodFlags::STATIC, Some(f))
    }

    // ========================================================================
    // Fields and properties
    // ========================================================================

    fn read<V, G>(get: G) -> hostbridge_core::entries::Getter
    where
        V: IntoHost,
        G: Fn(&T) -> V + 'static,
    {
        getter(move |this| {
            let value = receiver(this)?.borrow::<T>()?;
            Ok(get(&*value).into_host())
        })
    }

    fn write<V, S>(set: S) -> hostbridge_core::entries::Setter
    where
        V: FromHost,
        S: Fn(&mut T, V) -> Result<(), HostError> + 'static,
    {
        setter(move |this, value: HostValue| {
            let converted = V::from_host(&value)?;
            let mut target = receiver(this)?.borrow_mut::<T>()?;
            set(&mut *target, converted)
        })
    }

    pub fn field<V, G, S>(mut self, name: &str, data_type: impl Into<DataType>, get: G, set: S) -> Self
    where
        V: FromHost + IntoHost,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, V) -> Result<(), HostError> + 'static,
    {
        let field = PropertyEntry::field(name, data_type, Self::read(get)).with_setter(Self::write(set));
        self.entry = self.entry.with_property(field);
        self
    }

    pub fn readonly_field<V, G>(mut self, name: &str, data_type: impl Into<DataType>, get: G) -> Self
    where
        V: IntoHost,
        G: Fn(&T) -> V + 'static,
    {
        self.entry = self.entry.with_property(PropertyEntry::field(name, data_type, Self::read(get)));
        self
    }

    pub fn property<V, G, S>(mut self, name: &str, data_type: impl Into<DataType>, get: G, set: S) -> Self
    where
        V: FromHost + IntoHost,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, V) -> Result<(), HostError> + 'static,
    {
        let property = PropertyEntry::property(name, data_type)
            .with_getter(Self::read(get))
            .with_setter(Self::write(set));
        self.entry = self.entry.with_property(property);
        self
    }

    pub fn readonly_property<V, G>(mut self, name: &str, data_type: impl Into<DataType>, get: G) -> Self
    where
        V: IntoHost,
        G: Fn(&T) -> V + 'static,
    {
        let property = PropertyEntry::property(name, data_type).with_getter(Self::read(get));
        self.entry = self.entry.with_property(property);
        self
    }

    pub fn writeonly_property<V, S>(mut self, name: &str, data_type: impl Into<DataType>, set: S) -> Self
    where
        V: FromHost,
        S: Fn(&mut T, V) -> Result<(), HostError> + 'static,
    {
        let property = PropertyEntry::property(name, data_type).with_setter(Self::write(set));
        self.entry = self.entry.with_property(property);
        self
    }

    /// Static field; `set` of `None` makes it read-only.
    pub fn static_field<G>(
        mut self,
        name: &str,
        data_type: impl Into<DataType>,
        get: G,
        set: Option<hostbridge_core::entries::Setter>,
    ) -> Self
    where
        G: Fn() -> HostValue + 'static,
    {
        let mut field = PropertyEntry::field(name, data_type, getter(move |_| Ok(get()))).as_static();
        field.setter = set;
        self.entry = self.entry.with_property(field);
        self
    }

    // ========================================================================
    // Events and indexers
    // ========================================================================

    /// Event accepting handlers of delegate type `handler_type`.
    pub fn event<A, R>(mut self, name: &str, handler_type: &str, add: A, remove: R) -> Self
    where
        A: Fn(&mut T, HostObject) -> Result<(), HostError> + 'static,
        R: Fn(&mut T, &HostObject) -> Result<(), HostError> + 'static,
    {
        let Some(handler) = self.resolve(handler_type) else { return self };
        let event = EventEntry::new(
            name,
            handler,
            event_accessor(move |this, handler| {
                let mut target = receiver(this)?.borrow_mut::<T>()?;
                add(&mut *target, handler.clone())
            }),
            event_accessor(move |this, handler| {
                let mut target = receiver(this)?.borrow_mut::<T>()?;
                remove(&mut *target, handler)
            }),
        );
        self.entry = self.entry.with_event(event);
        self
    }

    pub fn indexer<K, V, G, S>(
        mut self,
        key_type: impl Into<DataType>,
        value_type: impl Into<DataType>,
        get: G,
        set: Option<S>,
    ) -> Self
    where
        K: FromHost,
        V: FromHost + IntoHost,
        G: Fn(&T, K) -> Result<V, HostError> + 'static,
        S: Fn(&mut T, K, V) -> Result<(), HostError> + 'static,
    {
        let mut indexer = IndexerEntry::new(key_type, value_type).with_getter(index_getter(move |obj, key| {
            let key = K::from_host(key)?;
            let value = obj.borrow::<T>()?;
            Ok(get(&*value, key)?.into_host())
        }));
        if let Some(set) = set {
            indexer = indexer.with_setter(index_setter(move |obj, key, value| {
                let key = K::from_host(key)?;
                let value = V::from_host(&value)?;
                let mut target = obj.borrow_mut::<T>()?;
                set(&mut *target, key, value)
            }));
        }
        self.entry = self.entry.with_indexer(indexer);
        self
    }

    /// Register the type and bind `T` to it.
    pub fn build(self) -> Result<TypeHash, RegistrationError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let hash = self.registry.register(self.entry)?;
        self.registry.bind_rust_type::<T>(hash);
        Ok(hash)
    }
}

/// Builder for an interface: abstract methods plus parent interfaces.
pub struct InterfaceBuilder<'r> {
    registry: &'r mut TypeRegistry,
    entry: TypeEntry,
    error: Option<RegistrationError>,
}

impl<'r> InterfaceBuilder<'r> {
    pub(crate) fn new(registry: &'r mut TypeRegistry, name: &str) -> Self {
        Self {
            registry,
            entry: TypeEntry::new(name, TypeKind::Interface),
            error: None,
        }
    }

    pub fn extends(mut self, name: &str) -> Self {
        match self.registry.lookup(name) {
            Some(parent) if parent.is_interface() => self.entry.interfaces.push(parent.type_hash),
            Some(_) => {
                self.error.get_or_insert(RegistrationError::InvalidBase(name.to_string()));
            }
            None => {
                self.error.get_or_insert(RegistrationError::UnknownType(name.to_string()));
            }
        }
        self
    }

    pub fn method(mut self, name: &str, params: Vec<ParamEntry>, return_type: impl Into<DataType>) -> Self {
        let method = MethodEntry::new(self.entry.type_hash, name, params, return_type.into())
            .with_flags(MethodFlags::ABSTRACT);
        self.entry = self.entry.with_method(method);
        self
    }

    pub fn build(self) -> Result<TypeHash, RegistrationError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.registry.register(self.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::{Delegate, Dispatch, primitives};

    struct Bag {
        items: Vec<i32>,
        listeners: Vec<HostObject>,
    }

    fn register_bag(registry: &mut TypeRegistry) -> TypeHash {
        registry
            .register_delegate("BagHandler", vec![ParamEntry::new("n", primitives::INT32)], DataType::void())
            .unwrap();
        registry
            .register_class::<Bag>("Bag")
            .constructor(vec![], |_| {
                Ok(Bag {
                    items: vec![10, 20, 30],
                    listeners: Vec::new(),
                })
            })
            .readonly_property("Count", primitives::INT32, |b: &Bag| b.items.len() as i32)
            .indexer(
                primitives::INT32,
                primitives::INT32,
                |b: &Bag, i: u32| {
                    b.items
                        .get(i as usize)
                        .copied()
                        .ok_or_else(|| HostError::index_out_of_range("no such item"))
                },
                Some(|b: &mut Bag, i: u32, v: i32| {
                    b.items[i as usize] = v;
                    Ok(())
                }),
            )
            .event(
                "Changed",
                "BagHandler",
                |b: &mut Bag, h| {
                    b.listeners.push(h);
                    Ok(())
                },
                |b: &mut Bag, h: &HostObject| {
                    b.listeners.retain(|l| !l.ptr_eq(h));
                    Ok(())
                },
            )
            .display(|b: &Bag| format!("Bag({})", b.items.len()))
            .build()
            .unwrap()
    }

    #[test]
    fn class_members_are_wired() {
        let mut registry = TypeRegistry::new();
        let hash = register_bag(&mut registry);
        let bag = registry.construct(hash, &mut []).unwrap();

        let entry = registry.get(hash).unwrap();
        let count = entry.find_property("count").unwrap();
        assert_eq!(count.get(Some(&bag)).unwrap(), HostValue::Int32(3));
        assert!(count.set(Some(&bag), HostValue::Int32(1)).is_err());

        let indexer = &entry.indexers[0];
        let getter = indexer.getter.as_ref().unwrap();
        let setter = indexer.setter.as_ref().unwrap();
        setter(&bag, &HostValue::Int32(1), HostValue::Int32(99)).unwrap();
        assert_eq!(getter(&bag, &HostValue::Int32(1)).unwrap(), HostValue::Int32(99));
        assert!(getter(&bag, &HostValue::Int32(7)).is_err());

        let display = entry.display.as_ref().unwrap();
        assert_eq!(display(&bag), "Bag(3)");
        assert_eq!(registry.hash_of::<Bag>(), Some(hash));
    }

    #[test]
    fn events_add_and_remove_handlers() {
        let mut registry = TypeRegistry::new();
        let hash = register_bag(&mut registry);
        let bag = registry.construct(hash, &mut []).unwrap();
        let handler_type = TypeHash::from_name("BagHandler");
        let handler = HostObject::delegate(handler_type, Delegate::from_fn(|_| Ok(HostValue::Null)));

        let event = registry.find_event(hash, "changed", crate::MemberScope::Instance).unwrap();
        assert_eq!(event.handler_type, handler_type);
        (event.add)(Some(&bag), &handler).unwrap();
        assert_eq!(bag.borrow::<Bag>().unwrap().listeners.len(), 1);
        (event.remove)(Some(&bag), &handler).unwrap();
        assert!(bag.borrow::<Bag>().unwrap().listeners.is_empty());
    }

    #[test]
    fn delegate_types_invoke_their_target() {
        let mut registry = TypeRegistry::new();
        let hash = registry
            .register_delegate("Doubler", vec![ParamEntry::new("x", primitives::INT32)], primitives::INT32)
            .unwrap();
        let doubler = HostObject::delegate(
            hash,
            Delegate::from_fn(|args| {
                let x = i32::from_host(&args[0])?;
                Ok(HostValue::Int32(x * 2))
            }),
        );
        let invoke = registry.get(hash).unwrap().delegate_invoke().unwrap().clone();
        let mut args = [HostValue::Int32(21)];
        assert_eq!(invoke.invoke(Some(&doubler), &mut args, Dispatch::Virtual).unwrap(), HostValue::Int32(42));
    }

    #[test]
    fn unknown_names_fail_at_build() {
        let mut registry = TypeRegistry::new();
        let err = registry.register_class::<Bag>("Broken").base("Nowhere").build().unwrap_err();
        assert_eq!(err, RegistrationError::UnknownType("Nowhere".to_string()));
    }

    #[test]
    fn interfaces_extend_interfaces_only() {
        let mut registry = TypeRegistry::new();
        registry.register_interface("IShape").method("Area", vec![], primitives::DOUBLE).build().unwrap();
        let solid = registry
            .register_interface("ISolid")
            .extends("IShape")
            .method("Volume", vec![], primitives::DOUBLE)
            .build()
            .unwrap();
        assert_eq!(registry.methods(solid, "area", crate::MemberScope::Instance).len(), 1);
        assert_eq!(registry.abstract_methods(solid).len(), 2);

        let err = registry.register_interface("IBad").extends("int").build().unwrap_err();
        assert_eq!(err, RegistrationError::InvalidBase("int".to_string()));
    }
}
