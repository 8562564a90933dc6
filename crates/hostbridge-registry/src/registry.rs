//! TypeRegistry - storage and lookup for host type metadata.
//!
//! # Thread Safety
//!
//! `TypeRegistry` is **not thread-safe** by design. Types are registered
//! during setup; afterwards the registry is shared read-only by a session.
//! Entries carry `Rc`-based closures and never cross threads.
//!
//! # Example
//!
//! ```
//! use hostbridge_registry::TypeRegistry;
//! use hostbridge_core::primitives;
//!
//! let registry = TypeRegistry::new();
//! assert!(registry.get(primitives::INT32).is_some());
//! assert!(registry.is_assignable(primitives::OBJECT, primitives::STRING));
//! ```

use std::any::{Any, TypeId};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use hostbridge_core::{
    DataType, Dispatch, EventEntry, HostError, HostObject, HostValue, IndexerEntry, MethodEntry, MethodFlags,
    NativeFn, ParamEntry, PrimitiveKind, PropertyEntry, TypeEntry, TypeHash, TypeKind, primitives,
};

use crate::builder::{ClassBuilder, InterfaceBuilder};
use crate::RegistrationError;

/// Which members a lookup considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberScope {
    Instance,
    Static,
}

/// A member resolved by name.
#[derive(Debug, Clone)]
pub enum Member {
    Property(Rc<PropertyEntry>),
    Event(Rc<EventEntry>),
    /// Every overload in scope, most-derived first
    Methods(Vec<Rc<MethodEntry>>),
    NestedType(TypeHash),
}

/// Host type registry.
pub struct TypeRegistry {
    types: FxHashMap<TypeHash, TypeEntry>,
    names: FxHashMap<String, TypeHash>,
    rust_types: FxHashMap<TypeId, TypeHash>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create a registry with the built-in types registered.
    pub fn new() -> Self {
        let mut registry = Self {
            types: FxHashMap::default(),
            names: FxHashMap::default(),
            rust_types: FxHashMap::default(),
        };
        for kind in PrimitiveKind::ALL {
            registry.insert(TypeEntry::new(kind.name(), TypeKind::Primitive));
        }
        for name in ["object", "table", "function", "userdata", "type"] {
            registry.insert(TypeEntry::new(name, TypeKind::Primitive));
        }
        registry
    }

    fn insert(&mut self, entry: TypeEntry) {
        self.names.insert(entry.name.clone(), entry.type_hash);
        self.types.insert(entry.type_hash, entry);
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub fn register(&mut self, entry: TypeEntry) -> Result<TypeHash, RegistrationError> {
        if self.types.contains_key(&entry.type_hash) {
            return Err(RegistrationError::DuplicateType(entry.name));
        }
        if let Some(base) = entry.base {
            match self.types.get(&base) {
                Some(b) if b.is_class() && !b.is_sealed() => {}
                Some(b) => return Err(RegistrationError::InvalidBase(b.name.clone())),
                None => return Err(RegistrationError::UnknownType(base.to_string())),
            }
        }
        let hash = entry.type_hash;
        self.insert(entry);
        Ok(hash)
    }

    /// Associate a Rust type with a registered host type.
    pub fn bind_rust_type<T: Any>(&mut self, hash: TypeHash) {
        self.rust_types.insert(TypeId::of::<T>(), hash);
    }

    /// Start registering Rust type `T` as class `name`.
    pub fn register_class<T: Any>(&mut self, name: &str) -> ClassBuilder<'_, T> {
        ClassBuilder::new(self, name)
    }

    pub fn register_interface(&mut self, name: &str) -> InterfaceBuilder<'_> {
        InterfaceBuilder::new(self, name)
    }

    /// Register a delegate type. Its `Invoke` method calls the wrapped
    /// [`Delegate`](hostbridge_core::Delegate).
    pub fn register_delegate(
        &mut self,
        name: &str,
        params: Vec<ParamEntry>,
        return_type: impl Into<DataType>,
    ) -> Result<TypeHash, RegistrationError> {
        let hash = TypeHash::from_name(name);
        let invoke = MethodEntry::new(hash, "Invoke", params, return_type.into()).with_implementation(NativeFn::new(
            TypeHash::from_method(hash, "Invoke", &[]),
            |ctx: &mut hostbridge_core::CallContext| {
                let delegate = ctx
                    .this_object()?
                    .as_delegate()
                    .ok_or_else(|| HostError::invalid_cast("object is not a delegate"))?;
                let result = delegate.invoke(ctx.args_mut())?;
                ctx.set_return(result);
                Ok(())
            },
        ));
        self.register(TypeEntry::new(name, TypeKind::Delegate).with_method(invoke).as_sealed())
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn get(&self, hash: TypeHash) -> Option<&TypeEntry> {
        self.types.get(&hash)
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeEntry> {
        self.names.get(name).and_then(|hash| self.types.get(hash))
    }

    pub fn hash_of<T: Any>(&self) -> Option<TypeHash> {
        self.rust_types.get(&TypeId::of::<T>()).copied()
    }

    pub fn contains(&self, hash: TypeHash) -> bool {
        self.types.contains_key(&hash)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn type_name(&self, hash: TypeHash) -> String {
        self.get(hash)
            .map(|entry| entry.name.clone())
            .unwrap_or_else(|| hash.to_string())
    }

    pub fn data_type_name(&self, data_type: DataType) -> String {
        let mut name = self.type_name(data_type.type_hash);
        if data_type.is_array {
            name.push_str("[]");
        }
        name
    }

    /// The type followed by its base classes, most-derived first.
    pub fn ancestors(&self, hash: TypeHash) -> Vec<TypeHash> {
        let mut chain = Vec::new();
        let mut current = Some(hash);
        while let Some(h) = current {
            if chain.contains(&h) {
                break;
            }
            chain.push(h);
            current = self.get(h).and_then(|entry| entry.base);
        }
        chain
    }

    /// Every type a value of `hash` can be used as (bases and interfaces),
    /// starting with `hash` itself.
    fn supertypes(&self, hash: TypeHash) -> Vec<TypeHash> {
        let mut seen = FxHashSet::default();
        let mut order = Vec::new();
        let mut pending = vec![hash];
        while let Some(h) = pending.pop() {
            if !seen.insert(h) {
                continue;
            }
            order.push(h);
            if let Some(entry) = self.get(h) {
                pending.extend(entry.interfaces.iter().rev().copied());
                if let Some(base) = entry.base {
                    pending.push(base);
                }
            }
        }
        order
    }

    /// Whether a value whose runtime type is `source` can be used where
    /// `target` is expected.
    pub fn is_assignable(&self, target: TypeHash, source: TypeHash) -> bool {
        if target == source || target == primitives::OBJECT {
            return !source.is_empty();
        }
        self.supertypes(source).contains(&target)
    }

    /// Whether `value` can be passed as `data_type` without conversion.
    pub fn value_matches(&self, value: &HostValue, data_type: DataType) -> bool {
        let data_type = data_type.stripped();
        match value {
            HostValue::Null => {
                data_type.is_array
                    || data_type.is_nullable
                    || !matches!(self.get(data_type.type_hash).map(|e| e.kind), Some(TypeKind::Primitive))
                    || data_type.type_hash == primitives::STRING
                    || data_type.type_hash == primitives::OBJECT
            }
            HostValue::Array(arr) if data_type.is_array => {
                self.is_assignable(data_type.type_hash, arr.element_type())
            }
            _ if data_type.is_array => data_type.type_hash == primitives::OBJECT,
            other => self.is_assignable(data_type.type_hash, other.type_hash()),
        }
    }

    // ========================================================================
    // Members
    // ========================================================================

    fn scope_types(&self, hash: TypeHash) -> Vec<TypeHash> {
        match self.get(hash) {
            Some(entry) if entry.is_interface() => self.supertypes(hash),
            _ => self.ancestors(hash),
        }
    }

    /// Overloads of `name` in scope, most-derived first. A base method
    /// redeclared with the same parameter types in a derived type is hidden.
    pub fn methods(&self, hash: TypeHash, name: &str, scope: MemberScope) -> Vec<Rc<MethodEntry>> {
        let mut found: Vec<Rc<MethodEntry>> = Vec::new();
        for h in self.scope_types(hash) {
            let Some(entry) = self.get(h) else { continue };
            for method in entry.methods_named(name) {
                if method.is_static() != (scope == MemberScope::Static) {
                    continue;
                }
                let signature = method.param_types();
                if found.iter().any(|m| m.param_types() == signature) {
                    continue;
                }
                found.push(method.clone());
            }
        }
        found
    }

    /// Every overridable method an adapter for `hash` may forward, in
    /// declaration order from the root down.
    pub fn overridable_methods(&self, hash: TypeHash) -> Vec<Rc<MethodEntry>> {
        let mut found: Vec<Rc<MethodEntry>> = Vec::new();
        for h in self.scope_types(hash).into_iter().rev() {
            let Some(entry) = self.get(h) else { continue };
            for method in entry.methods.iter().filter(|m| m.is_overridable() && !m.is_static()) {
                let signature = method.param_types();
                match found
                    .iter_mut()
                    .find(|m| m.name == method.name && m.param_types() == signature)
                {
                    Some(existing) => *existing = method.clone(),
                    None => found.push(method.clone()),
                }
            }
        }
        found
    }

    pub fn find_property(&self, hash: TypeHash, name: &str, scope: MemberScope) -> Option<Rc<PropertyEntry>> {
        self.scope_types(hash).into_iter().find_map(|h| {
            self.get(h)?
                .find_property(name)
                .filter(|p| p.is_static == (scope == MemberScope::Static))
                .cloned()
        })
    }

    pub fn find_event(&self, hash: TypeHash, name: &str, scope: MemberScope) -> Option<Rc<EventEntry>> {
        self.scope_types(hash).into_iter().find_map(|h| {
            self.get(h)?
                .find_event(name)
                .filter(|e| e.is_static == (scope == MemberScope::Static))
                .cloned()
        })
    }

    pub fn find_nested(&self, hash: TypeHash, name: &str) -> Option<TypeHash> {
        self.scope_types(hash)
            .into_iter()
            .find_map(|h| self.get(h)?.find_nested(name))
    }

    /// Indexers along the inheritance chain, most-derived first.
    pub fn indexers(&self, hash: TypeHash) -> Vec<Rc<IndexerEntry>> {
        self.scope_types(hash)
            .into_iter()
            .filter_map(|h| self.get(h))
            .flat_map(|entry| entry.indexers.iter().cloned())
            .collect()
    }

    pub fn constructors(&self, hash: TypeHash) -> Vec<Rc<MethodEntry>> {
        self.get(hash)
            .map(|entry| entry.constructors.clone())
            .unwrap_or_default()
    }

    /// Resolve `name` on `hash` within `scope`, ignoring case.
    ///
    /// Fields and properties win over events, events over nested types,
    /// nested types over methods. Nested types are only visible statically.
    pub fn resolve_member(&self, hash: TypeHash, name: &str, scope: MemberScope) -> Option<Member> {
        if let Some(property) = self.find_property(hash, name, scope) {
            return Some(Member::Property(property));
        }
        if let Some(event) = self.find_event(hash, name, scope) {
            return Some(Member::Event(event));
        }
        if scope == MemberScope::Static {
            if let Some(nested) = self.find_nested(hash, name) {
                return Some(Member::NestedType(nested));
            }
        }
        let methods = self.methods(hash, name, scope);
        (!methods.is_empty()).then_some(Member::Methods(methods))
    }

    // ========================================================================
    // Host-side calls
    // ========================================================================

    fn applicable<'m>(&self, candidates: &'m [Rc<MethodEntry>], args: &[HostValue]) -> Option<&'m Rc<MethodEntry>> {
        candidates.iter().find(|m| {
            m.params.len() == args.len()
                && m.params
                    .iter()
                    .zip(args)
                    .all(|(p, a)| p.data_type.is_output_only() || self.value_matches(a, p.data_type))
        })
    }

    /// Call instance method `name` on `obj` through virtual dispatch.
    ///
    /// `args` holds one slot per parameter; output slots may be null on entry.
    pub fn invoke_method(&self, obj: &HostObject, name: &str, args: &mut [HostValue]) -> Result<HostValue, HostError> {
        let candidates = self.methods(obj.type_hash(), name, MemberScope::Instance);
        let method = self.applicable(&candidates, args).ok_or_else(|| {
            HostError::argument(format!("invalid arguments to method: {}.{}", self.type_name(obj.type_hash()), name))
        })?;
        method.invoke(Some(obj), args, Dispatch::Virtual).map_err(HostError::into_base)
    }

    /// Call static method `name` of `hash`.
    pub fn invoke_static(&self, hash: TypeHash, name: &str, args: &mut [HostValue]) -> Result<HostValue, HostError> {
        let candidates = self.methods(hash, name, MemberScope::Static);
        let method = self.applicable(&candidates, args).ok_or_else(|| {
            HostError::argument(format!("invalid arguments to method: {}.{}", self.type_name(hash), name))
        })?;
        method.invoke(None, args, Dispatch::Virtual).map_err(HostError::into_base)
    }

    /// Construct an instance of `hash` with the first applicable constructor.
    pub fn construct(&self, hash: TypeHash, args: &mut [HostValue]) -> Result<HostObject, HostError> {
        let candidates = self.constructors(hash);
        let ctor = self.applicable(&candidates, args).ok_or_else(|| {
            HostError::argument(format!("{} does not contain a matching constructor", self.type_name(hash)))
        })?;
        match ctor.invoke(None, args, Dispatch::Base).map_err(HostError::into_base)? {
            HostValue::Object(obj) => Ok(obj),
            other => Err(HostError::invalid_cast(format!(
                "constructor of {} returned {}",
                self.type_name(hash),
                other.type_name()
            ))),
        }
    }

    /// Abstract methods of `hash`, for diagnostics and adapter checks.
    pub fn abstract_methods(&self, hash: TypeHash) -> Vec<Rc<MethodEntry>> {
        self.overridable_methods(hash)
            .into_iter()
            .filter(|m| m.flags.contains(MethodFlags::ABSTRACT))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::CallContext;

    struct Animal {
        legs: i32,
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .register_interface("INamed")
            .method("Name", vec![], primitives::STRING)
            .build()
            .unwrap();
        registry
            .register_class::<Animal>("Animal")
            .implements("INamed")
            .constructor(vec![], |_| Ok(Animal { legs: 4 }))
            .field("Legs", primitives::INT32, |a: &Animal| a.legs, |a: &mut Animal, v| {
                a.legs = v;
                Ok(())
            })
            .virtual_method("Name", vec![], primitives::STRING, |ctx: &mut CallContext| {
                ctx.set_return("animal");
                Ok(())
            })
            .method("Speak", vec![], primitives::STRING, |ctx: &mut CallContext| {
                ctx.set_return("...");
                Ok(())
            })
            .static_method("Kingdom", vec![], primitives::STRING, |ctx: &mut CallContext| {
                ctx.set_return("animalia");
                Ok(())
            })
            .build()
            .unwrap();
        registry
            .register_class::<Animal>("Dog")
            .base("Animal")
            .constructor(vec![], |_| Ok(Animal { legs: 4 }))
            .virtual_method("Name", vec![], primitives::STRING, |ctx: &mut CallContext| {
                ctx.set_return("dog");
                Ok(())
            })
            .build()
            .unwrap();
        registry
    }

    #[test]
    fn primitives_are_registered() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.lookup("int").map(|e| e.type_hash), Some(primitives::INT32));
        assert!(registry.get(primitives::OBJECT).is_some());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = TypeRegistry::new();
        let err = registry.register(TypeEntry::new("int", TypeKind::Class)).unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateType("int".to_string()));
    }

    #[test]
    fn unknown_base_fails() {
        let mut registry = TypeRegistry::new();
        let entry = TypeEntry::new("Orphan", TypeKind::Class).with_base(TypeHash::from_name("Missing"));
        assert!(matches!(registry.register(entry), Err(RegistrationError::UnknownType(_))));
    }

    #[test]
    fn assignability_follows_bases_and_interfaces() {
        let registry = registry();
        let dog = TypeHash::from_name("Dog");
        let animal = TypeHash::from_name("Animal");
        let named = TypeHash::from_name("INamed");
        assert!(registry.is_assignable(animal, dog));
        assert!(registry.is_assignable(named, dog));
        assert!(registry.is_assignable(primitives::OBJECT, dog));
        assert!(!registry.is_assignable(dog, animal));
    }

    #[test]
    fn derived_method_hides_base_overload() {
        let registry = registry();
        let methods = registry.methods(TypeHash::from_name("Dog"), "name", MemberScope::Instance);
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].owner, TypeHash::from_name("Dog"));
    }

    #[test]
    fn instance_and_static_scopes_are_separate() {
        let registry = registry();
        let animal = TypeHash::from_name("Animal");
        assert!(registry.resolve_member(animal, "Kingdom", MemberScope::Instance).is_none());
        assert!(matches!(
            registry.resolve_member(animal, "kingdom", MemberScope::Static),
            Some(Member::Methods(_))
        ));
        assert!(matches!(
            registry.resolve_member(animal, "legs", MemberScope::Instance),
            Some(Member::Property(_))
        ));
    }

    #[test]
    fn host_side_virtual_call() {
        let registry = registry();
        let dog = registry.construct(TypeHash::from_name("Dog"), &mut []).unwrap();
        let name = registry.invoke_method(&dog, "Name", &mut []).unwrap();
        assert_eq!(name, HostValue::string("dog"));
        let speak = registry.invoke_method(&dog, "Speak", &mut []).unwrap();
        assert_eq!(speak, HostValue::string("..."));
    }

    #[test]
    fn overridable_methods_collapse_overrides() {
        let registry = registry();
        let methods = registry.overridable_methods(TypeHash::from_name("Dog"));
        let names: Vec<_> = methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Name"]);
        assert_eq!(methods[0].owner, TypeHash::from_name("Dog"));
    }

    #[test]
    fn null_matches_reference_types_only() {
        let registry = registry();
        assert!(registry.value_matches(&HostValue::Null, DataType::simple(TypeHash::from_name("Animal"))));
        assert!(registry.value_matches(&HostValue::Null, DataType::simple(primitives::STRING)));
        assert!(!registry.value_matches(&HostValue::Null, DataType::simple(primitives::INT32)));
        assert!(registry.value_matches(&HostValue::Null, DataType::simple(primitives::INT32).as_nullable()));
    }
}
