//! Host type descriptions.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::{HostObject, TypeHash};

use super::{EventEntry, IndexerEntry, MethodEntry, PropertyEntry};

/// What kind of host type an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Built-in scalar or script reference type
    Primitive,
    Class,
    Interface,
    /// Callable signature; instances wrap a [`Delegate`](crate::Delegate)
    Delegate,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u8 {
        /// Cannot be constructed directly
        const ABSTRACT = 1 << 0;
        /// Cannot be subclassed by adapters
        const SEALED = 1 << 1;
    }
}

/// Registry entry for one host type.
///
/// Member lists hold only members declared on this type; inherited members
/// are found by walking `base` and `interfaces` through the registry.
#[derive(Clone)]
pub struct TypeEntry {
    pub name: String,
    pub type_hash: TypeHash,
    pub kind: TypeKind,
    pub flags: TypeFlags,
    pub base: Option<TypeHash>,
    pub interfaces: Vec<TypeHash>,
    pub constructors: Vec<Rc<MethodEntry>>,
    pub methods: Vec<Rc<MethodEntry>>,
    pub properties: Vec<Rc<PropertyEntry>>,
    pub events: Vec<Rc<EventEntry>>,
    pub indexers: Vec<Rc<IndexerEntry>>,
    /// Nested types by short name
    pub nested: Vec<(String, TypeHash)>,
    /// Custom string form for script-side `tostring`
    pub display: Option<Rc<dyn Fn(&HostObject) -> String>>,
}

impl TypeEntry {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        let name = name.into();
        Self {
            type_hash: TypeHash::from_name(&name),
            name,
            kind,
            flags: TypeFlags::empty(),
            base: None,
            interfaces: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            indexers: Vec::new(),
            nested: Vec::new(),
            display: None,
        }
    }

    pub fn with_base(mut self, base: TypeHash) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_interface(mut self, interface: TypeHash) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn with_constructor(mut self, constructor: MethodEntry) -> Self {
        self.constructors.push(Rc::new(constructor));
        self
    }

    pub fn with_method(mut self, method: MethodEntry) -> Self {
        self.methods.push(Rc::new(method));
        self
    }

    pub fn with_property(mut self, property: PropertyEntry) -> Self {
        self.properties.push(Rc::new(property));
        self
    }

    pub fn with_event(mut self, event: EventEntry) -> Self {
        self.events.push(Rc::new(event));
        self
    }

    pub fn with_indexer(mut self, indexer: IndexerEntry) -> Self {
        self.indexers.push(Rc::new(indexer));
        self
    }

    pub fn with_nested(mut self, name: impl Into<String>, nested: TypeHash) -> Self {
        self.nested.push((name.into(), nested));
        self
    }

    pub fn with_display(mut self, display: Rc<dyn Fn(&HostObject) -> String>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn as_abstract(mut self) -> Self {
        self.flags |= TypeFlags::ABSTRACT;
        self
    }

    pub fn as_sealed(mut self) -> Self {
        self.flags |= TypeFlags::SEALED;
        self
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn is_delegate(&self) -> bool {
        self.kind == TypeKind::Delegate
    }

    pub fn is_class(&self) -> bool {
        self.kind == TypeKind::Class
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeFlags::ABSTRACT)
    }

    pub fn is_sealed(&self) -> bool {
        self.flags.contains(TypeFlags::SEALED)
    }

    /// Declared methods named `name`, ignoring case, in declaration order.
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Rc<MethodEntry>> + 'a {
        self.methods.iter().filter(move |m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn find_property(&self, name: &str) -> Option<&Rc<PropertyEntry>> {
        self.properties.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn find_event(&self, name: &str) -> Option<&Rc<EventEntry>> {
        self.events.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn find_nested(&self, name: &str) -> Option<TypeHash> {
        self.nested
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, hash)| *hash)
    }

    /// The `Invoke` method of a delegate type.
    pub fn delegate_invoke(&self) -> Option<&Rc<MethodEntry>> {
        if self.is_delegate() {
            self.methods_named("Invoke").next()
        } else {
            None
        }
    }
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("name", &self.name)
            .field("type_hash", &self.type_hash)
            .field("kind", &self.kind)
            .field("base", &self.base)
            .field("methods", &self.methods.len())
            .field("properties", &self.properties.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::{ParamEntry, getter};
    use crate::{DataType, HostValue, primitives};

    fn counter() -> TypeEntry {
        let hash = TypeHash::from_name("Counter");
        TypeEntry::new("Counter", TypeKind::Class)
            .with_property(PropertyEntry::field("Value", primitives::INT32, getter(|_| Ok(HostValue::Int32(0)))))
            .with_method(MethodEntry::new(
                hash,
                "Add",
                vec![ParamEntry::new("n", primitives::INT32)],
                DataType::simple(primitives::INT32),
            ))
            .with_method(MethodEntry::new(
                hash,
                "Add",
                vec![ParamEntry::new("n", primitives::DOUBLE)],
                DataType::simple(primitives::DOUBLE),
            ))
    }

    #[test]
    fn lookups_ignore_case() {
        let entry = counter();
        assert!(entry.find_property("value").is_some());
        assert_eq!(entry.methods_named("ADD").count(), 2);
        assert!(entry.find_event("Value").is_none());
    }

    #[test]
    fn hash_comes_from_name() {
        assert_eq!(counter().type_hash, TypeHash::from_name("Counter"));
    }

    #[test]
    fn only_delegates_have_invoke() {
        let d = TypeEntry::new("Handler", TypeKind::Delegate).with_method(MethodEntry::new(
            TypeHash::from_name("Handler"),
            "Invoke",
            vec![],
            DataType::void(),
        ));
        assert!(d.delegate_invoke().is_some());
        assert!(counter().delegate_invoke().is_none());
    }
}
