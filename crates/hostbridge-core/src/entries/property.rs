//! Fields, properties and indexers.

use std::fmt;
use std::rc::Rc;

use crate::{DataType, HostError, HostObject, HostValue};

/// Reads a member; receives `None` for static members.
pub type Getter = Rc<dyn Fn(Option<&HostObject>) -> Result<HostValue, HostError>>;

/// Writes a member; receives `None` for static members.
pub type Setter = Rc<dyn Fn(Option<&HostObject>, HostValue) -> Result<(), HostError>>;

pub type IndexGetter = Rc<dyn Fn(&HostObject, &HostValue) -> Result<HostValue, HostError>>;

pub type IndexSetter = Rc<dyn Fn(&HostObject, &HostValue, HostValue) -> Result<(), HostError>>;

/// Box a closure as a [`Getter`].
pub fn getter<F>(f: F) -> Getter
where
    F: Fn(Option<&HostObject>) -> Result<HostValue, HostError> + 'static,
{
    Rc::new(f)
}

/// Box a closure as a [`Setter`].
pub fn setter<F>(f: F) -> Setter
where
    F: Fn(Option<&HostObject>, HostValue) -> Result<(), HostError> + 'static,
{
    Rc::new(f)
}

pub fn index_getter<F>(f: F) -> IndexGetter
where
    F: Fn(&HostObject, &HostValue) -> Result<HostValue, HostError> + 'static,
{
    Rc::new(f)
}

pub fn index_setter<F>(f: F) -> IndexSetter
where
    F: Fn(&HostObject, &HostValue, HostValue) -> Result<(), HostError> + 'static,
{
    Rc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Field,
    Property,
}

/// A field or property.
///
/// Fields always have a getter; a field without a setter is read-only.
/// Properties may lack either accessor.
#[derive(Clone)]
pub struct PropertyEntry {
    pub name: String,
    pub data_type: DataType,
    pub kind: PropertyKind,
    pub is_static: bool,
    pub getter: Option<Getter>,
    pub setter: Option<Setter>,
}

impl PropertyEntry {
    pub fn field(name: impl Into<String>, data_type: impl Into<DataType>, getter: Getter) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            kind: PropertyKind::Field,
            is_static: false,
            getter: Some(getter),
            setter: None,
        }
    }

    pub fn property(name: impl Into<String>, data_type: impl Into<DataType>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            kind: PropertyKind::Property,
            is_static: false,
            getter: None,
            setter: None,
        }
    }

    pub fn with_getter(mut self, getter: Getter) -> Self {
        self.getter = Some(getter);
        self
    }

    pub fn with_setter(mut self, setter: Setter) -> Self {
        self.setter = Some(setter);
        self
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn is_property(&self) -> bool {
        self.kind == PropertyKind::Property
    }

    pub fn get(&self, this: Option<&HostObject>) -> Result<HostValue, HostError> {
        match &self.getter {
            Some(getter) => getter(this).map_err(HostError::invocation),
            None => Err(HostError::inaccessible(format!("property '{}' has no getter", self.name))),
        }
    }

    pub fn set(&self, this: Option<&HostObject>, value: HostValue) -> Result<(), HostError> {
        match &self.setter {
            Some(setter) => setter(this, value).map_err(HostError::invocation),
            None => Err(HostError::inaccessible(format!("'{}' is read-only", self.name))),
        }
    }
}

impl fmt::Debug for PropertyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}

/// A single-key indexer (`obj[key]`).
#[derive(Clone)]
pub struct IndexerEntry {
    pub key_type: DataType,
    pub value_type: DataType,
    pub getter: Option<IndexGetter>,
    pub setter: Option<IndexSetter>,
}

impl IndexerEntry {
    pub fn new(key_type: impl Into<DataType>, value_type: impl Into<DataType>) -> Self {
        Self {
            key_type: key_type.into(),
            value_type: value_type.into(),
            getter: None,
            setter: None,
        }
    }

    pub fn with_getter(mut self, getter: IndexGetter) -> Self {
        self.getter = Some(getter);
        self
    }

    pub fn with_setter(mut self, setter: IndexSetter) -> Self {
        self.setter = Some(setter);
        self
    }
}

impl fmt::Debug for IndexerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexerEntry")
            .field("key_type", &self.key_type)
            .field("value_type", &self.value_type)
            .finish_non_exhaustive()
    }
}
