//! Events: named handler lists with add/remove accessors.

use std::fmt;
use std::rc::Rc;

use crate::{HostError, HostObject, TypeHash};

/// Adds or removes a handler delegate; receives `None` for static events.
pub type EventAccessor = Rc<dyn Fn(Option<&HostObject>, &HostObject) -> Result<(), HostError>>;

/// Box a closure as an [`EventAccessor`].
pub fn event_accessor<F>(f: F) -> EventAccessor
where
    F: Fn(Option<&HostObject>, &HostObject) -> Result<(), HostError> + 'static,
{
    Rc::new(f)
}

#[derive(Clone)]
pub struct EventEntry {
    pub name: String,
    /// Delegate type of accepted handlers
    pub handler_type: TypeHash,
    pub is_static: bool,
    pub add: EventAccessor,
    pub remove: EventAccessor,
}

impl EventEntry {
    pub fn new(name: impl Into<String>, handler_type: TypeHash, add: EventAccessor, remove: EventAccessor) -> Self {
        Self {
            name: name.into(),
            handler_type,
            is_static: false,
            add,
            remove,
        }
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }
}

impl fmt::Debug for EventEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEntry")
            .field("name", &self.name)
            .field("handler_type", &self.handler_type)
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}
