//! Registry entries describing host types and their members.

mod event;
mod method;
mod property;
mod type_entry;

pub use event::{EventAccessor, EventEntry, event_accessor};
pub use method::{Dispatch, MethodEntry, MethodFlags, ParamEntry};
pub use property::{
    Getter, IndexGetter, IndexSetter, IndexerEntry, PropertyEntry, PropertyKind, Setter, getter, index_getter, index_setter,
    setter,
};
pub use type_entry::{TypeEntry, TypeFlags, TypeKind};
