//! Full userdata: an opaque integer handle plus a metatable.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::TableRef;

pub(crate) struct UserData {
    handle: i32,
    metatable: RefCell<Option<TableRef>>,
    finalizers: Weak<RefCell<Vec<i32>>>,
}

impl Drop for UserData {
    // Queue the handle; the finalizer hook runs on the next collection.
    fn drop(&mut self) {
        if let Some(queue) = self.finalizers.upgrade() {
            if let Ok(mut queue) = queue.try_borrow_mut() {
                queue.push(self.handle);
            }
        }
    }
}

/// Shared reference to a userdata value.
#[derive(Clone)]
pub struct UserDataRef(pub(crate) Rc<UserData>);

impl UserDataRef {
    pub(crate) fn new(handle: i32, metatable: Option<TableRef>, finalizers: Weak<RefCell<Vec<i32>>>) -> Self {
        Self(Rc::new(UserData {
            handle,
            metatable: RefCell::new(metatable),
            finalizers,
        }))
    }

    /// The integer payload.
    pub fn handle(&self) -> i32 {
        self.0.handle
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.0.metatable.borrow().clone()
    }

    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        *self.0.metatable.borrow_mut() = metatable;
    }

    pub fn ptr_eq(&self, other: &UserDataRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_ptr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<UserData> {
        Rc::downgrade(&self.0)
    }
}
