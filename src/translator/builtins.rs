//! Types and globals every session installs.
//!
//! `HostException` carries host errors raised into script.
//! `EventRegistration` is what reading an event member yields; script
//! attaches handlers with `obj.Event:Add(fn)`. The globals expose type
//! import, script-side subclassing and overload selection by signature.

use std::rc::{Rc, Weak};

use tracing::debug;

use hostbridge_core::{CallContext, EventEntry, HostError, HostObject, HostValue, ParamEntry, TypeHash, primitives};
use hostbridge_registry::{Member, MemberScope, RegistrationError, TypeRegistry};
use hostbridge_vm::{LuaError, LuaState, TableRef, Value};

use super::Translator;
use crate::error::BridgeError;
use crate::method::{MethodWrapper, Receiver, find_by_signature};
use crate::proxy::ScriptOverrides;

pub(crate) const HOST_EXCEPTION: TypeHash = TypeHash::from_name("HostException");
pub(crate) const EVENT_REGISTRATION: TypeHash = TypeHash::from_name("EventRegistration");

/// A host error as seen by script, with the script location it was raised
/// at.
pub(crate) struct HostException {
    pub error: HostError,
    pub location: String,
}

impl HostException {
    pub fn new(error: HostError, location: String) -> Self {
        Self { error, location }
    }

    pub fn describe(&self) -> String {
        format!("{}{}", self.location, self.error.message())
    }
}

/// An event member bound to its target.
pub(crate) struct EventRegistration {
    target: Option<HostObject>,
    event: Rc<EventEntry>,
    session: Weak<Translator>,
}

impl EventRegistration {
    pub fn new(target: Option<HostObject>, event: Rc<EventEntry>, session: Weak<Translator>) -> Self {
        Self { target, event, session }
    }

    fn parts(ctx: &CallContext) -> Result<(Option<HostObject>, Rc<EventEntry>, Rc<Translator>), HostError> {
        let this = ctx.this::<EventRegistration>()?;
        let translator = this
            .session
            .upgrade()
            .ok_or_else(|| HostError::exception("script session has been closed"))?;
        Ok((this.target.clone(), this.event.clone(), translator))
    }
}

pub(crate) fn register_builtin_types(registry: &mut TypeRegistry) -> Result<(), RegistrationError> {
    registry
        .register_class::<HostException>("HostException")
        .readonly_property("Message", primitives::STRING, |e: &HostException| e.error.message())
        .readonly_property("Kind", primitives::STRING, |e: &HostException| format!("{:?}", e.error.kind()))
        .readonly_property("Location", primitives::STRING, |e: &HostException| e.location.clone())
        .readonly_property("InnerMessage", primitives::STRING, |e: &HostException| {
            e.error.inner().map(HostError::message)
        })
        .display(HostException::describe)
        .sealed()
        .build()?;

    registry
        .register_class::<EventRegistration>("EventRegistration")
        .method(
            "Add",
            vec![ParamEntry::new("handler", primitives::OBJECT)],
            primitives::OBJECT,
            |ctx: &mut CallContext| {
                let handler: HostValue = ctx.arg(0)?;
                let (target, event, translator) = EventRegistration::parts(ctx)?;
                let attached = translator.attach_handler(target, event, handler)?;
                ctx.set_return(attached);
                Ok(())
            },
        )
        .method(
            "Remove",
            vec![ParamEntry::new("handler", primitives::OBJECT)],
            hostbridge_core::DataType::void(),
            |ctx: &mut CallContext| {
                let handler: HostObject = ctx.arg(0)?;
                let (target, event, translator) = EventRegistration::parts(ctx)?;
                translator.detach_handler(target, event, &handler)
            },
        )
        .display(|r: &EventRegistration| format!("event {}", r.event.name))
        .sealed()
        .build()?;
    Ok(())
}

impl Translator {
    /// Install `import_type`, `make_object`, `free_object`,
    /// `get_method_bysig` and `get_constructor_bysig` as globals.
    pub(crate) fn install_globals(&self) -> Result<(), LuaError> {
        let globals = self.state.globals();
        let natives: [(&str, fn(&Translator, &LuaState) -> Result<usize, LuaError>); 5] = [
            ("import_type", Translator::import_type_global),
            ("make_object", Translator::make_object),
            ("free_object", Translator::free_object),
            ("get_method_bysig", Translator::get_method_bysig),
            ("get_constructor_bysig", Translator::get_constructor_bysig),
        ];
        for (name, handler) in natives {
            globals.set(name, self.native(name, handler))?;
        }
        Ok(())
    }

    fn raise(&self, err: BridgeError) -> LuaError {
        match err {
            BridgeError::Host(err) => self.throw_host(err),
            BridgeError::StackOverflow => LuaError::StackOverflow,
            other => self.throw(other.to_string()),
        }
    }

    fn type_argument(&self, state: &LuaState, idx: i32) -> Result<TypeHash, LuaError> {
        match self.host_object_of(&state.value(idx)) {
            Some(HostValue::Type(hash)) => Ok(hash),
            _ => Err(self.throw(format!("argument number {idx} is not a type reference"))),
        }
    }

    fn type_names(&self, state: &LuaState, first: i32) -> Result<Vec<String>, LuaError> {
        (first..=state.top())
            .map(|idx| match state.value(idx) {
                Value::String(name) => Ok(name.to_string()),
                _ => Err(self.throw(format!("argument number {idx} is not a type name"))),
            })
            .collect()
    }

    /// `import_type(name)`: type reference or nil.
    fn import_type_global(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Some(name) = state.to_str(1) else {
            return Err(self.throw("import_type expects a type name"));
        };
        match self.registry.lookup(&name) {
            Some(entry) => {
                let hash = entry.type_hash;
                state.push(self.wrap(HostValue::Type(hash)));
            }
            None => state.push_nil(),
        }
        Ok(1)
    }

    /// `make_object(table, type_name)`: bind `table` to a new host object
    /// whose overridable methods forward to the table's functions.
    /// Members the table lacks resolve on the host object and `table.base`
    /// reaches the base implementations.
    fn make_object(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Value::Table(table) = state.value(1) else {
            return Err(self.throw("make_object expects a table"));
        };
        let Some(name) = state.to_str(2) else {
            return Err(self.throw("make_object expects a type name"));
        };
        let Some(hash) = self.registry.lookup(&name).map(|entry| entry.type_hash) else {
            return Err(self.throw(format!("unknown type {name}")));
        };
        let obj = self.table_adapter(hash, table.clone()).map_err(|err| self.raise(err))?;
        let wrapper = self.wrap(HostValue::Object(obj.clone()));

        let metatable = TableRef::new();
        metatable.set("__index", wrapper)?;
        metatable.set("__newindex", self.native("__newindex", Translator::new_index_registered))?;
        table.set_metatable(Some(metatable));
        let base = self.alias(HostValue::Object(obj), self.searchbase_metatable());
        table.set("base", base)?;

        debug!(type_name = %name, "registered script object");
        state.push(table);
        Ok(1)
    }

    /// Assignments to a registered table set host properties the object
    /// declares and store everything else in the table.
    fn new_index_registered(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Value::Table(table) = state.value(1) else {
            return Err(self.throw("trying to index an invalid object reference"));
        };
        let key = state.value(2);
        let value = state.value(3);
        if let (Some(name), Some(HostValue::Object(obj))) = (key.as_str(), self.exposed_object(&table)) {
            let hash = obj.type_hash();
            if matches!(self.lookup_member(hash, name, MemberScope::Instance), Some(Member::Property(_))) {
                if let Some(detail) = self.set_member(hash, Some(&obj), name, &value, MemberScope::Instance)? {
                    return Err(self.throw(detail));
                }
                return Ok(0);
            }
        }
        table.set(key, value)?;
        Ok(0)
    }

    /// `free_object(table)`: undo `make_object`. The host object stops
    /// forwarding and the table becomes a plain table again.
    fn free_object(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Value::Table(table) = state.value(1) else {
            return Err(self.throw("free_object expects a table"));
        };
        if let Some(HostValue::Object(obj)) = self.exposed_object(&table) {
            if let Some(overrides) = obj.overrides() {
                if let Some(script) = overrides.as_any().downcast_ref::<ScriptOverrides>() {
                    script.detach();
                }
            }
        }
        table.set_metatable(None);
        table.set("base", Value::Nil)?;
        Ok(0)
    }

    /// `get_method_bysig(target, name, type_names...)`: one overload,
    /// bound to `target` when it is an object.
    fn get_method_bysig(&self, state: &LuaState) -> Result<usize, LuaError> {
        let (hash, scope, receiver) = match self.host_object_of(&state.value(1)) {
            Some(HostValue::Type(hash)) => (hash, MemberScope::Static, Receiver::None),
            Some(HostValue::Object(obj)) => (obj.type_hash(), MemberScope::Instance, Receiver::Bound(obj)),
            _ => return Err(self.throw("get_method_bysig expects an object or type reference")),
        };
        let Some(name) = state.to_str(2) else {
            return Err(self.throw("get_method_bysig expects a method name"));
        };
        let type_names = self.type_names(state, 3)?;
        let methods = self.registry.methods(hash, &name, scope);
        let method = find_by_signature(self, &methods, &type_names)
            .map_err(|msg| self.throw(msg))?
            .clone();
        let wrapper = Rc::new(MethodWrapper::exact(self, method, receiver));
        state.push(MethodWrapper::into_function(&wrapper));
        Ok(1)
    }

    /// `get_constructor_bysig(type, type_names...)`.
    fn get_constructor_bysig(&self, state: &LuaState) -> Result<usize, LuaError> {
        let hash = self.type_argument(state, 1)?;
        let type_names = self.type_names(state, 2)?;
        let constructors = self.registry.constructors(hash);
        let constructor = find_by_signature(self, &constructors, &type_names)
            .map_err(|msg| self.throw(msg))?
            .clone();
        let wrapper = Rc::new(MethodWrapper::exact(self, constructor, Receiver::None));
        state.push(MethodWrapper::into_function(&wrapper));
        Ok(1)
    }
}
