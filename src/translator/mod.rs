//! Per-session marshaling state.
//!
//! The [`Translator`] owns everything that ties host values to one script
//! state: the identity table, per-type metatables, member and invoker
//! caches, attached event handlers and dispatch statistics. Native functions
//! installed in the script state hold it weakly.

pub(crate) mod builtins;
mod metatables;
pub(crate) mod object_table;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use hostbridge_core::{DataType, EventEntry, HostError, HostObject, HostValue, TypeHash};
use hostbridge_registry::{Member, MemberScope, TypeRegistry};
use hostbridge_vm::{FunctionRef, LuaError, LuaState, TableRef, UserDataRef, Value};

use crate::check_type::TypeChecker;
use crate::error::BridgeError;
use crate::method::MethodWrapper;
use crate::proxy::ScriptOverrides;
use object_table::ObjectTable;

pub(crate) use builtins::{EventRegistration, HostException, register_builtin_types};

/// Metatable field marking userdata created by a translator.
const OBJECT_TAG: &str = "__hostbridge";
/// Metatable field marking base-call accessors.
const BASE_TAG: &str = "__hostbridge_base";

/// Call-shape cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Calls that replayed the remembered call shape
    pub cache_hits: u64,
    /// Calls that scanned the overload group
    pub full_resolutions: u64,
}

type MemberKey = (TypeHash, MemberScope, String);

/// Bound invoker cache key; the flag selects base-call aliases.
type InvokerKey = (TypeHash, MemberScope, String, bool);

struct AttachedHandler {
    target: Option<HostObject>,
    event: Rc<EventEntry>,
    handler: HostObject,
}

pub(crate) struct Translator {
    state: LuaState,
    registry: Rc<TypeRegistry>,
    checker: TypeChecker,
    objects: RefCell<ObjectTable>,
    members: RefCell<FxHashMap<MemberKey, Option<Member>>>,
    invokers: RefCell<FxHashMap<InvokerKey, (Rc<MethodWrapper>, FunctionRef)>>,
    constructors: RefCell<FxHashMap<TypeHash, Rc<MethodWrapper>>>,
    handlers: RefCell<Vec<AttachedHandler>>,
    stats: Cell<DispatchStats>,
    chunk_name: String,
    this: Weak<Translator>,
}

impl Translator {
    pub fn new(state: LuaState, registry: Rc<TypeRegistry>, object_capacity: usize, chunk_name: &str) -> Rc<Self> {
        let translator = Rc::new_cyclic(|this: &Weak<Translator>| Translator {
            state: state.clone(),
            registry,
            checker: TypeChecker::new(),
            objects: RefCell::new(ObjectTable::with_capacity(object_capacity)),
            members: RefCell::new(FxHashMap::default()),
            invokers: RefCell::new(FxHashMap::default()),
            constructors: RefCell::new(FxHashMap::default()),
            handlers: RefCell::new(Vec::new()),
            stats: Cell::new(DispatchStats::default()),
            chunk_name: chunk_name.to_string(),
            this: this.clone(),
        });
        let weak = Rc::downgrade(&translator);
        state.set_finalizer(Some(Rc::new(move |_: &LuaState, handle: i32| {
            if let Some(translator) = weak.upgrade() {
                translator.collect_object(handle);
            }
        })));
        translator
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn state(&self) -> &LuaState {
        &self.state
    }

    pub fn checker(&self) -> &TypeChecker {
        &self.checker
    }

    pub fn weak(&self) -> Weak<Translator> {
        self.this.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.get()
    }

    pub fn record_cache_hit(&self) {
        let mut stats = self.stats.get();
        stats.cache_hits += 1;
        self.stats.set(stats);
    }

    pub fn record_full_resolution(&self) {
        let mut stats = self.stats.get();
        stats.full_resolutions += 1;
        self.stats.set(stats);
    }

    /// Number of live entries in the identity table.
    pub fn object_count(&self) -> usize {
        self.objects.borrow().len()
    }

    // ========================================================================
    // Host -> script
    // ========================================================================

    /// Script form of `value`. Objects, arrays and type references are
    /// interned; an adapter backed by a script table yields the table.
    pub fn to_value(&self, value: &HostValue) -> Value {
        match value {
            HostValue::Null => Value::Nil,
            HostValue::Bool(b) => Value::Boolean(*b),
            HostValue::String(s) => Value::String(s.clone()),
            HostValue::Object(obj) => match backing_table(obj) {
                Some(table) => Value::Table(table),
                None => self.wrap(value.clone()),
            },
            HostValue::Array(_) | HostValue::Type(_) => self.wrap(value.clone()),
            HostValue::Table(t) => Value::Table(t.clone()),
            HostValue::Function(f) => Value::Function(f.clone()),
            HostValue::UserData(u) => Value::UserData(u.clone()),
            number => number.as_f64().map(Value::Number).unwrap_or_default(),
        }
    }

    pub fn push(&self, value: &HostValue) {
        let value = self.to_value(value);
        self.state.push(value);
    }

    /// Wrap an internable value in its userdata, reusing the live wrapper.
    pub(crate) fn wrap(&self, value: HostValue) -> Value {
        let metatable = self.metatable_for(&value);
        Value::UserData(self.intern(value, metatable))
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn intern(&self, value: HostValue, metatable: TableRef) -> UserDataRef {
        let existing = self.objects.borrow().handle_of(&value);
        if let Some(handle) = existing {
            if let Some(udata) = self.state.objects_get(handle) {
                trace!(handle, "reusing wrapper");
                return udata;
            }
            // wrapper collected, finalizer not yet run
            warn!(handle, "stale identity entry; re-interning under a new handle");
            let stale = self.objects.borrow_mut().release(handle);
            drop(stale);
            self.state.objects_remove(handle);
        }
        let handle = self.objects.borrow_mut().insert(value);
        let udata = self.state.new_userdata(handle, Some(metatable));
        self.state.pop(1);
        self.state.objects_set(handle, &udata);
        udata
    }

    /// Secondary wrapper for `value` that never becomes its canonical one.
    pub(crate) fn alias(&self, value: HostValue, metatable: TableRef) -> UserDataRef {
        let handle = self.objects.borrow_mut().insert_alias(value);
        let udata = self.state.new_userdata(handle, Some(metatable));
        self.state.pop(1);
        udata
    }

    /// Finalizer for a collected wrapper.
    pub(crate) fn collect_object(&self, handle: i32) {
        let released = self.objects.borrow_mut().release(handle);
        if released.is_some() {
            self.state.objects_remove(handle);
        }
        drop(released);
    }

    // ========================================================================
    // Script -> host
    // ========================================================================

    fn has_tag(udata: &UserDataRef, tag: &str) -> bool {
        udata.metatable().is_some_and(|mt| mt.get(tag).is_truthy())
    }

    /// Host value behind a wrapper created by this translator.
    pub(crate) fn interned(&self, udata: &UserDataRef) -> Option<HostValue> {
        if !Self::has_tag(udata, OBJECT_TAG) {
            return None;
        }
        self.objects.borrow().get(udata.handle()).cloned()
    }

    /// Host value exposed by a registered table through its `__index`.
    pub(crate) fn exposed_object(&self, table: &TableRef) -> Option<HostValue> {
        match table.metatable()?.get("__index") {
            Value::UserData(udata) => self.interned(&udata),
            _ => None,
        }
    }

    /// Wrapped host value or registered table's host value.
    pub(crate) fn host_object_of(&self, value: &Value) -> Option<HostValue> {
        match value {
            Value::UserData(udata) => self.interned(udata),
            Value::Table(table) => self.exposed_object(table),
            _ => None,
        }
    }

    /// Like [`host_object_of`](Self::host_object_of), also accepting
    /// base-call accessors.
    pub(crate) fn receiver_of(&self, value: &Value) -> Option<HostValue> {
        match value {
            Value::UserData(udata) if Self::has_tag(udata, BASE_TAG) => self.objects.borrow().get(udata.handle()).cloned(),
            other => self.host_object_of(other),
        }
    }

    /// Host value for an untyped slot.
    pub(crate) fn generic_value(&self, value: &Value) -> HostValue {
        match value {
            Value::Nil | Value::LightUserData(_) => HostValue::Null,
            Value::Boolean(b) => HostValue::Bool(*b),
            Value::Number(n) => HostValue::Double(*n),
            Value::String(s) => HostValue::String(s.clone()),
            Value::Table(t) => self.exposed_object(t).unwrap_or_else(|| HostValue::Table(t.clone())),
            Value::Function(f) => HostValue::Function(f.clone()),
            Value::UserData(u) => self.interned(u).unwrap_or_else(|| HostValue::UserData(u.clone())),
        }
    }

    /// Convert a script result to `data_type`; `None` uses the generic form.
    pub(crate) fn result_value(&self, value: &Value, data_type: Option<DataType>) -> Result<HostValue, BridgeError> {
        let Some(data_type) = data_type else {
            return Ok(self.generic_value(value));
        };
        if data_type.is_void() {
            return Ok(HostValue::Null);
        }
        match self.checker.convert(self, value, data_type)? {
            Some(converted) => Ok(converted),
            None if value.is_nil() => Ok(HostValue::default_for(data_type)),
            None => Err(BridgeError::Conversion {
                expected: self.registry.data_type_name(data_type),
                found: value.value_type().name(),
            }),
        }
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Source location of the script code calling the running function.
    pub(crate) fn location(&self) -> String {
        let location = self.state.where_(1);
        if location.is_empty() && !self.chunk_name.is_empty() {
            format!("{}: ", self.chunk_name)
        } else {
            location
        }
    }

    /// Script error with the caller's location prefixed.
    pub(crate) fn throw(&self, message: impl AsRef<str>) -> LuaError {
        LuaError::runtime(format!("{}{}", self.location(), message.as_ref()))
    }

    /// Raise a host exception into script as a `HostException` object.
    pub(crate) fn throw_host(&self, error: HostError) -> LuaError {
        let error = error.into_base();
        debug!(error = %error, "host exception raised into script");
        let exception = HostException::new(error, self.location());
        let obj = HostObject::new(builtins::HOST_EXCEPTION, exception);
        LuaError::Runtime(self.wrap(HostValue::Object(obj)))
    }

    /// Host-facing form of a script error.
    pub(crate) fn script_error(&self, error: LuaError) -> BridgeError {
        match error {
            LuaError::Runtime(value) => {
                if let Some(HostValue::Object(obj)) = self.host_object_of(&value) {
                    if let Ok(exception) = obj.borrow::<HostException>() {
                        return BridgeError::Script {
                            message: exception.describe(),
                            inner: Some(exception.error.clone()),
                        };
                    }
                }
                BridgeError::Script {
                    message: value.describe_error(),
                    inner: None,
                }
            }
            LuaError::StackOverflow => BridgeError::StackOverflow,
            LuaError::Panic(message) => BridgeError::Panic(message),
        }
    }

    // ========================================================================
    // Caches
    // ========================================================================

    /// Member `name` of `hash` in `scope`, resolved once per session.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn lookup_member(&self, hash: TypeHash, name: &str, scope: MemberScope) -> Option<Member> {
        let key = (hash, scope, name.to_ascii_lowercase());
        if let Some(found) = self.members.borrow().get(&key) {
            return found.clone();
        }
        let found = self.registry.resolve_member(hash, name, scope);
        trace!(member = name, found = found.is_some(), "member cache miss");
        self.members.borrow_mut().insert(key, found.clone());
        found
    }

    /// Bound invoker for a method group, created on first use.
    pub(crate) fn invoker(
        &self,
        key: InvokerKey,
        create: impl FnOnce() -> MethodWrapper,
    ) -> (Rc<MethodWrapper>, FunctionRef) {
        if let Some(found) = self.invokers.borrow().get(&key) {
            return found.clone();
        }
        let wrapper = Rc::new(create());
        let function = MethodWrapper::into_function(&wrapper);
        self.invokers.borrow_mut().insert(key, (wrapper.clone(), function.clone()));
        (wrapper, function)
    }

    /// Constructor group of `hash`, created on first use.
    pub(crate) fn constructor(&self, hash: TypeHash) -> Rc<MethodWrapper> {
        if let Some(found) = self.constructors.borrow().get(&hash) {
            return found.clone();
        }
        let wrapper = Rc::new(MethodWrapper::constructors(self, hash));
        self.constructors.borrow_mut().insert(hash, wrapper.clone());
        wrapper
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Attach a handler built from `handler` (a script function or a host
    /// delegate) to `event` and remember it for [`close`](Self::close).
    pub(crate) fn attach_handler(
        &self,
        target: Option<HostObject>,
        event: Rc<EventEntry>,
        handler: HostValue,
    ) -> Result<HostObject, HostError> {
        let handler = match handler {
            HostValue::Function(function) => self.event_handler_adapter(event.handler_type, function)?,
            HostValue::Object(obj) if obj.as_delegate().is_some() => obj,
            other => {
                return Err(HostError::argument(format!(
                    "event handler must be a function or delegate, got {}",
                    other.type_name()
                )));
            }
        };
        (event.add)(target.as_ref(), &handler).map_err(HostError::into_base)?;
        debug!(event = %event.name, "attached event handler");
        self.handlers.borrow_mut().push(AttachedHandler {
            target,
            event,
            handler: handler.clone(),
        });
        Ok(handler)
    }

    pub(crate) fn detach_handler(
        &self,
        target: Option<HostObject>,
        event: Rc<EventEntry>,
        handler: &HostObject,
    ) -> Result<(), HostError> {
        (event.remove)(target.as_ref(), handler).map_err(HostError::into_base)?;
        self.handlers
            .borrow_mut()
            .retain(|attached| !(attached.handler.ptr_eq(handler) && Rc::ptr_eq(&attached.event, &event)));
        Ok(())
    }

    /// Detach every handler still attached and drop all session state.
    pub(crate) fn close(&self) {
        let handlers = std::mem::take(&mut *self.handlers.borrow_mut());
        for attached in handlers {
            if let Err(err) = (attached.event.remove)(attached.target.as_ref(), &attached.handler) {
                warn!(event = %attached.event.name, error = %err, "failed to detach event handler");
            }
        }
        self.members.borrow_mut().clear();
        let invokers = std::mem::take(&mut *self.invokers.borrow_mut());
        let constructors = std::mem::take(&mut *self.constructors.borrow_mut());
        let released = self.objects.borrow_mut().clear();
        debug!(objects = released.len(), "closing translator");
        drop((invokers, constructors, released));
        self.state.set_finalizer(None);
    }
}

/// Script table an adapter forwards to, if it is still attached.
pub(crate) fn backing_table(obj: &HostObject) -> Option<TableRef> {
    let overrides = obj.overrides()?;
    overrides.as_any().downcast_ref::<ScriptOverrides>()?.table()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::{HostArray, primitives};

    fn translator() -> Rc<Translator> {
        let mut registry = TypeRegistry::new();
        register_builtin_types(&mut registry).unwrap();
        Translator::new(LuaState::new(), Rc::new(registry), 16, "chunk")
    }

    fn thing() -> HostObject {
        HostObject::new(TypeHash::from_name("Thing"), 1u8)
    }

    #[test]
    fn same_object_same_wrapper() {
        let t = translator();
        let obj = HostValue::Object(thing());
        let a = t.to_value(&obj);
        let b = t.to_value(&obj);
        assert!(a.raw_equal(&b));
        assert_eq!(t.object_count(), 1);
    }

    #[test]
    fn collected_wrapper_releases_handle() {
        let t = translator();
        let obj = HostValue::Object(thing());
        let first = t.to_value(&obj).as_userdata().map(UserDataRef::handle);
        assert_eq!(t.object_count(), 1);
        assert_eq!(t.state().collect_garbage(), 1);
        assert_eq!(t.object_count(), 0);
        let second = t.to_value(&obj).as_userdata().map(UserDataRef::handle);
        assert_ne!(first, second);
    }

    #[test]
    fn stale_entry_is_reinterned() {
        let t = translator();
        let obj = HostValue::Object(thing());
        let first = t.to_value(&obj).as_userdata().map(UserDataRef::handle);
        // wrapper dropped but finalizer not yet run
        let second = t.to_value(&obj);
        assert_ne!(first, second.as_userdata().map(UserDataRef::handle));
        assert_eq!(t.object_count(), 1);
        t.state().collect_garbage();
        assert_eq!(t.object_count(), 1);
        assert!(t.host_object_of(&second).is_some_and(|v| v == obj));
    }

    #[test]
    fn scalars_cross_by_value() {
        let t = translator();
        assert!(matches!(t.to_value(&HostValue::Int32(8)), Value::Number(n) if n == 8.0));
        assert!(matches!(t.to_value(&HostValue::Char('A')), Value::Number(n) if n == 65.0));
        assert!(t.to_value(&HostValue::Null).is_nil());
        assert_eq!(t.object_count(), 0);
    }

    #[test]
    fn generic_numbers_are_doubles() {
        let t = translator();
        assert_eq!(t.generic_value(&Value::Number(2.0)), HostValue::Double(2.0));
        let arr = HostValue::Array(HostArray::new(primitives::INT32, vec![HostValue::Int32(1)]));
        let wrapped = t.to_value(&arr);
        assert_eq!(t.generic_value(&wrapped), arr);
    }

    #[test]
    fn host_exception_carries_location_and_cause() {
        let t = translator();
        let err = t.throw_host(HostError::invocation(HostError::argument("bad value")));
        match t.script_error(err) {
            BridgeError::Script { message, inner } => {
                assert_eq!(message, "chunk: bad value");
                assert_eq!(inner.map(|e| e.message()), Some("bad value".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lookups_are_cached() {
        let t = translator();
        assert!(t.lookup_member(builtins::HOST_EXCEPTION, "message", MemberScope::Instance).is_some());
        assert!(t.lookup_member(builtins::HOST_EXCEPTION, "Nope", MemberScope::Instance).is_none());
        assert_eq!(t.members.borrow().len(), 2);
    }
}
