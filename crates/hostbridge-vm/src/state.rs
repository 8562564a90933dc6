//! The interpreter state: value stack, call frames, registry and hooks.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::userdata::UserData;
use crate::value::format_number;
use crate::{FunctionRef, LuaError, TableRef, UserDataRef, Value, ValueType};

/// Request all results from a call.
pub const MULTRET: i32 = -1;

/// Default capacity of the value stack.
const DEFAULT_MAX_STACK: usize = 8000;

/// Maximum nesting of function calls.
const MAX_CALL_DEPTH: usize = 200;

/// Maximum length of an `__index`/`__newindex` chain.
const MAX_META_CHAIN: usize = 100;

/// Converts an error that escaped an unprotected call into the error
/// returned to the caller.
pub type PanicHandler = dyn Fn(&LuaState, &LuaError) -> LuaError;

/// Called once per collected userdata with its handle.
pub type FinalizerHook = dyn Fn(&LuaState, i32);

struct Frame {
    base: usize,
    name: Rc<str>,
}

struct StateInner {
    stack: RefCell<Vec<Value>>,
    frames: RefCell<Vec<Frame>>,
    globals: TableRef,
    registry: TableRef,
    refs: RefCell<FxHashMap<i32, Value>>,
    next_ref: Cell<i32>,
    objects: RefCell<FxHashMap<i32, Weak<UserData>>>,
    finalizer_queue: Rc<RefCell<Vec<i32>>>,
    finalizer: RefCell<Option<Rc<FinalizerHook>>>,
    panic: RefCell<Option<Rc<PanicHandler>>>,
    max_stack: usize,
    protected: Cell<usize>,
}

/// Handle to an interpreter state.
///
/// Cloning is cheap and yields another handle to the same state. All
/// operations take `&self` and never hold an internal borrow across a call
/// into a function, so functions may re-enter the state freely.
#[derive(Clone)]
pub struct LuaState(Rc<StateInner>);

/// Non-owning handle to an interpreter state.
#[derive(Clone)]
pub struct WeakState(Weak<StateInner>);

impl WeakState {
    pub fn upgrade(&self) -> Option<LuaState> {
        self.0.upgrade().map(LuaState)
    }
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaState {
    pub fn new() -> Self {
        Self::with_max_stack(DEFAULT_MAX_STACK)
    }

    /// Create a state whose value stack holds at most `max_stack` slots.
    pub fn with_max_stack(max_stack: usize) -> Self {
        Self(Rc::new(StateInner {
            stack: RefCell::new(Vec::with_capacity(64)),
            frames: RefCell::new(Vec::new()),
            globals: TableRef::new(),
            registry: TableRef::new(),
            refs: RefCell::new(FxHashMap::default()),
            next_ref: Cell::new(1),
            objects: RefCell::new(FxHashMap::default()),
            finalizer_queue: Rc::new(RefCell::new(Vec::new())),
            finalizer: RefCell::new(None),
            panic: RefCell::new(None),
            max_stack,
            protected: Cell::new(0),
        }))
    }

    pub fn downgrade(&self) -> WeakState {
        WeakState(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &LuaState) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ========================================================================
    // Stack addressing
    // ========================================================================

    fn base(&self) -> usize {
        self.0.frames.borrow().last().map(|f| f.base).unwrap_or(0)
    }

    /// Absolute slot for a frame-relative index, if it names a live slot.
    fn slot(&self, idx: i32) -> Option<usize> {
        let len = self.0.stack.borrow().len();
        let base = self.base();
        if idx > 0 {
            let slot = base + idx as usize - 1;
            (slot < len).then_some(slot)
        } else if idx < 0 {
            let back = (-idx) as usize;
            (back <= len - base).then(|| len - back)
        } else {
            None
        }
    }

    /// Number of values in the current frame.
    pub fn top(&self) -> i32 {
        (self.0.stack.borrow().len() - self.base()) as i32
    }

    /// Grow (with nils) or shrink the current frame to `idx` values.
    /// Negative indices count from the top.
    pub fn set_top(&self, idx: i32) {
        let base = self.base();
        let mut stack = self.0.stack.borrow_mut();
        let new_len = if idx >= 0 {
            base + idx as usize
        } else {
            (stack.len() as i64 + idx as i64 + 1).max(base as i64) as usize
        };
        stack.resize(new_len, Value::Nil);
    }

    pub fn pop(&self, n: i32) {
        self.set_top(-n - 1);
    }

    /// Convert a negative index into the equivalent positive one.
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 { idx } else { self.top() + idx + 1 }
    }

    /// Whether `extra` more values fit on the stack.
    pub fn check_stack(&self, extra: usize) -> bool {
        self.0.stack.borrow().len() + extra <= self.0.max_stack
    }

    // ========================================================================
    // Push / read
    // ========================================================================

    pub fn push(&self, value: impl Into<Value>) {
        self.0.stack.borrow_mut().push(value.into());
    }

    pub fn push_nil(&self) {
        self.push(Value::Nil);
    }

    pub fn push_boolean(&self, b: bool) {
        self.push(Value::Boolean(b));
    }

    pub fn push_number(&self, n: f64) {
        self.push(Value::Number(n));
    }

    pub fn push_string(&self, s: &str) {
        self.push(Value::string(s));
    }

    /// Push a copy of the value at `idx`.
    pub fn push_value(&self, idx: i32) {
        let value = self.value(idx);
        self.push(value);
    }

    /// The value at `idx`, `nil` when the index is not valid.
    pub fn value(&self, idx: i32) -> Value {
        self.slot(idx)
            .map(|slot| self.0.stack.borrow()[slot].clone())
            .unwrap_or_default()
    }

    pub fn type_of(&self, idx: i32) -> ValueType {
        match self.slot(idx) {
            Some(slot) => self.0.stack.borrow()[slot].value_type(),
            None => ValueType::None,
        }
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), ValueType::Nil | ValueType::None)
    }

    /// True only for values whose runtime tag is numeric.
    pub fn is_number(&self, idx: i32) -> bool {
        self.type_of(idx) == ValueType::Number
    }

    pub fn is_string(&self, idx: i32) -> bool {
        self.type_of(idx) == ValueType::String
    }

    pub fn is_table(&self, idx: i32) -> bool {
        self.type_of(idx) == ValueType::Table
    }

    pub fn is_function(&self, idx: i32) -> bool {
        self.type_of(idx) == ValueType::Function
    }

    pub fn is_userdata(&self, idx: i32) -> bool {
        self.type_of(idx) == ValueType::UserData
    }

    /// Numeric value; `None` for anything not tagged as a number.
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value(idx).as_number()
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).is_truthy()
    }

    /// String value; numbers are formatted, other tags yield `None`.
    pub fn to_str(&self, idx: i32) -> Option<Rc<str>> {
        match self.value(idx) {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(format_number(n).into()),
            _ => None,
        }
    }

    pub fn to_table(&self, idx: i32) -> Option<TableRef> {
        self.value(idx).as_table().cloned()
    }

    pub fn to_function(&self, idx: i32) -> Option<FunctionRef> {
        self.value(idx).as_function().cloned()
    }

    pub fn to_userdata(&self, idx: i32) -> Option<UserDataRef> {
        self.value(idx).as_userdata().cloned()
    }

    /// Move the top value into `idx`, shifting values above it up.
    pub fn insert(&self, idx: i32) {
        if let Some(slot) = self.slot(idx) {
            let mut stack = self.0.stack.borrow_mut();
            if let Some(value) = stack.pop() {
                stack.insert(slot, value);
            }
        }
    }

    /// Remove the value at `idx`, shifting values above it down.
    pub fn remove(&self, idx: i32) {
        if let Some(slot) = self.slot(idx) {
            self.0.stack.borrow_mut().remove(slot);
        }
    }

    /// Pop the top value into `idx`.
    pub fn replace(&self, idx: i32) {
        let Some(slot) = self.slot(idx) else { return };
        let mut stack = self.0.stack.borrow_mut();
        if let Some(value) = stack.pop() {
            if slot < stack.len() {
                stack[slot] = value;
            }
        }
    }

    /// Pop `n` values, bottom first.
    pub fn pop_values(&self, n: usize) -> Vec<Value> {
        let base = self.base();
        let mut stack = self.0.stack.borrow_mut();
        let from = stack.len().saturating_sub(n).max(base);
        stack.drain(from..).collect()
    }

    // ========================================================================
    // Tables and metatables
    // ========================================================================

    pub fn globals(&self) -> TableRef {
        self.0.globals.clone()
    }

    /// Registry table for state-wide private data.
    pub fn registry(&self) -> TableRef {
        self.0.registry.clone()
    }

    pub fn new_table(&self) -> TableRef {
        let table = TableRef::new();
        self.push(table.clone());
        table
    }

    /// Registry-held metatable `name`, created if missing. Returns whether it
    /// was created by this call.
    pub fn new_metatable(&self, name: &str) -> (TableRef, bool) {
        match self.named_metatable(name) {
            Some(existing) => (existing, false),
            None => {
                let table = TableRef::new();
                // key is a plain string, cannot fail
                let _ = self.0.registry.set(name, table.clone());
                (table, true)
            }
        }
    }

    pub fn named_metatable(&self, name: &str) -> Option<TableRef> {
        self.0.registry.get(name).as_table().cloned()
    }

    pub fn metatable_of(&self, value: &Value) -> Option<TableRef> {
        match value {
            Value::Table(t) => t.metatable(),
            Value::UserData(u) => u.metatable(),
            _ => None,
        }
    }

    pub fn get_metatable(&self, idx: i32) -> Option<TableRef> {
        self.metatable_of(&self.value(idx))
    }

    /// Set the metatable of the table or userdata at `idx`.
    pub fn set_metatable(&self, idx: i32, metatable: Option<TableRef>) {
        match self.value(idx) {
            Value::Table(t) => t.set_metatable(metatable),
            Value::UserData(u) => u.set_metatable(metatable),
            _ => {}
        }
    }

    /// Raw field `event` of the value's metatable, `nil` if none.
    pub fn metafield(&self, value: &Value, event: &str) -> Value {
        self.metatable_of(value)
            .map(|mt| mt.get(event))
            .unwrap_or_default()
    }

    /// `obj[key]` honoring `__index`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn index_value(&self, obj: &Value, key: &Value) -> Result<Value, LuaError> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            if let Value::Table(t) = &current {
                let raw = t.get(key.clone());
                if !raw.is_nil() {
                    return Ok(raw);
                }
            }
            match self.metafield(&current, "__index") {
                Value::Nil => {
                    return match current {
                        Value::Table(_) => Ok(Value::Nil),
                        other => Err(LuaError::runtime(format!(
                            "attempt to index a {} value",
                            other.value_type().name()
                        ))),
                    };
                }
                handler @ Value::Function(_) => {
                    let results = self.call_value(&handler, &[current, key.clone()])?;
                    return Ok(results.into_iter().next().unwrap_or_default());
                }
                next => current = next,
            }
        }
        Err(LuaError::runtime("'__index' chain too long; possible loop"))
    }

    /// `obj[key] = value` honoring `__newindex`.
    pub fn new_index_value(&self, obj: &Value, key: Value, value: Value) -> Result<(), LuaError> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            if let Value::Table(t) = &current {
                if !t.get(key.clone()).is_nil() {
                    return t.set(key, value);
                }
            }
            match self.metafield(&current, "__newindex") {
                Value::Nil => {
                    return match &current {
                        Value::Table(t) => t.set(key, value),
                        other => Err(LuaError::runtime(format!(
                            "attempt to index a {} value",
                            other.value_type().name()
                        ))),
                    };
                }
                handler @ Value::Function(_) => {
                    self.call_value(&handler, &[current, key, value])?;
                    return Ok(());
                }
                next => current = next,
            }
        }
        Err(LuaError::runtime("'__newindex' chain too long; possible loop"))
    }

    /// Pop a key and push `t[key]` where `t` is at `idx`.
    pub fn get_table(&self, idx: i32) -> Result<ValueType, LuaError> {
        let obj = self.value(idx);
        let key = self.pop_values(1).pop().unwrap_or_default();
        let value = self.index_value(&obj, &key)?;
        let ty = value.value_type();
        self.push(value);
        Ok(ty)
    }

    /// Push `t[name]` where `t` is at `idx`.
    pub fn get_field(&self, idx: i32, name: &str) -> Result<ValueType, LuaError> {
        let obj = self.value(idx);
        let value = self.index_value(&obj, &Value::string(name))?;
        let ty = value.value_type();
        self.push(value);
        Ok(ty)
    }

    /// Pop a value and a key (value on top) and assign into the table at `idx`.
    pub fn set_table(&self, idx: i32) -> Result<(), LuaError> {
        let obj = self.value(idx);
        let mut kv = self.pop_values(2);
        let value = kv.pop().unwrap_or_default();
        let key = kv.pop().unwrap_or_default();
        self.new_index_value(&obj, key, value)
    }

    /// Pop a value and assign it to field `name` of the table at `idx`.
    pub fn set_field(&self, idx: i32, name: &str) -> Result<(), LuaError> {
        let obj = self.value(idx);
        let value = self.pop_values(1).pop().unwrap_or_default();
        self.new_index_value(&obj, Value::string(name), value)
    }

    /// Push global `name`.
    pub fn get_global(&self, name: &str) -> ValueType {
        let value = self.0.globals.get(name);
        let ty = value.value_type();
        self.push(value);
        ty
    }

    /// Pop a value into global `name`.
    pub fn set_global(&self, name: &str) {
        let value = self.pop_values(1).pop().unwrap_or_default();
        // string keys cannot fail
        let _ = self.0.globals.set(name, value);
    }

    /// Live entries of the table at `idx`, `None` if it is not a table.
    pub fn pairs(&self, idx: i32) -> Option<Vec<(Value, Value)>> {
        self.to_table(idx).map(|t| t.pairs())
    }

    // ========================================================================
    // Functions and calls
    // ========================================================================

    pub fn create_function<F>(&self, name: &str, func: F) -> FunctionRef
    where
        F: Fn(&LuaState) -> Result<usize, LuaError> + 'static,
    {
        FunctionRef::new(name, func)
    }

    pub fn push_function<F>(&self, name: &str, func: F)
    where
        F: Fn(&LuaState) -> Result<usize, LuaError> + 'static,
    {
        self.push(FunctionRef::new(name, func));
    }

    /// Register `func` as global `name`.
    pub fn register<F>(&self, name: &str, func: F)
    where
        F: Fn(&LuaState) -> Result<usize, LuaError> + 'static,
    {
        let _ = self.0.globals.set(name, FunctionRef::new(name, func));
    }

    /// Call the function below `nargs` arguments, leaving `nresults` results
    /// (or all of them for [`MULTRET`]). Errors that escape with no
    /// enclosing protected call go through the panic handler.
    pub fn call(&self, nargs: i32, nresults: i32) -> Result<(), LuaError> {
        let func_pos = self.func_position(nargs)?;
        match self.do_call(func_pos, nresults) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.0.stack.borrow_mut().truncate(func_pos);
                let unprotected = self.0.protected.get() == 0 && self.0.frames.borrow().is_empty();
                let handler = self.0.panic.borrow().clone();
                match handler {
                    Some(handler) if unprotected => Err(handler(self, &err)),
                    _ => Err(err),
                }
            }
        }
    }

    /// Protected call. On failure the stack is cut back to the function slot
    /// and the error value is pushed in its place.
    pub fn pcall(&self, nargs: i32, nresults: i32) -> Result<(), LuaError> {
        let func_pos = self.func_position(nargs)?;
        self.0.protected.set(self.0.protected.get() + 1);
        let result = self.do_call(func_pos, nresults);
        self.0.protected.set(self.0.protected.get() - 1);
        if let Err(err) = &result {
            let mut stack = self.0.stack.borrow_mut();
            stack.truncate(func_pos);
            stack.push(err.to_value());
        }
        result
    }

    /// Call `func` with `args` and collect every result.
    pub fn call_value(&self, func: &Value, args: &[Value]) -> Result<Vec<Value>, LuaError> {
        if !self.check_stack(args.len() + 1) {
            return Err(LuaError::StackOverflow);
        }
        let func_pos = {
            let mut stack = self.0.stack.borrow_mut();
            let pos = stack.len();
            stack.push(func.clone());
            stack.extend(args.iter().cloned());
            pos
        };
        match self.do_call(func_pos, MULTRET) {
            Ok(()) => Ok(self.0.stack.borrow_mut().drain(func_pos..).collect()),
            Err(err) => {
                self.0.stack.borrow_mut().truncate(func_pos);
                Err(err)
            }
        }
    }

    fn func_position(&self, nargs: i32) -> Result<usize, LuaError> {
        let len = self.0.stack.borrow().len();
        let needed = nargs as usize + 1;
        if nargs < 0 || len < self.base() + needed {
            return Err(LuaError::runtime("attempt to call with too few stack values"));
        }
        Ok(len - needed)
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn do_call(&self, func_pos: usize, nresults: i32) -> Result<(), LuaError> {
        let func = self.0.stack.borrow()[func_pos].clone();
        let func = match func {
            Value::Function(f) => f,
            other => {
                let handler = self.metafield(&other, "__call");
                if handler.as_function().is_none() {
                    return Err(LuaError::runtime(format!(
                        "attempt to call a {} value",
                        other.value_type().name()
                    )));
                }
                self.0.stack.borrow_mut().insert(func_pos, handler);
                return self.do_call(func_pos, nresults);
            }
        };

        if self.0.frames.borrow().len() >= MAX_CALL_DEPTH {
            return Err(LuaError::StackOverflow);
        }
        self.0.frames.borrow_mut().push(Frame {
            base: func_pos + 1,
            name: func.name_rc(),
        });
        let result = func.invoke(self);
        self.0.frames.borrow_mut().pop();
        let produced = result?;

        let mut stack = self.0.stack.borrow_mut();
        let available = stack.len().saturating_sub(func_pos + 1);
        let produced = produced.min(available);
        let start = stack.len() - produced;
        let results: Vec<Value> = stack.drain(start..).collect();
        stack.truncate(func_pos);
        stack.extend(results);
        if nresults >= 0 {
            stack.resize(func_pos + nresults as usize, Value::Nil);
        }
        Ok(())
    }

    /// Location prefix `"<name>: "` of the function `level` frames below the
    /// running one, or an empty string when there is no such named frame.
    pub fn where_(&self, level: usize) -> String {
        let frames = self.0.frames.borrow();
        frames
            .len()
            .checked_sub(level + 1)
            .and_then(|i| frames.get(i))
            .filter(|f| !f.name.is_empty())
            .map(|f| format!("{}: ", f.name))
            .unwrap_or_default()
    }

    /// Script-facing string form, honoring `__tostring`.
    pub fn tostring_value(&self, value: &Value) -> Result<Rc<str>, LuaError> {
        let handler = self.metafield(value, "__tostring");
        if handler.as_function().is_some() {
            let result = self.call_value(&handler, &[value.clone()])?;
            return match result.into_iter().next() {
                Some(Value::String(s)) => Ok(s),
                _ => Err(LuaError::runtime("'__tostring' must return a string")),
            };
        }
        Ok(match value {
            Value::Nil => "nil".into(),
            Value::Boolean(b) => b.to_string().into(),
            Value::Number(n) => format_number(*n).into(),
            Value::String(s) => s.clone(),
            Value::Table(t) => format!("table: {:#x}", t.as_ptr()).into(),
            Value::Function(f) => format!("function: {:#x}", f.as_ptr()).into(),
            Value::UserData(u) => format!("userdata: {:#x}", u.as_ptr()).into(),
            Value::LightUserData(p) => format!("userdata: {p:#x}").into(),
        })
    }

    // ========================================================================
    // References, userdata and collection
    // ========================================================================

    /// Pin the value at `idx`, returning a durable reference.
    pub fn pin(&self, idx: i32) -> i32 {
        self.pin_value(self.value(idx))
    }

    pub fn pin_value(&self, value: Value) -> i32 {
        let reference = self.0.next_ref.get();
        self.0.next_ref.set(reference + 1);
        self.0.refs.borrow_mut().insert(reference, value);
        reference
    }

    /// Dereference a pinned value; `nil` if unknown.
    pub fn pinned(&self, reference: i32) -> Value {
        self.0.refs.borrow().get(&reference).cloned().unwrap_or_default()
    }

    pub fn unpin(&self, reference: i32) {
        self.0.refs.borrow_mut().remove(&reference);
    }

    /// Create (and push) a userdata whose collection queues `handle` for the
    /// finalizer hook.
    pub fn new_userdata(&self, handle: i32, metatable: Option<TableRef>) -> UserDataRef {
        let udata = UserDataRef::new(handle, metatable, Rc::downgrade(&self.0.finalizer_queue));
        self.push(udata.clone());
        udata
    }

    /// Mirror `udata` in the weak object table under `handle`.
    pub fn objects_set(&self, handle: i32, udata: &UserDataRef) {
        self.0.objects.borrow_mut().insert(handle, udata.downgrade());
    }

    /// Live userdata mirrored under `handle`, `None` once collected.
    pub fn objects_get(&self, handle: i32) -> Option<UserDataRef> {
        self.0
            .objects
            .borrow()
            .get(&handle)
            .and_then(Weak::upgrade)
            .map(UserDataRef)
    }

    pub fn objects_remove(&self, handle: i32) {
        self.0.objects.borrow_mut().remove(&handle);
    }

    pub fn set_finalizer(&self, hook: Option<Rc<FinalizerHook>>) {
        *self.0.finalizer.borrow_mut() = hook;
    }

    pub fn set_panic(&self, handler: Option<Rc<PanicHandler>>) {
        *self.0.panic.borrow_mut() = handler;
    }

    /// Run the finalizer hook for every userdata collected since the last
    /// call. Returns how many ran.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn collect_garbage(&self) -> usize {
        let mut count = 0;
        loop {
            let pending = std::mem::take(&mut *self.0.finalizer_queue.borrow_mut());
            if pending.is_empty() {
                return count;
            }
            let hook = self.0.finalizer.borrow().clone();
            for handle in pending {
                trace!(handle, "finalizing userdata");
                count += 1;
                if let Some(hook) = &hook {
                    hook(self, handle);
                }
            }
        }
    }
}
