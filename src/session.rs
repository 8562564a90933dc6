//! Host-facing session: a script state bound to a type registry.

use std::rc::Rc;

use tracing::{debug, info};

use hostbridge_core::{DataType, HostValue};
use hostbridge_registry::{RegistrationError, TypeRegistry};
use hostbridge_vm::{LuaError, LuaState, MULTRET, Value};

use crate::error::{BridgeError, BridgeResult};
use crate::translator::{DispatchStats, Translator, register_builtin_types};

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Value stack slots available to script and native calls
    pub max_stack: usize,
    /// Initial capacity of the object identity table
    pub object_capacity: usize,
    /// Install `import_type`, `make_object`, `free_object`,
    /// `get_method_bysig` and `get_constructor_bysig`
    pub install_globals: bool,
    /// Location reported for errors raised outside any named script frame
    pub chunk_name: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_stack: 8000,
            object_capacity: 64,
            install_globals: true,
            chunk_name: "chunk".to_string(),
        }
    }
}

impl SessionOptions {
    pub fn with_max_stack(mut self, max_stack: usize) -> Self {
        self.max_stack = max_stack;
        self
    }

    pub fn with_object_capacity(mut self, capacity: usize) -> Self {
        self.object_capacity = capacity;
        self
    }

    pub fn with_globals(mut self, install: bool) -> Self {
        self.install_globals = install;
        self
    }

    pub fn with_chunk_name(mut self, name: impl Into<String>) -> Self {
        self.chunk_name = name.into();
        self
    }
}

/// A script state marshaling against one type registry.
///
/// The registry is frozen once the session starts. Dropping the session
/// detaches every event handler script attached and releases every host
/// object script still references.
pub struct Session {
    translator: Rc<Translator>,
    state: LuaState,
    closed: bool,
}

impl Session {
    pub fn new(mut registry: TypeRegistry, options: SessionOptions) -> BridgeResult<Self> {
        register_builtin_types(&mut registry)?;
        let state = LuaState::with_max_stack(options.max_stack);
        state.set_panic(Some(Rc::new(|_: &LuaState, err: &LuaError| {
            LuaError::Panic(format!("unprotected error in call to script API ({err})"))
        })));
        let translator = Translator::new(
            state.clone(),
            Rc::new(registry),
            options.object_capacity,
            &options.chunk_name,
        );
        if options.install_globals {
            translator
                .install_globals()
                .map_err(|err| translator.script_error(err))?;
        }
        info!(
            types = translator.registry().len(),
            max_stack = options.max_stack,
            "script session started"
        );
        Ok(Self {
            translator,
            state,
            closed: false,
        })
    }

    /// Session with default options.
    pub fn with_registry(registry: TypeRegistry) -> BridgeResult<Self> {
        Self::new(registry, SessionOptions::default())
    }

    pub fn state(&self) -> &LuaState {
        &self.state
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.translator.registry()
    }

    pub fn stats(&self) -> DispatchStats {
        self.translator.stats()
    }

    /// Host values script currently holds wrappers for.
    pub fn object_count(&self) -> usize {
        self.translator.object_count()
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Script form of a host value.
    pub fn to_value(&self, value: &HostValue) -> Value {
        self.translator.to_value(value)
    }

    /// Host form of a script value; `None` converts generically.
    pub fn from_value(&self, value: &Value, data_type: Option<DataType>) -> BridgeResult<HostValue> {
        self.translator.result_value(value, data_type)
    }

    /// Push a host value onto the script stack.
    pub fn push(&self, value: &HostValue) -> BridgeResult<()> {
        if !self.state.check_stack(1) {
            return Err(BridgeError::StackOverflow);
        }
        self.translator.push(value);
        Ok(())
    }

    /// Pop the top of the script stack as a host value.
    pub fn pop(&self, data_type: Option<DataType>) -> BridgeResult<HostValue> {
        if self.state.top() == 0 {
            return Err(BridgeError::Script {
                message: "script stack is empty".to_string(),
                inner: None,
            });
        }
        let value = self.state.value(-1);
        self.state.pop(1);
        self.from_value(&value, data_type)
    }

    /// Expose a registered type to script as global `name`.
    pub fn import_type(&self, name: &str) -> BridgeResult<Value> {
        let entry = self
            .registry()
            .lookup(name)
            .ok_or_else(|| RegistrationError::UnknownType(name.to_string()))?;
        let value = self.translator.to_value(&HostValue::Type(entry.type_hash));
        self.state
            .globals()
            .set(entry.name.as_str(), value.clone())
            .map_err(|err| self.translator.script_error(err))?;
        debug!(type_name = name, "imported type");
        Ok(value)
    }

    /// Expose a host value to script as global `name`.
    pub fn set_global(&self, name: &str, value: &HostValue) -> BridgeResult<()> {
        let value = self.to_value(value);
        self.state
            .globals()
            .set(name, value)
            .map_err(|err| self.translator.script_error(err))
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Read a dotted path such as `"config.window.title"` from the globals.
    /// A missing intermediate value yields `Null`.
    pub fn get_path(&self, path: &str, data_type: Option<DataType>) -> BridgeResult<HostValue> {
        let mut current = Value::Table(self.state.globals());
        for segment in path.split('.') {
            if current.is_nil() {
                return Ok(HostValue::Null);
            }
            current = self
                .state
                .index_value(&current, &Value::from(segment))
                .map_err(|err| self.translator.script_error(err))?;
        }
        self.from_value(&current, data_type)
    }

    /// Assign through a dotted path; every segment but the last must exist.
    pub fn set_path(&self, path: &str, value: &HostValue) -> BridgeResult<()> {
        let value = self.to_value(value);
        let Some((parent, last)) = path.rsplit_once('.') else {
            return self
                .state
                .globals()
                .set(path, value)
                .map_err(|err| self.translator.script_error(err));
        };
        let mut current = Value::Table(self.state.globals());
        for segment in parent.split('.') {
            current = self
                .state
                .index_value(&current, &Value::from(segment))
                .map_err(|err| self.translator.script_error(err))?;
            if current.is_nil() {
                return Err(BridgeError::Script {
                    message: format!("attempt to index a nil value ({segment} in {path})"),
                    inner: None,
                });
            }
        }
        self.state
            .new_index_value(&current, Value::from(last), value)
            .map_err(|err| self.translator.script_error(err))
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call a script function in protected mode. Results are converted per
    /// `result_types`; results beyond it convert generically.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call_function(
        &self,
        function: &Value,
        args: &[HostValue],
        result_types: &[DataType],
    ) -> BridgeResult<Vec<HostValue>> {
        if !self.state.check_stack(args.len() + 1) {
            return Err(BridgeError::StackOverflow);
        }
        let base = self.state.top();
        self.state.push(function.clone());
        for arg in args {
            self.translator.push(arg);
        }
        if let Err(err) = self.state.pcall(args.len() as i32, MULTRET) {
            self.state.set_top(base);
            return Err(self.translator.script_error(err));
        }
        let count = (self.state.top() - base) as usize;
        let results = self.state.pop_values(count);
        results
            .iter()
            .enumerate()
            .map(|(i, value)| self.from_value(value, result_types.get(i).copied()))
            .collect()
    }

    /// Call a script function outside any protected call. Errors go
    /// through the session's panic hook.
    pub fn call_unprotected(&self, function: &Value, args: &[HostValue]) -> BridgeResult<Vec<HostValue>> {
        if !self.state.check_stack(args.len() + 1) {
            return Err(BridgeError::StackOverflow);
        }
        let base = self.state.top();
        self.state.push(function.clone());
        for arg in args {
            self.translator.push(arg);
        }
        if let Err(err) = self.state.call(args.len() as i32, MULTRET) {
            self.state.set_top(base);
            return Err(self.translator.script_error(err));
        }
        let count = (self.state.top() - base) as usize;
        let results = self.state.pop_values(count);
        results.iter().map(|value| self.from_value(value, None)).collect()
    }

    /// Call the global function `name`.
    pub fn call_global(&self, name: &str, args: &[HostValue], result_types: &[DataType]) -> BridgeResult<Vec<HostValue>> {
        let function = self.state.globals().get(name);
        if function.is_nil() {
            return Err(BridgeError::Script {
                message: format!("attempt to call a nil value (global '{name}')"),
                inner: None,
            });
        }
        self.call_function(&function, args, result_types)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Run finalizers for wrappers script no longer references.
    pub fn collect_garbage(&self) -> usize {
        self.state.collect_garbage()
    }

    /// Detach handlers and release every host object. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.translator.close();
        self.state.set_panic(None);
        info!(stats = ?self.translator.stats(), "script session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::primitives;

    fn session() -> Session {
        Session::with_registry(TypeRegistry::new()).unwrap()
    }

    #[test]
    fn options_builder() {
        let options = SessionOptions::default().with_max_stack(10).with_chunk_name("main");
        assert_eq!(options.max_stack, 10);
        assert_eq!(options.chunk_name, "main");
        assert!(options.install_globals);
    }

    #[test]
    fn push_and_pop_convert() {
        let s = session();
        s.push(&HostValue::Int32(7)).unwrap();
        assert_eq!(s.pop(Some(primitives::INT32.into())).unwrap(), HostValue::Int32(7));
        assert!(s.pop(None).is_err());
    }

    #[test]
    fn push_respects_stack_limit() {
        let s = Session::new(TypeRegistry::new(), SessionOptions::default().with_max_stack(2)).unwrap();
        s.push(&HostValue::Bool(true)).unwrap();
        s.push(&HostValue::Bool(true)).unwrap();
        assert!(matches!(s.push(&HostValue::Bool(true)), Err(BridgeError::StackOverflow)));
    }

    #[test]
    fn paths_read_and_write_nested_tables() {
        let s = session();
        let config = s.state().new_table();
        s.state().pop(1);
        s.state().globals().set("config", config).unwrap();
        s.set_path("config.title", &HostValue::string("main")).unwrap();
        assert_eq!(s.get_path("config.title", None).unwrap(), HostValue::string("main"));
        assert_eq!(s.get_path("missing.deeper.still", None).unwrap(), HostValue::Null);
        assert!(s.set_path("missing.title", &HostValue::Null).is_err());
    }

    #[test]
    fn unknown_import_is_a_registration_error() {
        let s = session();
        assert!(matches!(
            s.import_type("Nope"),
            Err(BridgeError::Registration(RegistrationError::UnknownType(_)))
        ));
    }

    #[test]
    fn protected_errors_leave_the_stack_balanced() {
        let s = session();
        let fail = s.state().create_function("fail", |_| Err(LuaError::runtime("boom")));
        let err = s.call_function(&Value::Function(fail), &[HostValue::Int32(1)], &[]).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(s.state().top(), 0);
    }

    #[test]
    fn globals_follow_the_option() {
        let with = session();
        assert!(with.state().globals().get("make_object").as_function().is_some());
        let without = Session::new(TypeRegistry::new(), SessionOptions::default().with_globals(false)).unwrap();
        assert!(without.state().globals().get("make_object").is_nil());
    }

    #[test]
    fn close_is_idempotent() {
        let mut s = session();
        s.close();
        s.close();
    }
}
