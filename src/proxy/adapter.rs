//! Adapter instances: host objects whose behavior lives in script.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::{debug, trace};

use hostbridge_core::{Delegate, DelegateTarget, HostError, HostObject, HostValue, MethodEntry, MethodOverrides, TypeHash};
use hostbridge_vm::{FunctionRef, TableRef, Value};

use super::{AdapterDefinition, AdapterKind, ForwardedMethod, adapter_definition};
use crate::error::BridgeResult;
use crate::translator::Translator;

/// Overrides backed by a script table of functions.
///
/// Methods the table does not define fall through to the base
/// implementation (subclasses) or the return type's default (interfaces).
pub(crate) struct ScriptOverrides {
    definition: Arc<AdapterDefinition>,
    table: RefCell<Option<TableRef>>,
    session: Weak<Translator>,
}

impl ScriptOverrides {
    pub fn new(definition: Arc<AdapterDefinition>, table: TableRef, session: Weak<Translator>) -> Self {
        Self {
            definition,
            table: RefCell::new(Some(table)),
            session,
        }
    }

    pub fn table(&self) -> Option<TableRef> {
        self.table.borrow().clone()
    }

    /// Stop forwarding; later calls take the fallback path.
    pub fn detach(&self) -> Option<TableRef> {
        self.table.borrow_mut().take()
    }
}

impl MethodOverrides for ScriptOverrides {
    fn dispatch(&self, method: &MethodEntry, args: &mut [HostValue]) -> Option<Result<HostValue, HostError>> {
        let forwarded = self.definition.forwarded(method)?;
        let table = self.table()?;
        let Value::Function(function) = table.get(forwarded.name.as_str()) else {
            trace!(method = %forwarded.name, has_base = forwarded.has_base, "no script override");
            return None;
        };
        let translator = self.session.upgrade()?;
        Some(translator.call_script(&Value::Function(function), Some(Value::Table(table)), forwarded, args))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A script function standing in for a delegate.
pub(crate) struct ScriptDelegate {
    definition: Arc<AdapterDefinition>,
    function: FunctionRef,
    session: Weak<Translator>,
}

impl DelegateTarget for ScriptDelegate {
    fn invoke(&self, args: &mut [HostValue]) -> Result<HostValue, HostError> {
        let Some(signature) = self.definition.methods.first() else {
            return Err(HostError::exception(format!("{} has no Invoke method", self.definition.name)));
        };
        match self.session.upgrade() {
            Some(translator) => translator.call_script(&Value::Function(self.function.clone()), None, signature, args),
            None => Ok(HostValue::default_for(signature.return_type)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Translator {
    /// Call a script function with host arguments marshaled per `method`.
    ///
    /// Output-only slots are not passed. Script results come back as the
    /// return value (unless void) followed by each by-reference slot, which
    /// is written back into `args`.
    pub(crate) fn call_script(
        &self,
        function: &Value,
        receiver: Option<Value>,
        method: &ForwardedMethod,
        args: &mut [HostValue],
    ) -> Result<HostValue, HostError> {
        let mut inputs: Vec<Value> = receiver.into_iter().collect();
        for (slot, data_type) in args.iter().zip(&method.params) {
            if !data_type.is_output_only() {
                inputs.push(self.to_value(slot));
            }
        }

        let results = self
            .state()
            .call_value(function, &inputs)
            .map_err(|err| HostError::from(self.script_error(err)))?;
        let mut results = results.into_iter();

        let returned = if method.return_type.is_void() {
            HostValue::Null
        } else {
            let first = results.next().unwrap_or_default();
            self.result_value(&first, Some(method.return_type))?
        };
        for (slot, data_type) in args.iter_mut().zip(&method.params) {
            if data_type.is_by_ref() {
                let value = results.next().unwrap_or_default();
                *slot = self.result_value(&value, Some(data_type.stripped()))?;
            }
        }
        Ok(returned)
    }

    fn function_adapter(&self, hash: TypeHash, function: FunctionRef, kind: AdapterKind) -> BridgeResult<HostObject> {
        let definition = adapter_definition(self.registry(), hash, kind)?;
        debug!(adapter = %definition.name, "binding script function");
        let target = ScriptDelegate {
            definition,
            function,
            session: self.weak(),
        };
        Ok(HostObject::delegate(hash, Delegate::new(Rc::new(target))))
    }

    /// Delegate of type `hash` running `function`.
    pub(crate) fn delegate_adapter(&self, hash: TypeHash, function: FunctionRef) -> BridgeResult<HostObject> {
        self.function_adapter(hash, function, AdapterKind::Delegate)
    }

    pub(crate) fn event_handler_adapter(&self, hash: TypeHash, function: FunctionRef) -> BridgeResult<HostObject> {
        self.function_adapter(hash, function, AdapterKind::EventHandler)
    }

    /// Host object of type `hash` whose overridable methods forward to
    /// `table`. Interfaces get a bare object; classes are constructed with
    /// their parameterless constructor.
    pub(crate) fn table_adapter(&self, hash: TypeHash, table: TableRef) -> BridgeResult<HostObject> {
        let interface = self.registry().get(hash).is_some_and(|entry| entry.is_interface());
        let kind = if interface {
            AdapterKind::Interface
        } else {
            AdapterKind::Subclass
        };
        let definition = adapter_definition(self.registry(), hash, kind)?;
        let obj = if interface {
            HostObject::new(hash, definition.clone())
        } else {
            self.registry().construct(hash, &mut [])?
        };
        debug!(adapter = %definition.name, id = definition.id, "created table adapter");
        obj.set_overrides(Some(Rc::new(ScriptOverrides::new(definition, table, self.weak()))));
        Ok(obj)
    }
}
