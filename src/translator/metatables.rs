//! Metatables for wrapped host values.
//!
//! Every wrapper carries one of four shared metatables: one per object
//! type, one for arrays, one for type references and one for base-call
//! accessors. Metatables live in the state's registry and are filled on
//! first use.

use hostbridge_core::{Dispatch, HostValue, TypeHash};
use hostbridge_registry::MemberScope;
use hostbridge_vm::{FunctionRef, LuaError, LuaState, TableRef, Value};

use super::{BASE_TAG, OBJECT_TAG, Translator};
use crate::method::{MethodWrapper, Receiver};

const ARRAY_METATABLE: &str = "hostbridge.array";
const CLASS_METATABLE: &str = "hostbridge.class";
const SEARCHBASE_METATABLE: &str = "hostbridge.searchbase";

type Handler = fn(&Translator, &LuaState) -> Result<usize, LuaError>;

fn fill(metatable: &TableRef, fields: Vec<(&str, Value)>) {
    for (key, value) in fields {
        // string keys never fail
        let _ = metatable.set(key, value);
    }
}

impl Translator {
    /// Wrap a handler as a script function holding this translator weakly.
    pub(crate) fn native(&self, name: &str, handler: Handler) -> FunctionRef {
        let weak = self.weak();
        FunctionRef::new(name, move |state: &LuaState| {
            let translator = weak
                .upgrade()
                .ok_or_else(|| LuaError::runtime("script session has been closed"))?;
            handler(&translator, state)
        })
    }

    pub(crate) fn metatable_for(&self, value: &HostValue) -> TableRef {
        match value {
            HostValue::Array(_) => self.array_metatable(),
            HostValue::Type(_) => self.class_metatable(),
            other => self.object_metatable(other.type_hash()),
        }
    }

    fn object_metatable(&self, hash: TypeHash) -> TableRef {
        let (metatable, created) = self.state.new_metatable(&format!("hostbridge.object.{:016x}", hash.as_u64()));
        if created {
            let mut fields = vec![
                (OBJECT_TAG, Value::Boolean(true)),
                ("__index", self.native("__index", Translator::index_object).into()),
                ("__newindex", self.native("__newindex", Translator::new_index_object).into()),
                ("__tostring", self.native("__tostring", Translator::tostring).into()),
            ];
            if self.registry.get(hash).is_some_and(|entry| entry.is_delegate()) {
                fields.push(("__call", self.native("__call", Translator::call_delegate).into()));
            }
            fill(&metatable, fields);
        }
        metatable
    }

    fn array_metatable(&self) -> TableRef {
        let (metatable, created) = self.state.new_metatable(ARRAY_METATABLE);
        if created {
            fill(
                &metatable,
                vec![
                    (OBJECT_TAG, Value::Boolean(true)),
                    ("__index", self.native("__index", Translator::index_object).into()),
                    ("__newindex", self.native("__newindex", Translator::new_index_object).into()),
                    ("__tostring", self.native("__tostring", Translator::tostring).into()),
                ],
            );
        }
        metatable
    }

    fn class_metatable(&self) -> TableRef {
        let (metatable, created) = self.state.new_metatable(CLASS_METATABLE);
        if created {
            fill(
                &metatable,
                vec![
                    (OBJECT_TAG, Value::Boolean(true)),
                    ("__index", self.native("__index", Translator::index_class).into()),
                    ("__newindex", self.native("__newindex", Translator::new_index_class).into()),
                    ("__call", self.native("__call", Translator::call_class).into()),
                    ("__tostring", self.native("__tostring", Translator::tostring).into()),
                ],
            );
        }
        metatable
    }

    pub(crate) fn searchbase_metatable(&self) -> TableRef {
        let (metatable, created) = self.state.new_metatable(SEARCHBASE_METATABLE);
        if created {
            fill(
                &metatable,
                vec![
                    (BASE_TAG, Value::Boolean(true)),
                    ("__index", self.native("__index", Translator::index_base).into()),
                ],
            );
        }
        metatable
    }

    fn tostring(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Value::UserData(udata) = state.value(1) else {
            return Err(self.throw("trying to convert an invalid object reference"));
        };
        let handle = udata.handle();
        let text = match self.interned(&udata) {
            Some(HostValue::Object(obj)) => {
                let display = self.registry.get(obj.type_hash()).and_then(|entry| entry.display.clone());
                match display {
                    Some(display) => display(&obj),
                    None => format!("{}: {handle}", self.registry.type_name(obj.type_hash())),
                }
            }
            Some(HostValue::Array(array)) => {
                format!("{}[]: {handle}", self.registry.type_name(array.element_type()))
            }
            Some(HostValue::Type(hash)) => format!("type {}", self.registry.type_name(hash)),
            _ => return Err(self.throw("trying to convert an invalid object reference")),
        };
        state.push(text);
        Ok(1)
    }

    /// `delegate(...)` runs the delegate's `Invoke`.
    fn call_delegate(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Some(HostValue::Object(obj)) = self.host_object_of(&state.value(1)) else {
            return Err(self.throw("trying to call an invalid delegate reference"));
        };
        let hash = obj.type_hash();
        let methods = self.registry.methods(hash, "Invoke", MemberScope::Instance);
        let (wrapper, _) = self.invoker((hash, MemberScope::Instance, "invoke".to_string(), false), || {
            MethodWrapper::group(self, hash, "Invoke", methods, Receiver::FromFirst, Dispatch::Virtual)
        });
        wrapper.call(state)
    }

    /// `Type(...)` constructs an instance; `Delegate(fn)` binds a function.
    fn call_class(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Some(HostValue::Type(hash)) = self.host_object_of(&state.value(1)) else {
            return Err(self.throw("trying to call an invalid type reference"));
        };
        let Some(entry) = self.registry.get(hash) else {
            return Err(self.throw(format!("unknown type {hash}")));
        };
        if entry.is_delegate() {
            if let Value::Function(function) = state.value(2) {
                let delegate = self.delegate_adapter(hash, function)?;
                self.push(&HostValue::Object(delegate));
                return Ok(1);
            }
        }
        if entry.is_abstract() || entry.is_interface() {
            return Err(self.throw(format!("cannot create an instance of abstract type {}", entry.name)));
        }
        self.constructor(hash).call(state)
    }
}
