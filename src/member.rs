//! Member accessor: `obj.name`, `obj.name = v`, `Type.name` and indexers.
//!
//! Names resolve case-insensitively, first as instance members of the
//! runtime type and then as static members of the same type. A name that
//! resolves to nothing is an error; a member whose value is null reads as
//! `nil`.

use std::rc::Rc;

use tracing::trace;

use hostbridge_core::{DataType, Dispatch, ExceptionKind, HostArray, HostError, HostObject, HostValue, PropertyEntry, TypeHash};
use hostbridge_registry::{Member, MemberScope};
use hostbridge_vm::{LuaError, LuaState, Value};

use crate::method::{MethodWrapper, Receiver};
use crate::translator::{EventRegistration, Translator, builtins};

impl Translator {
    // ========================================================================
    // Metamethods
    // ========================================================================

    /// `__index` of wrapped objects and arrays.
    pub(crate) fn index_object(&self, state: &LuaState) -> Result<usize, LuaError> {
        let key = state.value(2);
        let value = match self.host_object_of(&state.value(1)) {
            Some(HostValue::Array(array)) => self.index_array(&array, &key)?,
            Some(HostValue::Object(obj)) => self.index_instance(&obj, &key)?,
            _ => return Err(self.throw("trying to index an invalid object reference")),
        };
        state.push(value);
        Ok(1)
    }

    /// `__newindex` of wrapped objects and arrays.
    pub(crate) fn new_index_object(&self, state: &LuaState) -> Result<usize, LuaError> {
        let key = state.value(2);
        let value = state.value(3);
        match self.host_object_of(&state.value(1)) {
            Some(HostValue::Array(array)) => self.set_array(&array, &key, &value)?,
            Some(HostValue::Object(obj)) => self.set_instance(&obj, &key, &value)?,
            _ => return Err(self.throw("trying to index an invalid object reference")),
        }
        Ok(0)
    }

    /// `__index` of type references: static members, or `Type[n]` for a new
    /// array of `n` elements.
    pub(crate) fn index_class(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Some(HostValue::Type(hash)) = self.host_object_of(&state.value(1)) else {
            return Err(self.throw("trying to index an invalid type reference"));
        };
        let value = match state.value(2) {
            Value::Number(n) => {
                if n < 0.0 || n.fract() != 0.0 {
                    return Err(self.throw(format!("invalid array length: {}", describe(state, &Value::Number(n)))));
                }
                if n > HostArray::MAX_LEN as f64 {
                    return Err(self.throw_host(HostError::index_out_of_range(format!(
                        "array length {} exceeds the maximum of {}",
                        describe(state, &Value::Number(n)),
                        HostArray::MAX_LEN
                    ))));
                }
                let array = HostArray::with_len(hash, n as usize).map_err(|err| self.throw_host(err))?;
                self.wrap(HostValue::Array(array))
            }
            Value::String(name) => match self.get_member(hash, None, &name, MemberScope::Static)? {
                Some(value) => value,
                None => return Err(self.throw(format!("unknown member name {name}"))),
            },
            _ => Value::Nil,
        };
        state.push(value);
        Ok(1)
    }

    pub(crate) fn new_index_class(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Some(HostValue::Type(hash)) = self.host_object_of(&state.value(1)) else {
            return Err(self.throw("trying to index an invalid type reference"));
        };
        let Value::String(name) = state.value(2) else {
            return Err(self.throw("property names must be strings"));
        };
        match self.set_member(hash, None, &name, &state.value(3), MemberScope::Static)? {
            None => Ok(0),
            Some(detail) => Err(self.throw(detail)),
        }
    }

    /// `__index` of base-call accessors: methods bind to the base
    /// implementation, everything else reads through to the object.
    pub(crate) fn index_base(&self, state: &LuaState) -> Result<usize, LuaError> {
        let Some(HostValue::Object(obj)) = self.receiver_of(&state.value(1)) else {
            return Err(self.throw("trying to index an invalid object reference"));
        };
        let Value::String(name) = state.value(2) else {
            state.push_nil();
            return Ok(1);
        };
        let hash = obj.type_hash();
        let methods = self.registry().methods(hash, &name, MemberScope::Instance);
        let value = if methods.is_empty() {
            match self.get_member(hash, Some(&obj), &name, MemberScope::Instance)? {
                Some(value) => value,
                None => return Err(self.throw(format!("unknown member name {name}"))),
            }
        } else {
            let key = (hash, MemberScope::Instance, name.to_ascii_lowercase(), true);
            let (_, function) = self.invoker(key, || {
                MethodWrapper::group(self, hash, &name, methods, Receiver::FromFirst, Dispatch::Base)
            });
            Value::Function(function)
        };
        state.push(value);
        Ok(1)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn index_array(&self, array: &HostArray, key: &Value) -> Result<Value, LuaError> {
        match key {
            Value::Number(n) => {
                let index = *n;
                if index < 0.0 || index.fract() != 0.0 || index as usize >= array.len() {
                    return Err(self.throw(format!(
                        "array index out of bounds: {} {}",
                        describe(self.state(), key),
                        array.len()
                    )));
                }
                Ok(array
                    .get(index as usize)
                    .map(|item| self.to_value(&item))
                    .unwrap_or_default())
            }
            Value::String(name) if name.eq_ignore_ascii_case("length") => Ok(Value::Number(array.len() as f64)),
            Value::String(name) => Err(self.throw(format!("unknown member name {name}"))),
            other => Err(self.throw(format!("cannot find {}", describe(self.state(), other)))),
        }
    }

    fn index_instance(&self, obj: &HostObject, key: &Value) -> Result<Value, LuaError> {
        if let Value::String(name) = key {
            if let Some(value) = self.get_member(obj.type_hash(), Some(obj), name, MemberScope::Instance)? {
                return Ok(value);
            }
        }
        self.index_fallback(obj, key)
    }

    /// Member `name` of `hash`, `Ok(None)` when nothing by that name exists.
    /// Instance lookups fall back to static members of the same type.
    pub(crate) fn get_member(
        &self,
        hash: TypeHash,
        this: Option<&HostObject>,
        name: &str,
        scope: MemberScope,
    ) -> Result<Option<Value>, LuaError> {
        let (member, scope) = match self.lookup_member(hash, name, scope) {
            Some(member) => (member, scope),
            None if scope == MemberScope::Instance => match self.lookup_member(hash, name, MemberScope::Static) {
                Some(member) => (member, MemberScope::Static),
                None => return Ok(None),
            },
            None => return Ok(None),
        };
        let implicit_static = this.is_some() && scope == MemberScope::Static;
        let this = if scope == MemberScope::Static { None } else { this };

        let value = match member {
            Member::Property(property) => self.read_property(hash, this, &property)?,
            Member::Event(event) => {
                let registration = EventRegistration::new(this.cloned(), event, self.weak());
                self.wrap(HostValue::Object(HostObject::new(builtins::EVENT_REGISTRATION, registration)))
            }
            Member::NestedType(_) | Member::Methods(_) if implicit_static => {
                return Err(self.throw(format!("can't pass instance to static method {name}")));
            }
            Member::NestedType(nested) => self.wrap(HostValue::Type(nested)),
            Member::Methods(methods) => {
                let receiver = match scope {
                    MemberScope::Instance => Receiver::FromFirst,
                    MemberScope::Static => Receiver::None,
                };
                let key = (hash, scope, name.to_ascii_lowercase(), false);
                let (_, function) = self.invoker(key, || {
                    MethodWrapper::group(self, hash, name, methods, receiver, Dispatch::Virtual)
                });
                Value::Function(function)
            }
        };
        Ok(Some(value))
    }

    /// Read a field or property. A getter that is inaccessible on the
    /// declaring type is retried on the next declaration up the chain.
    fn read_property(
        &self,
        hash: TypeHash,
        this: Option<&HostObject>,
        property: &Rc<PropertyEntry>,
    ) -> Result<Value, LuaError> {
        match property.get(this) {
            Ok(value) => Ok(self.to_value(&value)),
            Err(err) if err.kind() == ExceptionKind::Inaccessible => {
                let shadowed = self
                    .registry()
                    .ancestors(hash)
                    .into_iter()
                    .filter_map(|ancestor| self.registry().get(ancestor)?.find_property(&property.name).cloned())
                    .filter(|candidate| candidate.is_static == property.is_static)
                    .skip_while(|candidate| !Rc::ptr_eq(candidate, property))
                    .nth(1);
                if let Some(shadowed) = shadowed {
                    trace!(property = %property.name, "retrying inaccessible getter on base declaration");
                    if let Ok(value) = shadowed.get(this) {
                        return Ok(self.to_value(&value));
                    }
                }
                Err(self.throw_host(err))
            }
            Err(err) => Err(self.throw_host(err)),
        }
    }

    /// Single-argument indexer read.
    fn index_fallback(&self, obj: &HostObject, key: &Value) -> Result<Value, LuaError> {
        let mut applicable = Vec::new();
        for indexer in self.registry().indexers(obj.type_hash()) {
            let Some(getter) = indexer.getter.clone() else { continue };
            if let Some(converted) = self.checker().convert(self, key, indexer.key_type)? {
                applicable.push((getter, converted));
            }
        }
        match applicable.as_slice() {
            [] => Err(match key {
                Value::String(name) => self.throw(format!("unknown member name {name}")),
                other => self.throw(format!("cannot find {}", describe(self.state(), other))),
            }),
            [(getter, converted)] => match getter(obj, converted) {
                Ok(value) => Ok(self.to_value(&value)),
                Err(err) if err.kind() == ExceptionKind::KeyNotFound => {
                    Err(self.throw(format!("key '{}' not found", describe(self.state(), key))))
                }
                Err(err) => Err(self.throw_host(err)),
            },
            _ => Err(self.throw(format!("ambiguous indexer for key {}", describe(self.state(), key)))),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn set_array(&self, array: &HostArray, key: &Value, value: &Value) -> Result<(), LuaError> {
        let Value::Number(index) = *key else {
            return Err(self.throw(format!("cannot find {}", describe(self.state(), key))));
        };
        if index < 0.0 || index.fract() != 0.0 || index as usize >= array.len() {
            return Err(self.throw(format!(
                "array index out of bounds: {} {}",
                describe(self.state(), key),
                array.len()
            )));
        }
        let element = DataType::simple(array.element_type());
        let Some(converted) = self.checker().element_value(self, value, element)? else {
            return Err(self.throw(format!(
                "invalid value for array element: expected {}",
                self.registry().type_name(array.element_type())
            )));
        };
        array.set(index as usize, converted).map_err(|err| self.throw_host(err))
    }

    fn set_instance(&self, obj: &HostObject, key: &Value, value: &Value) -> Result<(), LuaError> {
        let detail = match key {
            Value::String(name) => match self.set_member(obj.type_hash(), Some(obj), name, value, MemberScope::Instance)? {
                None => return Ok(()),
                Some(detail) => detail,
            },
            _ => "property names must be strings".to_string(),
        };
        if self.index_set_fallback(obj, key, value)? {
            return Ok(());
        }
        Err(self.throw(detail))
    }

    /// Assign a field or property. `Ok(Some(detail))` when `name` is not an
    /// assignable member.
    pub(crate) fn set_member(
        &self,
        hash: TypeHash,
        this: Option<&HostObject>,
        name: &str,
        value: &Value,
        scope: MemberScope,
    ) -> Result<Option<String>, LuaError> {
        let (member, scope) = match self.lookup_member(hash, name, scope) {
            Some(member) => (member, scope),
            None if scope == MemberScope::Instance => match self.lookup_member(hash, name, MemberScope::Static) {
                Some(member) => (member, MemberScope::Static),
                None => return Ok(Some(format!("field or property '{name}' does not exist"))),
            },
            None => return Ok(Some(format!("field or property '{name}' does not exist"))),
        };
        let Member::Property(property) = member else {
            return Ok(Some(format!("invalid property name '{name}'")));
        };
        let Some(converted) = self.checker().convert(self, value, property.data_type)? else {
            return Err(self.throw(format!(
                "invalid value for '{}': expected {}",
                property.name,
                self.registry().data_type_name(property.data_type)
            )));
        };
        let this = if scope == MemberScope::Static { None } else { this };
        property.set(this, converted).map_err(|err| self.throw_host(err))?;
        Ok(None)
    }

    /// Single-argument indexer write; `false` when no indexer accepts the
    /// key and value.
    fn index_set_fallback(&self, obj: &HostObject, key: &Value, value: &Value) -> Result<bool, LuaError> {
        for indexer in self.registry().indexers(obj.type_hash()) {
            let Some(setter) = indexer.setter.clone() else { continue };
            let Some(converted_key) = self.checker().convert(self, key, indexer.key_type)? else { continue };
            let Some(converted) = self.checker().convert(self, value, indexer.value_type)? else { continue };
            setter(obj, &converted_key, converted).map_err(|err| self.throw_host(err))?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Script-facing text of a key for error messages.
fn describe(state: &LuaState, key: &Value) -> String {
    match key {
        Value::String(s) => s.to_string(),
        Value::Number(_) => state
            .tostring_value(key)
            .map(|s| s.to_string())
            .unwrap_or_default(),
        other => other.value_type().name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::{ParamEntry, primitives};
    use hostbridge_registry::TypeRegistry;

    struct Point {
        x: i32,
    }

    fn translator() -> Rc<Translator> {
        let mut registry = TypeRegistry::new();
        builtins::register_builtin_types(&mut registry).unwrap();
        registry
            .register_class::<Point>("Point")
            .constructor(vec![ParamEntry::new("x", primitives::INT32)], |ctx| Ok(Point { x: ctx.arg(0)? }))
            .field("X", primitives::INT32, |p: &Point| p.x, |p: &mut Point, v| {
                p.x = v;
                Ok(())
            })
            .readonly_field("Label", primitives::STRING, |_: &Point| Option::<String>::None)
            .nested("Origin", "double")
            .build()
            .unwrap();
        Translator::new(LuaState::new(), Rc::new(registry), 8, "chunk")
    }

    fn point(t: &Translator, x: i32) -> Value {
        let hash = t.registry().lookup("Point").unwrap().type_hash;
        t.to_value(&HostValue::Object(HostObject::new(hash, Point { x })))
    }

    #[test]
    fn names_are_case_insensitive() {
        let t = translator();
        let p = point(&t, 3);
        let x = t.state().index_value(&p, &Value::string("x")).unwrap();
        assert_eq!(x.as_number(), Some(3.0));
    }

    #[test]
    fn null_member_differs_from_missing_member() {
        let t = translator();
        let p = point(&t, 3);
        let label = t.state().index_value(&p, &Value::string("Label")).unwrap();
        assert!(label.is_nil());
        let err = t.state().index_value(&p, &Value::string("Nope")).unwrap_err();
        assert_eq!(err.to_string(), "chunk: unknown member name Nope");
    }

    #[test]
    fn assignment_converts_numbers() {
        let t = translator();
        let p = point(&t, 3);
        t.state().new_index_value(&p, Value::string("X"), Value::Number(9.0)).unwrap();
        let x = t.state().index_value(&p, &Value::string("X")).unwrap();
        assert_eq!(x.as_number(), Some(9.0));
        let err = t
            .state()
            .new_index_value(&p, Value::string("X"), Value::string("nine"))
            .unwrap_err();
        assert_eq!(err.to_string(), "chunk: invalid value for 'X': expected int");
    }

    #[test]
    fn arrays_index_from_zero() {
        let t = translator();
        let array = HostArray::new(primitives::INT32, vec![HostValue::Int32(10), HostValue::Int32(20)]);
        let value = t.to_value(&HostValue::Array(array.clone()));
        let second = t.state().index_value(&value, &Value::Number(1.0)).unwrap();
        assert_eq!(second.as_number(), Some(20.0));
        let len = t.state().index_value(&value, &Value::string("Length")).unwrap();
        assert_eq!(len.as_number(), Some(2.0));
        let err = t.state().index_value(&value, &Value::Number(2.0)).unwrap_err();
        assert_eq!(err.to_string(), "chunk: array index out of bounds: 2 2");
        t.state().new_index_value(&value, Value::Number(0.0), Value::Number(5.0)).unwrap();
        assert_eq!(array.get(0), Some(HostValue::Int32(5)));
    }

    #[test]
    fn type_reference_allocates_arrays() {
        let t = translator();
        let class = t.to_value(&HostValue::Type(primitives::DOUBLE));
        let array = t.state().index_value(&class, &Value::Number(3.0)).unwrap();
        match t.host_object_of(&array) {
            Some(HostValue::Array(array)) => {
                assert_eq!(array.len(), 3);
                assert_eq!(array.element_type(), primitives::DOUBLE);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn oversized_array_lengths_raise_host_errors() {
        let t = translator();
        let class = t.to_value(&HostValue::Type(primitives::DOUBLE));
        for len in [1e18, (HostArray::MAX_LEN + 1) as f64] {
            let err = t.state().index_value(&class, &Value::Number(len)).unwrap_err();
            let err = t.script_error(err);
            assert_eq!(err.host_cause().map(HostError::kind), Some(ExceptionKind::IndexOutOfRange));
        }
        assert!(t.state().index_value(&class, &Value::Number(f64::NAN)).is_err());
    }

    #[test]
    fn nested_types_need_a_type_reference() {
        let t = translator();
        let hash = t.registry().lookup("Point").unwrap().type_hash;
        let class = t.to_value(&HostValue::Type(hash));
        let nested = t.state().index_value(&class, &Value::string("Origin")).unwrap();
        assert!(matches!(t.host_object_of(&nested), Some(HostValue::Type(h)) if h == primitives::DOUBLE));

        let p = point(&t, 1);
        let err = t.state().index_value(&p, &Value::string("Origin")).unwrap_err();
        assert_eq!(err.to_string(), "chunk: can't pass instance to static method Origin");
    }
}
