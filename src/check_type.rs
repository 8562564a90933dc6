//! Value bridge: classify a script value against a host parameter type.
//!
//! [`TypeChecker::classify`] decides whether a value can be passed where a
//! [`DataType`] is expected and returns the [`Extractor`] that performs the
//! conversion. Classification is separate from extraction so a resolved
//! call shape can remember its extractors and replay them.

use rustc_hash::FxHashMap;

use hostbridge_core::{DataType, HostArray, HostValue, PrimitiveKind, TypeHash, TypeKind, primitives};
use hostbridge_vm::{TableRef, Value};

use crate::error::BridgeResult;
use crate::translator::Translator;

/// How a script value becomes a host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Extractor {
    Number(PrimitiveKind),
    Bool,
    String,
    Table,
    Function,
    UserData,
    /// Any value; a table exposing a host object yields that object
    Generic,
    /// A wrapped host object, or null for `nil`
    Object,
    /// A script function bound to a delegate adapter
    Delegate(TypeHash),
    /// A script table bound to an interface adapter
    Interface(TypeHash),
}

/// Dispatch table from host type to extractor, built once per session.
pub(crate) struct TypeChecker {
    extractors: FxHashMap<TypeHash, Extractor>,
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeChecker {
    pub fn new() -> Self {
        let mut extractors = FxHashMap::default();
        for kind in PrimitiveKind::ALL {
            let extractor = match kind {
                PrimitiveKind::Void => continue,
                PrimitiveKind::Bool => Extractor::Bool,
                PrimitiveKind::String => Extractor::String,
                numeric => Extractor::Number(numeric),
            };
            extractors.insert(kind.type_hash(), extractor);
        }
        extractors.insert(primitives::TABLE, Extractor::Table);
        extractors.insert(primitives::FUNCTION, Extractor::Function);
        extractors.insert(primitives::USERDATA, Extractor::UserData);
        extractors.insert(primitives::OBJECT, Extractor::Generic);
        Self { extractors }
    }

    /// The extractor for passing `value` as `data_type`, `None` if it does
    /// not match.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn classify(&self, translator: &Translator, value: &Value, data_type: DataType) -> Option<Extractor> {
        let data_type = data_type.stripped();
        if data_type.is_array {
            return match value {
                Value::Nil => Some(Extractor::Object),
                _ => self.wrapped(translator, value, data_type),
            };
        }

        let hash = data_type.type_hash;
        if hash == primitives::GENERIC {
            return Self::by_tag(value);
        }

        if let Some(&extractor) = self.extractors.get(&hash) {
            return match (extractor, value) {
                (Extractor::Generic, _) => Some(extractor),
                (Extractor::Number(_), Value::Number(_))
                | (Extractor::Bool, Value::Boolean(_))
                | (Extractor::String, Value::String(_))
                | (Extractor::Table, Value::Table(_))
                | (Extractor::Function, Value::Function(_))
                | (Extractor::UserData, Value::UserData(_)) => Some(extractor),
                (Extractor::String, Value::Nil) => Some(Extractor::Object),
                _ => None,
            };
        }

        let kind = translator.registry().get(hash).map(|entry| entry.kind);
        match (kind, value) {
            (Some(TypeKind::Delegate), Value::Function(_)) => return Some(Extractor::Delegate(hash)),
            (Some(TypeKind::Interface), Value::Table(table)) if translator.exposed_object(table).is_none() => {
                return Some(Extractor::Interface(hash));
            }
            (Some(kind), Value::Nil) if kind != TypeKind::Primitive => return Some(Extractor::Object),
            _ => {}
        }
        self.wrapped(translator, value, data_type)
    }

    /// Concrete extractor for an unresolved generic parameter.
    fn by_tag(value: &Value) -> Option<Extractor> {
        match value {
            Value::Boolean(_) => Some(Extractor::Bool),
            Value::String(_) => Some(Extractor::String),
            Value::Table(_) => Some(Extractor::Table),
            Value::UserData(_) => Some(Extractor::Generic),
            Value::Function(_) => Some(Extractor::Function),
            Value::Number(_) => Some(Extractor::Number(PrimitiveKind::Double)),
            _ => None,
        }
    }

    fn wrapped(&self, translator: &Translator, value: &Value, data_type: DataType) -> Option<Extractor> {
        let object = translator.host_object_of(value)?;
        translator
            .registry()
            .value_matches(&object, data_type)
            .then_some(Extractor::Object)
    }

    /// Run `extractor` on `value`. `Ok(None)` means the value no longer
    /// fits; a number is never read from a non-number.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn extract(&self, translator: &Translator, extractor: Extractor, value: &Value) -> BridgeResult<Option<HostValue>> {
        Ok(match (extractor, value) {
            (Extractor::Number(kind), Value::Number(n)) => HostValue::from_number(*n, kind),
            (Extractor::Bool, Value::Boolean(b)) => Some(HostValue::Bool(*b)),
            (Extractor::String, Value::String(s)) => Some(HostValue::String(s.clone())),
            (Extractor::Table, Value::Table(t)) => Some(HostValue::Table(t.clone())),
            (Extractor::Function, Value::Function(f)) => Some(HostValue::Function(f.clone())),
            (Extractor::UserData, Value::UserData(u)) => Some(HostValue::UserData(u.clone())),
            (Extractor::Generic, v) => Some(translator.generic_value(v)),
            (Extractor::Object, Value::Nil) => Some(HostValue::Null),
            (Extractor::Object, v) => translator.host_object_of(v),
            (Extractor::Delegate(hash), Value::Function(f)) => {
                Some(HostValue::Object(translator.delegate_adapter(hash, f.clone())?))
            }
            (Extractor::Interface(hash), Value::Table(t)) => {
                Some(HostValue::Object(translator.table_adapter(hash, t.clone())?))
            }
            _ => None,
        })
    }

    /// Classify and extract in one step.
    pub fn convert(&self, translator: &Translator, value: &Value, data_type: DataType) -> BridgeResult<Option<HostValue>> {
        match self.classify(translator, value, data_type) {
            Some(extractor) => self.extract(translator, extractor, value),
            None => Ok(None),
        }
    }

    /// Convert one array element. Generic elements narrow integral numbers
    /// to `int`.
    pub fn element_value(&self, translator: &Translator, value: &Value, element: DataType) -> BridgeResult<Option<HostValue>> {
        if element.type_hash == primitives::OBJECT && !element.is_array {
            return Ok(Some(narrow(translator.generic_value(value))));
        }
        self.convert(translator, value, element)
    }

    /// Copy a table's values, in enumeration order, into a new host array.
    /// `None` if any value does not convert to `element`.
    pub fn table_to_array(&self, translator: &Translator, table: &TableRef, element: DataType) -> BridgeResult<Option<HostArray>> {
        let values = table.values();
        let mut items = Vec::with_capacity(values.len());
        for value in &values {
            match self.element_value(translator, value, element)? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(HostArray::new(element.identity(), items)))
    }
}

/// Integral doubles become `int` when they fit.
fn narrow(value: HostValue) -> HostValue {
    match value {
        HostValue::Double(d) if d.fract() == 0.0 && d >= i32::MIN as f64 && d <= i32::MAX as f64 => {
            HostValue::Int32(d as i32)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_match_numeric_targets_only() {
        let checker = TypeChecker::new();
        assert_eq!(checker.extractors[&primitives::INT32], Extractor::Number(PrimitiveKind::Int32));
        assert_eq!(checker.extractors[&primitives::CHAR], Extractor::Number(PrimitiveKind::Char));
        assert!(!checker.extractors.contains_key(&primitives::VOID));
    }

    #[test]
    fn generic_parameters_follow_the_tag() {
        assert_eq!(TypeChecker::by_tag(&Value::Number(1.0)), Some(Extractor::Number(PrimitiveKind::Double)));
        assert_eq!(TypeChecker::by_tag(&Value::string("x")), Some(Extractor::String));
        assert_eq!(TypeChecker::by_tag(&Value::Nil), None);
    }

    #[test]
    fn narrowing_keeps_fractions() {
        assert_eq!(narrow(HostValue::Double(3.0)), HostValue::Int32(3));
        assert_eq!(narrow(HostValue::Double(2.5)), HostValue::Double(2.5));
        assert_eq!(narrow(HostValue::Double(1e12)), HostValue::Double(1e12));
    }
}
