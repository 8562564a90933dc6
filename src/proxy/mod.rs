//! Dynamic proxy synthesizer.
//!
//! An adapter lets script code stand in for a host abstraction: a table of
//! functions subclassing a host class or implementing an interface, or a
//! single function bound to a delegate or event handler signature.
//!
//! The shape of an adapter (which methods it forwards and with what
//! signatures) is derived from the requesting session's registry and kept in
//! a process-wide [`AdapterDefinition`] registry. Sessions whose registries
//! declare the same shape share one definition; a same-named type with a
//! different shape gets its own. Instances are per session and carry the
//! script callables; see [`adapter`].

mod adapter;

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use rustc_hash::FxHashMap;
use tracing::info;

use hostbridge_core::{DataType, MethodEntry, TypeHash};
use hostbridge_registry::{RegistrationError, TypeRegistry};

use crate::error::BridgeResult;

pub(crate) use adapter::ScriptOverrides;

/// The host abstraction an adapter satisfies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Overrides the virtual methods of a class; unimplemented ones run the
    /// base implementation
    Subclass,
    /// Implements an interface; unimplemented methods return defaults
    Interface,
    /// Binds a function to a delegate signature
    Delegate,
    /// Binds a function to an event's handler signature
    EventHandler,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterKind::Subclass => "subclass",
            AdapterKind::Interface => "interface",
            AdapterKind::Delegate => "delegate",
            AdapterKind::EventHandler => "event handler",
        };
        f.write_str(name)
    }
}

/// A method an adapter forwards to script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedMethod {
    pub name: String,
    /// Declared parameter types, including by-reference and output slots
    pub params: Vec<DataType>,
    pub return_type: DataType,
    /// Whether a base implementation exists to fall back to
    pub has_base: bool,
    param_ids: Vec<TypeHash>,
}

impl ForwardedMethod {
    fn new(method: &MethodEntry, kind: AdapterKind) -> Self {
        Self {
            name: method.name.clone(),
            params: method.params.iter().map(|p| p.data_type).collect(),
            return_type: method.return_type,
            has_base: kind == AdapterKind::Subclass && method.implementation.is_some(),
            param_ids: method.param_types(),
        }
    }
}

/// Adapter shape for one host type.
#[derive(Debug)]
pub struct AdapterDefinition {
    /// Process-unique identifier
    pub id: u64,
    pub target: TypeHash,
    pub kind: AdapterKind,
    pub name: String,
    pub methods: Vec<ForwardedMethod>,
}

impl AdapterDefinition {
    /// The forwarded method matching `method` by name and parameter types.
    pub fn forwarded(&self, method: &MethodEntry) -> Option<&ForwardedMethod> {
        if matches!(self.kind, AdapterKind::Delegate | AdapterKind::EventHandler) {
            return self.methods.first();
        }
        let ids = method.param_types();
        self.methods
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(&method.name) && m.param_ids == ids)
    }
}

/// Definitions per type and kind; type names are only unique within one
/// registry, so one key may hold several shapes.
#[derive(Default)]
struct DefinitionRegistry {
    next_id: u64,
    definitions: FxHashMap<(TypeHash, AdapterKind), Vec<Arc<AdapterDefinition>>>,
}

static DEFINITIONS: OnceLock<Mutex<DefinitionRegistry>> = OnceLock::new();

fn definitions() -> &'static Mutex<DefinitionRegistry> {
    DEFINITIONS.get_or_init(|| Mutex::new(DefinitionRegistry::default()))
}

/// The adapter definition of `kind` for `target` as `registry` declares it.
/// The first request for a shape creates the definition; later requests
/// from any session declaring the same shape share it.
pub fn adapter_definition(
    registry: &TypeRegistry,
    target: TypeHash,
    kind: AdapterKind,
) -> BridgeResult<Arc<AdapterDefinition>> {
    let (name, methods) = shape(registry, target, kind)?;

    let mut guard = definitions().lock()?;
    let DefinitionRegistry { next_id, definitions } = &mut *guard;
    let variants = definitions.entry((target, kind)).or_default();
    if let Some(found) = variants.iter().find(|d| d.name == name && d.methods == methods) {
        return Ok(found.clone());
    }
    *next_id += 1;
    let definition = Arc::new(AdapterDefinition {
        id: *next_id,
        target,
        kind,
        name,
        methods,
    });
    variants.push(definition.clone());
    info!(
        adapter = %definition.name,
        id = definition.id,
        methods = definition.methods.len(),
        shapes = variants.len(),
        "created adapter definition"
    );
    Ok(definition)
}

fn shape(registry: &TypeRegistry, target: TypeHash, kind: AdapterKind) -> BridgeResult<(String, Vec<ForwardedMethod>)> {
    let entry = registry
        .get(target)
        .ok_or_else(|| RegistrationError::UnknownType(target.to_string()))?;
    let fits = match kind {
        AdapterKind::Subclass => entry.is_class() && !entry.is_sealed(),
        AdapterKind::Interface => entry.is_interface(),
        AdapterKind::Delegate | AdapterKind::EventHandler => entry.is_delegate(),
    };
    if !fits {
        return Err(RegistrationError::InvalidBase(entry.name.clone()).into());
    }
    let methods = match kind {
        AdapterKind::Subclass | AdapterKind::Interface => registry.overridable_methods(target),
        AdapterKind::Delegate | AdapterKind::EventHandler => entry.delegate_invoke().cloned().into_iter().collect(),
    };
    let methods = methods.iter().map(|m| ForwardedMethod::new(m, kind)).collect();
    Ok((format!("{} ({kind} adapter)", entry.name), methods))
}
