//! Method resolver and invoker.
//!
//! A [`MethodWrapper`] is bound to a method group (or a single overload, or
//! a type's constructors) and is exposed to script as a function. On each
//! call it matches the script arguments against the candidates in
//! declaration order, invokes the first one that fits and pushes the return
//! value followed by any by-reference slots.
//!
//! The most recent successful match is kept as a [`CallPlan`]. A later call
//! with the same argument count replays the plan's extractors first and only
//! rescans the group when they no longer fit.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use hostbridge_core::{DataType, Dispatch, HostArray, HostObject, HostValue, MethodEntry, TypeHash};
use hostbridge_vm::{FunctionRef, LuaError, LuaState, Value};

use crate::check_type::Extractor;
use crate::error::BridgeResult;
use crate::translator::Translator;

/// Where the target object of a call comes from.
#[derive(Clone)]
pub(crate) enum Receiver {
    /// Static call; arguments start at the first stack slot
    None,
    /// Static call whose first stack slot is the callee itself (`Type(...)`)
    SkipFirst,
    /// Instance call; the first stack slot is the target (`obj:Name(...)`)
    FromFirst,
    /// Instance call on a fixed target
    Bound(HostObject),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Method,
    Constructor,
}

/// How one declared parameter is filled from the script arguments.
#[derive(Debug, Clone, Copy)]
enum ArgStep {
    Single {
        slot: usize,
        position: usize,
        extractor: Extractor,
    },
    /// Variadic parameter filled from one script table
    Table {
        slot: usize,
        position: usize,
        element: DataType,
    },
    /// Variadic parameter filled from the remaining scalars
    Spread {
        slot: usize,
        position: usize,
        element: DataType,
        count: usize,
    },
}

/// A resolved call shape.
struct CallPlan {
    method: Rc<MethodEntry>,
    steps: Vec<ArgStep>,
    /// Argument slots as resolved; defaults and output slots are reused
    template: Vec<HostValue>,
    /// Parameters pushed back after the return value
    out_slots: Vec<usize>,
    nargs: usize,
}

enum Bound {
    Ready(Vec<HostValue>),
    /// 1-based position of the first argument that no longer fits
    Mismatch(usize),
}

impl CallPlan {
    /// Match `args` against `method`. `Ok(None)` when the candidate does not
    /// accept them.
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn matching(
        translator: &Translator,
        method: &Rc<MethodEntry>,
        args: &[Value],
    ) -> BridgeResult<Option<(CallPlan, Vec<HostValue>)>> {
        let checker = translator.checker();
        let mut steps = Vec::with_capacity(method.params.len());
        let mut values = Vec::with_capacity(method.params.len());
        let mut out_slots = Vec::new();
        let mut cursor = 0;

        for (slot, param) in method.params.iter().enumerate() {
            if param.data_type.is_by_ref() {
                out_slots.push(slot);
            }
            if param.data_type.is_output_only() {
                values.push(HostValue::default_for(param.data_type.stripped()));
                continue;
            }

            if param.is_variadic {
                let element = param.data_type.element();
                let rest = args.get(cursor..).unwrap_or_default();
                if let [Value::Table(table)] = rest {
                    if let Some(array) = checker.table_to_array(translator, table, element)? {
                        steps.push(ArgStep::Table {
                            slot,
                            position: cursor,
                            element,
                        });
                        values.push(HostValue::Array(array));
                        cursor += 1;
                        continue;
                    }
                }
                let Some(array) = spread(translator, rest, element)? else {
                    return Ok(None);
                };
                steps.push(ArgStep::Spread {
                    slot,
                    position: cursor,
                    element,
                    count: rest.len(),
                });
                values.push(HostValue::Array(array));
                cursor = args.len();
                continue;
            }

            let Some(value) = args.get(cursor) else {
                match &param.default {
                    Some(default) => {
                        values.push(default.clone());
                        continue;
                    }
                    None => return Ok(None),
                }
            };
            let extracted = match checker.classify(translator, value, param.data_type) {
                Some(extractor) => checker
                    .extract(translator, extractor, value)?
                    .map(|converted| (extractor, converted)),
                None => None,
            };
            match (extracted, &param.default) {
                (Some((extractor, converted)), _) => {
                    steps.push(ArgStep::Single {
                        slot,
                        position: cursor,
                        extractor,
                    });
                    values.push(converted);
                    cursor += 1;
                }
                (None, Some(default)) => values.push(default.clone()),
                (None, None) => return Ok(None),
            }
        }

        if cursor != args.len() {
            return Ok(None);
        }
        let plan = CallPlan {
            method: method.clone(),
            steps,
            template: values.clone(),
            out_slots,
            nargs: args.len(),
        };
        Ok(Some((plan, values)))
    }

    /// Replay the remembered extractors on new arguments.
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn bind(&self, translator: &Translator, args: &[Value]) -> BridgeResult<Bound> {
        let checker = translator.checker();
        let mut values = self.template.clone();
        for step in &self.steps {
            match *step {
                ArgStep::Single {
                    slot,
                    position,
                    extractor,
                } => {
                    let value = &args[position];
                    let data_type = self.method.params[slot].data_type;
                    if checker.classify(translator, value, data_type) != Some(extractor) {
                        return Ok(Bound::Mismatch(position + 1));
                    }
                    match checker.extract(translator, extractor, value)? {
                        Some(converted) => values[slot] = converted,
                        None => return Ok(Bound::Mismatch(position + 1)),
                    }
                }
                ArgStep::Table { slot, position, element } => {
                    let Value::Table(table) = &args[position] else {
                        return Ok(Bound::Mismatch(position + 1));
                    };
                    match checker.table_to_array(translator, table, element)? {
                        Some(array) => values[slot] = HostValue::Array(array),
                        None => return Ok(Bound::Mismatch(position + 1)),
                    }
                }
                ArgStep::Spread {
                    slot,
                    position,
                    element,
                    count,
                } => {
                    let rest = &args[position..position + count];
                    if let [Value::Table(_)] = rest {
                        // a lone table was spread before; let the full scan decide
                        return Ok(Bound::Mismatch(position + 1));
                    }
                    match spread(translator, rest, element)? {
                        Some(array) => values[slot] = HostValue::Array(array),
                        None => return Ok(Bound::Mismatch(position + 1)),
                    }
                }
            }
        }
        Ok(Bound::Ready(values))
    }
}

/// Collect scalar arguments into a host array of `element`.
fn spread(translator: &Translator, values: &[Value], element: DataType) -> BridgeResult<Option<HostArray>> {
    let checker = translator.checker();
    let mut items = Vec::with_capacity(values.len());
    for value in values {
        match checker.element_value(translator, value, element)? {
            Some(item) => items.push(item),
            None => return Ok(None),
        }
    }
    Ok(Some(HostArray::new(element.identity(), items)))
}

/// Script-callable binding of a method group, overload or constructor set.
pub(crate) struct MethodWrapper {
    translator: Weak<Translator>,
    owner: TypeHash,
    name: String,
    candidates: Vec<Rc<MethodEntry>>,
    receiver: Receiver,
    dispatch: Dispatch,
    kind: CallKind,
    last: RefCell<Option<Rc<CallPlan>>>,
}

impl MethodWrapper {
    /// Overloads of one method name, tried in declaration order.
    pub fn group(
        translator: &Translator,
        owner: TypeHash,
        name: &str,
        candidates: Vec<Rc<MethodEntry>>,
        receiver: Receiver,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            translator: translator.weak(),
            owner,
            name: name.to_string(),
            candidates,
            receiver,
            dispatch,
            kind: CallKind::Method,
            last: RefCell::new(None),
        }
    }

    /// Exactly one overload.
    pub fn exact(translator: &Translator, method: Rc<MethodEntry>, receiver: Receiver) -> Self {
        let kind = if method.is_constructor() {
            CallKind::Constructor
        } else {
            CallKind::Method
        };
        Self {
            translator: translator.weak(),
            owner: method.owner,
            name: method.name.clone(),
            candidates: vec![method],
            receiver,
            dispatch: Dispatch::Virtual,
            kind,
            last: RefCell::new(None),
        }
    }

    /// Constructors of `hash`, called as `Type(...)`.
    pub fn constructors(translator: &Translator, hash: TypeHash) -> Self {
        Self {
            translator: translator.weak(),
            owner: hash,
            name: translator.registry().type_name(hash),
            candidates: translator.registry().constructors(hash),
            receiver: Receiver::SkipFirst,
            dispatch: Dispatch::Base,
            kind: CallKind::Constructor,
            last: RefCell::new(None),
        }
    }

    /// Script function calling this wrapper.
    pub fn into_function(wrapper: &Rc<Self>) -> FunctionRef {
        let wrapper = wrapper.clone();
        FunctionRef::new(wrapper.name.clone(), move |state: &LuaState| wrapper.call(state))
    }

    /// Resolve, invoke and push the results of a call whose arguments are on
    /// the current frame.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, state: &LuaState) -> Result<usize, LuaError> {
        let translator = self
            .translator
            .upgrade()
            .ok_or_else(|| LuaError::runtime("script session has been closed"))?;
        let (target, first) = self.target(&translator, state)?;
        let args: Vec<Value> = (first..=state.top()).map(|idx| state.value(idx)).collect();

        let cached = self.last.borrow().clone();
        if let Some(plan) = cached.filter(|plan| plan.nargs == args.len()) {
            match plan.bind(&translator, &args)? {
                Bound::Ready(values) => {
                    translator.record_cache_hit();
                    trace!(method = %self.name, "replaying cached call shape");
                    return self.finish(&translator, state, &plan, target.as_ref(), values);
                }
                Bound::Mismatch(position) if self.candidates.len() == 1 => {
                    return Err(translator.throw(format!("argument number {position} is invalid")));
                }
                Bound::Mismatch(_) => {}
            }
        }

        translator.record_full_resolution();
        for method in &self.candidates {
            if let Some((plan, values)) = CallPlan::matching(&translator, method, &args)? {
                debug!(
                    method = %self.name,
                    nargs = args.len(),
                    candidates = self.candidates.len(),
                    "resolved call shape"
                );
                let plan = Rc::new(plan);
                *self.last.borrow_mut() = Some(plan.clone());
                return self.finish(&translator, state, &plan, target.as_ref(), values);
            }
        }
        Err(translator.throw(self.no_match(&translator, &args)))
    }

    fn target(&self, translator: &Translator, state: &LuaState) -> Result<(Option<HostObject>, i32), LuaError> {
        match &self.receiver {
            Receiver::None => Ok((None, 1)),
            Receiver::SkipFirst => Ok((None, 2)),
            Receiver::Bound(obj) => Ok((Some(obj.clone()), 1)),
            Receiver::FromFirst => match translator.receiver_of(&state.value(1)) {
                Some(HostValue::Object(obj)) if translator.registry().is_assignable(self.owner, obj.type_hash()) => {
                    Ok((Some(obj), 2))
                }
                _ => Err(translator.throw(format!(
                    "instance method '{}' requires a non null target object",
                    self.name
                ))),
            },
        }
    }

    fn finish(
        &self,
        translator: &Translator,
        state: &LuaState,
        plan: &CallPlan,
        target: Option<&HostObject>,
        mut args: Vec<HostValue>,
    ) -> Result<usize, LuaError> {
        let method = &plan.method;
        let result = match self.kind {
            CallKind::Constructor => method.invoke(None, &mut args, Dispatch::Base),
            CallKind::Method => method.invoke(target, &mut args, self.dispatch),
        }
        .map_err(|err| translator.throw_host(err))?;

        let mut results = Vec::new();
        if !method.returns_void() {
            match result {
                HostValue::Array(array) if self.kind == CallKind::Method => results.extend(array.to_vec()),
                other => results.push(other),
            }
        }
        results.extend(plan.out_slots.iter().map(|&slot| args[slot].clone()));

        if !state.check_stack(results.len()) {
            return Err(LuaError::StackOverflow);
        }
        for value in &results {
            translator.push(value);
        }
        Ok(results.len())
    }

    fn no_match(&self, translator: &Translator, args: &[Value]) -> String {
        let registry = translator.registry();
        match self.kind {
            CallKind::Method => format!("invalid arguments to method: {}.{}", registry.type_name(self.owner), self.name),
            CallKind::Constructor => {
                let shape: Vec<&str> = args.iter().map(|arg| arg.value_type().name()).collect();
                format!(
                    "{} does not contain constructor({}) argument match",
                    registry.type_name(self.owner),
                    shape.join(", ")
                )
            }
        }
    }
}

/// Bound method lookup by parameter type names for `get_method_bysig`.
pub(crate) fn find_by_signature<'m>(
    translator: &Translator,
    candidates: &'m [Rc<MethodEntry>],
    type_names: &[String],
) -> Result<&'m Rc<MethodEntry>, String> {
    let mut wanted = Vec::with_capacity(type_names.len());
    for name in type_names {
        let (base, is_array) = match name.strip_suffix("[]") {
            Some(base) => (base, true),
            None => (name.as_str(), false),
        };
        let entry = translator
            .registry()
            .lookup(base)
            .ok_or_else(|| format!("unknown type {name}"))?;
        wanted.push(if is_array {
            TypeHash::array_of(entry.type_hash)
        } else {
            entry.type_hash
        });
    }
    candidates
        .iter()
        .find(|method| method.param_types() == wanted)
        .ok_or_else(|| "invalid method signature".to_string())
}
