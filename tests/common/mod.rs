//! Host types shared by the integration tests.
//!
//! There is no script compiler; "script" code is written as native
//! closures that drive the state the way compiled chunks would.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use hostbridge::hostbridge_core::{
    CallContext, DataType, ExceptionKind, HostArray, HostError, HostObject, HostValue, ParamEntry, TypeHash,
    primitives,
};
use hostbridge::hostbridge_registry::TypeRegistry;
use hostbridge::hostbridge_vm::{LuaError, LuaState, Value};
use hostbridge::{Session, SessionOptions};
use tracing_subscriber::EnvFilter;

pub struct Counter {
    pub value: i32,
    pub label: Option<String>,
}

pub struct Greeter {
    pub greeting: String,
}

/// Keeps the last variadic array a call packed.
pub struct ArgLog {
    pub last: Option<HostArray>,
}

pub struct Button {
    pub handlers: Vec<HostObject>,
    pub clicks: i32,
}

fn register_counter(registry: &mut TypeRegistry) {
    registry
        .register_class::<Counter>("Counter")
        .constructor(vec![], |_: &mut CallContext| Ok(Counter { value: 0, label: None }))
        .constructor(
            vec![ParamEntry::new("start", primitives::INT32)],
            |ctx: &mut CallContext| {
                Ok(Counter {
                    value: ctx.arg(0)?,
                    label: None,
                })
            },
        )
        .field(
            "Value",
            primitives::INT32,
            |c: &Counter| c.value,
            |c: &mut Counter, v: i32| {
                c.value = v;
                Ok(())
            },
        )
        .readonly_property("Label", primitives::STRING, |c: &Counter| c.label.clone())
        .method(
            "Add",
            vec![ParamEntry::new("amount", primitives::INT32)],
            primitives::INT32,
            |ctx: &mut CallContext| {
                let amount: i32 = ctx.arg(0)?;
                let value = {
                    let mut counter = ctx.this_mut::<Counter>()?;
                    counter.value += amount;
                    counter.value
                };
                ctx.set_return(value);
                Ok(())
            },
        )
        .build()
        .unwrap();
}

fn register_calculator(registry: &mut TypeRegistry) {
    struct Calculator;

    registry
        .register_class::<Calculator>("Calculator")
        .static_method(
            "Sum",
            vec![ParamEntry::variadic("values", primitives::INT32)],
            primitives::INT32,
            |ctx: &mut CallContext| {
                let values: HostArray = ctx.arg(0)?;
                let total: i32 = values
                    .to_vec()
                    .iter()
                    .map(|v| match v {
                        HostValue::Int32(n) => *n,
                        _ => 0,
                    })
                    .sum();
                ctx.set_return(total);
                Ok(())
            },
        )
        .static_method(
            "Divide",
            vec![
                ParamEntry::new("a", primitives::INT32),
                ParamEntry::new("b", primitives::INT32),
                ParamEntry::new("remainder", DataType::simple(primitives::INT32).as_out()),
            ],
            primitives::INT32,
            |ctx: &mut CallContext| {
                let a: i32 = ctx.arg(0)?;
                let b: i32 = ctx.arg(1)?;
                if b == 0 {
                    return Err(HostError::new(ExceptionKind::Argument, "division by zero"));
                }
                ctx.set_arg(2, a % b)?;
                ctx.set_return(a / b);
                Ok(())
            },
        )
        .static_method(
            "Describe",
            vec![ParamEntry::new("value", primitives::INT32)],
            primitives::STRING,
            |ctx: &mut CallContext| {
                let value: i32 = ctx.arg(0)?;
                ctx.set_return(format!("int {value}"));
                Ok(())
            },
        )
        .static_method(
            "Describe",
            vec![ParamEntry::new("value", primitives::STRING)],
            primitives::STRING,
            |ctx: &mut CallContext| {
                let value: String = ctx.arg(0)?;
                ctx.set_return(format!("string {value}"));
                Ok(())
            },
        )
        .static_method(
            "Scale",
            vec![
                ParamEntry::new("x", primitives::DOUBLE),
                ParamEntry::new("factor", primitives::DOUBLE).with_default(HostValue::Double(2.0)),
            ],
            primitives::DOUBLE,
            |ctx: &mut CallContext| {
                let x: f64 = ctx.arg(0)?;
                let factor: f64 = ctx.arg(1)?;
                ctx.set_return(x * factor);
                Ok(())
            },
        )
        .static_method(
            "Apply",
            vec![
                ParamEntry::new("transform", TypeHash::from_name("Transform")),
                ParamEntry::new("x", primitives::INT32),
            ],
            primitives::INT32,
            |ctx: &mut CallContext| {
                let transform: HostObject = ctx.arg(0)?;
                let x: i32 = ctx.arg(1)?;
                let delegate = transform
                    .as_delegate()
                    .ok_or_else(|| HostError::invalid_cast("not a delegate"))?;
                let result = delegate.invoke(&mut [HostValue::Int32(x)])?;
                ctx.set_return(result);
                Ok(())
            },
        )
        .build()
        .unwrap();
}

fn register_arg_log(registry: &mut TypeRegistry) {
    fn record(ctx: &mut CallContext) -> Result<(), HostError> {
        let values: HostArray = ctx.arg(0)?;
        ctx.this_mut::<ArgLog>()?.last = Some(values);
        Ok(())
    }

    registry
        .register_class::<ArgLog>("ArgLog")
        .constructor(vec![], |_: &mut CallContext| Ok(ArgLog { last: None }))
        .method("Ints", vec![ParamEntry::variadic("values", primitives::INT32)], DataType::void(), record)
        .method("Objects", vec![ParamEntry::variadic("values", primitives::OBJECT)], DataType::void(), record)
        .build()
        .unwrap();
}

fn register_greeters(registry: &mut TypeRegistry) {
    registry
        .register_interface("IGreeter")
        .method("Greet", vec![ParamEntry::new("name", primitives::STRING)], primitives::STRING)
        .build()
        .unwrap();
    registry
        .register_interface("ICalc")
        .method("Foo", vec![ParamEntry::new("x", primitives::INT32)], primitives::INT32)
        .build()
        .unwrap();
    registry
        .register_class::<Greeter>("Greeter")
        .implements("IGreeter")
        .constructor(vec![], |_: &mut CallContext| {
            Ok(Greeter {
                greeting: "Hello".to_string(),
            })
        })
        .virtual_method(
            "Greet",
            vec![ParamEntry::new("name", primitives::STRING)],
            primitives::STRING,
            |ctx: &mut CallContext| {
                let name: String = ctx.arg(0)?;
                let greeting = ctx.this::<Greeter>()?.greeting.clone();
                ctx.set_return(format!("{greeting}, {name}"));
                Ok(())
            },
        )
        .virtual_method("Farewell", vec![], primitives::STRING, |ctx: &mut CallContext| {
            ctx.set_return("Goodbye");
            Ok(())
        })
        .field(
            "Greeting",
            primitives::STRING,
            |g: &Greeter| g.greeting.clone(),
            |g: &mut Greeter, v: String| {
                g.greeting = v;
                Ok(())
            },
        )
        .build()
        .unwrap();
}

fn register_delegates(registry: &mut TypeRegistry) {
    registry
        .register_delegate("Transform", vec![ParamEntry::new("x", primitives::INT32)], primitives::INT32)
        .unwrap();
    registry
        .register_delegate(
            "TryParse",
            vec![
                ParamEntry::new("text", primitives::STRING),
                ParamEntry::new("value", DataType::simple(primitives::INT32).as_out()),
            ],
            primitives::BOOL,
        )
        .unwrap();
    registry
        .register_delegate("ClickHandler", vec![ParamEntry::new("clicks", primitives::INT32)], DataType::void())
        .unwrap();
}

fn register_button(registry: &mut TypeRegistry) {
    registry
        .register_class::<Button>("Button")
        .constructor(vec![], |_: &mut CallContext| {
            Ok(Button {
                handlers: Vec::new(),
                clicks: 0,
            })
        })
        .event(
            "Clicked",
            "ClickHandler",
            |b: &mut Button, handler: HostObject| {
                b.handlers.push(handler);
                Ok(())
            },
            |b: &mut Button, handler: &HostObject| {
                b.handlers.retain(|h| !h.ptr_eq(handler));
                Ok(())
            },
        )
        .method("Click", vec![], DataType::void(), |ctx: &mut CallContext| {
            let (handlers, clicks) = {
                let mut button = ctx.this_mut::<Button>()?;
                button.clicks += 1;
                (button.handlers.clone(), button.clicks)
            };
            for handler in handlers {
                if let Some(delegate) = handler.as_delegate() {
                    delegate.invoke(&mut [HostValue::Int32(clicks)])?;
                }
            }
            Ok(())
        })
        .readonly_property("HandlerCount", primitives::INT32, |b: &Button| b.handlers.len() as i32)
        .build()
        .unwrap();
}

pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    register_delegates(&mut registry);
    register_counter(&mut registry);
    register_calculator(&mut registry);
    register_greeters(&mut registry);
    register_button(&mut registry);
    register_arg_log(&mut registry);
    registry
}

/// Log to the test writer; `RUST_LOG=hostbridge=trace` shows dispatch.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hostbridge=warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

pub fn session() -> Session {
    init_tracing();
    let session = Session::new(registry(), SessionOptions::default()).unwrap();
    for name in ["Counter", "Calculator", "Greeter", "Button", "ArgLog", "Transform", "TryParse"] {
        session.import_type(name).unwrap();
    }
    session
}

pub fn global(session: &Session, name: &str) -> Value {
    session.state().globals().get(name)
}

/// `obj:name(args...)`
pub fn call_method(state: &LuaState, obj: &Value, name: &str, args: &[Value]) -> Result<Vec<Value>, LuaError> {
    let method = state.index_value(obj, &Value::from(name))?;
    let mut full = vec![obj.clone()];
    full.extend_from_slice(args);
    state.call_value(&method, &full)
}

/// `Type.name(args...)`
pub fn call_static(state: &LuaState, class: &Value, name: &str, args: &[Value]) -> Result<Vec<Value>, LuaError> {
    let method = state.index_value(class, &Value::from(name))?;
    state.call_value(&method, args)
}

pub fn get(state: &LuaState, obj: &Value, key: &str) -> Value {
    state.index_value(obj, &Value::from(key)).unwrap()
}

/// A script table of functions, as a chunk would build with
/// `local t = {}; function t:Name(...) ... end`.
pub fn script_table(state: &LuaState, functions: Vec<(&str, Value)>) -> Value {
    let table = state.new_table();
    state.pop(1);
    for (name, function) in functions {
        table.set(name, function).unwrap();
    }
    Value::Table(table)
}

/// Records every call it receives.
pub fn recorder(state: &LuaState, name: &str) -> (Value, Rc<RefCell<Vec<Vec<Value>>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let sink = calls.clone();
    let function = state.create_function(name, move |state: &LuaState| {
        let args = (1..=state.top()).map(|idx| state.value(idx)).collect();
        sink.borrow_mut().push(args);
        Ok(0)
    });
    (Value::Function(function), calls)
}
