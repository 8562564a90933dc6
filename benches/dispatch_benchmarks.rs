//! Dispatch benchmarks.
//!
//! Measures the script -> host call path with and without the per-name
//! invocation cache hitting, plus member reads and wrapper interning.
//!
//! ```bash
//! cargo bench --bench dispatch_benchmarks
//! cargo bench --features profile-with-puffin --bench dispatch_benchmarks
//! ```

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use hostbridge::hostbridge_core::{HostObject, HostValue, TypeHash};
use hostbridge::hostbridge_vm::Value;

#[path = "../tests/common/mod.rs"]
mod common;

use common::{Counter, call_method, call_static, get, global, session};

#[cfg(feature = "profile-with-puffin")]
static FRAME_VIEW: std::sync::OnceLock<puffin::GlobalFrameView> = std::sync::OnceLock::new();

#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
    FRAME_VIEW.get_or_init(puffin::GlobalFrameView::default);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

fn method_dispatch(c: &mut Criterion) {
    setup_profiler();
    let mut group = c.benchmark_group("method_dispatch");

    let s = session();
    let state = s.state();
    let counter = state.call_value(&global(&s, "Counter"), &[Value::Number(0.0)]).unwrap().remove(0);

    // same signature every call: the cache hits
    group.bench_function("cached_instance_call", |b| {
        b.iter(|| {
            let result = call_method(state, &counter, "Add", &[Value::Number(1.0)]).unwrap();
            end_profiling_frame();
            black_box(result)
        })
    });

    // alternating overloads: every call misses and re-resolves
    let calc = global(&s, "Calculator");
    let mut flip = false;
    group.bench_function("alternating_overloads", |b| {
        b.iter(|| {
            flip = !flip;
            let arg = if flip { Value::Number(1.0) } else { Value::string("one") };
            let result = call_static(state, &calc, "Describe", &[arg]).unwrap();
            end_profiling_frame();
            black_box(result)
        })
    });

    group.bench_function("variadic_static_call", |b| {
        let args = [Value::Number(1.0), Value::Number(2.0), Value::Number(3.0), Value::Number(4.0)];
        b.iter(|| black_box(call_static(state, &calc, "Sum", &args).unwrap()))
    });

    group.finish();
}

fn member_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("member_access");

    let s = session();
    let state = s.state();
    let counter = state.call_value(&global(&s, "Counter"), &[Value::Number(3.0)]).unwrap().remove(0);

    group.bench_function("field_read", |b| b.iter(|| black_box(get(state, &counter, "Value"))));
    group.bench_function("field_write", |b| {
        b.iter(|| {
            state
                .new_index_value(&counter, Value::string("Value"), Value::Number(4.0))
                .unwrap()
        })
    });

    group.finish();
}

fn value_bridge(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_bridge");

    let s = session();
    let obj = HostValue::Object(HostObject::new(TypeHash::from_name("Counter"), Counter { value: 0, label: None }));
    let held = s.to_value(&obj);

    group.bench_function("reuse_live_wrapper", |b| b.iter(|| black_box(s.to_value(&obj))));
    group.bench_function("unwrap_object", |b| b.iter(|| black_box(s.from_value(&held, None).unwrap())));
    group.bench_function("scalar_round_trip", |b| {
        b.iter(|| {
            let value = s.to_value(&HostValue::Int32(black_box(42)));
            black_box(s.from_value(&value, None).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, method_dispatch, member_access, value_bridge);
criterion_main!(benches);
