//! Concurrency builtins: task spawn/join/detach, channels, sleep.
//!
//! `spawn` deep-copies its arguments (the only supported isolation
//! mechanism between tasks) and starts a dedicated OS thread whose entry
//! point builds a fresh execution context over the shared state, invokes
//! the function, and publishes exactly one of a result or an exception.

use crate::vm::builtins::{error, expect_arity, BuiltinRegistry};
use crate::vm::channel::ChannelObject;
use crate::vm::context::Flow;
use crate::vm::interp::property::int_index;
use crate::vm::interp::{Interp, SharedState};
use crate::vm::object::FunctionPayload;
use crate::vm::task::TaskObject;
use crate::vm::value::Value;
use std::sync::Arc;

pub fn register(registry: &BuiltinRegistry) {
    registry.register("spawn", spawn);
    registry.register("join", join);
    registry.register("detach", detach);
    registry.register("channel", channel);
    registry.register("sleep", sleep);
}

/// Start a task thread running `func(args…)`. Shared by `spawn` and the
/// embedding API.
pub fn spawn_task(
    shared: Arc<SharedState>,
    func: Arc<FunctionPayload>,
    args: Vec<Value>,
) -> Arc<TaskObject> {
    let task = Arc::new(TaskObject::new());
    let completion = task.clone();
    std::thread::spawn(move || {
        let mut interp = Interp::new(shared);
        let result = interp.call_function(&func, None, args, 0);
        match std::mem::take(&mut interp.ctx.flow) {
            Flow::Throw(exception) => completion.fail(exception),
            _ => completion.complete(result),
        }
    });
    task
}

/// `spawn(fn, args…)` — deep-copy the arguments and run the function on a
/// new OS thread, returning the task handle.
fn spawn(interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    if args.is_empty() {
        return Err(error("arity error: `spawn` requires a function argument"));
    }
    let mut args = args.into_iter();
    let func = match args.next().unwrap() {
        Value::Function(func) => func,
        other => {
            return Err(error(format!(
                "type error: `spawn` expects a function, got `{}`",
                other.type_name()
            )))
        }
    };
    let mut copied = Vec::new();
    for arg in args {
        copied.push(arg.deep_copy().map_err(error)?);
    }
    let task = spawn_task(interp.shared.clone(), func, copied);
    Ok(Value::Task(task))
}

/// `join(task)` — block for completion; return the result or re-throw the
/// captured exception. A task may be joined at most once.
fn join(interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("join", &args, 1)?;
    match &args[0] {
        Value::Task(task) => {
            let task = task.clone();
            let value = interp.join_task(&task, 0);
            // join_task reports failures through the flow flag; surface the
            // value as-is and let the evaluator unwind.
            Ok(value)
        }
        other => Err(error(format!(
            "type error: `join` expects a task, got `{}`",
            other.type_name()
        ))),
    }
}

/// `detach(task)` — give up the right to join; the task's outcome is
/// dropped at completion.
fn detach(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("detach", &args, 1)?;
    match &args[0] {
        Value::Task(task) => {
            task.detach();
            Ok(Value::Null)
        }
        other => Err(error(format!(
            "type error: `detach` expects a task, got `{}`",
            other.type_name()
        ))),
    }
}

/// `channel(cap)` — a bounded channel with capacity ≥ 1.
fn channel(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("channel", &args, 1)?;
    let cap = int_index(&args[0]).map_err(error)?;
    if cap < 1 {
        return Err(error("channel capacity must be at least 1"));
    }
    Ok(Value::Channel(Arc::new(ChannelObject::new(cap as usize))))
}

/// `sleep(ms)` — block the calling task.
fn sleep(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("sleep", &args, 1)?;
    let ms = int_index(&args[0]).map_err(error)?;
    if ms > 0 {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
    Ok(Value::Null)
}
