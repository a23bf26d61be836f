//! Serialization and FFI-callback builtins.

use crate::vm::builtins::{error, expect_arity, BuiltinRegistry};
use crate::vm::ffi;
use crate::vm::interp::Interp;
use crate::vm::json;
use crate::vm::value::Value;

pub fn register(registry: &BuiltinRegistry) {
    registry.register("serialize", serialize);
    registry.register("deserialize", deserialize);
    registry.register("callback", callback);
    registry.register("callback_free", callback_free);
}

/// `serialize(v)` — value to JSON text. Fails on cycles and on kinds with
/// no JSON form (functions, ptr, buffers, handles).
fn serialize(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("serialize", &args, 1)?;
    json::serialize(&args[0]).map(Value::str).map_err(error)
}

/// `deserialize(s)` — JSON text to a value.
fn deserialize(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("deserialize", &args, 1)?;
    match &args[0] {
        Value::Str(s) => json::parse(&s.to_string_lossy()).map_err(error),
        other => Err(error(format!(
            "type error: `deserialize` expects a string, got `{}`",
            other.type_name()
        ))),
    }
}

/// `callback(fn)` — register a script function for native code and return
/// its handle as a ptr.
fn callback(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("callback", &args, 1)?;
    match &args[0] {
        Value::Function(func) => Ok(Value::Ptr(ffi::register_callback(func.clone()))),
        other => Err(error(format!(
            "type error: `callback` expects a function, got `{}`",
            other.type_name()
        ))),
    }
}

/// `callback_free(handle)` — release a callback registration. Idempotent.
fn callback_free(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("callback_free", &args, 1)?;
    match &args[0] {
        Value::Ptr(id) => {
            ffi::free_callback(*id);
            Ok(Value::Null)
        }
        other => Err(error(format!(
            "type error: `callback_free` expects a ptr, got `{}`",
            other.type_name()
        ))),
    }
}
