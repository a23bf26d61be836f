//! Core builtins: output, introspection, assertions, length.

use crate::vm::builtins::{error, expect_arity, BuiltinRegistry};
use crate::vm::interp::Interp;
use crate::vm::value::Value;

pub fn register(registry: &BuiltinRegistry) {
    registry.register("print", print);
    registry.register("eprint", eprint);
    registry.register("typeof", type_of);
    registry.register("assert", assert);
    registry.register("panic", panic);
    registry.register("len", len);
    registry.register("read_line", read_line);
}

/// `print(values…)` — render each argument and write a line to the
/// interpreter's output sink.
fn print(interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    let text = args
        .iter()
        .map(|value| value.display_string())
        .collect::<Vec<_>>()
        .join(" ");
    interp.shared.output.write_line(&text);
    Ok(Value::Null)
}

/// `eprint(values…)` — like `print`, to stderr.
fn eprint(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    let text = args
        .iter()
        .map(|value| value.display_string())
        .collect::<Vec<_>>()
        .join(" ");
    eprintln!("{}", text);
    Ok(Value::Null)
}

/// `typeof(v)` — the value's type name as a string.
fn type_of(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("typeof", &args, 1)?;
    Ok(Value::str(args[0].type_name()))
}

/// `assert(cond)` / `assert(cond, message)` — throw when the condition is
/// falsy.
fn assert(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(error(format!(
            "arity error: `assert` takes 1 or 2 arguments, got {}",
            args.len()
        )));
    }
    if args[0].is_truthy() {
        return Ok(Value::Null);
    }
    match args.get(1) {
        Some(message) => Err(message.clone()),
        None => Err(error("assertion failed")),
    }
}

/// `panic(message)` — raise the message; if never caught the interpreter
/// exits with the stack trace.
fn panic(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("panic", &args, 1)?;
    Err(args.into_iter().next().unwrap())
}

/// `len(v)` — element count: code points for strings, elements for arrays,
/// bytes for buffers, fields for objects.
fn len(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("len", &args, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.char_len(),
        Value::Array(a) => a.len(),
        Value::Buffer(b) => b.len(),
        Value::Object(o) => o.field_count(),
        other => {
            return Err(error(format!(
                "type error: `len` expects a string, array, buffer, or object, got `{}`",
                other.type_name()
            )))
        }
    };
    Ok(Value::I32(n as i32))
}

/// `read_line()` — one line from stdin without the trailing newline; null
/// at end of input.
fn read_line(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("read_line", &args, 0)?;
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => Ok(Value::Null),
        Ok(_) => {
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Ok(Value::str(line))
        }
        Err(e) => Err(error(format!("read_line failed: {}", e))),
    }
}
