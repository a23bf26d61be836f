//! Process builtins: subprocess execution and signals.

use crate::vm::builtins::{error, expect_arity, BuiltinRegistry};
use crate::vm::interp::property::int_index;
use crate::vm::interp::Interp;
use crate::vm::object::ObjectPayload;
use crate::vm::value::Value;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Signal-number constants installed as globals.
pub static SIGNAL_CONSTANTS: Lazy<Vec<(&'static str, i32)>> = Lazy::new(|| {
    vec![
        ("SIGHUP", 1),
        ("SIGINT", 2),
        ("SIGQUIT", 3),
        ("SIGILL", 4),
        ("SIGABRT", 6),
        ("SIGFPE", 8),
        ("SIGKILL", 9),
        ("SIGUSR1", 10),
        ("SIGSEGV", 11),
        ("SIGUSR2", 12),
        ("SIGPIPE", 13),
        ("SIGALRM", 14),
        ("SIGTERM", 15),
    ]
});

pub fn register(registry: &BuiltinRegistry) {
    registry.register("exec", exec);
    registry.register("signal", signal);
    registry.register("raise", raise);
}

/// `exec(cmd)` / `exec(cmd, args)` — run a subprocess to completion and
/// return `{ stdout, stderr, status }`.
fn exec(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(error(format!(
            "arity error: `exec` takes 1 or 2 arguments, got {}",
            args.len()
        )));
    }
    let Value::Str(cmd) = &args[0] else {
        return Err(error("type error: `exec` expects a command string"));
    };
    let mut command = std::process::Command::new(cmd.to_string_lossy());
    if let Some(extra) = args.get(1) {
        let Value::Array(extra) = extra else {
            return Err(error("type error: `exec` arguments must be an array"));
        };
        for arg in extra.snapshot() {
            match arg {
                Value::Str(s) => {
                    command.arg(s.to_string_lossy());
                }
                other => {
                    return Err(error(format!(
                        "type error: exec argument must be a string, got `{}`",
                        other.type_name()
                    )))
                }
            }
        }
    }
    let output = command
        .output()
        .map_err(|e| error(format!("exec failed: {}", e)))?;
    let result = ObjectPayload::new();
    result.set(
        "stdout",
        Value::str(String::from_utf8_lossy(&output.stdout).into_owned()),
    );
    result.set(
        "stderr",
        Value::str(String::from_utf8_lossy(&output.stderr).into_owned()),
    );
    result.set("status", Value::I32(output.status.code().unwrap_or(-1)));
    Ok(Value::Object(Arc::new(result)))
}

/// `signal(num, "ignore" | "default")` — set a signal disposition.
///
/// Script-function handlers are not supported: a handler would have to run
/// interpreter code in async-signal context.
fn signal(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("signal", &args, 2)?;
    let num = int_index(&args[0]).map_err(error)?;
    let Value::Str(action) = &args[1] else {
        return Err(error(
            "type error: `signal` expects \"ignore\" or \"default\"",
        ));
    };
    let handler = match action.to_string_lossy().as_str() {
        "ignore" => libc::SIG_IGN,
        "default" => libc::SIG_DFL,
        other => {
            return Err(error(format!(
                "`signal` action must be \"ignore\" or \"default\", got \"{}\"",
                other
            )))
        }
    };
    unsafe { libc::signal(num as libc::c_int, handler) };
    Ok(Value::Null)
}

/// `raise(num)` — deliver a signal to the current process.
fn raise(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("raise", &args, 1)?;
    let num = int_index(&args[0]).map_err(error)?;
    let rc = unsafe { libc::raise(num as libc::c_int) };
    if rc != 0 {
        return Err(error(format!("raise({}) failed", num)));
    }
    Ok(Value::Null)
}
