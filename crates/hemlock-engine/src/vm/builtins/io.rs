//! File and socket constructors.
//!
//! The handles themselves (read/write/accept/close) are driven through the
//! receiver method tables; these builtins only open them.

use crate::vm::builtins::{error, expect_arity, BuiltinRegistry};
use crate::vm::interp::property::int_index;
use crate::vm::interp::Interp;
use crate::vm::object::{FileHandle, SocketHandle};
use crate::vm::value::Value;
use std::sync::Arc;

pub fn register(registry: &BuiltinRegistry) {
    registry.register("open", open);
    registry.register("connect", connect);
    registry.register("listen", listen);
}

fn expect_str(value: &Value, name: &str) -> Result<String, Value> {
    match value {
        Value::Str(s) => Ok(s.to_string_lossy()),
        other => Err(error(format!(
            "type error: `{}` expects a string, got `{}`",
            name,
            other.type_name()
        ))),
    }
}

fn expect_port(value: &Value, name: &str) -> Result<u16, Value> {
    let n = int_index(value).map_err(error)?;
    u16::try_from(n).map_err(|_| error(format!("`{}`: invalid port {}", name, n)))
}

/// `open(path)` / `open(path, mode)` — open a file; mode is one of
/// `r w a r+ w+` (default `r`).
fn open(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(error(format!(
            "arity error: `open` takes 1 or 2 arguments, got {}",
            args.len()
        )));
    }
    let path = expect_str(&args[0], "open")?;
    let mode = match args.get(1) {
        Some(mode) => expect_str(mode, "open")?,
        None => "r".to_string(),
    };
    match FileHandle::open(&path, &mode) {
        Ok(file) => Ok(Value::File(Arc::new(file))),
        Err(e) => Err(error(format!("cannot open `{}`: {}", path, e))),
    }
}

/// `connect(host, port)` — a connected TCP socket.
fn connect(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("connect", &args, 2)?;
    let host = expect_str(&args[0], "connect")?;
    let port = expect_port(&args[1], "connect")?;
    match SocketHandle::connect(&host, port) {
        Ok(socket) => Ok(Value::Socket(Arc::new(socket))),
        Err(e) => Err(error(format!("cannot connect to {}:{}: {}", host, port, e))),
    }
}

/// `listen(host, port)` — a listening TCP socket; accept with `.accept()`.
fn listen(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("listen", &args, 2)?;
    let host = expect_str(&args[0], "listen")?;
    let port = expect_port(&args[1], "listen")?;
    match SocketHandle::listen(&host, port) {
        Ok(socket) => Ok(Value::Socket(Arc::new(socket))),
        Err(e) => Err(error(format!("cannot listen on {}:{}: {}", host, port, e))),
    }
}
