//! Method tables for built-in receiver kinds.
//!
//! Called from the call protocol when a property-access callee's receiver
//! is not a user object: strings, arrays, buffers, channels, files, and
//! sockets each route here. Array iteration methods (`map`, `filter`,
//! `reduce`, `each`) call back into user functions.

use crate::vm::interp::property::int_index;
use crate::vm::interp::Interp;
use crate::vm::object::{ArrayPayload, BufferPayload};
use crate::vm::value::Value;
use std::sync::Arc;

impl Interp {
    pub fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        line: u32,
    ) -> Value {
        let result = match &receiver {
            Value::Str(_) => self.string_method(&receiver, name, &args),
            Value::Array(_) => return self.array_method(&receiver, name, args, line),
            Value::Channel(ch) => {
                let ch = ch.clone();
                match name {
                    "send" => one_arg(&args, "send").and_then(|value| {
                        ch.send(value.clone()).map(|_| Value::Null)
                    }),
                    "recv" => no_args(&args, "recv").map(|_| ch.recv().unwrap_or(Value::Null)),
                    "close" => no_args(&args, "close").map(|_| {
                        ch.close();
                        Value::Null
                    }),
                    _ => Err(format!("channel has no method `{}`", name)),
                }
            }
            Value::File(file) => match name {
                "read" => match args.len() {
                    0 => file
                        .read_all()
                        .map(|bytes| Value::str(String::from_utf8_lossy(&bytes).into_owned())),
                    1 => int_index(&args[0]).and_then(|n| {
                        file.read_n(n.max(0) as usize)
                            .map(|bytes| Value::Buffer(Arc::new(BufferPayload::from_bytes(bytes))))
                    }),
                    n => Err(format!("arity error: `read` takes 0 or 1 arguments, got {}", n)),
                },
                "write" => one_arg(&args, "write").and_then(|value| {
                    let bytes = writable_bytes(value)?;
                    file.write_bytes(&bytes).map(|n| Value::I32(n as i32))
                }),
                "close" => no_args(&args, "close").map(|_| {
                    file.close();
                    Value::Null
                }),
                _ => Err(format!("file has no method `{}`", name)),
            },
            Value::Socket(socket) => match name {
                "send" => one_arg(&args, "send").and_then(|value| {
                    let bytes = writable_bytes(value)?;
                    socket.send_bytes(&bytes).map(|n| Value::I32(n as i32))
                }),
                "recv" => one_arg(&args, "recv").and_then(|value| {
                    let n = int_index(value)?;
                    socket
                        .recv_n(n.max(0) as usize)
                        .map(|bytes| Value::Buffer(Arc::new(BufferPayload::from_bytes(bytes))))
                }),
                "accept" => no_args(&args, "accept").and_then(|_| {
                    socket
                        .accept()
                        .map(|accepted| Value::Socket(Arc::new(accepted)))
                }),
                "close" => no_args(&args, "close").map(|_| {
                    socket.close();
                    Value::Null
                }),
                _ => Err(format!("socket has no method `{}`", name)),
            },
            other => Err(format!(
                "type error: `{}` has no method `{}`",
                other.type_name(),
                name
            )),
        };
        match result {
            Ok(value) => value,
            Err(message) => self.throw(format!("{} (line {})", message, line)),
        }
    }

    // ========================================================================
    // String methods (code-point semantics)
    // ========================================================================

    fn string_method(&mut self, receiver: &Value, name: &str, args: &[Value]) -> Result<Value, String> {
        let Value::Str(payload) = receiver else {
            unreachable!()
        };
        let text = payload.to_string_lossy();
        match name {
            "substr" => {
                let (start, len) = two_ints(args, "substr")?;
                let chars: Vec<char> = text.chars().collect();
                let start = clamp_index(start, chars.len());
                let end = (start + len.max(0) as usize).min(chars.len());
                Ok(Value::str(chars[start..end].iter().collect::<String>()))
            }
            "slice" => {
                let chars: Vec<char> = text.chars().collect();
                let (start, end) = slice_bounds(args, chars.len(), "slice")?;
                Ok(Value::str(chars[start..end].iter().collect::<String>()))
            }
            "split" => {
                let sep = one_str(args, "split")?;
                let parts: Vec<Value> = if sep.is_empty() {
                    text.chars().map(|c| Value::str(c.to_string())).collect()
                } else {
                    text.split(&sep).map(Value::str).collect()
                };
                Ok(Value::array(parts))
            }
            "trim" => {
                no_args(args, "trim")?;
                Ok(Value::str(text.trim().to_string()))
            }
            "replace" => {
                let (from, to) = two_strs(args, "replace")?;
                Ok(Value::str(text.replace(&from, &to)))
            }
            "find" => {
                let needle = one_str(args, "find")?;
                match text.find(&needle) {
                    // Byte offset → code-point index
                    Some(byte_idx) => Ok(Value::I32(text[..byte_idx].chars().count() as i32)),
                    None => Ok(Value::I32(-1)),
                }
            }
            "to_upper" => {
                no_args(args, "to_upper")?;
                Ok(Value::str(text.to_uppercase()))
            }
            "to_lower" => {
                no_args(args, "to_lower")?;
                Ok(Value::str(text.to_lowercase()))
            }
            "starts_with" => {
                let prefix = one_str(args, "starts_with")?;
                Ok(Value::Bool(text.starts_with(&prefix)))
            }
            "ends_with" => {
                let suffix = one_str(args, "ends_with")?;
                Ok(Value::Bool(text.ends_with(&suffix)))
            }
            "repeat" => {
                let n = one_int(args, "repeat")?;
                if n < 0 {
                    return Err("repeat count cannot be negative".to_string());
                }
                Ok(Value::str(text.repeat(n as usize)))
            }
            "bytes" => {
                no_args(args, "bytes")?;
                Ok(Value::Buffer(Arc::new(BufferPayload::from_bytes(
                    payload.bytes_snapshot(),
                ))))
            }
            "chars" => {
                no_args(args, "chars")?;
                Ok(Value::array(text.chars().map(Value::Rune).collect()))
            }
            _ => Err(format!("string has no method `{}`", name)),
        }
    }

    // ========================================================================
    // Array methods
    // ========================================================================

    fn array_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        line: u32,
    ) -> Value {
        let Value::Array(arr) = receiver else {
            unreachable!()
        };
        let arr = arr.clone();
        let result: Result<Value, String> = match name {
            "push" => one_arg(&args, "push").map(|value| {
                arr.push(value.clone());
                Value::I32(arr.len() as i32)
            }),
            "pop" => no_args(&args, "pop").map(|_| arr.pop().unwrap_or(Value::Null)),
            "shift" => no_args(&args, "shift").map(|_| arr.shift().unwrap_or(Value::Null)),
            "unshift" => one_arg(&args, "unshift").map(|value| {
                arr.unshift(value.clone());
                Value::I32(arr.len() as i32)
            }),
            "insert" => {
                if args.len() != 2 {
                    Err(format!(
                        "arity error: `insert` takes 2 arguments, got {}",
                        args.len()
                    ))
                } else {
                    int_index(&args[0]).and_then(|i| {
                        if i < 0 || !arr.insert(i as usize, args[1].clone()) {
                            Err(format!("index {} out of bounds (length {})", i, arr.len()))
                        } else {
                            Ok(Value::Null)
                        }
                    })
                }
            }
            "remove" => one_int(&args, "remove").and_then(|i| {
                if i < 0 {
                    return Err(format!("index {} out of bounds (length {})", i, arr.len()));
                }
                arr.remove(i as usize)
                    .ok_or_else(|| format!("index {} out of bounds (length {})", i, arr.len()))
            }),
            "slice" => {
                let items = arr.snapshot();
                slice_bounds(&args, items.len(), "slice")
                    .map(|(start, end)| Value::array(items[start..end].to_vec()))
            }
            "concat" => one_arg(&args, "concat").and_then(|other| match other {
                Value::Array(other) => {
                    let mut items = arr.snapshot();
                    items.extend(other.snapshot());
                    Ok(Value::array(items))
                }
                other => Err(format!(
                    "type error: `concat` expects an array, got `{}`",
                    other.type_name()
                )),
            }),
            "join" => one_str(&args, "join").map(|sep| {
                let rendered: Vec<String> = arr
                    .snapshot()
                    .iter()
                    .map(|item| item.display_string())
                    .collect();
                Value::str(rendered.join(&sep))
            }),
            "find" => one_arg(&args, "find").map(|needle| {
                match arr.snapshot().iter().position(|item| item.loose_eq(needle)) {
                    Some(index) => Value::I32(index as i32),
                    None => Value::I32(-1),
                }
            }),
            "reverse" => no_args(&args, "reverse").map(|_| {
                arr.reverse();
                receiver.clone()
            }),
            "map" => return self.array_map(&arr, args, line),
            "filter" => return self.array_filter(&arr, args, line),
            "reduce" => return self.array_reduce(&arr, args, line),
            "each" => return self.array_each(&arr, args, line),
            _ => Err(format!("array has no method `{}`", name)),
        };
        match result {
            Ok(value) => value,
            Err(message) => self.throw(format!("{} (line {})", message, line)),
        }
    }

    fn array_map(&mut self, arr: &Arc<ArrayPayload>, args: Vec<Value>, line: u32) -> Value {
        let Some(func) = single_callback(self, args, "map", line) else {
            return Value::Null;
        };
        let mut mapped = Vec::with_capacity(arr.len());
        for item in arr.snapshot() {
            let result = self.call_value(func.clone(), None, vec![item], line);
            if !self.ctx.flow.is_normal() {
                return Value::Null;
            }
            mapped.push(result);
        }
        Value::array(mapped)
    }

    fn array_filter(&mut self, arr: &Arc<ArrayPayload>, args: Vec<Value>, line: u32) -> Value {
        let Some(func) = single_callback(self, args, "filter", line) else {
            return Value::Null;
        };
        let mut kept = Vec::new();
        for item in arr.snapshot() {
            let verdict = self.call_value(func.clone(), None, vec![item.clone()], line);
            if !self.ctx.flow.is_normal() {
                return Value::Null;
            }
            if verdict.is_truthy() {
                kept.push(item);
            }
        }
        Value::array(kept)
    }

    fn array_reduce(&mut self, arr: &Arc<ArrayPayload>, args: Vec<Value>, line: u32) -> Value {
        if args.len() != 2 {
            return self.throw(format!(
                "arity error: `reduce` takes a function and an initial value (line {})",
                line
            ));
        }
        let mut args = args;
        let initial = args.pop().unwrap();
        let func = args.pop().unwrap();
        let mut acc = initial;
        for item in arr.snapshot() {
            acc = self.call_value(func.clone(), None, vec![acc, item], line);
            if !self.ctx.flow.is_normal() {
                return Value::Null;
            }
        }
        acc
    }

    fn array_each(&mut self, arr: &Arc<ArrayPayload>, args: Vec<Value>, line: u32) -> Value {
        let Some(func) = single_callback(self, args, "each", line) else {
            return Value::Null;
        };
        for item in arr.snapshot() {
            self.call_value(func.clone(), None, vec![item], line);
            if !self.ctx.flow.is_normal() {
                return Value::Null;
            }
        }
        Value::Null
    }
}

fn single_callback(
    interp: &mut Interp,
    mut args: Vec<Value>,
    name: &str,
    line: u32,
) -> Option<Value> {
    if args.len() != 1 {
        interp.throw(format!(
            "arity error: `{}` takes 1 argument, got {} (line {})",
            name,
            args.len(),
            line
        ));
        return None;
    }
    Some(args.pop().unwrap())
}

fn no_args(args: &[Value], name: &str) -> Result<(), String> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "arity error: `{}` takes no arguments, got {}",
            name,
            args.len()
        ))
    }
}

fn one_arg<'a>(args: &'a [Value], name: &str) -> Result<&'a Value, String> {
    if args.len() == 1 {
        Ok(&args[0])
    } else {
        Err(format!(
            "arity error: `{}` takes 1 argument, got {}",
            name,
            args.len()
        ))
    }
}

fn one_int(args: &[Value], name: &str) -> Result<i64, String> {
    one_arg(args, name).and_then(int_index)
}

fn one_str(args: &[Value], name: &str) -> Result<String, String> {
    match one_arg(args, name)? {
        Value::Str(s) => Ok(s.to_string_lossy()),
        other => Err(format!(
            "type error: `{}` expects a string, got `{}`",
            name,
            other.type_name()
        )),
    }
}

fn two_ints(args: &[Value], name: &str) -> Result<(i64, i64), String> {
    if args.len() != 2 {
        return Err(format!(
            "arity error: `{}` takes 2 arguments, got {}",
            name,
            args.len()
        ));
    }
    Ok((int_index(&args[0])?, int_index(&args[1])?))
}

fn two_strs(args: &[Value], name: &str) -> Result<(String, String), String> {
    if args.len() != 2 {
        return Err(format!(
            "arity error: `{}` takes 2 arguments, got {}",
            name,
            args.len()
        ));
    }
    match (&args[0], &args[1]) {
        (Value::Str(a), Value::Str(b)) => Ok((a.to_string_lossy(), b.to_string_lossy())),
        _ => Err(format!("type error: `{}` expects two strings", name)),
    }
}

fn clamp_index(index: i64, len: usize) -> usize {
    index.clamp(0, len as i64) as usize
}

/// `(start, end?)` bounds for slice-style methods: clamped, end defaults to
/// the length.
fn slice_bounds(args: &[Value], len: usize, name: &str) -> Result<(usize, usize), String> {
    let (start, end) = match args.len() {
        1 => (int_index(&args[0])?, len as i64),
        2 => (int_index(&args[0])?, int_index(&args[1])?),
        n => {
            return Err(format!(
                "arity error: `{}` takes 1 or 2 arguments, got {}",
                name, n
            ))
        }
    };
    let start = clamp_index(start, len);
    let end = clamp_index(end, len).max(start);
    Ok((start, end))
}

/// Bytes for file/socket writes: a string's UTF-8 bytes or a buffer's
/// contents.
fn writable_bytes(value: &Value) -> Result<Vec<u8>, String> {
    match value {
        Value::Str(s) => Ok(s.bytes_snapshot()),
        Value::Buffer(b) => Ok(b.snapshot()),
        other => Err(format!(
            "type error: expected a string or buffer, got `{}`",
            other.type_name()
        )),
    }
}
