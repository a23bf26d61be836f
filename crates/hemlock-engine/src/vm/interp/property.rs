//! Property and index protocols.
//!
//! Property reads dispatch on the receiver kind (intrinsic properties for
//! strings, buffers, arrays, files, sockets, channels, and tasks; field
//! lookup for objects). Indexing is bounds-checked for arrays and buffers,
//! code-point based for strings, and string-keyed for objects. Writes
//! accept integer bytes for string and buffer targets.

use crate::vm::interp::Interp;
use crate::vm::value::Value;

impl Interp {
    pub fn property_get(&mut self, receiver: &Value, name: &str, line: u32) -> Value {
        match self.property_get_inner(receiver, name) {
            Ok(value) => value,
            Err(message) => self.throw(format!("{} (line {})", message, line)),
        }
    }

    /// Optional-chain property read: a missing object field yields null
    /// instead of failing.
    pub fn property_get_optional(&mut self, receiver: &Value, name: &str, line: u32) -> Value {
        if let Value::Object(obj) = receiver {
            return obj.get(name).unwrap_or(Value::Null);
        }
        self.property_get(receiver, name, line)
    }

    fn property_get_inner(&mut self, receiver: &Value, name: &str) -> Result<Value, String> {
        match receiver {
            Value::Str(s) => match name {
                "length" => Ok(Value::I32(s.char_len() as i32)),
                "byte_length" => Ok(Value::I32(s.byte_len() as i32)),
                _ => Err(format!("string has no property `{}`", name)),
            },
            Value::Buffer(b) => match name {
                "length" => Ok(Value::I32(b.len() as i32)),
                "capacity" => Ok(Value::I32(b.capacity() as i32)),
                _ => Err(format!("buffer has no property `{}`", name)),
            },
            Value::Array(a) => match name {
                "length" => Ok(Value::I32(a.len() as i32)),
                _ => Err(format!("array has no property `{}`", name)),
            },
            Value::Object(obj) => obj
                .get(name)
                .ok_or_else(|| format!("missing field `{}` on object", name)),
            Value::File(f) => match name {
                "path" => Ok(Value::str(f.path())),
                "mode" => Ok(Value::str(f.mode())),
                "closed" => Ok(Value::Bool(f.is_closed())),
                "fd" => Ok(Value::I32(f.fd())),
                _ => Err(format!("file has no property `{}`", name)),
            },
            Value::Socket(s) => match name {
                "address" => Ok(Value::str(s.address())),
                "port" => Ok(Value::I32(s.port() as i32)),
                "closed" => Ok(Value::Bool(s.is_closed())),
                "fd" => Ok(Value::I32(s.fd())),
                _ => Err(format!("socket has no property `{}`", name)),
            },
            Value::Channel(c) => match name {
                "length" => Ok(Value::I32(c.length() as i32)),
                "capacity" => Ok(Value::I32(c.capacity() as i32)),
                "closed" => Ok(Value::Bool(c.is_closed())),
                _ => Err(format!("channel has no property `{}`", name)),
            },
            Value::Task(t) => match name {
                "done" => Ok(Value::Bool(t.is_done())),
                _ => Err(format!("task has no property `{}`", name)),
            },
            other => Err(format!(
                "type error: `{}` has no properties",
                other.type_name()
            )),
        }
    }

    pub fn property_set(&mut self, receiver: &Value, name: &str, value: Value, line: u32) -> Value {
        match receiver {
            Value::Object(obj) => {
                obj.set(name, value.clone());
                value
            }
            other => self.throw(format!(
                "type error: cannot assign property `{}` on `{}` (line {})",
                name,
                other.type_name(),
                line
            )),
        }
    }

    pub fn index_get(&mut self, receiver: &Value, index: &Value, line: u32) -> Value {
        match self.index_get_inner(receiver, index) {
            Ok(value) => value,
            Err(message) => self.throw(format!("{} (line {})", message, line)),
        }
    }

    fn index_get_inner(&mut self, receiver: &Value, index: &Value) -> Result<Value, String> {
        match receiver {
            Value::Array(arr) => {
                let i = int_index(index)?;
                let len = arr.len();
                arr.get(checked_index(i, len)?)
                    .ok_or_else(|| format!("index {} out of bounds (length {})", i, len))
            }
            Value::Str(s) => {
                let i = int_index(index)?;
                let len = s.char_len();
                let i = checked_index(i, len)?;
                s.char_at(i)
                    .map(Value::Rune)
                    .ok_or_else(|| format!("index {} out of bounds (length {})", i, len))
            }
            Value::Buffer(b) => {
                let i = int_index(index)?;
                let len = b.len();
                b.get(checked_index(i, len)?)
                    .map(Value::U8)
                    .ok_or_else(|| format!("index {} out of bounds (length {})", i, len))
            }
            Value::Object(obj) => {
                let key = string_key(index)?;
                obj.get(&key)
                    .ok_or_else(|| format!("missing field `{}` on object", key))
            }
            other => Err(format!(
                "type error: cannot index `{}`",
                other.type_name()
            )),
        }
    }

    pub fn index_set(
        &mut self,
        receiver: &Value,
        index: &Value,
        value: Value,
        line: u32,
    ) -> Value {
        match self.index_set_inner(receiver, index, value.clone()) {
            Ok(()) => value,
            Err(message) => self.throw(format!("{} (line {})", message, line)),
        }
    }

    fn index_set_inner(
        &mut self,
        receiver: &Value,
        index: &Value,
        value: Value,
    ) -> Result<(), String> {
        match receiver {
            Value::Array(arr) => {
                let i = int_index(index)?;
                let len = arr.len();
                let i = checked_index(i, len)?;
                if arr.set(i, value) {
                    Ok(())
                } else {
                    Err(format!("index {} out of bounds (length {})", i, len))
                }
            }
            Value::Str(s) => {
                let i = int_index(index)?;
                let byte = byte_value(&value)?;
                let len = s.byte_len();
                let i = checked_index(i, len)?;
                if s.set_byte(i, byte) {
                    Ok(())
                } else {
                    Err(format!("index {} out of bounds (byte length {})", i, len))
                }
            }
            Value::Buffer(b) => {
                let i = int_index(index)?;
                let byte = byte_value(&value)?;
                let len = b.len();
                let i = checked_index(i, len)?;
                if b.set(i, byte) {
                    Ok(())
                } else {
                    Err(format!("index {} out of bounds (length {})", i, len))
                }
            }
            Value::Object(obj) => {
                let key = string_key(index)?;
                obj.set(&key, value);
                Ok(())
            }
            other => Err(format!(
                "type error: cannot index-assign `{}`",
                other.type_name()
            )),
        }
    }
}

/// Coerce an index value to i64, rejecting floats and non-numerics.
pub(crate) fn int_index(value: &Value) -> Result<i64, String> {
    match value {
        Value::I8(n) => Ok(*n as i64),
        Value::I16(n) => Ok(*n as i64),
        Value::I32(n) => Ok(*n as i64),
        Value::I64(n) => Ok(*n),
        Value::U8(n) => Ok(*n as i64),
        Value::U16(n) => Ok(*n as i64),
        Value::U32(n) => Ok(*n as i64),
        Value::U64(n) => i64::try_from(*n).map_err(|_| "index too large".to_string()),
        other => Err(format!(
            "type error: index must be an integer, got `{}`",
            other.type_name()
        )),
    }
}

fn checked_index(index: i64, len: usize) -> Result<usize, String> {
    if index < 0 {
        return Err(format!("index {} out of bounds (length {})", index, len));
    }
    Ok(index as usize)
}

fn string_key(value: &Value) -> Result<String, String> {
    match value {
        Value::Str(s) => Ok(s.to_string_lossy()),
        other => Err(format!(
            "type error: object index must be a string, got `{}`",
            other.type_name()
        )),
    }
}

/// Integer byte for string/buffer writes (runes also accepted when they
/// fit a single byte).
fn byte_value(value: &Value) -> Result<u8, String> {
    let wide = match value {
        Value::Rune(c) => {
            let code = *c as u32;
            return u8::try_from(code).map_err(|_| {
                format!("rune U+{:04X} does not fit in a byte", code)
            });
        }
        other => int_index(other)?,
    };
    u8::try_from(wide).map_err(|_| format!("byte value {} out of range", wide))
}
