//! Tagged value union.
//!
//! A [`Value`] is either an inline primitive or a shared reference to a
//! heap payload. Heap payloads are reference counted through [`Arc`]: the
//! atomic strong count is the payload's reference count, a clone of the
//! `Value` is a retain, and a drop is a release. One owning slot (array
//! element, object field, environment binding, channel queue entry) holds
//! exactly one retain.

use crate::vm::builtins::BuiltinFunction;
use crate::vm::channel::ChannelObject;
use crate::vm::ffi::FfiFunction;
use crate::vm::object::{
    ArrayPayload, BufferPayload, FileHandle, FunctionPayload, ObjectPayload, SocketHandle,
    StrPayload,
};
use crate::vm::task::TaskObject;
use std::fmt;
use std::sync::Arc;

/// A Hemlock runtime value.
#[derive(Clone)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    /// A Unicode scalar value
    Rune(char),
    Null,
    Str(Arc<StrPayload>),
    Array(Arc<ArrayPayload>),
    Object(Arc<ObjectPayload>),
    Buffer(Arc<BufferPayload>),
    /// Unmanaged raw address; arithmetic adjusts by bytes
    Ptr(usize),
    File(Arc<FileHandle>),
    Socket(Arc<SocketHandle>),
    Function(Arc<FunctionPayload>),
    Channel(Arc<ChannelObject>),
    Task(Arc<TaskObject>),
    Builtin(Arc<BuiltinFunction>),
    FfiFn(Arc<FfiFunction>),
}

impl Value {
    /// Construct a string value from Rust text.
    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(Arc::new(StrPayload::new(text.into())))
    }

    /// Construct an array value from elements.
    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Arc::new(ArrayPayload::new(elements)))
    }

    /// The language-level type name, as reported by `typeof`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Bool(_) => "bool",
            Value::Rune(_) => "rune",
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Buffer(_) => "buffer",
            Value::Ptr(_) => "ptr",
            Value::File(_) => "file",
            Value::Socket(_) => "socket",
            Value::Function(_) => "function",
            Value::Channel(_) => "channel",
            Value::Task(_) => "task",
            Value::Builtin(_) => "builtin",
            Value::FfiFn(_) => "ffi",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value carries a numeric payload usable in arithmetic.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::I8(_)
                | Value::I16(_)
                | Value::I32(_)
                | Value::I64(_)
                | Value::U8(_)
                | Value::U16(_)
                | Value::U32(_)
                | Value::U64(_)
                | Value::F32(_)
                | Value::F64(_)
        )
    }

    /// Truthiness protocol for conditions: `null` and `false` are false,
    /// numbers by non-zero, strings by non-emptiness, `ptr` by non-null
    /// address, every other heap value is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::I8(n) => *n != 0,
            Value::I16(n) => *n != 0,
            Value::I32(n) => *n != 0,
            Value::I64(n) => *n != 0,
            Value::U8(n) => *n != 0,
            Value::U16(n) => *n != 0,
            Value::U32(n) => *n != 0,
            Value::U64(n) => *n != 0,
            Value::F32(f) => *f != 0.0,
            Value::F64(f) => *f != 0.0,
            Value::Rune(c) => *c != '\0',
            Value::Str(s) => s.byte_len() > 0,
            Value::Ptr(addr) => *addr != 0,
            _ => true,
        }
    }

    /// By-value equality for primitives (with numeric promotion across
    /// widths), code-point-sequence equality for strings and runes,
    /// reference equality for heap objects.
    pub fn loose_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Rune(a), Rune(b)) => a == b,
            (Str(a), Str(b)) => a.bytes_snapshot() == b.bytes_snapshot(),
            (Ptr(a), Ptr(b)) => a == b,
            (Array(a), Array(b)) => Arc::ptr_eq(a, b),
            (Object(a), Object(b)) => Arc::ptr_eq(a, b),
            (Buffer(a), Buffer(b)) => Arc::ptr_eq(a, b),
            (Function(a), Function(b)) => Arc::ptr_eq(a, b),
            (Channel(a), Channel(b)) => Arc::ptr_eq(a, b),
            (Task(a), Task(b)) => Arc::ptr_eq(a, b),
            (File(a), File(b)) => Arc::ptr_eq(a, b),
            (Socket(a), Socket(b)) => Arc::ptr_eq(a, b),
            (Builtin(a), Builtin(b)) => Arc::ptr_eq(a, b),
            (FfiFn(a), FfiFn(b)) => Arc::ptr_eq(a, b),
            _ => {
                if self.is_numeric() && other.is_numeric() {
                    crate::vm::numeric::numeric_eq(self, other)
                } else {
                    false
                }
            }
        }
    }

    /// The payload reference count, for heap variants.
    pub fn ref_count(&self) -> Option<usize> {
        match self {
            Value::Str(p) => Some(Arc::strong_count(p)),
            Value::Array(p) => Some(Arc::strong_count(p)),
            Value::Object(p) => Some(Arc::strong_count(p)),
            Value::Buffer(p) => Some(Arc::strong_count(p)),
            Value::Function(p) => Some(Arc::strong_count(p)),
            Value::Channel(p) => Some(Arc::strong_count(p)),
            Value::Task(p) => Some(Arc::strong_count(p)),
            Value::File(p) => Some(Arc::strong_count(p)),
            Value::Socket(p) => Some(Arc::strong_count(p)),
            _ => None,
        }
    }

    /// Recursive copy used for task-argument isolation.
    ///
    /// Strings, arrays, objects, and buffers clone recursively; channels,
    /// tasks, functions, files, and sockets share the payload; a raw `ptr`
    /// cannot cross a task boundary.
    pub fn deep_copy(&self) -> Result<Value, String> {
        match self {
            Value::Str(s) => Ok(Value::Str(Arc::new(s.clone_payload()))),
            Value::Buffer(b) => Ok(Value::Buffer(Arc::new(b.clone_payload()))),
            Value::Array(a) => {
                let items = a.snapshot();
                let mut copied = Vec::with_capacity(items.len());
                for item in items {
                    copied.push(item.deep_copy()?);
                }
                Ok(Value::Array(Arc::new(ArrayPayload::new(copied))))
            }
            Value::Object(o) => {
                let fields = o.snapshot();
                let copied = ObjectPayload::with_type(o.type_name());
                for (name, value) in fields {
                    copied.set(&name, value.deep_copy()?);
                }
                Ok(Value::Object(Arc::new(copied)))
            }
            Value::Ptr(_) => Err("cannot copy a raw ptr across a task boundary".to_string()),
            other => Ok(other.clone()),
        }
    }

    /// Render for diagnostics and `print`. Never mutates the value.
    pub fn display_string(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, false);
        out
    }

    fn render(&self, out: &mut String, quote_strings: bool) {
        use std::fmt::Write;
        match self {
            Value::I8(n) => write!(out, "{}", n).unwrap(),
            Value::I16(n) => write!(out, "{}", n).unwrap(),
            Value::I32(n) => write!(out, "{}", n).unwrap(),
            Value::I64(n) => write!(out, "{}", n).unwrap(),
            Value::U8(n) => write!(out, "{}", n).unwrap(),
            Value::U16(n) => write!(out, "{}", n).unwrap(),
            Value::U32(n) => write!(out, "{}", n).unwrap(),
            Value::U64(n) => write!(out, "{}", n).unwrap(),
            Value::F32(f) => write!(out, "{}", f).unwrap(),
            Value::F64(f) => write!(out, "{}", f).unwrap(),
            Value::Bool(b) => write!(out, "{}", b).unwrap(),
            Value::Rune(c) => out.push(*c),
            Value::Null => out.push_str("null"),
            Value::Str(s) => {
                if quote_strings {
                    write!(out, "{:?}", s.to_string_lossy()).unwrap();
                } else {
                    out.push_str(&s.to_string_lossy());
                }
            }
            Value::Array(a) => {
                out.push('[');
                for (i, item) in a.snapshot().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render(out, true);
                }
                out.push(']');
            }
            Value::Object(o) => {
                out.push_str("{ ");
                for (i, (name, value)) in o.snapshot().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write!(out, "{}: ", name).unwrap();
                    value.render(out, true);
                }
                out.push_str(" }");
            }
            Value::Buffer(b) => write!(out, "buffer({})", b.len()).unwrap(),
            Value::Ptr(addr) => write!(out, "ptr({:#x})", addr).unwrap(),
            Value::File(f) => write!(out, "file({})", f.path()).unwrap(),
            Value::Socket(s) => write!(out, "socket({})", s.describe()).unwrap(),
            Value::Function(f) => write!(out, "fn {}", f.name()).unwrap(),
            Value::Channel(c) => write!(out, "channel(cap={})", c.capacity()).unwrap(),
            Value::Task(_) => out.push_str("task"),
            Value::Builtin(b) => write!(out, "builtin {}", b.name).unwrap(),
            Value::FfiFn(f) => write!(out, "extern fn {}", f.name).unwrap(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.type_name(), self.display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::I32(1).type_name(), "i32");
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::str("x").type_name(), "string");
    }

    #[test]
    fn test_string_equality_is_by_content() {
        assert_eq!(Value::str("héllo"), Value::str("héllo"));
        assert_ne!(Value::str("a"), Value::str("b"));
    }

    #[test]
    fn test_array_equality_is_by_reference() {
        let a = Value::array(vec![Value::I32(1)]);
        let b = Value::array(vec![Value::I32(1)]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_numeric_equality_promotes() {
        assert_eq!(Value::I32(5), Value::U8(5));
        assert_eq!(Value::F64(2.0), Value::I32(2));
    }

    #[test]
    fn test_clone_is_retain() {
        let a = Value::array(vec![]);
        assert_eq!(a.ref_count(), Some(1));
        let b = a.clone();
        assert_eq!(a.ref_count(), Some(2));
        drop(b);
        assert_eq!(a.ref_count(), Some(1));
    }

    #[test]
    fn test_deep_copy_isolates_arrays() {
        let inner = Value::array(vec![Value::I32(1)]);
        let outer = Value::array(vec![inner.clone()]);
        let copy = outer.deep_copy().unwrap();
        match (&outer, &copy) {
            (Value::Array(a), Value::Array(b)) => {
                assert!(!Arc::ptr_eq(a, b));
                b.push(Value::I32(9));
                assert_eq!(a.len(), 1);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_deep_copy_rejects_ptr() {
        assert!(Value::Ptr(0x1000).deep_copy().is_err());
        let arr = Value::array(vec![Value::Ptr(0x1000)]);
        assert!(arr.deep_copy().is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::I32(0).is_truthy());
        assert!(Value::I32(-1).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::I32(42).display_string(), "42");
        assert_eq!(Value::str("hi").display_string(), "hi");
        let arr = Value::array(vec![Value::I32(1), Value::str("a")]);
        assert_eq!(arr.display_string(), "[1, \"a\"]");
    }
}
