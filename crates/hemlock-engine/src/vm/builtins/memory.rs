//! Raw memory builtins.
//!
//! These expose the C allocator and raw loads/stores. There is no safety
//! net: use-after-free, double-free, and wild pointers behave exactly as
//! they do in C. Buffers are the bounds-checked alternative.

use crate::vm::builtins::{error, expect_arity, BuiltinRegistry};
use crate::vm::interp::property::int_index;
use crate::vm::interp::Interp;
use crate::vm::object::BufferPayload;
use crate::vm::value::Value;
use std::sync::Arc;

pub fn register(registry: &BuiltinRegistry) {
    registry.register("alloc", alloc);
    registry.register("free", free);
    registry.register("realloc", realloc);
    registry.register("memset", memset);
    registry.register("memcpy", memcpy);
    registry.register("sizeof", sizeof);
    registry.register("talloc", talloc);
    registry.register("buffer", buffer);
    registry.register("buffer_to_ptr", buffer_to_ptr);
    register_ptr_accessors(registry);
}

fn expect_ptr(value: &Value, name: &str) -> Result<usize, Value> {
    match value {
        Value::Ptr(addr) => Ok(*addr),
        other => Err(error(format!(
            "type error: `{}` expects a ptr, got `{}`",
            name,
            other.type_name()
        ))),
    }
}

fn expect_size(value: &Value, name: &str) -> Result<usize, Value> {
    let n = int_index(value).map_err(error)?;
    if n < 0 {
        return Err(error(format!("`{}` size cannot be negative", name)));
    }
    Ok(n as usize)
}

/// `alloc(n)` — allocate `n` bytes from the C heap.
fn alloc(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("alloc", &args, 1)?;
    let size = expect_size(&args[0], "alloc")?;
    let addr = unsafe { libc::malloc(size) } as usize;
    if addr == 0 && size != 0 {
        return Err(error(format!("alloc of {} bytes failed", size)));
    }
    Ok(Value::Ptr(addr))
}

/// `free(p)` — return memory to the C heap. Double-free is the program's
/// problem.
fn free(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("free", &args, 1)?;
    let addr = expect_ptr(&args[0], "free")?;
    unsafe { libc::free(addr as *mut libc::c_void) };
    Ok(Value::Null)
}

/// `realloc(p, n)` — resize an allocation, returning the new address.
fn realloc(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("realloc", &args, 2)?;
    let addr = expect_ptr(&args[0], "realloc")?;
    let size = expect_size(&args[1], "realloc")?;
    let new_addr = unsafe { libc::realloc(addr as *mut libc::c_void, size) } as usize;
    if new_addr == 0 && size != 0 {
        return Err(error(format!("realloc to {} bytes failed", size)));
    }
    Ok(Value::Ptr(new_addr))
}

/// `memset(p, byte, n)`
fn memset(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("memset", &args, 3)?;
    let addr = expect_ptr(&args[0], "memset")?;
    let byte = int_index(&args[1]).map_err(error)?;
    let count = expect_size(&args[2], "memset")?;
    unsafe { libc::memset(addr as *mut libc::c_void, byte as i32, count) };
    Ok(Value::Null)
}

/// `memcpy(dst, src, n)`
fn memcpy(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("memcpy", &args, 3)?;
    let dst = expect_ptr(&args[0], "memcpy")?;
    let src = expect_ptr(&args[1], "memcpy")?;
    let count = expect_size(&args[2], "memcpy")?;
    unsafe {
        libc::memcpy(
            dst as *mut libc::c_void,
            src as *const libc::c_void,
            count,
        )
    };
    Ok(Value::Null)
}

fn type_size(name: &str) -> Option<usize> {
    Some(match name {
        "i8" | "u8" | "bool" => 1,
        "i16" | "u16" => 2,
        "i32" | "u32" | "f32" | "rune" => 4,
        "i64" | "u64" | "f64" => 8,
        "ptr" => std::mem::size_of::<usize>(),
        _ => return None,
    })
}

/// `sizeof("type")` — byte size of a primitive type.
fn sizeof(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("sizeof", &args, 1)?;
    let Value::Str(name) = &args[0] else {
        return Err(error("type error: `sizeof` expects a type name string"));
    };
    let name = name.to_string_lossy();
    match type_size(&name) {
        Some(size) => Ok(Value::I32(size as i32)),
        None => Err(error(format!("sizeof: unknown type `{}`", name))),
    }
}

/// `talloc("type", count)` — typed allocation: `count * sizeof(type)` bytes.
fn talloc(interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("talloc", &args, 2)?;
    let Value::Str(name) = &args[0] else {
        return Err(error("type error: `talloc` expects a type name string"));
    };
    let name = name.to_string_lossy();
    let Some(size) = type_size(&name) else {
        return Err(error(format!("talloc: unknown type `{}`", name)));
    };
    let count = expect_size(&args[1], "talloc")?;
    alloc(interp, vec![Value::I64((size * count) as i64)])
}

/// `buffer(n)` — a zeroed, bounds-checked byte region.
fn buffer(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("buffer", &args, 1)?;
    let size = expect_size(&args[0], "buffer")?;
    Ok(Value::Buffer(Arc::new(BufferPayload::new(size))))
}

/// `buffer_to_ptr(buf)` — raw address of the buffer's first byte. The
/// address dangles once the buffer is released.
fn buffer_to_ptr(_interp: &mut Interp, args: Vec<Value>) -> Result<Value, Value> {
    expect_arity("buffer_to_ptr", &args, 1)?;
    match &args[0] {
        Value::Buffer(b) => Ok(Value::Ptr(b.as_ptr_addr())),
        other => Err(error(format!(
            "type error: `buffer_to_ptr` expects a buffer, got `{}`",
            other.type_name()
        ))),
    }
}

/// Generate the `ptr_read_*` / `ptr_write_*` accessor family.
macro_rules! ptr_accessors {
    ($registry:expr, $( ($read:literal, $write:literal, $ty:ty, $wrap:path, $unwrap:path) ),+ $(,)?) => {
        $(
            $registry.register($read, |_interp, args| {
                expect_arity($read, &args, 1)?;
                let addr = expect_ptr(&args[0], $read)?;
                let value = unsafe { std::ptr::read_unaligned(addr as *const $ty) };
                Ok($wrap(value))
            });
            $registry.register($write, |_interp, args| {
                expect_arity($write, &args, 2)?;
                let addr = expect_ptr(&args[0], $write)?;
                let value = $unwrap(&args[1], $write)?;
                unsafe { std::ptr::write_unaligned(addr as *mut $ty, value) };
                Ok(Value::Null)
            });
        )+
    };
}

fn unwrap_int<T: TryFrom<i64>>(value: &Value, name: &str) -> Result<T, Value> {
    let wide = int_index(value).map_err(error)?;
    T::try_from(wide).map_err(|_| error(format!("`{}`: value {} out of range", name, wide)))
}

fn unwrap_f32(value: &Value, name: &str) -> Result<f32, Value> {
    unwrap_f64(value, name).map(|f| f as f32)
}

fn unwrap_f64(value: &Value, name: &str) -> Result<f64, Value> {
    match value {
        Value::F32(f) => Ok(*f as f64),
        Value::F64(f) => Ok(*f),
        other => int_index(other)
            .map(|n| n as f64)
            .map_err(|_| error(format!("`{}` expects a numeric value", name))),
    }
}

fn unwrap_addr(value: &Value, name: &str) -> Result<usize, Value> {
    expect_ptr(value, name)
}

fn wrap_ptr(addr: usize) -> Value {
    Value::Ptr(addr)
}

fn register_ptr_accessors(registry: &BuiltinRegistry) {
    ptr_accessors!(
        registry,
        ("ptr_read_i8", "ptr_write_i8", i8, Value::I8, unwrap_int),
        ("ptr_read_i16", "ptr_write_i16", i16, Value::I16, unwrap_int),
        ("ptr_read_i32", "ptr_write_i32", i32, Value::I32, unwrap_int),
        ("ptr_read_i64", "ptr_write_i64", i64, Value::I64, unwrap_int),
        ("ptr_read_u8", "ptr_write_u8", u8, Value::U8, unwrap_int),
        ("ptr_read_u16", "ptr_write_u16", u16, Value::U16, unwrap_int),
        ("ptr_read_u32", "ptr_write_u32", u32, Value::U32, unwrap_int),
        ("ptr_read_f32", "ptr_write_f32", f32, Value::F32, unwrap_f32),
        ("ptr_read_f64", "ptr_write_f64", f64, Value::F64, unwrap_f64),
        ("ptr_read_ptr", "ptr_write_ptr", usize, wrap_ptr, unwrap_addr),
    );
    // u64 separately: the write side narrows from the i64 intermediate.
    registry.register("ptr_read_u64", |_interp, args| {
        expect_arity("ptr_read_u64", &args, 1)?;
        let addr = expect_ptr(&args[0], "ptr_read_u64")?;
        let value = unsafe { std::ptr::read_unaligned(addr as *const u64) };
        Ok(Value::U64(value))
    });
    registry.register("ptr_write_u64", |_interp, args| {
        expect_arity("ptr_write_u64", &args, 2)?;
        let addr = expect_ptr(&args[0], "ptr_write_u64")?;
        let value = match &args[1] {
            Value::U64(n) => *n,
            other => unwrap_int::<u64>(other, "ptr_write_u64")?,
        };
        unsafe { std::ptr::write_unaligned(addr as *mut u64, value) };
        Ok(Value::Null)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::interp::{Interp, OutputSink, SharedState};
    use crate::vm::module::ModuleCache;

    fn test_interp() -> Interp {
        Interp::new(SharedState::new(
            ModuleCache::new(None),
            OutputSink::buffer(),
            vec![],
        ))
    }

    #[test]
    fn test_alloc_write_read_free() {
        let mut interp = test_interp();
        let ptr = alloc(&mut interp, vec![Value::I32(16)]).unwrap();
        let registry = BuiltinRegistry::with_defaults();
        let write = registry.lookup("ptr_write_i32").unwrap();
        let read = registry.lookup("ptr_read_i32").unwrap();
        (write.func)(&mut interp, vec![ptr.clone(), Value::I32(-77)]).unwrap();
        let value = (read.func)(&mut interp, vec![ptr.clone()]).unwrap();
        assert_eq!(value, Value::I32(-77));
        free(&mut interp, vec![ptr]).unwrap();
    }

    #[test]
    fn test_sizeof() {
        let mut interp = test_interp();
        assert_eq!(
            sizeof(&mut interp, vec![Value::str("i64")]).unwrap(),
            Value::I32(8)
        );
        assert!(sizeof(&mut interp, vec![Value::str("widget")]).is_err());
    }

    #[test]
    fn test_buffer_to_ptr_roundtrip() {
        let mut interp = test_interp();
        let buf = buffer(&mut interp, vec![Value::I32(4)]).unwrap();
        if let Value::Buffer(payload) = &buf {
            payload.set(0, 0xAB);
        }
        let ptr = buffer_to_ptr(&mut interp, vec![buf.clone()]).unwrap();
        let registry = BuiltinRegistry::with_defaults();
        let read = registry.lookup("ptr_read_u8").unwrap();
        assert_eq!(
            (read.func)(&mut interp, vec![ptr]).unwrap(),
            Value::U8(0xAB)
        );
    }
}
