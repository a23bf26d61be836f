//! Foreign function interface.
//!
//! `extern fn` declarations resolve a symbol out of a shared library via
//! `dlopen`/`dlsym` and wrap it as a callable value. Marshalling covers the
//! primitive type set: integer/pointer/string signatures go through
//! word-sized registers, float signatures through `f64` registers; the two
//! classes cannot be mixed in one signature. Callback registration hands
//! out stable handles through a registry guarded by its own lock.

use crate::parser::ast::TypeAnn;
use crate::vm::object::FunctionPayload;
use crate::vm::value::Value;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Maximum number of marshalled arguments.
const MAX_FFI_ARGS: usize = 8;
const MAX_FFI_FLOAT_ARGS: usize = 4;

/// A resolved native symbol with its declared signature.
pub struct FfiFunction {
    pub name: String,
    pub params: Vec<TypeAnn>,
    pub return_ty: TypeAnn,
    pub library: String,
    symbol: usize,
}

impl std::fmt::Debug for FfiFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FfiFunction({} from {})", self.name, self.library)
    }
}

/// Cache of opened library handles, keyed by path.
static LIBRARIES: Lazy<DashMap<String, usize>> = Lazy::new(DashMap::new);

/// Resolve `name` in `library` with the declared signature.
#[cfg(unix)]
pub fn load_extern_fn(
    name: &str,
    params: &[(String, TypeAnn)],
    return_ty: &TypeAnn,
    library: &str,
) -> Result<FfiFunction, String> {
    let handle = match LIBRARIES.get(library) {
        Some(handle) => *handle,
        None => {
            let c_path = CString::new(library)
                .map_err(|_| format!("invalid library path `{}`", library))?;
            let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) } as usize;
            if handle == 0 {
                return Err(format!("cannot load library `{}`", library));
            }
            LIBRARIES.insert(library.to_string(), handle);
            handle
        }
    };
    let c_name =
        CString::new(name).map_err(|_| format!("invalid symbol name `{}`", name))?;
    let symbol = unsafe { libc::dlsym(handle as *mut libc::c_void, c_name.as_ptr()) } as usize;
    if symbol == 0 {
        return Err(format!("symbol `{}` not found in `{}`", name, library));
    }
    Ok(FfiFunction {
        name: name.to_string(),
        params: params.iter().map(|(_, ty)| ty.clone()).collect(),
        return_ty: return_ty.clone(),
        library: library.to_string(),
        symbol,
    })
}

#[cfg(not(unix))]
pub fn load_extern_fn(
    name: &str,
    _params: &[(String, TypeAnn)],
    _return_ty: &TypeAnn,
    _library: &str,
) -> Result<FfiFunction, String> {
    Err(format!(
        "extern fn `{}` is not supported on this platform",
        name
    ))
}

fn is_float(ty: &TypeAnn) -> bool {
    matches!(ty, TypeAnn::F32 | TypeAnn::F64)
}

fn is_word(ty: &TypeAnn) -> bool {
    matches!(
        ty,
        TypeAnn::I8
            | TypeAnn::I16
            | TypeAnn::I32
            | TypeAnn::I64
            | TypeAnn::U8
            | TypeAnn::U16
            | TypeAnn::U32
            | TypeAnn::U64
            | TypeAnn::Bool
            | TypeAnn::Ptr
            | TypeAnn::Str
    )
}

/// Invoke a resolved native symbol with marshalled values.
pub fn call_ffi(func: &FfiFunction, args: &[Value]) -> Result<Value, String> {
    if args.len() != func.params.len() {
        return Err(format!(
            "arity error: `{}` takes {} arguments, got {}",
            func.name,
            func.params.len(),
            args.len()
        ));
    }

    let void_ret = matches!(func.return_ty, TypeAnn::Any);
    let float_signature = func.params.iter().any(is_float) || is_float(&func.return_ty);
    if float_signature {
        if !func.params.iter().all(is_float) || !(is_float(&func.return_ty) || void_ret) {
            return Err(format!(
                "unsupported signature for `{}`: cannot mix float and word arguments",
                func.name
            ));
        }
        if args.len() > MAX_FFI_FLOAT_ARGS {
            return Err(format!(
                "too many float arguments for `{}` (max {})",
                func.name, MAX_FFI_FLOAT_ARGS
            ));
        }
        let mut slots = [0f64; MAX_FFI_FLOAT_ARGS];
        for (i, value) in args.iter().enumerate() {
            slots[i] = marshal_float(value)?;
        }
        let result = unsafe { call_float(func.symbol, &slots[..args.len()]) };
        return Ok(match func.return_ty {
            TypeAnn::F32 => Value::F32(result as f32),
            _ => Value::F64(result),
        });
    }

    if !func.params.iter().all(is_word) || !(is_word(&func.return_ty) || void_ret) {
        return Err(format!("unsupported signature for `{}`", func.name));
    }
    if args.len() > MAX_FFI_ARGS {
        return Err(format!(
            "too many arguments for `{}` (max {})",
            func.name, MAX_FFI_ARGS
        ));
    }
    // CStrings created for string arguments must outlive the call.
    let mut owned_strings = Vec::new();
    let mut slots = [0u64; MAX_FFI_ARGS];
    for (i, value) in args.iter().enumerate() {
        slots[i] = marshal_word(value, &mut owned_strings)?;
    }
    let result = unsafe { call_word(func.symbol, &slots[..args.len()]) };
    drop(owned_strings);
    unmarshal_word(result, &func.return_ty)
}

fn marshal_word(value: &Value, owned: &mut Vec<CString>) -> Result<u64, String> {
    Ok(match value {
        Value::I8(n) => *n as i64 as u64,
        Value::I16(n) => *n as i64 as u64,
        Value::I32(n) => *n as i64 as u64,
        Value::I64(n) => *n as u64,
        Value::U8(n) => *n as u64,
        Value::U16(n) => *n as u64,
        Value::U32(n) => *n as u64,
        Value::U64(n) => *n,
        Value::Bool(b) => *b as u64,
        Value::Ptr(addr) => *addr as u64,
        Value::Null => 0,
        Value::Str(s) => {
            let c_string = CString::new(s.to_string_lossy())
                .map_err(|_| "string argument contains a NUL byte".to_string())?;
            let addr = c_string.as_ptr() as u64;
            owned.push(c_string);
            addr
        }
        other => {
            return Err(format!(
                "cannot marshal `{}` across the FFI boundary",
                other.type_name()
            ))
        }
    })
}

fn marshal_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::F32(f) => Ok(*f as f64),
        Value::F64(f) => Ok(*f),
        Value::I32(n) => Ok(*n as f64),
        Value::I64(n) => Ok(*n as f64),
        other => Err(format!(
            "cannot marshal `{}` as a float argument",
            other.type_name()
        )),
    }
}

fn unmarshal_word(raw: u64, ty: &TypeAnn) -> Result<Value, String> {
    Ok(match ty {
        TypeAnn::I8 => Value::I8(raw as i8),
        TypeAnn::I16 => Value::I16(raw as i16),
        TypeAnn::I32 => Value::I32(raw as i32),
        TypeAnn::I64 => Value::I64(raw as i64),
        TypeAnn::U8 => Value::U8(raw as u8),
        TypeAnn::U16 => Value::U16(raw as u16),
        TypeAnn::U32 => Value::U32(raw as u32),
        TypeAnn::U64 => Value::U64(raw),
        TypeAnn::Bool => Value::Bool(raw != 0),
        TypeAnn::Ptr => Value::Ptr(raw as usize),
        TypeAnn::Any => Value::Null,
        TypeAnn::Str => {
            if raw == 0 {
                Value::Null
            } else {
                let text = unsafe { std::ffi::CStr::from_ptr(raw as *const libc::c_char) }
                    .to_string_lossy()
                    .into_owned();
                Value::str(text)
            }
        }
        other => return Err(format!("unsupported FFI return type `{}`", other.name())),
    })
}

/// Call through a word-register signature with up to 8 arguments.
unsafe fn call_word(symbol: usize, args: &[u64]) -> u64 {
    type F0 = extern "C" fn() -> u64;
    type F1 = extern "C" fn(u64) -> u64;
    type F2 = extern "C" fn(u64, u64) -> u64;
    type F3 = extern "C" fn(u64, u64, u64) -> u64;
    type F4 = extern "C" fn(u64, u64, u64, u64) -> u64;
    type F5 = extern "C" fn(u64, u64, u64, u64, u64) -> u64;
    type F6 = extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64;
    type F7 = extern "C" fn(u64, u64, u64, u64, u64, u64, u64) -> u64;
    type F8 = extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64) -> u64;
    let a = args;
    match a.len() {
        0 => std::mem::transmute::<usize, F0>(symbol)(),
        1 => std::mem::transmute::<usize, F1>(symbol)(a[0]),
        2 => std::mem::transmute::<usize, F2>(symbol)(a[0], a[1]),
        3 => std::mem::transmute::<usize, F3>(symbol)(a[0], a[1], a[2]),
        4 => std::mem::transmute::<usize, F4>(symbol)(a[0], a[1], a[2], a[3]),
        5 => std::mem::transmute::<usize, F5>(symbol)(a[0], a[1], a[2], a[3], a[4]),
        6 => std::mem::transmute::<usize, F6>(symbol)(a[0], a[1], a[2], a[3], a[4], a[5]),
        7 => std::mem::transmute::<usize, F7>(symbol)(a[0], a[1], a[2], a[3], a[4], a[5], a[6]),
        _ => std::mem::transmute::<usize, F8>(symbol)(
            a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7],
        ),
    }
}

/// Call through a float-register signature with up to 4 arguments.
unsafe fn call_float(symbol: usize, args: &[f64]) -> f64 {
    type F0 = extern "C" fn() -> f64;
    type F1 = extern "C" fn(f64) -> f64;
    type F2 = extern "C" fn(f64, f64) -> f64;
    type F3 = extern "C" fn(f64, f64, f64) -> f64;
    type F4 = extern "C" fn(f64, f64, f64, f64) -> f64;
    let a = args;
    match a.len() {
        0 => std::mem::transmute::<usize, F0>(symbol)(),
        1 => std::mem::transmute::<usize, F1>(symbol)(a[0]),
        2 => std::mem::transmute::<usize, F2>(symbol)(a[0], a[1]),
        3 => std::mem::transmute::<usize, F3>(symbol)(a[0], a[1], a[2]),
        _ => std::mem::transmute::<usize, F4>(symbol)(a[0], a[1], a[2], a[3]),
    }
}

// ============================================================================
// Callback registry
// ============================================================================

/// Live callback registrations, keyed by handle.
static CALLBACKS: Lazy<DashMap<usize, Arc<FunctionPayload>>> = Lazy::new(DashMap::new);
static NEXT_CALLBACK_ID: AtomicUsize = AtomicUsize::new(1);

/// Register a script function for native code to call back into. Returns a
/// stable handle (surfaced to the program as a `ptr`).
pub fn register_callback(func: Arc<FunctionPayload>) -> usize {
    let id = NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
    CALLBACKS.insert(id, func);
    id
}

/// Release a callback registration. Idempotent.
pub fn free_callback(id: usize) -> bool {
    CALLBACKS.remove(&id).is_some()
}

/// Look up a registered callback (used by the invocation bridge).
pub fn callback_function(id: usize) -> Option<Arc<FunctionPayload>> {
    CALLBACKS.get(&id).map(|entry| entry.clone())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_call_libm() {
        let func = load_extern_fn(
            "fabs",
            &[("x".to_string(), TypeAnn::F64)],
            &TypeAnn::F64,
            "libm.so.6",
        );
        // Skip silently when libm is not present at this exact soname.
        let Ok(func) = func else { return };
        let result = call_ffi(&func, &[Value::F64(-3.5)]).unwrap();
        assert_eq!(result, Value::F64(3.5));
    }

    #[test]
    fn test_mixed_signature_rejected() {
        let func = FfiFunction {
            name: "mixed".to_string(),
            params: vec![TypeAnn::F64, TypeAnn::I32],
            return_ty: TypeAnn::F64,
            library: "test".to_string(),
            symbol: 0x1,
        };
        assert!(call_ffi(&func, &[Value::F64(1.0), Value::I32(1)]).is_err());
    }

    #[test]
    fn test_callback_registry() {
        use crate::parser::ast::FunctionLit;
        use crate::vm::env::Environment;
        let func = Arc::new(FunctionPayload::new(
            Arc::new(FunctionLit {
                is_async: false,
                params: vec![],
                return_ty: None,
                body: vec![],
                name: "cb".to_string(),
            }),
            Environment::root(),
        ));
        let id = register_callback(func);
        assert!(callback_function(id).is_some());
        assert!(free_callback(id));
        assert!(!free_callback(id));
    }
}
