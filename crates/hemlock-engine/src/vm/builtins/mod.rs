//! Builtin registry.
//!
//! A table of named host functions, populated during interpreter startup
//! and installed into the globals frame as const bindings. Builtins return
//! `Result<Value, Value>`; the `Err` value is raised through the exception
//! mechanism.

mod concurrency;
mod core;
mod io;
mod memory;
mod process;
mod serde;

pub use concurrency::spawn_task;

use crate::vm::env::{BindingKind, Environment};
use crate::vm::interp::Interp;
use crate::vm::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Host function signature. `Err` is the thrown value.
pub type BuiltinFn = fn(&mut Interp, Vec<Value>) -> Result<Value, Value>;

/// A named host function.
pub struct BuiltinFunction {
    pub name: String,
    pub func: BuiltinFn,
}

impl std::fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BuiltinFunction({})", self.name)
    }
}

/// Process-wide registry of builtins, guarded by its own lock.
pub struct BuiltinRegistry {
    map: RwLock<FxHashMap<String, Arc<BuiltinFunction>>>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(FxHashMap::default()),
        }
    }

    /// A registry populated with the full default set.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        core::register(&registry);
        memory::register(&registry);
        io::register(&registry);
        process::register(&registry);
        concurrency::register(&registry);
        serde::register(&registry);
        registry
    }

    /// Register a host function under a name.
    pub fn register(&self, name: &str, func: BuiltinFn) {
        self.map.write().insert(
            name.to_string(),
            Arc::new(BuiltinFunction {
                name: name.to_string(),
                func,
            }),
        );
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<BuiltinFunction>> {
        self.map.read().get(name).cloned()
    }

    pub fn count(&self) -> usize {
        self.map.read().len()
    }

    /// Define every builtin (and the signal-number constants) as const
    /// bindings in the given frame.
    pub fn install_into(&self, env: &Arc<Environment>) {
        for (name, func) in self.map.read().iter() {
            env.define(name, Value::Builtin(func.clone()), BindingKind::Const);
        }
        for (name, number) in process::SIGNAL_CONSTANTS.iter() {
            env.define(name, Value::I32(*number), BindingKind::Const);
        }
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for builtin error values.
pub(crate) fn error(message: impl Into<String>) -> Value {
    Value::str(message.into())
}

/// Arity guard shared by the builtin groups.
pub(crate) fn expect_arity(name: &str, args: &[Value], count: usize) -> Result<(), Value> {
    if args.len() == count {
        Ok(())
    } else {
        Err(error(format!(
            "arity error: `{}` takes {} arguments, got {}",
            name,
            count,
            args.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_registered() {
        let registry = BuiltinRegistry::with_defaults();
        for name in [
            "print", "typeof", "assert", "panic", "len", "alloc", "free", "realloc", "memset",
            "memcpy", "sizeof", "talloc", "buffer", "buffer_to_ptr", "open", "read_line",
            "eprint", "exec", "signal", "raise", "spawn", "join", "detach", "channel",
            "serialize", "deserialize", "callback", "callback_free", "sleep",
        ] {
            assert!(registry.lookup(name).is_some(), "missing builtin `{}`", name);
        }
    }

    #[test]
    fn test_install_defines_const_bindings() {
        let registry = BuiltinRegistry::with_defaults();
        let env = Environment::root();
        registry.install_into(&env);
        assert!(env.lookup("print").is_some());
        assert!(env.lookup("SIGINT").is_some());
        assert!(env.assign("print", Value::Null).is_err());
    }
}
