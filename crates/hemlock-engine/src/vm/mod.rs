//! Hemlock interpreter runtime
//!
//! This module provides the interpreter core:
//! - Tagged value union with reference-counted heap payloads
//! - Lexical environments and the closure model
//! - Tree-walking evaluator with the exception / return / break / continue /
//!   defer control-flow protocol
//! - Task and bounded-channel concurrency runtime (one OS thread per task)
//! - Module loader with singleton caching and cycle detection
//! - Builtin registry and the thin FFI / JSON collaborators

pub mod builtins;
pub mod channel;
pub mod context;
pub mod env;
pub mod ffi;
pub mod interp;
pub mod json;
pub mod module;
pub mod numeric;
pub mod object;
pub mod task;
pub mod value;

pub use builtins::{BuiltinFn, BuiltinFunction, BuiltinRegistry};
pub use channel::ChannelObject;
pub use context::{CallFrame, DeferredCall, ExecutionContext, Flow, MAX_CALL_DEPTH};
pub use env::{BindingKind, EnvError, Environment};
pub use interp::{Interp, OutputSink, SharedState};
pub use module::{Module, ModuleCache, ModuleState};
pub use object::{
    ArrayPayload, BufferPayload, FileHandle, FunctionPayload, ObjectPayload, SocketHandle,
    StrPayload,
};
pub use task::TaskObject;
pub use value::Value;

use crate::parser::ParseError;

/// Engine-level errors: faults that occur outside the in-language exception
/// protocol (loading, parsing) or that escaped it (uncaught exceptions).
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Syntax error while parsing a script or module
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Module resolution, cycle, or export error
    #[error("Module error: {0}")]
    Module(String),

    /// An exception propagated out of the program uncaught.
    ///
    /// `rendered` is the thrown value's display form; `trace` holds the call
    /// stack, innermost frame first.
    #[error("Runtime error: {rendered}")]
    Uncaught {
        rendered: String,
        trace: Vec<String>,
    },
}

/// Interpreter result type
pub type VmResult<T> = Result<T, VmError>;
