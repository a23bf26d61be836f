//! Runtime error types.

use hemlock_engine::parser::ParseError;
use hemlock_engine::vm::VmError;

/// Errors that can occur during loading, bundling, or execution.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Syntax error
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Engine execution error (including uncaught exceptions)
    #[error("{0}")]
    Vm(#[from] VmError),

    /// Malformed or unsupported bundle container
    #[error("Bundle error: {0}")]
    Bundle(String),
}
