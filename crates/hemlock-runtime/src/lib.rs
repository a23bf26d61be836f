//! Hemlock runtime
//!
//! Binds the Hemlock engine into an embeddable surface:
//! - [`Session`] — persistent evaluation for the REPL
//! - script and bundle execution with uncaught-exception reporting
//! - the HMLC/HMLB bundle containers and the HMLP append-to-binary trailer

pub mod bundle;
pub mod error;
pub mod session;

pub use error::RuntimeError;
pub use session::Session;

use hemlock_engine::vm::{Interp, ModuleCache, OutputSink, SharedState};
use std::path::PathBuf;
use std::sync::Arc;

/// Options shared by the CLI entry points.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Narrate loading and execution steps to stderr
    pub verbose: bool,
    /// Override the bundled standard-library root
    pub stdlib_root: Option<PathBuf>,
}

/// Build the process-wide shared state for a run.
pub fn build_shared(options: &RuntimeOptions, args: Vec<String>) -> Arc<SharedState> {
    let stdlib_root = options
        .stdlib_root
        .clone()
        .or_else(ModuleCache::discover_stdlib_root);
    SharedState::new(
        ModuleCache::new(stdlib_root),
        OutputSink::Stdout,
        args,
    )
}

/// Run a script file to completion. Returns the process exit code.
pub fn run_script(path: &std::path::Path, options: &RuntimeOptions, args: Vec<String>) -> i32 {
    if options.verbose {
        eprintln!("hemlock: running {}", path.display());
    }
    let shared = build_shared(options, args);
    let mut interp = Interp::new(shared);
    match interp.run_file(path) {
        Ok(()) => 0,
        Err(error) => {
            report_failure(&error);
            1
        }
    }
}

/// Run a decoded bundle payload. Returns the process exit code.
pub fn run_bundle(payload: &[u8], options: &RuntimeOptions, args: Vec<String>) -> i32 {
    let program = match bundle::decode(payload) {
        Ok(program) => program,
        Err(error) => {
            eprintln!("{}", error);
            return 1;
        }
    };
    if options.verbose {
        eprintln!(
            "hemlock: executing embedded bundle ({} statements)",
            program.statements.len()
        );
    }
    let shared = build_shared(options, args);
    let mut interp = Interp::new(shared);
    let env = hemlock_engine::vm::Environment::child(&shared_globals(&interp));
    match interp.run_program(&program, &env) {
        Ok(_) => 0,
        Err(error) => {
            report_failure(&error);
            1
        }
    }
}

fn shared_globals(interp: &Interp) -> Arc<hemlock_engine::vm::Environment> {
    interp.shared.globals.clone()
}

/// Print a REPL eval failure without exiting the session.
pub fn report_repl_error(error: &RuntimeError) {
    match error {
        RuntimeError::Vm(vm) => report_failure(vm),
        other => eprintln!("{}", other),
    }
}

/// Print an engine failure: the rendered value, then the stack trace
/// innermost first.
pub fn report_failure(error: &hemlock_engine::vm::VmError) {
    use hemlock_engine::vm::VmError;
    match error {
        VmError::Uncaught { rendered, trace } => {
            eprintln!("Runtime error: {}", rendered);
            for frame in trace {
                eprintln!("{}", frame);
            }
        }
        other => eprintln!("{}", other),
    }
}
