//! Persistent evaluation session for the REPL.
//!
//! Unlike script execution, a session keeps one environment alive across
//! evals so declarations (let, const, fn, define, enum, import) persist
//! between inputs.

use crate::error::RuntimeError;
use crate::RuntimeOptions;
use hemlock_engine::parser::parse;
use hemlock_engine::vm::{Environment, Interp, Value};
use std::sync::Arc;

/// A persistent evaluation session.
pub struct Session {
    interp: Interp,
    env: Arc<Environment>,
}

impl Session {
    /// Create a session with a fresh root environment under the builtin
    /// globals.
    pub fn new(options: &RuntimeOptions) -> Self {
        let shared = crate::build_shared(options, Vec::new());
        let env = Environment::child(&shared.globals);
        Self {
            interp: Interp::new(shared),
            env,
        }
    }

    /// Evaluate code in this session. Declarations persist across calls;
    /// the value of the final expression statement is returned.
    pub fn eval(&mut self, code: &str) -> Result<Value, RuntimeError> {
        let program = parse(code)?;
        let value = self.interp.run_program(&program, &self.env)?;
        Ok(value)
    }

    /// Render a result value for display: strings quoted, everything else
    /// in its diagnostic form.
    pub fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Str(s) => format!("{:?}", s.to_string_lossy()),
            other => other.display_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(&RuntimeOptions::default())
    }

    #[test]
    fn test_declarations_persist() {
        let mut session = session();
        session.eval("let x = 40;").unwrap();
        session.eval("fn double(n) { return n * 2; }").unwrap();
        let value = session.eval("double(x) + 4;").unwrap();
        assert_eq!(value, Value::I32(84));
    }

    #[test]
    fn test_last_expression_value() {
        let mut session = session();
        let value = session.eval("1 + 2; 3 * 4;").unwrap();
        assert_eq!(value, Value::I32(12));
    }

    #[test]
    fn test_uncaught_exception_surfaces_as_error() {
        let mut session = session();
        assert!(session.eval("throw \"bad\";").is_err());
        // The session survives a failed eval.
        assert_eq!(session.eval("2;").unwrap(), Value::I32(2));
    }

    #[test]
    fn test_format_value() {
        let session = session();
        assert_eq!(session.format_value(&Value::I32(5)), "5");
        assert_eq!(session.format_value(&Value::str("hi")), "\"hi\"");
        assert_eq!(session.format_value(&Value::Null), "null");
    }

    #[test]
    fn test_parse_error_is_reported() {
        let mut session = session();
        assert!(matches!(
            session.eval("let = ;"),
            Err(RuntimeError::Parse(_))
        ));
    }
}
