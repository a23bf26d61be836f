//! Lexical environments and the closure model.
//!
//! A scope frame maps names to binding slots and points at its parent
//! frame. Frames are reference counted (`Arc`) because closures retain them
//! beyond the lexical lifetime of the enclosing call. Binding slots are
//! themselves shared (`Arc<RwLock<Value>>`) so that imported bindings alias
//! the exporting module's slot: mutations to an exported binding are
//! observed by every importer.

use crate::vm::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// How a name was bound, which controls assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// `let` — assignable
    Let,
    /// `const` — assignment fails
    Const,
    /// Bound by `import` — assignment fails regardless of the source
    /// declaration's mutability
    Imported,
}

/// A binding: a shared value cell plus the binding kind.
#[derive(Clone)]
pub struct Binding {
    cell: Arc<RwLock<Value>>,
    kind: BindingKind,
}

impl Binding {
    pub fn new(value: Value, kind: BindingKind) -> Self {
        Self {
            cell: Arc::new(RwLock::new(value)),
            kind,
        }
    }

    pub fn get(&self) -> Value {
        self.cell.read().clone()
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// The same cell under a different binding kind (import aliasing).
    pub fn alias(&self, kind: BindingKind) -> Binding {
        Binding {
            cell: self.cell.clone(),
            kind,
        }
    }
}

/// Errors from environment operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    Undefined(String),
    AssignToConst(String),
    AssignToImported(String),
}

impl EnvError {
    /// Render as a throwable message.
    pub fn message(&self) -> String {
        match self {
            EnvError::Undefined(name) => format!("undefined variable `{}`", name),
            EnvError::AssignToConst(name) => {
                format!("cannot assign to const binding `{}`", name)
            }
            EnvError::AssignToImported(name) => {
                format!("cannot assign to imported binding `{}`", name)
            }
        }
    }
}

/// A scope frame.
pub struct Environment {
    parent: Option<Arc<Environment>>,
    slots: RwLock<FxHashMap<String, Binding>>,
}

impl Environment {
    /// A root frame with no parent (the builtin globals frame).
    pub fn root() -> Arc<Environment> {
        Arc::new(Environment {
            parent: None,
            slots: RwLock::new(FxHashMap::default()),
        })
    }

    /// A child frame. The child retains its parent once.
    pub fn child(parent: &Arc<Environment>) -> Arc<Environment> {
        Arc::new(Environment {
            parent: Some(parent.clone()),
            slots: RwLock::new(FxHashMap::default()),
        })
    }

    /// Define a name in this frame. `let`/`const` always bind here, even if
    /// an outer frame already binds the name (shadowing).
    pub fn define(&self, name: &str, value: Value, kind: BindingKind) {
        self.slots
            .write()
            .insert(name.to_string(), Binding::new(value, kind));
    }

    /// Bind an existing slot in this frame (import aliasing, `self`).
    pub fn define_binding(&self, name: &str, binding: Binding) {
        self.slots.write().insert(name.to_string(), binding);
    }

    /// Assign to an existing name, mutating the innermost frame that binds
    /// it. Fails if the name is undefined or bound as const/imported.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), EnvError> {
        let mut env = self;
        loop {
            if let Some(binding) = env.slots.read().get(name) {
                return match binding.kind {
                    BindingKind::Let => {
                        *binding.cell.write() = value;
                        Ok(())
                    }
                    BindingKind::Const => Err(EnvError::AssignToConst(name.to_string())),
                    BindingKind::Imported => Err(EnvError::AssignToImported(name.to_string())),
                };
            }
            match &env.parent {
                Some(parent) => env = parent,
                None => return Err(EnvError::Undefined(name.to_string())),
            }
        }
    }

    /// Look a name up, walking parent frames. The returned value is a
    /// retain owned by the caller.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut env = self;
        loop {
            if let Some(binding) = env.slots.read().get(name) {
                return Some(binding.get());
            }
            match &env.parent {
                Some(parent) => env = parent,
                None => return None,
            }
        }
    }

    /// The binding slot for a name, for export tables and import aliasing.
    pub fn binding(&self, name: &str) -> Option<Binding> {
        let mut env = self;
        loop {
            if let Some(binding) = env.slots.read().get(name) {
                return Some(binding.clone());
            }
            match &env.parent {
                Some(parent) => env = parent,
                None => return None,
            }
        }
    }

    /// Whether this frame (not its parents) binds the name.
    pub fn has_local(&self, name: &str) -> bool {
        self.slots.read().contains_key(name)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Environment(locals={}, has_parent={})",
            self.slots.read().len(),
            self.parent.is_some()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_lookup() {
        let env = Environment::root();
        env.define("x", Value::I32(1), BindingKind::Let);
        assert_eq!(env.lookup("x"), Some(Value::I32(1)));
        assert_eq!(env.lookup("y"), None);
    }

    #[test]
    fn test_lookup_walks_parents() {
        let root = Environment::root();
        root.define("x", Value::I32(1), BindingKind::Let);
        let child = Environment::child(&root);
        assert_eq!(child.lookup("x"), Some(Value::I32(1)));
    }

    #[test]
    fn test_assign_mutates_innermost_binding_frame() {
        let root = Environment::root();
        root.define("x", Value::I32(1), BindingKind::Let);
        let child = Environment::child(&root);
        child.assign("x", Value::I32(2)).unwrap();
        assert_eq!(root.lookup("x"), Some(Value::I32(2)));
    }

    #[test]
    fn test_shadowing() {
        let root = Environment::root();
        root.define("x", Value::I32(1), BindingKind::Let);
        let child = Environment::child(&root);
        child.define("x", Value::I32(2), BindingKind::Let);
        assert_eq!(child.lookup("x"), Some(Value::I32(2)));
        assert_eq!(root.lookup("x"), Some(Value::I32(1)));
    }

    #[test]
    fn test_assign_to_const_fails() {
        let env = Environment::root();
        env.define("x", Value::I32(1), BindingKind::Const);
        assert_eq!(
            env.assign("x", Value::I32(2)),
            Err(EnvError::AssignToConst("x".to_string()))
        );
    }

    #[test]
    fn test_assign_to_imported_fails() {
        let env = Environment::root();
        env.define("x", Value::I32(1), BindingKind::Imported);
        assert_eq!(
            env.assign("x", Value::I32(2)),
            Err(EnvError::AssignToImported("x".to_string()))
        );
    }

    #[test]
    fn test_assign_undefined_fails() {
        let env = Environment::root();
        assert_eq!(
            env.assign("nope", Value::Null),
            Err(EnvError::Undefined("nope".to_string()))
        );
    }

    #[test]
    fn test_import_alias_shares_cell() {
        let exporter = Environment::root();
        exporter.define("count", Value::I32(0), BindingKind::Let);
        let importer = Environment::root();
        let binding = exporter.binding("count").unwrap();
        importer.define_binding("count", binding.alias(BindingKind::Imported));

        // Importer sees mutations made through the exporting module
        exporter.assign("count", Value::I32(5)).unwrap();
        assert_eq!(importer.lookup("count"), Some(Value::I32(5)));
        // ...but cannot assign through the imported binding
        assert!(importer.assign("count", Value::I32(9)).is_err());
    }
}
