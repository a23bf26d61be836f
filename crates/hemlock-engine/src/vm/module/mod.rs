//! Module loader.
//!
//! A module is identified by its canonical absolute path. The process-wide
//! cache maps path → module record; each module is parsed once and executed
//! once. Loading is parse-time dependency discovery: `load` parses the
//! file, recursively loads every imported path (rejecting cycles via the
//! `Parsing` state), and leaves an ordered dependency list for depth-first
//! (topological) execution by the evaluator.

use crate::parser::ast::{Program, Stmt};
use crate::vm::env::{Binding, Environment};
use crate::vm::{VmError, VmResult};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle of a cached module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Being loaded; encountering it again during load is a cycle
    Parsing,
    /// Parsed, dependencies recorded, not yet executed
    Parsed,
    /// Top level has run; exports are final
    Executed,
}

/// A cached module record.
pub struct Module {
    path: PathBuf,
    state: Mutex<ModuleState>,
    ast: RwLock<Option<Arc<Program>>>,
    deps: RwLock<Vec<PathBuf>>,
    /// Export table in declaration order; bindings alias the module env's
    /// slots so importers observe mutations.
    exports: RwLock<Vec<(String, Binding)>>,
    env: RwLock<Option<Arc<Environment>>>,
}

impl Module {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(ModuleState::Parsing),
            ast: RwLock::new(None),
            deps: RwLock::new(Vec::new()),
            exports: RwLock::new(Vec::new()),
            env: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ModuleState {
        *self.state.lock()
    }

    pub fn is_executed(&self) -> bool {
        self.state() == ModuleState::Executed
    }

    pub fn mark_executed(&self) {
        *self.state.lock() = ModuleState::Executed;
    }

    pub fn ast(&self) -> Option<Arc<Program>> {
        self.ast.read().clone()
    }

    pub fn dependencies(&self) -> Vec<PathBuf> {
        self.deps.read().clone()
    }

    pub fn set_env(&self, env: Arc<Environment>) {
        *self.env.write() = Some(env);
    }

    pub fn env(&self) -> Option<Arc<Environment>> {
        self.env.read().clone()
    }

    /// Record an exported binding (keeps the last definition for a name).
    pub fn record_export(&self, name: &str, binding: Binding) {
        let mut exports = self.exports.write();
        match exports.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = binding,
            None => exports.push((name.to_string(), binding)),
        }
    }

    pub fn export_binding(&self, name: &str) -> Option<Binding> {
        self.exports
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.clone())
    }

    pub fn exports_snapshot(&self) -> Vec<(String, Binding)> {
        self.exports.read().clone()
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Module({}, {:?})", self.path.display(), self.state())
    }
}

/// Process-wide module cache, keyed by canonical absolute path.
pub struct ModuleCache {
    modules: DashMap<PathBuf, Arc<Module>>,
    stdlib_root: Option<PathBuf>,
}

impl ModuleCache {
    pub fn new(stdlib_root: Option<PathBuf>) -> Self {
        Self {
            modules: DashMap::new(),
            stdlib_root,
        }
    }

    /// Probe for a bundled standard library next to the interpreter binary
    /// and under the installation prefix.
    pub fn discover_stdlib_root() -> Option<PathBuf> {
        let exe = std::env::current_exe().ok()?;
        let exe_dir = exe.parent()?;
        let candidates = [
            exe_dir.join("stdlib"),
            exe_dir.join("../lib/hemlock/stdlib"),
            exe_dir.join("../share/hemlock/stdlib"),
        ];
        candidates.into_iter().find(|p| p.is_dir())
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Module>> {
        self.modules.get(path).map(|entry| entry.clone())
    }

    /// Resolve an import specifier to a canonical absolute path.
    ///
    /// Relative specifiers resolve against the importer's directory; the
    /// `@stdlib/` prefix resolves against the bundled stdlib root; an
    /// implicit `.hml` extension is added when missing.
    pub fn resolve(&self, spec: &str, importer_dir: Option<&Path>) -> VmResult<PathBuf> {
        let mut candidate = if let Some(rest) = spec.strip_prefix("@stdlib/") {
            match &self.stdlib_root {
                Some(root) => root.join(rest),
                None => {
                    return Err(VmError::Module(format!(
                        "unresolved import `{}`: no standard library root found",
                        spec
                    )))
                }
            }
        } else {
            let path = Path::new(spec);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                match importer_dir {
                    Some(dir) => dir.join(path),
                    None => std::env::current_dir()?.join(path),
                }
            }
        };
        if candidate.extension().is_none() {
            candidate.set_extension("hml");
        }
        candidate.canonicalize().map_err(|_| {
            VmError::Module(format!(
                "unresolved import `{}` (tried {})",
                spec,
                candidate.display()
            ))
        })
    }

    /// Load the entry script and its dependency graph.
    pub fn load_entry(&self, path: &Path) -> VmResult<Arc<Module>> {
        let canonical = path.canonicalize().map_err(|_| {
            VmError::Module(format!("cannot open script `{}`", path.display()))
        })?;
        self.load(canonical)
    }

    /// Load one module: read, parse, recursively load its imports (in
    /// source order), and mark it `Parsed`. Re-entering a module that is
    /// still `Parsing` is a circular dependency.
    pub fn load(&self, path: PathBuf) -> VmResult<Arc<Module>> {
        if let Some(existing) = self.get(&path) {
            return match existing.state() {
                ModuleState::Parsing => Err(VmError::Module(format!(
                    "circular dependency detected at `{}`",
                    path.display()
                ))),
                _ => Ok(existing),
            };
        }

        let source = std::fs::read_to_string(&path)?;
        let module = Arc::new(Module::new(path.clone()));
        self.modules.insert(path.clone(), module.clone());

        let program = match crate::parser::parse(&source) {
            Ok(program) => Arc::new(program),
            Err(error) => {
                self.modules.remove(&path);
                return Err(VmError::Module(format!(
                    "in `{}`: {}",
                    path.display(),
                    error
                )));
            }
        };

        let importer_dir = path.parent().map(|p| p.to_path_buf());
        let mut deps = Vec::new();
        for spec in imported_paths(&program) {
            let resolved = self.resolve(&spec, importer_dir.as_deref())?;
            self.load(resolved.clone())?;
            deps.push(resolved);
        }

        *module.ast.write() = Some(program);
        *module.deps.write() = deps;
        *module.state.lock() = ModuleState::Parsed;
        Ok(module)
    }
}

/// Import specifiers in source order (both `import` and `export from`).
fn imported_paths(program: &Program) -> Vec<String> {
    let mut paths = Vec::new();
    for stmt in &program.statements {
        match stmt {
            Stmt::Import { path, .. } | Stmt::ExportFrom { path, .. } => {
                if !paths.contains(path) {
                    paths.push(path.clone());
                }
            }
            _ => {}
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_module(dir: &Path, name: &str, source: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(source.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_single_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "main.hml", "let x = 1;");
        let cache = ModuleCache::new(None);
        let module = cache.load_entry(&path).unwrap();
        assert_eq!(module.state(), ModuleState::Parsed);
        assert!(module.dependencies().is_empty());
    }

    #[test]
    fn test_load_records_dependencies_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "a.hml", "export let a = 1;");
        write_module(dir.path(), "b.hml", "export let b = 2;");
        let main = write_module(
            dir.path(),
            "main.hml",
            "import { a } from \"./a\";\nimport { b } from \"./b\";",
        );
        let cache = ModuleCache::new(None);
        let module = cache.load_entry(&main).unwrap();
        let deps = module.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps[0].ends_with("a.hml"));
        assert!(deps[1].ends_with("b.hml"));
    }

    #[test]
    fn test_module_parsed_once() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "shared.hml", "export let s = 1;");
        write_module(dir.path(), "a.hml", "import { s } from \"./shared\";");
        let main = write_module(
            dir.path(),
            "main.hml",
            "import { s } from \"./shared\";\nimport { s as t } from \"./a\";",
        );
        // Diamond: main → shared, main → a → shared; one record for shared.
        let cache = ModuleCache::new(None);
        cache.load_entry(&main).unwrap();
        assert_eq!(cache.modules.len(), 3);
    }

    #[test]
    fn test_cycle_detection() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "a.hml", "import { b } from \"./b\";");
        write_module(dir.path(), "b.hml", "import { a } from \"./a\";");
        let main = write_module(dir.path(), "main.hml", "import { a } from \"./a\";");
        let cache = ModuleCache::new(None);
        let err = cache.load_entry(&main).unwrap_err();
        assert!(err.to_string().contains("circular dependency"));
    }

    #[test]
    fn test_unresolved_import() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_module(dir.path(), "main.hml", "import { x } from \"./missing\";");
        let cache = ModuleCache::new(None);
        let err = cache.load_entry(&main).unwrap_err();
        assert!(err.to_string().contains("unresolved import"));
    }

    #[test]
    fn test_parse_error_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let main = write_module(dir.path(), "main.hml", "let = ;");
        let cache = ModuleCache::new(None);
        let err = cache.load_entry(&main).unwrap_err();
        assert!(err.to_string().contains("main.hml"));
    }

    #[test]
    fn test_implicit_extension() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "util.hml", "export let u = 1;");
        let cache = ModuleCache::new(None);
        let resolved = cache.resolve("./util", Some(dir.path())).unwrap();
        assert!(resolved.ends_with("util.hml"));
    }
}
