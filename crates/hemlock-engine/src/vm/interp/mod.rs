//! Tree-walking evaluator.
//!
//! [`Interp`] owns the per-thread [`ExecutionContext`] and a handle to the
//! process-wide [`SharedState`] (builtin registry, module cache, output
//! sink). Statement execution lives here; expression evaluation, the call
//! protocol, property/index dispatch, receiver method tables, and
//! annotation conversion live in the sibling modules.

mod call;
mod convert;
mod expr;
mod methods;
pub(crate) mod property;

pub use convert::DefineType;

use crate::parser::ast::*;
use crate::vm::builtins::BuiltinRegistry;
use crate::vm::context::{DeferredCall, ExecutionContext, Flow};
use crate::vm::env::{BindingKind, Environment};
use crate::vm::ffi;
use crate::vm::module::{Module, ModuleCache};
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Where `print` output goes. Tests inject a buffer; the CLI uses stdout.
#[derive(Clone)]
pub enum OutputSink {
    Stdout,
    Buffer(Arc<Mutex<Vec<u8>>>),
}

impl OutputSink {
    pub fn buffer() -> OutputSink {
        OutputSink::Buffer(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn write_line(&self, text: &str) {
        match self {
            OutputSink::Stdout => println!("{}", text),
            OutputSink::Buffer(buf) => {
                let mut buf = buf.lock();
                buf.extend_from_slice(text.as_bytes());
                buf.push(b'\n');
            }
        }
    }

    /// Captured output, for the buffer variant.
    pub fn contents(&self) -> Option<String> {
        match self {
            OutputSink::Stdout => None,
            OutputSink::Buffer(buf) => Some(String::from_utf8_lossy(&buf.lock()).into_owned()),
        }
    }
}

/// Process-wide interpreter state, shared across tasks.
///
/// Constructed once at startup and handed to every task's evaluator; the
/// registries inside carry their own locks.
pub struct SharedState {
    pub builtins: BuiltinRegistry,
    pub modules: ModuleCache,
    pub output: OutputSink,
    /// Command-line strings; `args[0]` is the script path, empty in the REPL
    pub args: Vec<String>,
    /// Nominal types registered by `define`
    pub types: RwLock<FxHashMap<String, Arc<DefineType>>>,
    /// The globals frame holding builtin bindings; parent of every module env
    pub globals: Arc<Environment>,
}

impl SharedState {
    /// Build the shared state: populate the builtin registry and seed the
    /// globals frame with builtins, signal constants, and `args`.
    pub fn new(modules: ModuleCache, output: OutputSink, args: Vec<String>) -> Arc<SharedState> {
        let builtins = BuiltinRegistry::with_defaults();
        let globals = Environment::root();
        builtins.install_into(&globals);
        let args_value = Value::array(args.iter().map(|arg| Value::str(arg.clone())).collect());
        globals.define("args", args_value, BindingKind::Const);
        Arc::new(SharedState {
            builtins,
            modules,
            output,
            args,
            types: RwLock::new(FxHashMap::default()),
            globals,
        })
    }
}

/// The tree-walking evaluator for one thread of execution.
pub struct Interp {
    pub shared: Arc<SharedState>,
    pub ctx: ExecutionContext,
    /// The module whose top level is executing, for `export` recording
    pub current_module: Option<Arc<Module>>,
}

impl Interp {
    pub fn new(shared: Arc<SharedState>) -> Self {
        Self {
            shared,
            ctx: ExecutionContext::new(),
            current_module: None,
        }
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Load and run a script file as the entry module, executing its
    /// dependency graph first.
    pub fn run_file(&mut self, path: &std::path::Path) -> VmResult<()> {
        let module = self.shared.modules.load_entry(path)?;
        self.execute_module(&module)
    }

    /// Parse and run source text in a fresh environment under the globals
    /// frame. Returns the value of the final expression statement, which the
    /// REPL displays.
    pub fn run_source(&mut self, source: &str) -> VmResult<Value> {
        let program = crate::parser::parse(source)?;
        let env = Environment::child(&self.shared.globals);
        self.run_program(&program, &env)
    }

    /// Execute a parsed program in the given environment.
    pub fn run_program(&mut self, program: &Program, env: &Arc<Environment>) -> VmResult<Value> {
        let defer_base = self.ctx.defer_stack.len();
        let mut last = Value::Null;
        for stmt in &program.statements {
            if let Stmt::Expression { expr, .. } = stmt {
                last = self.eval_expr(expr, env);
            } else {
                self.exec_stmt(stmt, env);
            }
            if !self.ctx.flow.is_normal() {
                break;
            }
        }
        self.run_defers(defer_base);
        match std::mem::take(&mut self.ctx.flow) {
            Flow::Throw(value) => Err(self.uncaught(value)),
            _ => Ok(last),
        }
    }

    /// Execute a loaded module: dependencies first (depth-first, giving
    /// topological order), then its own top level in a fresh environment
    /// whose parent is the globals frame.
    pub fn execute_module(&mut self, module: &Arc<Module>) -> VmResult<()> {
        if module.is_executed() {
            return Ok(());
        }
        for dep in module.dependencies() {
            let dep_module = self.shared.modules.get(&dep).ok_or_else(|| {
                VmError::Module(format!("dependency `{}` not loaded", dep.display()))
            })?;
            self.execute_module(&dep_module)?;
        }
        let env = Environment::child(&self.shared.globals);
        module.set_env(env.clone());
        let program = module.ast().ok_or_else(|| {
            VmError::Module(format!("module `{}` has no parsed body", module.path().display()))
        })?;

        let previous = self.current_module.replace(module.clone());
        let result = self.run_program(&program, &env);
        self.current_module = previous;
        result?;
        module.mark_executed();
        Ok(())
    }

    /// Convert an in-flight exception into the engine-level uncaught error.
    fn uncaught(&mut self, value: Value) -> VmError {
        let trace = self.ctx.stack_trace();
        self.ctx.call_stack.clear();
        VmError::Uncaught {
            rendered: value.display_string(),
            trace,
        }
    }

    // ========================================================================
    // Control-flow helpers
    // ========================================================================

    /// Raise a string exception. Returns `Value::Null` so call sites can
    /// `return self.throw(...)` from expression evaluation.
    pub fn throw(&mut self, message: impl Into<String>) -> Value {
        self.ctx.flow = Flow::Throw(Value::str(message.into()));
        Value::Null
    }

    /// Raise an arbitrary value as an exception.
    pub fn throw_value(&mut self, value: Value) -> Value {
        self.ctx.flow = Flow::Throw(value);
        Value::Null
    }

    /// Pop and run deferred calls down to `base`, LIFO. An exception raised
    /// inside a defer replaces the active exception.
    pub fn run_defers(&mut self, base: usize) {
        let mut exit_flow = std::mem::take(&mut self.ctx.flow);
        while self.ctx.defer_stack.len() > base {
            let deferred = self.ctx.defer_stack.pop().unwrap();
            self.eval_expr(&deferred.call, &deferred.env);
            match std::mem::take(&mut self.ctx.flow) {
                Flow::Throw(value) => exit_flow = Flow::Throw(value),
                _ => {}
            }
        }
        self.ctx.flow = exit_flow;
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub fn exec_block(&mut self, stmts: &[Stmt], env: &Arc<Environment>) {
        for stmt in stmts {
            self.exec_stmt(stmt, env);
            if !self.ctx.flow.is_normal() {
                return;
            }
        }
    }

    /// Execute `stmts` in a fresh child scope.
    fn exec_scoped_block(&mut self, stmts: &[Stmt], env: &Arc<Environment>) {
        let scope = Environment::child(env);
        self.exec_block(stmts, &scope);
    }

    pub fn exec_stmt(&mut self, stmt: &Stmt, env: &Arc<Environment>) {
        match stmt {
            Stmt::Let {
                name,
                ty,
                init,
                is_const,
                line,
            } => self.exec_let(name, ty.as_ref(), init.as_ref(), *is_const, *line, env),
            Stmt::Expression { expr, .. } => {
                self.eval_expr(expr, env);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                let cond_value = self.eval_expr(cond, env);
                if !self.ctx.flow.is_normal() {
                    return;
                }
                if cond_value.is_truthy() {
                    self.exec_scoped_block(then_block, env);
                } else if let Some(else_block) = else_block {
                    self.exec_scoped_block(else_block, env);
                }
            }
            Stmt::While { cond, body, .. } => self.exec_while(cond, body, env),
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => self.exec_for(init.as_deref(), cond.as_ref(), step.as_ref(), body, env),
            Stmt::ForIn {
                first,
                second,
                iterable,
                body,
                line,
            } => self.exec_for_in(first, second.as_deref(), iterable, body, *line, env),
            Stmt::Break { .. } => self.ctx.flow = Flow::Break,
            Stmt::Continue { .. } => self.ctx.flow = Flow::Continue,
            Stmt::Return { value, .. } => {
                let result = match value {
                    Some(expr) => self.eval_expr(expr, env),
                    None => Value::Null,
                };
                if self.ctx.flow.is_normal() {
                    self.ctx.flow = Flow::Return(result);
                }
            }
            Stmt::Block { body, .. } => self.exec_scoped_block(body, env),
            Stmt::DefineObject { name, fields, .. } => {
                let def = Arc::new(DefineType {
                    name: name.clone(),
                    fields: fields.clone(),
                    env: env.clone(),
                });
                self.shared.types.write().insert(name.clone(), def);
            }
            Stmt::Enum { name, variants, .. } => self.exec_enum(name, variants, env),
            Stmt::Try {
                try_block,
                catch_name,
                catch_block,
                finally_block,
                ..
            } => self.exec_try(
                try_block,
                catch_name.as_deref(),
                catch_block.as_deref(),
                finally_block.as_deref(),
                env,
            ),
            Stmt::Throw { value, .. } => {
                let thrown = self.eval_expr(value, env);
                if self.ctx.flow.is_normal() {
                    self.ctx.flow = Flow::Throw(thrown);
                }
            }
            Stmt::Switch {
                discriminant,
                cases,
                ..
            } => self.exec_switch(discriminant, cases, env),
            Stmt::Defer { call, .. } => {
                self.ctx.defer_stack.push(DeferredCall {
                    call: call.clone(),
                    env: env.clone(),
                });
            }
            Stmt::Import { form, path, line } => self.exec_import(form, path, *line, env),
            Stmt::ExternFn {
                name,
                params,
                return_ty,
                library,
                ..
            } => match ffi::load_extern_fn(name, params, return_ty, library) {
                Ok(func) => env.define(name, Value::FfiFn(Arc::new(func)), BindingKind::Const),
                Err(message) => {
                    self.throw(message);
                }
            },
            Stmt::Export { decl, .. } => {
                self.exec_stmt(decl, env);
                if !self.ctx.flow.is_normal() {
                    return;
                }
                if let Stmt::Let { name, .. } = decl.as_ref() {
                    if let Some(module) = &self.current_module {
                        match env.binding(name) {
                            Some(binding) => module.record_export(name, binding),
                            None => {
                                self.throw(format!("export of undefined binding `{}`", name));
                            }
                        }
                    }
                }
            }
            Stmt::ExportFrom { names, path, line } => {
                self.exec_export_from(names, path, *line, env);
            }
        }
    }

    fn exec_let(
        &mut self,
        name: &str,
        ty: Option<&TypeAnn>,
        init: Option<&Expr>,
        is_const: bool,
        line: u32,
        env: &Arc<Environment>,
    ) {
        let mut value = match init {
            Some(expr) => self.eval_expr(expr, env),
            None => Value::Null,
        };
        if !self.ctx.flow.is_normal() {
            return;
        }
        if let Some(ty) = ty {
            value = self.convert_to(value, ty, line, env);
            if !self.ctx.flow.is_normal() {
                return;
            }
        }
        let kind = if is_const {
            BindingKind::Const
        } else {
            BindingKind::Let
        };
        env.define(name, value, kind);
    }

    fn exec_while(&mut self, cond: &Expr, body: &[Stmt], env: &Arc<Environment>) {
        loop {
            let cond_value = self.eval_expr(cond, env);
            if !self.ctx.flow.is_normal() {
                return;
            }
            if !cond_value.is_truthy() {
                return;
            }
            self.exec_scoped_block(body, env);
            match &self.ctx.flow {
                Flow::Normal => {}
                Flow::Continue => self.ctx.flow = Flow::Normal,
                Flow::Break => {
                    self.ctx.flow = Flow::Normal;
                    return;
                }
                // Return / Throw propagate
                _ => return,
            }
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &[Stmt],
        env: &Arc<Environment>,
    ) {
        // The initializer's declarations are scoped to the loop.
        let loop_env = Environment::child(env);
        if let Some(init) = init {
            self.exec_stmt(init, &loop_env);
            if !self.ctx.flow.is_normal() {
                return;
            }
        }
        loop {
            if let Some(cond) = cond {
                let cond_value = self.eval_expr(cond, &loop_env);
                if !self.ctx.flow.is_normal() {
                    return;
                }
                if !cond_value.is_truthy() {
                    return;
                }
            }
            self.exec_scoped_block(body, &loop_env);
            match &self.ctx.flow {
                Flow::Normal => {}
                Flow::Continue => self.ctx.flow = Flow::Normal,
                Flow::Break => {
                    self.ctx.flow = Flow::Normal;
                    return;
                }
                _ => return,
            }
            if let Some(step) = step {
                self.eval_expr(step, &loop_env);
                if !self.ctx.flow.is_normal() {
                    return;
                }
            }
        }
    }

    /// Iteration entries for for-in: array → (value, index), object →
    /// (field name, value), string → (rune, index).
    fn exec_for_in(
        &mut self,
        first: &str,
        second: Option<&str>,
        iterable: &Expr,
        body: &[Stmt],
        line: u32,
        env: &Arc<Environment>,
    ) {
        let target = self.eval_expr(iterable, env);
        if !self.ctx.flow.is_normal() {
            return;
        }
        let entries: Vec<(Value, Value)> = match &target {
            Value::Array(arr) => arr
                .snapshot()
                .into_iter()
                .enumerate()
                .map(|(i, v)| (v, Value::I32(i as i32)))
                .collect(),
            Value::Object(obj) => obj
                .snapshot()
                .into_iter()
                .map(|(name, v)| (Value::str(name), v))
                .collect(),
            Value::Str(s) => s
                .to_string_lossy()
                .chars()
                .enumerate()
                .map(|(i, c)| (Value::Rune(c), Value::I32(i as i32)))
                .collect(),
            other => {
                self.throw(format!(
                    "type error: cannot iterate `{}` (line {})",
                    other.type_name(),
                    line
                ));
                return;
            }
        };
        for (first_value, second_value) in entries {
            let scope = Environment::child(env);
            scope.define(first, first_value, BindingKind::Let);
            if let Some(second) = second {
                scope.define(second, second_value, BindingKind::Let);
            }
            self.exec_block(body, &scope);
            match &self.ctx.flow {
                Flow::Normal => {}
                Flow::Continue => self.ctx.flow = Flow::Normal,
                Flow::Break => {
                    self.ctx.flow = Flow::Normal;
                    return;
                }
                _ => return,
            }
        }
    }

    fn exec_enum(&mut self, name: &str, variants: &[(String, Option<i64>)], env: &Arc<Environment>) {
        let payload = crate::vm::object::ObjectPayload::with_type(Some(name.to_string()));
        let mut next = 0i64;
        for (vname, explicit) in variants {
            let value = explicit.unwrap_or(next);
            next = value + 1;
            let variant = if i32::try_from(value).is_ok() {
                Value::I32(value as i32)
            } else {
                Value::I64(value)
            };
            payload.set(vname, variant);
        }
        env.define(name, Value::Object(Arc::new(payload)), BindingKind::Const);
    }

    fn exec_try(
        &mut self,
        try_block: &[Stmt],
        catch_name: Option<&str>,
        catch_block: Option<&[Stmt]>,
        finally_block: Option<&[Stmt]>,
        env: &Arc<Environment>,
    ) {
        let stack_depth = self.ctx.call_stack.len();
        self.exec_scoped_block(try_block, env);

        if self.ctx.flow.is_throw() {
            if let Some(catch_block) = catch_block {
                let Flow::Throw(exception) = std::mem::take(&mut self.ctx.flow) else {
                    unreachable!()
                };
                // Frames preserved for diagnostics are dropped once caught.
                self.ctx.call_stack.truncate(stack_depth);
                let scope = Environment::child(env);
                if let Some(catch_name) = catch_name {
                    scope.define(catch_name, exception, BindingKind::Let);
                }
                self.exec_block(catch_block, &scope);
            }
        }

        if let Some(finally_block) = finally_block {
            // Save the in-flight control flow around the finally body; a
            // non-normal exit inside finally replaces the saved state.
            let saved = std::mem::take(&mut self.ctx.flow);
            self.exec_scoped_block(finally_block, env);
            if self.ctx.flow.is_normal() {
                self.ctx.flow = saved;
            } else if saved.is_throw() && !self.ctx.flow.is_throw() {
                // The original exception is displaced; its frames are stale.
                self.ctx.call_stack.truncate(stack_depth);
            }
        }
    }

    /// Linear-search case dispatch with C-style fall-through until `break`.
    fn exec_switch(&mut self, discriminant: &Expr, cases: &[SwitchCase], env: &Arc<Environment>) {
        let value = self.eval_expr(discriminant, env);
        if !self.ctx.flow.is_normal() {
            return;
        }
        let mut start = None;
        for (index, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                let test_value = self.eval_expr(test, env);
                if !self.ctx.flow.is_normal() {
                    return;
                }
                if value.loose_eq(&test_value) {
                    start = Some(index);
                    break;
                }
            }
        }
        if start.is_none() {
            start = cases.iter().position(|case| case.test.is_none());
        }
        let Some(start) = start else { return };
        let scope = Environment::child(env);
        for case in &cases[start..] {
            self.exec_block(&case.body, &scope);
            match &self.ctx.flow {
                Flow::Normal => {}
                Flow::Break => {
                    self.ctx.flow = Flow::Normal;
                    return;
                }
                _ => return,
            }
        }
    }

    fn exec_import(&mut self, form: &ImportForm, path: &str, line: u32, env: &Arc<Environment>) {
        let module = match self.resolve_import(path, line) {
            Some(module) => module,
            None => return,
        };
        match form {
            ImportForm::Named(names) => {
                for (name, rename) in names {
                    match module.export_binding(name) {
                        Some(binding) => {
                            let local = rename.as_deref().unwrap_or(name);
                            env.define_binding(local, binding.alias(BindingKind::Imported));
                        }
                        None => {
                            self.throw(format!(
                                "module `{}` has no export `{}` (line {})",
                                path, name, line
                            ));
                            return;
                        }
                    }
                }
            }
            ImportForm::Namespace(name) => {
                let payload = crate::vm::object::ObjectPayload::new();
                for (export_name, binding) in module.exports_snapshot() {
                    payload.set(&export_name, binding.get());
                }
                env.define(name, Value::Object(Arc::new(payload)), BindingKind::Imported);
            }
        }
    }

    fn exec_export_from(
        &mut self,
        names: &[(String, Option<String>)],
        path: &str,
        line: u32,
        _env: &Arc<Environment>,
    ) {
        let module = match self.resolve_import(path, line) {
            Some(module) => module,
            None => return,
        };
        let Some(current) = self.current_module.clone() else {
            self.throw(format!("`export from` outside a module (line {})", line));
            return;
        };
        for (name, rename) in names {
            match module.export_binding(name) {
                Some(binding) => {
                    let exported = rename.as_deref().unwrap_or(name);
                    current.record_export(exported, binding);
                }
                None => {
                    self.throw(format!(
                        "module `{}` has no export `{}` (line {})",
                        path, name, line
                    ));
                    return;
                }
            }
        }
    }

    /// Resolve an import specifier against the current module and fetch the
    /// dependency. During normal script execution the dependency was loaded
    /// and executed ahead of the importer; in a REPL session the import may
    /// be the first mention, so load and execute on demand.
    fn resolve_import(&mut self, path: &str, line: u32) -> Option<Arc<Module>> {
        let importer_dir = self
            .current_module
            .as_ref()
            .and_then(|m| m.path().parent().map(|p| p.to_path_buf()));
        let resolved = match self
            .shared
            .modules
            .resolve(path, importer_dir.as_deref())
        {
            Ok(resolved) => resolved,
            Err(error) => {
                self.throw(format!("{} (line {})", error, line));
                return None;
            }
        };
        let module = match self.shared.modules.get(&resolved) {
            Some(module) => module,
            None => match self.shared.modules.load(resolved) {
                Ok(module) => module,
                Err(error) => {
                    self.throw(format!("{} (line {})", error, line));
                    return None;
                }
            },
        };
        if !module.is_executed() {
            if let Err(error) = self.execute_module(&module) {
                self.throw(format!("{}", error));
                return None;
            }
        }
        Some(module)
    }
}
