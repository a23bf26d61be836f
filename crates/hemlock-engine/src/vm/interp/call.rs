//! The call protocol.
//!
//! Covers callee dispatch (user functions, builtins, FFI symbols), receiver
//! method routing with `self` binding, arity and default-parameter
//! handling, the call-depth bound, the per-call defer region, and
//! call-stack trace maintenance.

use crate::parser::ast::{Expr, OptChainLink};
use crate::vm::context::{CallFrame, Flow, MAX_CALL_DEPTH};
use crate::vm::env::{BindingKind, Environment};
use crate::vm::ffi;
use crate::vm::interp::Interp;
use crate::vm::object::FunctionPayload;
use crate::vm::value::Value;
use std::sync::Arc;

impl Interp {
    pub fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        line: u32,
        env: &Arc<Environment>,
    ) -> Value {
        // A property-access callee evaluates its receiver once and routes
        // either to a user method (with `self` bound) or to the receiver
        // kind's method table.
        match callee {
            Expr::Property { target, name, .. } => {
                let receiver = self.eval_expr(target, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                self.call_with_receiver(receiver, name, args, line, env)
            }
            Expr::OptChain {
                target,
                link: OptChainLink::Property(name),
                ..
            } => {
                let receiver = self.eval_expr(target, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                if receiver.is_null() {
                    return Value::Null;
                }
                self.call_with_receiver(receiver, name, args, line, env)
            }
            _ => {
                let callee_value = self.eval_expr(callee, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                let args = self.eval_args(args, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                self.call_value(callee_value, None, args, line)
            }
        }
    }

    fn call_with_receiver(
        &mut self,
        receiver: Value,
        name: &str,
        args: &[Expr],
        line: u32,
        env: &Arc<Environment>,
    ) -> Value {
        if let Value::Object(obj) = &receiver {
            if let Some(field) = obj.get(name) {
                let args = self.eval_args(args, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                return match field {
                    Value::Function(func) => {
                        self.call_function(&func, Some(receiver.clone()), args, line)
                    }
                    callable @ (Value::Builtin(_) | Value::FfiFn(_)) => {
                        self.call_value(callable, None, args, line)
                    }
                    other => self.throw(format!(
                        "type error: field `{}` is `{}`, not a function (line {})",
                        name,
                        other.type_name(),
                        line
                    )),
                };
            }
            return self.throw(format!("missing method `{}` on object (line {})", name, line));
        }
        let args = self.eval_args(args, env);
        if !self.ctx.flow.is_normal() {
            return Value::Null;
        }
        self.call_method(receiver, name, args, line)
    }

    /// Invoke a callable value.
    pub fn call_value(
        &mut self,
        callee: Value,
        self_value: Option<Value>,
        args: Vec<Value>,
        line: u32,
    ) -> Value {
        match callee {
            Value::Function(func) => self.call_function(&func, self_value, args, line),
            Value::Builtin(builtin) => match (builtin.func)(self, args) {
                Ok(value) => value,
                Err(exception) => {
                    if self.ctx.flow.is_normal() {
                        self.ctx.flow = Flow::Throw(exception);
                    }
                    Value::Null
                }
            },
            Value::FfiFn(func) => match ffi::call_ffi(&func, &args) {
                Ok(value) => value,
                Err(message) => self.throw(format!("{} (line {})", message, line)),
            },
            other => self.throw(format!(
                "type error: `{}` is not callable (line {})",
                other.type_name(),
                line
            )),
        }
    }

    /// Call a user-defined function.
    ///
    /// Binds `self` read-only when present, checks arity against the
    /// required/total parameter counts, evaluates missing trailing
    /// parameters' defaults, converts annotated parameters, runs the body,
    /// then executes this call's defers LIFO before propagating the exit.
    pub fn call_function(
        &mut self,
        func: &Arc<FunctionPayload>,
        self_value: Option<Value>,
        args: Vec<Value>,
        call_line: u32,
    ) -> Value {
        if self.ctx.depth >= MAX_CALL_DEPTH {
            return self.throw(format!(
                "stack overflow: call depth {} exceeded (line {})",
                MAX_CALL_DEPTH, call_line
            ));
        }
        let decl = func.decl().clone();
        let required = decl.params.iter().filter(|p| p.default.is_none()).count();
        if args.len() < required || args.len() > decl.params.len() {
            return self.throw(format!(
                "arity error: `{}` expects {} to {} arguments, got {} (line {})",
                func.name(),
                required,
                decl.params.len(),
                args.len(),
                call_line
            ));
        }

        let call_env = Environment::child(func.env());
        if let Some(self_value) = self_value {
            call_env.define("self", self_value, BindingKind::Const);
        }
        let mut args = args.into_iter();
        for param in &decl.params {
            let mut value = match args.next() {
                Some(value) => value,
                None => {
                    // Defaults run in the callee environment.
                    let default = param.default.as_ref().expect("arity checked above");
                    let value = self.eval_expr(default, &call_env);
                    if !self.ctx.flow.is_normal() {
                        return Value::Null;
                    }
                    value
                }
            };
            if let Some(ty) = &param.ty {
                value = self.convert_to(value, ty, call_line, &call_env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
            }
            call_env.define(&param.name, value, BindingKind::Let);
        }

        self.ctx.call_stack.push(CallFrame {
            function: func.name().to_string(),
            line: call_line,
        });
        self.ctx.depth += 1;
        let defer_base = self.ctx.defer_stack.len();

        self.exec_block(&decl.body, &call_env);

        self.run_defers(defer_base);
        self.ctx.depth -= 1;

        match std::mem::take(&mut self.ctx.flow) {
            Flow::Return(value) => {
                self.ctx.call_stack.pop();
                match &decl.return_ty {
                    Some(ty) => self.convert_to(value, ty, call_line, &call_env),
                    None => value,
                }
            }
            Flow::Normal => {
                self.ctx.call_stack.pop();
                Value::Null
            }
            Flow::Throw(exception) => {
                // Frame stays on the stack for diagnostics until caught.
                self.ctx.flow = Flow::Throw(exception);
                Value::Null
            }
            Flow::Break => {
                self.ctx.call_stack.pop();
                self.throw("`break` outside of a loop")
            }
            Flow::Continue => {
                self.ctx.call_stack.pop();
                self.throw("`continue` outside of a loop")
            }
        }
    }
}
