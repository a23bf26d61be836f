//! Expression evaluation.
//!
//! Each evaluation produces an owned [`Value`]. Control-flow flags are
//! checked between sub-evaluations of compound expressions; once a flag is
//! set, evaluation unwinds without further side effects.

use crate::parser::ast::*;
use crate::vm::context::Flow;
use crate::vm::env::Environment;
use crate::vm::interp::Interp;
use crate::vm::numeric;
use crate::vm::object::FunctionPayload;
use crate::vm::value::Value;
use std::sync::Arc;

impl Interp {
    pub fn eval_expr(&mut self, expr: &Expr, env: &Arc<Environment>) -> Value {
        if !self.ctx.flow.is_normal() {
            return Value::Null;
        }
        match expr {
            Expr::Literal { value, .. } => eval_literal(value),
            Expr::Ident { name, line } => match env.lookup(name) {
                Some(value) => value,
                None => self.throw(format!("undefined variable `{}` (line {})", name, line)),
            },
            Expr::Binary { op, lhs, rhs, line } => self.eval_binary(*op, lhs, rhs, *line, env),
            Expr::Unary { op, operand, line } => {
                let value = self.eval_expr(operand, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                let result = match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => numeric::negate(&value),
                    UnaryOp::BitNot => numeric::bit_not(&value),
                };
                match result {
                    Ok(value) => value,
                    Err(message) => self.throw(format!("{} (line {})", message, line)),
                }
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let cond_value = self.eval_expr(cond, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                if cond_value.is_truthy() {
                    self.eval_expr(then_expr, env)
                } else {
                    self.eval_expr(else_expr, env)
                }
            }
            Expr::Coalesce { lhs, rhs, .. } => {
                let lhs_value = self.eval_expr(lhs, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                if lhs_value.is_null() {
                    self.eval_expr(rhs, env)
                } else {
                    lhs_value
                }
            }
            Expr::OptChain { target, link, line } => {
                let receiver = self.eval_expr(target, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                if receiver.is_null() {
                    return Value::Null;
                }
                match link {
                    OptChainLink::Property(name) => {
                        self.property_get_optional(&receiver, name, *line)
                    }
                    OptChainLink::Index(index) => {
                        let index_value = self.eval_expr(index, env);
                        if !self.ctx.flow.is_normal() {
                            return Value::Null;
                        }
                        self.index_get(&receiver, &index_value, *line)
                    }
                    OptChainLink::Call(args) => {
                        let args = self.eval_args(args, env);
                        if !self.ctx.flow.is_normal() {
                            return Value::Null;
                        }
                        self.call_value(receiver, None, args, *line)
                    }
                }
            }
            Expr::Assign {
                target,
                value,
                line,
            } => self.eval_assign(target, value, *line, env),
            Expr::IncDec {
                target,
                is_increment,
                is_prefix,
                line,
            } => self.eval_incdec(target, *is_increment, *is_prefix, *line, env),
            Expr::Call { callee, args, line } => self.eval_call(callee, args, *line, env),
            Expr::Property { target, name, line } => {
                let receiver = self.eval_expr(target, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                self.property_get(&receiver, name, *line)
            }
            Expr::Index {
                target,
                index,
                line,
            } => {
                let receiver = self.eval_expr(target, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                let index_value = self.eval_expr(index, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                self.index_get(&receiver, &index_value, *line)
            }
            Expr::ObjectLit { fields, .. } => {
                let payload = crate::vm::object::ObjectPayload::new();
                for (name, value_expr) in fields {
                    let value = self.eval_expr(value_expr, env);
                    if !self.ctx.flow.is_normal() {
                        return Value::Null;
                    }
                    payload.set(name, value);
                }
                Value::Object(Arc::new(payload))
            }
            Expr::ArrayLit { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    let value = self.eval_expr(element, env);
                    if !self.ctx.flow.is_normal() {
                        return Value::Null;
                    }
                    items.push(value);
                }
                Value::array(items)
            }
            Expr::Function { func, .. } => Value::Function(Arc::new(FunctionPayload::new(
                Arc::new((**func).clone()),
                env.clone(),
            ))),
            Expr::Interp { parts, .. } => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        InterpPart::Literal(s) => text.push_str(s),
                        InterpPart::Expr(expr) => {
                            let value = self.eval_expr(expr, env);
                            if !self.ctx.flow.is_normal() {
                                return Value::Null;
                            }
                            text.push_str(&value.display_string());
                        }
                    }
                }
                Value::str(text)
            }
            Expr::Await { task, line } => {
                let value = self.eval_expr(task, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                match value {
                    Value::Task(task) => self.join_task(&task, *line),
                    other => self.throw(format!(
                        "type error: `await` expects a task, got `{}` (line {})",
                        other.type_name(),
                        line
                    )),
                }
            }
        }
    }

    pub fn eval_args(&mut self, args: &[Expr], env: &Arc<Environment>) -> Vec<Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval_expr(arg, env);
            if !self.ctx.flow.is_normal() {
                return values;
            }
            values.push(value);
        }
        values
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        line: u32,
        env: &Arc<Environment>,
    ) -> Value {
        // Short-circuit forms evaluate the right side conditionally and
        // yield the deciding operand.
        if op == BinaryOp::And || op == BinaryOp::Or {
            let lhs_value = self.eval_expr(lhs, env);
            if !self.ctx.flow.is_normal() {
                return Value::Null;
            }
            let take_rhs = if op == BinaryOp::And {
                lhs_value.is_truthy()
            } else {
                !lhs_value.is_truthy()
            };
            return if take_rhs {
                self.eval_expr(rhs, env)
            } else {
                lhs_value
            };
        }

        let lhs_value = self.eval_expr(lhs, env);
        if !self.ctx.flow.is_normal() {
            return Value::Null;
        }
        let rhs_value = self.eval_expr(rhs, env);
        if !self.ctx.flow.is_normal() {
            return Value::Null;
        }

        let result = match op {
            BinaryOp::Eq => return Value::Bool(lhs_value.loose_eq(&rhs_value)),
            BinaryOp::Ne => return Value::Bool(!lhs_value.loose_eq(&rhs_value)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                // Runes compare as code points; everything else is numeric.
                if let (Value::Rune(a), Value::Rune(b)) = (&lhs_value, &rhs_value) {
                    let ordering = a.cmp(b);
                    return Value::Bool(match op {
                        BinaryOp::Lt => ordering.is_lt(),
                        BinaryOp::Le => ordering.is_le(),
                        BinaryOp::Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    });
                }
                numeric::compare(op, &lhs_value, &rhs_value).map(Value::Bool)
            }
            BinaryOp::Add | BinaryOp::Sub => {
                match pointer_arith(op, &lhs_value, &rhs_value) {
                    Some(result) => result,
                    None => {
                        if matches!(lhs_value, Value::Str(_)) || matches!(rhs_value, Value::Str(_))
                        {
                            if op == BinaryOp::Add {
                                concat(&lhs_value, &rhs_value)
                            } else {
                                Err("type error: cannot subtract strings".to_string())
                            }
                        } else {
                            numeric::arith(op, &lhs_value, &rhs_value)
                        }
                    }
                }
            }
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                numeric::arith(op, &lhs_value, &rhs_value)
            }
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr => numeric::bitwise(op, &lhs_value, &rhs_value),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };
        match result {
            Ok(value) => value,
            Err(message) => self.throw(format!("{} (line {})", message, line)),
        }
    }

    fn eval_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        line: u32,
        env: &Arc<Environment>,
    ) -> Value {
        match target {
            Expr::Ident { name, .. } => {
                let new_value = self.eval_expr(value, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                match env.assign(name, new_value.clone()) {
                    Ok(()) => new_value,
                    Err(error) => self.throw(format!("{} (line {})", error.message(), line)),
                }
            }
            Expr::Index {
                target: container,
                index,
                ..
            } => {
                let receiver = self.eval_expr(container, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                let index_value = self.eval_expr(index, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                let new_value = self.eval_expr(value, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                self.index_set(&receiver, &index_value, new_value, line)
            }
            Expr::Property {
                target: container,
                name,
                ..
            } => {
                let receiver = self.eval_expr(container, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                let new_value = self.eval_expr(value, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                self.property_set(&receiver, name, new_value, line)
            }
            _ => self.throw(format!("invalid assignment target (line {})", line)),
        }
    }

    fn eval_incdec(
        &mut self,
        target: &Expr,
        is_increment: bool,
        is_prefix: bool,
        line: u32,
        env: &Arc<Environment>,
    ) -> Value {
        let old = self.eval_expr(target, env);
        if !self.ctx.flow.is_normal() {
            return Value::Null;
        }
        let delta = if is_increment { 1 } else { -1 };
        let new = match numeric::step(&old, delta) {
            Ok(value) => value,
            Err(message) => return self.throw(format!("{} (line {})", message, line)),
        };
        match target {
            Expr::Ident { name, .. } => {
                if let Err(error) = env.assign(name, new.clone()) {
                    return self.throw(format!("{} (line {})", error.message(), line));
                }
            }
            Expr::Index {
                target: container,
                index,
                ..
            } => {
                let receiver = self.eval_expr(container, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                let index_value = self.eval_expr(index, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                self.index_set(&receiver, &index_value, new.clone(), line);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
            }
            Expr::Property {
                target: container,
                name,
                ..
            } => {
                let receiver = self.eval_expr(container, env);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
                self.property_set(&receiver, name, new.clone(), line);
                if !self.ctx.flow.is_normal() {
                    return Value::Null;
                }
            }
            _ => return self.throw(format!("invalid increment target (line {})", line)),
        }
        if is_prefix {
            new
        } else {
            old
        }
    }

    /// Join a task: block for completion, then return its result or
    /// re-throw its captured exception.
    pub fn join_task(&mut self, task: &Arc<crate::vm::task::TaskObject>, line: u32) -> Value {
        match task.join() {
            Ok(crate::vm::task::TaskOutcome::Completed(value)) => value,
            Ok(crate::vm::task::TaskOutcome::Failed(exception)) => {
                self.ctx.flow = Flow::Throw(exception);
                Value::Null
            }
            Err(message) => self.throw(format!("{} (line {})", message, line)),
        }
    }
}

fn eval_literal(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        // Integer literals take the narrowest of i32 / i64 / u64 that fits.
        Literal::Int(n) => {
            if let Ok(v) = i32::try_from(*n) {
                Value::I32(v)
            } else if let Ok(v) = i64::try_from(*n) {
                Value::I64(v)
            } else {
                Value::U64(*n)
            }
        }
        Literal::Float(f) => Value::F64(*f),
        Literal::Str(s) => Value::str(s.clone()),
        Literal::Rune(c) => Value::Rune(*c),
    }
}

/// `ptr ± integer` adjusts the raw address by that many bytes.
fn pointer_arith(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<Result<Value, String>> {
    let delta_of = |v: &Value| -> Option<i64> {
        match v {
            Value::I8(n) => Some(*n as i64),
            Value::I16(n) => Some(*n as i64),
            Value::I32(n) => Some(*n as i64),
            Value::I64(n) => Some(*n),
            Value::U8(n) => Some(*n as i64),
            Value::U16(n) => Some(*n as i64),
            Value::U32(n) => Some(*n as i64),
            Value::U64(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    };
    match (lhs, rhs, op) {
        (Value::Ptr(addr), delta, BinaryOp::Add) | (delta, Value::Ptr(addr), BinaryOp::Add) => {
            Some(match delta_of(delta) {
                Some(d) => Ok(Value::Ptr(addr.wrapping_add_signed(d as isize))),
                None => Err("type error: ptr arithmetic requires an integer".to_string()),
            })
        }
        (Value::Ptr(addr), delta, BinaryOp::Sub) => Some(match delta_of(delta) {
            Some(d) => Ok(Value::Ptr(addr.wrapping_add_signed(-(d as isize)))),
            None => Err("type error: ptr arithmetic requires an integer".to_string()),
        }),
        _ => None,
    }
}

/// String concatenation: string±string, string±rune (UTF-8 encoded), and
/// string±primitive (the primitive is rendered).
fn concat(lhs: &Value, rhs: &Value) -> Result<Value, String> {
    fn rendered(value: &Value) -> Result<String, String> {
        match value {
            Value::Str(s) => Ok(s.to_string_lossy()),
            Value::Rune(c) => Ok(c.to_string()),
            Value::Null | Value::Bool(_) => Ok(value.display_string()),
            v if v.is_numeric() => Ok(v.display_string()),
            other => Err(format!(
                "type error: cannot concatenate `{}` to a string",
                other.type_name()
            )),
        }
    }
    let mut text = rendered(lhs)?;
    text.push_str(&rendered(rhs)?);
    Ok(Value::str(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_int_typing() {
        assert_eq!(eval_literal(&Literal::Int(1)), Value::I32(1));
        assert_eq!(
            eval_literal(&Literal::Int(5_000_000_000)),
            Value::I64(5_000_000_000)
        );
        assert_eq!(
            eval_literal(&Literal::Int(u64::MAX)),
            Value::U64(u64::MAX)
        );
    }

    #[test]
    fn test_concat_rules() {
        assert_eq!(
            concat(&Value::str("a"), &Value::str("b")).unwrap(),
            Value::str("ab")
        );
        assert_eq!(
            concat(&Value::str("n="), &Value::I32(4)).unwrap(),
            Value::str("n=4")
        );
        assert_eq!(
            concat(&Value::str("c: "), &Value::Rune('é')).unwrap(),
            Value::str("c: é")
        );
        assert!(concat(&Value::str("x"), &Value::array(vec![])).is_err());
    }

    #[test]
    fn test_pointer_arith() {
        let r = pointer_arith(BinaryOp::Add, &Value::Ptr(0x1000), &Value::I32(16))
            .unwrap()
            .unwrap();
        assert_eq!(r, Value::Ptr(0x1010));
        let r = pointer_arith(BinaryOp::Sub, &Value::Ptr(0x1000), &Value::I32(16))
            .unwrap()
            .unwrap();
        assert_eq!(r, Value::Ptr(0xFF0));
        assert!(pointer_arith(BinaryOp::Add, &Value::I32(1), &Value::I32(2)).is_none());
    }
}
