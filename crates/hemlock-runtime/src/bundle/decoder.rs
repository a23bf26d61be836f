//! Bundle body → AST decoder, the exact mirror of [`super::encoder`].

use crate::error::RuntimeError;
use hemlock_engine::parser::ast::*;

/// Decode a sealed container (HMLC or HMLB) back into a program.
pub fn decode(bytes: &[u8]) -> Result<Program, RuntimeError> {
    let (_, _, _, body) = super::open_container(bytes)?;
    let mut decoder = Decoder {
        bytes: &body,
        pos: 0,
        strings: Vec::new(),
    };
    decoder.read_string_table()?;
    let count = decoder.read_u32()?;
    let mut statements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        statements.push(decoder.read_stmt()?);
    }
    if decoder.pos != decoder.bytes.len() {
        return Err(bundle_err("trailing bytes after statement table"));
    }
    Ok(Program::new(statements))
}

fn bundle_err(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Bundle(message.into())
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    strings: Vec<String>,
}

impl<'a> Decoder<'a> {
    fn read_string_table(&mut self) -> Result<(), RuntimeError> {
        let count = self.read_u32()?;
        self.strings.reserve(count as usize);
        for _ in 0..count {
            let len = self.read_u32()? as usize;
            let bytes = self.take(len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| bundle_err("invalid UTF-8 in string table"))?;
            self.strings.push(s.to_string());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    fn take(&mut self, len: usize) -> Result<&'a [u8], RuntimeError> {
        if self.pos + len > self.bytes.len() {
            return Err(bundle_err("unexpected end of bundle"));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.take(1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(bundle_err(format!("invalid bool byte {}", other))),
        }
    }

    fn read_u32(&mut self) -> Result<u32, RuntimeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, RuntimeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64, RuntimeError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64, RuntimeError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    fn read_str(&mut self) -> Result<String, RuntimeError> {
        let idx = self.read_u32()? as usize;
        self.strings
            .get(idx)
            .cloned()
            .ok_or_else(|| bundle_err(format!("string index {} out of range", idx)))
    }

    fn read_opt_str(&mut self) -> Result<Option<String>, RuntimeError> {
        if self.read_bool()? {
            Ok(Some(self.read_str()?))
        } else {
            Ok(None)
        }
    }

    fn read_opt_ty(&mut self) -> Result<Option<TypeAnn>, RuntimeError> {
        if self.read_bool()? {
            Ok(Some(self.read_ty()?))
        } else {
            Ok(None)
        }
    }

    fn read_opt_expr(&mut self) -> Result<Option<Expr>, RuntimeError> {
        if self.read_bool()? {
            Ok(Some(self.read_expr()?))
        } else {
            Ok(None)
        }
    }

    fn read_block(&mut self) -> Result<Vec<Stmt>, RuntimeError> {
        let count = self.read_u32()?;
        let mut body = Vec::with_capacity(count as usize);
        for _ in 0..count {
            body.push(self.read_stmt()?);
        }
        Ok(body)
    }

    fn read_opt_block(&mut self) -> Result<Option<Vec<Stmt>>, RuntimeError> {
        if self.read_bool()? {
            Ok(Some(self.read_block()?))
        } else {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Leaf enums
    // ------------------------------------------------------------------

    fn read_ty(&mut self) -> Result<TypeAnn, RuntimeError> {
        Ok(match self.read_u8()? {
            0 => TypeAnn::I8,
            1 => TypeAnn::I16,
            2 => TypeAnn::I32,
            3 => TypeAnn::I64,
            4 => TypeAnn::U8,
            5 => TypeAnn::U16,
            6 => TypeAnn::U32,
            7 => TypeAnn::U64,
            8 => TypeAnn::F32,
            9 => TypeAnn::F64,
            10 => TypeAnn::Bool,
            11 => TypeAnn::Str,
            12 => TypeAnn::Rune,
            13 => TypeAnn::Array,
            14 => TypeAnn::Object,
            15 => TypeAnn::Buffer,
            16 => TypeAnn::Ptr,
            17 => TypeAnn::Any,
            18 => TypeAnn::Named(self.read_str()?),
            other => return Err(bundle_err(format!("invalid type tag {}", other))),
        })
    }

    fn read_binary_op(&mut self) -> Result<BinaryOp, RuntimeError> {
        Ok(match self.read_u8()? {
            0 => BinaryOp::Add,
            1 => BinaryOp::Sub,
            2 => BinaryOp::Mul,
            3 => BinaryOp::Div,
            4 => BinaryOp::Mod,
            5 => BinaryOp::Eq,
            6 => BinaryOp::Ne,
            7 => BinaryOp::Lt,
            8 => BinaryOp::Le,
            9 => BinaryOp::Gt,
            10 => BinaryOp::Ge,
            11 => BinaryOp::BitAnd,
            12 => BinaryOp::BitOr,
            13 => BinaryOp::BitXor,
            14 => BinaryOp::Shl,
            15 => BinaryOp::Shr,
            16 => BinaryOp::And,
            17 => BinaryOp::Or,
            other => return Err(bundle_err(format!("invalid binary op tag {}", other))),
        })
    }

    fn read_literal(&mut self) -> Result<Literal, RuntimeError> {
        Ok(match self.read_u8()? {
            0 => Literal::Null,
            1 => Literal::Bool(self.read_bool()?),
            2 => Literal::Int(self.read_u64()?),
            3 => Literal::Float(self.read_f64()?),
            4 => Literal::Str(self.read_str()?),
            5 => {
                let code = self.read_u32()?;
                Literal::Rune(
                    char::from_u32(code)
                        .ok_or_else(|| bundle_err(format!("invalid rune U+{:X}", code)))?,
                )
            }
            other => return Err(bundle_err(format!("invalid literal tag {}", other))),
        })
    }

    fn read_function(&mut self) -> Result<FunctionLit, RuntimeError> {
        let is_async = self.read_bool()?;
        let name = self.read_str()?;
        let param_count = self.read_u32()?;
        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            params.push(Param {
                name: self.read_str()?,
                ty: self.read_opt_ty()?,
                default: self.read_opt_expr()?,
            });
        }
        let return_ty = self.read_opt_ty()?;
        let body = self.read_block()?;
        Ok(FunctionLit {
            is_async,
            params,
            return_ty,
            body,
            name,
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn read_expr(&mut self) -> Result<Expr, RuntimeError> {
        Ok(match self.read_u8()? {
            0 => {
                let value = self.read_literal()?;
                Expr::Literal {
                    value,
                    line: self.read_u32()?,
                }
            }
            1 => {
                let name = self.read_str()?;
                Expr::Ident {
                    name,
                    line: self.read_u32()?,
                }
            }
            2 => {
                let op = self.read_binary_op()?;
                let lhs = Box::new(self.read_expr()?);
                let rhs = Box::new(self.read_expr()?);
                Expr::Binary {
                    op,
                    lhs,
                    rhs,
                    line: self.read_u32()?,
                }
            }
            3 => {
                let op = match self.read_u8()? {
                    0 => UnaryOp::Not,
                    1 => UnaryOp::Neg,
                    2 => UnaryOp::BitNot,
                    other => return Err(bundle_err(format!("invalid unary op tag {}", other))),
                };
                let operand = Box::new(self.read_expr()?);
                Expr::Unary {
                    op,
                    operand,
                    line: self.read_u32()?,
                }
            }
            4 => {
                let cond = Box::new(self.read_expr()?);
                let then_expr = Box::new(self.read_expr()?);
                let else_expr = Box::new(self.read_expr()?);
                Expr::Ternary {
                    cond,
                    then_expr,
                    else_expr,
                    line: self.read_u32()?,
                }
            }
            5 => {
                let lhs = Box::new(self.read_expr()?);
                let rhs = Box::new(self.read_expr()?);
                Expr::Coalesce {
                    lhs,
                    rhs,
                    line: self.read_u32()?,
                }
            }
            6 => {
                let target = Box::new(self.read_expr()?);
                let link = match self.read_u8()? {
                    0 => OptChainLink::Property(self.read_str()?),
                    1 => OptChainLink::Index(Box::new(self.read_expr()?)),
                    2 => {
                        let count = self.read_u32()?;
                        let mut args = Vec::with_capacity(count as usize);
                        for _ in 0..count {
                            args.push(self.read_expr()?);
                        }
                        OptChainLink::Call(args)
                    }
                    other => {
                        return Err(bundle_err(format!("invalid chain link tag {}", other)))
                    }
                };
                Expr::OptChain {
                    target,
                    link,
                    line: self.read_u32()?,
                }
            }
            7 => {
                let target = Box::new(self.read_expr()?);
                let value = Box::new(self.read_expr()?);
                Expr::Assign {
                    target,
                    value,
                    line: self.read_u32()?,
                }
            }
            8 => {
                let target = Box::new(self.read_expr()?);
                let is_increment = self.read_bool()?;
                let is_prefix = self.read_bool()?;
                Expr::IncDec {
                    target,
                    is_increment,
                    is_prefix,
                    line: self.read_u32()?,
                }
            }
            9 => {
                let callee = Box::new(self.read_expr()?);
                let count = self.read_u32()?;
                let mut args = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    args.push(self.read_expr()?);
                }
                Expr::Call {
                    callee,
                    args,
                    line: self.read_u32()?,
                }
            }
            10 => {
                let target = Box::new(self.read_expr()?);
                let name = self.read_str()?;
                Expr::Property {
                    target,
                    name,
                    line: self.read_u32()?,
                }
            }
            11 => {
                let target = Box::new(self.read_expr()?);
                let index = Box::new(self.read_expr()?);
                Expr::Index {
                    target,
                    index,
                    line: self.read_u32()?,
                }
            }
            12 => {
                let count = self.read_u32()?;
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = self.read_str()?;
                    let value = self.read_expr()?;
                    fields.push((name, value));
                }
                Expr::ObjectLit {
                    fields,
                    line: self.read_u32()?,
                }
            }
            13 => {
                let count = self.read_u32()?;
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(self.read_expr()?);
                }
                Expr::ArrayLit {
                    elements,
                    line: self.read_u32()?,
                }
            }
            14 => {
                let func = Box::new(self.read_function()?);
                Expr::Function {
                    func,
                    line: self.read_u32()?,
                }
            }
            15 => {
                let count = self.read_u32()?;
                let mut parts = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    parts.push(match self.read_u8()? {
                        0 => InterpPart::Literal(self.read_str()?),
                        1 => InterpPart::Expr(self.read_expr()?),
                        other => {
                            return Err(bundle_err(format!(
                                "invalid interpolation part tag {}",
                                other
                            )))
                        }
                    });
                }
                Expr::Interp {
                    parts,
                    line: self.read_u32()?,
                }
            }
            16 => {
                let task = Box::new(self.read_expr()?);
                Expr::Await {
                    task,
                    line: self.read_u32()?,
                }
            }
            other => return Err(bundle_err(format!("invalid expression tag {}", other))),
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn read_stmt(&mut self) -> Result<Stmt, RuntimeError> {
        Ok(match self.read_u8()? {
            0 => {
                let name = self.read_str()?;
                let ty = self.read_opt_ty()?;
                let init = self.read_opt_expr()?;
                let is_const = self.read_bool()?;
                Stmt::Let {
                    name,
                    ty,
                    init,
                    is_const,
                    line: self.read_u32()?,
                }
            }
            1 => {
                let expr = self.read_expr()?;
                Stmt::Expression {
                    expr,
                    line: self.read_u32()?,
                }
            }
            2 => {
                let cond = self.read_expr()?;
                let then_block = self.read_block()?;
                let else_block = self.read_opt_block()?;
                Stmt::If {
                    cond,
                    then_block,
                    else_block,
                    line: self.read_u32()?,
                }
            }
            3 => {
                let cond = self.read_expr()?;
                let body = self.read_block()?;
                Stmt::While {
                    cond,
                    body,
                    line: self.read_u32()?,
                }
            }
            4 => {
                let init = if self.read_bool()? {
                    Some(Box::new(self.read_stmt()?))
                } else {
                    None
                };
                let cond = self.read_opt_expr()?;
                let step = self.read_opt_expr()?;
                let body = self.read_block()?;
                Stmt::For {
                    init,
                    cond,
                    step,
                    body,
                    line: self.read_u32()?,
                }
            }
            5 => {
                let first = self.read_str()?;
                let second = self.read_opt_str()?;
                let iterable = self.read_expr()?;
                let body = self.read_block()?;
                Stmt::ForIn {
                    first,
                    second,
                    iterable,
                    body,
                    line: self.read_u32()?,
                }
            }
            6 => Stmt::Break {
                line: self.read_u32()?,
            },
            7 => Stmt::Continue {
                line: self.read_u32()?,
            },
            8 => {
                let value = self.read_opt_expr()?;
                Stmt::Return {
                    value,
                    line: self.read_u32()?,
                }
            }
            9 => {
                let body = self.read_block()?;
                Stmt::Block {
                    body,
                    line: self.read_u32()?,
                }
            }
            10 => {
                let name = self.read_str()?;
                let count = self.read_u32()?;
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    fields.push(FieldDef {
                        name: self.read_str()?,
                        ty: self.read_opt_ty()?,
                        default: self.read_opt_expr()?,
                    });
                }
                Stmt::DefineObject {
                    name,
                    fields,
                    line: self.read_u32()?,
                }
            }
            11 => {
                let name = self.read_str()?;
                let count = self.read_u32()?;
                let mut variants = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let vname = self.read_str()?;
                    let value = if self.read_bool()? {
                        Some(self.read_i64()?)
                    } else {
                        None
                    };
                    variants.push((vname, value));
                }
                Stmt::Enum {
                    name,
                    variants,
                    line: self.read_u32()?,
                }
            }
            12 => {
                let try_block = self.read_block()?;
                let catch_name = self.read_opt_str()?;
                let catch_block = self.read_opt_block()?;
                let finally_block = self.read_opt_block()?;
                Stmt::Try {
                    try_block,
                    catch_name,
                    catch_block,
                    finally_block,
                    line: self.read_u32()?,
                }
            }
            13 => {
                let value = self.read_expr()?;
                Stmt::Throw {
                    value,
                    line: self.read_u32()?,
                }
            }
            14 => {
                let discriminant = self.read_expr()?;
                let count = self.read_u32()?;
                let mut cases = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let test = self.read_opt_expr()?;
                    let body = self.read_block()?;
                    let line = self.read_u32()?;
                    cases.push(SwitchCase { test, body, line });
                }
                Stmt::Switch {
                    discriminant,
                    cases,
                    line: self.read_u32()?,
                }
            }
            15 => {
                let call = self.read_expr()?;
                Stmt::Defer {
                    call,
                    line: self.read_u32()?,
                }
            }
            16 => {
                let form = match self.read_u8()? {
                    0 => ImportForm::Named(self.read_import_names()?),
                    1 => ImportForm::Namespace(self.read_str()?),
                    other => {
                        return Err(bundle_err(format!("invalid import form tag {}", other)))
                    }
                };
                let path = self.read_str()?;
                Stmt::Import {
                    form,
                    path,
                    line: self.read_u32()?,
                }
            }
            17 => {
                let name = self.read_str()?;
                let count = self.read_u32()?;
                let mut params = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let pname = self.read_str()?;
                    let ty = self.read_ty()?;
                    params.push((pname, ty));
                }
                let return_ty = self.read_ty()?;
                let library = self.read_str()?;
                Stmt::ExternFn {
                    name,
                    params,
                    return_ty,
                    library,
                    line: self.read_u32()?,
                }
            }
            18 => {
                let decl = Box::new(self.read_stmt()?);
                Stmt::Export {
                    decl,
                    line: self.read_u32()?,
                }
            }
            19 => {
                let names = self.read_import_names()?;
                let path = self.read_str()?;
                Stmt::ExportFrom {
                    names,
                    path,
                    line: self.read_u32()?,
                }
            }
            other => return Err(bundle_err(format!("invalid statement tag {}", other))),
        })
    }

    fn read_import_names(&mut self) -> Result<Vec<(String, Option<String>)>, RuntimeError> {
        let count = self.read_u32()?;
        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = self.read_str()?;
            let rename = self.read_opt_str()?;
            names.push((name, rename));
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::super::encode;
    use super::*;
    use hemlock_engine::parser::parse;

    /// Full-grammar round trip: every statement and expression form.
    #[test]
    fn test_full_grammar_round_trip() {
        let source = r#"
            import { a, b as c } from "./dep";
            import * as ns from "./other";
            export { re } from "./dep";
            extern fn cos(x: f64): f64 from "libm.so.6";

            define Point { x: i32, y: i32 = 0 }
            enum Color { Red, Green = 5, Blue }

            export let counter = 0;
            const MAX: u32 = 10;

            fn work(n, scale = 2) {
                let obj = { name: "w", nested: { deep: [1, 2.5, 'x', true, null] } };
                let text = "n=${n}!";
                defer cleanup();
                try {
                    for (let i = 0; i < n; i++) {
                        if (i % 2 == 0) { continue; }
                        counter += i;
                    }
                    for (v, idx in [1, 2]) { counter = counter + v; }
                    while (counter > 100) { counter--; break; }
                    switch (n) {
                        case 1: throw "one";
                        default: counter = counter ?? 0;
                    }
                } catch (e) {
                    counter = obj?.nested?.deep[0] ? 1 : 2;
                } finally {
                    counter = counter | 0;
                }
                return counter;
            }

            async fn background(t) { return await t; }
            let f = fn(x): i64 { return -x + ~x << 1; };
            { let scoped = !true && false || true; }
            work(3);
        "#;
        let program = parse(source).unwrap();
        for compress in [false, true] {
            let bytes = encode(&program, compress);
            let decoded = decode(&bytes).unwrap();
            assert_eq!(decoded, program);
        }
    }

    #[test]
    fn test_truncated_body_rejected() {
        let program = parse("let x = 1;").unwrap();
        let bytes = encode(&program, false);
        assert!(decode(&bytes[..bytes.len() - 3]).is_err());
    }
}
