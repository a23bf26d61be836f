//! AST → bundle body encoder.
//!
//! Statements and expressions are tag-byte encoded with little-endian
//! integers; every identifier and string literal is interned into the
//! string table and referenced by u32 index. The decoder in
//! [`super::decoder`] mirrors this exactly.

use hemlock_engine::parser::ast::*;
use rustc_hash::FxHashMap;

/// Encode a program into a sealed container (HMLC, or HMLB when
/// `compress`).
pub fn encode(program: &Program, compress: bool) -> Vec<u8> {
    let mut encoder = Encoder::new();
    let mut body = Vec::new();
    encoder.write_u32(&mut body, program.statements.len() as u32);
    for stmt in &program.statements {
        encoder.write_stmt(&mut body, stmt);
    }

    // String table first, then the statement table.
    let mut assembled = Vec::new();
    encoder.write_u32(&mut assembled, encoder.strings.len() as u32);
    for s in &encoder.strings {
        let bytes = s.as_bytes();
        assembled.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        assembled.extend_from_slice(bytes);
    }
    assembled.extend_from_slice(&body);
    super::seal_container(assembled, compress)
}

struct Encoder {
    strings: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            strings: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    fn write_u8(&mut self, out: &mut Vec<u8>, v: u8) {
        out.push(v);
    }

    fn write_u32(&mut self, out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, out: &mut Vec<u8>, v: u64) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn write_i64(&mut self, out: &mut Vec<u8>, v: i64) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn write_f64(&mut self, out: &mut Vec<u8>, v: f64) {
        out.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    fn write_str(&mut self, out: &mut Vec<u8>, s: &str) {
        let idx = self.intern(s);
        self.write_u32(out, idx);
    }

    fn write_opt_str(&mut self, out: &mut Vec<u8>, s: &Option<String>) {
        match s {
            Some(s) => {
                self.write_u8(out, 1);
                self.write_str(out, s);
            }
            None => self.write_u8(out, 0),
        }
    }

    fn write_opt_ty(&mut self, out: &mut Vec<u8>, ty: &Option<TypeAnn>) {
        match ty {
            Some(ty) => {
                self.write_u8(out, 1);
                self.write_ty(out, ty);
            }
            None => self.write_u8(out, 0),
        }
    }

    fn write_opt_expr(&mut self, out: &mut Vec<u8>, expr: &Option<Expr>) {
        match expr {
            Some(expr) => {
                self.write_u8(out, 1);
                self.write_expr(out, expr);
            }
            None => self.write_u8(out, 0),
        }
    }

    fn write_block(&mut self, out: &mut Vec<u8>, body: &[Stmt]) {
        self.write_u32(out, body.len() as u32);
        for stmt in body {
            self.write_stmt(out, stmt);
        }
    }

    fn write_opt_block(&mut self, out: &mut Vec<u8>, body: &Option<Vec<Stmt>>) {
        match body {
            Some(body) => {
                self.write_u8(out, 1);
                self.write_block(out, body);
            }
            None => self.write_u8(out, 0),
        }
    }

    // ------------------------------------------------------------------
    // Leaf enums
    // ------------------------------------------------------------------

    fn write_ty(&mut self, out: &mut Vec<u8>, ty: &TypeAnn) {
        let tag = match ty {
            TypeAnn::I8 => 0,
            TypeAnn::I16 => 1,
            TypeAnn::I32 => 2,
            TypeAnn::I64 => 3,
            TypeAnn::U8 => 4,
            TypeAnn::U16 => 5,
            TypeAnn::U32 => 6,
            TypeAnn::U64 => 7,
            TypeAnn::F32 => 8,
            TypeAnn::F64 => 9,
            TypeAnn::Bool => 10,
            TypeAnn::Str => 11,
            TypeAnn::Rune => 12,
            TypeAnn::Array => 13,
            TypeAnn::Object => 14,
            TypeAnn::Buffer => 15,
            TypeAnn::Ptr => 16,
            TypeAnn::Any => 17,
            TypeAnn::Named(_) => 18,
        };
        self.write_u8(out, tag);
        if let TypeAnn::Named(name) = ty {
            self.write_str(out, name);
        }
    }

    fn write_binary_op(&mut self, out: &mut Vec<u8>, op: BinaryOp) {
        let tag = match op {
            BinaryOp::Add => 0,
            BinaryOp::Sub => 1,
            BinaryOp::Mul => 2,
            BinaryOp::Div => 3,
            BinaryOp::Mod => 4,
            BinaryOp::Eq => 5,
            BinaryOp::Ne => 6,
            BinaryOp::Lt => 7,
            BinaryOp::Le => 8,
            BinaryOp::Gt => 9,
            BinaryOp::Ge => 10,
            BinaryOp::BitAnd => 11,
            BinaryOp::BitOr => 12,
            BinaryOp::BitXor => 13,
            BinaryOp::Shl => 14,
            BinaryOp::Shr => 15,
            BinaryOp::And => 16,
            BinaryOp::Or => 17,
        };
        self.write_u8(out, tag);
    }

    fn write_literal(&mut self, out: &mut Vec<u8>, literal: &Literal) {
        match literal {
            Literal::Null => self.write_u8(out, 0),
            Literal::Bool(b) => {
                self.write_u8(out, 1);
                self.write_u8(out, *b as u8);
            }
            Literal::Int(n) => {
                self.write_u8(out, 2);
                self.write_u64(out, *n);
            }
            Literal::Float(f) => {
                self.write_u8(out, 3);
                self.write_f64(out, *f);
            }
            Literal::Str(s) => {
                self.write_u8(out, 4);
                self.write_str(out, s);
            }
            Literal::Rune(c) => {
                self.write_u8(out, 5);
                self.write_u32(out, *c as u32);
            }
        }
    }

    fn write_function(&mut self, out: &mut Vec<u8>, func: &FunctionLit) {
        self.write_u8(out, func.is_async as u8);
        self.write_str(out, &func.name);
        self.write_u32(out, func.params.len() as u32);
        for param in &func.params {
            self.write_str(out, &param.name);
            self.write_opt_ty(out, &param.ty);
            self.write_opt_expr(out, &param.default);
        }
        self.write_opt_ty(out, &func.return_ty);
        self.write_block(out, &func.body);
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn write_expr(&mut self, out: &mut Vec<u8>, expr: &Expr) {
        match expr {
            Expr::Literal { value, line } => {
                self.write_u8(out, 0);
                self.write_literal(out, value);
                self.write_u32(out, *line);
            }
            Expr::Ident { name, line } => {
                self.write_u8(out, 1);
                self.write_str(out, name);
                self.write_u32(out, *line);
            }
            Expr::Binary { op, lhs, rhs, line } => {
                self.write_u8(out, 2);
                self.write_binary_op(out, *op);
                self.write_expr(out, lhs);
                self.write_expr(out, rhs);
                self.write_u32(out, *line);
            }
            Expr::Unary { op, operand, line } => {
                self.write_u8(out, 3);
                self.write_u8(
                    out,
                    match op {
                        UnaryOp::Not => 0,
                        UnaryOp::Neg => 1,
                        UnaryOp::BitNot => 2,
                    },
                );
                self.write_expr(out, operand);
                self.write_u32(out, *line);
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                line,
            } => {
                self.write_u8(out, 4);
                self.write_expr(out, cond);
                self.write_expr(out, then_expr);
                self.write_expr(out, else_expr);
                self.write_u32(out, *line);
            }
            Expr::Coalesce { lhs, rhs, line } => {
                self.write_u8(out, 5);
                self.write_expr(out, lhs);
                self.write_expr(out, rhs);
                self.write_u32(out, *line);
            }
            Expr::OptChain { target, link, line } => {
                self.write_u8(out, 6);
                self.write_expr(out, target);
                match link {
                    OptChainLink::Property(name) => {
                        self.write_u8(out, 0);
                        self.write_str(out, name);
                    }
                    OptChainLink::Index(index) => {
                        self.write_u8(out, 1);
                        self.write_expr(out, index);
                    }
                    OptChainLink::Call(args) => {
                        self.write_u8(out, 2);
                        self.write_u32(out, args.len() as u32);
                        for arg in args {
                            self.write_expr(out, arg);
                        }
                    }
                }
                self.write_u32(out, *line);
            }
            Expr::Assign {
                target,
                value,
                line,
            } => {
                self.write_u8(out, 7);
                self.write_expr(out, target);
                self.write_expr(out, value);
                self.write_u32(out, *line);
            }
            Expr::IncDec {
                target,
                is_increment,
                is_prefix,
                line,
            } => {
                self.write_u8(out, 8);
                self.write_expr(out, target);
                self.write_u8(out, *is_increment as u8);
                self.write_u8(out, *is_prefix as u8);
                self.write_u32(out, *line);
            }
            Expr::Call { callee, args, line } => {
                self.write_u8(out, 9);
                self.write_expr(out, callee);
                self.write_u32(out, args.len() as u32);
                for arg in args {
                    self.write_expr(out, arg);
                }
                self.write_u32(out, *line);
            }
            Expr::Property { target, name, line } => {
                self.write_u8(out, 10);
                self.write_expr(out, target);
                self.write_str(out, name);
                self.write_u32(out, *line);
            }
            Expr::Index {
                target,
                index,
                line,
            } => {
                self.write_u8(out, 11);
                self.write_expr(out, target);
                self.write_expr(out, index);
                self.write_u32(out, *line);
            }
            Expr::ObjectLit { fields, line } => {
                self.write_u8(out, 12);
                self.write_u32(out, fields.len() as u32);
                for (name, value) in fields {
                    self.write_str(out, name);
                    self.write_expr(out, value);
                }
                self.write_u32(out, *line);
            }
            Expr::ArrayLit { elements, line } => {
                self.write_u8(out, 13);
                self.write_u32(out, elements.len() as u32);
                for element in elements {
                    self.write_expr(out, element);
                }
                self.write_u32(out, *line);
            }
            Expr::Function { func, line } => {
                self.write_u8(out, 14);
                self.write_function(out, func);
                self.write_u32(out, *line);
            }
            Expr::Interp { parts, line } => {
                self.write_u8(out, 15);
                self.write_u32(out, parts.len() as u32);
                for part in parts {
                    match part {
                        InterpPart::Literal(s) => {
                            self.write_u8(out, 0);
                            self.write_str(out, s);
                        }
                        InterpPart::Expr(expr) => {
                            self.write_u8(out, 1);
                            self.write_expr(out, expr);
                        }
                    }
                }
                self.write_u32(out, *line);
            }
            Expr::Await { task, line } => {
                self.write_u8(out, 16);
                self.write_expr(out, task);
                self.write_u32(out, *line);
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn write_stmt(&mut self, out: &mut Vec<u8>, stmt: &Stmt) {
        match stmt {
            Stmt::Let {
                name,
                ty,
                init,
                is_const,
                line,
            } => {
                self.write_u8(out, 0);
                self.write_str(out, name);
                self.write_opt_ty(out, ty);
                self.write_opt_expr(out, init);
                self.write_u8(out, *is_const as u8);
                self.write_u32(out, *line);
            }
            Stmt::Expression { expr, line } => {
                self.write_u8(out, 1);
                self.write_expr(out, expr);
                self.write_u32(out, *line);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                line,
            } => {
                self.write_u8(out, 2);
                self.write_expr(out, cond);
                self.write_block(out, then_block);
                self.write_opt_block(out, else_block);
                self.write_u32(out, *line);
            }
            Stmt::While { cond, body, line } => {
                self.write_u8(out, 3);
                self.write_expr(out, cond);
                self.write_block(out, body);
                self.write_u32(out, *line);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                line,
            } => {
                self.write_u8(out, 4);
                match init {
                    Some(init) => {
                        self.write_u8(out, 1);
                        self.write_stmt(out, init);
                    }
                    None => self.write_u8(out, 0),
                }
                self.write_opt_expr(out, cond);
                self.write_opt_expr(out, step);
                self.write_block(out, body);
                self.write_u32(out, *line);
            }
            Stmt::ForIn {
                first,
                second,
                iterable,
                body,
                line,
            } => {
                self.write_u8(out, 5);
                self.write_str(out, first);
                self.write_opt_str(out, second);
                self.write_expr(out, iterable);
                self.write_block(out, body);
                self.write_u32(out, *line);
            }
            Stmt::Break { line } => {
                self.write_u8(out, 6);
                self.write_u32(out, *line);
            }
            Stmt::Continue { line } => {
                self.write_u8(out, 7);
                self.write_u32(out, *line);
            }
            Stmt::Return { value, line } => {
                self.write_u8(out, 8);
                self.write_opt_expr(out, value);
                self.write_u32(out, *line);
            }
            Stmt::Block { body, line } => {
                self.write_u8(out, 9);
                self.write_block(out, body);
                self.write_u32(out, *line);
            }
            Stmt::DefineObject { name, fields, line } => {
                self.write_u8(out, 10);
                self.write_str(out, name);
                self.write_u32(out, fields.len() as u32);
                for field in fields {
                    self.write_str(out, &field.name);
                    self.write_opt_ty(out, &field.ty);
                    self.write_opt_expr(out, &field.default);
                }
                self.write_u32(out, *line);
            }
            Stmt::Enum {
                name,
                variants,
                line,
            } => {
                self.write_u8(out, 11);
                self.write_str(out, name);
                self.write_u32(out, variants.len() as u32);
                for (vname, value) in variants {
                    self.write_str(out, vname);
                    match value {
                        Some(value) => {
                            self.write_u8(out, 1);
                            self.write_i64(out, *value);
                        }
                        None => self.write_u8(out, 0),
                    }
                }
                self.write_u32(out, *line);
            }
            Stmt::Try {
                try_block,
                catch_name,
                catch_block,
                finally_block,
                line,
            } => {
                self.write_u8(out, 12);
                self.write_block(out, try_block);
                self.write_opt_str(out, catch_name);
                self.write_opt_block(out, catch_block);
                self.write_opt_block(out, finally_block);
                self.write_u32(out, *line);
            }
            Stmt::Throw { value, line } => {
                self.write_u8(out, 13);
                self.write_expr(out, value);
                self.write_u32(out, *line);
            }
            Stmt::Switch {
                discriminant,
                cases,
                line,
            } => {
                self.write_u8(out, 14);
                self.write_expr(out, discriminant);
                self.write_u32(out, cases.len() as u32);
                for case in cases {
                    self.write_opt_expr(out, &case.test);
                    self.write_block(out, &case.body);
                    self.write_u32(out, case.line);
                }
                self.write_u32(out, *line);
            }
            Stmt::Defer { call, line } => {
                self.write_u8(out, 15);
                self.write_expr(out, call);
                self.write_u32(out, *line);
            }
            Stmt::Import { form, path, line } => {
                self.write_u8(out, 16);
                match form {
                    ImportForm::Named(names) => {
                        self.write_u8(out, 0);
                        self.write_import_names(out, names);
                    }
                    ImportForm::Namespace(name) => {
                        self.write_u8(out, 1);
                        self.write_str(out, name);
                    }
                }
                self.write_str(out, path);
                self.write_u32(out, *line);
            }
            Stmt::ExternFn {
                name,
                params,
                return_ty,
                library,
                line,
            } => {
                self.write_u8(out, 17);
                self.write_str(out, name);
                self.write_u32(out, params.len() as u32);
                for (pname, ty) in params {
                    self.write_str(out, pname);
                    self.write_ty(out, ty);
                }
                self.write_ty(out, return_ty);
                self.write_str(out, library);
                self.write_u32(out, *line);
            }
            Stmt::Export { decl, line } => {
                self.write_u8(out, 18);
                self.write_stmt(out, decl);
                self.write_u32(out, *line);
            }
            Stmt::ExportFrom { names, path, line } => {
                self.write_u8(out, 19);
                self.write_import_names(out, names);
                self.write_str(out, path);
                self.write_u32(out, *line);
            }
        }
    }

    fn write_import_names(&mut self, out: &mut Vec<u8>, names: &[(String, Option<String>)]) {
        self.write_u32(out, names.len() as u32);
        for (name, rename) in names {
            self.write_str(out, name);
            self.write_opt_str(out, rename);
        }
    }
}
