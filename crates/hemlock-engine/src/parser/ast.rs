//! Abstract Syntax Tree (AST) for the Hemlock programming language.
//!
//! This module defines the shape the parser emits and the evaluator walks:
//! - Program structure (a flat list of statements)
//! - Statements (declarations, control flow, modules, concurrency guards)
//! - Expressions (literals, operators, calls, property/index chains)
//! - Type annotations
//!
//! Every node carries a source line for stack traces and diagnostics.

/// Root node: a Hemlock source file (module).
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level statements (declarations, imports, exports)
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    /// Integer literal. Fits-in-i32 literals evaluate as `i32`, then `i64`,
    /// then `u64` as magnitude requires.
    Int(u64),
    Float(f64),
    Str(String),
    Rune(char),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    And,
    Or,
}

impl BinaryOp {
    /// Surface syntax for diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical not (`!`)
    Not,
    /// Arithmetic negation (`-`)
    Neg,
    /// Bitwise not (`~`)
    BitNot,
}

/// The trailing link of an optional chain (`?.`).
#[derive(Debug, Clone, PartialEq)]
pub enum OptChainLink {
    Property(String),
    Index(Box<Expr>),
    Call(Vec<Expr>),
}

/// One piece of an interpolated string: alternating literal text and
/// embedded sub-expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpPart {
    Literal(String),
    Expr(Expr),
}

/// A function parameter: name, optional type annotation, optional default.
///
/// Default expressions are carried unevaluated and run in the callee
/// environment when the argument is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeAnn>,
    pub default: Option<Expr>,
}

/// A function literal (also the desugar target of `fn name(...) {}`).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLit {
    pub is_async: bool,
    pub params: Vec<Param>,
    pub return_ty: Option<TypeAnn>,
    pub body: Vec<Stmt>,
    /// Name for stack traces; `<anonymous>` for bare literals.
    pub name: String,
}

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        value: Literal,
        line: u32,
    },
    Ident {
        name: String,
        line: u32,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        line: u32,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        line: u32,
    },
    /// `cond ? then : else` — exactly one branch evaluates.
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        line: u32,
    },
    /// `lhs ?? rhs` — rhs evaluates only when lhs is null.
    Coalesce {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        line: u32,
    },
    /// `target?.name` / `target?.[idx]` / `target?.(args)` — short-circuits
    /// to null when the receiver is null.
    OptChain {
        target: Box<Expr>,
        link: OptChainLink,
        line: u32,
    },
    /// Assignment to an identifier, index, or property target.
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        line: u32,
    },
    /// Pre/post `++`/`--`. Reads, applies ±1 preserving the numeric type,
    /// writes back; yields the old (postfix) or new (prefix) value.
    IncDec {
        target: Box<Expr>,
        is_increment: bool,
        is_prefix: bool,
        line: u32,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        line: u32,
    },
    Property {
        target: Box<Expr>,
        name: String,
        line: u32,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        line: u32,
    },
    ObjectLit {
        fields: Vec<(String, Expr)>,
        line: u32,
    },
    ArrayLit {
        elements: Vec<Expr>,
        line: u32,
    },
    Function {
        func: Box<FunctionLit>,
        line: u32,
    },
    Interp {
        parts: Vec<InterpPart>,
        line: u32,
    },
    /// `await task` — sugar for joining the task handle.
    Await {
        task: Box<Expr>,
        line: u32,
    },
}

impl Expr {
    /// The source line this expression starts on.
    pub fn line(&self) -> u32 {
        match self {
            Expr::Literal { line, .. }
            | Expr::Ident { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Unary { line, .. }
            | Expr::Ternary { line, .. }
            | Expr::Coalesce { line, .. }
            | Expr::OptChain { line, .. }
            | Expr::Assign { line, .. }
            | Expr::IncDec { line, .. }
            | Expr::Call { line, .. }
            | Expr::Property { line, .. }
            | Expr::Index { line, .. }
            | Expr::ObjectLit { line, .. }
            | Expr::ArrayLit { line, .. }
            | Expr::Function { line, .. }
            | Expr::Interp { line, .. }
            | Expr::Await { line, .. } => *line,
        }
    }
}

/// Type annotations as they appear in source (`let x: i32`, parameter and
/// return positions, `define` fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnn {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    Rune,
    Array,
    Object,
    Buffer,
    Ptr,
    Any,
    /// A nominal type introduced by `define`.
    Named(String),
}

impl TypeAnn {
    /// Parse an annotation name. Unknown names become `Named` and resolve
    /// against `define` declarations at conversion time.
    pub fn from_name(name: &str) -> TypeAnn {
        match name {
            "i8" => TypeAnn::I8,
            "i16" => TypeAnn::I16,
            "i32" => TypeAnn::I32,
            "i64" => TypeAnn::I64,
            "u8" => TypeAnn::U8,
            "u16" => TypeAnn::U16,
            "u32" => TypeAnn::U32,
            "u64" => TypeAnn::U64,
            "f32" => TypeAnn::F32,
            "f64" => TypeAnn::F64,
            "bool" => TypeAnn::Bool,
            "string" => TypeAnn::Str,
            "rune" => TypeAnn::Rune,
            "array" => TypeAnn::Array,
            "object" => TypeAnn::Object,
            "buffer" => TypeAnn::Buffer,
            "ptr" => TypeAnn::Ptr,
            "any" => TypeAnn::Any,
            other => TypeAnn::Named(other.to_string()),
        }
    }

    /// Surface name for diagnostics.
    pub fn name(&self) -> &str {
        match self {
            TypeAnn::I8 => "i8",
            TypeAnn::I16 => "i16",
            TypeAnn::I32 => "i32",
            TypeAnn::I64 => "i64",
            TypeAnn::U8 => "u8",
            TypeAnn::U16 => "u16",
            TypeAnn::U32 => "u32",
            TypeAnn::U64 => "u64",
            TypeAnn::F32 => "f32",
            TypeAnn::F64 => "f64",
            TypeAnn::Bool => "bool",
            TypeAnn::Str => "string",
            TypeAnn::Rune => "rune",
            TypeAnn::Array => "array",
            TypeAnn::Object => "object",
            TypeAnn::Buffer => "buffer",
            TypeAnn::Ptr => "ptr",
            TypeAnn::Any => "any",
            TypeAnn::Named(name) => name,
        }
    }
}

/// A field in a `define` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: Option<TypeAnn>,
    /// Optional fields get their default injected when absent at the
    /// conversion point.
    pub default: Option<Expr>,
}

/// One arm of a `switch`. `test: None` is the `default` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
    pub line: u32,
}

/// The binding form of an `import` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportForm {
    /// `import { a, b as c } from "path"` — (exported name, local rename)
    Named(Vec<(String, Option<String>)>),
    /// `import * as N from "path"`
    Namespace(String),
}

/// Statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let`/`const` declaration, with optional annotation.
    Let {
        name: String,
        ty: Option<TypeAnn>,
        init: Option<Expr>,
        is_const: bool,
        line: u32,
    },
    Expression {
        expr: Expr,
        line: u32,
    },
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
        line: u32,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        line: u32,
    },
    /// C-style `for (init; cond; step)`.
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
        line: u32,
    },
    /// `for (v in xs)` / `for (v, i in xs)` over arrays, objects, strings.
    ForIn {
        first: String,
        second: Option<String>,
        iterable: Expr,
        body: Vec<Stmt>,
        line: u32,
    },
    Break {
        line: u32,
    },
    Continue {
        line: u32,
    },
    Return {
        value: Option<Expr>,
        line: u32,
    },
    Block {
        body: Vec<Stmt>,
        line: u32,
    },
    /// `define T { field: ty = default, ... }` — nominal structural type.
    DefineObject {
        name: String,
        fields: Vec<FieldDef>,
        line: u32,
    },
    /// `enum E { A, B = 5, C }` — integer-valued variants.
    Enum {
        name: String,
        variants: Vec<(String, Option<i64>)>,
        line: u32,
    },
    Try {
        try_block: Vec<Stmt>,
        catch_name: Option<String>,
        catch_block: Option<Vec<Stmt>>,
        finally_block: Option<Vec<Stmt>>,
        line: u32,
    },
    Throw {
        value: Expr,
        line: u32,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
        line: u32,
    },
    /// `defer call(...)` — scheduled on the enclosing function's exit, LIFO.
    Defer {
        call: Expr,
        line: u32,
    },
    Import {
        form: ImportForm,
        path: String,
        line: u32,
    },
    /// `extern fn name(params): ret from "library"` — FFI binding.
    ExternFn {
        name: String,
        params: Vec<(String, TypeAnn)>,
        return_ty: TypeAnn,
        library: String,
        line: u32,
    },
    /// `export <let|const|fn declaration>`
    Export {
        decl: Box<Stmt>,
        line: u32,
    },
    /// `export { a, b as c } from "path"` — re-export.
    ExportFrom {
        names: Vec<(String, Option<String>)>,
        path: String,
        line: u32,
    },
}

impl Stmt {
    /// The source line this statement starts on.
    pub fn line(&self) -> u32 {
        match self {
            Stmt::Let { line, .. }
            | Stmt::Expression { line, .. }
            | Stmt::If { line, .. }
            | Stmt::While { line, .. }
            | Stmt::For { line, .. }
            | Stmt::ForIn { line, .. }
            | Stmt::Break { line }
            | Stmt::Continue { line }
            | Stmt::Return { line, .. }
            | Stmt::Block { line, .. }
            | Stmt::DefineObject { line, .. }
            | Stmt::Enum { line, .. }
            | Stmt::Try { line, .. }
            | Stmt::Throw { line, .. }
            | Stmt::Switch { line, .. }
            | Stmt::Defer { line, .. }
            | Stmt::Import { line, .. }
            | Stmt::ExternFn { line, .. }
            | Stmt::Export { line, .. }
            | Stmt::ExportFrom { line, .. } => *line,
        }
    }
}
