//! Recursive-descent parser for the Hemlock programming language.
//!
//! Consumes the token stream produced by [`HmlLexer`] and builds the AST
//! defined in [`crate::parser::ast`]. Expression parsing is precedence
//! climbing; statements are dispatched on their leading keyword.

use crate::parser::ast::*;
use crate::parser::lexer::HmlLexer;
use crate::parser::token::{Span, StringPart, Token};
use thiserror::Error;

/// A syntax error with source position.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }
}

/// Parse a complete source file into a [`Program`].
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = HmlLexer::new(source).tokenize().map_err(|e| ParseError {
        message: e.message,
        line: e.line,
        column: e.column,
    })?;
    Parser::new(tokens).parse_program()
}

/// Parser state over a token stream.
pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse the whole token stream as a program.
    pub fn parse_program(&mut self) -> PResult<Program> {
        let mut statements = Vec::new();
        while !self.at_end() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program::new(statements))
    }

    /// Parse a standalone expression from raw source, used for string
    /// interpolation holes and the REPL.
    pub fn parse_expression_source(source: &str, line: u32) -> PResult<Expr> {
        let tokens = HmlLexer::new(source).tokenize().map_err(|e| ParseError {
            message: e.message,
            line,
            column: e.column,
        })?;
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_expression()?;
        if !parser.at_end() {
            let span = parser.current_span();
            return Err(ParseError::new("unexpected trailing input in expression", span));
        }
        // Interpolation holes report the line of the enclosing string.
        Ok(reline(expr, line))
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, s)| *s)
            .unwrap_or_else(|| Span::synthetic(1))
    }

    fn line(&self) -> u32 {
        self.current_span().line
    }

    fn advance(&mut self) -> Option<(Token, Span)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, context: &str) -> PResult<Span> {
        match self.tokens.get(self.pos) {
            Some((t, span)) if t == token => {
                let span = *span;
                self.pos += 1;
                Ok(span)
            }
            Some((t, span)) => Err(ParseError::new(
                format!("expected {:?} {} but found {}", token, context, t.describe()),
                *span,
            )),
            None => Err(ParseError::new(
                format!("expected {:?} {} but reached end of input", token, context),
                self.current_span(),
            )),
        }
    }

    fn expect_ident(&mut self, context: &str) -> PResult<(String, Span)> {
        match self.advance() {
            Some((Token::Ident(name), span)) => Ok((name, span)),
            Some((t, span)) => Err(ParseError::new(
                format!("expected identifier {} but found {}", context, t.describe()),
                span,
            )),
            None => Err(ParseError::new(
                format!("expected identifier {} but reached end of input", context),
                self.current_span(),
            )),
        }
    }

    /// Statement terminator: a `;`, or leniently the end of the enclosing
    /// block or input.
    fn expect_semicolon(&mut self) -> PResult<()> {
        if self.eat(&Token::Semicolon) {
            return Ok(());
        }
        match self.peek() {
            None | Some(Token::RBrace) => Ok(()),
            Some(t) => {
                let desc = t.describe();
                Err(ParseError::new(
                    format!("expected `;` but found {}", desc),
                    self.current_span(),
                ))
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_statement(&mut self) -> PResult<Stmt> {
        match self.peek() {
            Some(Token::Let) => self.parse_let(false),
            Some(Token::Const) => self.parse_let(true),
            Some(Token::Fn) if matches!(self.peek_at(1), Some(Token::Ident(_))) => {
                self.parse_fn_declaration(false)
            }
            Some(Token::Async)
                if self.peek_at(1) == Some(&Token::Fn)
                    && matches!(self.peek_at(2), Some(Token::Ident(_))) =>
            {
                self.parse_fn_declaration(true)
            }
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::For) => self.parse_for(),
            Some(Token::Break) => {
                let line = self.line();
                self.advance();
                self.expect_semicolon()?;
                Ok(Stmt::Break { line })
            }
            Some(Token::Continue) => {
                let line = self.line();
                self.advance();
                self.expect_semicolon()?;
                Ok(Stmt::Continue { line })
            }
            Some(Token::Return) => self.parse_return(),
            Some(Token::LBrace) => {
                let line = self.line();
                let body = self.parse_block()?;
                Ok(Stmt::Block { body, line })
            }
            Some(Token::Define) => self.parse_define(),
            Some(Token::Enum) => self.parse_enum(),
            Some(Token::Try) => self.parse_try(),
            Some(Token::Throw) => {
                let line = self.line();
                self.advance();
                let value = self.parse_expression()?;
                self.expect_semicolon()?;
                Ok(Stmt::Throw { value, line })
            }
            Some(Token::Switch) => self.parse_switch(),
            Some(Token::Defer) => self.parse_defer(),
            Some(Token::Import) => self.parse_import(),
            Some(Token::Export) => self.parse_export(),
            Some(Token::Extern) => self.parse_extern_fn(),
            _ => {
                let line = self.line();
                let expr = self.parse_expression()?;
                self.expect_semicolon()?;
                Ok(Stmt::Expression { expr, line })
            }
        }
    }

    fn parse_let(&mut self, is_const: bool) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // let / const
        let (name, _) = self.expect_ident("after `let`")?;
        let ty = if self.eat(&Token::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.eat(&Token::Eq) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_semicolon()?;
        Ok(Stmt::Let {
            name,
            ty,
            init,
            is_const,
            line,
        })
    }

    /// `fn name(params) { ... }` desugars to `let name = fn(params) { ... };`
    fn parse_fn_declaration(&mut self, is_async: bool) -> PResult<Stmt> {
        let line = self.line();
        if is_async {
            self.advance(); // async
        }
        self.advance(); // fn
        let (name, _) = self.expect_ident("after `fn`")?;
        let func = self.parse_fn_tail(is_async, name.clone())?;
        Ok(Stmt::Let {
            name,
            ty: None,
            init: Some(Expr::Function {
                func: Box::new(func),
                line,
            }),
            is_const: false,
            line,
        })
    }

    /// Parameter list, optional return annotation, and body. The `fn`
    /// keyword and any name have already been consumed.
    fn parse_fn_tail(&mut self, is_async: bool, name: String) -> PResult<FunctionLit> {
        self.expect(&Token::LParen, "to open parameter list")?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let (pname, _) = self.expect_ident("as parameter name")?;
                let ty = if self.eat(&Token::Colon) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                let default = if self.eat(&Token::Eq) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                params.push(Param {
                    name: pname,
                    ty,
                    default,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "to close parameter list")?;
        let return_ty = if self.eat(&Token::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(FunctionLit {
            is_async,
            params,
            return_ty,
            body,
            name,
        })
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // if
        self.expect(&Token::LParen, "after `if`")?;
        let cond = self.parse_expression()?;
        self.expect(&Token::RParen, "after `if` condition")?;
        let then_block = self.parse_block_or_stmt()?;
        let else_block = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block_or_stmt()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            line,
        })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // while
        self.expect(&Token::LParen, "after `while`")?;
        let cond = self.parse_expression()?;
        self.expect(&Token::RParen, "after `while` condition")?;
        let body = self.parse_block_or_stmt()?;
        Ok(Stmt::While { cond, body, line })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // for
        self.expect(&Token::LParen, "after `for`")?;

        // for-in: `for (v in xs)` / `for (v, i in xs)`
        let is_for_in = matches!(self.peek(), Some(Token::Ident(_)))
            && (self.peek_at(1) == Some(&Token::In)
                || (self.peek_at(1) == Some(&Token::Comma)
                    && matches!(self.peek_at(2), Some(Token::Ident(_)))
                    && self.peek_at(3) == Some(&Token::In)));
        if is_for_in {
            let (first, _) = self.expect_ident("as loop variable")?;
            let second = if self.eat(&Token::Comma) {
                Some(self.expect_ident("as secondary loop variable")?.0)
            } else {
                None
            };
            self.expect(&Token::In, "in for-in loop")?;
            let iterable = self.parse_expression()?;
            self.expect(&Token::RParen, "after for-in header")?;
            let body = self.parse_block_or_stmt()?;
            return Ok(Stmt::ForIn {
                first,
                second,
                iterable,
                body,
                line,
            });
        }

        // C-style: `for (init; cond; step)`
        let init = if self.eat(&Token::Semicolon) {
            None
        } else if self.check(&Token::Let) || self.check(&Token::Const) {
            let is_const = self.check(&Token::Const);
            Some(Box::new(self.parse_let(is_const)?))
        } else {
            let init_line = self.line();
            let expr = self.parse_expression()?;
            self.expect(&Token::Semicolon, "after for-loop initializer")?;
            Some(Box::new(Stmt::Expression {
                expr,
                line: init_line,
            }))
        };
        let cond = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&Token::Semicolon, "after for-loop condition")?;
        let step = if self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&Token::RParen, "after for-loop header")?;
        let body = self.parse_block_or_stmt()?;
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
            line,
        })
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // return
        let value = if self.check(&Token::Semicolon) || self.check(&Token::RBrace) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_semicolon()?;
        Ok(Stmt::Return { value, line })
    }

    fn parse_define(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // define
        let (name, _) = self.expect_ident("after `define`")?;
        self.expect(&Token::LBrace, "to open `define` body")?;
        let mut fields = Vec::new();
        while !self.check(&Token::RBrace) {
            let (fname, _) = self.expect_ident("as field name")?;
            let ty = if self.eat(&Token::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            let default = if self.eat(&Token::Eq) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            fields.push(FieldDef {
                name: fname,
                ty,
                default,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace, "to close `define` body")?;
        Ok(Stmt::DefineObject { name, fields, line })
    }

    fn parse_enum(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // enum
        let (name, _) = self.expect_ident("after `enum`")?;
        self.expect(&Token::LBrace, "to open `enum` body")?;
        let mut variants = Vec::new();
        while !self.check(&Token::RBrace) {
            let (vname, span) = self.expect_ident("as enum variant")?;
            let value = if self.eat(&Token::Eq) {
                let negative = self.eat(&Token::Minus);
                match self.advance() {
                    Some((Token::Int(n), _)) => {
                        let v = n as i64;
                        Some(if negative { -v } else { v })
                    }
                    _ => {
                        return Err(ParseError::new(
                            "enum variant value must be an integer literal",
                            span,
                        ))
                    }
                }
            } else {
                None
            };
            variants.push((vname, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace, "to close `enum` body")?;
        Ok(Stmt::Enum {
            name,
            variants,
            line,
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // try
        let try_block = self.parse_block()?;
        let mut catch_name = None;
        let mut catch_block = None;
        if self.eat(&Token::Catch) {
            if self.eat(&Token::LParen) {
                let (name, _) = self.expect_ident("as catch parameter")?;
                catch_name = Some(name);
                self.expect(&Token::RParen, "after catch parameter")?;
            }
            catch_block = Some(self.parse_block()?);
        }
        let finally_block = if self.eat(&Token::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catch_block.is_none() && finally_block.is_none() {
            return Err(ParseError::new(
                "`try` requires at least one of `catch` or `finally`",
                self.current_span(),
            ));
        }
        Ok(Stmt::Try {
            try_block,
            catch_name,
            catch_block,
            finally_block,
            line,
        })
    }

    fn parse_switch(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // switch
        self.expect(&Token::LParen, "after `switch`")?;
        let discriminant = self.parse_expression()?;
        self.expect(&Token::RParen, "after `switch` discriminant")?;
        self.expect(&Token::LBrace, "to open `switch` body")?;
        let mut cases = Vec::new();
        while !self.check(&Token::RBrace) {
            let case_line = self.line();
            let test = if self.eat(&Token::Case) {
                let test = self.parse_expression()?;
                self.expect(&Token::Colon, "after `case` value")?;
                Some(test)
            } else if self.eat(&Token::Default) {
                self.expect(&Token::Colon, "after `default`")?;
                None
            } else {
                return Err(ParseError::new(
                    "expected `case` or `default` in switch body",
                    self.current_span(),
                ));
            };
            let mut body = Vec::new();
            while !matches!(
                self.peek(),
                None | Some(Token::Case) | Some(Token::Default) | Some(Token::RBrace)
            ) {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase {
                test,
                body,
                line: case_line,
            });
        }
        self.expect(&Token::RBrace, "to close `switch` body")?;
        Ok(Stmt::Switch {
            discriminant,
            cases,
            line,
        })
    }

    fn parse_defer(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // defer
        let call = self.parse_expression()?;
        if !matches!(call, Expr::Call { .. } | Expr::OptChain { .. }) {
            return Err(ParseError::new(
                "`defer` requires a call expression",
                self.current_span(),
            ));
        }
        self.expect_semicolon()?;
        Ok(Stmt::Defer { call, line })
    }

    fn parse_import(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // import
        let form = if self.eat(&Token::Star) {
            self.expect(&Token::As, "after `import *`")?;
            let (name, _) = self.expect_ident("as namespace name")?;
            ImportForm::Namespace(name)
        } else {
            self.expect(&Token::LBrace, "after `import`")?;
            let names = self.parse_import_names()?;
            self.expect(&Token::RBrace, "to close import list")?;
            ImportForm::Named(names)
        };
        self.expect(&Token::From, "in import statement")?;
        let path = self.parse_string_literal("as module path")?;
        self.expect_semicolon()?;
        Ok(Stmt::Import { form, path, line })
    }

    fn parse_import_names(&mut self) -> PResult<Vec<(String, Option<String>)>> {
        let mut names = Vec::new();
        loop {
            let (name, _) = self.expect_ident("in import list")?;
            let rename = if self.eat(&Token::As) {
                Some(self.expect_ident("after `as`")?.0)
            } else {
                None
            };
            names.push((name, rename));
            if !self.eat(&Token::Comma) {
                break;
            }
            if self.check(&Token::RBrace) {
                break;
            }
        }
        Ok(names)
    }

    fn parse_export(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // export
        if self.check(&Token::LBrace) {
            self.advance();
            let names = self.parse_import_names()?;
            self.expect(&Token::RBrace, "to close export list")?;
            self.expect(&Token::From, "in re-export statement")?;
            let path = self.parse_string_literal("as module path")?;
            self.expect_semicolon()?;
            return Ok(Stmt::ExportFrom { names, path, line });
        }
        let decl = match self.peek() {
            Some(Token::Let) => self.parse_let(false)?,
            Some(Token::Const) => self.parse_let(true)?,
            Some(Token::Fn) => self.parse_fn_declaration(false)?,
            Some(Token::Async) => self.parse_fn_declaration(true)?,
            _ => {
                return Err(ParseError::new(
                    "`export` must precede a `let`, `const`, or `fn` declaration",
                    self.current_span(),
                ))
            }
        };
        Ok(Stmt::Export {
            decl: Box::new(decl),
            line,
        })
    }

    fn parse_extern_fn(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance(); // extern
        self.expect(&Token::Fn, "after `extern`")?;
        let (name, _) = self.expect_ident("after `extern fn`")?;
        self.expect(&Token::LParen, "to open extern parameter list")?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let (pname, _) = self.expect_ident("as extern parameter")?;
                self.expect(&Token::Colon, "after extern parameter name")?;
                let ty = self.parse_type()?;
                params.push((pname, ty));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "to close extern parameter list")?;
        self.expect(&Token::Colon, "before extern return type")?;
        let return_ty = self.parse_type()?;
        self.expect(&Token::From, "in extern declaration")?;
        let library = self.parse_string_literal("as library path")?;
        self.expect_semicolon()?;
        Ok(Stmt::ExternFn {
            name,
            params,
            return_ty,
            library,
            line,
        })
    }

    fn parse_string_literal(&mut self, context: &str) -> PResult<String> {
        match self.advance() {
            Some((Token::Str(parts), span)) => match parts.as_slice() {
                [StringPart::Literal(s)] => Ok(s.clone()),
                _ => Err(ParseError::new(
                    format!("expected plain string {} (no interpolation)", context),
                    span,
                )),
            },
            Some((t, span)) => Err(ParseError::new(
                format!("expected string literal {} but found {}", context, t.describe()),
                span,
            )),
            None => Err(ParseError::new(
                format!("expected string literal {}", context),
                self.current_span(),
            )),
        }
    }

    fn parse_type(&mut self) -> PResult<TypeAnn> {
        let (name, _) = self.expect_ident("as type name")?;
        Ok(TypeAnn::from_name(&name))
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&Token::LBrace, "to open block")?;
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(ParseError::new("unclosed block", self.current_span()));
            }
            body.push(self.parse_statement()?);
        }
        self.expect(&Token::RBrace, "to close block")?;
        Ok(body)
    }

    /// A braced block, or a single statement treated as a one-element block.
    fn parse_block_or_stmt(&mut self) -> PResult<Vec<Stmt>> {
        if self.check(&Token::LBrace) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    // ========================================================================
    // Expressions (precedence climbing)
    // ========================================================================

    pub fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let target = self.parse_ternary()?;
        let line = self.line();

        let compound: Option<BinaryOp> = match self.peek() {
            Some(Token::Eq) => None,
            Some(Token::PlusEq) => Some(BinaryOp::Add),
            Some(Token::MinusEq) => Some(BinaryOp::Sub),
            Some(Token::StarEq) => Some(BinaryOp::Mul),
            Some(Token::SlashEq) => Some(BinaryOp::Div),
            Some(Token::PercentEq) => Some(BinaryOp::Mod),
            Some(Token::AmpEq) => Some(BinaryOp::BitAnd),
            Some(Token::PipeEq) => Some(BinaryOp::BitOr),
            Some(Token::CaretEq) => Some(BinaryOp::BitXor),
            Some(Token::ShlEq) => Some(BinaryOp::Shl),
            Some(Token::ShrEq) => Some(BinaryOp::Shr),
            _ => return Ok(target),
        };

        self.assignable(&target)?;
        self.advance(); // the assignment operator
        let rhs = self.parse_assignment()?;
        let value = match compound {
            // `x op= rhs` desugars to `x = x op rhs`; the read side is a
            // clone of the target expression.
            Some(op) => Expr::Binary {
                op,
                lhs: Box::new(target.clone()),
                rhs: Box::new(rhs),
                line,
            },
            None => rhs,
        };
        Ok(Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
            line,
        })
    }

    fn assignable(&self, target: &Expr) -> PResult<()> {
        match target {
            Expr::Ident { .. } | Expr::Index { .. } | Expr::Property { .. } => Ok(()),
            _ => Err(ParseError::new(
                "invalid assignment target",
                self.current_span(),
            )),
        }
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let cond = self.parse_coalesce()?;
        if self.check(&Token::Question) {
            let line = self.line();
            self.advance();
            let then_expr = self.parse_assignment()?;
            self.expect(&Token::Colon, "in ternary expression")?;
            let else_expr = self.parse_assignment()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                line,
            });
        }
        Ok(cond)
    }

    fn parse_coalesce(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_logical_or()?;
        while self.check(&Token::QuestionQuestion) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_logical_or()?;
            lhs = Expr::Coalesce {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_logical_and()?;
        while self.check(&Token::PipePipe) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_logical_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bit_or()?;
        while self.check(&Token::AmpAmp) {
            let line = self.line();
            self.advance();
            let rhs = self.parse_bit_or()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line,
            };
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[(Token::Pipe, BinaryOp::BitOr)],
            Self::parse_bit_xor,
        )
    }

    fn parse_bit_xor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[(Token::Caret, BinaryOp::BitXor)],
            Self::parse_bit_and,
        )
    }

    fn parse_bit_and(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[(Token::Amp, BinaryOp::BitAnd)],
            Self::parse_equality,
        )
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[(Token::EqEq, BinaryOp::Eq), (Token::BangEq, BinaryOp::Ne)],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
            ],
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[(Token::Shl, BinaryOp::Shl), (Token::Shr, BinaryOp::Shr)],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.parse_binary_level(
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(Token, BinaryOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.check(token) {
                    let line = self.line();
                    self.advance();
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        line,
                    };
                    continue 'outer;
                }
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let line = self.line();
        match self.peek() {
            Some(Token::Bang) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                    line,
                })
            }
            Some(Token::Minus) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                    line,
                })
            }
            Some(Token::Tilde) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::BitNot,
                    operand: Box::new(operand),
                    line,
                })
            }
            Some(Token::PlusPlus) | Some(Token::MinusMinus) => {
                let is_increment = self.peek() == Some(&Token::PlusPlus);
                self.advance();
                let target = self.parse_unary()?;
                self.assignable(&target)?;
                Ok(Expr::IncDec {
                    target: Box::new(target),
                    is_increment,
                    is_prefix: true,
                    line,
                })
            }
            Some(Token::Await) => {
                self.advance();
                let task = self.parse_unary()?;
                Ok(Expr::Await {
                    task: Box::new(task),
                    line,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let line = self.line();
            match self.peek() {
                Some(Token::LParen) => {
                    self.advance();
                    let args = self.parse_call_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        line,
                    };
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&Token::RBracket, "to close index expression")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                        line,
                    };
                }
                Some(Token::Dot) => {
                    self.advance();
                    let (name, _) = self.expect_ident("after `.`")?;
                    expr = Expr::Property {
                        target: Box::new(expr),
                        name,
                        line,
                    };
                }
                Some(Token::QuestionDot) => {
                    self.advance();
                    let link = match self.peek() {
                        Some(Token::LBracket) => {
                            self.advance();
                            let index = self.parse_expression()?;
                            self.expect(&Token::RBracket, "to close optional index")?;
                            OptChainLink::Index(Box::new(index))
                        }
                        Some(Token::LParen) => {
                            self.advance();
                            let args = self.parse_call_args()?;
                            OptChainLink::Call(args)
                        }
                        _ => {
                            let (name, _) = self.expect_ident("after `?.`")?;
                            OptChainLink::Property(name)
                        }
                    };
                    expr = Expr::OptChain {
                        target: Box::new(expr),
                        link,
                        line,
                    };
                }
                Some(Token::PlusPlus) | Some(Token::MinusMinus) => {
                    let is_increment = self.peek() == Some(&Token::PlusPlus);
                    self.assignable(&expr)?;
                    self.advance();
                    expr = Expr::IncDec {
                        target: Box::new(expr),
                        is_increment,
                        is_prefix: false,
                        line,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "to close argument list")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.current_span();
        let line = span.line;
        match self.advance() {
            Some((Token::Null, _)) => Ok(Expr::Literal {
                value: Literal::Null,
                line,
            }),
            Some((Token::True, _)) => Ok(Expr::Literal {
                value: Literal::Bool(true),
                line,
            }),
            Some((Token::False, _)) => Ok(Expr::Literal {
                value: Literal::Bool(false),
                line,
            }),
            Some((Token::Int(n), _)) => Ok(Expr::Literal {
                value: Literal::Int(n),
                line,
            }),
            Some((Token::Float(f), _)) => Ok(Expr::Literal {
                value: Literal::Float(f),
                line,
            }),
            Some((Token::Rune(c), _)) => Ok(Expr::Literal {
                value: Literal::Rune(c),
                line,
            }),
            Some((Token::Str(parts), _)) => self.finish_string(parts, line),
            Some((Token::Ident(name), _)) => Ok(Expr::Ident { name, line }),
            Some((Token::LParen, _)) => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RParen, "to close parenthesized expression")?;
                Ok(expr)
            }
            Some((Token::LBracket, _)) => {
                let mut elements = Vec::new();
                if !self.check(&Token::RBracket) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                        if self.check(&Token::RBracket) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket, "to close array literal")?;
                Ok(Expr::ArrayLit { elements, line })
            }
            Some((Token::LBrace, _)) => {
                let mut fields = Vec::new();
                if !self.check(&Token::RBrace) {
                    loop {
                        let name = match self.advance() {
                            Some((Token::Ident(name), _)) => name,
                            Some((Token::Str(parts), fspan)) => match parts.as_slice() {
                                [StringPart::Literal(s)] => s.clone(),
                                _ => {
                                    return Err(ParseError::new(
                                        "object key must be a plain string",
                                        fspan,
                                    ))
                                }
                            },
                            Some((t, fspan)) => {
                                return Err(ParseError::new(
                                    format!("expected object key but found {}", t.describe()),
                                    fspan,
                                ))
                            }
                            None => {
                                return Err(ParseError::new(
                                    "unterminated object literal",
                                    span,
                                ))
                            }
                        };
                        self.expect(&Token::Colon, "after object key")?;
                        let value = self.parse_expression()?;
                        fields.push((name, value));
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                        if self.check(&Token::RBrace) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace, "to close object literal")?;
                Ok(Expr::ObjectLit { fields, line })
            }
            Some((Token::Fn, _)) => {
                let func = self.parse_fn_tail(false, "<anonymous>".to_string())?;
                Ok(Expr::Function {
                    func: Box::new(func),
                    line,
                })
            }
            Some((Token::Async, _)) => {
                self.expect(&Token::Fn, "after `async`")?;
                let func = self.parse_fn_tail(true, "<anonymous>".to_string())?;
                Ok(Expr::Function {
                    func: Box::new(func),
                    line,
                })
            }
            Some((t, span)) => Err(ParseError::new(
                format!("unexpected {} in expression", t.describe()),
                span,
            )),
            None => Err(ParseError::new("unexpected end of input", span)),
        }
    }

    /// Turn a lexed string token into a plain literal or an interpolation
    /// node, sub-parsing each `${...}` hole.
    fn finish_string(&mut self, parts: Vec<StringPart>, line: u32) -> PResult<Expr> {
        if let [StringPart::Literal(s)] = parts.as_slice() {
            return Ok(Expr::Literal {
                value: Literal::Str(s.clone()),
                line,
            });
        }
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StringPart::Literal(s) => out.push(InterpPart::Literal(s)),
                StringPart::Expr(src) => {
                    let expr = Self::parse_expression_source(&src, line)?;
                    out.push(InterpPart::Expr(expr));
                }
            }
        }
        Ok(Expr::Interp { parts: out, line })
    }
}

/// Rewrite an expression's line numbers, used so interpolation holes report
/// the enclosing string's line.
fn reline(expr: Expr, line: u32) -> Expr {
    // Only the top level matters for diagnostics; nested nodes keep their
    // relative positions from the sub-parse (all line 1).
    let mut expr = expr;
    match &mut expr {
        Expr::Literal { line: l, .. }
        | Expr::Ident { line: l, .. }
        | Expr::Binary { line: l, .. }
        | Expr::Unary { line: l, .. }
        | Expr::Ternary { line: l, .. }
        | Expr::Coalesce { line: l, .. }
        | Expr::OptChain { line: l, .. }
        | Expr::Assign { line: l, .. }
        | Expr::IncDec { line: l, .. }
        | Expr::Call { line: l, .. }
        | Expr::Property { line: l, .. }
        | Expr::Index { line: l, .. }
        | Expr::ObjectLit { line: l, .. }
        | Expr::ArrayLit { line: l, .. }
        | Expr::Function { line: l, .. }
        | Expr::Interp { line: l, .. }
        | Expr::Await { line: l, .. } => *l = line,
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse(source).expect("parse failed")
    }

    #[test]
    fn test_let_declaration() {
        let program = parse_ok("let x = 42;");
        assert_eq!(program.statements.len(), 1);
        match &program.statements[0] {
            Stmt::Let {
                name,
                init: Some(Expr::Literal { value, .. }),
                is_const: false,
                ..
            } => {
                assert_eq!(name, "x");
                assert_eq!(*value, Literal::Int(42));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_const_with_annotation() {
        let program = parse_ok("const limit: u32 = 10;");
        match &program.statements[0] {
            Stmt::Let {
                ty: Some(TypeAnn::U32),
                is_const: true,
                ..
            } => {}
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_fn_declaration_desugars_to_let() {
        let program = parse_ok("fn add(a, b) { return a + b; }");
        match &program.statements[0] {
            Stmt::Let {
                name,
                init: Some(Expr::Function { func, .. }),
                ..
            } => {
                assert_eq!(name, "add");
                assert_eq!(func.params.len(), 2);
                assert!(!func.is_async);
                assert_eq!(func.name, "add");
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_async_fn() {
        let program = parse_ok("async fn work(n) { return n; }");
        match &program.statements[0] {
            Stmt::Let {
                init: Some(Expr::Function { func, .. }),
                ..
            } => assert!(func.is_async),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_param_defaults() {
        let program = parse_ok("fn greet(name, suffix = \"!\") { return name + suffix; }");
        match &program.statements[0] {
            Stmt::Let {
                init: Some(Expr::Function { func, .. }),
                ..
            } => {
                assert!(func.params[0].default.is_none());
                assert!(func.params[1].default.is_some());
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let program = parse_ok("let x = 1 + 2 * 3;");
        match &program.statements[0] {
            Stmt::Let {
                init: Some(Expr::Binary { op, rhs, .. }),
                ..
            } => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(
                    rhs.as_ref(),
                    Expr::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_compound_assign_desugars() {
        let program = parse_ok("x += 2;");
        match &program.statements[0] {
            Stmt::Expression {
                expr: Expr::Assign { target, value, .. },
                ..
            } => {
                assert!(matches!(target.as_ref(), Expr::Ident { name, .. } if name == "x"));
                assert!(matches!(
                    value.as_ref(),
                    Expr::Binary {
                        op: BinaryOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_postfix_increment() {
        let program = parse_ok("i++;");
        match &program.statements[0] {
            Stmt::Expression {
                expr:
                    Expr::IncDec {
                        is_increment: true,
                        is_prefix: false,
                        ..
                    },
                ..
            } => {}
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_ternary_and_coalesce() {
        parse_ok("let a = x ? 1 : 2;");
        parse_ok("let b = x ?? fallback;");
        parse_ok("let c = obj?.field ?? 0;");
    }

    #[test]
    fn test_optional_chain_forms() {
        let program = parse_ok("a?.b; a?.[0]; a?.(1, 2);");
        assert_eq!(program.statements.len(), 3);
        for stmt in &program.statements {
            assert!(matches!(
                stmt,
                Stmt::Expression {
                    expr: Expr::OptChain { .. },
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_for_in_variants() {
        let program = parse_ok("for (v in xs) { } for (v, i in xs) { }");
        match &program.statements[0] {
            Stmt::ForIn { second: None, .. } => {}
            other => panic!("unexpected statement: {:?}", other),
        }
        match &program.statements[1] {
            Stmt::ForIn {
                second: Some(i), ..
            } => assert_eq!(i, "i"),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_c_style_for() {
        let program = parse_ok("for (let i = 0; i < 10; i++) { }");
        match &program.statements[0] {
            Stmt::For {
                init: Some(_),
                cond: Some(_),
                step: Some(_),
                ..
            } => {}
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_try_catch_finally() {
        let program = parse_ok("try { work(); } catch (e) { print(e); } finally { done(); }");
        match &program.statements[0] {
            Stmt::Try {
                catch_name: Some(name),
                catch_block: Some(_),
                finally_block: Some(_),
                ..
            } => assert_eq!(name, "e"),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_try_requires_handler() {
        assert!(parse("try { work(); }").is_err());
    }

    #[test]
    fn test_switch_with_fallthrough_cases() {
        let program = parse_ok(
            "switch (x) { case 1: a(); case 2: b(); break; default: c(); }",
        );
        match &program.statements[0] {
            Stmt::Switch { cases, .. } => {
                assert_eq!(cases.len(), 3);
                assert!(cases[0].test.is_some());
                assert!(cases[2].test.is_none());
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_defer_requires_call() {
        assert!(parse("defer x;").is_err());
        parse_ok("defer f.close();");
    }

    #[test]
    fn test_import_forms() {
        let program = parse_ok(
            "import { a, b as c } from \"./m\"; import * as util from \"@stdlib/util\";",
        );
        match &program.statements[0] {
            Stmt::Import {
                form: ImportForm::Named(names),
                path,
                ..
            } => {
                assert_eq!(path, "./m");
                assert_eq!(names[0], ("a".to_string(), None));
                assert_eq!(names[1], ("b".to_string(), Some("c".to_string())));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
        match &program.statements[1] {
            Stmt::Import {
                form: ImportForm::Namespace(name),
                ..
            } => assert_eq!(name, "util"),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_export_forms() {
        let program = parse_ok("export let count = 0; export { helper } from \"./util\";");
        assert!(matches!(&program.statements[0], Stmt::Export { .. }));
        assert!(matches!(&program.statements[1], Stmt::ExportFrom { .. }));
    }

    #[test]
    fn test_define_and_enum() {
        let program = parse_ok(
            "define Point { x: i32, y: i32 = 0 } enum Color { Red, Green = 5, Blue }",
        );
        match &program.statements[0] {
            Stmt::DefineObject { name, fields, .. } => {
                assert_eq!(name, "Point");
                assert!(fields[0].default.is_none());
                assert!(fields[1].default.is_some());
            }
            other => panic!("unexpected statement: {:?}", other),
        }
        match &program.statements[1] {
            Stmt::Enum { variants, .. } => {
                assert_eq!(variants[1], ("Green".to_string(), Some(5)));
                assert_eq!(variants[2], ("Blue".to_string(), None));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_extern_fn() {
        let program = parse_ok("extern fn cos(x: f64): f64 from \"libm.so.6\";");
        match &program.statements[0] {
            Stmt::ExternFn {
                name,
                params,
                return_ty: TypeAnn::F64,
                library,
                ..
            } => {
                assert_eq!(name, "cos");
                assert_eq!(params[0].1, TypeAnn::F64);
                assert_eq!(library, "libm.so.6");
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_interpolated_string_expression() {
        let program = parse_ok("let s = \"sum: ${a + b}!\";");
        match &program.statements[0] {
            Stmt::Let {
                init: Some(Expr::Interp { parts, .. }),
                ..
            } => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(&parts[1], InterpPart::Expr(Expr::Binary { .. })));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_await_expression() {
        let program = parse_ok("let r = await t;");
        match &program.statements[0] {
            Stmt::Let {
                init: Some(Expr::Await { .. }),
                ..
            } => {}
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_object_and_array_literals() {
        let program = parse_ok("let o = { a: 1, \"b c\": 2 }; let xs = [1, 2, 3,];");
        match &program.statements[0] {
            Stmt::Let {
                init: Some(Expr::ObjectLit { fields, .. }),
                ..
            } => {
                assert_eq!(fields[1].0, "b c");
            }
            other => panic!("unexpected statement: {:?}", other),
        }
        match &program.statements[1] {
            Stmt::Let {
                init: Some(Expr::ArrayLit { elements, .. }),
                ..
            } => assert_eq!(elements.len(), 3),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(parse("1 = 2;").is_err());
        assert!(parse("f() = 2;").is_err());
    }

    #[test]
    fn test_closure_returning_closure() {
        let program = parse_ok("fn make(x) { return fn(y) { return x + y; }; }");
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn test_error_position() {
        let err = parse("let x = ;").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unexpected"));
    }
}
