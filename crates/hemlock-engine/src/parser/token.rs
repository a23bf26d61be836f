//! Token definitions for the Hemlock lexer.

use logos::{Lexer, Logos, Skip};

/// Source location information for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// A synthetic span for nodes generated by the parser itself.
    pub fn synthetic(line: u32) -> Self {
        Self {
            start: 0,
            end: 0,
            line,
            column: 0,
        }
    }
}

/// One segment of a double-quoted string literal.
///
/// A plain string lexes to a single `Literal` part; each `${...}`
/// interpolation hole becomes an `Expr` part holding the raw source of the
/// embedded expression (sub-parsed later by the parser).
#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(String),
    Expr(String),
}

/// Logos-generated token enum for the Hemlock language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    #[token("/*", lex_block_comment)]
    BlockComment,

    // Keywords
    #[token("let")]
    Let,
    #[token("const")]
    Const,
    #[token("fn")]
    Fn,
    #[token("async")]
    Async,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("finally")]
    Finally,
    #[token("throw")]
    Throw,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("defer")]
    Defer,
    #[token("import")]
    Import,
    #[token("export")]
    Export,
    #[token("from")]
    From,
    #[token("as")]
    As,
    #[token("define")]
    Define,
    #[token("enum")]
    Enum,
    #[token("extern")]
    Extern,
    #[token("await")]
    Await,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    // Literals
    #[regex(r"0x[0-9a-fA-F][0-9a-fA-F_]*", lex_hex)]
    #[regex(r"[0-9][0-9_]*", lex_int)]
    Int(u64),

    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", lex_float, priority = 3)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", lex_float)]
    Float(f64),

    #[token("\"", lex_string)]
    Str(Vec<StringPart>),

    #[token("'", lex_rune)]
    Rune(char),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AmpAmp,
    #[token("||")]
    PipePipe,
    #[token("!")]
    Bang,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    ShlEq,
    #[token(">>=")]
    ShrEq,
    #[token("?")]
    Question,
    #[token("??")]
    QuestionQuestion,
    #[token("?.")]
    QuestionDot,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
}

fn lex_int(lex: &mut Lexer<'_, Token>) -> Option<u64> {
    let digits: String = lex.slice().chars().filter(|c| *c != '_').collect();
    digits.parse::<u64>().ok()
}

fn lex_hex(lex: &mut Lexer<'_, Token>) -> Option<u64> {
    let digits: String = lex.slice()[2..].chars().filter(|c| *c != '_').collect();
    u64::from_str_radix(&digits, 16).ok()
}

fn lex_float(lex: &mut Lexer<'_, Token>) -> Option<f64> {
    let digits: String = lex.slice().chars().filter(|c| *c != '_').collect();
    digits.parse::<f64>().ok()
}

/// Consume a block comment, honoring nesting.
fn lex_block_comment(lex: &mut Lexer<'_, Token>) -> Skip {
    let remainder = lex.remainder();
    let mut depth = 1usize;
    let mut consumed = 0usize;
    let bytes = remainder.as_bytes();
    while consumed < bytes.len() && depth > 0 {
        if bytes[consumed..].starts_with(b"/*") {
            depth += 1;
            consumed += 2;
        } else if bytes[consumed..].starts_with(b"*/") {
            depth -= 1;
            consumed += 2;
        } else {
            consumed += 1;
        }
    }
    lex.bump(consumed);
    Skip
}

/// Lex a double-quoted string with escapes and `${...}` interpolation holes.
///
/// The opening quote has already been consumed; this scans up to the matching
/// unescaped closing quote. Interpolation holes may themselves contain string
/// literals and nested braces.
fn lex_string(lex: &mut Lexer<'_, Token>) -> Option<Vec<StringPart>> {
    let remainder = lex.remainder();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = remainder.char_indices().peekable();
    let mut consumed = 0usize;

    loop {
        let (idx, c) = chars.next()?;
        match c {
            '"' => {
                consumed = idx + 1;
                break;
            }
            '\\' => {
                let (_, esc) = chars.next()?;
                match esc {
                    'n' => literal.push('\n'),
                    't' => literal.push('\t'),
                    'r' => literal.push('\r'),
                    '0' => literal.push('\0'),
                    '\\' => literal.push('\\'),
                    '"' => literal.push('"'),
                    '$' => literal.push('$'),
                    'u' => {
                        // \u{1F600}
                        let (_, open) = chars.next()?;
                        if open != '{' {
                            return None;
                        }
                        let mut hex = String::new();
                        loop {
                            let (_, h) = chars.next()?;
                            if h == '}' {
                                break;
                            }
                            hex.push(h);
                        }
                        let code = u32::from_str_radix(&hex, 16).ok()?;
                        literal.push(char::from_u32(code)?);
                    }
                    _ => return None,
                }
            }
            '$' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    if !literal.is_empty() {
                        parts.push(StringPart::Literal(std::mem::take(&mut literal)));
                    }
                    // Scan to the matching close brace, skipping over nested
                    // braces and string literals inside the hole.
                    let mut expr = String::new();
                    let mut depth = 1usize;
                    let mut in_str = false;
                    let mut str_escape = false;
                    loop {
                        let (_, e) = chars.next()?;
                        if in_str {
                            if str_escape {
                                str_escape = false;
                            } else if e == '\\' {
                                str_escape = true;
                            } else if e == '"' {
                                in_str = false;
                            }
                            expr.push(e);
                            continue;
                        }
                        match e {
                            '"' => {
                                in_str = true;
                                expr.push(e);
                            }
                            '{' => {
                                depth += 1;
                                expr.push(e);
                            }
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                expr.push(e);
                            }
                            _ => expr.push(e),
                        }
                    }
                    parts.push(StringPart::Expr(expr));
                } else {
                    literal.push('$');
                }
            }
            _ => literal.push(c),
        }
    }

    if !literal.is_empty() || parts.is_empty() {
        parts.push(StringPart::Literal(literal));
    }
    lex.bump(consumed);
    Some(parts)
}

/// Lex a rune literal. The opening quote has already been consumed.
fn lex_rune(lex: &mut Lexer<'_, Token>) -> Option<char> {
    let remainder = lex.remainder();
    let mut chars = remainder.char_indices();
    let (idx, c) = chars.next()?;
    let (value, mut consumed) = if c == '\\' {
        let (_, esc) = chars.next()?;
        let v = match esc {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            'u' => {
                let (_, open) = chars.next()?;
                if open != '{' {
                    return None;
                }
                let mut hex = String::new();
                loop {
                    let (_, h) = chars.next()?;
                    if h == '}' {
                        break;
                    }
                    hex.push(h);
                }
                let code = u32::from_str_radix(&hex, 16).ok()?;
                let v = char::from_u32(code)?;
                let (i, close) = chars.next()?;
                if close != '\'' {
                    return None;
                }
                lex.bump(i + close.len_utf8());
                return Some(v);
            }
            _ => return None,
        };
        (v, idx + 1 + esc.len_utf8())
    } else {
        (c, idx + c.len_utf8())
    };
    let rest = &remainder[consumed..];
    if !rest.starts_with('\'') {
        return None;
    }
    consumed += 1;
    lex.bump(consumed);
    Some(value)
}

impl Token {
    /// Human-readable token description for parse error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier `{}`", name),
            Token::Int(n) => format!("integer literal `{}`", n),
            Token::Float(f) => format!("float literal `{}`", f),
            Token::Str(_) => "string literal".to_string(),
            Token::Rune(c) => format!("rune literal `{:?}`", c),
            other => format!("`{:?}`", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logos::Logos;

    fn lex_all(source: &str) -> Vec<Token> {
        Token::lexer(source).map(|t| t.unwrap()).collect()
    }

    #[test]
    fn test_keywords_and_idents() {
        let tokens = lex_all("let foo = fn_bar;");
        assert_eq!(
            tokens,
            vec![
                Token::Let,
                Token::Ident("foo".to_string()),
                Token::Eq,
                Token::Ident("fn_bar".to_string()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = lex_all("42 0xFF 3.5 1e3");
        assert_eq!(
            tokens,
            vec![
                Token::Int(42),
                Token::Int(255),
                Token::Float(3.5),
                Token::Float(1000.0),
            ]
        );
    }

    #[test]
    fn test_plain_string() {
        let tokens = lex_all(r#""hello\n""#);
        assert_eq!(
            tokens,
            vec![Token::Str(vec![StringPart::Literal("hello\n".to_string())])]
        );
    }

    #[test]
    fn test_interpolated_string() {
        let tokens = lex_all(r#""a ${x + 1} b""#);
        assert_eq!(
            tokens,
            vec![Token::Str(vec![
                StringPart::Literal("a ".to_string()),
                StringPart::Expr("x + 1".to_string()),
                StringPart::Literal(" b".to_string()),
            ])]
        );
    }

    #[test]
    fn test_interpolation_with_nested_string() {
        let tokens = lex_all(r#""v: ${f("}")}""#);
        assert_eq!(
            tokens,
            vec![Token::Str(vec![
                StringPart::Literal("v: ".to_string()),
                StringPart::Expr("f(\"}\")".to_string()),
            ])]
        );
    }

    #[test]
    fn test_rune() {
        let tokens = lex_all(r"'a' '\n' '\u{1F600}'");
        assert_eq!(
            tokens,
            vec![Token::Rune('a'), Token::Rune('\n'), Token::Rune('\u{1F600}')]
        );
    }

    #[test]
    fn test_operators_longest_match() {
        let tokens = lex_all("a <<= b ?. c ?? d");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".to_string()),
                Token::ShlEq,
                Token::Ident("b".to_string()),
                Token::QuestionDot,
                Token::Ident("c".to_string()),
                Token::QuestionQuestion,
                Token::Ident("d".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = lex_all("a // line\n /* block /* nested */ */ b");
        assert_eq!(
            tokens,
            vec![Token::Ident("a".to_string()), Token::Ident("b".to_string())]
        );
    }
}
