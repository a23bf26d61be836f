//! Lexer for the Hemlock programming language.
//!
//! Wraps the logos-generated token enum and attaches line/column spans to
//! every token. The parser consumes the resulting `Vec<(Token, Span)>`.

use crate::parser::token::{Span, Token};
use logos::Logos;
use thiserror::Error;

/// A lexical error with source position.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Lex error at line {line}, column {column}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Tokenizer for Hemlock source code.
pub struct HmlLexer<'a> {
    source: &'a str,
    /// Byte offset of the start of each line, for span computation.
    line_starts: Vec<usize>,
}

impl<'a> HmlLexer<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0usize];
        for (idx, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(idx + 1);
            }
        }
        Self {
            source,
            line_starts,
        }
    }

    /// Tokenize the entire source, producing tokens with spans.
    pub fn tokenize(&self) -> Result<Vec<(Token, Span)>, LexError> {
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(self.source);
        while let Some(result) = lexer.next() {
            let range = lexer.span();
            let (line, column) = self.position(range.start);
            match result {
                Ok(token) => {
                    tokens.push((token, Span::new(range.start, range.end, line, column)));
                }
                Err(()) => {
                    let snippet: String = self.source[range.start..]
                        .chars()
                        .take(10)
                        .take_while(|c| *c != '\n')
                        .collect();
                    return Err(LexError {
                        message: format!("unexpected input near `{}`", snippet),
                        line,
                        column,
                    });
                }
            }
        }
        Ok(tokens)
    }

    /// Map a byte offset to a 1-based (line, column) pair.
    fn position(&self, offset: usize) -> (u32, u32) {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let col = offset - self.line_starts[line_idx];
        (line_idx as u32 + 1, col as u32 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_track_lines() {
        let lexer = HmlLexer::new("let a = 1;\nlet b = 2;");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[0].1.line, 1);
        let second_let = tokens.iter().filter(|(t, _)| *t == Token::Let).nth(1);
        assert_eq!(second_let.unwrap().1.line, 2);
    }

    #[test]
    fn test_column_positions() {
        let lexer = HmlLexer::new("a b");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[0].1.column, 1);
        assert_eq!(tokens[1].1.column, 3);
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let lexer = HmlLexer::new("\"abc");
        assert!(lexer.tokenize().is_err());
    }
}
