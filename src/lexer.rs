//! Lexer for compute-function fragments using logos
//!
//! Only what is needed to find emission calls structurally:
//! - The emission primitive: __SEND
//! - Identifiers and numbers
//! - String and character literals (so their contents are never matched)
//! - Punctuation: (, ), {, }, [, ], ,, ;
//!
//! Comments and whitespace are skipped; any other character lexes as an
//! error and is ignored by callers.

use logos::Logos;
use std::ops::Range;

/// Name of the emission primitive in flat-map fragments
pub const EMIT_PRIMITIVE: &str = "__SEND";

/// Token types of a C-like fragment
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")] // Skip whitespace
pub enum Token {
    #[token("__SEND")]
    Send,

    #[regex(r"//[^\n]*", logos::skip)]
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", logos::skip)]
    Comment,

    // Literals
    #[regex(r"[0-9][0-9a-zA-Z_.]*")]
    Number,

    #[regex(r#""([^"\\\n]|\\.)*""#)]
    StringLit,

    #[regex(r"'([^'\\\n]|\\.)*'")]
    CharLit,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

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
}

/// A token with its byte range in the fragment
pub type Spanned = (Token, Range<usize>);

/// Lexer wrapper yielding spanned tokens, dropping unrecognised characters
pub struct Lexer<'source> {
    inner: logos::SpannedIter<'source, Token>,
    peeked: Option<Option<Spanned>>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source).spanned(),
            peeked: None,
        }
    }

    fn advance(&mut self) -> Option<Spanned> {
        loop {
            match self.inner.next()? {
                (Ok(tok), span) => return Some((tok, span)),
                (Err(()), _) => continue,
            }
        }
    }

    /// Peek at the next token without consuming it
    pub fn peek(&mut self) -> Option<&Spanned> {
        if self.peeked.is_none() {
            let next = self.advance();
            self.peeked = Some(next);
        }
        self.peeked.as_ref().and_then(|p| p.as_ref())
    }

    /// Check if the next token matches expected
    pub fn check(&mut self, expected: &Token) -> bool {
        matches!(self.peek(), Some((tok, _)) if tok == expected)
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Spanned;

    fn next(&mut self) -> Option<Self::Item> {
        match self.peeked.take() {
            Some(peeked) => peeked,
            None => self.advance(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        Lexer::new(source).map(|(tok, _)| tok).collect()
    }

    #[test]
    fn test_emission_call() {
        assert_eq!(
            tokens("__SEND(out);"),
            vec![
                Token::Send,
                Token::LParen,
                Token::Ident("out".to_string()),
                Token::RParen,
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_longer_identifier_is_not_the_primitive() {
        assert_eq!(tokens("__SEND_ALL"), vec![Token::Ident("__SEND_ALL".to_string())]);
    }

    #[test]
    fn test_comments_and_literals_hide_calls() {
        let source = "// __SEND(a);\n/* __SEND(b); */ x = \"__SEND(c);\";";
        assert!(!tokens(source).contains(&Token::Send));
    }

    #[test]
    fn test_operators_are_dropped() {
        assert_eq!(
            tokens("a + b"),
            vec![Token::Ident("a".to_string()), Token::Ident("b".to_string())]
        );
    }

    #[test]
    fn test_spans() {
        let mut lexer = Lexer::new("  __SEND(x);");
        assert!(lexer.check(&Token::Send));
        let (tok, span) = lexer.next().unwrap();
        assert_eq!(tok, Token::Send);
        assert_eq!(span, 2..8);
    }
}
