//! Buffered stream of tokens consumed by the parser.
use crate::{
    error::{LexError, ParseError},
    lexer::Lexer,
    preproc::PreprocessedSource,
    tokens::{Span, Token, TokenKind},
};

/// Cursor over the fully lexed token vector.
///
/// Keeps a reference to the preprocessed text so the parser can slice
/// fragments (identifier names, literals, asm payloads) from spans.
pub struct TokenStream<'a> {
    tokens: Vec<Token>,
    cursor: usize,
    source: &'a str,
}

impl<'a> TokenStream<'a> {
    /// Lex the whole unit up front. The stream always ends in the
    /// end-of-source sentinel, so `peek` never runs off the end.
    pub fn new(unit: &'a PreprocessedSource) -> Result<Self, LexError> {
        let tokens = Lexer::new(unit).tokenize()?;
        Ok(Self {
            tokens,
            cursor: 0,
            source: unit.text(),
        })
    }

    /// Slice a fragment of preprocessed source.
    #[inline]
    pub fn fragment(&self, span: &Span) -> &'a str {
        span.fragment(self.source)
    }

    /// Current token without advancing the cursor.
    #[inline]
    pub fn peek(&self) -> &Token {
        &self.tokens[self.cursor]
    }

    /// One token of lookahead past the current token.
    #[inline]
    pub fn peek2(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.cursor + 1).min(last)]
    }

    /// Consume the current token regardless of type. The end-of-source
    /// sentinel is sticky.
    pub fn next_token(&mut self) -> Token {
        let token = self.tokens[self.cursor].clone();
        if self.cursor + 1 < self.tokens.len() {
            self.cursor += 1;
        }
        token
    }

    /// Consume the current token if it matches the given type.
    ///
    /// Returns true when matched; does not consume otherwise.
    pub fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.next_token();
            true
        } else {
            false
        }
    }

    /// Consume the current token, which must match the given type.
    pub fn consume(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        let token = self.peek();
        if token.kind == kind {
            Ok(self.next_token())
        } else {
            Err(ParseError::Unexpected {
                expected: kind.to_string(),
                found: token.kind.to_string(),
                pos: token.pos.clone(),
            })
        }
    }

    #[inline]
    pub fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::EOS
    }
}
