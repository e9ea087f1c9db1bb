//! Lexical analysis (tokenizer).
use itertools::{multipeek, MultiPeek};
use std::str::{CharIndices, FromStr};

use crate::{
    error::{LexError, Pos},
    preproc::PreprocessedSource,
    tokens::{parse_number, KeywordKind, Span, Token, TokenKind},
};

/// Lexical analyzer over preprocessed source text.
///
/// Tokens carry spans into the expanded text for fragment slicing, and
/// positions resolved through the preprocessor's line map so errors
/// point at the original file.
pub struct Lexer<'a> {
    unit: &'a PreprocessedSource,
    source: SourceText<'a>,
    token_start: TokenStart,
}

#[derive(Debug, Default, Clone, Copy)]
struct TokenStart {
    offset: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(unit: &'a PreprocessedSource) -> Self {
        Self {
            unit,
            source: SourceText::new(unit.text()),
            token_start: TokenStart {
                offset: 0,
                line: 1,
                column: 1,
            },
        }
    }

    /// Lex the whole unit into a buffered token vector ending in the
    /// end-of-source sentinel.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_asm = matches!(token.kind, TokenKind::Keyword(KeywordKind::Asm));
            let at_end = token.kind == TokenKind::EOS;
            tokens.push(token);
            if at_end {
                break;
            }
            if is_asm {
                self.capture_asm(&mut tokens)?;
            }
        }
        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        use TokenKind as T;

        self.skip_trivia()?;
        self.start_token();

        let (_, c) = match self.source.next_char() {
            Some(pair) => pair,
            None => return Ok(self.make_token(T::EOS)),
        };

        #[rustfmt::skip]
        let kind = match c {
            ';' => T::Semicolon,
            ',' => T::Comma,
            '.' => T::Dot,
            '(' => T::LeftParen,
            ')' => T::RightParen,
            '{' => T::LeftBrace,
            '}' => T::RightBrace,
            '[' => T::LeftBracket,
            ']' => T::RightBracket,
            '~' => T::Tilde,
            '^' => T::Caret,
            '*' => T::Star,
            '/' => T::Slash,
            '%' => T::Percent,
            // Maximal munch: two-character operators win over their
            // one-character prefixes.
            '+' => if self.match_char('+') { T::PlusPlus }   else { T::Plus },
            '-' => if self.match_char('-') { T::MinusMinus } else { T::Minus },
            '&' => if self.match_char('&') { T::AndAnd }     else { T::Amp },
            '|' => if self.match_char('|') { T::OrOr }       else { T::Pipe },
            '=' => if self.match_char('=') { T::EqEq }       else { T::Eq },
            '!' => if self.match_char('=') { T::BangEq }     else { T::Bang },
            '<' => {
                if self.match_char('<') { T::Shl }
                else if self.match_char('=') { T::LtEq }
                else { T::Lt }
            }
            '>' => {
                if self.match_char('>') { T::Shr }
                else if self.match_char('=') { T::GtEq }
                else { T::Gt }
            }
            '0'..='9' => return self.consume_number(c),
            'a'..='z' | 'A'..='Z' | '_' => return Ok(self.consume_ident()),
            _ => {
                return Err(LexError::UnknownCharacter {
                    ch: c,
                    pos: self.token_pos(),
                })
            }
        };

        Ok(self.make_token(kind))
    }

    /// Consume whitespace and comments until a token character or the
    /// end of the source is reached.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.source.peek_char() {
                Some((_, ' ' | '\t' | '\r' | '\n')) => {
                    self.source.next_char();
                }
                Some((_, '/')) => {
                    let (_, second) = self.source.peek_char2();
                    match second {
                        Some('/') => {
                            self.source.next_char();
                            self.source.next_char();
                            while let Some((_, c)) = self.source.peek_char() {
                                if c == '\n' {
                                    break;
                                }
                                self.source.next_char();
                            }
                        }
                        Some('*') => {
                            self.start_token();
                            let open_pos = self.token_pos();
                            self.source.next_char();
                            self.source.next_char();
                            self.consume_block_comment(open_pos)?;
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// The `/*` has been consumed; scan to the matching `*/`. Nesting
    /// is not supported.
    fn consume_block_comment(&mut self, open_pos: Pos) -> Result<(), LexError> {
        loop {
            match self.source.next_char() {
                Some((_, '*')) => {
                    if let Some((_, '/')) = self.source.peek_char() {
                        self.source.next_char();
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => return Err(LexError::UnterminatedComment { pos: open_pos }),
            }
        }
    }

    fn consume_number(&mut self, first: char) -> Result<Token, LexError> {
        if first == '0' && matches!(self.source.peek_char(), Some((_, 'x' | 'X'))) {
            self.source.next_char();
            while matches!(self.source.peek_char(), Some((_, c)) if c.is_ascii_hexdigit()) {
                self.source.next_char();
            }
        } else {
            while matches!(self.source.peek_char(), Some((_, c)) if c.is_ascii_digit()) {
                self.source.next_char();
            }
        }

        let token = self.make_token(TokenKind::Number);
        let fragment = token.span.fragment(self.unit.text());
        match parse_number(fragment) {
            Some(_) => Ok(token),
            None => Err(LexError::MalformedNumber {
                fragment: fragment.to_string(),
                pos: token.pos,
            }),
        }
    }

    fn consume_ident(&mut self) -> Token {
        while matches!(
            self.source.peek_char(),
            Some((_, c)) if c.is_ascii_alphanumeric() || c == '_'
        ) {
            self.source.next_char();
        }

        // A fragment in the reserved word set is a keyword instead of a
        // user defined identifier.
        let fragment = &self.unit.text()[self.token_start.offset..self.source.offset()];
        let kind = KeywordKind::from_str(fragment)
            .map(TokenKind::Keyword)
            .unwrap_or(TokenKind::Ident);
        self.make_token(kind)
    }

    /// Capture the raw payload of an `asm { ... }` block. Assembly text
    /// is opaque to the language and never has to satisfy the token
    /// rules.
    fn capture_asm(&mut self, tokens: &mut Vec<Token>) -> Result<(), LexError> {
        let open = self.next_token()?;
        let is_open = open.kind == TokenKind::LeftBrace;
        tokens.push(open);
        if !is_open {
            // Not a block; let the parser report the mismatch.
            return Ok(());
        }

        self.start_token();
        let open_pos = self.token_pos();
        loop {
            match self.source.peek_char() {
                Some((_, '}')) => break,
                Some(_) => {
                    self.source.next_char();
                }
                None => return Err(LexError::UnterminatedAsm { pos: open_pos }),
            }
        }
        tokens.push(self.make_token(TokenKind::AsmText));
        tokens.push(self.next_token()?);
        Ok(())
    }

    /// Prime the lexer state for recording a new token.
    fn start_token(&mut self) {
        self.token_start = TokenStart {
            offset: self.source.offset(),
            line: self.source.line(),
            column: self.source.column(),
        };
    }

    fn make_token(&mut self, kind: TokenKind) -> Token {
        Token {
            kind,
            span: Span {
                start: self.token_start.offset,
                end: self.source.offset(),
            },
            pos: self.token_pos(),
        }
    }

    /// Position of the current token, mapped back through the
    /// preprocessor to the original file and line.
    fn token_pos(&self) -> Pos {
        let (file, line) = self.unit.origin(self.token_start.line);
        Pos {
            file,
            line,
            column: self.token_start.column,
        }
    }

    /// Consume the next character if it matches.
    fn match_char(&mut self, expected: char) -> bool {
        match self.source.peek_char() {
            Some((_, c)) if c == expected => {
                self.source.next_char();
                true
            }
            _ => false,
        }
    }
}

/// Wrapper for source text that keeps a cursor position.
///
/// The `MultiPeek` wrapper allows lookahead by consuming the iterator
/// internally and buffering the result. Peeking advances an internal
/// peek cursor, which is reset before every use here so peeks are
/// idempotent from the lexer's point of view.
struct SourceText<'a> {
    iter: MultiPeek<CharIndices<'a>>,
    /// Byte offset of the next unconsumed character.
    offset: usize,
    /// 1-based line of the next unconsumed character.
    line: u32,
    /// 1-based column of the next unconsumed character.
    column: u32,
}

impl<'a> SourceText<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            iter: multipeek(source.char_indices()),
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    #[inline]
    fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    fn line(&self) -> u32 {
        self.line
    }

    #[inline]
    fn column(&self) -> u32 {
        self.column
    }

    /// Advance the cursor and return the consumed position and character.
    fn next_char(&mut self) -> Option<(usize, char)> {
        match self.iter.next() {
            Some((index, c)) => {
                self.offset = index + c.len_utf8();
                if c == '\n' {
                    self.line += 1;
                    self.column = 1;
                } else {
                    self.column += 1;
                }
                Some((index, c))
            }
            None => None,
        }
    }

    /// Peek the next character without consuming it.
    fn peek_char(&mut self) -> Option<(usize, char)> {
        self.iter.reset_peek();
        self.iter.peek().copied()
    }

    /// Two character lookahead.
    fn peek_char2(&mut self) -> (Option<char>, Option<char>) {
        self.iter.reset_peek();
        let first = self.iter.peek().map(|(_, c)| *c);
        let second = self.iter.peek().map(|(_, c)| *c);
        (first, second)
    }
}
