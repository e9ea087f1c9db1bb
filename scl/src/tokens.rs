use std::{fmt, str::FromStr};

use crate::error::Pos;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Two-character operators, matched with maximal munch.
    EqEq,       // `==`
    BangEq,     // `!=`
    LtEq,       // `<=`
    GtEq,       // `>=`
    AndAnd,     // `&&`
    OrOr,       // `||`
    Shl,        // `<<`
    Shr,        // `>>`
    PlusPlus,   // `++`
    MinusMinus, // `--`

    // Single-character operators and punctuation.
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Lt,
    Gt,
    Eq,
    Semicolon,
    Comma,
    Dot,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,

    /// Integer literal, decimal or `0x` hexadecimal.
    Number,

    Ident,

    /// Identifier in the set of reserved words.
    Keyword(KeywordKind),

    /// Raw payload of an `asm { ... }` block.
    AsmText,

    /// End-of-source sentinel.
    EOS,
}

impl fmt::Display for TokenKind {
    #[rustfmt::skip]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TokenKind as T;
        match self {
            T::EqEq         => write!(f, "=="),
            T::BangEq       => write!(f, "!="),
            T::LtEq         => write!(f, "<="),
            T::GtEq         => write!(f, ">="),
            T::AndAnd       => write!(f, "&&"),
            T::OrOr         => write!(f, "||"),
            T::Shl          => write!(f, "<<"),
            T::Shr          => write!(f, ">>"),
            T::PlusPlus     => write!(f, "++"),
            T::MinusMinus   => write!(f, "--"),
            T::Plus         => write!(f, "+"),
            T::Minus        => write!(f, "-"),
            T::Star         => write!(f, "*"),
            T::Slash        => write!(f, "/"),
            T::Percent      => write!(f, "%"),
            T::Amp          => write!(f, "&"),
            T::Pipe         => write!(f, "|"),
            T::Caret        => write!(f, "^"),
            T::Tilde        => write!(f, "~"),
            T::Bang         => write!(f, "!"),
            T::Lt           => write!(f, "<"),
            T::Gt           => write!(f, ">"),
            T::Eq           => write!(f, "="),
            T::Semicolon    => write!(f, ";"),
            T::Comma        => write!(f, ","),
            T::Dot          => write!(f, "."),
            T::LeftParen    => write!(f, "("),
            T::RightParen   => write!(f, ")"),
            T::LeftBrace    => write!(f, "{{"),
            T::RightBrace   => write!(f, "}}"),
            T::LeftBracket  => write!(f, "["),
            T::RightBracket => write!(f, "]"),
            T::Number       => write!(f, "number"),
            T::Ident        => write!(f, "identifier"),
            T::Keyword(kw)  => write!(f, "{}", kw),
            T::AsmText      => write!(f, "assembly text"),
            T::EOS          => write!(f, "end of source"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordKind {
    Uint32,
    Int32,
    Function,
    If,
    Else,
    While,
    Do,
    For,
    Return,
    Break,
    Continue,
    Register,
    Volatile,
    Interrupt,
    Asm,
}

impl fmt::Display for KeywordKind {
    #[rustfmt::skip]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use KeywordKind as K;
        match self {
            K::Uint32    => write!(f, "uint32"),
            K::Int32     => write!(f, "int32"),
            K::Function  => write!(f, "function"),
            K::If        => write!(f, "if"),
            K::Else      => write!(f, "else"),
            K::While     => write!(f, "while"),
            K::Do        => write!(f, "do"),
            K::For       => write!(f, "for"),
            K::Return    => write!(f, "return"),
            K::Break     => write!(f, "break"),
            K::Continue  => write!(f, "continue"),
            K::Register  => write!(f, "register"),
            K::Volatile  => write!(f, "volatile"),
            K::Interrupt => write!(f, "interrupt"),
            K::Asm       => write!(f, "asm"),
        }
    }
}

impl FromStr for KeywordKind {
    type Err = ();

    #[rustfmt::skip]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use KeywordKind as K;
        match s {
            "uint32"    => Ok(K::Uint32),
            "int32"     => Ok(K::Int32),
            "function"  => Ok(K::Function),
            "if"        => Ok(K::If),
            "else"      => Ok(K::Else),
            "while"     => Ok(K::While),
            "do"        => Ok(K::Do),
            "for"       => Ok(K::For),
            "return"    => Ok(K::Return),
            "break"     => Ok(K::Break),
            "continue"  => Ok(K::Continue),
            "register"  => Ok(K::Register),
            "volatile"  => Ok(K::Volatile),
            "interrupt" => Ok(K::Interrupt),
            "asm"       => Ok(K::Asm),
            _           => Err(()),
        }
    }
}

/// Chunk of preprocessed source, encoded as a half-open byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Slice the text this span covers.
    #[inline]
    pub fn fragment<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Parse a decimal or `0x`/`0X` hexadecimal literal as an unsigned
/// 32-bit word. Returns `None` when the value does not fit.
pub fn parse_number(fragment: &str) -> Option<u32> {
    if let Some(hex) = fragment
        .strip_prefix("0x")
        .or_else(|| fragment.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else {
        fragment.parse::<u32>().ok()
    }
}
