//! Result and errors.
use std::{
    fmt::{self, Display, Formatter},
    io,
};

use smol_str::SmolStr;

pub type SclResult<T> = std::result::Result<T, SclError>;

/// Original source location: file, 1-based line, 1-based column.
///
/// Positions always refer to the file the text was written in, even
/// when the line reached the lexer through an `#include`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pos {
    pub file: SmolStr,
    pub line: u32,
    pub column: u32,
}

impl Display for Pos {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug)]
pub enum SclError {
    Preprocess(PreprocessError),
    Lex(LexError),
    Parse(ParseError),
    Runtime(RuntimeError),
    Codegen(CodegenError),
    Io(io::Error),
}

impl Display for SclError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Preprocess(err) => write!(f, "preprocess error: {}", err),
            Self::Lex(err) => write!(f, "lex error: {}", err),
            Self::Parse(err) => write!(f, "parse error: {}", err),
            Self::Runtime(err) => write!(f, "runtime error: {}", err),
            Self::Codegen(err) => write!(f, "codegen error: {}", err),
            Self::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for SclError {}

impl From<PreprocessError> for SclError {
    fn from(err: PreprocessError) -> Self {
        SclError::Preprocess(err)
    }
}

impl From<LexError> for SclError {
    fn from(err: LexError) -> Self {
        SclError::Lex(err)
    }
}

impl From<ParseError> for SclError {
    fn from(err: ParseError) -> Self {
        SclError::Parse(err)
    }
}

impl From<RuntimeError> for SclError {
    fn from(err: RuntimeError) -> Self {
        SclError::Runtime(err)
    }
}

impl From<CodegenError> for SclError {
    fn from(err: CodegenError) -> Self {
        SclError::Codegen(err)
    }
}

impl From<io::Error> for SclError {
    fn from(err: io::Error) -> Self {
        SclError::Io(err)
    }
}

/// Errors raised while resolving `#include`/`#define`/`#undef`.
#[derive(Debug)]
pub enum PreprocessError {
    MissingInclude { name: String, pos: Pos },
    CircularInclude { cycle: String, pos: Pos },
    MacroRecursion { pos: Pos },
    MalformedDirective { detail: String, pos: Pos },
    Unreadable { path: String, cause: io::Error },
}

impl Display for PreprocessError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::MissingInclude { name, pos } => {
                write!(f, "include file not found: '{}' at {}", name, pos)
            }
            Self::CircularInclude { cycle, pos } => {
                write!(f, "circular include detected: {} at {}", cycle, pos)
            }
            Self::MacroRecursion { pos } => {
                write!(
                    f,
                    "macro expansion did not settle, suspected recursive macro at {}",
                    pos
                )
            }
            Self::MalformedDirective { detail, pos } => {
                write!(f, "malformed directive: {} at {}", detail, pos)
            }
            Self::Unreadable { path, cause } => {
                write!(f, "cannot read '{}': {}", path, cause)
            }
        }
    }
}

impl std::error::Error for PreprocessError {}

#[derive(Debug)]
pub enum LexError {
    UnterminatedComment { pos: Pos },
    UnterminatedAsm { pos: Pos },
    MalformedNumber { fragment: String, pos: Pos },
    UnknownCharacter { ch: char, pos: Pos },
}

impl Display for LexError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::UnterminatedComment { pos } => {
                write!(f, "unterminated block comment at {}", pos)
            }
            Self::UnterminatedAsm { pos } => {
                write!(f, "unterminated asm block at {}", pos)
            }
            Self::MalformedNumber { fragment, pos } => {
                write!(
                    f,
                    "malformed integer literal '{}' (must fit in 32 bits) at {}",
                    fragment, pos
                )
            }
            Self::UnknownCharacter { ch, pos } => {
                write!(f, "unexpected character '{}' at {}", ch, pos)
            }
        }
    }
}

impl std::error::Error for LexError {}

/// Error returned when the parser meets a token it cannot use.
#[derive(Debug)]
pub enum ParseError {
    Unexpected {
        expected: String,
        found: String,
        pos: Pos,
    },
    MalformedLValue { pos: Pos },
    DuplicateFunction { name: SmolStr, pos: Pos },
    MissingMain,
    ReturnOutsideFunction { pos: Pos },
    BreakOutsideLoop { pos: Pos },
    ContinueOutsideLoop { pos: Pos },
    InvalidRegister { name: SmolStr, pos: Pos },
    InvalidQualifier { detail: String, pos: Pos },
    Generic { message: String, pos: Pos },
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Unexpected {
                expected,
                found,
                pos,
            } => write!(
                f,
                "encountered unexpected token '{}', expected '{}' at {}",
                found, expected, pos
            ),
            Self::MalformedLValue { pos } => {
                write!(
                    f,
                    "only variables, array elements and dereferences can be assigned at {}",
                    pos
                )
            }
            Self::DuplicateFunction { name, pos } => {
                write!(f, "function '{}' is already defined at {}", name, pos)
            }
            Self::MissingMain => write!(f, "program must define a 'main' function"),
            Self::ReturnOutsideFunction { pos } => {
                write!(f, "'return' outside of a function body at {}", pos)
            }
            Self::BreakOutsideLoop { pos } => {
                write!(f, "'break' outside of a loop at {}", pos)
            }
            Self::ContinueOutsideLoop { pos } => {
                write!(f, "'continue' outside of a loop at {}", pos)
            }
            Self::InvalidRegister { name, pos } => {
                write!(
                    f,
                    "register variables must be named r0-r30, got '{}' at {}",
                    name, pos
                )
            }
            Self::InvalidQualifier { detail, pos } => {
                write!(f, "invalid qualifier: {} at {}", detail, pos)
            }
            Self::Generic { message, pos } => write!(f, "{} at {}", message, pos),
        }
    }
}

impl std::error::Error for ParseError {}

/// Runtime failure inside the tree-walking interpreter.
#[derive(Debug)]
pub enum RuntimeError {
    UndefinedVariable { name: SmolStr, pos: Pos },
    UndefinedFunction { name: SmolStr, pos: Pos },
    NotAnArray { name: SmolStr, pos: Pos },
    AssignToArray { name: SmolStr, pos: Pos },
    AddressOfRegister { name: SmolStr, pos: Pos },
    WrongArity {
        name: SmolStr,
        expected: usize,
        found: usize,
        pos: Pos,
    },
    DivideByZero { pos: Pos },
    IndexOutOfBounds {
        name: SmolStr,
        index: u32,
        len: u32,
        pos: Pos,
    },
    MemoryTrap { address: u32, pos: Pos },
    OutOfMemory { pos: Pos },
    RecursionLimit { limit: usize, pos: Pos },
    ReadOnlyRegister { pos: Pos },
    PinOutOfRange { pin: u32, pos: Pos },
    UnconfiguredPin { pin: u32, pos: Pos },
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::UndefinedVariable { name, pos } => {
                write!(f, "undefined variable '{}' at {}", name, pos)
            }
            Self::UndefinedFunction { name, pos } => {
                write!(f, "undefined function '{}' at {}", name, pos)
            }
            Self::NotAnArray { name, pos } => {
                write!(f, "'{}' is not an array at {}", name, pos)
            }
            Self::AssignToArray { name, pos } => {
                write!(f, "cannot assign to array '{}' as a whole at {}", name, pos)
            }
            Self::AddressOfRegister { name, pos } => {
                write!(
                    f,
                    "cannot take the address of register variable '{}' at {}",
                    name, pos
                )
            }
            Self::WrongArity {
                name,
                expected,
                found,
                pos,
            } => write!(
                f,
                "'{}' expects {} arguments, got {} at {}",
                name, expected, found, pos
            ),
            Self::DivideByZero { pos } => write!(f, "division by zero at {}", pos),
            Self::IndexOutOfBounds {
                name,
                index,
                len,
                pos,
            } => write!(
                f,
                "array index out of bounds: {}[{}], length {} at {}",
                name, index, len, pos
            ),
            Self::MemoryTrap { address, pos } => {
                write!(f, "invalid memory address {:#010x} at {}", address, pos)
            }
            Self::OutOfMemory { pos } => write!(f, "simulated memory exhausted at {}", pos),
            Self::RecursionLimit { limit, pos } => {
                write!(f, "call depth exceeded limit of {} at {}", limit, pos)
            }
            Self::ReadOnlyRegister { pos } => {
                write!(f, "cannot write to register r31 (program counter) at {}", pos)
            }
            Self::PinOutOfRange { pin, pos } => {
                write!(f, "gpio pin {} out of range 0-31 at {}", pin, pos)
            }
            Self::UnconfiguredPin { pin, pos } => {
                write!(f, "gpio pin {} is not configured at {}", pin, pos)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Failure while lowering the AST to assembly.
#[derive(Debug)]
pub enum CodegenError {
    RegisterExhausted { function: SmolStr },
    UnknownIntrinsic { name: SmolStr, pos: Pos },
    UndefinedVariable { name: SmolStr, pos: Pos },
    UndefinedFunction { name: SmolStr, pos: Pos },
    NotAnArray { name: SmolStr, pos: Pos },
    InvalidAssignTarget { name: SmolStr, pos: Pos },
    AddressOfRegister { name: SmolStr, pos: Pos },
    TooManyParams { function: SmolStr, pos: Pos },
    NonConstantInit { name: SmolStr, pos: Pos },
    IntrinsicArity {
        name: SmolStr,
        expected: usize,
        found: usize,
        pos: Pos,
    },
}

impl Display for CodegenError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::RegisterExhausted { function } => {
                write!(
                    f,
                    "expression too complex, ran out of temporary registers in function '{}'",
                    function
                )
            }
            Self::UnknownIntrinsic { name, pos } => {
                write!(
                    f,
                    "intrinsic '{}' is not supported by the code generator at {}",
                    name, pos
                )
            }
            Self::UndefinedVariable { name, pos } => {
                write!(f, "undefined variable '{}' at {}", name, pos)
            }
            Self::UndefinedFunction { name, pos } => {
                write!(f, "undefined function '{}' at {}", name, pos)
            }
            Self::NotAnArray { name, pos } => {
                write!(f, "'{}' is not an array at {}", name, pos)
            }
            Self::InvalidAssignTarget { name, pos } => {
                write!(f, "cannot assign to '{}' at {}", name, pos)
            }
            Self::AddressOfRegister { name, pos } => {
                write!(
                    f,
                    "cannot take the address of register variable '{}' at {}",
                    name, pos
                )
            }
            Self::TooManyParams { function, pos } => {
                write!(
                    f,
                    "function '{}' has more than 5 parameters at {}",
                    function, pos
                )
            }
            Self::NonConstantInit { name, pos } => {
                write!(
                    f,
                    "global '{}' requires a constant initializer at {}",
                    name, pos
                )
            }
            Self::IntrinsicArity {
                name,
                expected,
                found,
                pos,
            } => write!(
                f,
                "intrinsic '{}' expects {} arguments, got {} at {}",
                name, expected, found, pos
            ),
        }
    }
}

impl std::error::Error for CodegenError {}
