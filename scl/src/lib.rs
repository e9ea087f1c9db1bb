//! Compiler and interpreter for SCL, a small C-flavored language for a
//! 32-register MCU target.
//!
//! The pipeline is strictly linear, each stage consuming the complete
//! output of the previous one:
//!
//! ```text
//! path -> Preprocessor -> text -> Lexer -> tokens -> Parser -> AST
//!                                                              |-> Interpreter
//!                                                              `-> CodeGen
//! ```
//!
//! [`build_ast`] runs the shared front end; [`interp::Interpreter`]
//! and [`codegen::CodeGen`] consume the resulting [`ast::Program`].
pub mod ast;
pub mod codegen;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod preproc;
pub mod token_stream;
pub mod tokens;

use std::path::Path;

pub use self::{
    codegen::{CodeGen, CodegenConf},
    error::{Pos, SclError, SclResult},
    interp::{InterpConf, Interpreter},
    preproc::{PreprocessedSource, Preprocessor},
};

/// Version of *this* implementation.
pub const IMPL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared front end: preprocess, lex, parse.
pub fn build_ast(path: impl AsRef<Path>) -> SclResult<ast::Program> {
    let unit = Preprocessor::new().preprocess(path)?;
    parse_unit(&unit)
}

/// Lex and parse an already-preprocessed unit.
pub fn parse_unit(unit: &PreprocessedSource) -> SclResult<ast::Program> {
    let stream = token_stream::TokenStream::new(unit)?;
    let program = parser::Parser::new(stream).parse_program()?;
    Ok(program)
}

pub mod prelude {
    pub use super::{
        ast::Program,
        build_ast,
        codegen::{CodeGen, CodegenConf},
        error::{SclError, SclResult},
        interp::{BufferDevices, InterpConf, Interpreter, StdioDevices},
    };
}
