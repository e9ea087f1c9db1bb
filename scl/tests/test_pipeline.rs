//! Front end: preprocessor, lexer and parser.
use scl::{
    error::{LexError, ParseError, PreprocessError, SclError},
    lexer::Lexer,
    parse_unit,
    preproc::{PreprocessedSource, Preprocessor},
    tokens::{KeywordKind, TokenKind},
};

fn fixture(name: &str) -> String {
    format!("{}/tests/programs/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn lex_kinds(source: &str) -> Vec<TokenKind> {
    let unit = PreprocessedSource::from_source(source, "test.scl");
    Lexer::new(&unit)
        .tokenize()
        .expect("lexing failed")
        .into_iter()
        .map(|token| token.kind)
        .collect()
}

fn parse_err(source: &str) -> ParseError {
    let unit = PreprocessedSource::from_source(source, "test.scl");
    match parse_unit(&unit) {
        Err(SclError::Parse(err)) => err,
        Ok(_) => panic!("expected a parse error"),
        Err(other) => panic!("expected a parse error, got {}", other),
    }
}

fn lex_err(source: &str) -> LexError {
    let unit = PreprocessedSource::from_source(source, "test.scl");
    match parse_unit(&unit) {
        Err(SclError::Lex(err)) => err,
        Ok(_) => panic!("expected a lex error"),
        Err(other) => panic!("expected a lex error, got {}", other),
    }
}

// --- Lexer ---------------------------------------------------------------

#[test]
fn test_lex_maximal_munch() {
    use TokenKind as T;
    assert_eq!(
        lex_kinds("x <<= 1;"),
        vec![T::Ident, T::Shl, T::Eq, T::Number, T::Semicolon, T::EOS]
    );
    assert_eq!(
        lex_kinds("a <= b < c >> d"),
        vec![T::Ident, T::LtEq, T::Ident, T::Lt, T::Ident, T::Shr, T::Ident, T::EOS]
    );
    assert_eq!(
        lex_kinds("i++; --j;"),
        vec![
            T::Ident,
            T::PlusPlus,
            T::Semicolon,
            T::MinusMinus,
            T::Ident,
            T::Semicolon,
            T::EOS
        ]
    );
}

#[test]
fn test_lex_keywords_and_idents() {
    use KeywordKind as K;
    use TokenKind as T;
    assert_eq!(
        lex_kinds("uint32 uint33 do dodo"),
        vec![
            T::Keyword(K::Uint32),
            T::Ident,
            T::Keyword(K::Do),
            T::Ident,
            T::EOS
        ]
    );
}

#[test]
fn test_lex_comments() {
    use TokenKind as T;
    assert_eq!(
        lex_kinds("1 // trailing 'text'\n/* block\n comment */ 2"),
        vec![T::Number, T::Number, T::EOS]
    );
}

#[test]
fn test_lex_hex_literals() {
    use TokenKind as T;
    assert_eq!(lex_kinds("0xFF 0X10 255"), vec![T::Number, T::Number, T::Number, T::EOS]);
}

#[test]
fn test_lex_number_out_of_range() {
    let err = lex_err("function main() { return 4294967296; }");
    assert!(matches!(err, LexError::MalformedNumber { .. }));

    let err = lex_err("function main() { return 0x1FFFFFFFF; }");
    assert!(matches!(err, LexError::MalformedNumber { .. }));
}

#[test]
fn test_lex_unterminated_comment() {
    let err = lex_err("function main() { /* no end");
    assert!(matches!(err, LexError::UnterminatedComment { .. }));
}

#[test]
fn test_lex_stray_character() {
    let err = lex_err("function main() { return 1 @ 2; }");
    assert!(matches!(err, LexError::UnknownCharacter { ch: '@', .. }));
}

#[test]
fn test_lex_positions_track_lines() {
    let unit = PreprocessedSource::from_source("uint32 a;\n  return;", "pos.scl");
    let tokens = Lexer::new(&unit).tokenize().expect("lexing failed");
    // `return` is the fourth token: uint32, a, `;`, return.
    let ret = &tokens[3];
    assert_eq!(ret.pos.file.as_str(), "pos.scl");
    assert_eq!(ret.pos.line, 2);
    assert_eq!(ret.pos.column, 3);
}

// --- Parser --------------------------------------------------------------

#[test]
fn test_parse_factorial() {
    let unit = PreprocessedSource::from_source(
        "function factorial(n) { if (n <= 1) return 1; return n * factorial(n - 1); }\n\
         function main() { return factorial(5); }",
        "fact.scl",
    );
    let program = parse_unit(&unit).expect("parse failed");
    assert_eq!(program.functions().count(), 2);
}

#[test]
fn test_parse_statement_forms() {
    let unit = PreprocessedSource::from_source(
        r#"
uint32 limit = 8;

function main() {
    uint32 arr[4] = {1, 2, 3, 4};
    uint32* p = &arr[0];
    volatile uint32 status = 0;
    register uint32 r5 = 1;
    do { status += *p; p++; } while (status < limit);
    for (uint32 i = 0; i < 4; i++) {
        if (i == 2) { continue; }
        status -= 1;
    }
    asm { mov r0, 1 };
    return status;
}
"#,
        "forms.scl",
    );
    parse_unit(&unit).expect("parse failed");
}

#[test]
fn test_parse_asm_payload() {
    use scl::ast::{Item, Stmt};
    let unit = PreprocessedSource::from_source(
        "function main() { asm { outu r4\nhlt }; return 0; }",
        "asm.scl",
    );
    let program = parse_unit(&unit).expect("parse failed");
    let main = match &program.items[0] {
        Item::Func(func) => func,
        Item::Global(_) => panic!("expected a function"),
    };
    match &main.body.stmts[0] {
        Stmt::Asm { body, .. } => {
            assert!(body.contains("outu r4"));
            assert!(body.contains("hlt"));
        }
        other => panic!("expected an asm block, got {:?}", other),
    }
}

#[test]
fn test_parse_rejects_top_level_statement() {
    let err = parse_err("return 5;");
    assert!(matches!(err, ParseError::Unexpected { .. }));
}

#[test]
fn test_parse_rejects_break_outside_loop() {
    let err = parse_err("function main() { break; return 0; }");
    assert!(matches!(err, ParseError::BreakOutsideLoop { .. }));

    let err = parse_err("function main() { continue; return 0; }");
    assert!(matches!(err, ParseError::ContinueOutsideLoop { .. }));
}

#[test]
fn test_parse_rejects_duplicate_function() {
    let err = parse_err(
        "function f() { return 1; } function f() { return 2; } function main() { return 0; }",
    );
    assert!(matches!(err, ParseError::DuplicateFunction { .. }));
}

#[test]
fn test_parse_requires_main() {
    let err = parse_err("function helper() { return 1; }");
    assert!(matches!(err, ParseError::MissingMain));
}

#[test]
fn test_parse_register_names() {
    let err = parse_err("function main() { register uint32 r31 = 0; return 0; }");
    assert!(matches!(err, ParseError::InvalidRegister { .. }));

    let err = parse_err("function main() { register uint32 speed = 0; return 0; }");
    assert!(matches!(err, ParseError::InvalidRegister { .. }));
}

#[test]
fn test_parse_rejects_interrupt_params() {
    let err = parse_err(
        "interrupt function isr(x) { return 0; } function main() { return 0; }",
    );
    assert!(matches!(err, ParseError::Generic { .. }));
}

#[test]
fn test_parse_rejects_bad_lvalue_in_addr_of() {
    let err = parse_err("function main() { uint32 x = 0; x = &(1 + 2); return x; }");
    assert!(matches!(err, ParseError::MalformedLValue { .. }));
}

#[test]
fn test_parse_requires_literal_array_length() {
    let err = parse_err("function main() { uint32 n = 2; uint32 a[n]; return 0; }");
    assert!(matches!(err, ParseError::Unexpected { .. }));
}

#[test]
fn test_parse_rejects_register_array() {
    let err = parse_err("function main() { register uint32 r4[2]; return 0; }");
    assert!(matches!(err, ParseError::InvalidQualifier { .. }));
}

// --- Preprocessor --------------------------------------------------------

#[test]
fn test_preproc_define_expansion() {
    let unit = Preprocessor::new()
        .preprocess_str("#define N 5\nfunction main() { return N; }", "macro.scl")
        .expect("preprocess failed");
    assert!(unit.text().contains("return 5;"));
    // NOT a substring of longer identifiers.
    let unit = Preprocessor::new()
        .preprocess_str("#define N 5\nuint32 NN = N;", "macro.scl")
        .expect("preprocess failed");
    assert!(unit.text().contains("NN = 5"));
}

#[test]
fn test_preproc_undef() {
    let unit = Preprocessor::new()
        .preprocess_str("#define N 5\n#undef N\nreturn N;", "undef.scl")
        .expect("preprocess failed");
    assert!(unit.text().contains("return N;"));
    // Undefining an unknown name is allowed.
    Preprocessor::new()
        .preprocess_str("#undef NEVER_DEFINED\n", "undef.scl")
        .expect("preprocess failed");
}

#[test]
fn test_preproc_directives_only_at_column_zero() {
    let unit = Preprocessor::new()
        .preprocess_str("  #define A 1", "indent.scl")
        .expect("preprocess failed");
    assert!(unit.text().contains("#define"));
}

#[test]
fn test_preproc_macro_recursion_fails() {
    let err = Preprocessor::new()
        .preprocess_str(
            "#define X Y\n#define Y X\nfunction main() { return X; }",
            "loop.scl",
        )
        .expect_err("expected macro recursion to fail");
    assert!(matches!(err, PreprocessError::MacroRecursion { .. }));
}

#[test]
fn test_preproc_malformed_directives() {
    let err = Preprocessor::new()
        .preprocess_str("#include banana", "bad.scl")
        .expect_err("expected a malformed include to fail");
    assert!(matches!(err, PreprocessError::MalformedDirective { .. }));

    let err = Preprocessor::new()
        .preprocess_str("#define", "bad.scl")
        .expect_err("expected a nameless define to fail");
    assert!(matches!(err, PreprocessError::MalformedDirective { .. }));

    let err = Preprocessor::new()
        .preprocess_str("#pragma once", "bad.scl")
        .expect_err("expected an unknown directive to fail");
    assert!(matches!(err, PreprocessError::MalformedDirective { .. }));
}

#[test]
fn test_preproc_missing_include() {
    let err = Preprocessor::new()
        .preprocess_str("#include \"does_not_exist_anywhere.inc\"", "missing.scl")
        .expect_err("expected a missing include to fail");
    assert!(matches!(err, PreprocessError::MissingInclude { .. }));
}

#[test]
fn test_preproc_include_resolves_relative() {
    let program = scl::build_ast(fixture("include_main.scl")).expect("front end failed");
    assert_eq!(program.functions().count(), 2);
    let mut interp = scl::interp::Interpreter::new(&program);
    assert_eq!(interp.run().expect("program failed"), 42);
}

#[test]
fn test_preproc_include_cycle() {
    let err = scl::build_ast(fixture("cycle_a.scl")).expect_err("expected an include cycle");
    match err {
        SclError::Preprocess(PreprocessError::CircularInclude { cycle, .. }) => {
            assert!(cycle.contains("cycle_a"));
            assert!(cycle.contains("cycle_b"));
        }
        other => panic!("expected a circular include error, got {}", other),
    }
    assert!(format!(
        "{}",
        scl::build_ast(fixture("cycle_a.scl")).expect_err("expected an include cycle")
    )
    .contains("circular include"));
}

#[test]
fn test_preproc_no_directives_is_identity() {
    let path = fixture("plain.scl");
    let contents = std::fs::read_to_string(&path).expect("fixture readable");
    let unit = Preprocessor::new().preprocess(&path).expect("preprocess failed");
    assert_eq!(unit.text(), contents.trim_end_matches('\n'));
}

#[test]
fn test_preproc_positions_survive_includes() {
    // A token from the included file must report the include's name.
    let path = fixture("include_main.scl");
    let unit = Preprocessor::new().preprocess(&path).expect("preprocess failed");
    let tokens = Lexer::new(&unit).tokenize().expect("lexing failed");
    let helper = tokens
        .iter()
        .find(|token| {
            token.kind == TokenKind::Ident && unit.text()[token.span.start..token.span.end] == *"helper"
        })
        .expect("helper token present");
    assert!(helper.pos.file.contains("defs.inc"));
}
