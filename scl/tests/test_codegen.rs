//! Assembly generation: listing shape, lowering and determinism.
use scl::{
    ast::Program,
    codegen::{CodeGen, CodegenConf},
    error::CodegenError,
    parse_unit,
    preproc::PreprocessedSource,
};

fn parse(source: &str) -> Program {
    let unit = PreprocessedSource::from_source(source, "test.scl");
    parse_unit(&unit).expect("parse failed")
}

fn compile(source: &str) -> String {
    let program = parse(source);
    CodeGen::new(&program).generate().expect("codegen failed")
}

fn compile_err(source: &str) -> CodegenError {
    let program = parse(source);
    CodeGen::new(&program)
        .generate()
        .expect_err("expected codegen to fail")
}

#[test]
fn test_listing_header_shape() {
    let listing = compile("function main() { return 0; }");
    let mut lines = listing.lines();
    assert_eq!(lines.next(), Some("format binary"));
    assert_eq!(lines.next(), Some("include \"ISA.inc\""));
    assert!(listing.contains("\tmov r31, main addr"));
    assert!(listing.contains("main:"));
    assert!(listing.contains("\thlt"));
}

#[test]
fn test_custom_isa_include_path() {
    let program = parse("function main() { return 0; }");
    let conf = CodegenConf {
        isa_include: "../isa/ISA.inc".to_string(),
        ..CodegenConf::default()
    };
    let listing = CodeGen::with_conf(&program, conf)
        .generate()
        .expect("codegen failed");
    assert!(listing.contains("include \"../isa/ISA.inc\""));
}

#[test]
fn test_compilation_is_deterministic() {
    let source = "uint32 g = 1;\n\
                  function helper(a, b) { while (a < b) { a += 1; } return a; }\n\
                  function main() { if (g) { return helper(2, 5) * 3; } return g / 2; }";
    let program = parse(source);
    let first = CodeGen::new(&program).generate().expect("codegen failed");
    let second = CodeGen::new(&program).generate().expect("codegen failed");
    assert_eq!(first, second);
}

#[test]
fn test_main_is_emitted_first() {
    let listing = compile(
        "function helper() { return 1; } function main() { return helper(); }",
    );
    let main_at = listing.find("main:").expect("main label");
    let helper_at = listing.find("func_helper:").expect("helper label");
    assert!(main_at < helper_at);
}

#[test]
fn test_function_call_links_through_stack() {
    let listing = compile(
        "function double(x) { return x + x; } function main() { return double(21); }",
    );
    // The caller parks the forward return address in the link cell.
    assert!(listing.contains("ret_addr_0"));
    assert!(listing.contains("\tmov r31, func_double addr"));
    assert!(listing.contains("ret_addr_0:"));
    // The callee pops it to return.
    assert!(listing.contains("\tlds r10, [r30]"));
}

#[test]
fn test_globals_in_data_section() {
    let listing = compile(
        "uint32 g = 7;\n\
         uint32 tbl[3] = {1, 2};\n\
         uint32* p;\n\
         function main() { return g; }",
    );
    assert!(listing.contains("g dd 7"));
    // Array initializers pad with zeros to the declared length.
    assert!(listing.contains("tbl dd 1, 2, 0"));
    assert!(listing.contains("p dd 0"));
}

#[test]
fn test_non_constant_global_initializer_fails() {
    let err = compile_err(
        "function f() { return 1; }\nuint32 g = f();\nfunction main() { return g; }",
    );
    assert!(matches!(err, CodegenError::NonConstantInit { .. }));
}

#[test]
fn test_label_numbering_per_category() {
    let listing = compile(
        "function main() {\n\
             uint32 i = 0;\n\
             while (i < 3) { i += 1; }\n\
             while (i < 9) { i += 2; }\n\
             if (i == 9) { i = 0; }\n\
             return i;\n\
         }",
    );
    assert!(listing.contains("while_start_0:"));
    assert!(listing.contains("while_start_1:"));
    assert!(listing.contains("while_end_0:"));
    assert!(listing.contains("while_end_1:"));
    assert!(listing.contains("if_end_0:"));
}

#[test]
fn test_loop_lowering_shapes() {
    let listing = compile(
        "function main() {\n\
             uint32 n = 0;\n\
             do { n += 1; } while (n < 3);\n\
             for (uint32 i = 0; i < 4; i++) { n += i; }\n\
             return n;\n\
         }",
    );
    assert!(listing.contains("do_start_0:"));
    assert!(listing.contains("do_cond_0:"));
    assert!(listing.contains("for_start_0:"));
    assert!(listing.contains("for_step_0:"));
    assert!(listing.contains("for_end_0:"));
}

#[test]
fn test_multiply_lowers_inline() {
    let listing = compile("function main() { return 6 * 7; }");
    assert!(listing.contains("mul_start_0:"));
    assert!(listing.contains("mul_end_0:"));
    // No multiply instruction exists in the ISA.
    assert!(!listing.contains("\tmul "));
}

#[test]
fn test_division_emits_runtime_helper_once() {
    let listing = compile("function main() { return 10 / 3 + 20 / 4; }");
    let helpers = listing
        .lines()
        .filter(|line| *line == "udiv32:")
        .count();
    assert_eq!(helpers, 1);
    assert!(listing.contains("\tmov r31, udiv32 addr"));

    let listing = compile("function main() { return 10 % 3; }");
    assert!(listing.lines().any(|line| line == "umod32:"));
}

#[test]
fn test_relational_lowering_uses_flag_compares() {
    let listing = compile("function main() { return 2 < 3; }");
    assert!(listing.contains("\tcmpb "));
    assert!(listing.contains("\tcmovnz "));

    let listing = compile("function main() { return 2 == 3; }");
    assert!(listing.contains("\tcmpe "));
}

#[test]
fn test_logical_lowering_short_circuits() {
    let listing = compile("function main() { return 1 && 2; }");
    assert!(listing.contains("and_end_0:"));
    let listing = compile("function main() { return 1 || 2; }");
    assert!(listing.contains("or_end_0:"));
}

#[test]
fn test_uart_and_gpio_intrinsics_lower_to_instructions() {
    let listing = compile(
        "function main() {\n\
             uart_set_baud(9600);\n\
             uart_write(72);\n\
             uint32 c = uart_read();\n\
             gpio_set(13, 1, 0);\n\
             gpio_write(13, 1);\n\
             uint32 v = gpio_read(13);\n\
             return c + v;\n\
         }",
    );
    assert!(listing.contains("\tsetu "));
    assert!(listing.contains("\toutu "));
    assert!(listing.contains("\tinu "));
    assert!(listing.contains("\tsetg "));
    assert!(listing.contains("\toutg "));
    assert!(listing.contains("\tgetg "));
}

#[test]
fn test_unsupported_intrinsic_is_rejected() {
    let err = compile_err("function main() { timer_start(); return 0; }");
    match err {
        CodegenError::UnknownIntrinsic { name, .. } => assert_eq!(name.as_str(), "timer_start"),
        other => panic!("expected an unknown intrinsic error, got {}", other),
    }

    let err = compile_err("function main() { return set_bit(0, 3); }");
    assert!(matches!(err, CodegenError::UnknownIntrinsic { .. }));
}

#[test]
fn test_too_many_parameters_is_rejected() {
    let err = compile_err(
        "function wide(a, b, c, d, e, f) { return a; } function main() { return 0; }",
    );
    assert!(matches!(err, CodegenError::TooManyParams { .. }));
}

#[test]
fn test_undefined_symbols_at_lowering() {
    let err = compile_err("function main() { return q; }");
    assert!(matches!(err, CodegenError::UndefinedVariable { .. }));

    let err = compile_err("function main() { return nope(3); }");
    assert!(matches!(err, CodegenError::UndefinedFunction { .. }));
}

#[test]
fn test_asm_block_is_emitted_verbatim() {
    let listing = compile("function main() { asm { outu r4\nnop }; return 0; }");
    assert!(listing.contains("; asm block (test.scl:1)"));
    assert!(listing.contains("\toutu r4"));
    assert!(listing.contains("\tnop"));
    assert!(listing.contains("; end asm block"));
}

#[test]
fn test_local_arrays_use_the_software_stack() {
    let listing = compile(
        "function main() { uint32 buf[4]; buf[2] = 9; return buf[2]; }",
    );
    // 16 bytes reserved and freed for the array.
    assert!(listing.contains("\tsub r30, r30, 16"));
    assert!(listing.contains("\tadd r30, r30, 16"));
}

#[test]
fn test_address_taken_scalars_live_on_the_stack() {
    let listing = compile(
        "function main() { uint32 x = 5; uint32* p = &x; *p = 9; return x; }",
    );
    // x spills to a stack cell so &x exists.
    assert!(listing.contains("\tsub r30, r30, 4"));
    assert!(listing.contains("\tlds [r30], r"));
}

#[test]
fn test_register_variables_pin_hardware_slots() {
    let listing = compile("function main() { register uint32 r5 = 3; r5++; return r5; }");
    assert!(listing.contains("\tadd r5, r5, 1"));
    // The return value is read straight out of the pinned slot.
    assert!(listing.contains("\tmov r0, r5"));
}

#[test]
fn test_pointer_arithmetic_scales_by_cell_size() {
    let listing = compile(
        "function main() {\n\
             uint32 arr[2] = {3, 4};\n\
             uint32* p = &arr[0];\n\
             p = p + 1;\n\
             return *p;\n\
         }",
    );
    // The integer side is shifted left by 2 before the add.
    assert!(listing.contains("shl "));
}
