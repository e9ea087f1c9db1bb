//! End-to-end interpreter behavior.
use scl::{
    error::{RuntimeError, SclError},
    interp::{BufferDevices, InterpConf, Interpreter},
    parse_unit,
    preproc::PreprocessedSource,
};

fn fixture(name: &str) -> String {
    format!("{}/tests/programs/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn run(source: &str) -> Result<u32, SclError> {
    let unit = PreprocessedSource::from_source(source, "test.scl");
    let program = parse_unit(&unit)?;
    let mut interp =
        Interpreter::with_devices(&program, InterpConf::default(), BufferDevices::default());
    interp.run()
}

fn eval(source: &str) -> u32 {
    run(source).expect("program failed")
}

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(eval("function main() { return 2 + 3 * 4; }"), 14);
    assert_eq!(eval("function main() { return (2 + 3) * 4; }"), 20);
    assert_eq!(eval("function main() { return 7 % 4 + 10 / 5; }"), 5);
    assert_eq!(eval("function main() { return 1 << 4 | 3; }"), 19);
}

#[test]
fn test_factorial_recursion() {
    let source = "function factorial(n) { if (n <= 1) return 1; return n * factorial(n - 1); }\n\
                  function main() { return factorial(5); }";
    assert_eq!(eval(source), 120);
}

#[test]
fn test_fibonacci_loop() {
    let source = "function main() {\n\
                      uint32 a = 0; uint32 b = 1; uint32 i = 2;\n\
                      while (i <= 10) { uint32 t = a + b; a = b; b = t; i = i + 1; }\n\
                      return b;\n\
                  }";
    assert_eq!(eval(source), 55);
}

#[test]
fn test_pointer_walk_over_array() {
    let source = "function main() {\n\
                      uint32 arr[5] = {10, 20, 30, 40, 50};\n\
                      uint32* p = &arr[0];\n\
                      uint32 s = 0;\n\
                      uint32 i = 0;\n\
                      while (i < 5) { s = s + *p; p = p + 1; i = i + 1; }\n\
                      return s;\n\
                  }";
    assert_eq!(eval(source), 150);
}

#[test]
fn test_uart_write_reaches_sink() {
    let unit = PreprocessedSource::from_source(
        "function main() { uart_write(72); uart_write(105); return 0; }",
        "uart.scl",
    );
    let program = parse_unit(&unit).expect("parse failed");
    let mut interp =
        Interpreter::with_devices(&program, InterpConf::default(), BufferDevices::default());
    assert_eq!(interp.run().expect("program failed"), 0);
    assert_eq!(interp.devices().tx, vec![0x48, 0x69]);
}

#[test]
fn test_uart_read_from_bound_source() {
    let unit = PreprocessedSource::from_source(
        "function main() { return uart_get_status() + uart_read() + uart_read(); }",
        "uart.scl",
    );
    let program = parse_unit(&unit).expect("parse failed");
    let mut devices = BufferDevices::default();
    devices.rx.extend([5, 7]);
    let mut interp = Interpreter::with_devices(&program, InterpConf::default(), devices);
    // status = tx_ready | rx_ready << 1 = 3, then 5 + 7 from the queue.
    assert_eq!(interp.run().expect("program failed"), 15);
}

#[test]
fn test_uart_read_empty_source_returns_zero() {
    assert_eq!(eval("function main() { return uart_read(); }"), 0);
}

#[test]
fn test_wrapping_arithmetic() {
    assert_eq!(eval("function main() { return 0xFFFFFFFF + 1; }"), 0);
    assert_eq!(eval("function main() { return 0 - 1; }"), 0xFFFFFFFF);
    assert_eq!(
        eval("function main() { return 0x80000000 * 2 + 3; }"),
        3
    );
}

#[test]
fn test_division_by_zero_is_diagnosed() {
    let err = run("function main() { return 1 / 0; }").expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::DivideByZero { .. })
    ));

    let err = run("function main() { uint32 z = 0; return 5 % z; }").expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::DivideByZero { .. })
    ));
}

#[test]
fn test_signed_vs_unsigned_division() {
    // int32 on either operand makes the division signed.
    let source = "function main() { int32 a = 0 - 10; int32 b = 3; return a / b; }";
    assert_eq!(eval(source), (-3i32) as u32);

    let source = "function main() { uint32 a = 0 - 10; uint32 b = 3; return a / b; }";
    assert_eq!(eval(source), 4_294_967_286 / 3);
}

#[test]
fn test_signed_vs_unsigned_comparison() {
    let source = "function main() { int32 a = 0 - 1; if (a < 0) { return 1; } return 2; }";
    assert_eq!(eval(source), 1);

    let source = "function main() { uint32 a = 0 - 1; if (a < 1) { return 1; } return 2; }";
    assert_eq!(eval(source), 2);
}

#[test]
fn test_logical_operators_short_circuit() {
    // The right operand must not run when the left decides: a zero
    // divisor there would otherwise be diagnosed.
    assert_eq!(
        eval("function main() { uint32 z = 0; return 0 && 1 / z; }"),
        0
    );
    assert_eq!(
        eval("function main() { uint32 z = 0; return 1 || 1 / z; }"),
        1
    );
    assert_eq!(eval("function main() { return 2 && 3; }"), 1);
    assert_eq!(eval("function main() { return !5 + !0; }"), 1);
    assert_eq!(eval("function main() { return ~0xFFFFFFF0; }"), 0xF);
}

#[test]
fn test_do_while_runs_body_first() {
    let source = "function main() { uint32 n = 0; do { n = n + 1; } while (n < 3); return n; }";
    assert_eq!(eval(source), 3);

    // Post-test: the body runs once even when the condition is false.
    let source = "function main() { uint32 n = 0; do { n = n + 1; } while (0); return n; }";
    assert_eq!(eval(source), 1);
}

#[test]
fn test_for_with_break_and_continue() {
    let source = "function main() {\n\
                      uint32 s = 0;\n\
                      for (uint32 i = 0; i < 10; i++) {\n\
                          if (i == 7) { break; }\n\
                          if (i % 2 == 1) { continue; }\n\
                          s = s + i;\n\
                      }\n\
                      return s;\n\
                  }";
    assert_eq!(eval(source), 12);
}

#[test]
fn test_compound_assignment() {
    let source = "function main() { uint32 x = 10; x += 5; x <<= 2; x -= 4; x |= 1; return x; }";
    assert_eq!(eval(source), 57);
}

#[test]
fn test_increment_decrement_statements() {
    let source = "function main() { uint32 x = 5; x++; ++x; x--; return x; }";
    assert_eq!(eval(source), 6);
}

#[test]
fn test_block_scoping_shadows() {
    let source = "function main() { uint32 x = 1; { uint32 x = 2; x = 3; } return x; }";
    assert_eq!(eval(source), 1);
}

#[test]
fn test_function_scope_parents_to_globals() {
    // Callees see globals, never the caller's locals.
    let source = "uint32 g = 7;\n\
                  function get() { return g; }\n\
                  function main() { uint32 g = 100; return get(); }";
    assert_eq!(eval(source), 7);
}

#[test]
fn test_globals_and_arrays() {
    let source = "uint32 counter = 5;\n\
                  uint32 table[3] = {1, 2, 3};\n\
                  function bump() { counter += 10; return 0; }\n\
                  function main() { bump(); return counter + table[2]; }";
    assert_eq!(eval(source), 18);
}

#[test]
fn test_address_of_local_scalar() {
    let source = "function main() { uint32 x = 5; uint32* p = &x; *p = 9; return x; }";
    assert_eq!(eval(source), 9);
}

#[test]
fn test_array_assignment_and_bounds() {
    let source = "function main() { uint32 a[2]; a[0] = 3; a[1] = 4; return a[0] + a[1]; }";
    assert_eq!(eval(source), 7);

    let err = run("function main() { uint32 a[2]; return a[5]; }").expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::IndexOutOfBounds { .. })
    ));
}

#[test]
fn test_wild_pointer_traps() {
    let err = run("function main() { uint32* p = 0; return *p; }").expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::MemoryTrap { .. })
    ));
}

#[test]
fn test_undefined_names_are_diagnosed() {
    let err = run("function main() { return q; }").expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::UndefinedVariable { .. })
    ));

    let err = run("function main() { return nope(); }").expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::UndefinedFunction { .. })
    ));
}

#[test]
fn test_wrong_arity_is_diagnosed() {
    let err = run("function f(a, b) { return a + b; } function main() { return f(1); }")
        .expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::WrongArity { .. })
    ));

    let err = run("function main() { return uart_write(); }").expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::WrongArity { .. })
    ));
}

#[test]
fn test_recursion_cap() {
    let err = run("function spin() { return spin(); } function main() { return spin(); }")
        .expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::RecursionLimit { .. })
    ));
}

#[test]
fn test_register_variables() {
    let source = "function main() { register uint32 r5 = 7; r5 += 1; return r5; }";
    assert_eq!(eval(source), 8);
}

#[test]
fn test_bit_intrinsics() {
    let source = "function main() {\n\
                      uint32 v = 0;\n\
                      v = set_bit(v, 3);\n\
                      v = toggle_bit(v, 0);\n\
                      if (get_bit(v, 3)) { v = clear_bit(v, 3); }\n\
                      return v;\n\
                  }";
    assert_eq!(eval(source), 1);
}

#[test]
fn test_timer_polling_makes_progress() {
    let source = "function main() {\n\
                      timer_set_period(5);\n\
                      timer_start();\n\
                      uint32 n = 0;\n\
                      while (!timer_expired()) { n = n + 1; }\n\
                      return n;\n\
                  }";
    assert_eq!(eval(source), 4);
}

#[test]
fn test_gpio_requires_configuration() {
    let err = run("function main() { return gpio_read(4); }").expect_err("expected an error");
    assert!(matches!(
        err,
        SclError::Runtime(RuntimeError::UnconfiguredPin { .. })
    ));

    let source = "function main() {\n\
                      gpio_set(4, 1, 0);\n\
                      gpio_write(4, 1);\n\
                      return gpio_read(4);\n\
                  }";
    assert_eq!(eval(source), 1);
}

#[test]
fn test_asm_block_is_ignored() {
    let source = "function main() { asm { mov r0, 42 }; return 3; }";
    assert_eq!(eval(source), 3);
}

#[test]
fn test_interrupt_function_runs_only_when_called() {
    let source = "uint32 hits = 0;\n\
                  interrupt function isr() { hits += 1; }\n\
                  function main() { isr(); isr(); return hits; }";
    assert_eq!(eval(source), 2);
}

#[test]
fn test_delays_are_noops() {
    let source = "function main() { delay_ms(1000); delay_us(5); delay_cycles(99); return 1; }";
    assert_eq!(eval(source), 1);
}

#[test]
fn test_fixture_blink() {
    let program = scl::build_ast(fixture("blink.scl")).expect("front end failed");
    let mut interp =
        Interpreter::with_devices(&program, InterpConf::default(), BufferDevices::default());
    // Seven loop iterations toggle the level to 1; the banner sends "OK".
    assert_eq!(interp.run().expect("program failed"), 1);
    assert_eq!(interp.devices().tx, b"OK".to_vec());
    assert_eq!(interp.peripherals().uart.baud, 9600);
    assert_eq!(interp.peripherals().gpio[13].value, 1);
}

#[test]
fn test_fixture_plain_sum() {
    let program = scl::build_ast(fixture("plain.scl")).expect("front end failed");
    let mut interp = Interpreter::new(&program);
    assert_eq!(interp.run().expect("program failed"), 10);
}
