use std::{cell::RefCell, rc::Rc};

use nirvana::{
    compiler::CompileError,
    parser::ParseErrorKind,
    vm::{RuntimeError, RuntimeErrorKind},
    InterpretError,
};

fn run(source: &str, debug: bool) -> (Result<(), InterpretError>, String) {
    let output = Rc::new(RefCell::new(Vec::new()));
    let result = nirvana::run_program_with_output(source, debug, output.clone());
    let output = String::from_utf8(output.take()).expect("Output should be valid UTF-8");
    (result, output)
}

fn test_valid_program(source: &str, expected_output: &str) {
    let (result, output) = run(source, false);
    result.expect("Program should run without errors");
    assert_eq!(output, expected_output);
}

fn runtime_error(source: &str) -> RuntimeError {
    match run(source, false).0 {
        Err(InterpretError::Runtime(error)) => error,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn test_arithmetic_precedence() {
    test_valid_program("cetak(1 + 2 * 3)", "7\n");
    test_valid_program("print((1 + 2) * 3, 2 ^ 3 ^ 2, -5 + 2)", "9 512 -3\n");
}

#[test]
fn test_numeric_results() {
    test_valid_program("cetak(7 / 2, 2 ^ 3, 1 + 2.5, 7 % 3)", "3.5 8 3.5 1\n");
}

#[test]
fn test_indented_if() {
    let source = r#"
x = 1
y = 2
jika (x < y):
    cetak(999)
"#;
    test_valid_program(source, "999\n");
}

#[test]
fn test_brace_if_with_then_and_else() {
    let source = r#"
x = 5
jika (x > 3) maka {
    cetak("big")
} lain {
    cetak("small")
}
if (x > 10) then { print("huge") }
else { print("not huge") }
"#;
    test_valid_program(source, "big\nnot huge\n");
}

#[test]
fn test_else_binds_to_outer_if_after_dedent() {
    let source = r#"
a = salah
b = benar
jika (a):
    jika (b):
        cetak("inner")
lain:
    cetak("outer else")
"#;
    test_valid_program(source, "outer else\n");
}

#[test]
fn test_greater_is_mirrored_less() {
    let source = r#"
a = 3
b = 2
cetak(a > b, b < a, a >= b, b <= a)
cetak(b > a, a < b, b >= a, a <= b)
"#;
    test_valid_program(source, "true true true true\nfalse false false false\n");
}

#[test]
fn test_greater_mirrors_less_for_numeric_pairs() {
    let pairs = [
        ("3", 3.0, "2", 2.0),
        ("2", 2.0, "2", 2.0),
        ("-4", -4.0, "-7", -7.0),
        ("2.5", 2.5, "2.5", 2.5),
        ("-0.5", -0.5, "0.25", 0.25),
        ("1", 1.0, "1.5", 1.5),
        ("2.0", 2.0, "2", 2.0),
        ("-3", -3.0, "-3.0", -3.0),
        ("0", 0.0, "-0.1", -0.1),
    ];
    for (a_source, a, b_source, b) in pairs {
        let source = format!(
            "a = {a_source}\nb = {b_source}\ncetak(a > b, a >= b, (a > b) == (b < a), (a >= b) == (b <= a))"
        );
        test_valid_program(&source, &format!("{} {} true true\n", a > b, a >= b));
    }
}

#[test]
fn test_for_range_sum() {
    let source = r#"
total = 0
untuk i dalam range(5):
    total = total + i
cetak(total)
"#;
    test_valid_program(source, "10\n");
}

#[test]
fn test_range_with_start() {
    test_valid_program("cetak(range(2, 5), range(0))", "[2, 3, 4] []\n");
}

#[test]
fn test_while_loop() {
    let source = r#"
i = 0
selama (i < 3):
    cetak(i)
    i = i + 1
"#;
    test_valid_program(source, "0\n1\n2\n");
}

#[test]
fn test_fib() {
    let source = r#"
fungsi fib(n):
    jika (n < 2):
        kembali n
    kembali fib(n - 1) + fib(n - 2)

untuk i dalam range(10):
    cetak(fib(i))
"#;
    test_valid_program(source, "0\n1\n1\n2\n3\n5\n8\n13\n21\n34\n");
}

#[test]
fn test_english_keywords_and_braces() {
    let source = r#"
function max(a, b) {
    if (a > b) { return a }
    return b
}
print(max(3, 9), max(4, 1))
"#;
    test_valid_program(source, "9 4\n");
}

#[test]
fn test_implicit_return_is_last_statement_value() {
    let source = r#"
fungsi tambah(a, b):
    a + b
cetak(tambah(2, 3))
"#;
    test_valid_program(source, "5\n");
}

#[test]
fn test_function_without_value_returns_nil() {
    let source = r#"
fungsi diam():
    selama (salah):
        cetak(1)
cetak(diam())
"#;
    test_valid_program(source, "nil\n");
}

#[test]
fn test_if_as_last_statement_returns_branch_value() {
    let source = r#"
fungsi tanda(n):
    jika (n < 0):
        "negatif"
    lain:
        "positif"
cetak(tanda(-2), tanda(2))
"#;
    test_valid_program(source, "negatif positif\n");
}

#[test]
fn test_functions_read_globals() {
    let source = r#"
faktor = 3
fungsi kali(x):
    x * faktor
cetak(kali(4))
"#;
    test_valid_program(source, "12\n");
}

#[test]
fn test_local_declared_in_loop_survives_iterations() {
    let source = r#"
fungsi f():
    i = 0
    selama (i < 3):
        jika (i == 0):
            y = 42
        cetak(y)
        i = i + 1
f()
"#;
    test_valid_program(source, "42\n42\n42\n");
}

#[test]
fn test_deep_recursion() {
    let source = r#"
fungsi jumlah(n):
    jika (n == 0):
        kembali 0
    kembali n + jumlah(n - 1)
cetak(jumlah(100), jumlah(1000))
"#;
    test_valid_program(source, "5050 500500\n");
}

#[test]
fn test_deep_nesting_is_a_parse_error() {
    let source = format!("cetak({}1{})", "(".repeat(200), ")".repeat(200));
    match run(&source, false).0 {
        Err(InterpretError::Parse(error)) => assert_eq!(error.kind, ParseErrorKind::TooDeep),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn test_numeric_strings_reject_trailing_space() {
    test_valid_program("cetak(\" 2\" + 1)", "3\n");
    assert!(matches!(
        runtime_error("cetak(\"2 \" + 1)").kind,
        RuntimeErrorKind::InvalidOperands { operator: "+", .. }
    ));
}

#[test]
fn test_huge_range_is_a_runtime_error() {
    assert!(matches!(
        runtime_error("xs = range(10000000000)").kind,
        RuntimeErrorKind::InvalidRangeArguments
    ));
}

#[test]
fn test_function_locals_do_not_leak() {
    let source = r#"
fungsi f():
    rahasia = 1
    rahasia
cetak(f())
cetak(rahasia)
"#;
    let (result, output) = run(source, false);
    assert_eq!(output, "1\n");
    assert!(matches!(
        result,
        Err(InterpretError::Runtime(RuntimeError {
            kind: RuntimeErrorKind::UndefinedVariable(name),
            line: 6,
        })) if name == "rahasia"
    ));
}

#[test]
fn test_all_strings_are_truthy() {
    let source = r#"
jika (""):
    cetak("empty string is true")
lain:
    cetak("empty string is false")
jika ("0") { cetak("zero string is true") }
cetak(!"", !0, !kosong)
"#;
    test_valid_program(
        source,
        "empty string is true\nzero string is true\nfalse true true\n",
    );
}

#[test]
fn test_logic_and_equality() {
    test_valid_program(
        "cetak(benar && salah, benar || salah, 1 == 1.0, 1 == 1, \"a\" == \"a\", kosong != 0)",
        "false true false true true true\n",
    );
}

#[test]
fn test_print_formats_values() {
    test_valid_program(
        "print(1, \"dua\", 3.5, benar, kosong, [\"a\", 'b', [1]])",
        "1 dua 3.5 true nil [\"a\", \"b\", [1]]\n",
    );
}

#[test]
fn test_arrays() {
    let source = r#"
xs = [1, 2, 3]
xs[1] = 20
cetak(xs[1], xs)
"#;
    test_valid_program(source, "20 [1, 20, 3]\n");
}

#[test]
fn test_for_over_array_in_function() {
    let source = r#"
fungsi jumlah(xs):
    total = 0
    untuk x dalam xs:
        total = total + x
    total
cetak(jumlah([1, 2, 3, 4]))
"#;
    test_valid_program(source, "10\n");
}

#[test]
fn test_comments_and_blank_lines() {
    let source = r#"
# leading comment
x = 1   # trailing comment

    # indented comment
jika (x == 1):

    # comment inside block
    cetak("ok")
"#;
    test_valid_program(source, "ok\n");
}

#[test]
fn test_division_by_zero() {
    let error = runtime_error("x = 1\ncetak(5 / 0)");
    assert!(matches!(error.kind, RuntimeErrorKind::DivisionByZero));
    assert_eq!(error.line, 2);
}

#[test]
fn test_modulo_errors() {
    assert!(matches!(
        runtime_error("cetak(5.5 % 2)").kind,
        RuntimeErrorKind::ModuloRequiresIntegers(..)
    ));
    assert!(matches!(
        runtime_error("cetak(5 % 0)").kind,
        RuntimeErrorKind::ModuloByZero
    ));
}

#[test]
fn test_index_out_of_bounds() {
    let error = runtime_error("xs = [1]\ncetak(xs[5])");
    assert!(matches!(
        error.kind,
        RuntimeErrorKind::IndexOutOfBounds {
            index: 5,
            length: 1
        }
    ));
    assert_eq!(error.line, 2);
}

#[test]
fn test_invalid_operands() {
    assert!(matches!(
        runtime_error("cetak([1] + 1)").kind,
        RuntimeErrorKind::InvalidOperands { operator: "+", .. }
    ));
    assert!(matches!(
        runtime_error("cetak(kosong < 1)").kind,
        RuntimeErrorKind::InvalidOperands { operator: "<", .. }
    ));
}

#[test]
fn test_arity_mismatch() {
    let error = runtime_error("fungsi f(a):\n    a\nf(1, 2)");
    assert!(matches!(
        error.kind,
        RuntimeErrorKind::ArityMismatch {
            expected: 1,
            found: 2,
            ..
        }
    ));
}

#[test]
fn test_calling_a_non_function() {
    assert!(matches!(
        runtime_error("x = 1\nx()").kind,
        RuntimeErrorKind::NotCallable("integer")
    ));
}

#[test]
fn test_unbounded_recursion() {
    let error = runtime_error("fungsi f(n):\n    f(n + 1)\nf(0)");
    assert!(matches!(error.kind, RuntimeErrorKind::StackOverflow));
}

#[test]
fn test_tokenize_errors_are_all_reported() {
    match run("x = \"abc\ny = @", false).0 {
        Err(InterpretError::Tokenize(errors)) => assert_eq!(errors.0.len(), 2),
        other => panic!("expected tokenize errors, got {other:?}"),
    }
}

#[test]
fn test_parse_error() {
    assert!(matches!(
        run("jika x:\n    y = 1", false).0,
        Err(InterpretError::Parse(_))
    ));
}

#[test]
fn test_return_at_top_level_is_compile_error() {
    assert!(matches!(
        run("kembali 1", false).0,
        Err(InterpretError::Compile(CompileError::ReturnOutsideFunction { line: 1 }))
    ));
}

#[test]
fn test_each_run_starts_fresh() {
    test_valid_program("x = 1", "");
    assert!(matches!(
        runtime_error("cetak(x)").kind,
        RuntimeErrorKind::UndefinedVariable(_)
    ));
}

#[test]
fn test_debug_dumps() {
    let (result, output) = run("x = 7\ncetak(x)", true);
    result.unwrap();
    for section in [
        "== tokens ==",
        "== ast ==",
        "== main",
        "== registers ==",
        "== globals ==",
    ] {
        assert!(output.contains(section), "missing {section} in {output}");
    }
    assert!(output.contains("\n7\n"));
    assert!(output.contains("x = 7"));
}
