//! Pruebas de integración del preprocesador: directivas,
//! condicionales por plataforma, expansión de macros y
//! preservación de numeración de líneas.

use interpreter::library::LibraryRegistry;
use interpreter::platform::Platform;
use interpreter::preprocess::{preprocess, Preprocessed, PreprocessorError};

fn run(source: &str) -> Preprocessed {
    run_on(source, Platform::Esp32Nano)
}

fn run_on(source: &str, platform: Platform) -> Preprocessed {
    let registry = LibraryRegistry::new();
    preprocess(source, platform, &registry)
}

#[test]
fn selects_the_platform_branch() {
    let source = "\
#if defined(ARDUINO_ARCH_AVR)
int a = 1;
#else
int b = 2;
#endif
";

    let esp32 = run_on(source, Platform::Esp32Nano);
    assert!(esp32.diagnostics.is_empty());
    assert!(esp32.code.contains("int b = 2;"));
    assert!(!esp32.code.contains("int a"));

    let uno = run_on(source, Platform::ArduinoUno);
    assert!(uno.code.contains("int a = 1;"));
    assert!(!uno.code.contains("int b"));
}

#[test]
fn output_carries_no_directives() {
    let source = "\
#define LED 13
#ifdef ESP32
int x = LED;
#endif
#pragma once
";

    let result = run(source);
    assert!(!result.code.contains('#'));
    assert!(result.code.contains("int x = 13;"));
    assert_eq!(result.pragmas, vec!["once".to_string()]);
}

#[test]
fn line_numbers_are_preserved() {
    let source = "\
#define UNUSED 1
int first = 1;
#if 0
int hidden = 2;
#endif
int last = 3;
";

    let result = run(source);
    let lines: Vec<&str> = result.code.lines().collect();

    assert_eq!(lines.len(), source.lines().count());
    assert_eq!(lines[1], "int first = 1;");
    assert_eq!(lines[3], "");
    assert_eq!(lines[5], "int last = 3;");
}

#[test]
fn function_macros_substitute_parameters() {
    let source = "\
#define TWICE(x) ((x) * 2)
#define ADD(a, b) ((a) + (b))
int x = TWICE(3);
int y = ADD(TWICE(1), 4);
";

    let result = run(source);
    assert!(result.code.contains("int x = ((3) * 2);"));
    assert!(result.code.contains("int y = ((((1) * 2)) + (4));"));
}

#[test]
fn macros_do_not_expand_inside_strings() {
    let source = "\
#define HIGH 42
char msg[] = \"HIGH voltage\";
";

    let result = run(source);
    assert!(result.code.contains("\"HIGH voltage\""));
}

#[test]
fn undef_removes_a_macro() {
    let source = "\
#define FLAG 1
#undef FLAG
#ifdef FLAG
int gone = 1;
#endif
int kept = 2;
";

    let result = run(source);
    assert!(!result.code.contains("gone"));
    assert!(result.code.contains("int kept = 2;"));
}

#[test]
fn elif_chains_take_the_first_true_branch() {
    let source = "\
#define MODE 2
#if MODE == 1
int one = 1;
#elif MODE == 2
int two = 2;
#elif MODE == 2
int again = 2;
#else
int other = 0;
#endif
";

    let result = run(source);
    assert!(result.code.contains("int two = 2;"));
    assert!(!result.code.contains("one"));
    assert!(!result.code.contains("again"));
    assert!(!result.code.contains("other"));
}

#[test]
fn conditionals_evaluate_full_expressions() {
    let source = "\
#if (1 << 4) == 16 && defined(ESP32) ? 1 : 0
int selected = 1;
#endif
#if 5 / 2 == 2 && 5 % 2 == 1 && ~0 == -1
int arithmetic = 1;
#endif
#if UNDEFINED_NAME
int ghost = 1;
#endif
";

    let result = run(source);
    assert!(result.code.contains("int selected = 1;"));
    assert!(result.code.contains("int arithmetic = 1;"));
    assert!(!result.code.contains("ghost"));
}

#[test]
fn unbalanced_conditional_is_reported_and_kept() {
    let source = "\
#if 1
void setup() {}
";

    let result = run(source);
    assert!(result.code.contains("void setup() {}"));
    assert!(result
        .diagnostics
        .iter()
        .any(|d| matches!(d.val(), PreprocessorError::UnbalancedConditional)));
}

#[test]
fn dangling_branches_are_reported() {
    let source = "\
#endif
#else
int x = 1;
";

    let result = run(source);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| matches!(d.val(), PreprocessorError::DanglingEndif)));
    assert!(result
        .diagnostics
        .iter()
        .any(|d| matches!(d.val(), PreprocessorError::DanglingBranch("else"))));
}

#[test]
fn error_directive_becomes_a_diagnostic() {
    let source = "\
#if defined(ESP32)
#error unsupported board
#endif
int after = 1;
";

    let result = run(source);
    assert!(result.code.contains("int after = 1;"));
    assert!(result.diagnostics.iter().any(|d| matches!(
        d.val(),
        PreprocessorError::UserError(message) if message == "unsupported board"
    )));
}

#[test]
fn includes_activate_registered_libraries() {
    let source = "\
#include <Servo.h>
#include \"Adafruit_NeoPixel.h\"
#include <NotARealLibrary.h>
";

    let result = run(source);
    assert!(result.activated.contains("Servo"));
    assert!(result.activated.contains("Adafruit_NeoPixel"));
    assert!(result.activated.contains("Serial"));
    assert!(result.diagnostics.is_empty());
}

#[test]
fn continuation_lines_join_and_pad() {
    let source = "\
#define LONG_MACRO(x) \\
    ((x) + \\
     1)
int v = LONG_MACRO(2);
";

    let result = run(source);
    assert_eq!(result.code.lines().count(), source.lines().count());
    assert!(result.code.contains("int v = ((2) +      1);"));
}

#[test]
fn preprocessing_is_idempotent() {
    let source = "\
#define STEP 250
#if defined(ESP32)
int delay_ms = STEP * 2;
#else
int delay_ms = STEP;
#endif
void setup() {}
";

    let first = run(source);
    let second = run(&first.code);

    assert_eq!(first.code, second.code);
}
