//! Call protocol: overload sets, arity dispatch, `va_args` collection.

mod common;
use common::run_output;

#[test]
fn arity_picks_the_matching_body() {
    let source = "def f(a) { return 1 }\ndef f(a, b) { return 2 }\nprint f(9)\nprint f(9, 9)";
    assert_eq!(run_output(source), "1\n2\n");
}

#[test]
fn extra_arguments_collect_into_va_args() {
    let source = "def f(a, b, ...) { n = 0\nfor x in va_args { n = n + 1 }\nreturn n }\nprint f(1, 2)\nprint f(1, 2, 3)\nprint f(1, 2, 3, 4, 5)";
    assert_eq!(run_output(source), "0\n1\n3\n");
}

#[test]
fn va_args_preserve_order_and_values() {
    let source = "def f(a, ...) { s = \"\"\nfor x in va_args { s = s + x }\nreturn s }\nprint f(0, \"x\", \"y\", \"z\")";
    assert_eq!(run_output(source), "xyz\n");
}

#[test]
fn exact_arity_beats_variadic() {
    let source = "def f(a) { return \"exact\" }\ndef f(a, ...) { return \"variadic\" }\nprint f(1)\nprint f(1, 2)";
    assert_eq!(run_output(source), "exact\nvariadic\n");
}

#[test]
fn wrong_arity_is_an_error() {
    let result = common::run_source("def f(a, b) { return a }\nf(1)");
    assert_eq!(result.exit_code, 1);
}

#[test]
fn arguments_evaluate_left_to_right() {
    let source = "def f(a, b) { return a - b }\nprint f(10, 3)";
    assert_eq!(run_output(source), "7\n");
}

#[test]
fn nested_calls_stack_correctly() {
    let source = "def add(a, b) { return a + b }\nprint add(add(1, 2), add(3, 4))";
    assert_eq!(run_output(source), "10\n");
}

#[test]
fn lambdas_are_first_class() {
    let source = "def apply(f, x) { return f(x) }\ndouble = def (n) { return n * 2 }\nprint apply(double, 21)";
    assert_eq!(run_output(source), "42\n");
}
