//! End-to-end scenarios: literal scripts against their expected output.

mod common;
use common::{run_output, run_source};

#[test]
fn arithmetic_precedence() {
    assert_eq!(run_output("print 1 + 2 * 3"), "7\n");
}

#[test]
fn for_over_array() {
    assert_eq!(
        run_output("a = [1,2,3]; for x in a { print x }"),
        "1\n2\n3\n"
    );
}

#[test]
fn recursive_fibonacci() {
    let source = "def f(n) { if n < 2 { return n } return f(n-1) + f(n-2) }\nprint f(10)";
    assert_eq!(run_output(source), "55\n");
}

#[test]
fn generator_yields_lazily() {
    let source = "def g() { yield 1; yield 2 }\nfor x in g() { print x }";
    assert_eq!(run_output(source), "1\n2\n");
}

#[test]
fn raise_and_catch() {
    let source = "try { raise \"boom\" } catch (e) { print e }";
    assert_eq!(run_output(source), "boom\n");
}

#[test]
fn hash_access() {
    let source = "h = {\"a\":1,\"b\":2}; print h[\"a\"] + h[\"b\"]";
    assert_eq!(run_output(source), "3\n");
}

#[test]
fn exit_code_propagates() {
    let result = run_source("print 1\nexit 7\nprint 2");
    assert_eq!(result.stdout, "1\n");
    assert_eq!(result.exit_code, 7);
}

#[test]
fn string_concatenation_and_compare() {
    assert_eq!(run_output("print \"foo\" + \"bar\""), "foobar\n");
    assert_eq!(run_output("print \"abc\" < \"abd\""), "true\n");
    assert_eq!(run_output("print \"a\" + 1"), "a1\n");
}

#[test]
fn string_indexing_by_code_point() {
    assert_eq!(run_output("s = \"héllo\"\nprint s[1]"), "é\n");
    assert_eq!(run_output("s = \"héllo\"\nprint s.size()"), "5\n");
    assert_eq!(run_output("s = \"héllo\"\nprint s[-1]"), "o\n");
}

#[test]
fn while_loop_with_break_and_continue() {
    let source = "i = 0\nwhile true { i = i + 1\nif i == 3 { continue }\nif i > 5 { break }\nprint i }";
    assert_eq!(run_output(source), "1\n2\n4\n5\n");
}

#[test]
fn membership_and_ranges() {
    assert_eq!(run_output("print 2 in [1,2,3]"), "true\n");
    assert_eq!(run_output("print 9 in [1,2,3]"), "false\n");
    assert_eq!(run_output("print \"b\" in {\"a\":1,\"b\":2}"), "true\n");
    assert_eq!(run_output("print \"ell\" in \"hello\""), "true\n");
}

#[test]
fn regex_literals_match() {
    assert_eq!(run_output("print \"hello42\" =~ /[a-z]+\\d+/"), "true\n");
    assert_eq!(run_output("print \"HELLO\" =~ /hello/i"), "true\n");
    assert_eq!(run_output("print \"x\" !~ /\\d/"), "true\n");
}

#[test]
fn regex_round_trips_its_initializer() {
    assert_eq!(run_output("r = /ab+c/i\nprint r"), "/ab+c/i\n");
    assert_eq!(run_output("print typeof /x/"), "regex\n");
}

#[test]
fn typeof_reports_formats() {
    assert_eq!(run_output("print typeof 1"), "number\n");
    assert_eq!(run_output("print typeof \"x\""), "string\n");
    assert_eq!(run_output("print typeof [1]"), "array\n");
    assert_eq!(run_output("print typeof {1:2}"), "hash\n");
    assert_eq!(run_output("print typeof true"), "boolean\n");
}

#[test]
fn defined_checks_bindings() {
    assert_eq!(run_output("a = 1\nprint defined a"), "true\n");
    assert_eq!(run_output("print defined missing"), "false\n");
}

#[test]
fn logical_operators_short_circuit() {
    // The untaken side must not run.
    let source = "def boom() { raise \"no\" }\nprint false && boom()\nprint true || boom()";
    assert_eq!(run_output(source), "false\ntrue\n");

    // `||` keeps the first truthy operand, `&&` yields the second.
    assert_eq!(run_output("print 0 || 5"), "5\n");
    assert_eq!(run_output("print 2 && 5"), "5\n");
}

#[test]
fn uncaught_exception_sets_exit_code() {
    let result = run_source("raise \"unhandled\"");
    assert_eq!(result.exit_code, 1);
    let error = result.error.expect("error recorded");
    assert!(error.contains("unhandled"), "got: {}", error);
}

#[test]
fn subscript_assignment_updates_containers() {
    assert_eq!(
        run_output("a = [1,2,3]\na[1] = 9\nfor x in a { print x }"),
        "1\n9\n3\n"
    );
    assert_eq!(
        run_output("h = {\"k\":1}\nh[\"k\"] = 5\nh[\"new\"] = 2\nprint h[\"k\"] + h[\"new\"]"),
        "7\n"
    );
    // Negative array indices wrap.
    assert_eq!(run_output("a = [1,2,3]\nprint a[-1]"), "3\n");
}

#[test]
fn compound_assignment() {
    assert_eq!(run_output("a = 1\na += 4\nprint a"), "5\n");
    assert_eq!(run_output("a = 10\na -= 4\nprint a"), "6\n");
}

#[test]
fn copy_operator_writes_through_shared_cells() {
    // `=` shares the cell, so `:=` into one binding is visible through
    // the other.
    let source = "a = \"first\"\nb = a\nb := \"second\"\nprint a";
    assert_eq!(run_output(source), "second\n");
}

#[test]
fn iterator_literal_and_members() {
    let source = "it = (10, 20, 30)\nprint it.value()\nprint it.next()\nprint it.value()\nprint it.isEmpty()";
    assert_eq!(run_output(source), "10\n10\n20\nfalse\n");
}

#[test]
fn lambdas_capture_by_name() {
    let source = "k = 10\nadd = def [k] (x) { return x + k }\nprint add(5)";
    assert_eq!(run_output(source), "15\n");
}

#[test]
fn null_is_raisable() {
    let source = "try { raise null } catch (e) { print typeof e }";
    assert_eq!(run_output(source), "null\n");
}
