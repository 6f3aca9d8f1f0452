//! Generator suspension and round-trip behavior.

mod common;
use common::run_output;

#[test]
fn lazy_and_eager_orders_agree() {
    // The same body consumed lazily yields the same sequence the eager
    // walk produces.
    let source = "def g() { yield 1; yield 2; yield 3 }\nfor x in g() { print x }";
    assert_eq!(run_output(source), "1\n2\n3\n");
}

#[test]
fn body_runs_interleaved_with_consumer() {
    let source = "def g() { yield 1\nprint \"between\"\nyield 2 }\nfor x in g() { print x }";
    // The body resumes only when the consumer advances past the first
    // element.
    assert_eq!(run_output(source), "1\nbetween\n2\n");
}

#[test]
fn generator_locals_survive_suspension() {
    let source = "def counter(n) { i = 0\nwhile i < n { i = i + 1\nyield i } }\nfor x in counter(3) { print x }";
    assert_eq!(run_output(source), "1\n2\n3\n");
}

#[test]
fn nested_consumption() {
    let source = "def g() { yield 10; yield 20 }\ns = 0\nfor x in g() { s = s + x }\nprint s";
    assert_eq!(run_output(source), "30\n");
}

#[test]
fn generator_return_stops_iteration() {
    let source = "def g(stop) { yield 1\nif stop { return }\nyield 2 }\nfor x in g(true) { print x }\nfor x in g(false) { print x }";
    assert_eq!(run_output(source), "1\n1\n2\n");
}

#[test]
fn two_generators_interleave() {
    let source = "def g(a) { yield a\nyield a + 1 }\nx = g(1)\ny = g(10)\nprint x.next()\nprint y.next()\nprint x.next()\nprint y.next()";
    assert_eq!(run_output(source), "1\n10\n2\n11\n");
}

#[test]
fn generator_arguments_bind_once() {
    let source = "def g(a, b) { yield a\nyield b }\nfor x in g(7, 8) { print x }";
    assert_eq!(run_output(source), "7\n8\n");
}
