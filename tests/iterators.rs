//! Iterator identity laws over the three context variants.

mod common;
use common::run_output;

use mint_rs::core::value::{Payload, Reference, Val};
use mint_rs::vm::cursor::MachineState;
use mint_rs::vm::iterator::{iterator_init, IteratorContext};

#[test]
fn iterator_init_on_iterator_is_identity() {
    let mut state = MachineState::new().unwrap();
    let iterator = state
        .globals
        .alloc_iterator(&mut state.heap, IteratorContext::empty_items())
        .unwrap();

    let again = iterator_init(&mut state.heap, &state.globals, iterator).unwrap();
    assert_eq!(again.handle, iterator.handle);
}

#[test]
fn array_iteration_shares_elements() {
    let mut state = MachineState::new().unwrap();
    let element = state.heap.alloc(Val::Number(1.0)).unwrap();
    let array = state
        .globals
        .alloc_array(&mut state.heap, vec![Reference::new(element)])
        .unwrap();

    let iterator = iterator_init(&mut state.heap, &state.globals, array).unwrap();
    match state.heap.get(iterator.handle) {
        Val::Object(object) => match &object.payload {
            Payload::Iterator(context) => {
                let head = context.value(&state.heap).unwrap();
                assert_eq!(head.handle, element);
            }
            other => panic!("expected iterator payload, got {:?}", other),
        },
        other => panic!("expected object, got {:?}", other),
    }

    // Mutating the cell through the iterator is visible in the array.
    *state.heap.get_mut(element) = Val::Number(9.0);
    match state.heap.get(array.handle) {
        Val::Object(object) => match &object.payload {
            Payload::Array(values) => {
                assert_eq!(*state.heap.get(values[0].handle), Val::Number(9.0));
            }
            other => panic!("expected array payload, got {:?}", other),
        },
        other => panic!("expected object, got {:?}", other),
    }
}

#[test]
fn array_round_trip_is_equal() {
    let source = "a = [1,2,3]\nn = 0\nfor x in a { n = n + 1\nprint x == a[n - 1] }";
    assert_eq!(run_output(source), "true\ntrue\ntrue\n");
}

#[test]
fn inclusive_range_walks_each_value() {
    assert_eq!(run_output("for x in 1..5 { print x }"), "1\n2\n3\n4\n5\n");
    assert_eq!(run_output("for x in 5..1 { print x }"), "5\n4\n3\n2\n1\n");
}

#[test]
fn exclusive_range_stops_short() {
    assert_eq!(run_output("for x in 5...1 { print x }"), "5\n4\n3\n2\n");
    assert_eq!(run_output("for x in 1...4 { print x }"), "1\n2\n3\n");
}

#[test]
fn string_iteration_yields_code_points() {
    assert_eq!(run_output("for c in \"héllo\" { print c }"), "h\né\nl\nl\no\n");
}

#[test]
fn hash_iteration_yields_key_value_pairs() {
    let source = "h = {\"a\":1,\"b\":2}\nfor pair in h { print pair[0] }";
    assert_eq!(run_output(source), "a\nb\n");

    let source = "h = {\"a\":1,\"b\":2}\nfor pair in h { print pair[1] }";
    assert_eq!(run_output(source), "1\n2\n");
}

#[test]
fn scalar_iteration_is_single_element() {
    assert_eq!(run_output("for x in 42 { print x }"), "42\n");
}

#[test]
fn none_iterates_empty() {
    assert_eq!(run_output("for x in none { print x }"), "");
}
