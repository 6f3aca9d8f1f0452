//! Collector soundness against live roots and garbage churn.

mod common;
use common::run_output;

use mint_rs::core::value::{Reference, Val};
use mint_rs::vm::cursor::MachineState;

#[test]
fn reachable_values_survive_interleaved_collects() {
    let mut state = MachineState::new().unwrap();

    // One live array holding ten elements, plus heavy garbage churn.
    let mut elements = Vec::new();
    for i in 0..10 {
        let handle = state.heap.alloc(Val::Number(i as f64)).unwrap();
        elements.push(Reference::new(handle));
    }
    let array = state
        .globals
        .alloc_array(&mut state.heap, elements.clone())
        .unwrap();

    for round in 0..5 {
        for _ in 0..2000 {
            state.heap.alloc(Val::Number(round as f64)).unwrap();
        }
        let mut roots = state.gather_roots(None);
        roots.push(array.handle);
        state.heap.collect(&roots);

        for (i, element) in elements.iter().enumerate() {
            assert_eq!(*state.heap.get(element.handle), Val::Number(i as f64));
        }
    }
}

#[test]
fn garbage_stays_below_the_high_water_mark() {
    let mut state = MachineState::new().unwrap();
    let baseline = state.heap.len();

    for _ in 0..100_000 {
        if state.heap.should_collect() {
            let roots = state.gather_roots(None);
            state.heap.collect(&roots);
        }
        state.heap.alloc(Val::Null).unwrap();
    }

    let roots = state.gather_roots(None);
    state.heap.collect(&roots);
    // Everything allocated above was unreachable.
    assert_eq!(state.heap.len(), baseline);
}

#[test]
fn pinned_cells_are_roots_without_tracing() {
    let mut state = MachineState::new().unwrap();
    let pinned = state.heap.alloc(Val::Number(7.0)).unwrap();
    state.heap.pin(pinned);

    let roots = state.gather_roots(None);
    state.heap.collect(&roots);
    assert_eq!(*state.heap.get(pinned), Val::Number(7.0));

    state.heap.unpin(pinned);
    let before = state.heap.len();
    let roots = state.gather_roots(None);
    state.heap.collect(&roots);
    assert_eq!(state.heap.len(), before - 1);
}

#[test]
fn collection_during_script_churn_is_invisible() {
    // Enough garbage to cross the initial high-water mark many times;
    // live values keep their content throughout.
    let source = "keep = [1, 2, 3]\ni = 0\nwhile i < 3000 { t = [i, i + 1, i + 2]\ni = i + 1 }\nprint keep[0] + keep[1] + keep[2]";
    assert_eq!(run_output(source), "6\n");
}

#[test]
fn suspended_generator_state_is_traced() {
    // The generator's locals live only in its saved frame while garbage
    // accumulates; resuming must still see them.
    let source = "def g(seed) { extra = seed * 2\nyield seed\nyield extra }\nit = g(21)\ni = 0\nwhile i < 3000 { t = [i]\ni = i + 1 }\nprint it.next()\nprint it.next()";
    assert_eq!(run_output(source), "21\n42\n");
}
