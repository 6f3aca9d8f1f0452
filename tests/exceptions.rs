//! Exception unwinding through retrieve points.

mod common;
use common::{run_output, run_source};

use mint_rs::compiler::emitter::compile;
use mint_rs::vm::cursor::{Cursor, Machine, MachineState, RunStatus, QUANTUM};
use std::sync::Arc;

fn run_cursor(source: &str) -> (MachineState, Cursor) {
    let mut state = MachineState::new().unwrap();
    let chunk = compile(source, "main", &mut state.globals.interner).unwrap();
    let module = state.registry.create_main_module(Arc::new(chunk));
    let mut cursor = Cursor::new(module);
    loop {
        let status = Machine::new(&mut state, &mut cursor)
            .run_quantum(QUANTUM)
            .expect("cursor failed");
        if status != RunStatus::Continue {
            break;
        }
    }
    (state, cursor)
}

#[test]
fn caught_value_reaches_the_handler() {
    assert_eq!(run_output("try { raise \"boom\" } catch (e) { print e }"), "boom\n");
    assert_eq!(run_output("try { raise 42 } catch (e) { print e }"), "42\n");
    assert_eq!(
        run_output("try { raise [1,2] } catch (e) { print e[1] }"),
        "2\n"
    );
}

#[test]
fn operand_stack_depth_is_restored() {
    // Mid-expression raises truncate back to the retrieve depth.
    let source = "def raise_helper() { raise \"x\" }\nv = 0\ntry { v = 1 + raise_helper() } catch (e) { v = 2 }\nprint v";
    assert_eq!(run_output(source), "2\n");

    let (_state, cursor) = run_cursor(
        "def raise_helper() { raise \"x\" }\ntry { x = 1 + (2 * raise_helper()) } catch (e) { }",
    );
    assert!(cursor.stack.is_empty(), "stack: {:?}", cursor.stack);
}

#[test]
fn unwinding_pops_call_frames() {
    let source = "def deep(n) { if n == 0 { raise \"bottom\" } return deep(n - 1) }\ntry { deep(5) } catch (e) { print e }";
    assert_eq!(run_output(source), "bottom\n");

    let (_state, cursor) =
        run_cursor("def deep(n) { if n == 0 { raise \"b\" } return deep(n - 1) }\ntry { deep(5) } catch (e) { }");
    assert_eq!(cursor.frames.len(), 0);
    assert!(cursor.stack.is_empty());
}

#[test]
fn handlers_nest() {
    let source = "try { try { raise \"inner\" } catch (a) { raise a + \"!\" } } catch (b) { print b }";
    assert_eq!(run_output(source), "inner!\n");
}

#[test]
fn retrieve_points_disarm_after_the_block() {
    let result = run_source("try { } catch (e) { }\nraise \"late\"");
    assert_eq!(result.exit_code, 1);
    assert!(result.error.unwrap().contains("late"));
}

#[test]
fn repeated_catch_in_loop_balances() {
    let source = "for x in [1,2,3] { try { raise x } catch (e) { print e } }";
    assert_eq!(run_output(source), "1\n2\n3\n");
}

#[test]
fn host_errors_abort_the_cursor() {
    // `none` never participates in operators.
    let result = run_source("x = none\nprint x + 1");
    assert_eq!(result.exit_code, 1);
    assert!(result.error.unwrap().contains("none"));
}
