use crate::core::error::MintError;
use crate::vm::cursor::{Cursor, MachineState};
use crate::vm::ops::cast;

/// One schedulable unit: a cursor (parked in the shared state between
/// quanta) plus its thread binding and lifecycle flags.
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: u32,
    pub thread_id: u32,
    /// Interactive processes are refilled instead of reaped when their
    /// module runs out.
    pub endless: bool,
}

impl Process {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            thread_id: pid,
            endless: false,
        }
    }
}

/// Print the call trace of a failed cursor, innermost frame first.
pub fn dump_traceback(state: &MachineState, cursor: &Cursor, thread_id: u32) {
    eprintln!("Traceback thread {} :", thread_id);
    for (module, ip) in cursor.dump() {
        let name = state.registry.module_name(module);
        let line = state.registry.line_of(module, ip);
        eprintln!("  module '{}', line {}", name, line);
    }
}

/// Render a cursor failure for the scheduler's records, dumping the
/// traceback as a side effect.
pub fn report_cursor_error(
    state: &MachineState,
    cursor: &Cursor,
    thread_id: u32,
    error: &MintError,
) -> String {
    dump_traceback(state, cursor, thread_id);
    let message = match error {
        MintError::Raised(handle) => {
            let rendered = cast::to_string(
                &state.heap,
                &state.globals,
                crate::core::value::Reference::new(*handle),
            );
            format!("uncaught exception : {}", rendered)
        }
        other => other.to_string(),
    };
    eprintln!("{}", message);
    message
}
