//! The cooperative scheduler.
//!
//! A scheduler owns a set of processes; each process's cursor lives in the
//! shared [`MachineState`] behind the step lock. Exactly one cursor runs
//! mint bytecode at any moment: a turn locks the state, runs one quantum,
//! parks the cursor back and yields. `run` drives every process
//! round-robin on the calling thread; `run_parallel` gives each process
//! its own OS thread contending on the same lock.

pub mod process;

pub use process::Process;

use crate::compiler::emitter::{compile, compile_with_options};
use crate::core::error::MintError;
use crate::runtime::module::is_module_file;
use crate::scheduler::process::report_cursor_error;
use crate::vm::cursor::{Cursor, Machine, MachineState, RunStatus, QUANTUM};
use crate::vm::frame::SavedState;
use crate::vm::iterator::{IteratorContext, ItemsIterator};
use crate::vm::printer::Printer;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Breakpoints pre-armed from the command line plus the start-suspended
/// flag, consumed by an attached debugger frontend.
#[derive(Debug, Default, Clone)]
pub struct DebugState {
    pub wait_on_start: bool,
    pub breakpoints: Vec<(String, u32)>,
}

pub struct Scheduler {
    shared: Arc<Mutex<MachineState>>,
    ready: VecDeque<Process>,
    next_pid: u32,
    exit_code: i32,
    last_error: Option<String>,
    pub debug: DebugState,
}

impl Scheduler {
    pub fn new() -> Result<Self, MintError> {
        Ok(Self {
            shared: Arc::new(Mutex::new(MachineState::new()?)),
            ready: VecDeque::new(),
            next_pid: 0,
            exit_code: 0,
            last_error: None,
            debug: DebugState::default(),
        })
    }

    /// The step lock. Exposed so host threads and tests can inspect the
    /// machine between quanta.
    pub fn shared(&self) -> Arc<Mutex<MachineState>> {
        self.shared.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MachineState> {
        Self::lock_shared(&self.shared)
    }

    fn lock_shared(shared: &Arc<Mutex<MachineState>>) -> std::sync::MutexGuard<'_, MachineState> {
        shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_default_printer(&self, printer: Printer) {
        self.lock().default_printer = printer;
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Compile a source buffer and queue it as a new process.
    pub fn process_from_buffer(&mut self, source: &str, name: &str) -> Result<u32, MintError> {
        self.queue_buffer(source, name, false)
    }

    /// Like [`Self::process_from_buffer`], with toplevel bindings made
    /// package-global so they survive across interactive buffers.
    pub fn process_from_repl_buffer(&mut self, source: &str) -> Result<u32, MintError> {
        self.queue_buffer(source, "", true)
    }

    fn queue_buffer(
        &mut self,
        source: &str,
        name: &str,
        repl: bool,
    ) -> Result<u32, MintError> {
        let mut guard = Self::lock_shared(&self.shared);
        let chunk = if repl {
            compile_with_options(source, "repl", &mut guard.globals.interner, true)
        } else {
            compile(source, name, &mut guard.globals.interner)
        }
        .map_err(|error| MintError::System(error.to_string()))?;

        let module = if name == "main" {
            guard.registry.create_main_module(Arc::new(chunk))
        } else {
            guard.registry.create_anonymous_module(Arc::new(chunk))
        };
        let pid = self.next_pid;
        self.next_pid += 1;
        guard.parked.insert(pid, Cursor::new(module));
        drop(guard);

        let mut process = Process::new(pid);
        process.endless = repl;
        self.ready.push_back(process);
        Ok(pid)
    }

    /// Compile the main script file and queue it, seeding the library
    /// search path with the script's directory and `va_args` with the
    /// script arguments.
    pub fn process_from_main_file(
        &mut self,
        path: &Path,
        arguments: &[String],
    ) -> Result<u32, MintError> {
        if !is_module_file(path) {
            return Err(MintError::ModuleNotFound {
                name: path.display().to_string(),
            });
        }
        let source = std::fs::read_to_string(path)
            .map_err(|error| MintError::System(format!("cannot read '{}': {}", path.display(), error)))?;

        let mut guard = Self::lock_shared(&self.shared);
        if let Some(parent) = path.parent() {
            guard.registry.add_library_path(parent.to_path_buf());
        }
        let chunk = compile(&source, "main", &mut guard.globals.interner)
            .map_err(|error| MintError::System(error.to_string()))?;
        let module = guard.registry.create_main_module(Arc::new(chunk));

        let mut cursor = Cursor::new(module);
        let state = &mut *guard;
        let mut items = ItemsIterator::with_capacity(arguments.len());
        for argument in arguments {
            let cell = state
                .globals
                .alloc_string(&mut state.heap, argument.clone())?;
            items.yield_item(cell);
        }
        let va_args = state
            .globals
            .alloc_iterator(&mut state.heap, IteratorContext::Items(items))?;
        let va_args_symbol = state.globals.names.va_args;
        if let Some(frame) = cursor.frames.last_mut() {
            frame.symbols.insert(va_args_symbol, va_args);
        }

        let pid = self.next_pid;
        self.next_pid += 1;
        guard.parked.insert(pid, cursor);
        drop(guard);

        self.ready.push_back(Process::new(pid));
        Ok(pid)
    }

    /// Queue an already-built process (e.g. a fork).
    pub fn push_waiting_process(&mut self, process: Process) {
        self.ready.push_back(process);
    }

    /// Turn a parked generator activation into a scheduled process so the
    /// body can resume on its own turns without re-entering the caller.
    pub fn create_generator(&mut self, state: SavedState) -> u32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        Self::lock_shared(&self.shared).parked.insert(pid, Cursor::from_saved_state(state));
        self.ready.push_back(Process::new(pid));
        pid
    }

    /// Request orderly shutdown; running processes stop at their next
    /// quantum boundary.
    pub fn exit(&mut self, code: i32) {
        self.lock().exit_requested = Some(code);
    }

    /// Drop the remaining processes in reverse-creation order.
    fn cleanup(ready: &mut VecDeque<Process>, guard: &mut MachineState) {
        let mut remaining: Vec<Process> = ready.drain(..).collect();
        remaining.sort_by(|a, b| b.pid.cmp(&a.pid));
        for process in remaining {
            guard.parked.remove(&process.pid);
        }
        guard.collect_now();
    }

    fn record_error(&mut self, message: String) {
        if self.last_error.is_none() {
            self.last_error = Some(message);
        }
        if self.exit_code == 0 {
            self.exit_code = 1;
        }
    }

    /// Round-robin over the ready processes on the calling thread until
    /// every process completes or `exit` is requested. Returns the exit
    /// code.
    pub fn run(&mut self) -> i32 {
        while let Some(process) = self.ready.pop_front() {
            let mut guard = Self::lock_shared(&self.shared);

            if let Some(code) = guard.exit_requested {
                self.exit_code = code;
                Self::cleanup(&mut self.ready, &mut guard);
                break;
            }

            let mut cursor = match guard.parked.remove(&process.pid) {
                Some(cursor) => cursor,
                None => continue,
            };

            let status = Machine::new(&mut guard, &mut cursor).run_quantum(QUANTUM);

            // Generator activations queued during the quantum become
            // processes of their own.
            let pending: Vec<SavedState> = std::mem::take(&mut guard.pending_generators);
            for state in pending {
                let pid = self.next_pid;
                self.next_pid += 1;
                guard.parked.insert(pid, Cursor::from_saved_state(state));
                self.ready.push_back(Process::new(pid));
            }

            match status {
                Ok(RunStatus::Continue) => {
                    guard.parked.insert(process.pid, cursor);
                    drop(guard);
                    self.ready.push_back(process);
                    std::thread::yield_now();
                }
                Ok(RunStatus::Finished) => {
                    // Collection at quiescence reclaims the whole cursor.
                    drop(cursor);
                    guard.collect_now();
                }
                Ok(RunStatus::Exited(code)) => {
                    guard.exit_requested = Some(code);
                    self.exit_code = code;
                    Self::cleanup(&mut self.ready, &mut guard);
                    break;
                }
                Err(error) => {
                    let message =
                        report_cursor_error(&guard, &cursor, process.thread_id, &error);
                    drop(cursor);
                    guard.collect_now();
                    drop(guard);
                    self.record_error(message);
                }
            }
        }
        self.exit_code
    }

    /// Multi-thread mode: one OS thread per ready process, all contending
    /// on the step lock, so at most one executes bytecode at a time.
    pub fn run_parallel(&mut self) -> i32 {
        let processes: Vec<Process> = self.ready.drain(..).collect();
        let mut handles = Vec::with_capacity(processes.len());

        for process in processes {
            let shared = self.shared.clone();
            handles.push(std::thread::spawn(move || -> Result<Option<i32>, String> {
                loop {
                    let mut guard = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    if let Some(code) = guard.exit_requested {
                        return Ok(Some(code));
                    }
                    let mut cursor = match guard.parked.remove(&process.pid) {
                        Some(cursor) => cursor,
                        None => return Ok(None),
                    };
                    let status = Machine::new(&mut guard, &mut cursor).run_quantum(QUANTUM);
                    match status {
                        Ok(RunStatus::Continue) => {
                            guard.parked.insert(process.pid, cursor);
                            drop(guard);
                            std::thread::yield_now();
                        }
                        Ok(RunStatus::Finished) => return Ok(None),
                        Ok(RunStatus::Exited(code)) => {
                            guard.exit_requested = Some(code);
                            return Ok(Some(code));
                        }
                        Err(error) => {
                            let message = report_cursor_error(
                                &guard,
                                &cursor,
                                process.thread_id,
                                &error,
                            );
                            return Err(message);
                        }
                    }
                }
            }));
        }

        for handle in handles {
            match handle.join() {
                Ok(Ok(Some(code))) => self.exit_code = code,
                Ok(Ok(None)) => {}
                Ok(Err(message)) => self.record_error(message),
                Err(_) => self.record_error("worker thread panicked".to_string()),
            }
        }
        self.lock().collect_now();
        self.exit_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_states_become_processes() {
        let mut scheduler = Scheduler::new().unwrap();
        let (printer, buffer) = Printer::capture();
        scheduler.set_default_printer(printer);

        // A parked activation entering at offset 0 simply runs the
        // module body on its own scheduler turns.
        let pid = scheduler
            .process_from_buffer("print \"resumed\"", "main")
            .unwrap();
        let frame = {
            let shared = scheduler.shared();
            let mut state = shared.lock().unwrap();
            let cursor = state.parked.remove(&pid).unwrap();
            cursor.frames.into_iter().next().unwrap()
        };
        scheduler.ready.clear();

        scheduler.create_generator(SavedState { frame });
        assert_eq!(scheduler.run(), 0);
        assert_eq!(&*buffer.lock().unwrap(), b"resumed\n");
    }

    #[test]
    fn exit_request_stops_queued_processes() {
        let mut scheduler = Scheduler::new().unwrap();
        let (printer, buffer) = Printer::capture();
        scheduler.set_default_printer(printer);

        scheduler
            .process_from_buffer("print \"never\"", "main")
            .unwrap();
        scheduler.exit(9);
        assert_eq!(scheduler.run(), 9);
        assert!(buffer.lock().unwrap().is_empty());
    }
}
