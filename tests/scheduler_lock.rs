//! Step-lock exclusion across OS threads.

use mint_rs::scheduler::Scheduler;
use mint_rs::vm::printer::Printer;
use mint_rs::core::value::Val;

/// K cursors each add M to a shared global; the step lock serializes
/// whole quanta, so every read-modify-write lands intact and the total is
/// exactly K x M.
#[test]
fn parallel_counters_do_not_tear() {
    const WORKERS: usize = 4;
    // Small enough that one process's whole loop fits in a quantum.
    const INCREMENTS: usize = 500;

    let mut scheduler = Scheduler::new().unwrap();
    let (printer, _buffer) = Printer::capture();
    scheduler.set_default_printer(printer);

    // Initialize the shared binding alone first.
    scheduler.process_from_buffer("$counter = 0", "init").unwrap();
    assert_eq!(scheduler.run(), 0);

    let worker = format!(
        "i = 0\nwhile i < {} {{ $counter = $counter + 1\ni = i + 1 }}",
        INCREMENTS
    );
    for _ in 0..WORKERS {
        scheduler.process_from_buffer(&worker, "worker").unwrap();
    }
    assert_eq!(scheduler.run_parallel(), 0);
    assert!(scheduler.last_error().is_none());

    let shared = scheduler.shared();
    let state = shared.lock().unwrap();
    let symbol = state.globals.interner.find("counter").expect("symbol");
    let binding = state
        .globals
        .package(mint_rs::core::value::PackageId::ROOT)
        .symbols
        .get(symbol)
        .expect("binding");
    assert_eq!(
        *state.heap.get(binding.handle),
        Val::Number((WORKERS * INCREMENTS) as f64)
    );
}

/// The round-robin path gives the same result without extra threads.
#[test]
fn round_robin_counters_agree() {
    const WORKERS: usize = 3;
    const INCREMENTS: usize = 200;

    let mut scheduler = Scheduler::new().unwrap();
    let (printer, _buffer) = Printer::capture();
    scheduler.set_default_printer(printer);

    scheduler.process_from_buffer("$counter = 0", "init").unwrap();
    assert_eq!(scheduler.run(), 0);

    let worker = format!(
        "i = 0\nwhile i < {} {{ $counter = $counter + 1\ni = i + 1 }}",
        INCREMENTS
    );
    for _ in 0..WORKERS {
        scheduler.process_from_buffer(&worker, "worker").unwrap();
    }
    assert_eq!(scheduler.run(), 0);

    let shared = scheduler.shared();
    let state = shared.lock().unwrap();
    let symbol = state.globals.interner.find("counter").expect("symbol");
    let binding = state
        .globals
        .package(mint_rs::core::value::PackageId::ROOT)
        .symbols
        .get(symbol)
        .expect("binding");
    assert_eq!(
        *state.heap.get(binding.handle),
        Val::Number((WORKERS * INCREMENTS) as f64)
    );
}

/// `exit` requested from one process stops the others at their next
/// quantum boundary.
#[test]
fn exit_cascades_to_every_process() {
    let mut scheduler = Scheduler::new().unwrap();
    let (printer, _buffer) = Printer::capture();
    scheduler.set_default_printer(printer);

    scheduler
        .process_from_buffer("i = 0\nwhile true { i = i + 1 }", "spinner")
        .unwrap();
    scheduler.process_from_buffer("exit 5", "quitter").unwrap();

    assert_eq!(scheduler.run(), 5);
}
