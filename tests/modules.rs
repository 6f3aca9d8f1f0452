//! Module loading through the library search path.

use mint_rs::scheduler::Scheduler;
use mint_rs::vm::printer::Printer;
use std::io::Write;

fn run_with_library(
    library: &tempfile::TempDir,
    source: &str,
) -> (i32, String, Option<String>) {
    let mut scheduler = Scheduler::new().unwrap();
    let (printer, buffer) = Printer::capture();
    scheduler.set_default_printer(printer);
    {
        let shared = scheduler.shared();
        let mut state = shared.lock().unwrap();
        state
            .registry
            .add_library_path(library.path().to_path_buf());
    }
    scheduler.process_from_buffer(source, "main").unwrap();
    let code = scheduler.run();
    let output = String::from_utf8_lossy(&buffer.lock().unwrap()).into_owned();
    let error = scheduler.last_error().map(|message| message.to_string());
    (code, output, error)
}

fn write_module(dir: &tempfile::TempDir, relative: &str, source: &str) {
    let path = dir.path().join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(source.as_bytes()).unwrap();
}

#[test]
fn load_binds_module_functions() {
    let library = tempfile::tempdir().unwrap();
    write_module(&library, "helpers.mn", "def double(x) { return x * 2 }\n");

    let (code, output, error) = run_with_library(&library, "load helpers\nprint double(21)");
    assert_eq!(error, None);
    assert_eq!(code, 0);
    assert_eq!(output, "42\n");
}

#[test]
fn dotted_paths_resolve_to_nested_files() {
    let library = tempfile::tempdir().unwrap();
    write_module(&library, "math/seq.mn", "def triple(x) { return x * 3 }\n");

    let (code, output, error) = run_with_library(&library, "load math.seq\nprint triple(5)");
    assert_eq!(error, None);
    assert_eq!(code, 0);
    assert_eq!(output, "15\n");
}

#[test]
fn module_toplevel_runs_once() {
    let library = tempfile::tempdir().unwrap();
    write_module(&library, "noisy.mn", "print \"loaded\"\n");

    let (code, output, _) = run_with_library(&library, "load noisy\nload noisy\nprint \"done\"");
    assert_eq!(code, 0);
    assert_eq!(output, "loaded\ndone\n");
}

#[test]
fn missing_modules_fail_the_load() {
    let library = tempfile::tempdir().unwrap();
    let (code, _, error) = run_with_library(&library, "load nowhere.to.be.found");
    assert_eq!(code, 1);
    assert!(error.unwrap().contains("not found"));
}

#[test]
fn parse_errors_leave_the_module_unloaded() {
    let library = tempfile::tempdir().unwrap();
    write_module(&library, "broken.mn", "def ] {\n");

    let (code, _, error) = run_with_library(&library, "load broken");
    assert_eq!(code, 1);
    assert!(error.unwrap().contains("broken"));
}
