//! Shared helpers for the integration suite, delegating to the
//! centralized `vm::executor` API.

use mint_rs::vm::executor::{execute_buffer, ExecutionResult};

/// Compile and run a buffer, panicking on compile failure.
pub fn run_source(source: &str) -> ExecutionResult {
    execute_buffer(source).expect("source failed to compile")
}

/// Run a buffer and return its captured output, asserting a clean exit.
#[allow(dead_code)]
pub fn run_output(source: &str) -> String {
    let result = run_source(source);
    assert!(
        result.error.is_none(),
        "source failed: {:?}\n{}",
        result.error,
        source
    );
    assert_eq!(result.exit_code, 0, "non-zero exit for: {}", source);
    result.stdout
}
