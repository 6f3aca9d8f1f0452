//! Centralized execution API used by the CLI, the REPL and the test
//! suite: compile a buffer, run it to completion on a fresh scheduler and
//! capture what it printed.

use crate::core::error::MintError;
use crate::scheduler::Scheduler;
use crate::vm::printer::Printer;

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Capture printed output instead of writing to stdout.
    pub capture_output: bool,
    /// Run each process on its own OS thread under the step lock.
    pub parallel: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            capture_output: true,
            parallel: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Captured printer output.
    pub stdout: String,
    pub exit_code: i32,
    /// First cursor failure, if any (uncaught exception or host error).
    pub error: Option<String>,
}

/// Compile and run one source buffer with default configuration.
pub fn execute_buffer(source: &str) -> Result<ExecutionResult, MintError> {
    execute_buffer_with_config(source, ExecutionConfig::default())
}

pub fn execute_buffer_with_config(
    source: &str,
    config: ExecutionConfig,
) -> Result<ExecutionResult, MintError> {
    let mut scheduler = Scheduler::new()?;
    let buffer = if config.capture_output {
        let (printer, buffer) = Printer::capture();
        scheduler.set_default_printer(printer);
        Some(buffer)
    } else {
        None
    };

    scheduler.process_from_buffer(source, "main")?;
    let exit_code = if config.parallel {
        scheduler.run_parallel()
    } else {
        scheduler.run()
    };

    let stdout = match buffer {
        Some(buffer) => {
            let bytes = buffer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            String::from_utf8_lossy(&bytes).into_owned()
        }
        None => String::new(),
    };

    Ok(ExecutionResult {
        stdout,
        exit_code,
        error: scheduler.last_error().map(|message| message.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_printed_output() {
        let result = execute_buffer("print 1 + 1").unwrap();
        assert_eq!(result.stdout, "2\n");
        assert_eq!(result.exit_code, 0);
        assert!(result.error.is_none());
    }

    #[test]
    fn reports_compile_failures() {
        assert!(execute_buffer("def ] {").is_err());
    }

    #[test]
    fn propagates_exit_codes() {
        let result = execute_buffer("exit 3").unwrap();
        assert_eq!(result.exit_code, 3);
    }
}
