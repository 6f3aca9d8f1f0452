use crate::core::error::MintError;
use crate::core::value::Reference;
use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// A `print` sink. Cursors keep a stack of these per frame; the innermost
/// open printer receives printed values, stdout by default.
///
/// `Object` printers forward to a language-callable value; the interpreter
/// intercepts them and synthesizes a `print` member call instead of writing
/// from host code.
#[derive(Debug, Clone)]
pub enum Printer {
    Stdout,
    Stderr,
    File(Arc<Mutex<File>>),
    Buffer(Arc<Mutex<Vec<u8>>>),
    Object(Reference),
}

impl Printer {
    pub fn from_fd(fd: i64) -> Printer {
        match fd {
            2 => Printer::Stderr,
            _ => Printer::Stdout,
        }
    }

    /// Capturing printer plus a handle on the bytes it accumulates.
    pub fn capture() -> (Printer, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (Printer::Buffer(buffer.clone()), buffer)
    }

    pub fn write(&self, text: &str) -> Result<(), MintError> {
        match self {
            Printer::Stdout => {
                let mut stdout = std::io::stdout();
                stdout
                    .write_all(text.as_bytes())
                    .and_then(|_| stdout.flush())
                    .map_err(|e| MintError::System(format!("failed to write output: {}", e)))
            }
            Printer::Stderr => {
                let mut stderr = std::io::stderr();
                stderr
                    .write_all(text.as_bytes())
                    .and_then(|_| stderr.flush())
                    .map_err(|e| MintError::System(format!("failed to write output: {}", e)))
            }
            Printer::File(file) => {
                let mut file = file
                    .lock()
                    .map_err(|_| MintError::System("printer file lock poisoned".into()))?;
                file.write_all(text.as_bytes())
                    .map_err(|e| MintError::System(format!("failed to write output: {}", e)))
            }
            Printer::Buffer(buffer) => {
                let mut buffer = buffer
                    .lock()
                    .map_err(|_| MintError::System("printer buffer lock poisoned".into()))?;
                buffer.extend_from_slice(text.as_bytes());
                Ok(())
            }
            Printer::Object(_) => Err(MintError::System(
                "object printers are dispatched by the interpreter".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_printer_accumulates() {
        let (printer, buffer) = Printer::capture();
        printer.write("mint").unwrap();
        printer.write("\n").unwrap();
        assert_eq!(&*buffer.lock().unwrap(), b"mint\n");
    }
}
