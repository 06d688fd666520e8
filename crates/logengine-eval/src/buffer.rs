//! The output buffer behind `WRITE_TO_BUFFER` and friends.
//!
//! A single engine-owned text buffer that user actions append to and flush
//! to stdout or files. I/O failures are reported and swallowed; output
//! helpers never abort the matching loop.

use std::fs::OpenOptions;
use std::io::Write;

use tracing::warn;

#[derive(Debug, Default)]
pub struct OutputBuffer {
    data: String,
}

impl OutputBuffer {
    pub fn new() -> Self {
        OutputBuffer::default()
    }

    /// Pre-size the buffer (the CLI's `--buffer <KB>` hint).
    pub fn reserve(&mut self, bytes: usize) {
        self.data.reserve(bytes);
    }

    pub fn write(&mut self, text: &str) {
        self.data.push_str(text);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn contents(&self) -> &str {
        &self.data
    }

    /// Flush the buffer to stdout and clear it.
    pub fn flush_stdout(&mut self) {
        print!("{}", self.data);
        let _ = std::io::stdout().flush();
        self.data.clear();
    }

    /// Append the buffer to a file and clear it.
    pub fn flush_file(&mut self, path: &str) {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(mut f) => {
                if let Err(e) = f.write_all(self.data.as_bytes()) {
                    warn!(path, error = %e, "buffer write failed");
                }
                self.data.clear();
            }
            Err(e) => warn!(path, error = %e, "cannot open buffer target"),
        }
    }
}

/// Print each list element on its own line.
pub fn write_list_to_stdout(items: &[String]) {
    let mut out = std::io::stdout().lock();
    for item in items {
        let _ = writeln!(out, "{item}");
    }
}

/// Append each list element to a file, one per line.
pub fn write_list_to_file(path: &str, items: &[String]) {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut f) => {
            for item in items {
                if let Err(e) = writeln!(f, "{item}") {
                    warn!(path, error = %e, "list write failed");
                    return;
                }
            }
        }
        Err(e) => warn!(path, error = %e, "cannot open list target"),
    }
}
