//! The ephemeral per-line record handed to the matching runtime.

use serde::Serialize;

/// One line of log input, with its position in the overall stream.
///
/// `line_id` is global and monotonically increasing across every logfile
/// consumed in a run; the regex cache memoises per `line_id`. `file_line`
/// restarts at 1 for each logfile.
#[derive(Debug, Clone, Serialize)]
pub struct LineRecord {
    pub line_id: u64,
    pub file: String,
    pub file_line: u64,
    pub text: String,
}

impl LineRecord {
    pub fn new(line_id: u64, file: impl Into<String>, file_line: u64, text: impl Into<String>) -> Self {
        LineRecord {
            line_id,
            file: file.into(),
            file_line,
            text: text.into(),
        }
    }
}
