//! Ownership record stored inside a lock file
//!
//! The format is two newline-terminated lines: the owner's decimal pid and
//! its full command line. Anything after the second line is ignored and only
//! the first [`MAX_RECORD_BYTES`] bytes are ever read.

use serde::Serialize;

/// Number of bytes read from the start of a lock file.
pub const MAX_RECORD_BYTES: usize = 1024;

/// The `(pid, command line)` claim written by the lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OwnershipRecord {
    pub pid: u32,
    pub command_line: String,
}

impl OwnershipRecord {
    /// Build a record, normalizing the command line so it fits on one line
    /// and the encoded record fits in [`MAX_RECORD_BYTES`].
    #[must_use]
    pub fn new(pid: u32, command_line: &str) -> Self {
        let budget = MAX_RECORD_BYTES - pid.to_string().len() - 2;
        let normalized = normalize_command_line(command_line);
        Self {
            pid,
            command_line: truncate_at_char_boundary(normalized, budget),
        }
    }

    /// Parse a record from the head of a lock file.
    ///
    /// Returns `None` for empty or malformed contents: fewer than two lines,
    /// or a first line that is not a positive decimal pid.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let head = &bytes[..bytes.len().min(MAX_RECORD_BYTES)];
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split('\n');

        let pid = lines
            .next()?
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|pid| *pid > 0)?;
        let command_line = lines.next()?;

        Some(Self {
            pid,
            command_line: command_line.to_string(),
        })
    }

    /// Serialize as `"<pid>\n<command line>\n"`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}\n{}\n", self.pid, self.command_line)
    }

    /// Compare against a command line observed for the same pid, applying the
    /// same normalization used when the record was written.
    #[must_use]
    pub fn matches_command_line(&self, observed: &str) -> bool {
        Self::new(self.pid, observed).command_line == self.command_line
    }
}

/// Collapse line breaks into spaces and trim surrounding whitespace.
#[must_use]
pub fn normalize_command_line(raw: &str) -> String {
    raw.replace(['\r', '\n'], " ").trim().to_string()
}

fn truncate_at_char_boundary(mut text: String, max_len: usize) -> String {
    if text.len() > max_len {
        let cut = (0..=max_len)
            .rev()
            .find(|idx| text.is_char_boundary(*idx))
            .unwrap_or(0);
        text.truncate(cut);
    }
    text
}
