// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::OnceLock;

use regex::Regex;

/// Per-stream cap on buffered output available for query.
pub const OUTPUT_CAP_CHARS: usize = 30_000;

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[@-~]").expect("static regex"))
}

/// Remove ANSI CSI escape sequences (colors, cursor movement) so buffered
/// output stays readable when filtered with a regex.
pub fn strip_ansi(s: &str) -> String {
    ansi_re().replace_all(s, "").into_owned()
}

/// A character-capped append buffer that keeps the tail of the stream.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    data: String,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: String) -> Self {
        let mut buf = Self::default();
        buf.append(&seed);
        buf
    }

    /// Append a chunk, stripping ANSI escapes and trimming the front when
    /// the cap is exceeded.  Trimming lands on a char boundary.
    pub fn append(&mut self, chunk: &str) {
        self.data.push_str(&strip_ansi(chunk));
        if self.data.len() > OUTPUT_CAP_CHARS {
            let mut cut = self.data.len() - OUTPUT_CAP_CHARS;
            while !self.data.is_char_boundary(cut) {
                cut += 1;
            }
            self.data.drain(..cut);
        }
    }

    pub fn contents(&self) -> &str {
        &self.data
    }

    /// Contents filtered to lines matching `filter` (when given).
    pub fn filtered(&self, filter: Option<&Regex>) -> String {
        match filter {
            None => self.data.clone(),
            Some(re) => self
                .data
                .lines()
                .filter(|l| re.is_match(l))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Snapshot of a background task's output returned by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutputReport {
    pub task_id: String,
    pub status: crate::TaskStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m plain"), "red plain");
    }

    #[test]
    fn strip_ansi_leaves_plain_text_alone() {
        assert_eq!(strip_ansi("no escapes here"), "no escapes here");
    }

    #[test]
    fn buffer_appends_and_reads_back() {
        let mut b = OutputBuffer::new();
        b.append("hello ");
        b.append("world");
        assert_eq!(b.contents(), "hello world");
    }

    #[test]
    fn buffer_keeps_tail_when_over_cap() {
        let mut b = OutputBuffer::new();
        b.append(&"x".repeat(OUTPUT_CAP_CHARS));
        b.append("TAIL");
        assert_eq!(b.contents().len(), OUTPUT_CAP_CHARS);
        assert!(b.contents().ends_with("TAIL"));
    }

    #[test]
    fn buffer_trim_respects_multibyte_boundaries() {
        let mut b = OutputBuffer::new();
        b.append(&"é".repeat(OUTPUT_CAP_CHARS)); // 2 bytes per char
        b.append("end");
        assert!(b.contents().ends_with("end"));
        // Must still be valid UTF-8 (would have panicked in drain otherwise).
        assert!(b.contents().len() <= OUTPUT_CAP_CHARS + 1);
    }

    #[test]
    fn filtered_selects_matching_lines() {
        let mut b = OutputBuffer::new();
        b.append("ok line\nerror: bad\nok again\nerror: worse\n");
        let re = Regex::new("^error:").unwrap();
        assert_eq!(b.filtered(Some(&re)), "error: bad\nerror: worse");
    }

    #[test]
    fn filtered_without_regex_returns_everything() {
        let mut b = OutputBuffer::new();
        b.append("a\nb");
        assert_eq!(b.filtered(None), "a\nb");
    }
}
