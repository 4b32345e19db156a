//! Headless screen model for buffer scans.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;
use vt100::Parser;

use deck_core::{scan_lines, ScanOutcome};

/// vt100 needs at least two rows to wrap safely.
const MIN_ROWS: u16 = 2;

/// Mirrors what the user sees so scans read rendered lines, not raw bytes.
pub struct ScreenMirror {
    parser: Parser,
}

impl std::fmt::Debug for ScreenMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (rows, cols) = self.parser.screen().size();
        f.debug_struct("ScreenMirror")
            .field("rows", &rows)
            .field("cols", &cols)
            .finish()
    }
}

impl ScreenMirror {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            parser: Parser::new(rows.max(MIN_ROWS), cols.max(1), 0),
        }
    }

    /// Feeds raw PTY bytes.
    ///
    /// A parser panic resets the mirror instead of unwinding into the
    /// session actor.
    pub fn process(&mut self, bytes: &[u8]) {
        let parser = &mut self.parser;
        if catch_unwind(AssertUnwindSafe(|| parser.process(bytes))).is_err() {
            let (rows, cols) = self.parser.screen().size();
            error!(rows, cols, "Screen parser panicked, resetting mirror");
            self.parser = Parser::new(rows.max(MIN_ROWS), cols.max(1), 0);
        }
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.parser.set_size(rows.max(MIN_ROWS), cols.max(1));
    }

    /// Visible rows, top first, with trailing blank rows dropped.
    pub fn lines(&self) -> Vec<String> {
        let screen = self.parser.screen();
        let mut lines: Vec<String> = screen.rows(0, screen.size().1).collect();
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        lines
    }

    pub fn scan(&self) -> ScanOutcome {
        scan_lines(&self.lines())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_follow_cursor_movement() {
        let mut screen = ScreenMirror::new(40, 6);
        screen.process(b"first\r\nsecond\r\n");
        // Overwrite the first line in place.
        screen.process(b"\x1b[1;1Hreplaced");
        assert_eq!(screen.lines(), vec!["replaced", "second"]);
    }

    #[test]
    fn test_scan_reads_rendered_tail() {
        let mut screen = ScreenMirror::new(60, 8);
        screen.process("some output\r\n\u{2733} Churned for 1m 51s\r\n\u{276f} \r\n".as_bytes());
        assert_eq!(
            screen.scan(),
            ScanOutcome::Done {
                duration: "1m 51s".to_string()
            }
        );
    }

    #[test]
    fn test_clear_screen_forgets_old_markers() {
        let mut screen = ScreenMirror::new(60, 8);
        screen.process("\u{2733} Churned for 5s\r\n".as_bytes());
        screen.process(b"\x1b[2J\x1b[H");
        assert_eq!(screen.scan(), ScanOutcome::Nothing);
    }

    #[test]
    fn test_resize_keeps_working() {
        let mut screen = ScreenMirror::new(10, 3);
        screen.resize(80, 24);
        screen.process(b"hello");
        assert_eq!(screen.lines(), vec!["hello"]);
    }
}
