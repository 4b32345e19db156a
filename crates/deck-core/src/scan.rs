//! Buffer scan over the visible tail of a Claude CLI screen.
//!
//! The CLI renders its state as glyph lines above the prompt box:
//!
//! ```text
//! ✳ Churned for 1m 51s                          definitive done
//! · Churning… (12s · esc to interrupt)          still working
//! Do you want to run this command? (y/n)        permission prompt
//!   ⎿  Read 42 lines                             tool result
//! ╭──────────────────────────────────────╮
//! │ >                                    │      (skipped)
//! ╰──────────────────────────────────────╯
//! ⏵⏵ accept edits on                            (skipped)
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::title::is_braille_spinner;

/// Number of visible lines inspected from the bottom of the screen.
pub const SCAN_LINES: usize = 10;

/// Glyphs the CLI cycles through on its status line.
pub const STATUS_GLYPHS: &[char] = &['✳', '✻', '✶', '✽', '✢', '*', '·'];

const TOOL_RESULT_MARKER: char = '⎿';

// Patterns are constants; a failed compile degrades to "no match".
static COMPLETION_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^(\S+)\s+for\s+(\d+h(?:\s*\d+m)?(?:\s*\d+(?:\.\d+)?s)?|\d+m(?:\s*\d+(?:\.\d+)?s)?|\d+(?:\.\d+)?s)\s*$")
        .ok()
});

static WORKING_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\S+(…|\.\.\.)").ok());

static PERMISSION_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\by/n\b|\byes/no\b|\bdo you want to\b|\b(allow|approve)\b").ok()
});

static VERB_QUESTION_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(Run|Execute|Edit|Write|Read|Delete|Bash)\b.*\?").ok());

fn matches(pattern: &Option<Regex>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

/// Parses `<Word> for <duration>` and returns the duration text.
///
/// `Churned for 1m 51s` yields `1m 51s`; `Churned` yields `None`.
pub fn parse_completion(text: &str) -> Option<String> {
    Option::as_ref(&COMPLETION_PATTERN)?
        .captures(text.trim())
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Result of scanning the screen tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// `✳ <word> for <duration>` is on screen.
    Done { duration: String },
    /// `· <word>…` status line: the CLI is still computing.
    Working,
    /// A permission prompt awaits the user.
    Permission,
    /// The most recent line is a `⎿` tool result.
    ToolResult,
    Nothing,
}

/// Scans the last [`SCAN_LINES`] lines, bottom-most last in `lines`.
///
/// Priority: done, then working, then permission, then tool result.
pub fn scan_lines<S: AsRef<str>>(lines: &[S]) -> ScanOutcome {
    let start = lines.len().saturating_sub(SCAN_LINES);
    let tail: Vec<&str> = lines
        .iter()
        .skip(start)
        .map(|l| strip_frame(l.as_ref()))
        .filter(|l| !is_skipped(l))
        .collect();

    // Bottom-up so the freshest marker wins within a class.
    for line in tail.iter().rev() {
        if let Some(rest) = strip_status_glyph(line) {
            if let Some(duration) = parse_completion(rest) {
                return ScanOutcome::Done { duration };
            }
        }
    }
    if tail
        .iter()
        .rev()
        .filter_map(|l| strip_status_glyph(l))
        .any(|rest| matches(&WORKING_PATTERN, rest))
    {
        return ScanOutcome::Working;
    }
    if tail.iter().rev().any(|l| is_permission_line(l)) {
        return ScanOutcome::Permission;
    }
    match tail.last() {
        Some(line) if line.starts_with(TOOL_RESULT_MARKER) => ScanOutcome::ToolResult,
        _ => ScanOutcome::Nothing,
    }
}

/// Convenience wrapper for a raw multi-line string.
pub fn scan_text(text: &str) -> ScanOutcome {
    let lines: Vec<&str> = text.lines().collect();
    scan_lines(&lines)
}

/// Returns true for a permission prompt line.
pub fn is_permission_line(line: &str) -> bool {
    matches(&PERMISSION_PATTERN, line) || matches(&VERB_QUESTION_PATTERN, line)
}

fn strip_status_glyph(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    let first = chars.next()?;
    STATUS_GLYPHS
        .contains(&first)
        .then(|| chars.as_str().trim_start())
}

fn is_box_char(c: char) -> bool {
    ('\u{2500}'..='\u{257F}').contains(&c)
}

/// Trims whitespace and box-drawing borders from both ends.
fn strip_frame(line: &str) -> &str {
    line.trim_matches(|c: char| c.is_whitespace() || is_box_char(c))
}

fn is_skipped(line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    if line.chars().all(|c| c == '❯' || c == '>' || c.is_whitespace()) {
        return true;
    }
    match line.chars().next() {
        Some(c) if is_braille_spinner(c) => true,
        Some('⏵') => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        assert_eq!(parse_completion("Churned for 1m 51s"), Some("1m 51s".into()));
        assert_eq!(parse_completion("Baked for 12s"), Some("12s".into()));
        assert_eq!(parse_completion("Worked for 2h 3m"), Some("2h 3m".into()));
        assert_eq!(parse_completion("Cooked for 4.5s"), Some("4.5s".into()));
        assert_eq!(parse_completion("Churned"), None);
        assert_eq!(parse_completion("Looking for files"), None);
        assert_eq!(parse_completion("for 3s"), None);
    }

    #[test]
    fn test_done_marker_in_tail() {
        let screen = "some answer\n\n✳ Churned for 1m 51s\n\n╭────╮\n│ >  │\n╰────╯\n⏵⏵ accept edits on";
        assert_eq!(
            scan_text(screen),
            ScanOutcome::Done {
                duration: "1m 51s".into()
            }
        );
    }

    #[test]
    fn test_still_working_line() {
        let screen = "· Churning… (12s · esc to interrupt)\n❯ ";
        assert_eq!(scan_text(screen), ScanOutcome::Working);
        assert_eq!(scan_text("✻ Reading...\n"), ScanOutcome::Working);
    }

    #[test]
    fn test_permission_shapes() {
        assert_eq!(
            scan_text("Bash command\nDo you want to proceed?\n❯ 1. Yes"),
            ScanOutcome::Permission
        );
        assert_eq!(scan_text("Overwrite file? (y/n)"), ScanOutcome::Permission);
        assert_eq!(scan_text("Run npm install?"), ScanOutcome::Permission);
        assert_eq!(scan_text("│ Allow this edit │"), ScanOutcome::Permission);
        assert_eq!(scan_text("Read the docs first"), ScanOutcome::Nothing);
    }

    #[test]
    fn test_tool_result_must_be_last() {
        assert_eq!(
            scan_text("⏺ Read(src/a.rs)\n  ⎿  Read 42 lines\n\n> "),
            ScanOutcome::ToolResult
        );
        assert_eq!(
            scan_text("  ⎿  Read 42 lines\nHere is the summary."),
            ScanOutcome::Nothing
        );
    }

    #[test]
    fn test_done_outranks_permission() {
        let screen = "Allow network access\n✳ Baked for 3s";
        assert_eq!(
            scan_text(screen),
            ScanOutcome::Done {
                duration: "3s".into()
            }
        );
    }

    #[test]
    fn test_only_tail_is_scanned() {
        let mut lines = vec!["✳ Churned for 9s".to_string()];
        lines.extend((0..SCAN_LINES).map(|i| format!("line {i}")));
        assert_eq!(scan_lines(&lines), ScanOutcome::Nothing);
    }

    #[test]
    fn test_braille_and_prompt_lines_skipped() {
        assert_eq!(scan_text("⠋ Thinking\n❯\n>\n   \n"), ScanOutcome::Nothing);
    }
}
