//! Classification of Claude CLI window titles.
//!
//! Title shapes:
//!
//! ```text
//! ⠋ Read src/a.rs          working, tool_calling (first token is a known tool)
//! ⠙ Refactoring parser     working, thinking (remainder is the task name)
//! ✳ Churned for 1m 51s     definitive completion with duration
//! ✳ Refactoring parser     tentative ready candidate
//! ```

use crate::scan::parse_completion;
use crate::tools::ToolCatalog;

/// Glyph the CLI shows in the title once it stops working.
pub const STAR_MARKER: char = '\u{2733}';

/// Title the CLI sets when idle with no task label.
pub const IDLE_TITLE: &str = "Claude Code";

/// Returns true for the Braille spinner glyphs `U+2801..=U+28FF`.
///
/// `U+2800` (blank pattern) is excluded; it never appears as a spinner frame.
pub fn is_braille_spinner(c: char) -> bool {
    ('\u{2801}'..='\u{28FF}').contains(&c)
}

/// What a title says about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleKind {
    /// Braille spinner: the CLI is computing.
    Working {
        /// Set when the first token names a known tool.
        tool: Option<String>,
        /// Everything after the glyph, e.g. `Read src/a.rs`.
        label: String,
    },
    /// Star title with `for <duration>`.
    Done { label: String, duration: String },
    /// Star title without a duration.
    ReadyCandidate { task_name: Option<String> },
    /// Anything else (shell titles, empty titles).
    Other,
}

impl TitleKind {
    /// Human-readable task label carried by the title, if any.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            Self::Working { tool: None, label } if !label.is_empty() => Some(label),
            Self::ReadyCandidate { task_name } => task_name.as_deref(),
            _ => None,
        }
    }
}

/// Classifies a raw OSC title.
pub fn classify_title(title: &str, tools: &ToolCatalog) -> TitleKind {
    let trimmed = title.trim();
    let mut chars = trimmed.chars();
    let Some(glyph) = chars.next() else {
        return TitleKind::Other;
    };
    let rest = chars.as_str().trim();

    if is_braille_spinner(glyph) {
        let first = rest.split_whitespace().next().unwrap_or_default();
        let tool = tools.contains(first).then(|| first.to_string());
        return TitleKind::Working {
            tool,
            label: rest.to_string(),
        };
    }

    if glyph == STAR_MARKER {
        if let Some(duration) = parse_completion(rest) {
            return TitleKind::Done {
                label: rest.to_string(),
                duration,
            };
        }
        let task_name = (!rest.is_empty() && rest != IDLE_TITLE).then(|| rest.to_string());
        return TitleKind::ReadyCandidate { task_name };
    }

    TitleKind::Other
}
