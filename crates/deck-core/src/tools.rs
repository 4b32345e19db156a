//! Known Claude Code tool names.

use std::collections::HashSet;

/// Tool names the CLI puts first in a working title (`⠋ Read src/a.rs`).
pub const DEFAULT_KNOWN_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "Bash",
    "Glob",
    "Grep",
    "Task",
    "WebFetch",
    "WebSearch",
    "Notebook",
    "NotebookEdit",
    "MultiEdit",
    "TodoRead",
    "TodoWrite",
];

/// Set of tool names used to tell `tool_calling` titles from `thinking` ones.
///
/// The CLI adds tools over time, so the set is built from configuration and
/// falls back to [`DEFAULT_KNOWN_TOOLS`].
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    names: HashSet<String>,
}

impl ToolCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_KNOWN_TOOLS.iter().copied())
    }
}
