//! Hook event kinds from Claude Code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized hook kinds accepted from the Claude CLI hook pipeline.
///
/// The CLI names hooks in PascalCase (`PreToolUse`); handler scripts
/// sometimes forward snake_case. Both spellings parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    SessionStart,
    SessionEnd,
    Stop,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    UserPromptSubmit,
    Notification,
    PermissionRequest,
    SubagentStart,
    SubagentStop,
    TaskCompleted,
    /// Accepted, never emitted.
    PreCompact,
    /// Accepted, never emitted.
    Setup,
    /// Accepted, never emitted.
    TeammateIdle,
}

impl HookKind {
    pub const ALL: [HookKind; 15] = [
        Self::SessionStart,
        Self::SessionEnd,
        Self::Stop,
        Self::PreToolUse,
        Self::PostToolUse,
        Self::PostToolUseFailure,
        Self::UserPromptSubmit,
        Self::Notification,
        Self::PermissionRequest,
        Self::SubagentStart,
        Self::SubagentStop,
        Self::TaskCompleted,
        Self::PreCompact,
        Self::Setup,
        Self::TeammateIdle,
    ];

    /// Parses a hook name in either PascalCase or snake_case.
    pub fn from_hook_name(name: &str) -> Option<Self> {
        let folded: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "sessionstart" => Some(Self::SessionStart),
            "sessionend" => Some(Self::SessionEnd),
            "stop" => Some(Self::Stop),
            "pretooluse" => Some(Self::PreToolUse),
            "posttooluse" => Some(Self::PostToolUse),
            "posttoolusefailure" => Some(Self::PostToolUseFailure),
            "userpromptsubmit" => Some(Self::UserPromptSubmit),
            "notification" => Some(Self::Notification),
            "permissionrequest" => Some(Self::PermissionRequest),
            "subagentstart" => Some(Self::SubagentStart),
            "subagentstop" => Some(Self::SubagentStop),
            "taskcompleted" => Some(Self::TaskCompleted),
            "precompact" => Some(Self::PreCompact),
            "setup" => Some(Self::Setup),
            "teammateidle" => Some(Self::TeammateIdle),
            _ => None,
        }
    }

    /// Kinds that are accepted but produce no bus event.
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::PreCompact | Self::Setup | Self::TeammateIdle)
    }

    /// Kinds that carry a `tool_name` in their stdin blob.
    #[must_use]
    pub fn is_tool_event(&self) -> bool {
        matches!(
            self,
            Self::PreToolUse | Self::PostToolUse | Self::PostToolUseFailure | Self::PermissionRequest
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Stop => "stop",
            Self::PreToolUse => "pre_tool_use",
            Self::PostToolUse => "post_tool_use",
            Self::PostToolUseFailure => "post_tool_use_failure",
            Self::UserPromptSubmit => "user_prompt_submit",
            Self::Notification => "notification",
            Self::PermissionRequest => "permission_request",
            Self::SubagentStart => "subagent_start",
            Self::SubagentStop => "subagent_stop",
            Self::TaskCompleted => "task_completed",
            Self::PreCompact => "pre_compact",
            Self::Setup => "setup",
            Self::TeammateIdle => "teammate_idle",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_kind_parsing() {
        assert_eq!(
            HookKind::from_hook_name("PreToolUse"),
            Some(HookKind::PreToolUse)
        );
        assert_eq!(
            HookKind::from_hook_name("post_tool_use_failure"),
            Some(HookKind::PostToolUseFailure)
        );
        assert_eq!(HookKind::from_hook_name("Stop"), Some(HookKind::Stop));
        assert_eq!(HookKind::from_hook_name("Unknown"), None);
        assert_eq!(HookKind::from_hook_name(""), None);
    }

    #[test]
    fn test_every_kind_round_trips_through_its_name() {
        for kind in HookKind::ALL {
            assert_eq!(HookKind::from_hook_name(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_hook_kind_classification() {
        assert!(HookKind::PreCompact.is_ignored());
        assert!(HookKind::TeammateIdle.is_ignored());
        assert!(!HookKind::Stop.is_ignored());
        assert!(HookKind::PreToolUse.is_tool_event());
        assert!(!HookKind::Notification.is_tool_event());
    }
}
