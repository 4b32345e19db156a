//! Parsing hook POST bodies from Claude Code handler scripts.
//!
//! Handler scripts wrap whatever the CLI wrote to the hook's stdin:
//!
//! ```json
//! { "hook": "PreToolUse", "timestamp": "2025-01-01T00:00:00Z",
//!   "cwd": "/home/u/p/sub", "stdin": { "tool_name": "Bash", ... } }
//! ```

use chrono::{DateTime, Utc};
use deck_core::{normalize_path, DomainError, DomainResult, HookKind, ProjectId};
use serde::{Deserialize, Serialize};

/// Raw `POST /hook` body.
#[derive(Debug, Clone, Deserialize)]
pub struct RawHookPayload {
    pub hook: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Arbitrary JSON blob from the CLI, preserved verbatim.
    #[serde(default)]
    pub stdin: serde_json::Value,
}

/// Model as reported in `SessionStart`; older CLIs send a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawModel {
    Id(String),
    Object {
        id: String,
        #[serde(default)]
        display_name: Option<String>,
    },
}

impl RawModel {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object { id, .. } => id,
        }
    }
}

/// Typed view of the stdin blob.
///
/// Flat structure with all possible fields as `Option<T>`; unknown fields
/// are ignored and a non-object blob yields the default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHookStdin {
    // === Common Fields (all events) ===
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,

    // === Tool Events ===
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,

    // === User Prompt ===
    #[serde(default)]
    pub prompt: Option<String>,

    // === Subagent Events ===
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub subagent_type: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,

    // === Session Events ===
    #[serde(default)]
    pub model: Option<RawModel>,
    #[serde(default)]
    pub reason: Option<String>,

    // === Notification / TaskCompleted ===
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
}

impl RawHookStdin {
    /// Subagent name, preferring the most specific field.
    pub fn agent_name(&self) -> Option<&str> {
        self.agent_name
            .as_deref()
            .or(self.subagent_type.as_deref())
            .or(self.agent_type.as_deref())
    }

    /// Error text for `PostToolUseFailure`; objects are rendered as JSON.
    pub fn error_text(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model.as_ref().map(RawModel::id)
    }
}

/// Normalized hook record.
#[derive(Debug, Clone, Serialize)]
pub struct HookEvent {
    pub kind: HookKind,
    /// Normalized `cwd` (top-level field, falling back to the stdin blob).
    pub raw_cwd: Option<String>,
    /// Filled in by correlation against the project registry.
    pub resolved_project_id: Option<ProjectId>,
    /// The CLI's own session id, when supplied.
    pub session_id: Option<String>,
    pub tool_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// The stdin blob, verbatim.
    pub payload: serde_json::Value,
    #[serde(skip)]
    pub stdin: RawHookStdin,
}

impl RawHookPayload {
    /// Parses a request body.
    pub fn parse(body: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(body).map_err(|e| DomainError::ParseError {
            field: "hook payload".to_string(),
            reason: e.to_string(),
        })
    }

    /// Resolves the hook name against the closed kind set.
    pub fn kind(&self) -> DomainResult<HookKind> {
        HookKind::from_hook_name(&self.hook).ok_or_else(|| DomainError::InvalidFieldValue {
            field: "hook".to_string(),
            value: self.hook.clone(),
            expected: "a Claude Code hook name".to_string(),
        })
    }

    /// Typed view of `stdin`; a blob that does not fit yields the default.
    pub fn stdin(&self) -> RawHookStdin {
        serde_json::from_value(self.stdin.clone()).unwrap_or_default()
    }

    /// Converts to a normalized [`HookEvent`].
    pub fn normalize(self) -> DomainResult<HookEvent> {
        let kind = self.kind()?;
        let stdin = self.stdin();
        let raw_cwd = self
            .cwd
            .as_deref()
            .or(stdin.cwd.as_deref())
            .map(normalize_path)
            .filter(|p| !p.is_empty());
        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let tool_name = if kind.is_tool_event() {
            stdin.tool_name.clone()
        } else {
            None
        };
        Ok(HookEvent {
            kind,
            raw_cwd,
            resolved_project_id: None,
            session_id: stdin.session_id.clone(),
            tool_name,
            timestamp,
            payload: self.stdin,
            stdin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_tool_use_payload() {
        let body = br#"{
            "hook": "PreToolUse",
            "timestamp": "2025-06-01T12:00:00Z",
            "cwd": "/home/u/p/sub/",
            "stdin": {"session_id": "abc", "tool_name": "Bash", "tool_input": {"command": "ls"}}
        }"#;

        let event = RawHookPayload::parse(body).unwrap().normalize().unwrap();
        assert_eq!(event.kind, HookKind::PreToolUse);
        assert_eq!(event.raw_cwd.as_deref(), Some("/home/u/p/sub"));
        assert_eq!(event.session_id.as_deref(), Some("abc"));
        assert_eq!(event.tool_name.as_deref(), Some("Bash"));
        assert_eq!(event.timestamp.to_rfc3339(), "2025-06-01T12:00:00+00:00");
        assert_eq!(event.payload["tool_input"]["command"], "ls");
    }

    #[test]
    fn test_snake_case_hook_and_missing_fields() {
        let body = br#"{"hook": "session_start"}"#;
        let event = RawHookPayload::parse(body).unwrap().normalize().unwrap();
        assert_eq!(event.kind, HookKind::SessionStart);
        assert!(event.raw_cwd.is_none());
        assert!(event.payload.is_null());
    }

    #[test]
    fn test_cwd_falls_back_to_stdin() {
        let body = br#"{"hook": "Stop", "stdin": {"cwd": "C:\\work\\proj"}}"#;
        let event = RawHookPayload::parse(body).unwrap().normalize().unwrap();
        assert_eq!(event.raw_cwd.as_deref(), Some("C:/work/proj"));
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(
            RawHookPayload::parse(b"not json"),
            Err(DomainError::ParseError { .. })
        ));
        assert!(matches!(
            RawHookPayload::parse(br#"{"cwd": "/x"}"#),
            Err(DomainError::ParseError { .. })
        ));
    }

    #[test]
    fn test_unknown_hook_kind() {
        let raw = RawHookPayload::parse(br#"{"hook": "Bogus"}"#).unwrap();
        assert!(matches!(
            raw.normalize(),
            Err(DomainError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn test_model_string_or_object() {
        let raw = RawHookPayload::parse(br#"{"hook":"SessionStart","stdin":{"model":"claude-x"}}"#)
            .unwrap();
        assert_eq!(raw.stdin().model_id(), Some("claude-x"));

        let raw = RawHookPayload::parse(
            br#"{"hook":"SessionStart","stdin":{"model":{"id":"claude-y","display_name":"Y"}}}"#,
        )
        .unwrap();
        assert_eq!(raw.stdin().model_id(), Some("claude-y"));
    }

    #[test]
    fn test_stdin_helpers() {
        let raw = RawHookPayload::parse(
            br#"{"hook":"PostToolUseFailure","stdin":{"tool_name":"Bash","error":{"code":1},"agent_type":"Explore"}}"#,
        )
        .unwrap();
        let stdin = raw.stdin();
        assert_eq!(stdin.error_text().as_deref(), Some(r#"{"code":1}"#));
        assert_eq!(stdin.agent_name(), Some("Explore"));
    }

    #[test]
    fn test_non_object_stdin_is_tolerated() {
        let raw = RawHookPayload::parse(br#"{"hook":"Notification","stdin":"plain text"}"#).unwrap();
        assert!(raw.stdin().message.is_none());
        let event = raw.normalize().unwrap();
        assert_eq!(event.payload, serde_json::json!("plain text"));
    }
}
