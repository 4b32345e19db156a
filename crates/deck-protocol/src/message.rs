//! Event bus message types.

use chrono::{DateTime, Utc};
use deck_core::{ClaudeContext, OutputFrame, ProjectId, SessionId, SessionStatus, Substatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Every event kind that can appear on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusEventKind {
    // === Supervisor / state machine ===
    #[serde(rename = "pty.data")]
    PtyData,
    #[serde(rename = "pty.exit")]
    PtyExit,
    #[serde(rename = "session.status")]
    SessionStatus,
    #[serde(rename = "session.title")]
    SessionTitle,
    #[serde(rename = "session.ready")]
    SessionReady,
    #[serde(rename = "session.loading_dismissed")]
    LoadingDismissed,

    // === Throttled activity pings ===
    #[serde(rename = "project.user_activity")]
    UserActivity,
    #[serde(rename = "project.output_activity")]
    OutputActivity,

    // === Hooks ===
    #[serde(rename = "claude.session_start")]
    ClaudeSessionStart,
    #[serde(rename = "claude.session_end")]
    ClaudeSessionEnd,
    #[serde(rename = "claude.tool_start")]
    ClaudeToolStart,
    #[serde(rename = "claude.working")]
    ClaudeWorking,
    #[serde(rename = "claude.tool_end")]
    ClaudeToolEnd,
    #[serde(rename = "claude.tool_error")]
    ClaudeToolError,
    #[serde(rename = "claude.prompt_submit")]
    ClaudePromptSubmit,
    #[serde(rename = "claude.notification")]
    ClaudeNotification,
    #[serde(rename = "claude.permission")]
    ClaudePermission,
    #[serde(rename = "claude.subagent_start")]
    ClaudeSubagentStart,
    #[serde(rename = "claude.subagent_stop")]
    ClaudeSubagentStop,
    #[serde(rename = "claude.done")]
    ClaudeDone,
}

impl BusEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PtyData => "pty.data",
            Self::PtyExit => "pty.exit",
            Self::SessionStatus => "session.status",
            Self::SessionTitle => "session.title",
            Self::SessionReady => "session.ready",
            Self::LoadingDismissed => "session.loading_dismissed",
            Self::UserActivity => "project.user_activity",
            Self::OutputActivity => "project.output_activity",
            Self::ClaudeSessionStart => "claude.session_start",
            Self::ClaudeSessionEnd => "claude.session_end",
            Self::ClaudeToolStart => "claude.tool_start",
            Self::ClaudeWorking => "claude.working",
            Self::ClaudeToolEnd => "claude.tool_end",
            Self::ClaudeToolError => "claude.tool_error",
            Self::ClaudePromptSubmit => "claude.prompt_submit",
            Self::ClaudeNotification => "claude.notification",
            Self::ClaudePermission => "claude.permission",
            Self::ClaudeSubagentStart => "claude.subagent_start",
            Self::ClaudeSubagentStop => "claude.subagent_stop",
            Self::ClaudeDone => "claude.done",
        }
    }

    /// Kinds emitted by the hook ingestor.
    pub fn is_hook(&self) -> bool {
        self.as_str().starts_with("claude.")
    }
}

impl fmt::Display for BusEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which session an event belongs to.
///
/// Hook events are keyed by the (normalized) cwd they arrived with; the
/// registry join happens before emission but the hook stream has no PTY id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRef {
    Id(SessionId),
    Cwd(String),
}

impl SessionRef {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Cwd(_) => None,
        }
    }
}

/// Producer of a bus event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    StateMachine,
    Hooks,
}

/// Uniform record placed on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub kind: BusEventKind,
    pub session_ref: SessionRef,
    pub payload: Map<String, Value>,
    pub origin: Origin,
    pub at: DateTime<Utc>,
    /// Raw PTY bytes for `pty.data`; not serialized (`payload.len` is).
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl BusEvent {
    pub fn new(kind: BusEventKind, session_ref: SessionRef, origin: Origin, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            kind,
            session_ref,
            payload,
            origin,
            at: Utc::now(),
            data: None,
        }
    }

    fn session(kind: BusEventKind, id: SessionId, payload: Value) -> Self {
        Self::new(kind, SessionRef::Id(id), Origin::StateMachine, payload)
    }

    /// `pty.data {id, bytes}`.
    pub fn pty_data(id: SessionId, bytes: Vec<u8>) -> Self {
        let mut event = Self::session(
            BusEventKind::PtyData,
            id,
            json!({ "id": id, "len": bytes.len() }),
        );
        event.data = Some(bytes);
        event
    }

    /// `pty.data` stamped with the frame's receive time.
    pub fn frame(frame: OutputFrame) -> Self {
        let mut event = Self::pty_data(frame.session_id, frame.bytes);
        event.at = frame.received_at;
        event
    }

    /// `pty.exit {id}`.
    pub fn pty_exit(id: SessionId, exit_code: Option<u32>) -> Self {
        Self::session(
            BusEventKind::PtyExit,
            id,
            json!({ "id": id, "exit_code": exit_code }),
        )
    }

    /// `session.status {id, status, substatus?, reason?}`.
    pub fn status(
        id: SessionId,
        status: SessionStatus,
        substatus: Option<Substatus>,
        reason: Option<&str>,
    ) -> Self {
        let mut payload = json!({ "id": id, "status": status });
        if let Some(sub) = substatus {
            payload["substatus"] = json!(sub);
        }
        if let Some(reason) = reason {
            payload["reason"] = json!(reason);
        }
        Self::session(BusEventKind::SessionStatus, id, payload)
    }

    /// `session.title {id, task_name}`.
    pub fn title(id: SessionId, task_name: &str) -> Self {
        Self::session(
            BusEventKind::SessionTitle,
            id,
            json!({ "id": id, "task_name": task_name }),
        )
    }

    /// `session.ready {id, duration?, tool_count, task_name?, last_tool?, reason}`.
    pub fn ready(id: SessionId, context: &ClaudeContext, reason: &str) -> Self {
        Self::session(
            BusEventKind::SessionReady,
            id,
            json!({
                "id": id,
                "duration": context.duration,
                "tool_count": context.tool_count,
                "task_name": context.task_name,
                "last_tool": context.last_tool,
                "reason": reason,
            }),
        )
    }

    /// `session.loading_dismissed {id}`.
    pub fn loading_dismissed(id: SessionId) -> Self {
        Self::session(BusEventKind::LoadingDismissed, id, json!({ "id": id }))
    }

    /// `project.user_activity` / `project.output_activity`.
    pub fn activity(kind: BusEventKind, id: SessionId, project_id: &ProjectId) -> Self {
        Self::session(kind, id, json!({ "id": id, "project_id": project_id }))
    }

    /// A `claude.*` event produced by the hook ingestor.
    pub fn hook(kind: BusEventKind, cwd: String, payload: Value) -> Self {
        Self::new(kind, SessionRef::Cwd(cwd), Origin::Hooks, payload)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_ref.session_id()
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn payload_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }

    /// Payload's `project_id`, set on hook and activity events.
    pub fn project_id(&self) -> Option<ProjectId> {
        self.payload_str("project_id").map(ProjectId::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serialization_uses_dotted_names() {
        let json = serde_json::to_string(&BusEventKind::LoadingDismissed).unwrap();
        assert_eq!(json, "\"session.loading_dismissed\"");
        let parsed: BusEventKind = serde_json::from_str("\"claude.tool_start\"").unwrap();
        assert_eq!(parsed, BusEventKind::ClaudeToolStart);
        assert!(parsed.is_hook());
        assert!(!BusEventKind::PtyData.is_hook());
    }

    #[test]
    fn test_status_event_payload() {
        let event = BusEvent::status(
            SessionId::new(3),
            SessionStatus::Working,
            Some(Substatus::ToolCalling),
            None,
        );
        assert_eq!(event.session_id(), Some(SessionId::new(3)));
        assert_eq!(event.payload_str("status"), Some("working"));
        assert_eq!(event.payload_str("substatus"), Some("tool_calling"));
        assert!(event.payload.get("reason").is_none());
        assert_eq!(event.origin, Origin::StateMachine);
    }

    #[test]
    fn test_ready_event_payload() {
        let mut ctx = ClaudeContext::default();
        ctx.record_tool("Read");
        ctx.record_tool("Edit");
        let event = BusEvent::ready(SessionId::new(1), &ctx, "silence");
        assert_eq!(event.payload_u64("tool_count"), Some(2));
        assert_eq!(event.payload_str("last_tool"), Some("Edit"));
        assert_eq!(event.payload_str("reason"), Some("silence"));
        assert!(event.payload["duration"].is_null());
    }

    #[test]
    fn test_pty_data_keeps_bytes_out_of_json() {
        let event = BusEvent::pty_data(SessionId::new(9), vec![0xff, b'a']);
        assert_eq!(event.data.as_deref(), Some(&[0xff, b'a'][..]));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["len"], 2);
        assert_eq!(json["session_ref"]["id"], 9);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_frame_keeps_receive_time() {
        let received_at = "2026-01-02T03:04:05Z".parse::<DateTime<Utc>>().unwrap();
        let event = BusEvent::frame(OutputFrame {
            session_id: SessionId::new(4),
            bytes: b"hi".to_vec(),
            received_at,
        });
        assert_eq!(event.kind, BusEventKind::PtyData);
        assert_eq!(event.at, received_at);
        assert_eq!(event.payload_u64("len"), Some(2));
    }

    #[test]
    fn test_hook_event_ref() {
        let event = BusEvent::hook(
            BusEventKind::ClaudeWorking,
            "/home/u/p".to_string(),
            json!({ "project_id": "p1", "tool_name": "Bash" }),
        );
        assert_eq!(event.session_id(), None);
        assert_eq!(event.project_id(), Some(ProjectId::new("p1")));
        assert_eq!(event.origin, Origin::Hooks);
    }
}
