//! Session domain entities and value objects.

use crate::error::DomainError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Process-wide unique identifier for a terminal session.
///
/// Allocated monotonically by the supervisor; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Opaque project token supplied by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Mode, Status, Substatus
// ============================================================================

/// What runs inside the PTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Plain interactive shell.
    Shell,
    /// Shell that launches the Claude CLI as its first command.
    Claude,
}

impl SessionMode {
    pub fn is_claude(&self) -> bool {
        matches!(self, Self::Claude)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell => write!(f, "shell"),
            Self::Claude => write!(f, "claude"),
        }
    }
}

impl FromStr for SessionMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shell" => Ok(Self::Shell),
            "claude" => Ok(Self::Claude),
            other => Err(DomainError::InvalidFieldValue {
                field: "mode".to_string(),
                value: other.to_string(),
                expected: "shell or claude".to_string(),
            }),
        }
    }
}

/// Inferred liveness of a session.
///
/// Allowed edges: `loading → working`, `working → ready`, `ready → working`,
/// and any state `→ exited`. `exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    Working,
    Ready,
    Exited,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Working => "working",
            Self::Ready => "ready",
            Self::Exited => "exited",
        }
    }

    /// Returns true if `self → next` is an edge of the status graph.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match (self, next) {
            (Self::Exited, _) => false,
            (_, Self::Exited) => true,
            (Self::Loading, Self::Working) => true,
            (Self::Working, Self::Ready) => true,
            (Self::Ready, Self::Working) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited)
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Loading => 0,
            Self::Working => 1,
            Self::Ready => 2,
            Self::Exited => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Loading,
            1 => Self::Working,
            2 => Self::Ready,
            _ => Self::Exited,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refinement of `working` / `ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Substatus {
    Thinking,
    ToolCalling,
    /// Ready, but the screen shows a permission prompt.
    Waiting,
}

impl Substatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::ToolCalling => "tool_calling",
            Self::Waiting => "waiting",
        }
    }

    fn encode(v: Option<Self>) -> u8 {
        match v {
            None => 0,
            Some(Self::Thinking) => 1,
            Some(Self::ToolCalling) => 2,
            Some(Self::Waiting) => 3,
        }
    }

    fn decode(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Thinking),
            2 => Some(Self::ToolCalling),
            3 => Some(Self::Waiting),
            _ => None,
        }
    }
}

impl fmt::Display for Substatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Activity Timestamps
// ============================================================================

/// Which activity timestamp to stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    PtyWrite,
    PtyRead,
    UserKeystroke,
    EnterPress,
}

/// Lock-free activity record, stored as unix milliseconds (0 = never).
#[derive(Debug, Default)]
pub struct ActivityTimestamps {
    last_pty_write: AtomicI64,
    last_pty_read: AtomicI64,
    last_user_keystroke: AtomicI64,
    last_enter_press: AtomicI64,
}

impl ActivityTimestamps {
    fn slot(&self, activity: Activity) -> &AtomicI64 {
        match activity {
            Activity::PtyWrite => &self.last_pty_write,
            Activity::PtyRead => &self.last_pty_read,
            Activity::UserKeystroke => &self.last_user_keystroke,
            Activity::EnterPress => &self.last_enter_press,
        }
    }

    pub fn stamp(&self, activity: Activity, at: DateTime<Utc>) {
        self.slot(activity)
            .store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn get(&self, activity: Activity) -> Option<DateTime<Utc>> {
        let millis = self.slot(activity).load(Ordering::Acquire);
        if millis == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        ActivitySnapshot {
            last_pty_write: self.get(Activity::PtyWrite),
            last_pty_read: self.get(Activity::PtyRead),
            last_user_keystroke: self.get(Activity::UserKeystroke),
            last_enter_press: self.get(Activity::EnterPress),
        }
    }
}

/// Serializable copy of [`ActivityTimestamps`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub last_pty_write: Option<DateTime<Utc>>,
    pub last_pty_read: Option<DateTime<Utc>>,
    pub last_user_keystroke: Option<DateTime<Utc>>,
    pub last_enter_press: Option<DateTime<Utc>>,
}

// ============================================================================
// Session Handle
// ============================================================================

/// The central session entity.
///
/// Identity fields are immutable. Status and substatus are atomics so the
/// session actor can publish transitions while other tasks read them without
/// taking the supervisor's map lock.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub working_directory: PathBuf,
    pub project_id: Option<ProjectId>,
    pub mode: SessionMode,
    status: AtomicU8,
    substatus: AtomicU8,
    pub activity: ActivityTimestamps,
}

impl SessionHandle {
    /// Creates a handle. Claude sessions start `loading`; shells start `ready`
    /// since nothing is inferred for them.
    pub fn new(
        id: SessionId,
        working_directory: PathBuf,
        project_id: Option<ProjectId>,
        mode: SessionMode,
    ) -> Self {
        let initial = match mode {
            SessionMode::Claude => SessionStatus::Loading,
            SessionMode::Shell => SessionStatus::Ready,
        };
        Self {
            id,
            working_directory,
            project_id,
            mode,
            status: AtomicU8::new(initial.to_u8()),
            substatus: AtomicU8::new(Substatus::encode(None)),
            activity: ActivityTimestamps::default(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn substatus(&self) -> Option<Substatus> {
        Substatus::decode(self.substatus.load(Ordering::Acquire))
    }

    /// Stores a new status. Returns false (and stores nothing) once exited.
    pub fn set_status(&self, status: SessionStatus, substatus: Option<Substatus>) -> bool {
        let result = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if SessionStatus::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(status.to_u8())
                }
            });
        if result.is_err() {
            return false;
        }
        self.substatus
            .store(Substatus::encode(substatus), Ordering::Release);
        true
    }

    /// Marks the session exited. Returns true only for the first call.
    pub fn mark_exited(&self) -> bool {
        let previous = self
            .status
            .swap(SessionStatus::Exited.to_u8(), Ordering::AcqRel);
        self.substatus
            .store(Substatus::encode(None), Ordering::Release);
        !SessionStatus::from_u8(previous).is_terminal()
    }

    pub fn is_exited(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }
}

// ============================================================================
// Claude Context
// ============================================================================

/// Rolling per-session summary used for notifications and tab naming.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaudeContext {
    /// Last human-readable label scraped from the OSC title.
    pub task_name: Option<String>,
    /// Most recent tool seen in a working title.
    pub last_tool: Option<String>,
    /// Tool invocations within the current working phase.
    pub tool_count: u32,
    /// Parsed from a completion marker, e.g. `1m 51s`.
    pub duration: Option<String>,
}

impl ClaudeContext {
    pub fn record_tool(&mut self, tool: &str) {
        self.last_tool = Some(tool.to_string());
        self.tool_count = self.tool_count.saturating_add(1);
    }

    /// Clears per-phase data on `ready`; the task name is kept for reuse.
    pub fn reset_phase(&mut self) {
        self.last_tool = None;
        self.tool_count = 0;
        self.duration = None;
    }
}

// ============================================================================
// Output Frame
// ============================================================================

/// One batched delivery of PTY output. Bytes are passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub session_id: SessionId,
    pub bytes: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(mode: SessionMode) -> SessionHandle {
        SessionHandle::new(SessionId::new(1), PathBuf::from("/tmp"), None, mode)
    }

    #[test]
    fn test_initial_status_by_mode() {
        assert_eq!(handle(SessionMode::Claude).status(), SessionStatus::Loading);
        assert_eq!(handle(SessionMode::Shell).status(), SessionStatus::Ready);
    }

    #[test]
    fn test_status_graph() {
        use SessionStatus::*;
        assert!(Loading.can_transition_to(Working));
        assert!(Working.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Working));
        assert!(Loading.can_transition_to(Exited));
        assert!(!Loading.can_transition_to(Ready));
        assert!(!Exited.can_transition_to(Working));
        assert!(!Exited.can_transition_to(Exited));
    }

    #[test]
    fn test_exited_is_sticky() {
        let h = handle(SessionMode::Claude);
        assert!(h.set_status(SessionStatus::Working, Some(Substatus::Thinking)));
        assert_eq!(h.substatus(), Some(Substatus::Thinking));

        assert!(h.mark_exited());
        assert!(!h.mark_exited());
        assert!(!h.set_status(SessionStatus::Ready, None));
        assert_eq!(h.status(), SessionStatus::Exited);
        assert_eq!(h.substatus(), None);
    }

    #[test]
    fn test_activity_stamps() {
        let h = handle(SessionMode::Shell);
        assert!(h.activity.get(Activity::PtyRead).is_none());

        let now = Utc::now();
        h.activity.stamp(Activity::PtyRead, now);
        let got = h.activity.get(Activity::PtyRead).unwrap();
        assert_eq!(got.timestamp_millis(), now.timestamp_millis());
        assert!(h.activity.snapshot().last_enter_press.is_none());
    }

    #[test]
    fn test_context_reset_keeps_task_name() {
        let mut ctx = ClaudeContext {
            task_name: Some("Refactor parser".to_string()),
            ..Default::default()
        };
        ctx.record_tool("Read");
        ctx.record_tool("Edit");
        ctx.duration = Some("12s".to_string());
        assert_eq!(ctx.tool_count, 2);

        ctx.reset_phase();
        assert_eq!(ctx.tool_count, 0);
        assert!(ctx.last_tool.is_none());
        assert!(ctx.duration.is_none());
        assert_eq!(ctx.task_name.as_deref(), Some("Refactor parser"));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Claude".parse::<SessionMode>().unwrap(), SessionMode::Claude);
        assert_eq!("shell".parse::<SessionMode>().unwrap(), SessionMode::Shell);
        assert!(matches!(
            "zsh".parse::<SessionMode>(),
            Err(DomainError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Ready).unwrap(),
            "\"ready\""
        );
        assert_eq!(
            serde_json::to_string(&Substatus::ToolCalling).unwrap(),
            "\"tool_calling\""
        );
        assert_eq!(serde_json::to_string(&SessionId::new(7)).unwrap(), "7");
    }
}
