//! Per-session Claude liveness state machine.
//!
//! Infers `loading → working(thinking | tool_calling) → ready` from three
//! signals: OSC titles, a scan of the visible screen tail, and PTY silence.
//!
//! The machine is pure. Callers feed it inputs stamped with an explicit
//! [`Instant`], ask [`ClaudeStateMachine::next_deadline`] when to wake it,
//! and call [`ClaudeStateMachine::on_deadline`] once that instant passes.
//! Scheduling a ready candidate replaces any pending one (single-slot timer).
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()` or indexing; every input is total.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use deck_core::{
    classify_title, ClaudeContext, ScanOutcome, SessionStatus, Substatus, TitleKind, ToolCatalog,
};

// ============================================================================
// Timings
// ============================================================================

/// Debounces and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Ready delay when the star follows a recent Enter.
    pub post_enter_debounce: Duration,
    /// Ready delay while tools are being called.
    pub post_tool_debounce: Duration,
    /// Ready delay after a thinking phase.
    pub thinking_debounce: Duration,
    /// Ready delay when no substatus is known.
    pub default_debounce: Duration,
    /// Re-check interval while the screen still looks busy.
    pub recheck: Duration,
    /// One-shot early screen check after scheduling.
    pub fast_path: Duration,
    /// No PTY byte for this long counts as silent.
    pub silence: Duration,
    /// `loading` is forced to `ready` after this long.
    pub loading_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            post_enter_debounce: Duration::from_millis(5000),
            post_tool_debounce: Duration::from_millis(4000),
            thinking_debounce: Duration::from_millis(1500),
            default_debounce: Duration::from_millis(2500),
            recheck: Duration::from_millis(1000),
            fast_path: Duration::from_millis(500),
            silence: Duration::from_millis(1000),
            loading_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Why a session became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyReason {
    /// Completion marker in the title or on screen.
    Completed,
    /// A permission prompt is waiting for the user.
    Permission,
    /// Star title followed by PTY silence.
    Silence,
    /// No recognizable title within the loading window.
    LoadingTimeout,
}

impl ReadyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Permission => "permission",
            Self::Silence => "silence",
            Self::LoadingTimeout => "loading_timeout",
        }
    }
}

/// Side effects for the owner to apply and publish, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    Status {
        status: SessionStatus,
        substatus: Option<Substatus>,
        reason: Option<ReadyReason>,
    },
    /// A new human-readable task label.
    Title { task_name: String },
    /// Emitted once per `working → ready` edge, with the phase summary.
    Ready {
        context: ClaudeContext,
        reason: ReadyReason,
    },
    /// First departure from `loading`.
    LoadingDismissed,
}

#[derive(Debug, Clone, Copy)]
struct PendingReady {
    fire_at: Instant,
    fast_path_at: Option<Instant>,
    /// The star title itself carried `for <duration>`.
    definitive: bool,
}

// ============================================================================
// State Machine
// ============================================================================

#[derive(Debug)]
pub struct ClaudeStateMachine {
    timings: Timings,
    tools: ToolCatalog,
    status: SessionStatus,
    substatus: Option<Substatus>,
    context: ClaudeContext,
    pending: Option<PendingReady>,
    loading_deadline: Option<Instant>,
    post_enter_extended: bool,
    last_title: Option<String>,
    last_tool_label: Option<String>,
    last_output: Option<Instant>,
    dismissed: bool,
}

impl ClaudeStateMachine {
    /// Starts in `loading` with the safety timeout armed from `now`.
    pub fn new(timings: Timings, tools: ToolCatalog, now: Instant) -> Self {
        Self {
            timings,
            tools,
            status: SessionStatus::Loading,
            substatus: None,
            context: ClaudeContext::default(),
            pending: None,
            loading_deadline: Some(now + timings.loading_timeout),
            post_enter_extended: false,
            last_title: None,
            last_tool_label: None,
            last_output: None,
            dismissed: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn substatus(&self) -> Option<Substatus> {
        self.substatus
    }

    pub fn context(&self) -> &ClaudeContext {
        &self.context
    }

    pub fn has_pending_ready(&self) -> bool {
        self.pending.is_some()
    }

    /// Earliest instant at which [`Self::on_deadline`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let pending = self
            .pending
            .map(|p| p.fast_path_at.map_or(p.fire_at, |fp| fp.min(p.fire_at)));
        match (self.loading_deadline, pending) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Any PTY output was observed.
    pub fn on_output(&mut self, now: Instant) {
        self.last_output = Some(now);
    }

    /// Bytes the user wrote to the PTY.
    pub fn on_input(&mut self, bytes: &[u8], _now: Instant) -> Vec<MachineEvent> {
        let mut events = Vec::new();
        if self.status.is_terminal() || !bytes.iter().any(|b| *b == b'\r' || *b == b'\n') {
            return events;
        }
        self.post_enter_extended = true;
        self.last_title = None;
        if self.pending.take().is_some() {
            debug!("Enter cancelled pending ready");
        }
        let substatus = match self.status {
            SessionStatus::Working => self.substatus,
            _ => Some(Substatus::Thinking),
        };
        self.set_state(SessionStatus::Working, substatus, None, &mut events);
        events
    }

    /// An OSC title from the PTY stream or the rendering layer.
    pub fn on_title(&mut self, title: &str, now: Instant) -> Vec<MachineEvent> {
        let mut events = Vec::new();
        if self.status.is_terminal() {
            return events;
        }
        if self.last_title.as_deref() == Some(title) {
            return events;
        }
        self.last_title = Some(title.to_string());

        let kind = classify_title(title, &self.tools);
        if !matches!(kind, TitleKind::Other) && self.loading_deadline.take().is_some() {
            debug!(title, "First recognizable title, loading timeout disarmed");
        }
        match &kind {
            TitleKind::Working { tool, label } => {
                if self.pending.take().is_some() {
                    debug!(title, "Working title cancelled pending ready");
                }
                let substatus = match tool {
                    Some(tool) => {
                        if self.last_tool_label.as_deref() != Some(label.as_str()) {
                            self.context.record_tool(tool);
                            self.last_tool_label = Some(label.clone());
                        }
                        Substatus::ToolCalling
                    }
                    None => Substatus::Thinking,
                };
                self.set_state(SessionStatus::Working, Some(substatus), None, &mut events);
                self.update_task_name(kind.task_name(), &mut events);
            }
            TitleKind::Done { duration, .. } => {
                self.context.duration = Some(duration.clone());
                self.schedule_ready(now, true, &mut events);
            }
            TitleKind::ReadyCandidate { .. } => {
                self.update_task_name(kind.task_name(), &mut events);
                self.schedule_ready(now, false, &mut events);
            }
            TitleKind::Other => {}
        }
        events
    }

    /// Handles whatever deadline has passed by `now`.
    ///
    /// `scan` reads the screen tail; it is called at most once.
    pub fn on_deadline<F>(&mut self, now: Instant, scan: F) -> Vec<MachineEvent>
    where
        F: FnOnce() -> ScanOutcome,
    {
        let mut events = Vec::new();
        if self.status.is_terminal() {
            return events;
        }

        // Armed until the first recognizable title, so an Enter typed during
        // loading still ends in ready when the CLI never draws one.
        if self.loading_deadline.is_some_and(|d| d <= now) {
            self.loading_deadline = None;
            match self.status {
                SessionStatus::Loading => {
                    debug!("Loading timeout, forcing ready");
                    self.set_state(SessionStatus::Working, None, None, &mut events);
                    self.become_ready(ReadyReason::LoadingTimeout, None, &mut events);
                    return events;
                }
                SessionStatus::Working => {
                    debug!("Loading timeout without a title, forcing ready");
                    self.become_ready(ReadyReason::LoadingTimeout, None, &mut events);
                    return events;
                }
                _ => {}
            }
        }

        let Some(mut pending) = self.pending else {
            return events;
        };

        if pending.fire_at <= now {
            let outcome = scan();
            self.finalize(now, pending.definitive, outcome, &mut events);
            return events;
        }

        if pending.fast_path_at.is_some_and(|fp| fp <= now) {
            pending.fast_path_at = None;
            self.pending = Some(pending);
            if pending.definitive {
                self.become_ready(ReadyReason::Completed, None, &mut events);
                return events;
            }
            match scan() {
                ScanOutcome::Done { duration } => {
                    self.context.duration = Some(duration);
                    self.become_ready(ReadyReason::Completed, None, &mut events);
                }
                ScanOutcome::Permission => {
                    self.become_ready(ReadyReason::Permission, Some(Substatus::Waiting), &mut events);
                }
                _ => {}
            }
        }
        events
    }

    /// The child exited; nothing further is emitted.
    pub fn mark_exited(&mut self) {
        self.status = SessionStatus::Exited;
        self.substatus = None;
        self.pending = None;
        self.loading_deadline = None;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn schedule_ready(&mut self, now: Instant, definitive: bool, events: &mut Vec<MachineEvent>) {
        match self.status {
            SessionStatus::Ready | SessionStatus::Exited => return,
            SessionStatus::Loading => {
                self.set_state(SessionStatus::Working, None, None, events);
            }
            SessionStatus::Working => {}
        }

        let delay = if std::mem::take(&mut self.post_enter_extended) {
            self.timings.post_enter_debounce
        } else {
            match self.substatus {
                Some(Substatus::ToolCalling) => self.timings.post_tool_debounce,
                Some(Substatus::Thinking) => self.timings.thinking_debounce,
                _ => self.timings.default_debounce,
            }
        };
        debug!(delay_ms = delay.as_millis() as u64, definitive, "Ready candidate scheduled");
        self.pending = Some(PendingReady {
            fire_at: now + delay,
            fast_path_at: Some(now + self.timings.fast_path),
            definitive,
        });
    }

    fn finalize(
        &mut self,
        now: Instant,
        definitive: bool,
        outcome: ScanOutcome,
        events: &mut Vec<MachineEvent>,
    ) {
        match outcome {
            ScanOutcome::Done { duration } => {
                self.context.duration = Some(duration);
                self.become_ready(ReadyReason::Completed, None, events);
            }
            _ if definitive => self.become_ready(ReadyReason::Completed, None, events),
            ScanOutcome::Working => self.recheck(now),
            ScanOutcome::Permission => {
                self.become_ready(ReadyReason::Permission, Some(Substatus::Waiting), events);
            }
            ScanOutcome::ToolResult | ScanOutcome::Nothing => {
                if self.is_silent(now) {
                    self.become_ready(ReadyReason::Silence, None, events);
                } else {
                    self.recheck(now);
                }
            }
        }
    }

    fn recheck(&mut self, now: Instant) {
        self.pending = Some(PendingReady {
            fire_at: now + self.timings.recheck,
            fast_path_at: None,
            definitive: false,
        });
    }

    fn is_silent(&self, now: Instant) -> bool {
        self.last_output
            .map_or(true, |at| now.saturating_duration_since(at) >= self.timings.silence)
    }

    fn become_ready(
        &mut self,
        reason: ReadyReason,
        substatus: Option<Substatus>,
        events: &mut Vec<MachineEvent>,
    ) {
        self.pending = None;
        if self.status != SessionStatus::Working {
            return;
        }
        self.set_state(SessionStatus::Ready, substatus, Some(reason), events);
        events.push(MachineEvent::Ready {
            context: self.context.clone(),
            reason,
        });
        self.context.reset_phase();
        self.last_tool_label = None;
    }

    fn set_state(
        &mut self,
        status: SessionStatus,
        substatus: Option<Substatus>,
        reason: Option<ReadyReason>,
        events: &mut Vec<MachineEvent>,
    ) {
        if self.status == status && self.substatus == substatus {
            return;
        }
        if self.status != status && !self.status.can_transition_to(status) {
            return;
        }
        let leaving_loading = self.status == SessionStatus::Loading;
        self.status = status;
        self.substatus = substatus;
        events.push(MachineEvent::Status {
            status,
            substatus,
            reason,
        });
        if leaving_loading && !self.dismissed {
            self.dismissed = true;
            events.push(MachineEvent::LoadingDismissed);
        }
    }

    fn update_task_name(&mut self, name: Option<&str>, events: &mut Vec<MachineEvent>) {
        let Some(name) = name else { return };
        if self.context.task_name.as_deref() == Some(name) {
            return;
        }
        self.context.task_name = Some(name.to_string());
        events.push(MachineEvent::Title {
            task_name: name.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(now: Instant) -> ClaudeStateMachine {
        ClaudeStateMachine::new(Timings::default(), ToolCatalog::default(), now)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn has_ready(events: &[MachineEvent]) -> bool {
        events.iter().any(|e| matches!(e, MachineEvent::Ready { .. }))
    }

    #[test]
    fn test_braille_title_starts_working_and_dismisses_loading() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        let events = m.on_title("⠋ Refactoring parser", t0);

        assert_eq!(
            events,
            vec![
                MachineEvent::Status {
                    status: SessionStatus::Working,
                    substatus: Some(Substatus::Thinking),
                    reason: None,
                },
                MachineEvent::LoadingDismissed,
                MachineEvent::Title {
                    task_name: "Refactoring parser".to_string()
                },
            ]
        );
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_tool_title_counts_each_new_label_once() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.on_title("⠁ Read src/a.rs", t0);
        m.on_title("⠂ Read src/a.rs", t0);
        m.on_title("⠃ Bash ls", t0);
        assert_eq!(m.substatus(), Some(Substatus::ToolCalling));
        assert_eq!(m.context().tool_count, 2);
        assert_eq!(m.context().last_tool.as_deref(), Some("Bash"));
    }

    #[test]
    fn test_debounce_depends_on_substatus() {
        let t0 = Instant::now();

        let mut thinking = machine(t0);
        thinking.on_title("⠋ Pondering", t0);
        thinking.on_title("✳ Pondering", t0);
        assert_eq!(thinking.next_deadline(), Some(t0 + ms(500)));
        thinking.on_deadline(t0 + ms(500), || ScanOutcome::Nothing);
        assert_eq!(thinking.next_deadline(), Some(t0 + ms(1500)));

        let mut tools = machine(t0);
        tools.on_title("⠋ Grep foo", t0);
        tools.on_title("✳ Claude Code", t0);
        tools.on_deadline(t0 + ms(500), || ScanOutcome::Nothing);
        assert_eq!(tools.next_deadline(), Some(t0 + ms(4000)));
    }

    #[test]
    fn test_star_while_loading_passes_through_working() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.on_title("✳ Claude Code", t0);
        assert_eq!(m.status(), SessionStatus::Working);
        m.on_deadline(t0 + ms(500), || ScanOutcome::Nothing);

        let events = m.on_deadline(t0 + ms(2500), || ScanOutcome::Nothing);
        assert!(has_ready(&events));
        assert_eq!(m.status(), SessionStatus::Ready);
    }

    #[test]
    fn test_permission_fast_path() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.on_title("⠋ Bash rm -rf target", t0);
        m.on_output(t0);
        m.on_title("✳ Claude Code", t0 + ms(100));

        let events = m.on_deadline(t0 + ms(600), || ScanOutcome::Permission);
        assert!(events.contains(&MachineEvent::Status {
            status: SessionStatus::Ready,
            substatus: Some(Substatus::Waiting),
            reason: Some(ReadyReason::Permission),
        }));
        assert!(!m.has_pending_ready());
    }

    #[test]
    fn test_busy_screen_rechecks_until_silent() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.on_title("⠋ Thinking", t0);
        m.on_title("✳ Thinking", t0);
        m.on_deadline(t0 + ms(500), || ScanOutcome::Working);

        let events = m.on_deadline(t0 + ms(1500), || ScanOutcome::Working);
        assert!(events.is_empty());
        assert_eq!(m.next_deadline(), Some(t0 + ms(2500)));

        // Output still flowing: not silent yet.
        m.on_output(t0 + ms(2000));
        let events = m.on_deadline(t0 + ms(2500), || ScanOutcome::ToolResult);
        assert!(events.is_empty());

        let events = m.on_deadline(t0 + ms(3500), || ScanOutcome::Nothing);
        assert!(events.contains(&MachineEvent::Ready {
            context: ClaudeContext {
                task_name: Some("Thinking".to_string()),
                ..ClaudeContext::default()
            },
            reason: ReadyReason::Silence,
        }));
    }

    #[test]
    fn test_definitive_title_is_ready_at_fast_path() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.on_title("⠋ Thinking", t0);
        m.on_title("✳ Brewed for 12s", t0);

        let events = m.on_deadline(t0 + ms(500), || ScanOutcome::Nothing);
        let ready = events.iter().find_map(|e| match e {
            MachineEvent::Ready { context, reason } => Some((context.clone(), *reason)),
            _ => None,
        });
        let (context, reason) = ready.unwrap();
        assert_eq!(context.duration.as_deref(), Some("12s"));
        assert_eq!(reason, ReadyReason::Completed);
        assert_eq!(m.context().duration, None);
    }

    #[test]
    fn test_duplicate_titles_ignored_until_enter() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.on_title("⠋ Thinking", t0);
        m.on_title("✳ Thinking", t0);
        let first = m.next_deadline();

        assert!(m.on_title("✳ Thinking", t0 + ms(200)).is_empty());
        assert_eq!(m.next_deadline(), first);

        m.on_input(b"\r", t0 + ms(300));
        assert!(!m.has_pending_ready());
        m.on_title("✳ Thinking", t0 + ms(400));
        m.on_deadline(t0 + ms(900), || ScanOutcome::Nothing);
        assert_eq!(m.next_deadline(), Some(t0 + ms(5400)));
    }

    #[test]
    fn test_plain_keystrokes_do_not_change_state() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        assert!(m.on_input(b"ls", t0).is_empty());
        assert_eq!(m.status(), SessionStatus::Loading);
    }

    #[test]
    fn test_ready_is_emitted_once_per_edge() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.on_title("⠋ Thinking", t0);
        m.on_title("✳ Done for 3s", t0);
        let events = m.on_deadline(t0 + ms(500), || ScanOutcome::Nothing);
        assert!(has_ready(&events));

        m.on_title("✳ Again", t0 + ms(600));
        assert!(m.on_deadline(t0 + ms(10_000), || ScanOutcome::Nothing).is_empty());
    }

    #[test]
    fn test_loading_timeout() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        assert_eq!(m.next_deadline(), Some(t0 + Duration::from_secs(30)));

        let events = m.on_deadline(t0 + Duration::from_secs(30), || ScanOutcome::Nothing);
        let kinds: Vec<_> = events
            .iter()
            .map(|e| match e {
                MachineEvent::Status { status, .. } => status.as_str(),
                MachineEvent::LoadingDismissed => "dismissed",
                MachineEvent::Ready { .. } => "ready",
                MachineEvent::Title { .. } => "title",
            })
            .collect();
        assert_eq!(kinds, vec!["working", "dismissed", "ready", "ready"]);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_enter_during_loading_keeps_timeout_armed() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.on_input(b"\r", t0 + ms(200));
        assert_eq!(m.status(), SessionStatus::Working);
        assert_eq!(m.next_deadline(), Some(t0 + Duration::from_secs(30)));

        // A title the classifier does not recognize leaves it armed.
        m.on_title("zsh: ~/proj", t0 + ms(300));
        assert_eq!(m.next_deadline(), Some(t0 + Duration::from_secs(30)));

        let events = m.on_deadline(t0 + Duration::from_secs(30), || ScanOutcome::Nothing);
        assert!(events.contains(&MachineEvent::Status {
            status: SessionStatus::Ready,
            substatus: None,
            reason: Some(ReadyReason::LoadingTimeout),
        }));
        assert!(has_ready(&events));
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn test_first_title_after_enter_disarms_timeout() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.on_input(b"\r", t0);
        m.on_title("⠋ Thinking", t0 + ms(100));
        assert_eq!(m.next_deadline(), None);
        assert!(m.on_deadline(t0 + Duration::from_secs(60), || ScanOutcome::Nothing).is_empty());
        assert_eq!(m.status(), SessionStatus::Working);
    }

    #[test]
    fn test_exited_ignores_everything() {
        let t0 = Instant::now();
        let mut m = machine(t0);
        m.mark_exited();
        assert!(m.on_title("⠋ Thinking", t0).is_empty());
        assert!(m.on_input(b"\r", t0).is_empty());
        assert_eq!(m.next_deadline(), None);
        assert_eq!(m.status(), SessionStatus::Exited);
    }
}
