//! Per-session actor.
//!
//! One task per PTY owns everything that must stay in FIFO order for that
//! session: the output batcher, the screen mirror, the OSC extractor and the
//! Claude state machine. It is the only publisher of the session's bus
//! events.
//!
//! ```text
//!  reader thread ──chunks──▶ ┌──────────────┐ ──pty.data──────▶
//!  Supervisor   ──commands─▶ │ SessionActor │ ──session.*─────▶ EventBus
//!  waiter thread ──exit────▶ └──────────────┘ ──project.*─────▶
//! ```
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`/`.expect()`; every channel closure is a state change.
//!
//! # Cancellation
//!
//! A publish waits while the bus is full, so every publish made inside the
//! run loop also watches the cancel token. A stalled subscriber can delay a
//! session's events but never its kill. Teardown events are published
//! against the reap-wait deadline and dropped past it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use deck_core::{
    Activity, OscTitleExtractor, OutputFrame, ScanOutcome, SessionHandle, SessionId,
    SessionStatus,
};
use deck_protocol::{BusEvent, BusEventKind};

use crate::bus::EventBus;
use crate::claude::{ClaudeStateMachine, MachineEvent};
use crate::config::CoreConfig;
use crate::pty::{ChildStreams, ExitInfo, PtyChild};
use crate::registry::RegistryHandle;
use crate::throttle::Throttles;

use super::batcher::OutputBatcher;
use super::screen::ScreenMirror;

/// Messages from the supervisor.
#[derive(Debug)]
pub enum SessionCommand {
    /// User keystrokes.
    Input(Vec<u8>),
    /// A title forwarded by the rendering layer.
    Title(String),
    Resize { cols: u16, rows: u16 },
}

/// Shared services a session publishes through.
#[derive(Clone)]
pub struct SessionServices {
    pub bus: EventBus,
    pub registry: RegistryHandle,
    pub throttles: Arc<Throttles>,
    pub config: Arc<CoreConfig>,
}

enum Ending {
    Exited(Option<u32>),
    Killed,
    /// Output closed and the child never exited on its own.
    HungUp,
}

pub struct SessionActor {
    handle: Arc<SessionHandle>,
    child: Arc<PtyChild>,
    output: mpsc::Receiver<Vec<u8>>,
    output_open: bool,
    exit: watch::Receiver<Option<ExitInfo>>,
    commands: mpsc::Receiver<SessionCommand>,
    cancel: CancellationToken,
    services: SessionServices,
    batcher: OutputBatcher,
    screen: Option<ScreenMirror>,
    osc: Option<OscTitleExtractor>,
    machine: Option<ClaudeStateMachine>,
    launch: Option<(Instant, String)>,
    eof_deadline: Option<Instant>,
}

impl SessionActor {
    /// `launch` is the CLI line to type once the shell is up.
    pub fn new(
        handle: Arc<SessionHandle>,
        child: Arc<PtyChild>,
        streams: ChildStreams,
        commands: mpsc::Receiver<SessionCommand>,
        cancel: CancellationToken,
        services: SessionServices,
        launch: Option<String>,
    ) -> Self {
        let config = Arc::clone(&services.config);
        let now = Instant::now();
        let claude = handle.mode.is_claude();
        let (cols, rows) = child.size();

        Self {
            handle,
            child,
            output: streams.output,
            output_open: true,
            exit: streams.exit,
            commands,
            cancel,
            batcher: OutputBatcher::new(config.pty.batch_interval()),
            screen: claude.then(|| ScreenMirror::new(cols, rows)),
            osc: (claude && config.claude.extract_titles).then(OscTitleExtractor::new),
            machine: claude.then(|| {
                ClaudeStateMachine::new(
                    config.claude.timings.to_timings(),
                    config.claude.tool_catalog(),
                    now,
                )
            }),
            launch: launch.map(|line| (now + config.claude.launch_delay(), line)),
            eof_deadline: None,
            services,
        }
    }

    fn id(&self) -> SessionId {
        self.handle.id
    }

    /// Runs until the child exits or the session is cancelled.
    pub async fn run(mut self) {
        let id = self.id();
        info!(session_id = %id, mode = %self.handle.mode, "Session actor starting");
        let max_frame = self.services.config.pty.max_frame_bytes.max(1);

        let ending = loop {
            let flush_at = self.batcher.deadline();
            let machine_at = self.machine.as_ref().and_then(ClaudeStateMachine::next_deadline);
            let launch_at = self.launch.as_ref().map(|(at, _)| *at);
            let eof_at = self.eof_deadline;
            // A full frame stops pulling reads; the reader thread then blocks.
            let can_read = self.output_open && self.batcher.len() < max_frame;

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break Ending::Killed,

                changed = self.exit.changed() => {
                    let info = match changed {
                        Ok(()) => *self.exit.borrow_and_update(),
                        Err(_) => Some(ExitInfo { exit_code: None }),
                    };
                    if let Some(info) = info {
                        break Ending::Exited(info.exit_code);
                    }
                }

                chunk = self.output.recv(), if can_read => match chunk {
                    Some(bytes) => self.on_output(bytes).await,
                    None => {
                        debug!(session_id = %id, "PTY output closed");
                        self.output_open = false;
                        self.eof_deadline =
                            Some(Instant::now() + self.services.config.shutdown.kill_grace());
                    }
                },

                Some(cmd) = self.commands.recv() => self.handle_command(cmd).await,

                _ = sleep_until_opt(flush_at) => self.flush().await,

                _ = sleep_until_opt(machine_at) => self.on_machine_deadline().await,

                _ = sleep_until_opt(launch_at) => self.send_launch(),

                _ = sleep_until_opt(eof_at) => break Ending::HungUp,
            }
        };

        match ending {
            Ending::Exited(exit_code) => {
                self.drain_after_exit().await;
                self.flush().await;
                self.finish("exited", exit_code).await;
            }
            Ending::Killed => {
                self.batcher.cancel();
                let shutdown = &self.services.config.shutdown;
                self.child
                    .terminate(shutdown.kill_grace(), shutdown.reap_wait())
                    .await;
                let exit_code = self.exit.borrow().and_then(|e| e.exit_code);
                self.finish("killed", exit_code).await;
            }
            Ending::HungUp => {
                self.flush().await;
                let shutdown = &self.services.config.shutdown;
                self.child
                    .terminate(shutdown.kill_grace(), shutdown.reap_wait())
                    .await;
                let exit_code = self.exit.borrow().and_then(|e| e.exit_code);
                self.finish("hangup", exit_code).await;
            }
        }
        info!(session_id = %id, "Session actor stopped");
    }

    // ========================================================================
    // Output
    // ========================================================================

    async fn on_output(&mut self, bytes: Vec<u8>) {
        let now = Instant::now();
        self.batcher.push(&bytes, now);
        if let Some(screen) = self.screen.as_mut() {
            screen.process(&bytes);
        }
        if let Some(machine) = self.machine.as_mut() {
            machine.on_output(now);
        }
        let titles = self
            .osc
            .as_mut()
            .map(|osc| osc.feed(&bytes))
            .unwrap_or_default();
        for title in titles {
            self.apply_title(&title, now).await;
        }
    }

    async fn flush(&mut self) {
        let Some(bytes) = self.batcher.take() else {
            return;
        };
        let received_at = Utc::now();
        self.handle.activity.stamp(Activity::PtyRead, received_at);
        let frame = OutputFrame {
            session_id: self.id(),
            bytes,
            received_at,
        };
        if !self.publish(BusEvent::frame(frame)).await {
            return;
        }

        if let Some(project) = &self.handle.project_id {
            if self.services.throttles.output.allow(project, Instant::now()) {
                let event = BusEvent::activity(BusEventKind::OutputActivity, self.id(), project);
                self.publish(event).await;
            }
        }
    }

    /// Publishes unless the session is cancelled first.
    ///
    /// Returns false when the event was dropped.
    async fn publish(&self, event: BusEvent) -> bool {
        tokio::select! {
            biased;

            _ = self.services.bus.publish(event) => true,
            _ = self.cancel.cancelled() => {
                debug!(session_id = %self.id(), "Publish abandoned, session cancelled");
                false
            }
        }
    }

    /// Pulls whatever the child wrote before exiting, bounded by the drain
    /// window.
    async fn drain_after_exit(&mut self) {
        let deadline = Instant::now() + self.services.config.shutdown.exit_drain();
        let max_frame = self.services.config.pty.max_frame_bytes.max(1);
        while self.output_open {
            match timeout_at(deadline, self.output.recv()).await {
                Ok(Some(bytes)) => {
                    self.on_output(bytes).await;
                    if self.batcher.len() >= max_frame {
                        self.flush().await;
                    }
                }
                Ok(None) => self.output_open = false,
                Err(_) => break,
            }
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Input(bytes) => self.on_input(bytes).await,
            SessionCommand::Title(title) => self.apply_title(&title, Instant::now()).await,
            SessionCommand::Resize { cols, rows } => {
                if let Some(screen) = self.screen.as_mut() {
                    screen.resize(cols, rows);
                }
            }
        }
    }

    async fn on_input(&mut self, bytes: Vec<u8>) {
        if self.handle.is_exited() {
            debug!(session_id = %self.id(), "Input after exit dropped");
            return;
        }
        let at = Utc::now();
        let activity = &self.handle.activity;
        activity.stamp(Activity::PtyWrite, at);
        activity.stamp(Activity::UserKeystroke, at);
        if bytes.iter().any(|b| *b == b'\r' || *b == b'\n') {
            activity.stamp(Activity::EnterPress, at);
        }

        let events = match self.machine.as_mut() {
            Some(machine) => machine.on_input(&bytes, Instant::now()),
            None => Vec::new(),
        };
        if !self.child.write(bytes) {
            warn!(session_id = %self.id(), "Write to dead child dropped");
        }
        self.apply_events(events).await;

        if let Some(project) = &self.handle.project_id {
            if self.services.throttles.user.allow(project, Instant::now()) {
                let event = BusEvent::activity(BusEventKind::UserActivity, self.id(), project);
                self.publish(event).await;
            }
        }
    }

    fn send_launch(&mut self) {
        let Some((_, line)) = self.launch.take() else {
            return;
        };
        debug!(session_id = %self.id(), "Launching Claude CLI");
        self.handle.activity.stamp(Activity::PtyWrite, Utc::now());
        if !self.child.write(line.into_bytes()) {
            warn!(session_id = %self.id(), "Launch command dropped, child gone");
        }
    }

    // ========================================================================
    // State machine
    // ========================================================================

    async fn apply_title(&mut self, title: &str, now: Instant) {
        let events = match self.machine.as_mut() {
            Some(machine) => machine.on_title(title, now),
            None => return,
        };
        self.apply_events(events).await;
    }

    async fn on_machine_deadline(&mut self) {
        let now = Instant::now();
        let screen = &self.screen;
        let events = match self.machine.as_mut() {
            Some(machine) => machine.on_deadline(now, || {
                screen.as_ref().map_or(ScanOutcome::Nothing, ScreenMirror::scan)
            }),
            None => return,
        };
        self.apply_events(events).await;
    }

    async fn apply_events(&mut self, events: Vec<MachineEvent>) {
        let id = self.id();
        for event in events {
            let bus_event = match event {
                MachineEvent::Status {
                    status,
                    substatus,
                    reason,
                } => {
                    if !self.handle.set_status(status, substatus) {
                        continue;
                    }
                    debug!(session_id = %id, status = %status, substatus = ?substatus, "Session status");
                    BusEvent::status(id, status, substatus, reason.map(|r| r.as_str()))
                }
                MachineEvent::Title { task_name } => BusEvent::title(id, &task_name),
                MachineEvent::Ready { context, reason } => {
                    info!(
                        session_id = %id,
                        reason = reason.as_str(),
                        tool_count = context.tool_count,
                        "Session ready"
                    );
                    BusEvent::ready(id, &context, reason.as_str())
                }
                MachineEvent::LoadingDismissed => BusEvent::loading_dismissed(id),
            };
            if !self.publish(bus_event).await {
                return;
            }
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    async fn finish(&mut self, reason: &str, exit_code: Option<u32>) {
        let id = self.id();
        if let Some(machine) = self.machine.as_mut() {
            machine.mark_exited();
        }
        if self.handle.mark_exited() {
            info!(session_id = %id, reason, exit_code = ?exit_code, "Session exited");
            let deadline = Instant::now() + self.services.config.shutdown.reap_wait();
            let bus = &self.services.bus;
            let published = async {
                bus.publish(BusEvent::status(id, SessionStatus::Exited, None, Some(reason)))
                    .await;
                bus.publish(BusEvent::pty_exit(id, exit_code)).await;
            };
            if timeout_at(deadline, published).await.is_err() {
                warn!(session_id = %id, "Bus stalled, exit events dropped");
            }
        }
        if self.handle.project_id.is_some() {
            self.services.registry.terminal_closed(id).await;
        }
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
