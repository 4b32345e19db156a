//! Hook ingest worker.
//!
//! The HTTP handler only enqueues raw bodies; a single worker parses,
//! correlates and publishes them, so hooks reach the bus in arrival order.
//!
//! # Panic-Free Guarantees
//!
//! Malformed bodies are logged and dropped. Registry or bus shutdown turns
//! every lookup into a miss.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use deck_core::{HookKind, ProjectId};
use deck_protocol::{BusEvent, BusEventKind, HookEvent, RawHookPayload};

use crate::bus::EventBus;
use crate::registry::RegistryHandle;

use super::alive::{alive_key, AliveSession, AliveSessions};

/// Queued bodies awaiting the worker.
const INGEST_BUFFER: usize = 1024;

enum IngestCommand {
    Body(Vec<u8>),
    Flush(oneshot::Sender<()>),
}

/// Cheap-to-clone handle to the ingest worker.
#[derive(Clone)]
pub struct HookIngestor {
    sender: mpsc::Sender<IngestCommand>,
    alive: Arc<Mutex<AliveSessions>>,
}

impl std::fmt::Debug for HookIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookIngestor")
            .field("alive", &self.alive_sessions().len())
            .finish()
    }
}

/// Starts the ingest worker.
pub fn spawn_ingestor(bus: EventBus, registry: RegistryHandle) -> HookIngestor {
    let (sender, receiver) = mpsc::channel(INGEST_BUFFER);
    let alive = Arc::new(Mutex::new(AliveSessions::default()));

    let worker = IngestWorker {
        receiver,
        bus,
        registry,
        alive: Arc::clone(&alive),
    };
    tokio::spawn(worker.run());

    HookIngestor { sender, alive }
}

impl HookIngestor {
    /// Queues a raw `POST /hook` body. Returns false once the worker is gone.
    pub async fn submit(&self, body: Vec<u8>) -> bool {
        self.sender.send(IngestCommand::Body(body)).await.is_ok()
    }

    /// Waits until every body submitted before this call has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(IngestCommand::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// De-duplicated `session_start` entries not yet ended.
    pub fn alive_sessions(&self) -> Vec<AliveSession> {
        self.alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .list()
    }
}

// ============================================================================
// Worker
// ============================================================================

struct IngestWorker {
    receiver: mpsc::Receiver<IngestCommand>,
    bus: EventBus,
    registry: RegistryHandle,
    alive: Arc<Mutex<AliveSessions>>,
}

impl IngestWorker {
    async fn run(mut self) {
        debug!("Hook ingest worker started");
        while let Some(command) = self.receiver.recv().await {
            match command {
                IngestCommand::Body(body) => self.ingest(&body).await,
                IngestCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Hook ingest worker stopped");
    }

    async fn ingest(&self, body: &[u8]) {
        let event = match RawHookPayload::parse(body).and_then(RawHookPayload::normalize) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, len = body.len(), "Malformed hook payload, dropped");
                return;
            }
        };

        if event.kind.is_ignored() {
            debug!(kind = %event.kind, "Hook kind ignored");
            return;
        }

        let project_id = match &event.raw_cwd {
            Some(cwd) => self.registry.project_by_cwd(cwd.clone()).await,
            None => None,
        };
        self.track_alive(&event, project_id.as_ref());

        let (Some(cwd), Some(project_id)) = (event.raw_cwd.clone(), project_id) else {
            debug!(kind = %event.kind, cwd = ?event.raw_cwd, "Hook has no known project");
            return;
        };
        if !self.registry.has_active_terminal(project_id.clone()).await {
            debug!(
                kind = %event.kind,
                project_id = %project_id,
                "No terminal open for hook project, treating as external"
            );
            return;
        }

        for (kind, payload) in emissions(&event, &project_id) {
            debug!(kind = %kind, project_id = %project_id, "Hook event");
            self.bus
                .publish(BusEvent::hook(kind, cwd.clone(), payload))
                .await;
        }
    }

    fn track_alive(&self, event: &HookEvent, project_id: Option<&ProjectId>) {
        let Some(key) = alive_key(event.session_id.as_deref(), event.raw_cwd.as_deref()) else {
            return;
        };
        let mut alive = self.alive.lock().unwrap_or_else(PoisonError::into_inner);
        match event.kind {
            HookKind::SessionStart => {
                let started = alive.start(AliveSession {
                    key: key.clone(),
                    cwd: event.raw_cwd.clone(),
                    project_id: project_id.cloned(),
                    started_at: event.timestamp,
                });
                if started {
                    info!(key = %key, project_id = ?project_id, "Claude session alive");
                }
            }
            HookKind::SessionEnd => {
                if alive.end(&key) {
                    info!(key = %key, "Claude session ended");
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// Bus events for one correlated hook, in publication order.
pub(crate) fn emissions(event: &HookEvent, project_id: &ProjectId) -> Vec<(BusEventKind, Value)> {
    let stdin = &event.stdin;
    let opt = |v: Option<&str>| v.map_or(Value::Null, |s| Value::String(s.to_string()));
    let tool = opt(event.tool_name.as_deref());

    let mut base = Map::new();
    base.insert("project_id".into(), Value::String(project_id.to_string()));
    base.insert("cwd".into(), opt(event.raw_cwd.as_deref()));
    base.insert("session_id".into(), opt(event.session_id.as_deref()));
    base.insert("hook".into(), Value::String(event.kind.as_str().to_string()));
    base.insert("timestamp".into(), Value::String(event.timestamp.to_rfc3339()));
    base.insert("stdin".into(), event.payload.clone());

    let with = |fields: Vec<(&str, Value)>| {
        let mut payload = base.clone();
        for (key, value) in fields {
            payload.insert(key.to_string(), value);
        }
        Value::Object(payload)
    };

    match event.kind {
        HookKind::SessionStart => vec![(
            BusEventKind::ClaudeSessionStart,
            with(vec![("model", opt(stdin.model_id()))]),
        )],
        HookKind::Stop => vec![(
            BusEventKind::ClaudeSessionEnd,
            with(vec![("reason", Value::String("stop".into()))]),
        )],
        HookKind::SessionEnd => vec![(
            BusEventKind::ClaudeSessionEnd,
            with(vec![("reason", Value::String("end".into()))]),
        )],
        HookKind::PreToolUse => vec![
            (
                BusEventKind::ClaudeToolStart,
                with(vec![("tool_name", tool.clone())]),
            ),
            (BusEventKind::ClaudeWorking, with(vec![("tool_name", tool)])),
        ],
        HookKind::PostToolUse => vec![(BusEventKind::ClaudeToolEnd, with(vec![("tool_name", tool)]))],
        HookKind::PostToolUseFailure => vec![(
            BusEventKind::ClaudeToolError,
            with(vec![
                ("tool_name", tool),
                ("error", opt(stdin.error_text().as_deref())),
            ]),
        )],
        HookKind::UserPromptSubmit => vec![(
            BusEventKind::ClaudePromptSubmit,
            with(vec![("prompt", opt(stdin.prompt.as_deref()))]),
        )],
        HookKind::Notification => vec![(
            BusEventKind::ClaudeNotification,
            with(vec![
                ("title", opt(stdin.title.as_deref())),
                ("message", opt(stdin.message.as_deref())),
            ]),
        )],
        HookKind::PermissionRequest => {
            vec![(BusEventKind::ClaudePermission, with(vec![("tool", tool)]))]
        }
        HookKind::SubagentStart => vec![(
            BusEventKind::ClaudeSubagentStart,
            with(vec![("agent_name", opt(stdin.agent_name()))]),
        )],
        HookKind::SubagentStop => vec![(
            BusEventKind::ClaudeSubagentStop,
            with(vec![("agent_name", opt(stdin.agent_name()))]),
        )],
        HookKind::TaskCompleted => vec![(
            BusEventKind::ClaudeDone,
            with(vec![("message", opt(stdin.message.as_deref()))]),
        )],
        HookKind::PreCompact | HookKind::Setup | HookKind::TeammateIdle => Vec::new(),
    }
}
