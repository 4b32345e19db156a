//! The process supervisor.
//!
//! Owns the session table and exposes the user-facing operations
//! (`create`, `write`, `resize`, `kill`). Each live session is driven by a
//! [`SessionActor`]; the supervisor only routes commands to it.
//!
//! The table uses one `RwLock` for structural changes; per-session status
//! lives in atomics on [`SessionHandle`]. The lock is never held across an
//! await.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use deck_core::{
    normalize, ActivitySnapshot, ProjectId, SessionHandle, SessionId, SessionMode, SessionStatus,
    Substatus,
};
use deck_protocol::CreateRequest;

use crate::session::{SessionActor, SessionCommand, SessionServices};

use super::child::{PtyChild, PtySpawnConfig};
use super::shell::{claude_launch_command, default_shell, default_shell_args};
use super::SupervisorError;

/// Per-session command queue depth.
const COMMAND_BUFFER: usize = 256;

/// Exited sessions remembered so late calls can be told apart from bad ids.
const RETIRED_CAPACITY: usize = 1024;

/// Added to grace + reap wait when bounding a kill during shutdown.
const SHUTDOWN_SLACK: Duration = Duration::from_millis(500);

/// Serializable view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub cwd: String,
    pub project_id: Option<ProjectId>,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub substatus: Option<Substatus>,
    pub activity: ActivitySnapshot,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
}

impl SessionSnapshot {
    fn new(handle: &SessionHandle, pid: Option<u32>, (cols, rows): (u16, u16)) -> Self {
        Self {
            id: handle.id,
            cwd: normalize(handle.working_directory()),
            project_id: handle.project_id.clone(),
            mode: handle.mode,
            status: handle.status(),
            substatus: handle.substatus(),
            activity: handle.activity.snapshot(),
            pid,
            cols,
            rows,
        }
    }
}

// ============================================================================
// Session Table
// ============================================================================

struct LiveSession {
    handle: Arc<SessionHandle>,
    child: Arc<PtyChild>,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    done: CancellationToken,
}

struct RetiredSession {
    handle: Arc<SessionHandle>,
    pid: Option<u32>,
    size: (u16, u16),
}

#[derive(Default)]
struct TableInner {
    live: HashMap<SessionId, LiveSession>,
    retired: HashMap<SessionId, RetiredSession>,
    retired_order: VecDeque<SessionId>,
}

impl TableInner {
    /// Moves a live entry to the retired set and returns it.
    fn retire(&mut self, id: SessionId) -> Option<LiveSession> {
        let live = self.live.remove(&id)?;
        self.retired.insert(
            id,
            RetiredSession {
                handle: Arc::clone(&live.handle),
                pid: live.child.pid(),
                size: live.child.size(),
            },
        );
        self.retired_order.push_back(id);
        while self.retired_order.len() > RETIRED_CAPACITY {
            if let Some(old) = self.retired_order.pop_front() {
                self.retired.remove(&old);
            }
        }
        Some(live)
    }
}

#[derive(Default)]
struct SessionTable {
    inner: RwLock<TableInner>,
}

impl SessionTable {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where a command for `id` should go.
enum Route {
    Live(mpsc::Sender<SessionCommand>, Arc<PtyChild>),
    Retired,
}

// ============================================================================
// Supervisor
// ============================================================================

struct Inner {
    services: SessionServices,
    next_id: AtomicU64,
    table: Arc<SessionTable>,
}

/// Cheap-to-clone supervisor handle.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("live", &self.live_count())
            .finish()
    }
}

impl Supervisor {
    pub fn new(services: SessionServices) -> Self {
        Self {
            inner: Arc::new(Inner {
                services,
                next_id: AtomicU64::new(1),
                table: Arc::new(SessionTable::default()),
            }),
        }
    }

    /// Spawns a shell (and, for Claude sessions, schedules the CLI launch).
    ///
    /// A `cwd` that is not a directory falls back to the home directory.
    ///
    /// # Errors
    ///
    /// `SupervisorError::PtySpawnFailed` if the PTY or child cannot be
    /// created; no session is registered in that case.
    pub async fn create(&self, request: CreateRequest) -> Result<SessionId, SupervisorError> {
        let services = &self.inner.services;
        let config = &services.config;
        let mode = request.mode();
        let cwd = resolve_cwd(&request.cwd);
        let cwd_normalized = normalize(&cwd);

        let project_id = match request.project_id.clone() {
            Some(project_id) => Some(project_id),
            None => services.registry.project_by_cwd(cwd_normalized.clone()).await,
        };

        let id = SessionId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut env = vec![("DECK_SESSION_ID".to_string(), id.to_string())];
        if let Some(project_id) = &project_id {
            env.push(("DECK_PROJECT_ID".to_string(), project_id.to_string()));
        }

        let spawn = PtySpawnConfig {
            shell: config.pty.shell.clone().unwrap_or_else(default_shell),
            args: config
                .pty
                .shell_args
                .clone()
                .unwrap_or_else(default_shell_args),
            cwd: cwd.clone(),
            env,
            cols: config.pty.cols,
            rows: config.pty.rows,
            read_chunk_size: config.pty.read_chunk_size,
            reader_capacity: config.pty.reader_channel_capacity,
        };
        let (child, streams) = PtyChild::spawn(spawn).map_err(|e| {
            warn!(session_id = %id, cwd = %cwd.display(), error = %e, "PTY spawn failed");
            e
        })?;
        let child = Arc::new(child);

        let handle = Arc::new(SessionHandle::new(
            id,
            PathBuf::from(&cwd_normalized),
            project_id.clone(),
            mode,
        ));
        if let Some(project_id) = &project_id {
            services
                .registry
                .terminal_opened(id, project_id.clone())
                .await;
        }

        let launch = mode.is_claude().then(|| {
            claude_launch_command(
                &config.claude.command,
                request.resume_session_id.as_deref(),
                request.skip_permissions,
            )
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();

        let actor = SessionActor::new(
            Arc::clone(&handle),
            Arc::clone(&child),
            streams,
            cmd_rx,
            cancel.clone(),
            services.clone(),
            launch,
        );

        self.inner.table.write().live.insert(
            id,
            LiveSession {
                handle,
                child,
                commands: cmd_tx,
                cancel,
                done: done.clone(),
            },
        );

        let table = Arc::clone(&self.inner.table);
        tokio::spawn(async move {
            let _done = done.drop_guard();
            actor.run().await;
            table.write().retire(id);
        });

        info!(
            session_id = %id,
            mode = %mode,
            cwd = %cwd_normalized,
            project_id = ?project_id,
            "Session created"
        );
        Ok(id)
    }

    /// Writes user input. Writes to an exited session are dropped.
    ///
    /// # Errors
    ///
    /// `SupervisorError::SessionNotFound` for ids never issued (or long gone).
    pub async fn write(&self, id: SessionId, bytes: Vec<u8>) -> Result<(), SupervisorError> {
        match self.route(id)? {
            Route::Live(commands, _) => {
                if commands.send(SessionCommand::Input(bytes)).await.is_err() {
                    debug!(session_id = %id, "Write raced with exit, dropped");
                }
            }
            Route::Retired => debug!(session_id = %id, "Write to exited session dropped"),
        }
        Ok(())
    }

    /// # Errors
    ///
    /// - `SupervisorError::SessionNotFound` for unknown ids
    /// - `SupervisorError::Io` if the PTY rejects the size
    pub async fn resize(&self, id: SessionId, cols: u16, rows: u16) -> Result<(), SupervisorError> {
        match self.route(id)? {
            Route::Live(commands, child) => {
                child.resize(cols, rows)?;
                let _ = commands.send(SessionCommand::Resize { cols, rows }).await;
                debug!(session_id = %id, cols, rows, "Session resized");
            }
            Route::Retired => {}
        }
        Ok(())
    }

    /// Forwards an OSC title seen by the rendering layer.
    ///
    /// # Errors
    ///
    /// `SupervisorError::SessionNotFound` for unknown ids.
    pub async fn report_title(
        &self,
        id: SessionId,
        title: impl Into<String>,
    ) -> Result<(), SupervisorError> {
        if let Route::Live(commands, _) = self.route(id)? {
            let _ = commands.send(SessionCommand::Title(title.into())).await;
        }
        Ok(())
    }

    /// Terminates the session and waits for its teardown. Idempotent.
    ///
    /// # Errors
    ///
    /// `SupervisorError::SessionNotFound` for unknown ids.
    pub async fn kill(&self, id: SessionId) -> Result<(), SupervisorError> {
        let entry = {
            let mut table = self.inner.table.write();
            match table.retire(id) {
                Some(entry) => entry,
                None if table.retired.contains_key(&id) => return Ok(()),
                None => return Err(SupervisorError::SessionNotFound(id)),
            }
        };
        info!(session_id = %id, pid = ?entry.child.pid(), "Killing session");
        entry.cancel.cancel();
        entry.done.cancelled().await;
        Ok(())
    }

    /// Kills every live session concurrently and waits for all reaps.
    ///
    /// Each kill is bounded by the kill grace plus the reap wait; a session
    /// that overruns is logged and left behind.
    pub async fn shutdown(&self) {
        let targets: Vec<(SessionId, Option<u32>)> = self
            .inner
            .table
            .read()
            .live
            .iter()
            .map(|(id, live)| (*id, live.child.pid()))
            .collect();
        if targets.is_empty() {
            return;
        }
        info!(count = targets.len(), "Shutting down sessions");

        let shutdown = &self.inner.services.config.shutdown;
        let limit = shutdown.kill_grace() + shutdown.reap_wait() + SHUTDOWN_SLACK;
        let mut kills = JoinSet::new();
        for (id, pid) in targets {
            let supervisor = self.clone();
            kills.spawn(async move {
                if timeout(limit, supervisor.kill(id)).await.is_err() {
                    error!(session_id = %id, pid = ?pid, "Shutdown timeout: session did not stop");
                }
            });
        }
        while kills.join_next().await.is_some() {}
        info!("All sessions shut down");
    }

    /// Snapshot of a live or recently exited session.
    pub fn session(&self, id: SessionId) -> Option<SessionSnapshot> {
        let table = self.inner.table.read();
        if let Some(live) = table.live.get(&id) {
            return Some(SessionSnapshot::new(
                &live.handle,
                live.child.pid(),
                live.child.size(),
            ));
        }
        table
            .retired
            .get(&id)
            .map(|r| SessionSnapshot::new(&r.handle, r.pid, r.size))
    }

    /// Live sessions, ordered by id.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let table = self.inner.table.read();
        let mut sessions: Vec<SessionSnapshot> = table
            .live
            .values()
            .map(|l| SessionSnapshot::new(&l.handle, l.child.pid(), l.child.size()))
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub fn live_count(&self) -> usize {
        self.inner.table.read().live.len()
    }

    fn route(&self, id: SessionId) -> Result<Route, SupervisorError> {
        let table = self.inner.table.read();
        if let Some(live) = table.live.get(&id) {
            return Ok(Route::Live(live.commands.clone(), Arc::clone(&live.child)));
        }
        if table.retired.contains_key(&id) {
            return Ok(Route::Retired);
        }
        Err(SupervisorError::SessionNotFound(id))
    }
}

/// The requested directory, or home when it is not a directory.
fn resolve_cwd(requested: &str) -> PathBuf {
    let path = PathBuf::from(requested.trim());
    if !requested.trim().is_empty() && path.is_dir() {
        return path;
    }
    let fallback = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    warn!(
        requested,
        fallback = %fallback.display(),
        "Working directory missing, falling back to home"
    );
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_cwd_keeps_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_cwd(dir.path().to_str().unwrap()), dir.path());
    }

    #[test]
    fn test_resolve_cwd_falls_back() {
        let resolved = resolve_cwd("/definitely/not/a/real/dir");
        assert!(resolved.is_dir() || resolved == std::env::temp_dir());
        assert_ne!(resolved, PathBuf::from("/definitely/not/a/real/dir"));

        let empty = resolve_cwd("");
        assert_ne!(empty, PathBuf::from(""));
    }
}
