//! A live PTY child and its I/O threads.
//!
//! ```text
//!            ┌──────────── reader thread ────────────┐
//! master ───▶│ read(chunk) ─▶ blocking_send (bounded) │──▶ session actor
//!            └────────────────────────────────────────┘
//!            ┌──────────── writer thread ────────────┐
//! master ◀───│ blocking_recv ◀─ write()               │
//!            └────────────────────────────────────────┘
//!            ┌──────────── waiter thread ────────────┐
//! child  ───▶│ wait() ─▶ watch<Option<ExitInfo>>      │
//!            └────────────────────────────────────────┘
//! ```
//!
//! The bounded reader channel is the backpressure point: a slow consumer
//! stalls the reader thread, never drops bytes.
//!
//! # Panic-Free Guarantees
//!
//! Poisoned locks are recovered; thread spawn failures surface as
//! `SupervisorError`.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::SupervisorError;

/// Everything needed to start a child.
#[derive(Debug, Clone)]
pub struct PtySpawnConfig {
    pub shell: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
    pub read_chunk_size: usize,
    pub reader_capacity: usize,
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// `None` when the wait itself failed.
    pub exit_code: Option<u32>,
}

/// Receiving ends handed to the session actor.
#[derive(Debug)]
pub struct ChildStreams {
    pub output: mpsc::Receiver<Vec<u8>>,
    pub exit: watch::Receiver<Option<ExitInfo>>,
}

/// Owner of one OS child process.
pub struct PtyChild {
    pid: Option<u32>,
    shell: String,
    size: Mutex<(u16, u16)>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    input: mpsc::UnboundedSender<Vec<u8>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl std::fmt::Debug for PtyChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyChild")
            .field("pid", &self.pid)
            .field("shell", &self.shell)
            .field("size", &self.size())
            .finish()
    }
}

impl PtyChild {
    /// Opens a PTY, spawns the shell in it and starts the I/O threads.
    ///
    /// # Errors
    ///
    /// `SupervisorError::PtySpawnFailed` if the PTY, the child or a thread
    /// cannot be created. No child is left running in that case.
    pub fn spawn(config: PtySpawnConfig) -> Result<(Self, ChildStreams), SupervisorError> {
        let spawn_failed = |reason: String| SupervisorError::PtySpawnFailed { reason };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_failed(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(&config.shell);
        cmd.args(&config.args);
        cmd.cwd(&config.cwd);
        // CommandBuilder starts from an empty environment.
        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-256color");
        // A nested CLI refuses to start when this is inherited.
        cmd.env_remove("CLAUDECODE");
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_failed(format!("spawn {}: {e}", config.shell)))?;
        // The child holds its own slave fd; ours would keep the PTY open.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = child.kill();
                return Err(spawn_failed(format!("pty io: {e}")));
            }
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let (output_tx, output_rx) = mpsc::channel(config.reader_capacity.max(1));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let tag = pid.map_or_else(|| "?".to_string(), |p| p.to_string());

        let waiter = std::thread::Builder::new()
            .name(format!("deck-pty-wait-{tag}"))
            .spawn(move || {
                let status = child.wait();
                let exit_code = status.as_ref().ok().map(|s| s.exit_code());
                if let Err(e) = &status {
                    warn!(pid = ?pid, error = %e, "Waiting on PTY child failed");
                }
                debug!(pid = ?pid, exit_code = ?exit_code, "PTY child reaped");
                let _ = exit_tx.send(Some(ExitInfo { exit_code }));
            });
        if let Err(e) = waiter {
            // The child moved into the closure; kill it through the killer.
            let mut killer = killer;
            let _ = killer.kill();
            return Err(spawn_failed(format!("waiter thread: {e}")));
        }

        let chunk = config.read_chunk_size.max(1);
        let reader_thread = std::thread::Builder::new()
            .name(format!("deck-pty-read-{tag}"))
            .spawn(move || read_loop(reader, output_tx, chunk, pid));
        let writer_thread = reader_thread.and_then(|_| {
            std::thread::Builder::new()
                .name(format!("deck-pty-write-{tag}"))
                .spawn(move || write_loop(writer, input_rx, pid))
        });
        if let Err(e) = writer_thread {
            let mut killer = killer;
            let _ = killer.kill();
            return Err(spawn_failed(format!("io thread: {e}")));
        }

        info!(pid = ?pid, shell = %config.shell, cwd = %config.cwd.display(), "PTY spawned");

        Ok((
            Self {
                pid,
                shell: config.shell,
                size: Mutex::new((config.cols, config.rows)),
                master: Mutex::new(pair.master),
                input: input_tx,
                killer: Mutex::new(killer),
                exit: exit_rx.clone(),
            },
            ChildStreams {
                output: output_rx,
                exit: exit_rx,
            },
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// `(cols, rows)`.
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Queues bytes for the writer thread. Returns false once it is gone.
    pub fn write(&self, bytes: Vec<u8>) -> bool {
        self.input.send(bytes).is_ok()
    }

    /// # Errors
    ///
    /// `SupervisorError::Io` if the PTY rejects the new size.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SupervisorError> {
        self.master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SupervisorError::Io(format!("resize: {e}")))?;
        *self.size.lock().unwrap_or_else(PoisonError::into_inner) = (cols, rows);
        Ok(())
    }

    /// Terminates the child and its process group, waiting for the reap.
    ///
    /// Unix: SIGHUP + SIGTERM, then SIGKILL after `grace`. Windows:
    /// `taskkill /f /t`. Returns false (after logging) if the child is still
    /// not reaped `reap_wait` after the hard kill.
    pub async fn terminate(&self, grace: Duration, reap_wait: Duration) -> bool {
        if self.has_exited() {
            return true;
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                // Interactive shells ignore SIGTERM but exit on hangup.
                signal_group(pid, libc::SIGHUP);
                signal_group(pid, libc::SIGTERM);
            }
        }
        #[cfg(windows)]
        {
            if let Some(pid) = self.pid {
                taskkill(pid).await;
            }
        }

        if self.wait_exit(grace).await {
            return true;
        }

        warn!(pid = ?self.pid, grace_ms = grace.as_millis() as u64, "Child ignored terminate, killing");
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                signal_group(pid, libc::SIGKILL);
            }
        }
        if let Err(e) = self
            .killer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .kill()
        {
            debug!(pid = ?self.pid, error = %e, "Kill after grace failed");
        }

        if self.wait_exit(reap_wait).await {
            return true;
        }
        error!(pid = ?self.pid, "Shutdown timeout: child not reaped after SIGKILL");
        false
    }

    async fn wait_exit(&self, limit: Duration) -> bool {
        let mut exit = self.exit.clone();
        let exited = matches!(
            timeout(limit, exit.wait_for(Option::is_some)).await,
            Ok(Ok(_))
        );
        exited
    }
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    output: mpsc::Sender<Vec<u8>>,
    chunk: usize,
    pid: Option<u32>,
) {
    let mut buf = vec![0u8; chunk];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let Some(data) = buf.get(..n) else { break };
                // Blocks while the consumer is behind.
                if output.blocking_send(data.to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO once the slave side is gone; treated as EOF.
                debug!(pid = ?pid, error = %e, "PTY read ended");
                break;
            }
        }
    }
    debug!(pid = ?pid, "PTY reader stopped");
}

fn write_loop(
    mut writer: Box<dyn Write + Send>,
    mut input: mpsc::UnboundedReceiver<Vec<u8>>,
    pid: Option<u32>,
) {
    while let Some(bytes) = input.blocking_recv() {
        if let Err(e) = writer.write_all(&bytes).and_then(|()| writer.flush()) {
            warn!(pid = ?pid, error = %e, len = bytes.len(), "PTY write failed, dropping input");
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // The child is a session leader, so its pid is also its group id.
    let group = unsafe { libc::kill(-pid, signal) };
    if group != 0 {
        unsafe { libc::kill(pid, signal) };
    }
}

#[cfg(windows)]
async fn taskkill(pid: u32) {
    let result = tokio::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output()
        .await;
    if let Err(e) = result {
        warn!(pid, error = %e, "taskkill failed");
    }
}
