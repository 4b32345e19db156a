//! Loopback HTTP listener for Claude Code hook handler scripts.
//!
//! Binds `127.0.0.1:0`, publishes the port in `<app-data>/hooks/port` and
//! accepts only `POST /hook`. Every accepted body is answered `200 ok`
//! immediately; parsing happens on the ingest worker.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ingest::HookIngestor;

#[derive(Debug, Error)]
pub enum HookServerError {
    #[error("failed to bind hook listener: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to write hook port file {path:?}: {source}")]
    PortFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `<app-data>/hooks/port`.
pub fn port_file_path(app_data_dir: &Path) -> PathBuf {
    app_data_dir.join("hooks").join("port")
}

/// Reads the published port, if a listener is (or was) running.
pub fn read_port_file(app_data_dir: &Path) -> Option<u16> {
    std::fs::read_to_string(port_file_path(app_data_dir))
        .ok()
        .and_then(|text| text.trim().parse().ok())
}

/// A running hook listener.
#[derive(Debug)]
pub struct HookServer {
    addr: SocketAddr,
    port_file: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HookServer {
    /// Binds the listener, writes the port file and starts serving.
    ///
    /// The server stops when `cancel` fires or [`HookServer::stop`] is called.
    ///
    /// # Errors
    ///
    /// - `HookServerError::Bind` if the loopback socket cannot be bound
    /// - `HookServerError::PortFile` if the port file cannot be written
    pub async fn start(
        app_data_dir: &Path,
        ingestor: HookIngestor,
        cancel: CancellationToken,
    ) -> Result<Self, HookServerError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(HookServerError::Bind)?;
        let addr = listener.local_addr().map_err(HookServerError::Bind)?;

        let port_file = port_file_path(app_data_dir);
        write_port_file(&port_file, addr.port()).map_err(|source| HookServerError::PortFile {
            path: port_file.clone(),
            source,
        })?;

        let app = Router::new()
            .route("/hook", post(receive_hook).fallback(not_found))
            .fallback(not_found)
            .with_state(ingestor);

        let cancel = cancel.child_token();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "Hook listener failed");
            }
        });

        info!(port = addr.port(), port_file = %port_file.display(), "Hook listener started");
        Ok(Self {
            addr,
            port_file,
            cancel,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port_file(&self) -> &Path {
        &self.port_file
    }

    /// Stops accepting, lets in-flight requests finish and removes the
    /// port file.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Hook listener task ended abnormally");
        }
        match std::fs::remove_file(&self.port_file) {
            Ok(()) => debug!(port_file = %self.port_file.display(), "Port file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, port_file = %self.port_file.display(), "Failed to remove port file"),
        }
        info!(port = self.addr.port(), "Hook listener stopped");
    }
}

async fn receive_hook(State(ingestor): State<HookIngestor>, body: Bytes) -> &'static str {
    if !ingestor.submit(body.to_vec()).await {
        warn!(len = body.len(), "Hook ingest worker gone, body dropped");
    }
    "ok"
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Writes through a temp file so readers never see a partial port.
fn write_port_file(path: &Path, port: u16) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, port.to_string())?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_port_file(dir.path()), None);

        let path = port_file_path(dir.path());
        write_port_file(&path, 45123).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "45123");
        assert_eq!(read_port_file(dir.path()), Some(45123));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_port_file_location() {
        assert_eq!(
            port_file_path(Path::new("/home/u/.deck")),
            PathBuf::from("/home/u/.deck/hooks/port")
        );
    }
}
