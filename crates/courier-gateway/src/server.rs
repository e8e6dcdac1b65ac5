//! Hook ingest server: one event per connection over a Unix socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use courier_core::{Engine, HookEvent};
use serde::de::IgnoredAny;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bind::bind_listener;
use crate::types::Ack;

/// Largest payload accepted on one connection
pub const MAX_PAYLOAD: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    /// Only events from this directory or below are ingested
    pub target_dir: Option<PathBuf>,
    /// Time allowed for a client to deliver its payload
    pub read_timeout: Duration,
}

impl ServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            target_dir: None,
            read_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = Some(dir.into());
        self
    }
}

/// Events without a working directory are always accepted
pub fn accepts_directory(target: Option<&Path>, event_dir: Option<&Path>) -> bool {
    match (target, event_dir) {
        (Some(target), Some(dir)) => dir.starts_with(target),
        _ => true,
    }
}

pub struct IngestServer {
    listener: UnixListener,
    config: ServerConfig,
    engine: Engine,
}

impl IngestServer {
    /// Bind the socket; fails if another live instance holds it
    pub async fn bind(config: ServerConfig, engine: Engine) -> Result<Self> {
        let listener = bind_listener(&config.socket_path).await?;
        Ok(Self {
            listener,
            config,
            engine,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Accept connections until `shutdown` fires. On return the listener is
    /// closed and in-flight connections have been answered.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let connections = TaskTracker::new();
        info!(
            socket = %self.config.socket_path.display(),
            target_dir = ?self.config.target_dir,
            "Ingest server listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let engine = self.engine.clone();
                        let config = self.config.clone();
                        connections.spawn(async move {
                            handle_connection(stream, &engine, &config).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                }
            }
        }

        drop(self.listener);
        if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
            debug!(error = %e, "Socket file already gone");
        }
        info!(in_flight = connections.len(), "Ingest server stopped accepting");

        connections.close();
        if tokio::time::timeout(self.config.read_timeout, connections.wait())
            .await
            .is_err()
        {
            warn!("Connections still open after read timeout");
        }
        Ok(())
    }
}

async fn handle_connection(mut stream: UnixStream, engine: &Engine, config: &ServerConfig) {
    let payload = match read_payload(&mut stream, config.read_timeout).await {
        Ok(payload) => payload,
        Err(e) => {
            debug!(error = %e, "Dropping connection");
            return;
        }
    };

    let event = match HookEvent::parse(&payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, bytes = payload.len(), "Dropping malformed hook payload");
            return;
        }
    };

    if accepts_directory(config.target_dir.as_deref(), event.working_directory()) {
        engine.ingest(event);
    } else {
        debug!(
            session_id = %event.session_id,
            cwd = ?event.working_directory(),
            "Ignoring event from another directory"
        );
    }

    if let Err(e) = stream.write_all(&Ack::proceed().to_bytes()).await {
        debug!(error = %e, "Client went away before ack");
        return;
    }
    let _ = stream.shutdown().await;
}

/// Read until the client half-closes or a complete JSON value has arrived
async fn read_payload(stream: &mut UnixStream, timeout: Duration) -> Result<Vec<u8>> {
    let read = async {
        let mut payload = Vec::with_capacity(4096);
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).await.context("Read failed")?;
            if n == 0 {
                break;
            }
            payload.extend_from_slice(&chunk[..n]);
            if payload.len() > MAX_PAYLOAD {
                bail!("Payload exceeds {} bytes", MAX_PAYLOAD);
            }
            if serde_json::from_slice::<IgnoredAny>(&payload).is_ok() {
                break;
            }
        }
        Ok::<_, anyhow::Error>(payload)
    };

    let payload = tokio::time::timeout(timeout, read)
        .await
        .context("Timed out waiting for payload")??;
    if payload.is_empty() {
        bail!("Empty payload");
    }
    Ok(payload)
}
