use crate::config::Config;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

/// What the agent always sees on stdout, whatever happened to the event
pub const CONTINUE: &str = r#"{"continue": true}"#;

/// Upper bound on the whole delivery, connect to acknowledgment
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// A hook record ready to send, plus the working directory it names
#[derive(Debug)]
pub struct PreparedRecord {
    pub payload: Vec<u8>,
    pub working_directory: Option<PathBuf>,
}

/// Stamp a timestamp on the record if it has none
pub fn prepare_record(input: &[u8], now: DateTime<Utc>) -> Result<PreparedRecord> {
    let mut record: Value = serde_json::from_slice(input).context("Hook input is not JSON")?;
    let fields = record
        .as_object_mut()
        .context("Hook input is not a JSON object")?;

    fields
        .entry("timestamp")
        .or_insert_with(|| json!(now.to_rfc3339()));

    let working_directory = ["cwd", "working_directory"]
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
        .map(PathBuf::from);

    Ok(PreparedRecord {
        payload: serde_json::to_vec(&record)?,
        working_directory,
    })
}

/// Socket of the relay watching `dir` or its nearest watched ancestor.
///
/// Falls back to the socket named after `dir` itself when none exists.
pub fn resolve_socket(config: &Config, dir: &Path) -> PathBuf {
    dir.ancestors()
        .map(|ancestor| config.socket_path(ancestor))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| config.socket_path(dir))
}

/// Write the payload, half-close, and read the acknowledgment
pub async fn deliver(socket: &Path, payload: &[u8]) -> Result<Vec<u8>> {
    let mut stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("No relay listening at {:?}", socket))?;
    stream.write_all(payload).await.context("Write failed")?;
    stream.shutdown().await.context("Half-close failed")?;

    let mut ack = Vec::new();
    stream
        .read_to_end(&mut ack)
        .await
        .context("Reading acknowledgment failed")?;
    Ok(ack)
}

async fn forward(config: &Config, socket: Option<PathBuf>) -> Result<()> {
    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .context("Failed to read stdin")?;

    let record = prepare_record(&input, Utc::now())?;
    let socket = match socket {
        Some(socket) => socket,
        None => {
            let dir = match record.working_directory {
                Some(dir) => dir,
                None => std::env::current_dir().context("Failed to read current directory")?,
            };
            resolve_socket(config, &dir)
        }
    };

    let ack = tokio::time::timeout(DELIVERY_TIMEOUT, deliver(&socket, &record.payload))
        .await
        .context("Timed out waiting for relay")??;
    debug!(socket = %socket.display(), ack = %String::from_utf8_lossy(&ack), "Hook delivered");
    Ok(())
}

/// Forward stdin to the relay; never fails and never blocks the agent
pub async fn execute(config: &Config, socket: Option<PathBuf>) -> Result<()> {
    if let Err(e) = forward(config, socket).await {
        warn!(error = %e, "Hook not delivered");
    }
    println!("{}", CONTINUE);
    Ok(())
}
