//! Bind path derivation and single-instance check.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

/// Overrides the runtime directory (tests, multi-user hosts)
pub const RUNTIME_DIR_ENV: &str = "COURIER_RUNTIME_DIR";

/// Directory holding instance sockets: `$COURIER_RUNTIME_DIR`, then
/// `$XDG_RUNTIME_DIR`, then the system temp dir.
pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(RUNTIME_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// Socket-safe name from the target directory's leaf
pub fn project_name(target_dir: &Path) -> String {
    let leaf = target_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sanitized: String = leaf
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn socket_path_in(runtime_dir: &Path, target_dir: &Path) -> PathBuf {
    runtime_dir.join(format!("courier-{}.sock", project_name(target_dir)))
}

/// Bind path for the instance watching `target_dir`
pub fn socket_path_for(target_dir: &Path) -> PathBuf {
    socket_path_in(&runtime_dir(), target_dir)
}

/// Bind the ingest socket, refusing if a live instance already holds it.
///
/// An existing socket file is only removed after a connection attempt to
/// it fails.
pub async fn bind_listener(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create runtime dir {}", parent.display()))?;
    }

    if path.exists() {
        if UnixStream::connect(path).await.is_ok() {
            bail!(
                "Another instance is already listening on {}",
                path.display()
            );
        }
        warn!(path = %path.display(), "Removing stale socket");
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;

    info!(path = %path.display(), "Ingest socket bound");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name_uses_leaf() {
        assert_eq!(project_name(Path::new("/home/dev/my-app")), "my-app");
        assert_eq!(project_name(Path::new("/home/dev/my app!")), "my-app");
        assert_eq!(project_name(Path::new("/")), "default");
    }

    #[test]
    fn test_distinct_targets_get_distinct_paths() {
        let dir = Path::new("/run/user/1000");
        let a = socket_path_in(dir, Path::new("/work/api"));
        let b = socket_path_in(dir, Path::new("/work/web"));
        assert_eq!(a, PathBuf::from("/run/user/1000/courier-api.sock"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_runtime_dir_env_override() {
        std::env::set_var(RUNTIME_DIR_ENV, "/tmp/courier-test-runtime");
        assert_eq!(runtime_dir(), PathBuf::from("/tmp/courier-test-runtime"));
        std::env::remove_var(RUNTIME_DIR_ENV);
    }

    #[tokio::test]
    async fn test_live_instance_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier-x.sock");

        let _first = bind_listener(&path).await.unwrap();
        let second = bind_listener(&path).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier-x.sock");

        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = bind_listener(&path).await;
        assert!(listener.is_ok());
    }
}
