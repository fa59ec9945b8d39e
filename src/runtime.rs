//! Container runtime trait - the capability the broker controller consumes.
//!
//! The harness does not implement a container engine. It drives one through
//! this trait:
//! - `start`: Create and start a container from a [`ContainerConfig`]
//! - `logs`: Follow the combined stdout/stderr stream, optionally from a
//!   point in time
//! - `wait_ready`: Block until the runtime considers the container ready
//! - `mapped_port`: Resolve the host port for an exposed container port
//! - `stop`: Stop and remove the container
//!
//! # Lifecycle
//!
//! ```text
//! start(config) → [logs(h, since)] → wait_ready(h) → mapped_port(h, p) → stop(h)
//! ```

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

// =============================================================================
// Container Configuration
// =============================================================================

/// Host path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    /// Absolute host path.
    pub host_path: PathBuf,
    /// Absolute path inside the container.
    pub container_path: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl Mount {
    /// Creates a read-write mount.
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// Creates a read-only mount.
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::new(host_path, container_path)
        }
    }
}

/// Everything a runtime needs to start one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    /// Container name (unique per runtime).
    pub name: String,
    /// Image reference (`repo:tag`).
    pub image: String,
    /// Host mounts.
    pub mounts: Vec<Mount>,
    /// Container ports to publish on random host ports.
    pub exposed_ports: Vec<u16>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Log phrase that must appear before the container counts as ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_log_phrase: Option<String>,
}

// =============================================================================
// Container Handle
// =============================================================================

/// Handle to a started container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerHandle {
    /// Runtime-assigned container id.
    pub id: String,
    /// Container name from the config.
    pub name: String,
    /// When the runtime reported the container started.
    pub started_at: DateTime<Utc>,
}

impl ContainerHandle {
    /// Creates a handle stamped with the current time.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            started_at: Utc::now(),
        }
    }
}

// =============================================================================
// Log Stream
// =============================================================================

/// Line-oriented container log stream.
///
/// Backed by a bounded channel; the producer side ends the stream by
/// dropping its sender (e.g. when the container exits).
#[derive(Debug)]
pub struct LogStream {
    rx: mpsc::Receiver<String>,
}

impl LogStream {
    /// Wraps a receiver of log lines.
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Creates a connected sender/stream pair.
    pub fn channel(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Waits for the next line; `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

// =============================================================================
// Exec Result
// =============================================================================

/// Result of command execution inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code of the command.
    pub exit_code: i32,
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
}

impl ExecResult {
    /// Creates a successful result.
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

// =============================================================================
// Container Runtime Trait
// =============================================================================

/// Container engine capability consumed by
/// [`BrokerContainer`](crate::container::BrokerContainer).
///
/// # Implementations
///
/// - [`DockerCliRuntime`](crate::runtimes::DockerCliRuntime): the `docker` CLI
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the runtime name.
    fn name(&self) -> &str;

    /// Creates and starts a container.
    ///
    /// Exposed ports are published on runtime-chosen host ports; mounts are
    /// bound before the container process starts.
    async fn start(&self, config: &ContainerConfig) -> Result<ContainerHandle>;

    /// Follows the container's combined log output.
    ///
    /// With `since` set, only lines logged at or after that instant are
    /// delivered; otherwise the stream starts at the container's first line.
    async fn logs(
        &self,
        handle: &ContainerHandle,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogStream>;

    /// Waits until the container process is up (and, if configured, its
    /// ready phrase was logged). Unbounded; callers apply the deadline.
    async fn wait_ready(&self, handle: &ContainerHandle) -> Result<()>;

    /// Returns the host port mapped to `container_port`.
    async fn mapped_port(&self, handle: &ContainerHandle, container_port: u16) -> Result<u16>;

    /// Stops and removes the container.
    async fn stop(&self, handle: &ContainerHandle) -> Result<()>;

    // =========================================================================
    // Optional Operations
    // =========================================================================

    /// Executes a command in the running container.
    ///
    /// This is an optional operation - not all runtimes support it.
    async fn exec(&self, handle: &ContainerHandle, command: &[String]) -> Result<ExecResult> {
        let _ = (handle, command);
        Err(crate::error::Error::NotSupported(format!(
            "exec not supported by {} runtime",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_stream_ends_when_sender_dropped() {
        let (tx, mut logs) = LogStream::channel(4);
        tx.send("one".to_string()).await.unwrap();
        drop(tx);
        assert_eq!(logs.next_line().await.as_deref(), Some("one"));
        assert_eq!(logs.next_line().await, None);
    }

    #[test]
    fn test_mount_constructors() {
        let rw = Mount::new("/host", "/container");
        assert!(!rw.read_only);
        let ro = Mount::read_only("/host", "/container");
        assert!(ro.read_only);
        assert_eq!(ro.container_path, "/container");
    }
}
