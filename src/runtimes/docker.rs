//! # Docker CLI Runtime
//!
//! Implements [`ContainerRuntime`] by shelling out to the `docker` CLI. No
//! daemon API client is linked; every operation is one CLI invocation:
//!
//! | Operation     | Command                                          |
//! |---------------|--------------------------------------------------|
//! | `start`       | `docker run -d --name N -p P -v H:C[:ro] -e K=V` |
//! | `logs`        | `docker logs -f [--since T] ID` (stdout + stderr)|
//! | `wait_ready`  | `docker inspect -f {{.State.Status}} ID`         |
//! | `mapped_port` | `docker port ID P/tcp`                           |
//! | `exec`        | `docker exec ID CMD...`                          |
//! | `stop`        | `docker rm -f -v ID`                             |
//!
//! ## Readiness
//!
//! A container is ready once its state is `running` and, when the config
//! carries a `ready_log_phrase`, that phrase appears in its logs. Probes are
//! spaced by [`READY_POLL_INTERVAL`]; the caller applies the deadline.
//!
//! ## Example
//!
//! ```rust,ignore
//! use brokerlab::runtimes::DockerCliRuntime;
//!
//! let runtime = DockerCliRuntime::new();
//! if let Err(e) = runtime.check_available() {
//!     eprintln!("docker: {e}");
//! }
//! ```

use crate::constants::{LOG_CHANNEL_CAPACITY, READY_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::runtime::{ContainerConfig, ContainerHandle, ContainerRuntime, ExecResult, LogStream};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::RwLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

// =============================================================================
// Docker CLI Constants
// =============================================================================

/// Default CLI binary, resolved through `PATH`.
const DOCKER_BINARY: &str = "docker";

/// Timeout for short CLI calls (inspect, port, rm, exec).
const DOCKER_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for `docker run`, which may pull the image first.
const DOCKER_RUN_TIMEOUT: Duration = Duration::from_secs(600);

/// Maximum command output size to capture (1 MiB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Per-container settings remembered between calls.
#[derive(Debug, Clone)]
struct ContainerInfo {
    ready_log_phrase: Option<String>,
}

// =============================================================================
// DockerCliRuntime
// =============================================================================

/// Container runtime backed by the `docker` command-line client.
///
/// Thread-safe; container bookkeeping sits behind an internal `RwLock`.
#[derive(Debug)]
pub struct DockerCliRuntime {
    binary: PathBuf,
    containers: RwLock<HashMap<String, ContainerInfo>>,
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCliRuntime {
    /// Creates a runtime using `docker` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary(DOCKER_BINARY)
    }

    /// Creates a runtime using a specific CLI binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            containers: RwLock::new(HashMap::new()),
        }
    }

    /// Checks that the CLI is installed and its daemon answers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeUnavailable`] with the CLI's complaint.
    pub fn check_available(&self) -> Result<()> {
        let output = std::process::Command::new(&self.binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .map_err(|e| self.unavailable(format!("{} not found: {}", self.binary.display(), e)))?;

        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            info!(version = %version.trim(), "Docker daemon available");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(self.unavailable(stderr.trim().to_string()))
        }
    }

    /// Returns true if [`check_available`](Self::check_available) succeeds.
    pub fn is_available(&self) -> bool {
        self.check_available().is_ok()
    }

    fn unavailable(&self, reason: String) -> Error {
        Error::RuntimeUnavailable {
            runtime: self.name().to_string(),
            reason,
        }
    }

    /// Runs one CLI command to completion.
    async fn docker(&self, args: &[String], limit: Duration) -> Result<Output> {
        debug!("docker command: {} {}", self.binary.display(), args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut output = timeout(limit, cmd.output())
            .await
            .map_err(|_| Error::CommandFailed {
                command: command_line(args),
                reason: format!("timed out after {:?}", limit),
            })?
            .map_err(|e| self.unavailable(format!("failed to run {}: {}", self.binary.display(), e)))?;

        if output.stdout.len() > MAX_OUTPUT_SIZE {
            output.stdout.truncate(MAX_OUTPUT_SIZE);
            warn!("docker stdout truncated to {} bytes", MAX_OUTPUT_SIZE);
        }
        if output.stderr.len() > MAX_OUTPUT_SIZE {
            output.stderr.truncate(MAX_OUTPUT_SIZE);
            warn!("docker stderr truncated to {} bytes", MAX_OUTPUT_SIZE);
        }
        Ok(output)
    }

    /// Runs a CLI command and returns its trimmed stdout, failing on a
    /// non-zero exit.
    async fn docker_ok(&self, args: &[String], limit: Duration) -> Result<String> {
        let output = self.docker(args, limit).await?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: command_line(args),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn ready_log_phrase(&self, id: &str) -> Option<String> {
        self.containers
            .read()
            .ok()
            .and_then(|c| c.get(id).and_then(|info| info.ready_log_phrase.clone()))
    }

    /// Builds the `docker run` argument list.
    fn run_args(config: &ContainerConfig) -> Result<Vec<String>> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            config.name.clone(),
        ];

        for port in &config.exposed_ports {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        for mount in &config.mounts {
            let host = std::fs::canonicalize(&mount.host_path).map_err(|e| Error::StartFailed {
                name: config.name.clone(),
                reason: format!("mount source {}: {}", mount.host_path.display(), e),
            })?;
            let mut spec = format!("{}:{}", host.display(), mount.container_path);
            if mount.read_only {
                spec.push_str(":ro");
            }
            args.push("-v".to_string());
            args.push(spec);
        }

        for (key, value) in &config.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(config.image.clone());
        Ok(args)
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn start(&self, config: &ContainerConfig) -> Result<ContainerHandle> {
        let args = Self::run_args(config)?;
        let id = self
            .docker_ok(&args, DOCKER_RUN_TIMEOUT)
            .await
            .map_err(|e| Error::StartFailed {
                name: config.name.clone(),
                reason: e.to_string(),
            })?;

        if let Ok(mut containers) = self.containers.write() {
            containers.insert(
                id.clone(),
                ContainerInfo {
                    ready_log_phrase: config.ready_log_phrase.clone(),
                },
            );
        }

        info!(container = %config.name, id = %id, image = %config.image, "Container started");
        Ok(ContainerHandle::new(id, config.name.clone()))
    }

    async fn logs(
        &self,
        handle: &ContainerHandle,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogStream> {
        let mut args = vec!["logs".to_string(), "-f".to_string()];
        if let Some(since) = since {
            args.push("--since".to_string());
            args.push(since.to_rfc3339_opts(SecondsFormat::Nanos, true));
        }
        args.push(handle.id.clone());

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.unavailable(format!("failed to run docker logs: {}", e)))?;

        let (tx, stream) = LogStream::channel(LOG_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }

        // Keep the follower alive until the container exits or the
        // consumer drops the stream.
        let id = handle.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    debug!(id = %id, ?status, "Log follower exited");
                }
                _ = tx.closed() => {
                    let _ = child.kill().await;
                    debug!(id = %id, "Log stream dropped, follower killed");
                }
            }
        });

        Ok(stream)
    }

    async fn wait_ready(&self, handle: &ContainerHandle) -> Result<()> {
        let phrase = self.ready_log_phrase(&handle.id);
        let inspect = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Status}}".to_string(),
            handle.id.clone(),
        ];
        let logs = vec!["logs".to_string(), handle.id.clone()];

        loop {
            let status = self.docker_ok(&inspect, DOCKER_COMMAND_TIMEOUT).await?;
            match status.as_str() {
                "running" => {
                    let Some(phrase) = &phrase else {
                        return Ok(());
                    };
                    let output = self.docker(&logs, DOCKER_COMMAND_TIMEOUT).await?;
                    if contains_phrase(&output.stdout, phrase) || contains_phrase(&output.stderr, phrase) {
                        debug!(id = %handle.id, "Ready phrase found");
                        return Ok(());
                    }
                }
                "exited" | "dead" => {
                    return Err(Error::StartFailed {
                        name: handle.name.clone(),
                        reason: format!("container is {}", status),
                    });
                }
                _ => {}
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn mapped_port(&self, handle: &ContainerHandle, container_port: u16) -> Result<u16> {
        let args = vec![
            "port".to_string(),
            handle.id.clone(),
            format!("{container_port}/tcp"),
        ];
        let stdout = self.docker_ok(&args, DOCKER_COMMAND_TIMEOUT).await?;
        parse_port_output(&stdout).ok_or_else(|| Error::CommandFailed {
            command: command_line(&args),
            reason: format!("no host port in output: {:?}", stdout),
        })
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        let args = vec![
            "rm".to_string(),
            "-f".to_string(),
            "-v".to_string(),
            handle.id.clone(),
        ];
        let output = self.docker(&args, DOCKER_COMMAND_TIMEOUT).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Ok(mut containers) = self.containers.write() {
            containers.remove(&handle.id);
        }

        if output.status.success() || stderr.contains("No such container") {
            info!(container = %handle.name, id = %handle.id, "Container removed");
            Ok(())
        } else {
            Err(Error::CommandFailed {
                command: command_line(&args),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn exec(&self, handle: &ContainerHandle, command: &[String]) -> Result<ExecResult> {
        let mut args = vec!["exec".to_string(), handle.id.clone()];
        args.extend(command.iter().cloned());
        let output = self.docker(&args, DOCKER_COMMAND_TIMEOUT).await?;
        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Forwards lines from a child pipe until EOF or the stream is dropped.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

fn contains_phrase(output: &[u8], phrase: &str) -> bool {
    String::from_utf8_lossy(output).contains(phrase)
}

fn command_line(args: &[String]) -> String {
    format!("docker {}", args.join(" "))
}

/// Parses `docker port` output (`0.0.0.0:49153`, `[::]:49153`).
fn parse_port_output(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit(':').next())
        .find_map(|port| port.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Mount;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_port_output() {
        assert_eq!(parse_port_output("0.0.0.0:49153\n[::]:49153\n"), Some(49153));
        assert_eq!(parse_port_output("[::]:32768"), Some(32768));
        assert_eq!(parse_port_output(""), None);
        assert_eq!(parse_port_output("garbage"), None);
    }

    #[test]
    fn test_run_args() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut env = BTreeMap::new();
        env.insert("HIVEMQ_LOG_LEVEL".to_string(), "DEBUG".to_string());
        let config = ContainerConfig {
            name: "broker-1".to_string(),
            image: "hivemq/hivemq-ce:latest".to_string(),
            mounts: vec![Mount::read_only(dir.path(), "/opt/hivemq/extensions/ext")],
            exposed_ports: vec![1883],
            env,
            ready_log_phrase: None,
        };

        let args = DockerCliRuntime::run_args(&config).unwrap();
        let host = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(&args[..4], &["run", "-d", "--name", "broker-1"]);
        assert!(args.windows(2).any(|w| w == ["-p", "1883"]));
        assert!(args.contains(&format!("{}:/opt/hivemq/extensions/ext:ro", host.display())));
        assert!(args.windows(2).any(|w| w == ["-e", "HIVEMQ_LOG_LEVEL=DEBUG"]));
        assert_eq!(args.last().map(String::as_str), Some("hivemq/hivemq-ce:latest"));
    }

    #[test]
    fn test_run_args_missing_mount_source() {
        let config = ContainerConfig {
            name: "broker-1".to_string(),
            image: "img".to_string(),
            mounts: vec![Mount::new("/definitely/not/here", "/x")],
            ..ContainerConfig::default()
        };
        let err = DockerCliRuntime::run_args(&config).unwrap_err();
        assert!(matches!(err, Error::StartFailed { .. }));
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let runtime = DockerCliRuntime::with_binary("/nonexistent/docker-cli");
        let err = runtime.check_available().unwrap_err();
        assert!(matches!(err, Error::RuntimeUnavailable { .. }));
        assert!(!runtime.is_available());
    }
}
