//! Shared fixtures for integration tests.
//!
//! - `ScriptedRuntime`: in-memory `ContainerRuntime` replaying scripted log
//!   lines and recording every call
//! - `ZipProducer`: `BuildProducer` that writes a distribution zip
//! - helpers for compiled-class trees and distribution archives

#![allow(dead_code)]

use async_trait::async_trait;
use brokerlab::{
    BuildProducer, ContainerConfig, ContainerHandle, ContainerRuntime, Error, ExecResult,
    LogStream, Result,
};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// =============================================================================
// Scripted Runtime
// =============================================================================

/// Calls observed by a [`ScriptedRuntime`].
#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub started: Vec<ContainerConfig>,
    pub logs_opened: Vec<Option<DateTime<Utc>>>,
    pub ready_checks: usize,
    pub port_lookups: Vec<u16>,
    pub exec: Vec<Vec<String>>,
    pub stopped: Vec<String>,
}

/// Container runtime that replays a log script.
///
/// The startup script is delivered on streams opened without `since`. Lines
/// registered with [`on_exec`](Self::on_exec) are delivered on streams
/// opened with `since`, after the next `exec` call.
pub struct ScriptedRuntime {
    script: Vec<(Duration, String)>,
    exec_script: Vec<String>,
    close_after_script: bool,
    ready_delay: Duration,
    start_failure: Option<String>,
    exec_exit_code: i32,
    port: u16,
    exec_done: Arc<Notify>,
    calls: Mutex<Calls>,
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self {
            script: Vec::new(),
            exec_script: Vec::new(),
            close_after_script: false,
            ready_delay: Duration::ZERO,
            start_failure: None,
            exec_exit_code: 0,
            port: 49153,
            exec_done: Arc::new(Notify::new()),
            calls: Mutex::new(Calls::default()),
        }
    }
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a startup log line emitted immediately after the previous one.
    pub fn line(self, line: impl Into<String>) -> Self {
        self.line_after(Duration::ZERO, line)
    }

    /// Appends a startup log line emitted `delay` after the previous one.
    pub fn line_after(mut self, delay: Duration, line: impl Into<String>) -> Self {
        self.script.push((delay, line.into()));
        self
    }

    /// Ends the log stream once the script is exhausted.
    pub fn close_after_script(mut self) -> Self {
        self.close_after_script = true;
        self
    }

    /// Delays the ready signal.
    pub fn ready_after(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    /// Makes `start` fail.
    pub fn failing_start(mut self, reason: impl Into<String>) -> Self {
        self.start_failure = Some(reason.into());
        self
    }

    /// Lines emitted on `since` streams after an `exec`.
    pub fn on_exec(mut self, lines: &[&str]) -> Self {
        self.exec_script = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Exit code reported by `exec`.
    pub fn exec_exit_code(mut self, code: i32) -> Self {
        self.exec_exit_code = code;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Snapshot of observed calls.
    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self, config: &ContainerConfig) -> Result<ContainerHandle> {
        self.calls.lock().unwrap().started.push(config.clone());
        if let Some(reason) = &self.start_failure {
            return Err(Error::StartFailed {
                name: config.name.clone(),
                reason: reason.clone(),
            });
        }
        Ok(ContainerHandle::new(format!("id-{}", config.name), config.name.clone()))
    }

    async fn logs(&self, _handle: &ContainerHandle, since: Option<DateTime<Utc>>) -> Result<LogStream> {
        self.calls.lock().unwrap().logs_opened.push(since);
        let (tx, stream) = LogStream::channel(64);

        if since.is_some() {
            let lines = self.exec_script.clone();
            let exec_done = Arc::clone(&self.exec_done);
            tokio::spawn(async move {
                exec_done.notified().await;
                for line in lines {
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
                tx.closed().await;
            });
        } else {
            let script = self.script.clone();
            let close = self.close_after_script;
            tokio::spawn(async move {
                for (delay, line) in script {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
                if !close {
                    tx.closed().await;
                }
            });
        }

        Ok(stream)
    }

    async fn wait_ready(&self, _handle: &ContainerHandle) -> Result<()> {
        self.calls.lock().unwrap().ready_checks += 1;
        if !self.ready_delay.is_zero() {
            tokio::time::sleep(self.ready_delay).await;
        }
        Ok(())
    }

    async fn mapped_port(&self, _handle: &ContainerHandle, container_port: u16) -> Result<u16> {
        self.calls.lock().unwrap().port_lookups.push(container_port);
        Ok(self.port)
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        self.calls.lock().unwrap().stopped.push(handle.id.clone());
        Ok(())
    }

    async fn exec(&self, _handle: &ContainerHandle, command: &[String]) -> Result<ExecResult> {
        self.calls.lock().unwrap().exec.push(command.to_vec());
        self.exec_done.notify_one();
        Ok(ExecResult {
            exit_code: self.exec_exit_code,
            stdout: Vec::new(),
            stderr: if self.exec_exit_code == 0 {
                Vec::new()
            } else {
                b"touch: Read-only file system".to_vec()
            },
        })
    }
}

/// Broker log line for an extension lifecycle transition.
pub fn extension_line(name: &str, phrase: &str) -> String {
    format!(
        "2024-05-02 10:00:01,120 INFO  - Extension \"{}\" version 1.0 {}.",
        name, phrase
    )
}

pub fn started_line(name: &str) -> String {
    extension_line(name, "started successfully")
}

pub fn failed_line(name: &str) -> String {
    format!(
        "2024-05-02 10:00:01,120 ERROR - Extension \"{}\" could not be started: boom",
        name
    )
}

// =============================================================================
// Build Producers
// =============================================================================

/// Producer writing a distribution zip for one extension into
/// `<project>/build/dist/<id>-1.0.zip`.
pub struct ZipProducer {
    pub id: String,
    pub fail: bool,
    pub leave_artifact: bool,
}

impl ZipProducer {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            fail: false,
            leave_artifact: true,
        }
    }
}

impl BuildProducer for ZipProducer {
    fn name(&self) -> &str {
        "zip-producer"
    }

    fn build(&self, project: &Path) -> Result<PathBuf> {
        if self.fail {
            return Err(Error::BuildFailed {
                producer: self.name().to_string(),
                project: project.to_path_buf(),
                reason: "compilation failed".to_string(),
            });
        }
        let out = project.join("build/dist");
        let artifact = out.join(format!("{}-1.0.zip", self.id));
        if self.leave_artifact {
            fs::create_dir_all(&out)?;
            write_zip(
                &artifact,
                &[
                    (format!("{}/hivemq-extension.xml", self.id), b"<hivemq-extension/>".to_vec()),
                    (format!("{}/{}-1.0.jar", self.id, self.id), b"jar".to_vec()),
                ],
            );
        }
        Ok(artifact)
    }
}

// =============================================================================
// Filesystem Helpers
// =============================================================================

/// Writes a zip with the given `(entry, data)` pairs.
pub fn write_zip(path: &Path, entries: &[(String, Vec<u8>)]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(name.as_str(), options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Writes compiled unit files (`com/example/Main.class` style paths).
pub fn write_classes(root: &Path, files: &[&str]) {
    for file in files {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("bytes of {file}")).unwrap();
    }
}

/// Reads entry names of a zip file.
pub fn zip_entries(path: &Path) -> Vec<String> {
    let file = fs::File::open(path).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Reads one entry of a zip file as a string.
pub fn zip_entry_string(path: &Path, entry: &str) -> String {
    use std::io::Read;
    let file = fs::File::open(path).unwrap();
    let mut zip = zip::ZipArchive::new(file).unwrap();
    let mut content = String::new();
    zip.by_name(entry).unwrap().read_to_string(&mut content).unwrap();
    content
}
