//! Log-based extension readiness.
//!
//! The broker logs one line per extension lifecycle transition, for example:
//!
//! ```text
//! 2024-05-02 10:00:01,120 INFO  - Extension "Gradle Extension" version 1.0 started successfully.
//! ```
//!
//! [`ReadinessWatcher`] scans such lines for a set of awaited extension
//! names. A name is confirmed by a line containing both the `started`
//! phrase and the name; a line with the `failed` phrase and the name fails
//! the wait immediately. Matching is by substring because lines carry
//! timestamps and prefixes.
//!
//! ## Name matching
//!
//! The broker quotes extension names, so [`NameMatch::Quoted`] looks for
//! `"<name>"`. This keeps `Ext` from being confirmed by a line about `Ext2`.
//! [`NameMatch::Substring`] matches the bare name for brokers that do not
//! quote.

use crate::constants::{FAILED_MARKER, STARTED_MARKER, STOPPED_MARKER};
use crate::error::{Error, Result};
use crate::runtime::LogStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// How extension names are located in a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameMatch {
    /// Name must appear in double quotes.
    #[default]
    Quoted,
    /// Name may appear anywhere.
    Substring,
}

/// Marker phrases recognised in broker logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMarkers {
    /// Phrase of a successful start.
    pub started: String,
    /// Phrase of a failed start.
    pub failed: String,
    /// Phrase of a stop.
    pub stopped: String,
    /// Name matching mode.
    pub name_match: NameMatch,
}

impl Default for LogMarkers {
    fn default() -> Self {
        Self {
            started: STARTED_MARKER.to_string(),
            failed: FAILED_MARKER.to_string(),
            stopped: STOPPED_MARKER.to_string(),
            name_match: NameMatch::default(),
        }
    }
}

/// Lifecycle transition recognised in a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Started,
    Failed,
    Stopped,
}

impl LogMarkers {
    /// Returns true if `line` mentions extension `name`.
    pub fn mentions(&self, line: &str, name: &str) -> bool {
        match self.name_match {
            NameMatch::Quoted => line.contains(&format!("\"{name}\"")),
            NameMatch::Substring => line.contains(name),
        }
    }

    /// Classifies `line` with respect to extension `name`.
    ///
    /// Failure takes precedence when a line carries several phrases.
    pub fn classify(&self, line: &str, name: &str) -> Option<Marker> {
        if !self.mentions(line, name) {
            return None;
        }
        if line.contains(&self.failed) {
            Some(Marker::Failed)
        } else if line.contains(&self.started) {
            Some(Marker::Started)
        } else if line.contains(&self.stopped) {
            Some(Marker::Stopped)
        } else {
            None
        }
    }
}

/// Outcome of feeding one line to a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// At least one name is still unconfirmed.
    Pending,
    /// Every awaited name is confirmed.
    Complete,
}

/// Per-name confirmation tracker over a log stream.
#[derive(Debug, Clone)]
pub struct ReadinessWatcher {
    markers: LogMarkers,
    expect: Marker,
    /// Awaited names in registration order with their confirmation flag.
    awaited: Vec<(String, bool)>,
}

impl ReadinessWatcher {
    /// Creates a watcher awaiting a start marker for every name.
    ///
    /// Duplicate names are tracked once.
    pub fn new(markers: LogMarkers, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::expecting(markers, Marker::Started, names)
    }

    /// Creates a watcher awaiting `expect` for every name.
    pub fn expecting(
        markers: LogMarkers,
        expect: Marker,
        names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut awaited: Vec<(String, bool)> = Vec::new();
        for name in names {
            let name = name.into();
            if !awaited.iter().any(|(n, _)| *n == name) {
                awaited.push((name, false));
            }
        }
        Self {
            markers,
            expect,
            awaited,
        }
    }

    /// Returns true once every name is confirmed (trivially for no names).
    pub fn is_complete(&self) -> bool {
        self.awaited.iter().all(|(_, confirmed)| *confirmed)
    }

    /// Names not confirmed yet, in registration order.
    pub fn unconfirmed(&self) -> Vec<String> {
        self.awaited
            .iter()
            .filter(|(_, confirmed)| !confirmed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Feeds one log line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExtensionStartFailed`] on a failure marker for an
    /// awaited name.
    pub fn observe(&mut self, line: &str) -> Result<Progress> {
        for (name, confirmed) in &mut self.awaited {
            match self.markers.classify(line, name) {
                Some(Marker::Failed) => {
                    return Err(Error::ExtensionStartFailed {
                        name: name.clone(),
                        line: line.trim().to_string(),
                    });
                }
                Some(marker) if marker == self.expect && !*confirmed => {
                    info!(extension = %name, "Extension confirmed");
                    *confirmed = true;
                }
                _ => {}
            }
        }

        if self.is_complete() {
            Ok(Progress::Complete)
        } else {
            Ok(Progress::Pending)
        }
    }

    /// Scans `logs` until every name is confirmed or `deadline` passes.
    ///
    /// Returns immediately, without reading, when nothing is awaited.
    ///
    /// # Errors
    ///
    /// - [`Error::StartupTimeout`] when the deadline passes first
    /// - [`Error::ExtensionStartFailed`] on a failure marker
    /// - [`Error::LogStreamClosed`] if the stream ends first
    pub async fn watch(&mut self, logs: &mut LogStream, deadline: Instant) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }

        let timeout = deadline.saturating_duration_since(Instant::now());
        debug!(awaiting = ?self.unconfirmed(), ?timeout, "Scanning broker log");

        loop {
            match tokio::time::timeout_at(deadline, logs.next_line()).await {
                Ok(Some(line)) => {
                    debug!(target: "brokerlab::broker", "{}", line.trim_end());
                    if self.observe(&line)? == Progress::Complete {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    return Err(Error::LogStreamClosed {
                        unconfirmed: self.unconfirmed(),
                    });
                }
                Err(_) => {
                    return Err(Error::StartupTimeout {
                        unconfirmed: self.unconfirmed(),
                        timeout: round_timeout(timeout),
                    });
                }
            }
        }
    }
}

/// Drops sub-millisecond noise from a reported timeout.
fn round_timeout(timeout: Duration) -> Duration {
    Duration::from_millis(timeout.as_millis() as u64)
}
