//! # Broker Container Controller
//!
//! [`BrokerContainer`] owns one containerized broker instance. Extensions are
//! mounted before start; `start()` blocks until the container is ready and
//! every awaited extension has logged its start marker.
//!
//! ## Lifecycle
//!
//! ```text
//!   with_extension / wait_for_extension / with_env ...
//!        │
//!   ┌────▼────┐  config   ┌─────────────┐  start()  ┌──────────┐
//!   │ Created ├──────────►│ Configuring ├──────────►│ Starting │
//!   └────┬────┘           └─────────────┘           └────┬─────┘
//!        │ start()                                       │
//!        └──────────────────────────────────────────────►│
//!                                  all confirmed ┌───────┴───────┐ timeout,
//!                                    ┌───────────┘               └──────┐ failure marker
//!                               ┌────▼────┐                        ┌────▼───┐
//!                               │ Running │                        │ Failed │
//!                               └────┬────┘                        └────┬───┘
//!                                    │ stop()                           │ stop()
//!                                    └────────────►┌─────────┐◄─────────┘
//!                                                  │ Stopped │
//!                                                  └─────────┘
//! ```
//!
//! A failed start keeps the container allocated so its logs can be
//! inspected; the caller releases it with `stop()`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use brokerlab::{BrokerContainer, DockerCliRuntime, ExtensionPackager};
//! use std::sync::Arc;
//!
//! let packager = ExtensionPackager::new()?;
//! let extension = packager.package_project(project, &CommandBuildProducer::gradle())?;
//!
//! let mut broker = BrokerContainer::new(Arc::new(DockerCliRuntime::new()));
//! broker
//!     .with_extension(extension)?
//!     .wait_for_extension("Gradle Extension")?;
//! let port = broker.start().await?;
//! // ... connect an MQTT client to localhost:port ...
//! broker.stop().await?;
//! ```

use crate::constants::{
    BROKER_READY_MARKER, CONTAINER_EXTENSIONS_ROOT, DEFAULT_IMAGE, DEFAULT_IMAGE_TAG,
    DEFAULT_STARTUP_TIMEOUT, DISABLED_MARKER_FILE, IMAGE_ENV, LOG_LEVEL_ENV, MQTT_PORT,
    STARTUP_TIMEOUT_ENV,
};
use crate::error::{Error, Phase, Result};
use crate::extension::ExtensionDescriptor;
use crate::package::PackagedExtension;
use crate::readiness::{LogMarkers, Marker, ReadinessWatcher};
use crate::runtime::{ContainerConfig, ContainerHandle, ContainerRuntime, Mount};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

// =============================================================================
// Broker Configuration
// =============================================================================

/// Broker image, ports, markers and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Image repository.
    pub image: String,
    /// Image tag.
    pub tag: String,
    /// Bound on `start()`, covering container readiness and all awaited
    /// extensions.
    pub startup_timeout: Duration,
    /// Readiness marker phrases.
    pub markers: LogMarkers,
    /// MQTT port inside the container.
    pub mqtt_port: u16,
    /// Extensions root inside the container.
    pub extensions_root: String,
    /// Log phrase the runtime waits for before the container counts as up.
    pub ready_log_phrase: Option<String>,
    /// Base environment for the broker process.
    pub env: BTreeMap<String, String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            tag: DEFAULT_IMAGE_TAG.to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            markers: LogMarkers::default(),
            mqtt_port: MQTT_PORT,
            extensions_root: CONTAINER_EXTENSIONS_ROOT.to_string(),
            ready_log_phrase: Some(BROKER_READY_MARKER.to_string()),
            env: BTreeMap::new(),
        }
    }
}

impl BrokerConfig {
    /// Defaults overridden from the process environment.
    ///
    /// Honors `BROKERLAB_IMAGE` (`repo` or `repo:tag`) and
    /// `BROKERLAB_STARTUP_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary variable lookup.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(image) = lookup(IMAGE_ENV).filter(|v| !v.trim().is_empty()) {
            let (repo, tag) = split_image_ref(image.trim());
            config.image = repo.to_string();
            if let Some(tag) = tag {
                config.tag = tag.to_string();
            }
        }

        if let Some(raw) = lookup(STARTUP_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.startup_timeout = Duration::from_secs(secs),
                _ => warn!(key = STARTUP_TIMEOUT_ENV, value = %raw, "Ignoring invalid startup timeout"),
            }
        }

        config
    }

    /// Full image reference (`repo:tag`).
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Splits `repo[:tag]`, leaving registry ports (`host:5000/repo`) intact.
fn split_image_ref(image: &str) -> (&str, Option<&str>) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') && !repo.is_empty() && !tag.is_empty() => {
            (repo, Some(tag))
        }
        _ => (image, None),
    }
}

// =============================================================================
// Broker State
// =============================================================================

/// Lifecycle state of a [`BrokerContainer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerState {
    /// Fresh controller, nothing configured.
    Created,
    /// Mounts or waits registered, not started.
    Configuring,
    /// `start()` in progress.
    Starting,
    /// Container ready and all awaited extensions confirmed.
    Running,
    /// Start failed; the container may still be allocated.
    Failed,
    /// Container released.
    Stopped,
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Configuring => "configuring",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Broker Container
// =============================================================================

/// Controller for one broker container.
pub struct BrokerContainer {
    runtime: Arc<dyn ContainerRuntime>,
    config: BrokerConfig,
    name: String,
    extensions: Vec<PackagedExtension>,
    file_mounts: Vec<Mount>,
    env: BTreeMap<String, String>,
    waits: Vec<String>,
    state: BrokerState,
    handle: Option<ContainerHandle>,
    mqtt_port: Option<u16>,
}

impl fmt::Debug for BrokerContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerContainer")
            .field("runtime", &self.runtime.name())
            .field("name", &self.name)
            .field("state", &self.state)
            .field("extensions", &self.extensions.len())
            .field("waits", &self.waits)
            .field("handle", &self.handle)
            .finish()
    }
}

impl BrokerContainer {
    /// Creates a controller with configuration from the environment.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_config(runtime, BrokerConfig::from_env())
    }

    /// Creates a controller with an explicit configuration.
    pub fn with_config(runtime: Arc<dyn ContainerRuntime>, config: BrokerConfig) -> Self {
        Self {
            runtime,
            config,
            name: format!("brokerlab-{}", Uuid::now_v7().simple()),
            extensions: Vec::new(),
            file_mounts: Vec::new(),
            env: BTreeMap::new(),
            waits: Vec::new(),
            state: BrokerState::Created,
            handle: None,
            mqtt_port: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Container name passed to the runtime.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BrokerState {
        self.state
    }

    /// Effective configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Handle of the started container, kept after a failed start.
    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    /// Mounted extensions in registration order.
    pub fn extensions(&self) -> &[PackagedExtension] {
        &self.extensions
    }

    /// Awaited extension names in registration order.
    pub fn awaited_extensions(&self) -> &[String] {
        &self.waits
    }

    /// Host port mapped to the broker's MQTT port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the broker is running.
    pub fn mqtt_port(&self) -> Result<u16> {
        match (self.state, self.mqtt_port) {
            (BrokerState::Running, Some(port)) => Ok(port),
            _ => Err(self.invalid_state("query the MQTT port")),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Mounts a packaged extension under the extensions root.
    pub fn with_extension(&mut self, extension: PackagedExtension) -> Result<&mut Self> {
        self.configure("mount an extension")?;
        debug!(extension = %extension.id(), path = %extension.host_path().display(), "Extension mounted");
        self.extensions.push(extension);
        Ok(self)
    }

    /// Requires a start marker for `name` before `start()` returns.
    pub fn wait_for_extension(&mut self, name: impl Into<String>) -> Result<&mut Self> {
        self.configure("wait for an extension")?;
        self.waits.push(name.into());
        Ok(self)
    }

    /// Requires a start marker for the descriptor's name.
    pub fn wait_for_descriptor(&mut self, descriptor: &ExtensionDescriptor) -> Result<&mut Self> {
        self.wait_for_extension(descriptor.name())
    }

    /// Mounts an arbitrary host file or directory.
    pub fn with_file_mount(
        &mut self,
        host_path: impl Into<PathBuf>,
        container_path: impl Into<String>,
        read_only: bool,
    ) -> Result<&mut Self> {
        self.configure("mount a file")?;
        let mut mount = Mount::new(host_path, container_path);
        mount.read_only = read_only;
        self.file_mounts.push(mount);
        Ok(self)
    }

    /// Sets an environment variable for the broker process.
    pub fn with_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<&mut Self> {
        self.configure("set the environment")?;
        self.env.insert(key.into(), value.into());
        Ok(self)
    }

    /// Sets the broker's root log level.
    pub fn with_log_level(&mut self, level: impl Into<String>) -> Result<&mut Self> {
        self.with_env(LOG_LEVEL_ENV, level)
    }

    /// Overrides the startup timeout.
    pub fn with_startup_timeout(&mut self, timeout: Duration) -> Result<&mut Self> {
        self.configure("change the startup timeout")?;
        self.config.startup_timeout = timeout;
        Ok(self)
    }

    fn configure(&mut self, operation: &str) -> Result<()> {
        match self.state {
            BrokerState::Created | BrokerState::Configuring => {
                self.state = BrokerState::Configuring;
                Ok(())
            }
            state => Err(Error::AlreadyStarted {
                operation: operation.to_string(),
                state: state.to_string(),
            }),
        }
    }

    fn invalid_state(&self, operation: &str) -> Error {
        Error::InvalidState {
            operation: operation.to_string(),
            state: self.state.to_string(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts the broker and blocks until it is ready.
    ///
    /// Returns the host port mapped to the broker's MQTT port.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if already started
    /// - [`Error::DuplicateMount`] if two extensions share an id
    /// - [`Error::StartupTimeout`] if the deadline passes first
    /// - [`Error::ExtensionStartFailed`] on a failure marker
    /// - [`Error::Runtime`] wrapping runtime errors with their phase
    #[instrument(skip(self), fields(container = %self.name))]
    pub async fn start(&mut self) -> Result<u16> {
        if !matches!(self.state, BrokerState::Created | BrokerState::Configuring) {
            return Err(self.invalid_state("start"));
        }

        let mut ids = HashSet::new();
        for extension in &self.extensions {
            if !ids.insert(extension.id()) {
                return Err(Error::DuplicateMount(extension.id().to_string()));
            }
        }

        let config = self.container_config()?;

        info!(
            image = %config.image,
            extensions = self.extensions.len(),
            waits = ?self.waits,
            timeout = ?self.config.startup_timeout,
            "Starting broker"
        );
        self.state = BrokerState::Starting;

        match self.launch(&config).await {
            Ok(port) => {
                self.mqtt_port = Some(port);
                self.state = BrokerState::Running;
                info!(mqtt_port = port, "Broker running");
                Ok(port)
            }
            Err(e) => {
                self.state = BrokerState::Failed;
                error!(error = %e, "Broker start failed");
                Err(e)
            }
        }
    }

    /// Builds the runtime config, checking that every mount source exists.
    fn container_config(&self) -> Result<ContainerConfig> {
        let mut mounts: Vec<Mount> = self
            .extensions
            .iter()
            .map(|e| Mount::new(e.host_path(), e.container_path(&self.config.extensions_root)))
            .collect();
        mounts.extend(self.file_mounts.iter().cloned());

        for mount in &mounts {
            if !mount.host_path.exists() {
                return Err(Error::ArtifactMissing {
                    path: mount.host_path.clone(),
                }
                .in_phase(Phase::Mount));
            }
        }

        let mut env = self.config.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok(ContainerConfig {
            name: self.name.clone(),
            image: self.config.image_ref(),
            mounts,
            exposed_ports: vec![self.config.mqtt_port],
            env,
            ready_log_phrase: self.config.ready_log_phrase.clone(),
        })
    }

    async fn launch(&mut self, config: &ContainerConfig) -> Result<u16> {
        let handle = self
            .runtime
            .start(config)
            .await
            .map_err(|e| e.in_phase(Phase::Start))?;
        self.handle = Some(handle.clone());

        let timeout = self.config.startup_timeout;
        let deadline = Instant::now() + timeout;

        // Zero waits means no log inspection at all.
        let mut logs = if self.waits.is_empty() {
            None
        } else {
            Some(
                self.runtime
                    .logs(&handle, None)
                    .await
                    .map_err(|e| e.in_phase(Phase::LogScan))?,
            )
        };

        let mut watcher = ReadinessWatcher::new(self.config.markers.clone(), self.waits.iter().cloned());
        let awaited = watcher.unconfirmed();
        let runtime = &self.runtime;

        // The ready signal and the log scan run side by side under one
        // deadline; a failure marker ends start without waiting for ready.
        let ready = async {
            match tokio::time::timeout_at(deadline, runtime.wait_ready(&handle)).await {
                Ok(ready) => ready.map_err(|e| e.in_phase(Phase::Start)),
                Err(_) => Err(Error::StartupTimeout {
                    unconfirmed: awaited,
                    timeout,
                }),
            }
        };
        let scan = async {
            match logs.as_mut() {
                Some(logs) => watcher
                    .watch(logs, deadline)
                    .await
                    .map_err(|e| with_total_timeout(e, timeout)),
                None => Ok(()),
            }
        };
        tokio::try_join!(ready, scan)?;
        debug!(id = %handle.id, "Container ready");

        self.runtime
            .mapped_port(&handle, self.config.mqtt_port)
            .await
            .map_err(|e| e.in_phase(Phase::PortLookup))
    }

    /// Stops and removes the container.
    ///
    /// A no-op when nothing was started or it was already stopped. A failed
    /// broker without a container moves straight to `Stopped`.
    #[instrument(skip(self), fields(container = %self.name))]
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            debug!(state = %self.state, "Nothing to stop");
            if self.state == BrokerState::Failed {
                self.state = BrokerState::Stopped;
            }
            return Ok(());
        };

        match self.runtime.stop(&handle).await {
            Ok(()) => {
                self.state = BrokerState::Stopped;
                self.mqtt_port = None;
                info!(id = %handle.id, "Broker stopped");
                Ok(())
            }
            Err(e) => {
                self.handle = Some(handle);
                Err(e.in_phase(Phase::Stop))
            }
        }
    }

    // =========================================================================
    // Runtime Extension Control
    // =========================================================================

    /// Disables a mounted extension in the running broker.
    ///
    /// Creates the `DISABLED` marker in the extension folder and waits for
    /// the broker to log that `name` stopped.
    pub async fn disable_extension(&mut self, extension: &PackagedExtension, name: &str) -> Result<()> {
        self.toggle_extension(extension, name, true).await
    }

    /// Re-enables a disabled extension in the running broker.
    ///
    /// Removes the `DISABLED` marker and waits for `name` to start again.
    pub async fn enable_extension(&mut self, extension: &PackagedExtension, name: &str) -> Result<()> {
        self.toggle_extension(extension, name, false).await
    }

    async fn toggle_extension(
        &mut self,
        extension: &PackagedExtension,
        name: &str,
        disable: bool,
    ) -> Result<()> {
        let operation = if disable { "disable an extension" } else { "enable an extension" };
        let handle = match (&self.handle, self.state) {
            (Some(handle), BrokerState::Running) => handle.clone(),
            _ => return Err(self.invalid_state(operation)),
        };
        if !self.extensions.iter().any(|e| e.id() == extension.id()) {
            return Err(Error::InvalidExtensionId {
                id: extension.id().to_string(),
                reason: "not mounted in this broker".to_string(),
            });
        }

        let marker = format!(
            "{}/{}",
            extension.container_path(&self.config.extensions_root),
            DISABLED_MARKER_FILE
        );
        let (command, expect) = if disable {
            (vec!["touch".to_string(), marker], Marker::Stopped)
        } else {
            (vec!["rm".to_string(), "-f".to_string(), marker], Marker::Started)
        };

        let timeout = self.config.startup_timeout;
        let deadline = Instant::now() + timeout;

        // Follow from now so the original start lines are not replayed.
        let mut logs = self
            .runtime
            .logs(&handle, Some(Utc::now()))
            .await
            .map_err(|e| e.in_phase(Phase::LogScan))?;

        let result = self
            .runtime
            .exec(&handle, &command)
            .await
            .map_err(|e| e.in_phase(Phase::Exec))?;
        if !result.is_success() {
            return Err(Error::CommandFailed {
                command: command.join(" "),
                reason: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            }
            .in_phase(Phase::Exec));
        }

        let mut watcher = ReadinessWatcher::expecting(self.config.markers.clone(), expect, [name]);
        watcher
            .watch(&mut logs, deadline)
            .await
            .map_err(|e| with_total_timeout(e, timeout))?;

        info!(extension = %name, disabled = disable, "Extension toggled");
        Ok(())
    }
}

/// Reports the configured timeout rather than the remaining budget.
fn with_total_timeout(error: Error, total: Duration) -> Error {
    match error {
        Error::StartupTimeout { unconfirmed, .. } => Error::StartupTimeout {
            unconfirmed,
            timeout: total,
        },
        other => other,
    }
}

impl Drop for BrokerContainer {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        warn!(
            container = %self.name,
            id = %handle.id,
            state = %self.state,
            "Broker dropped without stop()"
        );

        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let runtime = Arc::clone(&self.runtime);
            rt.spawn(async move {
                if let Err(e) = runtime.stop(&handle).await {
                    warn!(id = %handle.id, error = %e, "Best-effort stop failed");
                }
            });
        }
    }
}
