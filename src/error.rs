//! Error types for descriptor validation, packaging and broker lifecycle.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Required descriptor field, in validation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorField {
    Id,
    Name,
    Version,
    MainClass,
}

impl DescriptorField {
    /// Human-readable requirement for this field.
    pub fn requirement(&self) -> &'static str {
        match self {
            Self::Id => "extension id must not be empty",
            Self::Name => "extension name must not be empty",
            Self::Version => "extension version must not be empty",
            Self::MainClass => "extension main class must be set",
        }
    }
}

impl fmt::Display for DescriptorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id => write!(f, "id"),
            Self::Name => write!(f, "name"),
            Self::Version => write!(f, "version"),
            Self::MainClass => write!(f, "main class"),
        }
    }
}

/// Lifecycle phase an infrastructure error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Preparing host mounts.
    Mount,
    /// Starting the container and waiting for the runtime ready signal.
    Start,
    /// Reading the container log stream.
    LogScan,
    /// Looking up the mapped port.
    PortLookup,
    /// Executing a command inside the running container.
    Exec,
    /// Releasing the container.
    Stop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mount => write!(f, "mount"),
            Self::Start => write!(f, "start"),
            Self::LogScan => write!(f, "log-scan"),
            Self::PortLookup => write!(f, "port lookup"),
            Self::Exec => write!(f, "exec"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Coarse error category, used by callers deciding how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Contract violation by the caller; raised synchronously.
    Configuration,
    /// Build or packaging problem.
    Packaging,
    /// Readiness wait exceeded its deadline.
    StartupTimeout,
    /// Broker or extension reported a startup failure.
    StartupFailed,
    /// Container infrastructure problem.
    Resource,
    /// Host filesystem error.
    Io,
}

/// Errors that can occur in the harness.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Descriptor build failed on the first missing required field.
    #[error("invalid extension descriptor: {}", .field.requirement())]
    InvalidDescriptor { field: DescriptorField },

    /// Extension id unusable as a folder name.
    #[error("invalid extension id '{id}': {reason}")]
    InvalidExtensionId { id: String, reason: String },

    /// The same extension id was mounted twice.
    #[error("extension '{0}' is mounted more than once")]
    DuplicateMount(String),

    /// Configuration attempted after `start()`.
    #[error("cannot {operation}: broker is already {state}")]
    AlreadyStarted { operation: String, state: String },

    /// Operation not valid in the current broker state.
    #[error("cannot {operation} while broker is {state}")]
    InvalidState { operation: String, state: String },

    // =========================================================================
    // Packaging Errors
    // =========================================================================
    /// External build reported failure.
    #[error("build of {project} with {producer} failed: {reason}")]
    BuildFailed {
        producer: String,
        project: PathBuf,
        reason: String,
    },

    /// Expected build output absent after a successful build.
    #[error("expected artifact missing: {}", .path.display())]
    ArtifactMissing { path: PathBuf },

    /// Artifact present but not laid out as an extension.
    #[error("invalid extension artifact at {}: {reason}", .path.display())]
    InvalidArtifact { path: PathBuf, reason: String },

    /// A referenced code unit could not be resolved to a file.
    #[error("unit '{unit}' not found at {}", .path.display())]
    UnitNotFound { unit: String, path: PathBuf },

    /// Archive entry escapes the extraction root.
    #[error("path traversal detected in archive: {path}")]
    PathTraversal { path: String },

    /// Archive exceeds unpacking limits.
    #[error("archive exceeds limit: {size} > {limit}")]
    ArchiveTooLarge { size: u64, limit: u64 },

    /// Zip reading or writing failed.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    // =========================================================================
    // Startup Errors
    // =========================================================================
    /// Readiness deadline elapsed.
    #[error("broker not ready after {timeout:?}, unconfirmed extensions: {}", .unconfirmed.join(", "))]
    StartupTimeout {
        unconfirmed: Vec<String>,
        timeout: Duration,
    },

    /// A failure marker was logged for an awaited extension.
    #[error("extension '{name}' failed to start: {line}")]
    ExtensionStartFailed { name: String, line: String },

    /// The log stream ended before all extensions confirmed.
    #[error("log stream closed, unconfirmed extensions: {}", .unconfirmed.join(", "))]
    LogStreamClosed { unconfirmed: Vec<String> },

    // =========================================================================
    // Resource Errors
    // =========================================================================
    /// Collaborator error wrapped with the lifecycle phase.
    #[error("{phase} phase failed: {source}")]
    Runtime {
        phase: Phase,
        #[source]
        source: Box<Error>,
    },

    /// Container start failed.
    #[error("failed to start container '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    /// Runtime not available on this host.
    #[error("runtime '{runtime}' not available: {reason}")]
    RuntimeUnavailable { runtime: String, reason: String },

    /// Operation not supported by this runtime.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// External command exited unsuccessfully.
    #[error("command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wraps a collaborator error with the phase it happened in.
    pub fn in_phase(self, phase: Phase) -> Self {
        Self::Runtime {
            phase,
            source: Box::new(self),
        }
    }

    /// Returns the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDescriptor { .. }
            | Self::InvalidExtensionId { .. }
            | Self::DuplicateMount(_)
            | Self::AlreadyStarted { .. }
            | Self::InvalidState { .. } => ErrorKind::Configuration,
            Self::BuildFailed { .. }
            | Self::ArtifactMissing { .. }
            | Self::InvalidArtifact { .. }
            | Self::UnitNotFound { .. }
            | Self::PathTraversal { .. }
            | Self::ArchiveTooLarge { .. }
            | Self::Archive(_) => ErrorKind::Packaging,
            Self::StartupTimeout { .. } => ErrorKind::StartupTimeout,
            Self::ExtensionStartFailed { .. } | Self::LogStreamClosed { .. } => {
                ErrorKind::StartupFailed
            }
            Self::Runtime { .. }
            | Self::StartFailed { .. }
            | Self::RuntimeUnavailable { .. }
            | Self::NotSupported(_)
            | Self::CommandFailed { .. } => ErrorKind::Resource,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true for caller contract violations.
    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}
