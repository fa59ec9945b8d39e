//! # Harness Constants
//!
//! Defines the broker defaults, container paths, log marker phrases and
//! packaging limits used throughout the crate. These constants are the
//! **single source of truth**; configuration structs derive their
//! `Default` values from here.
//!
//! ## Cross-References
//!
//! - [`crate::package`]: extension-folder layout and archive limits
//! - [`crate::readiness`]: marker phrases
//! - [`crate::container`]: image, ports, timeouts
//! - [`crate::runtimes`]: polling intervals and channel sizes

use std::time::Duration;

// =============================================================================
// Broker Image
// =============================================================================

/// Default broker image repository.
pub const DEFAULT_IMAGE: &str = "hivemq/hivemq-ce";

/// Default broker image tag.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// MQTT listener port inside the broker container.
pub const MQTT_PORT: u16 = 1883;

// =============================================================================
// Container Layout
// =============================================================================
//
// Paths inside the broker container. The broker scans every direct child of
// the extensions root on startup and loads it as one extension.
// =============================================================================

/// Root folder the broker loads extensions from.
pub const CONTAINER_EXTENSIONS_ROOT: &str = "/opt/hivemq/extensions";

/// Environment variable the broker image reads its root log level from.
pub const LOG_LEVEL_ENV: &str = "HIVEMQ_LOG_LEVEL";

// =============================================================================
// Extension Folder Convention
// =============================================================================

/// Metadata file inside every extension folder.
pub const EXTENSION_METADATA_FILE: &str = "hivemq-extension.xml";

/// Marker file: when present the broker loads the extension but does not
/// start it.
pub const DISABLED_MARKER_FILE: &str = "DISABLED";

/// Service interface the broker looks up the extension entry point through.
pub const EXTENSION_MAIN_SERVICE: &str = "com.hivemq.extension.sdk.api.ExtensionMain";

/// Jar manifest entry.
pub const JAR_MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";

/// Compiled unit file extension.
pub const UNIT_FILE_EXTENSION: &str = "class";

// =============================================================================
// Log Markers
// =============================================================================
//
// The broker logs one line per extension lifecycle transition, e.g.
//   Extension "Gradle Extension" version 1.0 started successfully.
// Matching is by substring since lines carry timestamps and prefixes.
// =============================================================================

/// Phrase logged when an extension started.
pub const STARTED_MARKER: &str = "started successfully";

/// Phrase logged when an extension failed to start.
pub const FAILED_MARKER: &str = "could not be started";

/// Phrase logged when an extension was stopped (e.g. disabled at runtime).
pub const STOPPED_MARKER: &str = "stopped successfully";

/// Phrase logged once the broker itself is up.
pub const BROKER_READY_MARKER: &str = "Started HiveMQ in";

// =============================================================================
// Timeouts
// =============================================================================

/// Default bound on `start()`: container ready plus all awaited extensions.
///
/// Extension startup includes JVM class loading inside the container, which
/// is slow on cold CI hosts.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(180);

/// Interval between readiness probes of a container runtime.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Buffered log lines per log stream before the producer applies
/// backpressure.
pub const LOG_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Configuration Keys
// =============================================================================

/// Environment override for the broker image (`repo:tag` or `repo`).
pub const IMAGE_ENV: &str = "BROKERLAB_IMAGE";

/// Environment override for the startup timeout, in whole seconds.
pub const STARTUP_TIMEOUT_ENV: &str = "BROKERLAB_STARTUP_TIMEOUT_SECS";

/// Subdirectory of the user cache dir used as the default `extpack` output.
pub const STAGING_DIR: &str = "brokerlab/extensions";

// =============================================================================
// Archive Limits
// =============================================================================
//
// Distribution archives come from local builds, but a broken build script can
// still emit pathological zips. These bounds keep unpacking finite.
// =============================================================================

/// Maximum number of entries in an extension distribution archive.
pub const MAX_ARCHIVE_ENTRIES: usize = 100_000;

/// Maximum total uncompressed size of an extension distribution (512 MiB).
pub const MAX_ARCHIVE_SIZE: u64 = 512 * 1024 * 1024;

// =============================================================================
// Extension ID Validation
// =============================================================================

/// Valid characters for extension ids.
///
/// Includes: `a-z`, `A-Z`, `0-9`, `-`, `_`, `.`
///
/// The id becomes a folder name on the host and inside the container, so
/// `/` and `\` are excluded.
pub const EXTENSION_ID_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.";

/// Maximum extension id length.
pub const MAX_EXTENSION_ID_LEN: usize = 128;

/// Validates an extension id for use as a folder name.
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[inline]
#[must_use = "validation result must be checked before using the id as a path"]
pub fn validate_extension_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("extension id cannot be empty");
    }
    if id.len() > MAX_EXTENSION_ID_LEN {
        return Err("extension id exceeds maximum length");
    }
    if id == "." || id == ".." {
        return Err("extension id cannot be a relative path component");
    }
    if !id.chars().all(|c| EXTENSION_ID_VALID_CHARS.contains(c)) {
        return Err("extension id contains invalid characters");
    }
    Ok(())
}
