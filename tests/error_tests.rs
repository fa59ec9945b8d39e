//! Tests for error types.
//!
//! Validates display formatting, phase wrapping and kind classification.

use brokerlab::{DescriptorField, Error, ErrorKind, Phase};
use std::error::Error as _;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Configuration Errors
// =============================================================================

#[test]
fn test_invalid_descriptor_names_field() {
    let cases = [
        (DescriptorField::Id, "id"),
        (DescriptorField::Name, "name"),
        (DescriptorField::Version, "version"),
        (DescriptorField::MainClass, "main class"),
    ];
    for (field, word) in cases {
        let msg = Error::InvalidDescriptor { field }.to_string();
        assert!(msg.contains(word), "{msg:?} should mention {word:?}");
        assert_eq!(field.to_string(), word);
    }
}

#[test]
fn test_already_started_display() {
    let err = Error::AlreadyStarted {
        operation: "mount an extension".to_string(),
        state: "running".to_string(),
    };
    assert_eq!(err.to_string(), "cannot mount an extension: broker is already running");
    assert!(err.is_configuration());
}

#[test]
fn test_duplicate_mount_display() {
    let err = Error::DuplicateMount("ext1".to_string());
    assert!(err.to_string().contains("ext1"));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

// =============================================================================
// Startup Errors
// =============================================================================

#[test]
fn test_startup_timeout_lists_unconfirmed() {
    let err = Error::StartupTimeout {
        unconfirmed: vec!["Ext A".to_string(), "Ext B".to_string()],
        timeout: Duration::from_secs(5),
    };
    let msg = err.to_string();
    assert!(msg.contains("Ext A, Ext B"));
    assert!(msg.contains("5s"));
    assert_eq!(err.kind(), ErrorKind::StartupTimeout);
}

#[test]
fn test_extension_start_failed_kind() {
    let err = Error::ExtensionStartFailed {
        name: "X".to_string(),
        line: "Extension \"X\" could not be started".to_string(),
    };
    assert_eq!(err.kind(), ErrorKind::StartupFailed);
    assert!(!err.is_configuration());
}

#[test]
fn test_log_stream_closed_kind() {
    let err = Error::LogStreamClosed {
        unconfirmed: vec!["X".to_string()],
    };
    assert_eq!(err.kind(), ErrorKind::StartupFailed);
}

// =============================================================================
// Phase Wrapping
// =============================================================================

#[test]
fn test_in_phase_keeps_source() {
    let err = Error::StartFailed {
        name: "broker".to_string(),
        reason: "image not found".to_string(),
    }
    .in_phase(Phase::Start);

    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(err.to_string().starts_with("start phase failed"));
    let source = err.source().expect("wrapped source");
    assert!(source.to_string().contains("image not found"));
}

#[test]
fn test_phase_display() {
    assert_eq!(Phase::Mount.to_string(), "mount");
    assert_eq!(Phase::LogScan.to_string(), "log-scan");
    assert_eq!(Phase::PortLookup.to_string(), "port lookup");
    assert_eq!(Phase::Stop.to_string(), "stop");
}

// =============================================================================
// Packaging and I/O Errors
// =============================================================================

#[test]
fn test_packaging_kinds() {
    let errors = [
        Error::BuildFailed {
            producer: "gradle".to_string(),
            project: PathBuf::from("/p"),
            reason: "exit 1".to_string(),
        },
        Error::ArtifactMissing {
            path: PathBuf::from("/p/build/x.zip"),
        },
        Error::UnitNotFound {
            unit: "a.B".to_string(),
            path: PathBuf::from("/c/a/B.class"),
        },
        Error::PathTraversal {
            path: "../evil".to_string(),
        },
        Error::ArchiveTooLarge { size: 2, limit: 1 },
    ];
    for err in errors {
        assert_eq!(err.kind(), ErrorKind::Packaging, "{err}");
    }
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: Error = io.into();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.to_string().contains("gone"));
}
