//! Tests for build producers.
//!
//! Exercises `CommandBuildProducer` with plain shell commands standing in
//! for a build tool.

use brokerlab::{ArtifactLocator, BuildProducer, CommandBuildProducer, Error};
use std::fs;
use tempfile::TempDir;

// =============================================================================
// Presets
// =============================================================================

#[test]
fn test_gradle_preset() {
    let producer = CommandBuildProducer::gradle();
    assert_eq!(producer.name(), "gradle");
    assert_eq!(producer.artifact(), &ArtifactLocator::new("build/hivemq-extension", ".zip"));
}

#[test]
fn test_maven_preset() {
    let producer = CommandBuildProducer::maven();
    assert_eq!(producer.name(), "maven");
    assert_eq!(producer.artifact().suffix, "-distribution.zip");
}

// =============================================================================
// Command Execution
// =============================================================================

#[cfg(unix)]
#[test]
fn test_successful_build_returns_artifact() {
    let project = TempDir::new().unwrap();
    let producer = CommandBuildProducer::new(
        "sh",
        "sh",
        ["-c", "mkdir -p out && echo zip > out/ext-1.0.zip"],
        ArtifactLocator::new("out", ".zip"),
    );

    let artifact = producer.build(project.path()).unwrap();
    assert_eq!(artifact, project.path().join("out/ext-1.0.zip"));
    assert_eq!(fs::read_to_string(artifact).unwrap().trim(), "zip");
}

#[cfg(unix)]
#[test]
fn test_failing_build_reports_stderr_tail() {
    let project = TempDir::new().unwrap();
    let producer = CommandBuildProducer::new(
        "sh",
        "sh",
        ["-c", "echo 'Compilation failed: Main.java' >&2; exit 3"],
        ArtifactLocator::new("out", ".zip"),
    );

    let err = producer.build(project.path()).unwrap_err();
    match err {
        Error::BuildFailed { producer, reason, .. } => {
            assert_eq!(producer, "sh");
            assert!(reason.contains("Compilation failed"), "{reason}");
        }
        other => panic!("expected BuildFailed, got {other}"),
    }
}

#[cfg(unix)]
#[test]
fn test_successful_build_without_artifact() {
    let project = TempDir::new().unwrap();
    let producer = CommandBuildProducer::new("sh", "sh", ["-c", "true"], ArtifactLocator::new("out", ".zip"));

    let err = producer.build(project.path()).unwrap_err();
    assert!(matches!(err, Error::ArtifactMissing { .. }));
}

#[test]
fn test_missing_program_is_build_failure() {
    let project = TempDir::new().unwrap();
    let producer = CommandBuildProducer::new(
        "ghost",
        "/nonexistent/build-tool",
        Vec::<String>::new(),
        ArtifactLocator::new("out", ".zip"),
    );

    let err = producer.build(project.path()).unwrap_err();
    assert!(matches!(err, Error::BuildFailed { .. }));
}
