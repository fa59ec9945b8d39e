//! Tests for the container runtime contract types.
//!
//! Validates container config serialization, handles, exec results and the
//! default `exec` of the runtime trait.

use async_trait::async_trait;
use brokerlab::{
    ContainerConfig, ContainerHandle, ContainerRuntime, Error, ExecResult, LogStream, Mount,
    Result,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

// =============================================================================
// ContainerConfig Tests
// =============================================================================

#[test]
fn test_container_config_serialization() {
    let mut env = BTreeMap::new();
    env.insert("HIVEMQ_LOG_LEVEL".to_string(), "DEBUG".to_string());
    let config = ContainerConfig {
        name: "broker".to_string(),
        image: "hivemq/hivemq-ce:latest".to_string(),
        mounts: vec![Mount::new("/tmp/ext", "/opt/hivemq/extensions/ext")],
        exposed_ports: vec![1883],
        env,
        ready_log_phrase: None,
    };

    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["exposedPorts"][0], 1883);
    assert_eq!(json["mounts"][0]["containerPath"], "/opt/hivemq/extensions/ext");
    assert_eq!(json["mounts"][0]["readOnly"], false);
    assert!(json.get("readyLogPhrase").is_none());

    let back: ContainerConfig = serde_json::from_value(json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_container_config_default_is_empty() {
    let config = ContainerConfig::default();
    assert!(config.mounts.is_empty());
    assert!(config.exposed_ports.is_empty());
    assert!(config.env.is_empty());
}

// =============================================================================
// ContainerHandle / ExecResult Tests
// =============================================================================

#[test]
fn test_handle_timestamp_is_recent() {
    let before = Utc::now();
    let handle = ContainerHandle::new("abc", "broker");
    assert_eq!(handle.id, "abc");
    assert_eq!(handle.name, "broker");
    assert!(handle.started_at >= before);
}

#[test]
fn test_exec_result_success() {
    assert!(ExecResult::success().is_success());
    let failed = ExecResult {
        exit_code: 1,
        stdout: Vec::new(),
        stderr: b"nope".to_vec(),
    };
    assert!(!failed.is_success());
}

// =============================================================================
// Trait Defaults
// =============================================================================

struct MinimalRuntime;

#[async_trait]
impl ContainerRuntime for MinimalRuntime {
    fn name(&self) -> &str {
        "minimal"
    }

    async fn start(&self, config: &ContainerConfig) -> Result<ContainerHandle> {
        Ok(ContainerHandle::new("1", config.name.clone()))
    }

    async fn logs(&self, _handle: &ContainerHandle, _since: Option<DateTime<Utc>>) -> Result<LogStream> {
        let (_tx, stream) = LogStream::channel(1);
        Ok(stream)
    }

    async fn wait_ready(&self, _handle: &ContainerHandle) -> Result<()> {
        Ok(())
    }

    async fn mapped_port(&self, _handle: &ContainerHandle, port: u16) -> Result<u16> {
        Ok(port)
    }

    async fn stop(&self, _handle: &ContainerHandle) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_exec_not_supported_by_default() {
    let runtime = MinimalRuntime;
    let handle = ContainerHandle::new("1", "b");
    let err = runtime.exec(&handle, &["ls".to_string()]).await.unwrap_err();
    match err {
        Error::NotSupported(msg) => assert!(msg.contains("minimal")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_dropped_sender_ends_stream() {
    let runtime = MinimalRuntime;
    let handle = ContainerHandle::new("1", "b");
    let mut logs = runtime.logs(&handle, None).await.unwrap();
    assert_eq!(logs.next_line().await, None);
}
