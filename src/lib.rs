//! # brokerlab
//!
//! **Containerized MQTT Broker Harness with Extension Packaging**
//!
//! This crate drives a HiveMQ-style broker inside a container for
//! integration tests of broker extensions. It validates extension
//! descriptors, packages extensions into the folder layout the broker
//! loads, mounts them into a broker container and blocks until every
//! awaited extension has logged that it started.
//!
//! It does not implement the broker, a container engine or MQTT itself;
//! those are external collaborators.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            brokerlab                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐        ┌──────────────────────────────┐   │
//! │  │ ExtensionDescriptor  │        │        BuildProducer         │   │
//! │  │  builder → build()   │        │  gradle() │ maven() │ custom │   │
//! │  └──────────┬───────────┘        └──────────────┬───────────────┘   │
//! │             │                                   │                   │
//! │  ┌──────────▼───────────────────────────────────▼───────────────┐   │
//! │  │                    ExtensionPackager                         │   │
//! │  │  <id>/ : hivemq-extension.xml │ <id>-<ver>.jar │ DISABLED    │   │
//! │  └──────────────────────────────┬───────────────────────────────┘   │
//! │                                 │ PackagedExtension                 │
//! │  ┌──────────────────────────────▼───────────────────────────────┐   │
//! │  │                     BrokerContainer                          │   │
//! │  │  mount → start → wait_ready ∥ ReadinessWatcher → mqtt_port   │   │
//! │  └──────────────────────────────┬───────────────────────────────┘   │
//! ├─────────────────────────────────┼───────────────────────────────────┤
//! │                      ContainerRuntime Trait                         │
//! │  ┌──────────────────────────────▼───────────┐                       │
//! │  │ DockerCliRuntime (docker run/logs/port)  │                       │
//! │  └──────────────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Readiness
//!
//! The broker logs one line per extension lifecycle transition. `start()`
//! succeeds only after the container is up and, for every name registered
//! with [`BrokerContainer::wait_for_extension`], a line containing the
//! success phrase and that name was seen. A failure line fails the start
//! immediately; the whole wait is bounded by one deadline.
//!
//! # Example
//!
//! ```rust,ignore
//! use brokerlab::{BrokerContainer, CommandBuildProducer, DockerCliRuntime, ExtensionPackager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> brokerlab::Result<()> {
//!     let packager = ExtensionPackager::new()?;
//!     let extension = packager.package_project("my-extension".as_ref(), &CommandBuildProducer::gradle())?;
//!
//!     let mut broker = BrokerContainer::new(Arc::new(DockerCliRuntime::new()));
//!     broker
//!         .with_extension(extension)?
//!         .wait_for_extension("My Extension")?;
//!     let port = broker.start().await?;
//!     println!("MQTT on localhost:{port}");
//!     broker.stop().await
//! }
//! ```

pub mod constants;
pub mod container;
pub mod error;
pub mod extension;
pub mod package;
pub mod producer;
pub mod readiness;
pub mod runtime;

pub mod runtimes;

// Re-exports
pub use container::{BrokerConfig, BrokerContainer, BrokerState};
pub use error::{DescriptorField, Error, ErrorKind, Phase, Result};
pub use extension::{DescriptorBuilder, ExtensionDescriptor, UnitRef};
pub use package::{ClassDirResolver, ExtensionPackager, PackagedExtension, UnitFile, UnitResolver};
pub use producer::{ArtifactLocator, BuildProducer, CommandBuildProducer};
pub use readiness::{LogMarkers, Marker, NameMatch, Progress, ReadinessWatcher};
pub use runtime::{ContainerConfig, ContainerHandle, ContainerRuntime, ExecResult, LogStream, Mount};
pub use runtimes::DockerCliRuntime;
