//! Container runtime implementations.
//!
//! Each runtime adapts one container engine to the
//! [`ContainerRuntime`](crate::runtime::ContainerRuntime) trait. The broker
//! controller only ever sees the trait object.

pub mod docker;

pub use self::docker::DockerCliRuntime;
