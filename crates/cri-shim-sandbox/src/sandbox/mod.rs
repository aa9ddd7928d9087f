//! Pod sandbox provisioning.
//!
//! [`SandboxService`] drives a `RunPodSandbox` request through the container
//! engine, the checkpoint store and the pod network plugin. The collaborators
//! are the [`Engine`], [`CheckpointStore`] and [`NetworkPlugin`] traits.

pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod image;
pub mod network;
pub mod network_state;
pub mod request;
pub mod resolv;
pub mod runtime_class;
mod service;
#[cfg(test)]
pub(crate) mod testing;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, SandboxCheckpoint};
pub use config::Config;
pub use engine::{ContainerInfo, ContainerState, Engine};
pub use error::{AggregateError, Error, Result};
pub use network::{ContainerId, NetworkPlugin};
pub use network_state::{NetworkReadiness, NetworkReadyStore};
pub use request::RunPodSandboxRequest;
pub use runtime_class::{RuntimeClassResolver, RuntimeHandlers};
pub use service::SandboxService;
