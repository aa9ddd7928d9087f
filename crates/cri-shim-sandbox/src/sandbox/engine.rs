//! The container engine the sandbox container is created in.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::sandbox::builder::SandboxCreationConfig;
use crate::sandbox::error::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerState {
    /// Created but never started
    Created,
    Running,
    Exited,
    #[default]
    Unknown,
}

/// What the engine reports about an existing container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub state: ContainerState,
    /// Engine generated resolver file. Only meaningful when the container
    /// has its own network namespace.
    pub resolv_conf_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
}

/// Engine operations used while provisioning a sandbox.
/// Implementations must be safe to call concurrently for different containers.
#[trait_variant::make(Send)]
pub trait Engine: Sync + 'static {
    /// Returns `EngineError::NotFound` when the image is not present locally.
    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, EngineError>;

    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// Create the container and return its engine ID.
    /// A name collision must be reported as `EngineError::Conflict`.
    async fn create_container(&self, config: &SandboxCreationConfig)
    -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str, grace_period: Duration) -> Result<(), EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, EngineError>;

    /// Force-remove the container together with its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;
}
