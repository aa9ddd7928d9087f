use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::sandbox::{Error, Result};

/// Image used for the sandbox container when no override is configured.
pub const DEFAULT_SANDBOX_IMAGE: &str = "registry.k8s.io/pause:3.9";

/// Prefix of the composite container ID handed to the network plugin.
pub const DEFAULT_RUNTIME_NAME: &str = "docker";

static DEFAULT_CHECKPOINT_DIR: &str = "/var/lib/cri-shim/sandbox";

const DEFAULT_STOP_GRACE_PERIOD_SECS: u64 = 10;

/// Shim settings that affect sandbox provisioning.
/// Loaded from a TOML file; every key is optional.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Operator override for the sandbox image
    pub pod_sandbox_image: Option<String>,
    /// Runtime-class name to use in composite container IDs
    pub runtime_name: String,
    /// Runtime handler used when a pod requests no runtime class
    pub default_runtime_handler: String,
    /// Runtime-class name to engine runtime handler
    pub runtime_handlers: HashMap<String, String>,
    /// Grace period, in seconds, given to the sandbox container when it is
    /// stopped after a failed network setup
    pub stop_grace_period_secs: u64,
    pub checkpoint_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pod_sandbox_image: None,
            runtime_name: DEFAULT_RUNTIME_NAME.to_string(),
            default_runtime_handler: String::new(),
            runtime_handlers: HashMap::new(),
            stop_grace_period_secs: DEFAULT_STOP_GRACE_PERIOD_SECS,
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| Error::Config(err.to_string()))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|err| {
            Error::Config(format!("could not read {}: {err}", path.display()))
        })?;
        let cfg = Self::from_toml(&content)?;
        log::debug!("loaded shim config from {}: {cfg:?}", path.display());
        Ok(cfg)
    }

    /// The image the sandbox container runs.
    pub fn get_sandbox_image(&self) -> &str {
        match self.pod_sandbox_image.as_deref() {
            Some(image) if !image.is_empty() => image,
            _ => DEFAULT_SANDBOX_IMAGE,
        }
    }

    pub fn get_stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.stop_grace_period_secs)
    }

    pub fn set_pod_sandbox_image(&mut self, image: impl Into<String>) -> &mut Self {
        self.pod_sandbox_image = Some(image.into());
        self
    }

    pub fn set_runtime_handler(
        &mut self,
        runtime_class: impl Into<String>,
        handler: impl Into<String>,
    ) -> &mut Self {
        self.runtime_handlers
            .insert(runtime_class.into(), handler.into());
        self
    }

    pub fn set_checkpoint_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.checkpoint_dir = dir.into();
        self
    }
}
