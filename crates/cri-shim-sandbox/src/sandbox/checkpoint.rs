//! Durable sandbox checkpoints.
//!
//! A checkpoint is written before the sandbox container is started, so
//! that every started sandbox can be recognised again after a shim restart
//! even if the engine has lost track of it.
//!
//! The file store keeps one JSON file per sandbox ID. Writes go to a
//! temporary file that is synced and then renamed into place.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt as _;

use crate::sandbox::config::Config;
use crate::sandbox::error::CheckpointError;
use crate::sandbox::request::{PodSandboxConfig, PortMapping};

pub const SCHEMA_VERSION: &str = "v1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub host_network: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxCheckpoint {
    pub version: String,
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<CheckpointData>,
    #[serde(default)]
    pub checksum: String,
}

impl SandboxCheckpoint {
    /// Project the parts of `config` needed to recover the sandbox.
    pub fn from_config(config: &PodSandboxConfig) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            name: config.metadata.name.clone(),
            namespace: config.metadata.namespace.clone(),
            data: Some(CheckpointData {
                port_mappings: config.port_mappings.clone(),
                host_network: config.host_network(),
            }),
            checksum: String::new(),
        }
    }

    /// Serialize with a freshly computed checksum.
    pub fn marshal(&self) -> Result<Vec<u8>, CheckpointError> {
        let mut cp = self.clone();
        cp.checksum = cp.compute_checksum()?;
        Ok(serde_json::to_vec(&cp)?)
    }

    /// Deserialize and verify the checksum.
    pub fn unmarshal(id: &str, blob: &[u8]) -> Result<Self, CheckpointError> {
        let cp: Self = serde_json::from_slice(blob)?;
        if cp.compute_checksum()? != cp.checksum {
            return Err(CheckpointError::Corrupt(id.to_string()));
        }
        Ok(cp)
    }

    fn compute_checksum(&self) -> Result<String, CheckpointError> {
        let unsummed = Self {
            checksum: String::new(),
            ..self.clone()
        };
        let blob = serde_json::to_vec(&unsummed)?;
        Ok(sha256::digest(blob.as_slice()))
    }
}

/// Persists sandbox checkpoints across shim restarts.
#[trait_variant::make(Send)]
pub trait CheckpointStore: Sync + 'static {
    async fn create_checkpoint(
        &self,
        id: &str,
        checkpoint: &SandboxCheckpoint,
    ) -> Result<(), CheckpointError>;

    async fn get_checkpoint(&self, id: &str) -> Result<SandboxCheckpoint, CheckpointError>;

    /// Removing a missing checkpoint is not an error.
    async fn remove_checkpoint(&self, id: &str) -> Result<(), CheckpointError>;

    async fn list_checkpoints(&self) -> Result<Vec<String>, CheckpointError>;
}

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

const TMP_SUFFIX: &str = ".tmp";

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the configured checkpoint directory.
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.checkpoint_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> Result<PathBuf, CheckpointError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(CheckpointError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid checkpoint key {id:?}"),
            )));
        }
        Ok(self.dir.join(id))
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn create_checkpoint(
        &self,
        id: &str,
        checkpoint: &SandboxCheckpoint,
    ) -> Result<(), CheckpointError> {
        let path = self.path(id)?;
        let blob = checkpoint.marshal()?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!("{id}{TMP_SUFFIX}"));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&blob).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        log::debug!("wrote checkpoint {}", path.display());
        Ok(())
    }

    async fn get_checkpoint(&self, id: &str) -> Result<SandboxCheckpoint, CheckpointError> {
        let path = self.path(id)?;
        let blob = match tokio::fs::read(&path).await {
            Ok(blob) => blob,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        SandboxCheckpoint::unmarshal(id, &blob)
    }

    async fn remove_checkpoint(&self, id: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path(id)?).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_checkpoints(&self) -> Result<Vec<String>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let mut ids = vec![];
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(TMP_SUFFIX) {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
