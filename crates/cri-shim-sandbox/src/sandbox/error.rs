//! Error types used by the sandbox provisioning path.
//! Each provisioning stage has its own variant so callers can tell where a
//! request stopped.

use std::fmt;

use thiserror::Error;

/// Errors reported by the container engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The container or image does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// The requested container name is already held by another container
    #[error("conflict: name {name:?} is already in use by container {existing_id:?}")]
    Conflict { name: String, existing_id: String },
    /// Any other engine failure
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors reported by a checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(String),
    /// The stored checksum does not match the stored payload
    #[error("checkpoint {0} is corrupted")]
    Corrupt(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    /// The sandbox image could not be found or pulled
    #[error("failed to ensure sandbox image {image:?}: {source}")]
    ImagePull {
        image: String,
        #[source]
        source: EngineError,
    },
    /// The pod sandbox config could not be mapped onto an engine config
    #[error("failed to make sandbox docker config for pod {pod:?}: {reason}")]
    ConfigTranslation { pod: String, reason: String },
    /// The runtime class has no configured runtime handler
    #[error("no runtime for {0:?} is configured")]
    UnknownRuntimeClass(String),
    #[error("failed to create a sandbox for pod {pod:?}: {source}")]
    SandboxCreate {
        pod: String,
        #[source]
        source: EngineError,
    },
    #[error("failed to write checkpoint for sandbox {sandbox_id:?}: {source}")]
    Checkpoint {
        sandbox_id: String,
        #[source]
        source: CheckpointError,
    },
    #[error("failed to start sandbox container for pod {pod:?}: {source}")]
    SandboxStart {
        pod: String,
        sandbox_id: String,
        #[source]
        source: EngineError,
    },
    #[error("rewrite resolv.conf failed for pod {pod:?}: {source}")]
    ResolvConf {
        pod: String,
        sandbox_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to set up sandbox container {sandbox_id:?} network for pod {pod:?}: {source}")]
    NetworkSetup {
        pod: String,
        sandbox_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to clean up sandbox container {sandbox_id:?} network for pod {pod:?}: {source}")]
    NetworkTeardown {
        pod: String,
        sandbox_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to stop sandbox container {sandbox_id:?} for pod {pod:?}: {source}")]
    SandboxStop {
        pod: String,
        sandbox_id: String,
        #[source]
        source: EngineError,
    },
    /// Several independent failures collected while compensating a failed network setup
    #[error("{errors}")]
    Aggregate {
        sandbox_id: String,
        errors: AggregateError,
    },
    /// The request was cancelled between two stages
    #[error("sandbox provisioning cancelled before {stage}")]
    Cancelled {
        stage: &'static str,
        sandbox_id: Option<String>,
    },
    /// The shim configuration could not be loaded
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// The sandbox that was left behind by a failed request, if the request
    /// got far enough to create one.
    pub fn sandbox_id(&self) -> Option<&str> {
        match self {
            Error::Checkpoint { sandbox_id, .. }
            | Error::SandboxStart { sandbox_id, .. }
            | Error::ResolvConf { sandbox_id, .. }
            | Error::NetworkSetup { sandbox_id, .. }
            | Error::NetworkTeardown { sandbox_id, .. }
            | Error::SandboxStop { sandbox_id, .. }
            | Error::Aggregate { sandbox_id, .. } => Some(sandbox_id),
            Error::Cancelled { sandbox_id, .. } => sandbox_id.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// An ordered list of errors reported as one.
/// Nothing is ever dropped or merged: the first entry is the root cause and
/// the rest are failures that happened while cleaning up after it.
#[derive(Debug, Default)]
pub struct AggregateError(Vec<Error>);

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.0.push(err);
    }

    pub fn errors(&self) -> &[Error] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<Error> {
        self.0
    }
}

impl From<Vec<Error>> for AggregateError {
    fn from(errors: Vec<Error>) -> Self {
        Self(errors)
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => Ok(()),
            [err] => write!(f, "{err}"),
            errs => {
                write!(f, "[")?;
                for (i, err) in errs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{err}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl std::error::Error for AggregateError {}
