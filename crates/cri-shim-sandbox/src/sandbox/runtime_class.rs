use std::collections::HashMap;

use crate::sandbox::config::Config;
use crate::sandbox::{Error, Result};

/// Maps a Kubernetes runtime class name to an engine runtime handler.
pub trait RuntimeClassResolver: Send + Sync {
    /// An empty `runtime_class` asks for the default handler.
    fn resolve(&self, runtime_class: &str) -> Result<String>;
}

/// Resolver backed by the handler table of the shim config.
#[derive(Debug, Clone, Default)]
pub struct RuntimeHandlers {
    default: String,
    handlers: HashMap<String, String>,
}

impl RuntimeHandlers {
    pub fn new(default: impl Into<String>, handlers: HashMap<String, String>) -> Self {
        Self {
            default: default.into(),
            handlers,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.default_runtime_handler, cfg.runtime_handlers.clone())
    }
}

impl RuntimeClassResolver for RuntimeHandlers {
    fn resolve(&self, runtime_class: &str) -> Result<String> {
        if runtime_class.is_empty() {
            return Ok(self.default.clone());
        }
        self.handlers
            .get(runtime_class)
            .cloned()
            .ok_or_else(|| Error::UnknownRuntimeClass(runtime_class.to_string()))
    }
}
