//! The pod network plugin seam and the composite container ID it is keyed by.

use std::collections::HashMap;
use std::fmt;

/// Key of the DNS config in the network plugin options.
pub const NET_PLUGIN_DNS_OPTION: &str = "dns";

/// A container ID scoped by the runtime that owns it, e.g. `docker://abc123`.
/// This is the identity the network plugin sees, distinct from the bare
/// engine ID returned to the CRI caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ContainerId {
    pub runtime: String,
    pub id: String,
}

impl ContainerId {
    pub fn new(runtime: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.runtime, self.id)
    }
}

/// Attaches and detaches a sandbox's network namespace.
#[trait_variant::make(Send)]
pub trait NetworkPlugin: Sync + 'static {
    /// Wire up the pod network. `options` is opaque to the shim; the plugin
    /// may use or ignore any entry.
    async fn set_up_pod(
        &self,
        namespace: &str,
        name: &str,
        id: &ContainerId,
        annotations: &HashMap<String, String>,
        options: &HashMap<String, String>,
    ) -> anyhow::Result<()>;

    /// Best effort detach of everything `set_up_pod` may have allocated.
    async fn tear_down_pod(&self, namespace: &str, name: &str, id: &ContainerId)
    -> anyhow::Result<()>;
}
