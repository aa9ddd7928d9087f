//! CRI pod sandbox request types.
//! These mirror the subset of the CRI `RunPodSandboxRequest` message that the
//! provisioning path reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPodSandboxRequest {
    pub config: PodSandboxConfig,
    /// Runtime class name requested by the pod, empty for the default runtime
    pub runtime_handler: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSandboxConfig {
    pub metadata: PodSandboxMetadata,
    pub hostname: String,
    pub dns_config: Option<DnsConfig>,
    pub port_mappings: Vec<PortMapping>,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub linux: Option<LinuxPodSandboxConfig>,
}

impl PodSandboxConfig {
    /// Network namespace mode requested for the sandbox, `Pod` when unset.
    pub fn network_mode(&self) -> NamespaceMode {
        self.namespace_options().network
    }

    pub fn namespace_options(&self) -> NamespaceOptions {
        self.linux
            .as_ref()
            .and_then(|l| l.security_context.as_ref())
            .map(|s| s.namespace_options)
            .unwrap_or_default()
    }

    pub fn host_network(&self) -> bool {
        self.network_mode() == NamespaceMode::Node
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSandboxMetadata {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub searches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(default)]
    pub protocol: Protocol,
    pub container_port: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub host_port: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_ip: String,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinuxPodSandboxConfig {
    pub cgroup_parent: String,
    pub security_context: Option<LinuxSandboxSecurityContext>,
    pub sysctls: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinuxSandboxSecurityContext {
    pub namespace_options: NamespaceOptions,
    pub run_as_user: Option<i64>,
    pub supplemental_groups: Vec<i64>,
    pub readonly_rootfs: bool,
    pub privileged: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceOptions {
    pub network: NamespaceMode,
    pub pid: NamespaceMode,
    pub ipc: NamespaceMode,
}

/// Which namespace a pod's processes join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NamespaceMode {
    /// A namespace private to the pod
    #[default]
    Pod,
    /// A namespace private to each container
    Container,
    /// The node's (host) namespace
    Node,
    /// The namespace of another container
    Target,
}
