//! Translation of a CRI pod sandbox config into an engine creation config.

use std::collections::{BTreeMap, HashMap};

use crate::sandbox::request::{NamespaceMode, PodSandboxConfig, PortMapping};
use crate::sandbox::{Error, Result};

pub const CONTAINER_TYPE_LABEL_KEY: &str = "io.kubernetes.docker.type";
pub const CONTAINER_TYPE_LABEL_SANDBOX: &str = "podsandbox";
pub const CONTAINER_NAME_LABEL: &str = "io.kubernetes.container.name";
pub const POD_NAME_LABEL: &str = "io.kubernetes.pod.name";
pub const POD_NAMESPACE_LABEL: &str = "io.kubernetes.pod.namespace";
pub const POD_UID_LABEL: &str = "io.kubernetes.pod.uid";
pub const SANDBOX_ATTEMPT_LABEL: &str = "io.kubernetes.sandbox.attempt";
/// Read back when sibling containers of the pod are created, so they land
/// in the same engine runtime as the sandbox.
pub const RUNTIME_HANDLER_LABEL: &str = "io.kubernetes.docker.runtime";
pub const ANNOTATION_PREFIX: &str = "annotation.";

const KUBE_PREFIX: &str = "k8s";
const SANDBOX_CONTAINER_NAME: &str = "POD";

/// Namespace setting handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceDirective {
    /// Share the host's namespace
    Host,
    /// Private namespace, left unconfigured by the engine
    None,
    /// Private namespace
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: i32,
}

/// Everything the engine needs to create the sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCreationConfig {
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub labels: HashMap<String, String>,
    pub network_mode: NamespaceDirective,
    pub pid_mode: NamespaceDirective,
    pub ipc_mode: NamespaceDirective,
    /// `<port>/<protocol>` keys, sorted
    pub exposed_ports: BTreeMap<String, Vec<PortBinding>>,
    pub cgroup_parent: String,
    pub sysctls: HashMap<String, String>,
    pub privileged: bool,
    pub readonly_rootfs: bool,
    pub user: Option<String>,
    pub group_add: Vec<String>,
}

impl SandboxCreationConfig {
    pub fn runtime_handler(&self) -> Option<&str> {
        self.labels.get(RUNTIME_HANDLER_LABEL).map(String::as_str)
    }
}

/// Engine container name for a sandbox, `k8s_POD_<name>_<namespace>_<uid>_<attempt>`.
/// Stable across retries of the same request, which is what makes a retry
/// collide with the container left behind by an earlier attempt.
pub fn make_sandbox_name(config: &PodSandboxConfig) -> String {
    let m = &config.metadata;
    format!(
        "{KUBE_PREFIX}_{SANDBOX_CONTAINER_NAME}_{}_{}_{}_{}",
        m.name, m.namespace, m.uid, m.attempt
    )
}

/// Build the creation config for `config`. Pure: performs no I/O.
pub fn make_sandbox_config(
    config: &PodSandboxConfig,
    image: &str,
    runtime_handler: &str,
) -> Result<SandboxCreationConfig> {
    let pod = config.metadata.name.clone();
    let invalid = |reason: String| Error::ConfigTranslation {
        pod: pod.clone(),
        reason,
    };

    let m = &config.metadata;
    if m.name.is_empty() || m.namespace.is_empty() || m.uid.is_empty() {
        return Err(invalid(
            "pod metadata must have a name, namespace and uid".to_string(),
        ));
    }

    let ns = config.namespace_options();
    let network_mode = match ns.network {
        NamespaceMode::Node => NamespaceDirective::Host,
        NamespaceMode::Pod => NamespaceDirective::None,
        mode => {
            return Err(invalid(format!(
                "network namespace mode {mode:?} is not supported for a sandbox"
            )));
        }
    };
    let pid_mode = sandbox_namespace(ns.pid, "pid").map_err(invalid)?;
    let ipc_mode = sandbox_namespace(ns.ipc, "ipc").map_err(invalid)?;

    let linux = config.linux.clone().unwrap_or_default();
    if network_mode == NamespaceDirective::Host {
        if let Some(key) = linux.sysctls.keys().find(|k| k.starts_with("net.")) {
            return Err(invalid(format!(
                "sysctl {key:?} is not allowed with host network"
            )));
        }
    }

    let hostname = match network_mode {
        NamespaceDirective::Host => String::new(),
        _ => config.hostname.clone(),
    };

    let exposed_ports = make_port_bindings(&config.port_mappings).map_err(invalid)?;

    let mut labels = config.labels.clone();
    for (k, v) in &config.annotations {
        labels.insert(format!("{ANNOTATION_PREFIX}{k}"), v.clone());
    }
    labels.insert(
        CONTAINER_TYPE_LABEL_KEY.to_string(),
        CONTAINER_TYPE_LABEL_SANDBOX.to_string(),
    );
    labels.insert(
        CONTAINER_NAME_LABEL.to_string(),
        SANDBOX_CONTAINER_NAME.to_string(),
    );
    labels.insert(POD_NAME_LABEL.to_string(), m.name.clone());
    labels.insert(POD_NAMESPACE_LABEL.to_string(), m.namespace.clone());
    labels.insert(POD_UID_LABEL.to_string(), m.uid.clone());
    labels.insert(SANDBOX_ATTEMPT_LABEL.to_string(), m.attempt.to_string());
    labels.insert(
        RUNTIME_HANDLER_LABEL.to_string(),
        runtime_handler.to_string(),
    );

    let sc = linux.security_context.unwrap_or_default();

    Ok(SandboxCreationConfig {
        name: make_sandbox_name(config),
        image: image.to_string(),
        hostname,
        labels,
        network_mode,
        pid_mode,
        ipc_mode,
        exposed_ports,
        cgroup_parent: linux.cgroup_parent,
        sysctls: linux.sysctls,
        privileged: sc.privileged,
        readonly_rootfs: sc.readonly_rootfs,
        user: sc.run_as_user.map(|uid| uid.to_string()),
        group_add: sc
            .supplemental_groups
            .iter()
            .map(ToString::to_string)
            .collect(),
    })
}

fn sandbox_namespace(
    mode: NamespaceMode,
    kind: &str,
) -> std::result::Result<NamespaceDirective, String> {
    match mode {
        NamespaceMode::Node => Ok(NamespaceDirective::Host),
        NamespaceMode::Pod | NamespaceMode::Container => Ok(NamespaceDirective::Private),
        NamespaceMode::Target => Err(format!(
            "{kind} namespace mode Target is not supported for a sandbox"
        )),
    }
}

fn make_port_bindings(
    mappings: &[PortMapping],
) -> std::result::Result<BTreeMap<String, Vec<PortBinding>>, String> {
    let mut exposed = BTreeMap::<String, Vec<PortBinding>>::new();
    for pm in mappings {
        if pm.container_port <= 0 {
            return Err(format!(
                "invalid container port {} in port mapping",
                pm.container_port
            ));
        }
        let key = format!("{}/{}", pm.container_port, pm.protocol.as_str());
        let bindings = exposed.entry(key).or_default();
        if pm.host_port > 0 {
            bindings.push(PortBinding {
                host_ip: pm.host_ip.clone(),
                host_port: pm.host_port,
            });
        }
    }
    Ok(exposed)
}
