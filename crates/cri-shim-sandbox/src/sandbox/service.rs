use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::sandbox::builder::make_sandbox_config;
use crate::sandbox::checkpoint::{CheckpointStore, SandboxCheckpoint};
use crate::sandbox::config::Config;
use crate::sandbox::conflict::{ConflictResolution, recover_from_creation_conflict};
use crate::sandbox::engine::Engine;
use crate::sandbox::error::AggregateError;
use crate::sandbox::image::ensure_sandbox_image;
use crate::sandbox::network::{ContainerId, NET_PLUGIN_DNS_OPTION, NetworkPlugin};
use crate::sandbox::network_state::{NetworkReadiness, NetworkReadyStore};
use crate::sandbox::request::{DnsConfig, PodSandboxConfig, RunPodSandboxRequest};
use crate::sandbox::resolv::rewrite_resolv_file;
use crate::sandbox::runtime_class::{RuntimeClassResolver, RuntimeHandlers};
use crate::sandbox::{Error, Result};


/// Runs pod sandboxes on top of a container engine and a pod network plugin.
///
/// Provisioning is a fixed sequence of stages: ensure image, build config,
/// create, checkpoint, start, rewrite resolv.conf, set up the network.
/// Only a network failure is rolled back (network torn down, container
/// stopped). A failure at any earlier stage leaves an inert container that
/// the kubelet garbage collector removes, while a half configured pod
/// network holds plugin state (IPs, routes, iptables rules) that nothing
/// else reclaims.
pub struct SandboxService<E: Engine, N: NetworkPlugin, C: CheckpointStore> {
    config: Config,
    engine: E,
    network: N,
    checkpoints: C,
    runtime_classes: Box<dyn RuntimeClassResolver>,
    network_ready: Arc<dyn NetworkReadiness>,
}

impl<E: Engine, N: NetworkPlugin, C: CheckpointStore> SandboxService<E, N, C> {
    /// Creates a service resolving runtime classes from the handler table in
    /// `config` and tracking network readiness in memory.
    #[cfg_attr(feature = "tracing", tracing::instrument(parent = tracing::Span::current(), skip_all, level = "Info"))]
    pub fn new(config: Config, engine: E, network: N, checkpoints: C) -> Self {
        let runtime_classes = Box::new(RuntimeHandlers::from_config(&config));
        Self {
            config,
            engine,
            network,
            checkpoints,
            runtime_classes,
            network_ready: Arc::new(NetworkReadyStore::new()),
        }
    }

    pub fn with_runtime_class_resolver(
        mut self,
        resolver: impl RuntimeClassResolver + 'static,
    ) -> Self {
        self.runtime_classes = Box::new(resolver);
        self
    }

    /// Share the readiness state with the rest of the shim.
    pub fn with_network_readiness(mut self, state: Arc<dyn NetworkReadiness>) -> Self {
        self.network_ready = state;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the pod network of sandbox `id` is usable.
    pub fn network_ready(&self, id: &str) -> bool {
        self.network_ready.get(id).unwrap_or(false)
    }

    /// Drop the readiness entry of a sandbox that has been removed.
    pub fn forget_sandbox(&self, id: &str) {
        self.network_ready.delete(id);
    }

    /// Create and start the sandbox described by `req` and return its ID.
    ///
    /// On a network failure the returned error is an `Error::Aggregate` that
    /// holds the network error followed by any teardown or stop failures;
    /// `Error::sandbox_id` then names the stopped sandbox.
    ///
    /// `cancel` is checked between stages. A stage in flight always runs to
    /// completion.
    #[cfg_attr(feature = "tracing", tracing::instrument(parent = tracing::Span::current(), skip_all, level = "Info"))]
    pub async fn run_pod_sandbox(
        &self,
        req: &RunPodSandboxRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let config = &req.config;
        let pod = config.metadata.name.as_str();
        debug!("run pod sandbox: {:?}", config.metadata);
        check_cancelled(cancel, "image pull", None)?;

        // Step 1: Pull the image for the sandbox, only if it is not present.
        let image = self.config.get_sandbox_image();
        ensure_sandbox_image(&self.engine, image).await?;
        check_cancelled(cancel, "config translation", None)?;

        // Step 2: Create the sandbox container config.
        let runtime_handler = self.runtime_classes.resolve(&req.runtime_handler)?;
        let create_config = make_sandbox_config(config, image, &runtime_handler)?;
        check_cancelled(cancel, "create", None)?;

        // Step 3: Create the sandbox container.
        let id = match self.engine.create_container(&create_config).await {
            Ok(id) => id,
            Err(err) => {
                let resolution =
                    recover_from_creation_conflict(&self.engine, &create_config, err).await;
                if let ConflictResolution::Recreated { replaced, .. } = &resolution {
                    self.forget_replaced_sandbox(replaced).await;
                }
                resolution
                    .into_result()
                    .map_err(|source| Error::SandboxCreate {
                        pod: pod.to_string(),
                        source,
                    })?
            }
        };
        info!("created sandbox container {id} for pod {pod:?}");
        self.network_ready.set(&id, false);
        check_cancelled(cancel, "checkpoint", Some(&id))?;

        // Step 4: Checkpoint the sandbox. Must happen before it starts.
        self.checkpoints
            .create_checkpoint(&id, &SandboxCheckpoint::from_config(config))
            .await
            .map_err(|source| Error::Checkpoint {
                sandbox_id: id.clone(),
                source,
            })?;
        check_cancelled(cancel, "start", Some(&id))?;

        // Step 5: Start the sandbox container.
        self.engine
            .start_container(&id)
            .await
            .map_err(|source| Error::SandboxStart {
                pod: pod.to_string(),
                sandbox_id: id.clone(),
                source,
            })?;
        info!("started sandbox container {id} for pod {pod:?}");

        // Step 6: Rewrite the engine generated resolv.conf.
        if let Some(dns) = &config.dns_config {
            check_cancelled(cancel, "resolv.conf rewrite", Some(&id))?;
            self.rewrite_resolv_conf(&id, pod, dns).await?;
        }

        // Host network pods are not handled by the network plugin.
        if config.host_network() {
            info!("sandbox {id} uses host network, skipping network setup");
            return Ok(id);
        }
        check_cancelled(cancel, "network setup", Some(&id))?;

        // Step 7: Set up networking for the sandbox.
        self.set_up_network(&id, config, cancel).await?;
        self.network_ready.set(&id, true);
        info!("sandbox {id} for pod {pod:?} is ready");
        Ok(id)
    }

    /// Drop the state kept for a container the conflict resolver removed.
    async fn forget_replaced_sandbox(&self, id: &str) {
        self.network_ready.delete(id);
        if let Err(err) = self.checkpoints.remove_checkpoint(id).await {
            warn!("failed to remove checkpoint of replaced sandbox {id}: {err}");
        }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(parent = tracing::Span::current(), skip_all, level = "Info"))]
    async fn rewrite_resolv_conf(&self, id: &str, pod: &str, dns: &DnsConfig) -> Result<()> {
        let res = async {
            let info = self
                .engine
                .inspect_container(id)
                .await
                .map_err(|err| anyhow::anyhow!("failed to inspect sandbox container: {err}"))?;
            rewrite_resolv_file(&info.resolv_conf_path, dns).await
        }
        .await;

        res.map_err(|source| Error::ResolvConf {
            pod: pod.to_string(),
            sandbox_id: id.to_string(),
            source,
        })
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(parent = tracing::Span::current(), skip_all, level = "Info"))]
    async fn set_up_network(
        &self,
        id: &str,
        config: &PodSandboxConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let meta = &config.metadata;
        let cid = ContainerId::new(&self.config.runtime_name, id);

        let res = async {
            let mut options = HashMap::new();
            if let Some(dns) = &config.dns_config {
                options.insert(NET_PLUGIN_DNS_OPTION.to_string(), serde_json::to_string(dns)?);
            }
            self.network
                .set_up_pod(
                    &meta.namespace,
                    &meta.name,
                    &cid,
                    &config.annotations,
                    &options,
                )
                .await
        }
        .await;

        let cause = match res {
            Ok(()) if !cancel.is_cancelled() => return Ok(()),
            Ok(()) => Error::Cancelled {
                stage: "marking the sandbox network ready",
                sandbox_id: Some(id.to_string()),
            },
            Err(source) => Error::NetworkSetup {
                pod: meta.name.clone(),
                sandbox_id: id.to_string(),
                source,
            },
        };
        warn!("{cause}, cleaning up sandbox {id}");
        Err(self.compensate(id, config, &cid, cause).await)
    }

    /// Undo a failed network setup. Every step runs even when an earlier one
    /// fails, and every failure is kept.
    async fn compensate(
        &self,
        id: &str,
        config: &PodSandboxConfig,
        cid: &ContainerId,
        cause: Error,
    ) -> Error {
        let meta = &config.metadata;
        let mut errors = AggregateError::new();
        errors.push(cause);

        // The plugin may have allocated resources before it failed.
        if let Err(source) = self
            .network
            .tear_down_pod(&meta.namespace, &meta.name, cid)
            .await
        {
            let err = Error::NetworkTeardown {
                pod: meta.name.clone(),
                sandbox_id: id.to_string(),
                source,
            };
            warn!("{err}");
            errors.push(err);
        }

        if let Err(source) = self
            .engine
            .stop_container(id, self.config.get_stop_grace_period())
            .await
        {
            let err = Error::SandboxStop {
                pod: meta.name.clone(),
                sandbox_id: id.to_string(),
                source,
            };
            warn!("{err}");
            errors.push(err);
        }

        Error::Aggregate {
            sandbox_id: id.to_string(),
            errors,
        }
    }
}

fn check_cancelled(cancel: &CancellationToken, stage: &'static str, id: Option<&str>) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled {
            stage,
            sandbox_id: id.map(ToString::to_string),
        });
    }
    Ok(())
}
