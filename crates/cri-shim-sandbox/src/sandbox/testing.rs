//! In-memory collaborators for tests.
//! Every fake appends the operations it receives to a [`CallLog`], which can be
//! shared between fakes to check the order of calls across collaborators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::sandbox::builder::SandboxCreationConfig;
use crate::sandbox::checkpoint::{CheckpointStore, SandboxCheckpoint};
use crate::sandbox::engine::{ContainerInfo, ContainerState, Engine, ImageInfo};
use crate::sandbox::error::{CheckpointError, EngineError};
use crate::sandbox::network::{ContainerId, NetworkPlugin};

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }
}

#[derive(Default)]
struct Failures(HashMap<String, (EngineError, bool)>);

impl Failures {
    fn check(&mut self, op: &str) -> Result<(), EngineError> {
        let Some((err, once)) = self.0.get(op) else {
            return Ok(());
        };
        let err = err.clone();
        if *once {
            self.0.remove(op);
        }
        Err(err)
    }
}

#[derive(Default)]
struct EngineState {
    images: HashSet<String>,
    containers: HashMap<String, ContainerInfo>,
    ids: VecDeque<String>,
    next_id: u32,
    resolv_conf_path: PathBuf,
    failures: Failures,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
    log: CallLog,
}

impl FakeEngine {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn add_image(&self, image: &str) {
        self.state.lock().unwrap().images.insert(image.to_string());
    }

    pub fn add_container(&self, info: ContainerInfo) {
        let mut state = self.state.lock().unwrap();
        state.containers.insert(info.id.clone(), info);
    }

    pub fn container(&self, id: &str) -> Option<ContainerInfo> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    /// IDs handed out by `create_container`, in order.
    pub fn set_ids<I: IntoIterator<Item = S>, S: Into<String>>(&self, ids: I) {
        self.state.lock().unwrap().ids = ids.into_iter().map(Into::into).collect();
    }

    pub fn set_resolv_conf_path(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().resolv_conf_path = path.into();
    }

    /// Make every call to `op` fail with `err`.
    pub fn fail_on(&self, op: &str, err: EngineError) {
        let mut state = self.state.lock().unwrap();
        state.failures.0.insert(op.to_string(), (err, false));
    }

    /// Make the next call to `op` fail with `err`.
    pub fn fail_once(&self, op: &str, err: EngineError) {
        let mut state = self.state.lock().unwrap();
        state.failures.0.insert(op.to_string(), (err, true));
    }
}

impl Engine for FakeEngine {
    async fn inspect_image(&self, image: &str) -> Result<ImageInfo, EngineError> {
        self.log.push(format!("inspect_image {image}"));
        let mut state = self.state.lock().unwrap();
        state.failures.check("inspect_image")?;
        if !state.images.contains(image) {
            return Err(EngineError::NotFound(image.to_string()));
        }
        Ok(ImageInfo {
            id: format!("sha256:{image}"),
        })
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        self.log.push(format!("pull_image {image}"));
        let mut state = self.state.lock().unwrap();
        state.failures.check("pull_image")?;
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(
        &self,
        config: &SandboxCreationConfig,
    ) -> Result<String, EngineError> {
        self.log.push(format!("create_container {}", config.name));
        let mut state = self.state.lock().unwrap();
        state.failures.check("create_container")?;
        if let Some(existing) = state.containers.values().find(|c| c.name == config.name) {
            return Err(EngineError::Conflict {
                name: config.name.clone(),
                existing_id: existing.id.clone(),
            });
        }
        let id = match state.ids.pop_front() {
            Some(id) => id,
            None => {
                state.next_id += 1;
                format!("c{}", state.next_id)
            }
        };
        let info = ContainerInfo {
            id: id.clone(),
            name: config.name.clone(),
            labels: config.labels.clone(),
            state: ContainerState::Created,
            resolv_conf_path: state.resolv_conf_path.clone(),
        };
        state.containers.insert(id.clone(), info);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.log.push(format!("start_container {id}"));
        let mut state = self.state.lock().unwrap();
        state.failures.check("start_container")?;
        let c = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        c.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace_period: Duration) -> Result<(), EngineError> {
        self.log
            .push(format!("stop_container {id} {}s", grace_period.as_secs()));
        let mut state = self.state.lock().unwrap();
        state.failures.check("stop_container")?;
        let c = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        c.state = ContainerState::Exited;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, EngineError> {
        self.log.push(format!("inspect_container {id}"));
        let mut state = self.state.lock().unwrap();
        state.failures.check("inspect_container")?;
        state
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.log.push(format!("remove_container {id}"));
        let mut state = self.state.lock().unwrap();
        state.failures.check("remove_container")?;
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }
}

#[derive(Default)]
struct NetworkState {
    set_up_error: Option<String>,
    tear_down_error: Option<String>,
    cancel_on_set_up: Option<CancellationToken>,
    options: Vec<HashMap<String, String>>,
    annotations: Vec<HashMap<String, String>>,
}

#[derive(Clone, Default)]
pub struct FakeNetwork {
    state: Arc<Mutex<NetworkState>>,
    log: CallLog,
}

impl FakeNetwork {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn fail_set_up(&self, msg: &str) {
        self.state.lock().unwrap().set_up_error = Some(msg.to_string());
    }

    pub fn fail_tear_down(&self, msg: &str) {
        self.state.lock().unwrap().tear_down_error = Some(msg.to_string());
    }

    /// Cancel `token` while `set_up_pod` is running.
    pub fn cancel_on_set_up(&self, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_set_up = Some(token);
    }

    /// Options passed to each `set_up_pod` call.
    pub fn options(&self) -> Vec<HashMap<String, String>> {
        self.state.lock().unwrap().options.clone()
    }

    pub fn annotations(&self) -> Vec<HashMap<String, String>> {
        self.state.lock().unwrap().annotations.clone()
    }
}

impl NetworkPlugin for FakeNetwork {
    async fn set_up_pod(
        &self,
        namespace: &str,
        name: &str,
        id: &ContainerId,
        annotations: &HashMap<String, String>,
        options: &HashMap<String, String>,
    ) -> anyhow::Result<()> {
        self.log.push(format!("set_up_pod {namespace}/{name} {id}"));
        let mut state = self.state.lock().unwrap();
        state.options.push(options.clone());
        state.annotations.push(annotations.clone());
        if let Some(token) = &state.cancel_on_set_up {
            token.cancel();
        }
        match &state.set_up_error {
            Some(msg) => Err(anyhow::anyhow!("{msg}")),
            None => Ok(()),
        }
    }

    async fn tear_down_pod(
        &self,
        namespace: &str,
        name: &str,
        id: &ContainerId,
    ) -> anyhow::Result<()> {
        self.log
            .push(format!("tear_down_pod {namespace}/{name} {id}"));
        match &self.state.lock().unwrap().tear_down_error {
            Some(msg) => Err(anyhow::anyhow!("{msg}")),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct CheckpointState {
    checkpoints: HashMap<String, SandboxCheckpoint>,
    fail: bool,
    cancel_on_create: Option<CancellationToken>,
}

#[derive(Clone, Default)]
pub struct FakeCheckpointStore {
    state: Arc<Mutex<CheckpointState>>,
    log: CallLog,
}

impl FakeCheckpointStore {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn fail(&self) {
        self.state.lock().unwrap().fail = true;
    }

    /// Cancel `token` while `create_checkpoint` is running.
    pub fn cancel_on_create(&self, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_create = Some(token);
    }

    pub fn insert(&self, id: &str, checkpoint: SandboxCheckpoint) {
        let mut state = self.state.lock().unwrap();
        state.checkpoints.insert(id.to_string(), checkpoint);
    }

    pub fn get(&self, id: &str) -> Option<SandboxCheckpoint> {
        self.state.lock().unwrap().checkpoints.get(id).cloned()
    }
}

impl CheckpointStore for FakeCheckpointStore {
    async fn create_checkpoint(
        &self,
        id: &str,
        checkpoint: &SandboxCheckpoint,
    ) -> Result<(), CheckpointError> {
        self.log.push(format!("create_checkpoint {id}"));
        let mut state = self.state.lock().unwrap();
        if let Some(token) = &state.cancel_on_create {
            token.cancel();
        }
        if state.fail {
            return Err(CheckpointError::Io(std::io::Error::other("disk full")));
        }
        state.checkpoints.insert(id.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn get_checkpoint(&self, id: &str) -> Result<SandboxCheckpoint, CheckpointError> {
        self.get(id)
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))
    }

    async fn remove_checkpoint(&self, id: &str) -> Result<(), CheckpointError> {
        self.log.push(format!("remove_checkpoint {id}"));
        self.state.lock().unwrap().checkpoints.remove(id);
        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .checkpoints
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
