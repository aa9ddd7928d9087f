use std::collections::HashMap;
use std::sync::RwLock;

/// Per-sandbox "network is usable" flag.
///
/// Provisioning records `false` as soon as the sandbox container exists and
/// `true` once the pod network is up. Status queries read it; sandbox
/// teardown deletes it. A missing entry means not ready.
pub trait NetworkReadiness: Send + Sync {
    fn get(&self, id: &str) -> Option<bool>;
    fn set(&self, id: &str, ready: bool);
    fn delete(&self, id: &str);
}

#[derive(Debug, Default)]
pub struct NetworkReadyStore {
    ready: RwLock<HashMap<String, bool>>,
}

impl NetworkReadyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ready.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.read().unwrap().is_empty()
    }
}

impl NetworkReadiness for NetworkReadyStore {
    fn get(&self, id: &str) -> Option<bool> {
        self.ready.read().unwrap().get(id).copied()
    }

    fn set(&self, id: &str, ready: bool) {
        self.ready.write().unwrap().insert(id.to_string(), ready);
    }

    fn delete(&self, id: &str) {
        self.ready.write().unwrap().remove(id);
    }
}
