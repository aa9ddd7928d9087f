//! Recovery from a sandbox creation that collides with a container left
//! behind by an earlier, incomplete attempt of the same request.

use rand::Rng as _;

use crate::sandbox::builder::{POD_UID_LABEL, SANDBOX_ATTEMPT_LABEL, SandboxCreationConfig};
use crate::sandbox::engine::{ContainerState, Engine};
use crate::sandbox::error::EngineError;

/// Outcome of inspecting a failed create call.
#[derive(Debug)]
pub enum ConflictResolution {
    /// The failure was not a name conflict; carries the original error
    NotAConflict(EngineError),
    /// The conflicting container is this sandbox from an earlier attempt and
    /// was never started, so it is used as is
    ResolvedToExisting(String),
    /// The conflicting container `replaced` was removed, or found already
    /// gone, and the sandbox was created again as `id`
    Recreated { id: String, replaced: String },
    /// The conflict could not be cleared
    ResolutionFailed(EngineError),
}

impl ConflictResolution {
    /// Sandbox ID when the conflict was resolved, otherwise the error to report.
    pub fn into_result(self) -> Result<String, EngineError> {
        match self {
            Self::ResolvedToExisting(id) | Self::Recreated { id, .. } => Ok(id),
            Self::NotAConflict(err) | Self::ResolutionFailed(err) => Err(err),
        }
    }
}

/// Inspect `err`, returned by creating `config`, and clear the conflict if it
/// is one.
pub async fn recover_from_creation_conflict(
    engine: &impl Engine,
    config: &SandboxCreationConfig,
    err: EngineError,
) -> ConflictResolution {
    let EngineError::Conflict { existing_id, .. } = &err else {
        return ConflictResolution::NotAConflict(err);
    };
    let existing_id = existing_id.clone();

    log::info!(
        "unable to create pod sandbox {} due to conflict with container {existing_id}",
        config.name
    );

    match engine.inspect_container(&existing_id).await {
        Ok(info) if info.state == ContainerState::Created && same_sandbox(config, &info.labels) => {
            log::info!("reusing sandbox container {existing_id} created by a previous attempt");
            return ConflictResolution::ResolvedToExisting(info.id);
        }
        Ok(_) | Err(EngineError::NotFound(_)) => {}
        Err(inspect_err) => {
            log::warn!("failed to inspect conflicting container {existing_id}: {inspect_err}");
        }
    }

    let config = match engine.remove_container(&existing_id).await {
        Ok(()) => {
            log::info!("removed conflicting container {existing_id}");
            config.clone()
        }
        Err(EngineError::NotFound(_)) => {
            // The name is still reserved by a container the engine no longer
            // knows about. Only a new name can get past it.
            let mut config = config.clone();
            config.name = randomize_name(&config.name);
            log::info!(
                "conflicting container {existing_id} is gone, creating sandbox as {}",
                config.name
            );
            config
        }
        Err(rm_err) => {
            log::error!("failed to remove the conflicting container {existing_id}: {rm_err}");
            return ConflictResolution::ResolutionFailed(err);
        }
    };

    match engine.create_container(&config).await {
        Ok(id) => ConflictResolution::Recreated {
            id,
            replaced: existing_id,
        },
        Err(err) => ConflictResolution::ResolutionFailed(err),
    }
}

fn same_sandbox(
    config: &SandboxCreationConfig,
    labels: &std::collections::HashMap<String, String>,
) -> bool {
    [POD_UID_LABEL, SANDBOX_ATTEMPT_LABEL]
        .iter()
        .all(|key| config.labels.get(*key).is_some() && config.labels.get(*key) == labels.get(*key))
}

fn randomize_name(name: &str) -> String {
    let suffix: u32 = rand::rng().random();
    format!("{name}_{suffix:08x}")
}
