use crate::sandbox::engine::Engine;
use crate::sandbox::error::EngineError;
use crate::sandbox::{Error, Result};

/// Make sure `image` is present in the engine, pulling it only when it is
/// missing. Credentials for private registries are the node's concern.
pub async fn ensure_sandbox_image(engine: &impl Engine, image: &str) -> Result<()> {
    match engine.inspect_image(image).await {
        Ok(info) => {
            log::debug!("sandbox image {image} is present: {}", info.id);
            return Ok(());
        }
        Err(EngineError::NotFound(_)) => {}
        Err(source) => {
            return Err(Error::ImagePull {
                image: image.to_string(),
                source,
            });
        }
    }

    log::info!("pulling sandbox image {image}");
    engine
        .pull_image(image)
        .await
        .map_err(|source| Error::ImagePull {
            image: image.to_string(),
            source,
        })?;
    log::info!("pulled sandbox image {image}");
    Ok(())
}
