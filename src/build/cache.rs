//! Image cache resolution
//!
//! One deterministic policy decides between reuse and build, keyed purely
//! by the content-derived image name: local store, then registry (for
//! prefixed names), then a local build followed by a push so other
//! machines hit the registry next time. A config change produces a
//! different name, so there is no cache to invalidate.
//!
//! Concurrent invocations racing on the same name may both build and both
//! push; the registry's last-write-wins is accepted (no distributed lock).

use crate::engine::ContainerEngine;
use crate::error::GrockerResult;
use crate::naming::is_prefixed_image;
use std::future::Future;
use tracing::debug;

/// Return the image called `name`, building it only when neither the
/// local store nor the registry has it.
///
/// `builder` must leave a local image tagged `name` behind on success.
pub async fn get_or_build_image<F, Fut>(
    engine: &dyn ContainerEngine,
    name: &str,
    builder: F,
) -> GrockerResult<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = GrockerResult<()>>,
{
    if engine.image_exists(name).await? {
        debug!("Image {} found locally", name);
        return Ok(name.to_string());
    }

    if is_prefixed_image(name) {
        match engine.pull_image(name).await {
            Ok(()) => return Ok(name.to_string()),
            Err(err) if err.is_not_found() => {
                debug!("Image {} not in registry, building", name);
            }
            Err(err) => return Err(err),
        }
    }

    builder().await?;

    if is_prefixed_image(name) {
        engine.push_image(name).await?;
    }

    Ok(name.to_string())
}
