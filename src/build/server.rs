//! Ephemeral wheel server
//!
//! The runner-image build fetches compiled wheels over plain HTTP from a
//! short-lived container serving the cache volume read-only. The server
//! lives exactly as long as the caller's scope; its removal is
//! best-effort and never masks the caller's own result.

use crate::build::cache::get_or_build_image;
use crate::build::stages::build_wheel_server_image;
use crate::config::Config;
use crate::engine::{ContainerEngine, RunRequest, VolumeMount};
use crate::error::{GrockerError, GrockerResult};
use crate::naming::{image_name, wheel_volume_name, Role};
use crate::retry::{retry, DEFAULT_DELAY, DEFAULT_TRIES};
use std::future::Future;
use tracing::{debug, info, warn};

/// Mount point of the wheel cache inside the server container
const WHEELS_MOUNT: &str = "/wheels";

/// Run `body` with a wheel server container up, passing it the server's
/// network address for use as a build argument.
///
/// The container is force-removed on every exit path; removal is retried
/// a bounded number of times and a final failure is logged, not raised.
pub async fn with_wheel_server<T, F, Fut>(
    engine: &dyn ContainerEngine,
    config: &Config,
    on_output: &(dyn Fn(String) + Send + Sync),
    body: F,
) -> GrockerResult<T>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = GrockerResult<T>>,
{
    let image = get_or_build_image(engine, &image_name(config, Role::WheelServer)?, || {
        build_wheel_server_image(engine, config, on_output)
    })
    .await?;

    let mut request = RunRequest::new(image, Role::WheelServer);
    request
        .volumes
        .push(VolumeMount::read_only(wheel_volume_name(config)?, WHEELS_MOUNT));

    let container_id = engine.start_container(&request).await?;
    info!("Wheel server container started: {}", container_id);

    // the engine can take a moment to assign the address
    let address = retry(
        DEFAULT_TRIES,
        DEFAULT_DELAY,
        || engine.container_ip(&container_id),
        |err| matches!(err, GrockerError::ContainerAddress(_)),
    )
    .await;

    let result = match address {
        Ok(server_ip) => {
            debug!("Wheel server listening on {}", server_ip);
            body(server_ip).await
        }
        Err(err) => Err(err),
    };

    let removal = retry(
        DEFAULT_TRIES,
        DEFAULT_DELAY,
        || engine.remove_container(&container_id),
        |_| true,
    )
    .await;
    if let Err(err) = removal {
        warn!(
            "Could not remove wheel server container {}: {}",
            container_id, err
        );
    }

    result
}
