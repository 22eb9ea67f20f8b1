//! Image build orchestration
//!
//! The stage builders prepare contexts and drive the engine; the cache
//! resolver in [`cache`] decides whether a stage runs at all. Prerequisite
//! images resolve through their content-derived names, so a second build
//! with the same configuration is a no-op at every level.

pub mod cache;
pub mod context;
pub mod server;
pub mod stages;
pub mod wheels;

pub use cache::get_or_build_image;
pub use context::BuildContext;
pub use stages::build_runner_image;
pub use wheels::{compile_wheels, PipConf};

use crate::config::Config;
use crate::engine::ContainerEngine;
use crate::error::GrockerResult;
use crate::naming::{image_name, Role};

/// Resolve the root image, building it only on a full cache miss.
pub async fn get_or_build_root_image(
    engine: &dyn ContainerEngine,
    config: &Config,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> GrockerResult<String> {
    get_or_build_image(engine, &image_name(config, Role::Root)?, || {
        stages::build_root_image(engine, config, on_output)
    })
    .await
}

/// Resolve the compiler image; the root image is resolved first since the
/// compiler builds on top of it.
pub async fn get_or_build_compiler_image(
    engine: &dyn ContainerEngine,
    config: &Config,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> GrockerResult<String> {
    get_or_build_root_image(engine, config, on_output).await?;
    get_or_build_image(engine, &image_name(config, Role::Compiler)?, || {
        stages::build_compiler_image(engine, config, on_output)
    })
    .await
}
