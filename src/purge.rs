//! Garbage collection of managed engine objects
//!
//! Purge only ever touches objects carrying grocker's labels; anything
//! unlabeled is invisible here. Candidates are selected by comparing the
//! recorded tool-version label against the running version (semantic
//! comparison, not string order). Removal is best-effort per object:
//! one stubborn object never aborts the rest of the pass.

use crate::engine::{labels, ContainerEngine, EngineObject};
use crate::error::GrockerResult;
use crate::naming::GROCKER_VERSION;
use semver::Version;
use tracing::{error, info};

/// What one purge invocation removes
#[derive(Debug, Clone, Default)]
pub struct PurgeOptions {
    pub containers: bool,
    pub volumes: bool,
    pub images: bool,
    /// Also remove objects created by the running version
    pub current_version_too: bool,
    /// Also remove final application images (protected by default)
    pub include_runners: bool,
}

/// Summary of a purge pass
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub removed: usize,
    pub failed: usize,
}

/// Remove stale grocker containers, volumes and images.
pub async fn purge(
    engine: &dyn ContainerEngine,
    options: &PurgeOptions,
) -> GrockerResult<PurgeReport> {
    let current = Version::parse(GROCKER_VERSION)
        .expect("crate version is valid semver");
    let mut report = PurgeReport::default();

    if options.containers {
        // only exited containers; a runner container may be a live application
        let containers = engine.list_containers(labels::VERSION, true).await?;
        for container in &containers {
            if !is_version_candidate(container, &current, options.current_version_too) {
                continue;
            }
            if container.label(labels::ROLE) == Some("runner") {
                continue;
            }
            info!("Removing container {}...", display_name(container));
            record(&mut report, engine.remove_container(&container.id).await);
        }
    }

    if options.volumes {
        let mut volumes = engine.list_volumes(labels::VERSION).await?;
        // old grocker generations labeled volumes with a bare marker
        for legacy in engine.list_volumes(labels::LEGACY).await? {
            if !volumes.iter().any(|v| v.id == legacy.id) {
                volumes.push(legacy);
            }
        }
        for volume in &volumes {
            if !is_version_candidate(volume, &current, options.current_version_too) {
                continue;
            }
            info!("Removing volume {}...", display_name(volume));
            record(&mut report, engine.remove_volume(&volume.id).await);
        }
    }

    if options.images {
        let images = engine.list_images(labels::VERSION).await?;
        for image in &images {
            if !is_version_candidate(image, &current, options.current_version_too) {
                continue;
            }
            // final application images are the product, not build waste
            if !options.include_runners && image.label(labels::ROLE) == Some("runner") {
                continue;
            }
            if image.names.is_empty() {
                info!("Removing image {}...", image.id);
                record(&mut report, engine.remove_image(&image.id).await);
            } else {
                for tag in &image.names {
                    info!("Removing image {}...", tag);
                    record(&mut report, engine.remove_image(tag).await);
                }
            }
        }
    }

    Ok(report)
}

/// An object qualifies when everything is being purged, or when its
/// recorded version is older than the running tool. Labels that do not
/// parse come from generations predating semantic labels: treat as older.
fn is_version_candidate(object: &EngineObject, current: &Version, current_too: bool) -> bool {
    if current_too {
        return true;
    }
    match object.label(labels::VERSION).map(Version::parse) {
        Some(Ok(version)) => version < *current,
        _ => true,
    }
}

fn display_name(object: &EngineObject) -> &str {
    object
        .names
        .first()
        .map(String::as_str)
        .unwrap_or(object.id.as_str())
}

fn record(report: &mut PurgeReport, result: GrockerResult<()>) {
    match result {
        Ok(()) => report.removed += 1,
        Err(err) => {
            error!("{}", err);
            report.failed += 1;
        }
    }
}
