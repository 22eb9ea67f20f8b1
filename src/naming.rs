//! Deterministic names for managed engine objects
//!
//! Every image and volume grocker creates is named from the tool version
//! and a content hash of the resolved configuration. Equivalent
//! configurations resolve to the same names on any machine, which is what
//! turns the registry into a shared build cache: a config change produces
//! a different name, so no explicit invalidation is ever needed.

use crate::config::Config;
use crate::error::GrockerResult;
use crate::release::Release;
use sha2::{Digest, Sha256};

/// grocker's own version, written into names and labels
pub const GROCKER_VERSION: &str = env!("CARGO_PKG_VERSION");

// ASCII separator bytes keep the hashed encoding unambiguous without
// depending on any human-readable delimiter appearing in the data.
const GROUP_SEPARATOR: u8 = 0x1D;
const RECORD_SEPARATOR: u8 = 0x1E;
const UNIT_SEPARATOR: u8 = 0x1F;

/// Role of a managed engine object, written to its `grocker.image.role` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    Compiler,
    WheelServer,
    Runner,
    Wheel,
}

impl Role {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Compiler => "compiler",
            Self::WheelServer => "wheel-server",
            Self::Runner => "runner",
            Self::Wheel => "wheel",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Hash the configuration content into a cache key.
///
/// Covers the full dependency set (run and build, runtime-declared and
/// project-declared) and the repository definitions. Unit lists are sorted
/// before hashing so input order never changes the identifier.
pub fn config_identifier(config: &Config) -> GrockerResult<String> {
    fn unit_list(items: impl IntoIterator<Item = String>) -> Vec<u8> {
        let mut units: Vec<Vec<u8>> = items.into_iter().map(String::into_bytes).collect();
        units.sort();
        units.join(&UNIT_SEPARATOR)
    }

    let dependencies = unit_list(config.system_dependencies(true)?);

    let repositories: Vec<Vec<u8>> = config
        .repositories
        .iter()
        .map(|(name, repository)| {
            // field values in field-name order: key, uri
            unit_list([
                name.clone(),
                repository.key.clone(),
                repository.uri.clone(),
            ])
        })
        .collect();
    let repositories = repositories.join(&RECORD_SEPARATOR);

    let data = [dependencies, repositories].join(&GROUP_SEPARATOR);
    Ok(hex::encode(Sha256::digest(&data)))
}

/// Name of a prerequisite image for `role`.
///
/// Root and compiler images embed the config hash; the wheel-server image
/// has no config-dependent content and is tagged by tool version alone.
pub fn image_name(config: &Config, role: Role) -> GrockerResult<String> {
    let name = match role {
        Role::WheelServer => format!("grocker-{}:{}", role, GROCKER_VERSION),
        _ => format!(
            "grocker-{}-{}:{}-{}",
            config.runtime.replace('/', "-"),
            role,
            GROCKER_VERSION,
            config_identifier(config)?,
        ),
    };
    Ok(prefixed(config, &name))
}

/// Name of the wheel cache volume shared by equivalent configurations
pub fn wheel_volume_name(config: &Config) -> GrockerResult<String> {
    Ok(format!(
        "grocker-wheel-cache-{}-{}-{}",
        GROCKER_VERSION,
        config.runtime.replace('/', "-"),
        config_identifier(config)?,
    ))
}

/// Default name for the runner image when the user gives none:
/// `{prefix/}{base}:{version}` where `base` is the configured
/// `image_base_name`, else the project name suffixed with its extras.
pub fn default_image_name(config: &Config, release: &Release) -> String {
    let base = match &config.image_base_name {
        Some(name) if !name.is_empty() => name.clone(),
        _ if !release.extras.is_empty() => {
            format!("{}-{}", release.name, release.extras.join("-"))
        }
        _ => release.name.clone(),
    };
    prefixed(config, &format!("{}:{}", base, release.version))
}

/// An image name is "prefixed" when it carries a registry/namespace
/// separator before the tag colon; prefixed names are pulled and pushed.
pub fn is_prefixed_image(name: &str) -> bool {
    name.split(':').next().is_some_and(|repo| repo.contains('/'))
}

fn prefixed(config: &Config, name: &str) -> String {
    match &config.docker_image_prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{name}"),
        _ => name.to_string(),
    }
}
