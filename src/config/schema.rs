//! Configuration schema for grocker
//!
//! The resolved configuration is immutable for the rest of the invocation:
//! stages receive it by reference and never write back.

use crate::error::{GrockerError, GrockerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration, resolved from defaults, project files and CLI overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key into the `runtimes` table
    pub runtime: String,

    /// Console script started by the runner image entrypoint
    pub entrypoint_name: String,

    /// Project system dependencies
    pub dependencies: DependencySet,

    /// Extra package repositories baked into the root image
    pub repositories: BTreeMap<String, Repository>,

    /// Volumes declared on the runner image
    pub volumes: Vec<String>,

    /// TCP ports exposed by the runner image
    pub ports: Vec<u16>,

    /// Environment variables baked into the runner image
    pub envs: BTreeMap<String, String>,

    /// Optional pip constraint file
    pub pip_constraint: Option<PathBuf>,

    /// Registry (or registry/account) prefix for pull/push
    pub docker_image_prefix: Option<String>,

    /// Override for the runner image base name
    pub image_base_name: Option<String>,

    /// Registered runtimes
    pub runtimes: BTreeMap<String, RuntimeSpec>,

    /// Keys grocker does not interpret are preserved, not dropped
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// System dependencies, split by when they are needed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySet {
    /// Needed at application runtime
    pub run: Vec<String>,

    /// Needed only while compiling wheels
    pub build: Vec<String>,
}

/// An extra package repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Repository {
    /// Apt source line
    pub uri: String,

    /// Armored signing key
    pub key: String,
}

/// A registered runtime: interpreter paired with a base OS image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSpec {
    /// Base OS image for the root stage
    pub image: String,

    /// Interpreter executable inside the image
    pub runtime: String,

    /// System dependencies every image of this runtime needs
    pub dependencies: DependencySet,
}

impl Config {
    /// Look up the selected runtime, surfacing `UnknownRuntime` at point of use
    pub fn runtime_spec(&self) -> GrockerResult<&RuntimeSpec> {
        self.runtimes
            .get(&self.runtime)
            .ok_or_else(|| GrockerError::UnknownRuntime(self.runtime.clone()))
    }

    /// Full system dependency list: runtime-declared then project-declared.
    ///
    /// Build dependencies are only needed inside the compiler image.
    pub fn system_dependencies(&self, with_build: bool) -> GrockerResult<Vec<String>> {
        let runtime = self.runtime_spec()?;

        let mut dependencies = runtime.dependencies.run.clone();
        dependencies.extend(self.dependencies.run.iter().cloned());

        if with_build {
            dependencies.extend(runtime.dependencies.build.iter().cloned());
            dependencies.extend(self.dependencies.build.iter().cloned());
        }

        Ok(dependencies)
    }
}
