//! Container engine client
//!
//! Grocker consumes the container engine through the narrow
//! [`ContainerEngine`] trait; the production implementation drives the
//! `docker` CLI ([`docker::DockerCli`]). Everything above this module is
//! engine-agnostic, which is also what makes the orchestration testable
//! with an in-memory stub.

pub mod docker;

pub use docker::DockerCli;

use crate::error::GrockerResult;
use crate::naming::{Role, GROCKER_VERSION};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Label keys written to every managed engine object
pub mod labels {
    /// Tool version that created the object
    pub const VERSION: &str = "grocker.version";
    /// What the object is for (root/compiler/wheel-server/runner/wheel)
    pub const ROLE: &str = "grocker.image.role";
    /// Runtime a wheel cache volume was compiled for
    pub const RUNTIME: &str = "grocker.runtime";
    /// Config identifier a wheel cache volume is keyed by
    pub const CONFIG_HASH: &str = "grocker.config.hash";
    /// Bare marker label written by old grocker generations to volumes
    pub const LEGACY: &str = "grocker";
}

/// The label set every managed object starts from
pub fn base_labels(role: Role) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::VERSION.to_string(), GROCKER_VERSION.to_string()),
        (labels::ROLE.to_string(), role.as_label().to_string()),
    ])
}

/// An image build to submit to the engine
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Prepared build context directory
    pub context_dir: PathBuf,
    /// Tag for the resulting image
    pub tag: String,
    /// `--build-arg` values
    pub build_args: BTreeMap<String, String>,
    /// Labels stamped on the image
    pub labels: BTreeMap<String, String>,
    /// Ask the engine to refresh the base image first
    pub pull: bool,
    /// Disable the engine layer cache (runner builds)
    pub no_cache: bool,
}

impl BuildRequest {
    pub fn new(context_dir: PathBuf, tag: impl Into<String>, role: Role) -> Self {
        Self {
            context_dir,
            tag: tag.into(),
            build_args: BTreeMap::new(),
            labels: base_labels(role),
            pull: false,
            no_cache: false,
        }
    }
}

/// A volume attached to a container
#[derive(Debug, Clone)]
pub struct VolumeMount {
    /// Volume name or host path
    pub source: String,
    /// Mount point inside the container
    pub target: String,
    /// Consumers that must not mutate shared state mount read-only
    pub read_only: bool,
}

impl VolumeMount {
    pub fn read_write(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }

    /// The `-v` argument form (`source:target[:ro]`)
    pub fn as_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// A container to run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub image: String,
    pub command: Vec<String>,
    pub volumes: Vec<VolumeMount>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl RunRequest {
    pub fn new(image: impl Into<String>, role: Role) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            volumes: Vec::new(),
            env: BTreeMap::new(),
            labels: base_labels(role),
        }
    }
}

/// A managed object reported by the engine
#[derive(Debug, Clone)]
pub struct EngineObject {
    /// Engine identifier (image/container id, volume name)
    pub id: String,
    /// Display names: repo tags, container name, volume name
    pub names: Vec<String>,
    /// Labels recorded on the object
    pub labels: HashMap<String, String>,
}

impl EngineObject {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Narrow engine interface consumed by the build orchestration.
///
/// Every call is blocking from the orchestrator's point of view. "Not
/// found" answers that drive cache-miss fallthrough are reported as
/// `GrockerError::ImageNotFound`, not as success.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Reported engine API version
    async fn api_version(&self) -> GrockerResult<String>;

    /// Whether an image with this exact name exists locally
    async fn image_exists(&self, name: &str) -> GrockerResult<bool>;

    /// Build an image, streaming output lines to `on_output`
    async fn build_image(
        &self,
        request: &BuildRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> GrockerResult<()>;

    /// Pull an image from its registry
    async fn pull_image(&self, name: &str) -> GrockerResult<()>;

    /// Push an image, returning the registry digest
    async fn push_image(&self, name: &str) -> GrockerResult<String>;

    /// Create a named volume if it does not already exist
    async fn ensure_volume(
        &self,
        name: &str,
        volume_labels: &BTreeMap<String, String>,
    ) -> GrockerResult<()>;

    /// Run a container to completion, streaming output; returns exit code
    async fn run_container(
        &self,
        request: &RunRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> GrockerResult<i64>;

    /// Start a detached container, returning its id
    async fn start_container(&self, request: &RunRequest) -> GrockerResult<String>;

    /// Network address the engine assigned to a running container
    async fn container_ip(&self, container_id: &str) -> GrockerResult<String>;

    /// Force-remove a container (idempotent)
    async fn remove_container(&self, container_id: &str) -> GrockerResult<()>;

    /// Images carrying `label`
    async fn list_images(&self, label: &str) -> GrockerResult<Vec<EngineObject>>;

    /// Containers carrying `label`, optionally only exited ones
    async fn list_containers(&self, label: &str, exited_only: bool)
        -> GrockerResult<Vec<EngineObject>>;

    /// Volumes carrying `label`
    async fn list_volumes(&self, label: &str) -> GrockerResult<Vec<EngineObject>>;

    /// Remove an image by tag or id (idempotent)
    async fn remove_image(&self, name: &str) -> GrockerResult<()>;

    /// Remove a volume by name (idempotent)
    async fn remove_volume(&self, name: &str) -> GrockerResult<()>;
}

/// Max number of output lines to include in build error messages.
const BUILD_ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of build output for error diagnostics.
pub(crate) fn output_tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(BUILD_ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each
/// line. Returns all collected output lines for error reporting.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let stderr = child.stderr.take().expect("stderr piped");
    let stdout = child.stdout.take().expect("stdout piped");

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut all_output = Vec::new();
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    all_output
}
