//! Configuration resolution
//!
//! A configuration is assembled once per invocation from exactly three
//! layers, in strictly increasing precedence:
//!
//! 1. the embedded default configuration shipped with grocker,
//! 2. the project file(s): the explicit `--config` paths in the given
//!    order, or the conventional `.grocker.yml` when no path is given,
//! 3. command-line overrides, applied only for keys carrying a value.
//!
//! Project layers are deep-updated onto the defaults: nested mappings merge
//! key by key, scalars and lists are replaced wholesale.

pub mod schema;

pub use schema::{Config, DependencySet, Repository, RuntimeSpec};

use crate::error::{GrockerError, GrockerResult};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration embedded in the binary
const DEFAULT_CONFIG: &str = include_str!("../../resources/grocker.yaml");

/// Conventional per-project configuration file
pub const PROJECT_CONFIG_FILE: &str = ".grocker.yml";

/// Command-line configuration overrides.
///
/// A field left `None` (or an empty list) means "no override": it never
/// erases a value coming from a lower layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub runtime: Option<String>,
    pub entrypoint_name: Option<String>,
    pub pip_constraint: Option<PathBuf>,
    pub docker_image_prefix: Option<String>,
    pub image_base_name: Option<String>,
    pub volumes: Vec<String>,
    pub ports: Vec<u16>,
}

/// Resolve the configuration for this invocation, using the current
/// directory for `.grocker.yml` discovery.
pub fn resolve(config_paths: &[PathBuf], overrides: &Overrides) -> GrockerResult<Config> {
    let cwd = std::env::current_dir().map_err(|e| GrockerError::io("getting current directory", e))?;
    resolve_in(&cwd, config_paths, overrides)
}

/// Resolve the configuration with an explicit project directory.
///
/// `.grocker.yml` in `project_dir` is consulted only when `config_paths`
/// is empty; explicit paths replace the conventional file entirely.
pub fn resolve_in(
    project_dir: &Path,
    config_paths: &[PathBuf],
    overrides: &Overrides,
) -> GrockerResult<Config> {
    let mut merged = load_embedded_defaults()?;

    let layers: Vec<PathBuf> = if config_paths.is_empty() {
        let conventional = project_dir.join(PROJECT_CONFIG_FILE);
        if conventional.is_file() {
            debug!("Using project config: {}", conventional.display());
            vec![conventional]
        } else {
            Vec::new()
        }
    } else {
        config_paths.to_vec()
    };

    for path in &layers {
        let layer = load_layer(path)?;
        deep_update(&mut merged, layer);
    }

    deep_update(&mut merged, overrides.as_layer());

    serde_yaml::from_value(merged).map_err(|e| GrockerError::ConfigInvalid {
        path: layers.last().cloned().unwrap_or_else(|| PathBuf::from("<defaults>")),
        reason: e.to_string(),
    })
}

fn load_embedded_defaults() -> GrockerResult<Value> {
    serde_yaml::from_str(DEFAULT_CONFIG)
        .map_err(|e| GrockerError::Internal(format!("embedded default config is invalid: {e}")))
}

/// Load one project layer. A missing explicit path is an error; an empty
/// file is an empty layer.
fn load_layer(path: &Path) -> GrockerResult<Value> {
    if !path.is_file() {
        return Err(GrockerError::ConfigFileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| GrockerError::io(format!("reading config from {}", path.display()), e))?;

    let value: Value = serde_yaml::from_str(&content).map_err(|e| GrockerError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    Ok(match value {
        Value::Null => Value::Mapping(Default::default()),
        other => other,
    })
}

/// Deep update: nested mappings merge key by key, everything else (scalars,
/// sequences) is replaced wholesale by the overlay.
fn deep_update(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) if base_value.is_mapping() && overlay_value.is_mapping() => {
                        deep_update(base_value, overlay_value);
                    }
                    _ => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

impl Overrides {
    /// Render the overrides as a top-precedence layer. Only keys with a
    /// value are emitted: absent overrides never shadow lower layers.
    fn as_layer(&self) -> Value {
        let mut map = serde_yaml::Mapping::new();

        let mut set = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                map.insert(Value::String(key.to_string()), value);
            }
        };

        set("runtime", self.runtime.clone().map(Value::String));
        set(
            "entrypoint_name",
            self.entrypoint_name.clone().map(Value::String),
        );
        set(
            "pip_constraint",
            self.pip_constraint
                .as_ref()
                .map(|p| Value::String(p.display().to_string())),
        );
        set(
            "docker_image_prefix",
            self.docker_image_prefix.clone().map(Value::String),
        );
        set(
            "image_base_name",
            self.image_base_name.clone().map(Value::String),
        );
        if !self.volumes.is_empty() {
            set(
                "volumes",
                Some(Value::Sequence(
                    self.volumes.iter().cloned().map(Value::String).collect(),
                )),
            );
        }
        if !self.ports.is_empty() {
            set(
                "ports",
                Some(Value::Sequence(
                    self.ports
                        .iter()
                        .map(|p| Value::Number(u64::from(*p).into()))
                        .collect(),
                )),
            );
        }

        Value::Mapping(map)
    }
}
