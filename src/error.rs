//! Error types for grocker
//!
//! All modules use `GrockerResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for grocker operations
pub type GrockerResult<T> = Result<T, GrockerError>;

/// All errors that can occur in grocker
#[derive(Error, Debug)]
pub enum GrockerError {
    // Configuration errors
    #[error("Configuration file not found: {0}")]
    ConfigFileNotFound(PathBuf),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Unknown runtime: {0}")]
    UnknownRuntime(String),

    // Release specifier errors
    #[error("Unsupported release specifier: {specifier}: {reason}")]
    InvalidRelease { specifier: String, reason: String },

    #[error("Release artifact not found: {0}")]
    ReleaseFileNotFound(PathBuf),

    // Engine errors
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image build failed: {name}: {reason}")]
    ImageBuildFailed { name: String, reason: String },

    #[error("Image push failed: {name}: {reason}")]
    ImagePush { name: String, reason: String },

    #[error("Failed to create volume {name}: {reason}")]
    VolumeCreate { name: String, reason: String },

    #[error("Container failed to start: {0}")]
    ContainerStart(String),

    #[error("Compiler container exited with a non-zero return code ({code})")]
    CompilationFailed { code: i64 },

    #[error("Container has no network address: {0}")]
    ContainerAddress(String),

    // Tooling freshness errors
    #[error("Docker engine is outdated: API {current} < required {required}")]
    EngineOutdated { current: String, required: String },

    #[error("Docker engine is not reachable: {0}")]
    EngineUnavailable(String),

    #[error("grocker {current} is outdated, {latest} is released")]
    ToolOutdated { current: String, latest: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GrockerError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether this error is the expected "cache miss" answer from the engine
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::EngineUnavailable(_) => Some("Is the Docker daemon running?"),
            Self::EngineOutdated { .. } => Some("Upgrade the Docker engine on this host."),
            Self::ToolOutdated { .. } => Some("Upgrade grocker before building."),
            Self::UnknownRuntime(_) => Some("Run with -r/--runtime or set `runtime` in .grocker.yml"),
            Self::InvalidRelease { .. } => {
                Some("Use an exact pin such as `my-app[extra]==1.2.3` or a path to a wheel file.")
            }
            _ => None,
        }
    }
}
