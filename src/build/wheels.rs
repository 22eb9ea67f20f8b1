//! Wheel compilation
//!
//! Runs the compiler image as a one-shot container writing into the named
//! cache volume for this configuration. The volume is keyed by the config
//! identifier, so every build with an equivalent dependency set shares it.

use crate::config::Config;
use crate::engine::{base_labels, labels, ContainerEngine, RunRequest, VolumeMount};
use crate::error::{GrockerError, GrockerResult};
use crate::naming::{config_identifier, image_name, wheel_volume_name, Role};
use crate::release::Release;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Where the compiler writes finished wheels
const PACKAGES_MOUNT: &str = "/home/grocker/packages";

/// Where a local release wheel is mounted for the compiler
const DIST_MOUNT: &str = "/home/grocker/dist";

/// Compile the release's wheels into the cache volume.
///
/// A non-zero compiler exit is fatal for the invocation; nothing retries
/// a failed compilation.
pub async fn compile_wheels(
    engine: &dyn ContainerEngine,
    config: &Config,
    release: &Release,
    pip_conf: &PipConf,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> GrockerResult<()> {
    let volume_name = wheel_volume_name(config)?;
    let mut volume_labels = base_labels(Role::Wheel);
    volume_labels.insert(labels::RUNTIME.to_string(), config.runtime.clone());
    volume_labels.insert(
        labels::CONFIG_HASH.to_string(),
        config_identifier(config)?,
    );
    engine.ensure_volume(&volume_name, &volume_labels).await?;

    let mut request = RunRequest::new(image_name(config, Role::Compiler)?, Role::Wheel);
    request
        .volumes
        .push(VolumeMount::read_write(volume_name, PACKAGES_MOUNT));

    let requirement = match &release.wheel_path {
        Some(wheel) => {
            let file_name = wheel
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| GrockerError::ReleaseFileNotFound(wheel.clone()))?;
            let mounted = format!("{DIST_MOUNT}/{file_name}");
            request
                .volumes
                .push(VolumeMount::read_only(wheel.display().to_string(), mounted.clone()));
            format!("{mounted}{}", release.extras_suffix())
        }
        None => release.as_requirement(),
    };

    let runtime = config.runtime_spec()?;
    request.command = vec![
        "--python".to_string(),
        runtime.runtime.clone(),
        requirement,
    ];

    request.env = pip_environment(pip_conf.path());

    if let Some(constraint) = &config.pip_constraint {
        let content = std::fs::read(constraint)
            .map_err(|e| GrockerError::io(format!("reading {}", constraint.display()), e))?;
        request.env.insert(
            "PIP_CONSTRAINT_CONTENT".to_string(),
            pack_constraint(&content)?,
        );
    }

    info!("Compiling wheels for {}...", release);
    let exit_code = engine.run_container(&request, on_output).await?;
    if exit_code != 0 {
        return Err(GrockerError::CompilationFailed { code: exit_code });
    }
    Ok(())
}

/// A constraint file travels to the compiler as one environment variable
/// (zlib then base64) instead of yet another bind mount.
fn pack_constraint(content: &[u8]) -> GrockerResult<String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(content)
        .and_then(|()| encoder.finish())
        .map(|compressed| BASE64.encode(compressed))
        .map_err(|e| GrockerError::io("compressing constraint file", e))
}

/// A pip configuration file scoped to one compile call.
///
/// Uses the given file when it exists; otherwise synthesizes one from the
/// host pip's own configuration getter into a temp file that disappears
/// with this value.
pub struct PipConf {
    path: PathBuf,
    _synthesized: Option<NamedTempFile>,
}

impl PipConf {
    pub async fn resolve(explicit: Option<&Path>) -> GrockerResult<Self> {
        if let Some(path) = explicit {
            if path.is_file() {
                info!("Pip will use configuration from {}.", path.display());
                return Ok(Self {
                    path: path.to_path_buf(),
                    _synthesized: None,
                });
            }
        }

        if let Some(path) = default_pip_conf() {
            info!("Pip will use configuration from {}.", path.display());
            return Ok(Self {
                path,
                _synthesized: None,
            });
        }

        Self::synthesize().await
    }

    /// Build a pip.conf from `pip config get` answers on the host.
    /// Keys pip does not know about are simply absent.
    async fn synthesize() -> GrockerResult<Self> {
        let mut lines = vec!["[global]".to_string()];
        for key in ["index-url", "extra-index-url", "timeout", "trusted-host"] {
            let output = tokio::process::Command::new("pip")
                .args(["config", "get", &format!("global.{key}")])
                .output()
                .await;
            if let Ok(output) = output {
                if output.status.success() {
                    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !value.is_empty() {
                        lines.push(format!("{key} = {value}"));
                    }
                }
            }
        }

        let mut file = NamedTempFile::new()
            .map_err(|e| GrockerError::io("creating synthesized pip.conf", e))?;
        file.write_all(lines.join("\n").as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| GrockerError::io("writing synthesized pip.conf", e))?;

        debug!("Synthesized pip.conf at {}", file.path().display());
        Ok(Self {
            path: file.path().to_path_buf(),
            _synthesized: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Conventional pip configuration locations on the host
fn default_pip_conf() -> Option<PathBuf> {
    let candidates = [
        dirs::config_dir().map(|d| d.join("pip").join("pip.conf")),
        dirs::home_dir().map(|d| d.join(".pip").join("pip.conf")),
    ];
    candidates.into_iter().flatten().find(|p| p.is_file())
}

/// Translate the `[global]` section of a pip configuration file into the
/// environment variables pip reads inside the compiler container.
fn pip_environment(pip_conf: &Path) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let Ok(content) = std::fs::read_to_string(pip_conf) else {
        return env;
    };

    let keys = [
        ("index-url", "PIP_INDEX_URL"),
        ("extra-index-url", "PIP_EXTRA_INDEX_URL"),
        ("timeout", "PIP_TIMEOUT"),
        ("trusted-host", "PIP_TRUSTED_HOST"),
    ];

    let mut in_global = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_global = section.trim() == "global";
            continue;
        }
        if !in_global {
            continue;
        }
        let Some((key, value)) = line.split_once(['=', ':']) else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if value.is_empty() {
            continue;
        }
        if let Some((_, variable)) = keys.iter().find(|(name, _)| *name == key) {
            env.insert(variable.to_string(), value.to_string());
        }
    }

    debug!("pip environment: {:?}", env);
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use flate2::read::ZlibDecoder;
    use std::io::Read as _;

    #[test]
    fn pip_environment_reads_global_section() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[global]\ntimeout=99\nindex-url = http://example.com/simple\n")
            .unwrap();
        file.flush().unwrap();

        let env = pip_environment(file.path());
        assert_eq!(env.get("PIP_TIMEOUT").map(String::as_str), Some("99"));
        assert_eq!(
            env.get("PIP_INDEX_URL").map(String::as_str),
            Some("http://example.com/simple")
        );
        assert!(!env.contains_key("PIP_EXTRA_INDEX_URL"));
    }

    #[test]
    fn pip_environment_ignores_other_sections() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[install]\nindex-url = http://wrong.example.com\n[global]\ntrusted-host: pypi.internal\n")
            .unwrap();
        file.flush().unwrap();

        let env = pip_environment(file.path());
        assert_eq!(
            env.get("PIP_TRUSTED_HOST").map(String::as_str),
            Some("pypi.internal")
        );
        assert!(!env.contains_key("PIP_INDEX_URL"));
    }

    #[test]
    fn pip_environment_missing_file_is_empty() {
        let env = pip_environment(Path::new("/nonexistent/pip.conf"));
        assert!(env.is_empty());
    }

    #[test]
    fn constraint_round_trips_through_env_encoding() {
        let packed = pack_constraint(b"qrcode==5.2\n").unwrap();

        let compressed = BASE64.decode(packed).unwrap();
        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut unpacked = String::new();
        decoder.read_to_string(&mut unpacked).unwrap();
        assert_eq!(unpacked, "qrcode==5.2\n");
    }

    #[tokio::test]
    async fn explicit_pip_conf_is_used_as_is() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[global]\ntimeout=10\n").unwrap();
        file.flush().unwrap();

        let conf = PipConf::resolve(Some(file.path())).await.unwrap();
        assert_eq!(conf.path(), file.path());
    }
}
