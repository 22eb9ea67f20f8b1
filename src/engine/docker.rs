//! Docker CLI engine adapter
//!
//! Drives the `docker` binary through subprocess calls. The adapter
//! verifies the daemon's reported API version once at connect time and
//! refuses to work against an engine older than [`MIN_API_VERSION`].

use crate::engine::{
    output_tail, stream_child_output, BuildRequest, ContainerEngine, EngineObject, RunRequest,
};
use crate::error::{GrockerError, GrockerResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Oldest engine API grocker knows how to talk to
pub const MIN_API_VERSION: &str = "1.24";

/// Container engine adapter built on the `docker` CLI
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Connect to the engine and verify its API version.
    pub async fn connect() -> GrockerResult<Self> {
        Self::connect_with_binary("docker").await
    }

    /// Connect through a specific engine binary (`docker`, `podman`).
    pub async fn connect_with_binary(binary: &str) -> GrockerResult<Self> {
        let client = Self {
            binary: binary.to_string(),
        };

        let version = client.api_version().await?;
        if version_lt(&version, MIN_API_VERSION) {
            return Err(GrockerError::EngineOutdated {
                current: version,
                required: MIN_API_VERSION.to_string(),
            });
        }
        debug!("Engine API version: {}", version);
        Ok(client)
    }

    /// Execute an engine command and return its output
    async fn exec(&self, args: &[String]) -> GrockerResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.binary, args);

        Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| GrockerError::command_failed(format!("{} {:?}", self.binary, args), e))
    }

    async fn exec_str(&self, args: &[&str]) -> GrockerResult<std::process::Output> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.exec(&args).await
    }

    /// Inspect objects and return their parsed JSON records
    async fn inspect(&self, kind: Option<&str>, ids: &[String]) -> GrockerResult<Vec<serde_json::Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args: Vec<String> = match kind {
            Some(kind) => vec![kind.to_string(), "inspect".to_string()],
            None => vec!["inspect".to_string()],
        };
        args.extend(ids.iter().cloned());

        let output = self.exec(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GrockerError::command_exec(
                format!("{} inspect", self.binary),
                stderr,
            ));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(parsed.as_array().cloned().unwrap_or_default())
    }

    /// List object ids matching a label filter
    async fn list_ids(&self, base: &[&str], label: &str, extra: &[&str]) -> GrockerResult<Vec<String>> {
        let mut args: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        args.push("--filter".to_string());
        args.push(format!("label={label}"));
        for arg in extra {
            args.push(arg.to_string());
        }

        let output = self.exec(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GrockerError::command_exec(
                format!("{} {}", self.binary, base.join(" ")),
                stderr,
            ));
        }

        let mut ids: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn api_version(&self) -> GrockerResult<String> {
        let output = self
            .exec_str(&["version", "--format", "{{.Server.APIVersion}}"])
            .await
            .map_err(|e| GrockerError::EngineUnavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GrockerError::EngineUnavailable(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn image_exists(&self, name: &str) -> GrockerResult<bool> {
        let output = self.exec_str(&["image", "inspect", name]).await?;
        Ok(output.status.success())
    }

    async fn build_image(
        &self,
        request: &BuildRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> GrockerResult<()> {
        info!("Building image {}...", request.tag);
        let args = build_args(request);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GrockerError::command_failed(format!("{} build", self.binary), e))?;

        let output = stream_child_output(&mut child, on_output).await;

        let status = child
            .wait()
            .await
            .map_err(|e| GrockerError::command_failed(format!("{} build", self.binary), e))?;

        if status.success() {
            Ok(())
        } else {
            Err(GrockerError::ImageBuildFailed {
                name: request.tag.clone(),
                reason: output_tail(&output),
            })
        }
    }

    async fn pull_image(&self, name: &str) -> GrockerResult<()> {
        info!("Pulling image {}...", name);
        let output = self.exec_str(&["pull", name]).await?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found_message(&stderr) {
            Err(GrockerError::ImageNotFound(name.to_string()))
        } else {
            Err(GrockerError::command_exec(format!("{} pull {name}", self.binary), stderr))
        }
    }

    async fn push_image(&self, name: &str) -> GrockerResult<String> {
        info!("Pushing image {}...", name);
        let output = self.exec_str(&["push", name]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GrockerError::ImagePush {
                name: name.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_push_digest(&stdout).ok_or_else(|| GrockerError::ImagePush {
            name: name.to_string(),
            reason: "push output contains no digest".to_string(),
        })
    }

    async fn ensure_volume(
        &self,
        name: &str,
        volume_labels: &std::collections::BTreeMap<String, String>,
    ) -> GrockerResult<()> {
        let existing = self.exec_str(&["volume", "inspect", name]).await?;
        if existing.status.success() {
            debug!("Volume {} already exists", name);
            return Ok(());
        }

        info!("Creating volume {}...", name);
        let mut args = vec!["volume".to_string(), "create".to_string()];
        for (key, value) in volume_labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(name.to_string());

        let output = self.exec(&args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(GrockerError::VolumeCreate {
                name: name.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn run_container(
        &self,
        request: &RunRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> GrockerResult<i64> {
        let args = run_args(request, false);
        debug!("Running container: {} {:?}", self.binary, args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GrockerError::command_failed(format!("{} run", self.binary), e))?;

        stream_child_output(&mut child, on_output).await;

        let status = child
            .wait()
            .await
            .map_err(|e| GrockerError::command_failed(format!("{} run", self.binary), e))?;

        Ok(i64::from(status.code().unwrap_or(-1)))
    }

    async fn start_container(&self, request: &RunRequest) -> GrockerResult<String> {
        let args = run_args(request, true);
        let output = self.exec(&args).await?;

        if output.status.success() {
            let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            info!(
                "Container started: {}",
                &container_id[..12.min(container_id.len())]
            );
            Ok(container_id)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(GrockerError::ContainerStart(stderr.to_string()))
        }
    }

    async fn container_ip(&self, container_id: &str) -> GrockerResult<String> {
        let records = self.inspect(None, &[container_id.to_string()]).await?;
        let ip = records
            .first()
            .and_then(|r| r.pointer("/NetworkSettings/IPAddress"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        if ip.is_empty() {
            Err(GrockerError::ContainerAddress(container_id.to_string()))
        } else {
            Ok(ip)
        }
    }

    async fn remove_container(&self, container_id: &str) -> GrockerResult<()> {
        debug!("Removing container: {}", container_id);
        let output = self.exec_str(&["rm", "-f", container_id]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_gone_message(&stderr) {
                Ok(())
            } else {
                Err(GrockerError::command_exec(format!("{} rm", self.binary), stderr))
            }
        }
    }

    async fn list_images(&self, label: &str) -> GrockerResult<Vec<EngineObject>> {
        let ids = self
            .list_ids(&["images", "--format", "{{.ID}}"], label, &[])
            .await?;
        let records = self.inspect(Some("image"), &ids).await?;

        Ok(records
            .iter()
            .map(|record| EngineObject {
                id: json_str(record, "/Id"),
                names: record
                    .pointer("/RepoTags")
                    .and_then(|v| v.as_array())
                    .map(|tags| {
                        tags.iter()
                            .filter_map(|t| t.as_str())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                labels: json_labels(record, "/Config/Labels"),
            })
            .collect())
    }

    async fn list_containers(
        &self,
        label: &str,
        exited_only: bool,
    ) -> GrockerResult<Vec<EngineObject>> {
        let extra: &[&str] = if exited_only {
            &["--filter", "status=exited"]
        } else {
            &[]
        };
        let ids = self
            .list_ids(&["ps", "-a", "--format", "{{.ID}}"], label, extra)
            .await?;
        let records = self.inspect(Some("container"), &ids).await?;

        Ok(records
            .iter()
            .map(|record| EngineObject {
                id: json_str(record, "/Id"),
                names: vec![json_str(record, "/Name").trim_start_matches('/').to_string()],
                labels: json_labels(record, "/Config/Labels"),
            })
            .collect())
    }

    async fn list_volumes(&self, label: &str) -> GrockerResult<Vec<EngineObject>> {
        let names = self
            .list_ids(&["volume", "ls", "--format", "{{.Name}}"], label, &[])
            .await?;
        let records = self.inspect(Some("volume"), &names).await?;

        Ok(records
            .iter()
            .map(|record| EngineObject {
                id: json_str(record, "/Name"),
                names: vec![json_str(record, "/Name")],
                labels: json_labels(record, "/Labels"),
            })
            .collect())
    }

    async fn remove_image(&self, name: &str) -> GrockerResult<()> {
        debug!("Removing image: {}", name);
        let output = self.exec_str(&["rmi", name]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_gone_message(&stderr) {
                Ok(())
            } else {
                Err(GrockerError::command_exec(format!("{} rmi", self.binary), stderr))
            }
        }
    }

    async fn remove_volume(&self, name: &str) -> GrockerResult<()> {
        debug!("Removing volume: {}", name);
        let output = self.exec_str(&["volume", "rm", name]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_gone_message(&stderr) {
                Ok(())
            } else {
                Err(GrockerError::command_exec(
                    format!("{} volume rm", self.binary),
                    stderr,
                ))
            }
        }
    }
}

/// Assemble the `docker build` argument list for a request
fn build_args(request: &BuildRequest) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "--rm".to_string(),
        "--force-rm".to_string(),
        "--tag".to_string(),
        request.tag.clone(),
    ];

    if request.pull {
        args.push("--pull".to_string());
    }
    if request.no_cache {
        args.push("--no-cache".to_string());
    }
    for (key, value) in &request.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    for (key, value) in &request.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push(request.context_dir.display().to_string());
    args
}

/// Assemble the `docker run` argument list for a request
fn run_args(request: &RunRequest, detach: bool) -> Vec<String> {
    let mut args = vec!["run".to_string()];

    if detach {
        args.push("--detach".to_string());
    } else {
        // blocking runs surface the container's exit code and leave nothing behind
        args.push("--rm".to_string());
    }
    for (key, value) in &request.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    for mount in &request.volumes {
        args.push("--volume".to_string());
        args.push(mount.as_arg());
    }
    for (key, value) in &request.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push(request.image.clone());
    args.extend(request.command.iter().cloned());
    args
}

/// Scrape the pushed digest from `docker push` output
/// (`<tag>: digest: sha256:<hex> size: <n>`).
fn parse_push_digest(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(index) = line.find("digest: ") {
            let rest = &line[index + "digest: ".len()..];
            let digest: &str = rest.split_whitespace().next()?;
            if digest.starts_with("sha256:") {
                return Some(digest.to_string());
            }
        }
    }
    None
}

/// Registry answers that mean "no such image" rather than a real failure
fn is_not_found_message(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("not found")
        || stderr.contains("manifest unknown")
        || stderr.contains("repository does not exist")
        || stderr.contains("pull access denied")
}

/// Engine answers that mean "already gone" on a remove call
fn is_gone_message(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such container")
        || stderr.contains("no such image")
        || stderr.contains("no such volume")
}

/// Compare dotted API versions numerically, component by component
fn version_lt(current: &str, required: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    parse(current) < parse(required)
}

fn json_str(record: &serde_json::Value, pointer: &str) -> String {
    record
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn json_labels(record: &serde_json::Value, pointer: &str) -> HashMap<String, String> {
    record
        .pointer(pointer)
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
