//! In-memory container engine stub for orchestration tests

use async_trait::async_trait;
use grocker::engine::{BuildRequest, ContainerEngine, EngineObject, RunRequest};
use grocker::error::{GrockerError, GrockerResult};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

/// A scripted engine: records every call and answers from in-memory state.
#[derive(Default)]
pub struct StubEngine {
    /// Images present in the local store
    pub local_images: Mutex<HashSet<String>>,
    /// Images the fake registry would answer a pull for
    pub registry_images: Mutex<HashSet<String>>,
    /// Tags whose build must fail
    pub failing_builds: Mutex<HashSet<String>>,
    /// Exit code every run_container call reports
    pub run_exit_code: Mutex<i64>,
    /// Objects returned by the list calls (for purge tests)
    pub images: Mutex<Vec<EngineObject>>,
    pub containers: Mutex<Vec<EngineObject>>,
    pub volumes: Mutex<Vec<EngineObject>>,
    /// Every engine call, in order
    pub events: Mutex<Vec<String>>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            run_exit_code: Mutex::new(0),
            ..Self::default()
        }
    }

    pub fn with_local_image(self, name: &str) -> Self {
        self.local_images.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn with_registry_image(self, name: &str) -> Self {
        self.registry_images.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    fn filter_by_label(objects: &[EngineObject], label: &str) -> Vec<EngineObject> {
        objects
            .iter()
            .filter(|o| o.labels.contains_key(label))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ContainerEngine for StubEngine {
    async fn api_version(&self) -> GrockerResult<String> {
        Ok("1.43".to_string())
    }

    async fn image_exists(&self, name: &str) -> GrockerResult<bool> {
        Ok(self.local_images.lock().unwrap().contains(name))
    }

    async fn build_image(
        &self,
        request: &BuildRequest,
        _on_output: &(dyn Fn(String) + Send + Sync),
    ) -> GrockerResult<()> {
        self.record(format!("build {}", request.tag));
        if self.failing_builds.lock().unwrap().contains(&request.tag) {
            return Err(GrockerError::ImageBuildFailed {
                name: request.tag.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        self.local_images.lock().unwrap().insert(request.tag.clone());
        Ok(())
    }

    async fn pull_image(&self, name: &str) -> GrockerResult<()> {
        self.record(format!("pull {name}"));
        if self.registry_images.lock().unwrap().contains(name) {
            self.local_images.lock().unwrap().insert(name.to_string());
            Ok(())
        } else {
            Err(GrockerError::ImageNotFound(name.to_string()))
        }
    }

    async fn push_image(&self, name: &str) -> GrockerResult<String> {
        self.record(format!("push {name}"));
        Ok("sha256:stubdigest".to_string())
    }

    async fn ensure_volume(
        &self,
        name: &str,
        _volume_labels: &BTreeMap<String, String>,
    ) -> GrockerResult<()> {
        self.record(format!("volume {name}"));
        Ok(())
    }

    async fn run_container(
        &self,
        request: &RunRequest,
        _on_output: &(dyn Fn(String) + Send + Sync),
    ) -> GrockerResult<i64> {
        self.record(format!("run {}", request.image));
        Ok(*self.run_exit_code.lock().unwrap())
    }

    async fn start_container(&self, request: &RunRequest) -> GrockerResult<String> {
        self.record(format!("start {}", request.image));
        Ok("stub-container".to_string())
    }

    async fn container_ip(&self, container_id: &str) -> GrockerResult<String> {
        self.record(format!("inspect {container_id}"));
        Ok("172.17.0.2".to_string())
    }

    async fn remove_container(&self, container_id: &str) -> GrockerResult<()> {
        self.record(format!("rm {container_id}"));
        Ok(())
    }

    async fn list_images(&self, label: &str) -> GrockerResult<Vec<EngineObject>> {
        Ok(Self::filter_by_label(&self.images.lock().unwrap(), label))
    }

    async fn list_containers(
        &self,
        label: &str,
        _exited_only: bool,
    ) -> GrockerResult<Vec<EngineObject>> {
        Ok(Self::filter_by_label(&self.containers.lock().unwrap(), label))
    }

    async fn list_volumes(&self, label: &str) -> GrockerResult<Vec<EngineObject>> {
        Ok(Self::filter_by_label(&self.volumes.lock().unwrap(), label))
    }

    async fn remove_image(&self, name: &str) -> GrockerResult<()> {
        self.record(format!("rmi {name}"));
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> GrockerResult<()> {
        self.record(format!("volume rm {name}"));
        Ok(())
    }
}
