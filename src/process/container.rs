//! Commands that launch containers instead of long-lived host processes.
//!
//! `docker run --name x ...` and `docker compose up` hand the workload to
//! the Docker daemon, so the shell PID says nothing about liveness. For
//! these the daemon is asked directly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use bollard::query_parameters::{ListContainersOptions, StopContainerOptions};
use bollard::Docker;
use regex::Regex;
use tracing::{debug, warn};

static DOCKER_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s;&|/])docker\s+(?:container\s+)?run\s").unwrap());
static CONTAINER_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--name(?:=|\s+)([A-Za-z0-9][A-Za-z0-9_.-]*)").unwrap());
static COMPOSE_UP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s;&|/])docker(?:-compose|\s+compose)\s(?:.*\s)?up(?:\s|$)").unwrap()
});
static PROJECT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\s-p|--project-name)(?:=|\s+)([A-Za-z0-9][A-Za-z0-9_-]*)").unwrap()
});

const STOP_TIMEOUT_SECS: i32 = 10;

/// How a command hands its workload to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerLaunch {
    /// `docker run --name <name>`.
    Named { name: String },
    /// `docker compose up` for a project.
    Compose { project: String },
}

impl ContainerLaunch {
    /// Recognize container launches. `docker run` without `--name` is not
    /// recognized: there is nothing stable to ask the daemon about.
    pub fn detect(command: &str, workdir: &Path) -> Option<Self> {
        if DOCKER_RUN_RE.is_match(command) {
            return CONTAINER_NAME_RE
                .captures(command)
                .map(|c| ContainerLaunch::Named {
                    name: c[1].to_string(),
                });
        }
        if COMPOSE_UP_RE.is_match(command) {
            let project = PROJECT_NAME_RE
                .captures(command)
                .map(|c| c[1].to_lowercase())
                .or_else(|| {
                    workdir
                        .file_name()
                        .map(|n| compose_project_name(&n.to_string_lossy()))
                })
                .filter(|p| !p.is_empty())?;
            return Some(ContainerLaunch::Compose { project });
        }
        None
    }
}

/// Compose derives the default project name from the directory: lowercase,
/// keeping only `[a-z0-9_-]`.
fn compose_project_name(dir: &str) -> String {
    dir.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Liveness and stop for container launches.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether at least one container for the launch is running. An
    /// unreachable daemon means "not running".
    async fn is_running(&self, launch: &ContainerLaunch) -> bool;

    /// Stop every running container belonging to the launch.
    async fn stop(&self, launch: &ContainerLaunch) -> anyhow::Result<()>;
}

/// [`ContainerRuntime`] backed by the local Docker daemon.
pub struct DockerRuntime {
    timeout: Duration,
}

impl DockerRuntime {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn connect(&self) -> Option<Docker> {
        match Docker::connect_with_local_defaults() {
            Ok(d) => Some(d),
            Err(e) => {
                debug!(error = %e, "docker daemon not reachable");
                None
            }
        }
    }

    /// IDs of running containers for the launch.
    async fn running_ids(&self, docker: &Docker, launch: &ContainerLaunch) -> Option<Vec<String>> {
        let filters = match launch {
            ContainerLaunch::Named { name } => {
                HashMap::from([("name".to_string(), vec![name.clone()])])
            }
            ContainerLaunch::Compose { project } => HashMap::from([(
                "label".to_string(),
                vec![format!("com.docker.compose.project={}", project)],
            )]),
        };
        let options = ListContainersOptions {
            all: false,
            filters: Some(filters),
            ..Default::default()
        };
        let listed = match tokio::time::timeout(self.timeout, docker.list_containers(Some(options)))
            .await
        {
            Ok(Ok(list)) => list,
            Ok(Err(e)) => {
                debug!(error = %e, "listing containers failed");
                return None;
            }
            Err(_) => {
                warn!("docker daemon did not answer in time");
                return None;
            }
        };
        let ids = listed
            .into_iter()
            .filter(|c| match launch {
                // The name filter is a substring match; require the exact name.
                ContainerLaunch::Named { name } => c
                    .names
                    .as_ref()
                    .is_some_and(|names| names.iter().any(|n| n.trim_start_matches('/') == name)),
                ContainerLaunch::Compose { .. } => true,
            })
            .filter_map(|c| c.id)
            .collect();
        Some(ids)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn is_running(&self, launch: &ContainerLaunch) -> bool {
        let Some(docker) = self.connect() else {
            return false;
        };
        self.running_ids(&docker, launch)
            .await
            .is_some_and(|ids| !ids.is_empty())
    }

    async fn stop(&self, launch: &ContainerLaunch) -> anyhow::Result<()> {
        let Some(docker) = self.connect() else {
            return Ok(());
        };
        let Some(ids) = self.running_ids(&docker, launch).await else {
            return Ok(());
        };
        for id in ids {
            let options = StopContainerOptions {
                t: Some(STOP_TIMEOUT_SECS),
                signal: None,
            };
            match docker.stop_container(&id, Some(options)).await {
                Ok(()) => debug!(container = %id, "container stopped"),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 304 | 404,
                    ..
                }) => {}
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("stopping container {}", id)))
                }
            }
        }
        Ok(())
    }
}

/// Runtime that never sees containers; used when no daemon should be
/// consulted (tests, or hosts without Docker).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContainers;

#[async_trait]
impl ContainerRuntime for NoContainers {
    async fn is_running(&self, _launch: &ContainerLaunch) -> bool {
        false
    }

    async fn stop(&self, _launch: &ContainerLaunch) -> anyhow::Result<()> {
        Ok(())
    }
}
