use crate::executor::{CommandExecutor, RealExecutor};
use crate::runtime::{ContainerRuntime, Removal, RunSpec, RuntimeError};
use relaunch_core::{BuildContext, BuildFlags, StorageLocation};
use serde::Deserialize;
use std::path::PathBuf;

/// Docker CLI client, parameterized over the executor for testability.
pub struct DockerClient<E: CommandExecutor = RealExecutor> {
    executor: E,
}

impl DockerClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor::docker(),
        }
    }
}

impl Default for DockerClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> DockerClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Diagnostics ──

    /// Docker CLI version. Fails if the binary is missing.
    pub async fn client_version(&self) -> Result<String, crate::CommandError> {
        self.executor
            .exec(&args(["version", "--format", "{{.Client.Version}}"]))
            .await
            .map(|v| v.trim().to_owned())
    }

    /// Docker daemon version. Fails if the daemon is unreachable.
    pub async fn server_version(&self) -> Result<String, crate::CommandError> {
        self.executor
            .exec(&args(["version", "--format", "{{.Server.Version}}"]))
            .await
            .map(|v| v.trim().to_owned())
    }

    // ── Instance status ──

    /// Inspect the container `name`; `None` if no such container exists.
    pub async fn inspect_container(
        &self,
        name: &str,
    ) -> Result<Option<ContainerStatus>, RuntimeError> {
        let output = match self
            .executor
            .exec(&args(["container", "inspect", name]))
            .await
        {
            Ok(out) => out,
            Err(e) if e.is_no_such_object() => return Ok(None),
            Err(e) => {
                return Err(RuntimeError::Inspect {
                    name: name.to_owned(),
                    source: e,
                });
            }
        };

        let entries: Vec<ContainerStatus> =
            serde_json::from_str(&output).map_err(|e| RuntimeError::InspectParse {
                name: name.to_owned(),
                source: e,
            })?;

        Ok(entries.into_iter().next())
    }

    /// Stream the container's logs to the terminal.
    pub async fn stream_logs(
        &self,
        name: &str,
        follow: bool,
        tail: Option<u32>,
    ) -> Result<(), RuntimeError> {
        let mut cmd = vec!["logs".to_owned()];
        if follow {
            cmd.push("--follow".to_owned());
        }
        if let Some(n) = tail {
            cmd.push("--tail".to_owned());
            cmd.push(n.to_string());
        }
        cmd.push(name.to_owned());

        self.executor
            .exec_streaming(&cmd)
            .await
            .map_err(|e| RuntimeError::Logs {
                name: name.to_owned(),
                source: e,
            })
    }
}

impl<E: CommandExecutor> ContainerRuntime for DockerClient<E> {
    async fn remove_image(&self, tag: &str) -> Result<Removal, RuntimeError> {
        match self
            .executor
            .exec(&args(["image", "rm", "--force", tag]))
            .await
        {
            Ok(_) => Ok(Removal::Removed),
            Err(e) if e.is_no_such_object() => Ok(Removal::Absent),
            Err(e) => Err(RuntimeError::RemoveImage {
                tag: tag.to_owned(),
                source: e,
            }),
        }
    }

    async fn build_image(
        &self,
        context: &BuildContext,
        tag: &str,
        flags: BuildFlags,
    ) -> Result<(), RuntimeError> {
        let context_str = context
            .dir
            .to_str()
            .ok_or_else(|| RuntimeError::InvalidPath(context.dir.clone()))?;
        let dockerfile_str = context
            .dockerfile
            .to_str()
            .ok_or_else(|| RuntimeError::InvalidPath(context.dockerfile.clone()))?;

        let mut cmd = vec!["build".to_owned()];
        cmd.extend(flags.to_args());
        cmd.extend(args(["--tag", tag, "--file", dockerfile_str, context_str]));

        self.executor
            .exec_streaming(&cmd)
            .await
            .map_err(|e| RuntimeError::Build {
                tag: tag.to_owned(),
                source: e,
            })
    }

    async fn remove_container(&self, name: &str) -> Result<Removal, RuntimeError> {
        match self.executor.exec(&args(["rm", "--force", name])).await {
            Ok(_) => Ok(Removal::Removed),
            Err(e) if e.is_no_such_object() => Ok(Removal::Absent),
            Err(e) => Err(RuntimeError::RemoveContainer {
                name: name.to_owned(),
                source: e,
            }),
        }
    }

    async fn container_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        match self
            .executor
            .exec(&args(["container", "inspect", "--format", "{{.Id}}", name]))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_no_such_object() => Ok(false),
            Err(e) => Err(RuntimeError::Inspect {
                name: name.to_owned(),
                source: e,
            }),
        }
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
        let output = self
            .executor
            .exec(&spec.to_args())
            .await
            .map_err(|e| RuntimeError::Run {
                name: spec.name.clone(),
                source: e,
            })?;

        Ok(output.trim().to_owned())
    }

    async fn ensure_volume(&self, name: &str) -> Result<bool, RuntimeError> {
        let exists = match self.executor.exec(&args(["volume", "inspect", name])).await {
            Ok(_) => true,
            Err(e) if e.is_no_such_object() => false,
            Err(e) => {
                return Err(RuntimeError::Volume {
                    name: name.to_owned(),
                    source: e,
                });
            }
        };
        if exists {
            return Ok(false);
        }

        self.executor
            .exec(&args(["volume", "create", name]))
            .await
            .map_err(|e| RuntimeError::Volume {
                name: name.to_owned(),
                source: e,
            })?;

        tracing::info!(volume = name, "created volume");
        Ok(true)
    }

    async fn mounted_storage(
        &self,
        name: &str,
        mount: &str,
    ) -> Result<Option<StorageLocation>, RuntimeError> {
        Ok(self
            .inspect_container(name)
            .await?
            .and_then(|status| status.storage_at(mount)))
    }
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

// ── Inspect types ──

/// Subset of `docker container inspect` output.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerStatus {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "RestartCount", default)]
    pub restart_count: u32,
    #[serde(rename = "State")]
    pub state: ContainerState,
    #[serde(rename = "Config")]
    pub config: ContainerConfig,
    #[serde(rename = "Mounts", default)]
    pub mounts: Vec<MountPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Running", default)]
    pub running: bool,
    #[serde(rename = "StartedAt", default)]
    pub started_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Image")]
    pub image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MountPoint {
    #[serde(rename = "Type", default)]
    pub kind: String,
    /// Volume name; absent for bind mounts
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(rename = "Destination")]
    pub destination: String,
}

impl MountPoint {
    /// The storage behind this mount, if it is a bind or a named volume.
    pub fn location(&self) -> Option<StorageLocation> {
        match self.kind.as_str() {
            "bind" => Some(StorageLocation::HostDir(PathBuf::from(&self.source))),
            "volume" => self.name.clone().map(StorageLocation::Volume),
            _ => None,
        }
    }
}

impl ContainerStatus {
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }

    /// Storage mounted at `mount`, ignoring a trailing slash on either side.
    pub fn storage_at(&self, mount: &str) -> Option<StorageLocation> {
        let mount = mount.trim_end_matches('/');
        self.mounts
            .iter()
            .find(|m| m.destination.trim_end_matches('/') == mount)
            .and_then(MountPoint::location)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Container: {}", self.short_id())?;
        writeln!(f, "Image:     {}", self.config.image)?;
        writeln!(f, "State:     {}", self.state.status)?;
        writeln!(f, "Started:   {}", self.state.started_at)?;
        write!(f, "Restarts:  {}", self.restart_count)?;
        for mount in &self.mounts {
            if let Some(location) = mount.location() {
                write!(f, "\nData:      {location} -> {}", mount.destination)?;
            }
        }
        Ok(())
    }
}
