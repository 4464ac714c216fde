use crate::command::CommandError;
use relaunch_core::{BuildContext, BuildFlags, StorageLocation};
use std::path::PathBuf;

/// Narrow capability interface over the container runtime.
///
/// The deploy pipeline depends only on this trait, so it can run against
/// [`DockerClient`](crate::DockerClient) or an in-memory fake.
#[allow(async_fn_in_trait)]
pub trait ContainerRuntime: Send + Sync {
    /// Untag and remove the image for `tag`. A missing image is not an error.
    async fn remove_image(&self, tag: &str) -> Result<Removal, RuntimeError>;

    /// Build `context` into an image tagged `tag`.
    async fn build_image(
        &self,
        context: &BuildContext,
        tag: &str,
        flags: BuildFlags,
    ) -> Result<(), RuntimeError>;

    /// Force-stop and remove the container `name`. A missing container is not an error.
    async fn remove_container(&self, name: &str) -> Result<Removal, RuntimeError>;

    /// Whether a container (running or stopped) is registered under `name`.
    async fn container_exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Start a detached container; returns its id.
    async fn run_detached(&self, spec: &RunSpec) -> Result<String, RuntimeError>;

    /// Create the named volume if absent. Returns `true` if it was created.
    async fn ensure_volume(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Storage the container `name` has mounted at `mount`.
    ///
    /// `None` if the container does not exist or has nothing mounted there.
    async fn mounted_storage(
        &self,
        name: &str,
        mount: &str,
    ) -> Result<Option<StorageLocation>, RuntimeError>;
}

/// Outcome of an idempotent removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    Absent,
}

/// Everything needed to launch the service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub restart: String,
    pub env_file: PathBuf,
    pub env: Vec<(String, String)>,
    /// `source:target` bind for durable storage
    pub volume: String,
}

impl RunSpec {
    /// Arguments for `docker run`, in order.
    ///
    /// `-e` entries come after `--env-file` so derived values take precedence.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_owned(),
            "--detach".to_owned(),
            "--name".to_owned(),
            self.name.clone(),
            "--restart".to_owned(),
            self.restart.clone(),
            "--env-file".to_owned(),
            self.env_file.display().to_string(),
        ];
        for (key, value) in &self.env {
            args.push("--env".to_owned());
            args.push(format!("{key}={value}"));
        }
        args.push("--volume".to_owned());
        args.push(self.volume.clone());
        args.push(self.image.clone());
        args
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("build context path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),

    #[error("image build failed for {tag}")]
    Build { tag: String, source: CommandError },

    #[error("failed to remove image {tag}")]
    RemoveImage { tag: String, source: CommandError },

    #[error("failed to remove container {name}")]
    RemoveContainer { name: String, source: CommandError },

    #[error("failed to inspect container {name}")]
    Inspect { name: String, source: CommandError },

    #[error("unexpected inspect output for {name}")]
    InspectParse {
        name: String,
        source: serde_json::Error,
    },

    #[error("failed to start container {name}")]
    Run { name: String, source: CommandError },

    #[error("failed to ensure volume {name}")]
    Volume { name: String, source: CommandError },

    #[error("failed to read logs for {name}")]
    Logs { name: String, source: CommandError },
}
