use crate::command::CommandError;
use crate::executor::{CommandExecutor, RealExecutor};
use relaunch_core::SourceConfig;
use std::path::Path;

/// Brings the working tree up to date before a build.
#[allow(async_fn_in_trait)]
pub trait SourceControl: Send + Sync {
    /// Pull the latest upstream revision; returns the revision now checked out.
    async fn sync(&self) -> Result<String, SyncError>;
}

/// git CLI client, parameterized over the executor for testability.
pub struct GitClient<E: CommandExecutor = RealExecutor> {
    executor: E,
    remote: Option<String>,
    branch: Option<String>,
}

impl GitClient<RealExecutor> {
    pub fn new(work_tree: &Path, source: &SourceConfig) -> Self {
        Self::with_executor(RealExecutor::git(work_tree), source)
    }
}

impl<E: CommandExecutor> GitClient<E> {
    pub fn with_executor(executor: E, source: &SourceConfig) -> Self {
        Self {
            executor,
            remote: source.remote.clone(),
            branch: source.branch.clone(),
        }
    }

    /// git CLI version. Fails if git is missing.
    pub async fn version(&self) -> Result<String, CommandError> {
        self.executor
            .exec(&args(["--version"]))
            .await
            .map(|v| v.trim().to_owned())
    }

    /// Whether the executor's directory is inside a git work tree.
    pub async fn is_work_tree(&self) -> Result<bool, CommandError> {
        match self
            .executor
            .exec(&args(["rev-parse", "--is-inside-work-tree"]))
            .await
        {
            Ok(out) => Ok(out.trim() == "true"),
            Err(CommandError::CommandFailed { stderr, .. })
                if stderr.contains("not a git repository") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn pull_args(&self) -> Vec<String> {
        let mut cmd = args(["pull", "--ff-only"]);
        if let Some(remote) = &self.remote {
            cmd.push(remote.clone());
            if let Some(branch) = &self.branch {
                cmd.push(branch.clone());
            }
        }
        cmd
    }
}

impl<E: CommandExecutor> SourceControl for GitClient<E> {
    async fn sync(&self) -> Result<String, SyncError> {
        self.executor
            .exec(&self.pull_args())
            .await
            .map_err(|e| SyncError::Pull { source: e })?;

        let revision = self
            .executor
            .exec(&args(["rev-parse", "--short", "HEAD"]))
            .await
            .map_err(|e| SyncError::Revision { source: e })?;

        Ok(revision.trim().to_owned())
    }
}

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("git pull failed")]
    Pull { source: CommandError },

    #[error("failed to read checked-out revision")]
    Revision { source: CommandError },
}
