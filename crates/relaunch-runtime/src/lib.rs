//! Container runtime and source control plumbing for relaunch.
//!
//! Both the Docker and git clients shell out through a [`CommandExecutor`],
//! so tests can substitute a mock. The deploy pipeline sees them only
//! through the [`ContainerRuntime`] and [`SourceControl`] traits.

pub mod command;
pub mod docker;
pub mod executor;
pub mod git;
pub mod runtime;

pub use command::CommandError;
pub use docker::{ContainerStatus, DockerClient, MountPoint};
pub use executor::{CommandExecutor, RealExecutor};
pub use git::{GitClient, SourceControl, SyncError};
pub use runtime::{ContainerRuntime, Removal, RunSpec, RuntimeError};
