mod deploy;
mod deploy_pipeline;
mod doctor;
mod logs;
mod status;

use crate::GlobalOpts;
use relaunch_core::RelaunchConfig;
use std::path::PathBuf;

pub use deploy::deploy;
pub use doctor::doctor;
pub use logs::logs;
pub use status::status;

/// Resolve the project directory to an absolute path and load its config.
pub(crate) fn load_project(opts: &GlobalOpts) -> anyhow::Result<(PathBuf, RelaunchConfig)> {
    let project_dir = std::path::absolute(&opts.project_dir)?;
    let config = match &opts.config {
        Some(path) => RelaunchConfig::load_from(path)?,
        None => RelaunchConfig::load(&project_dir)?,
    };
    Ok((project_dir, config))
}
