use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::StorageLocation;

/// Default config file name, looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "relaunch.toml";

/// relaunch.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelaunchConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub env: EnvConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Container name; exactly one instance with this name exists per host
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Image tag (defaults to `<name>:latest`)
    pub image: Option<String>,
    /// Restart policy for `docker run --restart`
    #[serde(default = "default_restart")]
    pub restart: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build context directory, relative to the project directory
    #[serde(default = "default_context")]
    pub context: PathBuf,
    /// Container definition, relative to the build context
    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Runtime configuration file injected with `--env-file`
    #[serde(default = "default_env_file")]
    pub file: PathBuf,
    /// Keys that must be present in the env file. Values are never read.
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Host directory bound into the container
    pub host_dir: Option<PathBuf>,
    /// Named volume bound into the container
    pub volume: Option<String>,
    /// Fixed in-container root for database and log data
    #[serde(default = "default_mount")]
    pub mount: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Remote to pull from (defaults to the branch's upstream)
    pub remote: Option<String>,
    /// Branch to pull; only used together with `remote`
    pub branch: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            image: None,
            restart: default_restart(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            context: default_context(),
            dockerfile: default_dockerfile(),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            file: default_env_file(),
            required: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            host_dir: None,
            volume: None,
            mount: default_mount(),
        }
    }
}

impl RelaunchConfig {
    /// Load from relaunch.toml in the given directory, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        Self::load_from(&project_dir.join(CONFIG_FILE_NAME))
    }

    /// Load from an explicit path, or return defaults if the file does not exist.
    pub fn load_from(config_path: &Path) -> crate::Result<Self> {
        let config: Self = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path.to_path_buf(),
                source: e,
            })?
        } else {
            tracing::debug!(path = %config_path.display(), "no config file; using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(crate::Error::ConfigInvalid {
                reason: "service.name must not be empty".to_owned(),
            });
        }
        if self.storage.host_dir.is_some() && self.storage.volume.is_some() {
            return Err(crate::Error::ConfigInvalid {
                reason: "set either storage.host_dir or storage.volume, not both".to_owned(),
            });
        }
        if !self.storage.mount.starts_with('/') {
            return Err(crate::Error::ConfigInvalid {
                reason: format!(
                    "storage.mount must be an absolute path, got {:?}",
                    self.storage.mount
                ),
            });
        }
        if self.source.branch.is_some() && self.source.remote.is_none() {
            return Err(crate::Error::ConfigInvalid {
                reason: "source.branch requires source.remote".to_owned(),
            });
        }
        Ok(())
    }

    /// Image tag for this service.
    pub fn image_tag(&self) -> String {
        self.service
            .image
            .clone()
            .unwrap_or_else(|| format!("{}:latest", self.service.name))
    }

    /// The durable storage location, defaulting to `./data` under the project directory.
    pub fn storage_location(&self, project_dir: &Path) -> StorageLocation {
        match (&self.storage.volume, &self.storage.host_dir) {
            (Some(volume), _) => StorageLocation::Volume(volume.clone()),
            (None, Some(dir)) => StorageLocation::HostDir(project_dir.join(dir)),
            (None, None) => StorageLocation::HostDir(project_dir.join(default_host_dir())),
        }
    }

    /// Absolute-or-relative path to the env file under the project directory.
    pub fn env_file_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.env.file)
    }

    /// Build context directory under the project directory.
    pub fn context_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.build.context)
    }
}

fn default_service_name() -> String {
    "trader-watcher".to_owned()
}

fn default_restart() -> String {
    "unless-stopped".to_owned()
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("Dockerfile")
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

fn default_mount() -> String {
    "/app/data".to_owned()
}

fn default_host_dir() -> PathBuf {
    PathBuf::from("data")
}
