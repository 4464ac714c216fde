use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {reason}")]
    ConfigInvalid { reason: String },

    // ── Runtime configuration (env file) ──
    #[error("runtime configuration not found at {path} — create it before deploying")]
    MissingConfiguration { path: PathBuf },

    #[error("runtime configuration at {path} is empty")]
    EmptyConfiguration { path: PathBuf },

    #[error("failed to read runtime configuration at {path}")]
    EnvFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid runtime configuration at {path}:{line}: {reason}")]
    EnvFileSyntax {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("runtime configuration at {path} is missing keys: {}", keys.join(", "))]
    MissingKeys { path: PathBuf, keys: Vec<String> },

    // ── Build context ──
    #[error("container definition not found at {path}")]
    MissingDockerfile { path: PathBuf },

    #[error("failed to read container definition at {path}")]
    DockerfileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Durable storage ──
    #[error("failed to resolve storage directory {path}")]
    StorageResolve {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create storage directory {path}")]
    StorageCreate {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    /// Whether this error means the runtime configuration is absent or unusable.
    pub fn is_missing_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingConfiguration { .. }
                | Self::EmptyConfiguration { .. }
                | Self::EnvFileRead { .. }
                | Self::EnvFileSyntax { .. }
                | Self::MissingKeys { .. }
        )
    }
}
