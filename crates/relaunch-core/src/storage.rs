//! Durable storage binding.
//!
//! Database and log state live outside the image, at a location whose
//! identity (host path or volume name) stays fixed across rebuilds. The
//! location is bound at one in-container root, and the application is
//! pointed at it through three derived environment variables.

use std::path::{Path, PathBuf};

/// Subdirectory holding the database file.
pub const DB_SUBDIR: &str = "db";
/// Database file name inside [`DB_SUBDIR`].
pub const DB_FILE: &str = "app.sqlite3";
/// Subdirectory holding log files.
pub const LOG_SUBDIR: &str = "logs";

pub const ENV_DATA_DIR: &str = "DATA_DIR";
pub const ENV_DB_PATH: &str = "DB_PATH";
pub const ENV_LOG_DIR: &str = "LOG_DIR";

/// Where durable state lives on the host side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// A host directory, bind-mounted.
    HostDir(PathBuf),
    /// A named volume managed by the container runtime.
    Volume(String),
}

impl StorageLocation {
    /// Make a host directory absolute; volumes are returned unchanged.
    ///
    /// Bind mounts require absolute host paths.
    pub fn resolve(&self) -> crate::Result<Self> {
        match self {
            Self::HostDir(dir) => {
                let abs = std::path::absolute(dir).map_err(|e| crate::Error::StorageResolve {
                    path: dir.clone(),
                    source: e,
                })?;
                Ok(Self::HostDir(abs))
            }
            Self::Volume(name) => Ok(Self::Volume(name.clone())),
        }
    }

    /// Source half of the `-v source:target` argument.
    pub fn source(&self) -> String {
        match self {
            Self::HostDir(dir) => dir.display().to_string(),
            Self::Volume(name) => name.clone(),
        }
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostDir(dir) => write!(f, "host directory {}", dir.display()),
            Self::Volume(name) => write!(f, "volume {name}"),
        }
    }
}

/// A storage location attached at a fixed in-container root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageBinding {
    pub location: StorageLocation,
    mount: String,
}

impl StorageBinding {
    pub fn new(location: StorageLocation, mount: &str) -> Self {
        let trimmed = mount.trim_end_matches('/');
        let mount = if trimmed.is_empty() { "/" } else { trimmed };
        Self {
            location,
            mount: mount.to_owned(),
        }
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    pub fn data_dir(&self) -> String {
        self.mount.clone()
    }

    pub fn db_path(&self) -> String {
        format!("{}/{DB_SUBDIR}/{DB_FILE}", self.join_base())
    }

    pub fn log_dir(&self) -> String {
        format!("{}/{LOG_SUBDIR}", self.join_base())
    }

    fn join_base(&self) -> &str {
        if self.mount == "/" { "" } else { &self.mount }
    }

    /// Environment variables pointing the application at its durable state.
    pub fn derived_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_DATA_DIR, self.data_dir()),
            (ENV_DB_PATH, self.db_path()),
            (ENV_LOG_DIR, self.log_dir()),
        ]
    }

    /// Value for `docker run -v`.
    pub fn volume_arg(&self) -> String {
        format!("{}:{}", self.location.source(), self.mount)
    }

    /// Create the `db/` and `logs/` layout for a host directory.
    ///
    /// Returns `true` if anything was created. Volumes are left to the
    /// runtime and the application, so this is a no-op for them.
    pub fn ensure_host_layout(&self) -> crate::Result<bool> {
        let StorageLocation::HostDir(root) = &self.location else {
            return Ok(false);
        };

        let mut created = false;
        for sub in [DB_SUBDIR, LOG_SUBDIR] {
            let dir = root.join(sub);
            if !dir.is_dir() {
                create_dir(&dir)?;
                created = true;
            }
        }

        if created {
            tracing::info!(root = %root.display(), "created storage layout");
        }
        Ok(created)
    }
}

fn create_dir(dir: &Path) -> crate::Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| crate::Error::StorageCreate {
        path: dir.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn volume_binding(mount: &str) -> StorageBinding {
        StorageBinding::new(StorageLocation::Volume("watcher-data".to_owned()), mount)
    }

    #[test]
    fn derived_env_is_rooted_at_mount() {
        let binding = volume_binding("/app/data");
        assert_eq!(
            binding.derived_env(),
            vec![
                ("DATA_DIR", "/app/data".to_owned()),
                ("DB_PATH", "/app/data/db/app.sqlite3".to_owned()),
                ("LOG_DIR", "/app/data/logs".to_owned()),
            ]
        );
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let binding = volume_binding("/app/data/");
        assert_eq!(binding.mount(), "/app/data");
        assert_eq!(binding.volume_arg(), "watcher-data:/app/data");
    }

    #[test]
    fn root_mount_does_not_double_slash() {
        let binding = volume_binding("/");
        assert_eq!(binding.db_path(), "/db/app.sqlite3");
        assert_eq!(binding.log_dir(), "/logs");
    }

    #[test]
    fn resolve_makes_host_dir_absolute() {
        let loc = StorageLocation::HostDir(PathBuf::from("data"));
        let StorageLocation::HostDir(resolved) = loc.resolve().unwrap() else {
            panic!("expected host dir");
        };
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("data"));
    }

    #[test]
    fn host_layout_created_once() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("data");
        let binding = StorageBinding::new(StorageLocation::HostDir(root.clone()), "/app/data");

        assert!(binding.ensure_host_layout().unwrap());
        assert!(root.join("db").is_dir());
        assert!(root.join("logs").is_dir());

        assert!(!binding.ensure_host_layout().unwrap());
    }

    #[test]
    fn host_layout_preserves_existing_data() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("data");
        std::fs::create_dir_all(root.join("db")).unwrap();
        std::fs::write(root.join("db/app.sqlite3"), b"state").unwrap();

        let binding = StorageBinding::new(StorageLocation::HostDir(root.clone()), "/app/data");
        binding.ensure_host_layout().unwrap();

        assert_eq!(std::fs::read(root.join("db/app.sqlite3")).unwrap(), b"state");
        assert!(root.join("logs").is_dir());
    }

    #[test]
    fn volume_layout_is_noop() {
        assert!(!volume_binding("/app/data").ensure_host_layout().unwrap());
    }
}
