//! Runtime configuration (env file) validation.
//!
//! The env file is owned by the operator and forwarded to the container
//! verbatim with `docker run --env-file`, so it is read with Docker's
//! grammar rather than a shell-style dotenv grammar:
//!
//! - one `KEY=VALUE` per line, split on the first `=`; no multi-line values
//! - quotes are part of the value (`KEY="x"` injects `"x"` with the quotes)
//! - no `$VAR` expansion
//! - a bare `KEY` line passes the host's value through, and is skipped if
//!   the host has no such variable
//! - blank lines and lines starting with `#` are ignored
//!
//! Validation only confirms the file exists, holds at least one entry that
//! will be injected, and names every required key. Values are never kept.

use std::path::{Path, PathBuf};

/// A validated env file: its location and the key names it defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub path: PathBuf,
    /// Keys that will be injected, in file order.
    pub keys: Vec<String>,
    /// Bare `KEY` lines whose host variable is unset; Docker drops these.
    pub unset_passthrough: Vec<String>,
    /// Keys whose value is wrapped in quotes that Docker will keep.
    pub quoted: Vec<String>,
}

impl RuntimeEnv {
    /// Validate the env file at `path`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingConfiguration`](crate::Error::MissingConfiguration) if the file is absent or not a regular file
    /// - [`Error::EnvFileRead`](crate::Error::EnvFileRead) on I/O failure or invalid UTF-8
    /// - [`Error::EnvFileSyntax`](crate::Error::EnvFileSyntax) on a line Docker would reject
    /// - [`Error::EmptyConfiguration`](crate::Error::EmptyConfiguration) if nothing would be injected
    /// - [`Error::MissingKeys`](crate::Error::MissingKeys) if a `required` key is absent
    pub fn validate(path: &Path, required: &[String]) -> crate::Result<Self> {
        if !path.is_file() {
            return Err(crate::Error::MissingConfiguration {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| crate::Error::EnvFileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut env = Self {
            path: path.to_path_buf(),
            keys: Vec::new(),
            unset_passthrough: Vec::new(),
            quoted: Vec::new(),
        };

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (line, None),
            };
            let syntax = |reason: &str| crate::Error::EnvFileSyntax {
                path: path.to_path_buf(),
                line: index + 1,
                reason: reason.to_owned(),
            };
            if key.is_empty() {
                return Err(syntax("no variable name"));
            }
            if key.contains(char::is_whitespace) {
                return Err(syntax("variable name contains whitespace"));
            }

            match value {
                Some(value) => {
                    if is_quoted(value) {
                        env.quoted.push(key.to_owned());
                    }
                }
                None if std::env::var_os(key).is_none() => {
                    env.unset_passthrough.push(key.to_owned());
                    continue;
                }
                None => {}
            }

            if !env.keys.iter().any(|k| k == key) {
                env.keys.push(key.to_owned());
            }
        }

        for key in &env.quoted {
            tracing::warn!(
                path = %path.display(),
                key = %key,
                "value is quoted; docker --env-file keeps the quotes as part of the value"
            );
        }
        for key in &env.unset_passthrough {
            tracing::warn!(
                path = %path.display(),
                key = %key,
                "pass-through key is not set on this host and will not be injected"
            );
        }

        if env.keys.is_empty() {
            return Err(crate::Error::EmptyConfiguration {
                path: path.to_path_buf(),
            });
        }

        let missing: Vec<String> = required
            .iter()
            .filter(|k| !env.contains(k))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(crate::Error::MissingKeys {
                path: path.to_path_buf(),
                keys: missing,
            });
        }

        tracing::debug!(path = %path.display(), keys = ?env.keys, "runtime configuration validated");

        Ok(env)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

fn is_quoted(value: &str) -> bool {
    let value = value.trim();
    value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
}
