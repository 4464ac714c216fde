use std::path::{Path, PathBuf};

/// The directory and container definition an image is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub dir: PathBuf,
    pub dockerfile: PathBuf,
}

impl BuildContext {
    pub fn new(dir: &Path, dockerfile: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            dockerfile: dir.join(dockerfile),
        }
    }

    /// Read the container definition and report whether it declares `mount`
    /// as a `VOLUME`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingDockerfile`](crate::Error::MissingDockerfile) if the file does not exist
    /// - [`Error::DockerfileRead`](crate::Error::DockerfileRead) on I/O failure
    pub fn declares_volume(&self, mount: &str) -> crate::Result<bool> {
        if !self.dockerfile.is_file() {
            return Err(crate::Error::MissingDockerfile {
                path: self.dockerfile.clone(),
            });
        }
        let content =
            std::fs::read_to_string(&self.dockerfile).map_err(|e| crate::Error::DockerfileRead {
                path: self.dockerfile.clone(),
                source: e,
            })?;
        Ok(volume_paths(&content)
            .iter()
            .any(|p| p.trim_end_matches('/') == mount.trim_end_matches('/')))
    }
}

/// Collect every path named by a `VOLUME` instruction, in shell or JSON form.
fn volume_paths(dockerfile: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in instructions(dockerfile) {
        let line = line.trim();
        let Some((instr, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        if !instr.eq_ignore_ascii_case("VOLUME") {
            continue;
        }
        let rest = rest.trim();
        if let Some(inner) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            paths.extend(
                inner
                    .split(',')
                    .map(|p| p.trim().trim_matches('"').to_owned())
                    .filter(|p| !p.is_empty()),
            );
        } else {
            paths.extend(rest.split_whitespace().map(str::to_owned));
        }
    }
    paths
}

/// Logical instructions with escaped line breaks joined and comments dropped.
fn instructions(dockerfile: &str) -> Vec<String> {
    let escape = escape_char(dockerfile);
    let mut out = Vec::new();
    let mut current = String::new();
    for line in dockerfile.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.strip_suffix(escape) {
            Some(head) => {
                current.push_str(head);
                current.push(' ');
            }
            None => {
                current.push_str(line);
                out.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

/// The `# escape=` parser directive, if the file opens with one.
fn escape_char(dockerfile: &str) -> char {
    for line in dockerfile.lines() {
        let Some(directive) = line.trim().strip_prefix('#') else {
            break;
        };
        let Some((key, value)) = directive.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("escape") {
            if let Some(c) = value.trim().chars().next() {
                return c;
            }
        }
    }
    '\\'
}
