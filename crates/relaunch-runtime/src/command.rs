#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{program} not found — is it installed and on PATH?")]
    NotFound {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} command failed: {args:?}\n{stderr}")]
    CommandFailed {
        program: String,
        args: Vec<String>,
        stderr: String,
    },

    #[error("{program} output was not valid UTF-8")]
    InvalidUtf8 {
        program: String,
        source: std::string::FromUtf8Error,
    },
}

/// Daemon messages for a missing container, image, or volume.
///
/// Socket errors (`connect: no such file or directory`) must not match.
const NO_SUCH_OBJECT: &[&str] = &[
    "no such container",
    "no such image",
    "no such volume",
    "no such object",
];

impl CommandError {
    /// Whether the command failed because the named object does not exist
    /// (`No such container`, `No such image`, `no such volume`).
    pub fn is_no_such_object(&self) -> bool {
        match self {
            Self::CommandFailed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                NO_SUCH_OBJECT.iter().any(|m| stderr.contains(m))
            }
            _ => false,
        }
    }
}
