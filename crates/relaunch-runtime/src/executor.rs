use crate::command::CommandError;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Abstraction over CLI execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command and capture stdout.
    async fn exec(&self, args: &[String]) -> Result<String, CommandError>;

    /// Execute a command, streaming output to the terminal.
    async fn exec_streaming(&self, args: &[String]) -> Result<(), CommandError>;
}

/// Runs a fixed program (`docker`, `git`) as a child process.
#[derive(Debug, Clone)]
pub struct RealExecutor {
    program: String,
    current_dir: Option<PathBuf>,
}

impl RealExecutor {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            current_dir: None,
        }
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }

    pub fn git(work_tree: &Path) -> Self {
        Self::new("git").in_dir(work_tree)
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    fn command(&self, args: &[String]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn not_found(&self, source: std::io::Error) -> CommandError {
        CommandError::NotFound {
            program: self.program.clone(),
            source,
        }
    }
}

impl CommandExecutor for RealExecutor {
    async fn exec(&self, args: &[String]) -> Result<String, CommandError> {
        tracing::debug!(program = %self.program, ?args, "exec");

        let output = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.not_found(e))?;

        if output.status.success() {
            String::from_utf8(output.stdout).map_err(|e| CommandError::InvalidUtf8 {
                program: self.program.clone(),
                source: e,
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(CommandError::CommandFailed {
                program: self.program.clone(),
                args: args.to_vec(),
                stderr,
            })
        }
    }

    async fn exec_streaming(&self, args: &[String]) -> Result<(), CommandError> {
        tracing::debug!(program = %self.program, ?args, "exec (streaming)");

        let status = self
            .command(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.not_found(e))?;

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::CommandFailed {
                program: self.program.clone(),
                args: args.to_vec(),
                stderr: format!("exit code: {status}"),
            })
        }
    }
}
