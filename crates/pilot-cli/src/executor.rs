//! Shell command execution
//!
//! Commands come straight from the model and run unrestricted with the
//! privileges of this process. Use a `CommandGuard` to put a check in front.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Outcome classification of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Error,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Success => "success",
            CommandStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured result of one command
///
/// `output` holds stdout when the command succeeded and stderr otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub output: String,
    pub status: CommandStatus,
}

impl CommandResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: CommandStatus::Success,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: CommandStatus::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// Something that can run a shell command string
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion. Never fails; problems become `CommandStatus::Error`.
    async fn run(&self, command: &str) -> CommandResult;
}

/// Runs commands through the host's command interpreter
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    shell_arg: &'static str,
    timeout: Duration,
    max_output_len: usize,
    working_dir: Option<PathBuf>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        let (shell, shell_arg) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        Self {
            shell: shell.to_string(),
            shell_arg,
            timeout: Duration::from_secs(120),
            max_output_len: 50_000,
            working_dir: None,
        }
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific interpreter, e.g. `bash`
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_len(mut self, len: usize) -> Self {
        self.max_output_len = len;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    fn truncate(&self, text: &str) -> String {
        if text.len() <= self.max_output_len {
            return text.to_string();
        }

        let mut end = self.max_output_len;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}\n\n[Output truncated at {} bytes]",
            &text[..end],
            self.max_output_len
        )
    }
}

#[async_trait]
impl CommandRunner for ShellExecutor {
    async fn run(&self, command: &str) -> CommandResult {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(self.shell_arg)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(command = %command, shell = %self.shell, "Running command");

        match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let code = output.status.code();
                if output.status.success() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    CommandResult::success(self.truncate(stdout.trim()))
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    debug!(command = %command, exit_code = ?code, "Command exited with failure");
                    CommandResult::error(self.truncate(stderr.trim()))
                }
            }
            Ok(Err(e)) => {
                warn!(command = %command, error = %e, "Failed to execute command");
                CommandResult::error(e.to_string())
            }
            Err(_) => {
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                CommandResult::error(format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            }
        }
    }
}
