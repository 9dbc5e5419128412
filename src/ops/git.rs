use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;

// -----------------------------------------------------------------------------
// Types

/// Result of one external git invocation.
///
/// Timeouts and spawn failures are folded into a failed result (the text ends
/// up in `stderr`) so callers only ever deal with this one shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CmdResult {
    pub fn ok(stdout: &str) -> Self {
        Self {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(stderr: &str, exit_code: i32) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }
}

// -----------------------------------------------------------------------------
// GitRunner trait

/// Executes git commands in one repository's working directory.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run(&self, args: Vec<String>, timeout: Duration) -> CmdResult;
}

// -----------------------------------------------------------------------------
// RealGit

/// Real implementation that calls the git CLI.
pub struct RealGit {
    path: PathBuf,
}

impl RealGit {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl GitRunner for RealGit {
    async fn run(&self, args: Vec<String>, timeout: Duration) -> CmdResult {
        debug!("git {} in {}", args.join(" "), self.path.display());

        let invocation = Command::new("git")
            .current_dir(&self.path)
            .args(&args)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, invocation).await {
            Ok(Ok(output)) => CmdResult {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                exit_code: output.status.code().unwrap_or(-1),
            },
            Ok(Err(err)) => CmdResult::failed(&format!("failed to execute git: {err}"), -1),
            Err(_) => CmdResult::failed(
                &format!("git command timed out after {} seconds", timeout.as_secs()),
                -1,
            ),
        }
    }
}
