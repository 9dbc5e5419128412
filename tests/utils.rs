use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gitfleet::ops::git::CmdResult;
use gitfleet::ops::git::GitRunner;
use tokio::process::Command;
use tracing_subscriber::EnvFilter;

pub fn setup_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init();
}

/// Run a git command in `dir`, failing the test if it does not succeed.
pub async fn run_git(dir: &Path, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    anyhow::ensure!(status.success(), "git {:?} failed in {}", args, dir.display());

    Ok(())
}

/// Creates a git repository with a `main` branch and one commit.
///
/// The directory should already exist; basic git config needed for commits
/// is set up too.
pub async fn create_git_repo(dir: &Path) -> anyhow::Result<()> {
    run_git(dir, &["init"]).await?;
    run_git(dir, &["config", "user.name", "Test User"]).await?;
    run_git(dir, &["config", "user.email", "test@example.com"]).await?;
    run_git(dir, &["checkout", "-b", "main"]).await?;

    tokio::fs::write(dir.join("README.md"), "hello\n").await?;
    run_git(dir, &["add", "README.md"]).await?;
    run_git(dir, &["commit", "-m", "initial commit"]).await?;

    Ok(())
}

/// Creates a branch at the current commit.
pub async fn create_branch(dir: &Path, name: &str) -> anyhow::Result<()> {
    run_git(dir, &["branch", name]).await
}

/// Creates a bare repository at `remote_dir`, wires it up as `origin`, and
/// pushes the given branches to it.
pub async fn add_bare_remote(
    dir: &Path,
    remote_dir: &Path,
    branches: &[&str],
) -> anyhow::Result<()> {
    let status = Command::new("git")
        .args(["init", "--bare"])
        .arg(remote_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    anyhow::ensure!(status.success(), "git init --bare failed");

    let remote_url = remote_dir.to_string_lossy();
    run_git(dir, &["remote", "add", "origin", &remote_url]).await?;
    for branch in branches {
        run_git(dir, &["push", "origin", branch]).await?;
    }

    Ok(())
}

// -----------------------------------------------------------------------------
// Stub runners

/// Stub runner with scripted per-subcommand responses and sane defaults.
///
/// Scripted results are consumed in order; once a subcommand's script runs
/// dry (or was never scripted), metadata queries answer like a healthy
/// repository and everything else succeeds.
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, VecDeque<CmdResult>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, subcommand: &str, results: Vec<CmdResult>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(subcommand.to_string(), results.into());
        self
    }

    /// How many times the given subcommand was invoked.
    pub fn count(&self, subcommand: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args[0] == subcommand)
            .count()
    }
}

#[async_trait]
impl GitRunner for ScriptedRunner {
    async fn run(&self, args: Vec<String>, _timeout: Duration) -> CmdResult {
        self.calls.lock().unwrap().push(args.clone());

        if let Some(scripted) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(args[0].as_str())
            .and_then(VecDeque::pop_front)
        {
            return scripted;
        }

        match args[0].as_str() {
            "rev-parse" => CmdResult::ok("main"),
            "rev-list" => CmdResult::ok("1"),
            "log" => CmdResult::ok("abc123|Test User|test@example.com|Mon Aug 3|initial commit"),
            _ => CmdResult::ok(""),
        }
    }
}

/// Stub runner that dies on first contact, taking its whole repository task
/// down with it.
pub struct PanickingRunner;

#[async_trait]
impl GitRunner for PanickingRunner {
    async fn run(&self, args: Vec<String>, _timeout: Duration) -> CmdResult {
        panic!("runner exploded while executing git {}", args.join(" "));
    }
}
