use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use anyhow::bail;
use futures_util::future::join_all;
use log::warn;
use regex::Regex;
use serde::Serialize;

use crate::config::MergeStrategy;
use crate::config::RepositoryConfig;
use crate::ops::git::CmdResult;
use crate::ops::git::GitRunner;
use crate::ops::git::RealGit;
use crate::outcome::OperationKind;
use crate::outcome::OperationOutcome;
use crate::retry::RetryPolicy;
use crate::retry::retry_with_backoff;

/// Timeout for metadata queries and local operations.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for a single fetch attempt.
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for a single pull or push attempt.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

static TRACKING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("tracking regex"));
static AHEAD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ahead (\d+)").expect("ahead regex"));
static BEHIND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"behind (\d+)").expect("behind regex"));

// -----------------------------------------------------------------------------
// Types

/// One line of the repository's branch listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub current: bool,
    pub remote: Option<String>,
    pub last_commit: Option<String>,
    pub ahead: u32,
    pub behind: u32,
}

/// Point-in-time snapshot of a branch. This is a read-only query result, not
/// an operation outcome.
#[derive(Debug, Clone, Serialize)]
pub struct BranchStatus {
    pub branch: String,
    pub exists: bool,
    pub commit_count: u64,
    pub last_commit: Option<CommitMeta>,
}

impl BranchStatus {
    fn missing(branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
            exists: false,
            commit_count: 0,
            last_commit: None,
        }
    }
}

/// Metadata of a branch's most recent commit.
#[derive(Debug, Clone, Serialize)]
pub struct CommitMeta {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub date: String,
    pub message: String,
}

// -----------------------------------------------------------------------------
// Branch name validation

/// Check a branch name against the rules git enforces for refs.
///
/// Rejects whitespace, the `~ ^ : ? * [ \` characters and the `..` sequence,
/// leading or trailing slashes, and a trailing `.lock`.
pub fn validate_branch_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    if name.chars().any(char::is_whitespace) {
        return false;
    }

    if name.contains(['~', '^', ':', '?', '*', '[', '\\']) || name.contains("..") {
        return false;
    }

    if name.starts_with('/') || name.ends_with('/') {
        return false;
    }

    if name.ends_with(".lock") {
        return false;
    }

    true
}

// -----------------------------------------------------------------------------
// BranchOps

/// Branch operations for one repository.
///
/// Every operation returns an [`OperationOutcome`]; expected failures (missing
/// branch, network trouble, detached HEAD, bad name) are reported in the
/// outcome rather than raised, so callers never need to catch anything to
/// handle them.
pub struct BranchOps {
    repo: RepositoryConfig,
    runner: Arc<dyn GitRunner>,
    retry: RetryPolicy,
}

impl BranchOps {
    pub fn new(repo: RepositoryConfig, retry: RetryPolicy) -> Self {
        let runner = Arc::new(RealGit::new(repo.path.clone()));
        Self { repo, runner, retry }
    }

    /// Build the facade over a custom runner. This is the seam tests and
    /// embedders use to substitute the external tool.
    pub fn with_runner(
        repo: RepositoryConfig,
        runner: Arc<dyn GitRunner>,
        retry: RetryPolicy,
    ) -> Self {
        Self { repo, runner, retry }
    }

    pub fn repo_name(&self) -> &str {
        &self.repo.name
    }

    async fn git(&self, args: &[&str], timeout: Duration) -> CmdResult {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.runner.run(owned, timeout).await
    }

    /// Run a network command through the retry executor.
    async fn retrying(&self, args: &[&str], timeout: Duration) -> CmdResult {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        retry_with_backoff(&self.retry, || {
            let args = owned.clone();
            async move { self.runner.run(args, timeout).await }
        })
        .await
    }

    /// Confirm the configured path actually is a git work tree.
    pub async fn verify_repository(&self) -> Result<()> {
        let result = self
            .git(&["rev-parse", "--is-inside-work-tree"], DEFAULT_TIMEOUT)
            .await;

        if !result.success {
            bail!(
                "not a git repository: {} ({})",
                self.repo.path.display(),
                result.stderr
            );
        }

        Ok(())
    }

    /// The current branch name, or `None` in a detached HEAD state.
    pub async fn current_branch(&self) -> Option<String> {
        let result = self
            .git(&["rev-parse", "--abbrev-ref", "HEAD"], DEFAULT_TIMEOUT)
            .await;

        if !result.success {
            return None;
        }

        let branch = result.stdout.trim().to_string();
        (branch != "HEAD").then_some(branch)
    }

    /// List branches, skipping any line that does not parse.
    pub async fn list_branches(&self, include_remote: bool) -> Vec<BranchInfo> {
        let mut args = vec!["branch", "-vv"];
        if include_remote {
            args.push("-a");
        }

        let result = self.git(&args, DEFAULT_TIMEOUT).await;
        if !result.success {
            log::error!("failed to list branches: {}", result.stderr);
            return Vec::new();
        }

        result.stdout.lines().filter_map(parse_branch_line).collect()
    }

    pub async fn create_branch(&self, name: &str, from: Option<&str>) -> OperationOutcome {
        if !validate_branch_name(name) {
            return OperationOutcome::failure(
                name,
                OperationKind::Create,
                "Invalid branch name",
                "branch name contains invalid characters",
            );
        }

        if self.branch_exists(name).await {
            return OperationOutcome::failure(
                name,
                OperationKind::Create,
                "Branch already exists",
                &format!("branch '{name}' already exists"),
            );
        }

        let mut args = vec!["branch", name];
        if let Some(from) = from {
            args.push(from);
        }

        let result = self.git(&args, DEFAULT_TIMEOUT).await;
        OperationOutcome::from_cmd(
            name,
            OperationKind::Create,
            &result,
            &format!("Branch '{name}' created"),
            "Failed to create branch",
        )
    }

    pub async fn switch_branch(&self, name: &str, create_if_missing: bool) -> OperationOutcome {
        if !validate_branch_name(name) {
            return OperationOutcome::failure(
                name,
                OperationKind::Switch,
                "Invalid branch name",
                "branch name contains invalid characters",
            );
        }

        let exists = self.branch_exists(name).await;
        if !exists && !create_if_missing {
            return OperationOutcome::failure(
                name,
                OperationKind::Switch,
                "Branch does not exist",
                &format!("branch '{name}' not found"),
            );
        }

        let mut args = vec!["checkout"];
        if create_if_missing && !exists {
            args.push("-b");
        }
        args.push(name);

        let result = self.git(&args, DEFAULT_TIMEOUT).await;
        OperationOutcome::from_cmd(
            name,
            OperationKind::Switch,
            &result,
            &format!("Switched to branch '{name}'"),
            "Failed to switch branch",
        )
    }

    pub async fn fetch_branch(&self, name: &str, remote: &str) -> OperationOutcome {
        let result = self.retrying(&["fetch", remote, name], FETCH_TIMEOUT).await;
        OperationOutcome::from_cmd(
            name,
            OperationKind::Fetch,
            &result,
            &format!("Fetched '{name}' from '{remote}'"),
            "Failed to fetch branch",
        )
    }

    /// Pull a branch, defaulting to the current branch when `name` is `None`.
    pub async fn pull_branch(&self, name: Option<&str>, remote: &str) -> OperationOutcome {
        let Some(branch) = self.resolve_branch(name).await else {
            return OperationOutcome::failure(
                "unknown",
                OperationKind::Pull,
                "Cannot determine current branch",
                "detached HEAD state",
            );
        };

        let result = self
            .retrying(&["pull", remote, &branch], TRANSFER_TIMEOUT)
            .await;
        OperationOutcome::from_cmd(
            &branch,
            OperationKind::Pull,
            &result,
            &format!("Pulled updates for '{branch}'"),
            "Failed to pull updates",
        )
    }

    /// Push a branch, defaulting to the current branch when `name` is `None`.
    pub async fn push_branch(
        &self,
        name: Option<&str>,
        remote: &str,
        set_upstream: bool,
    ) -> OperationOutcome {
        let Some(branch) = self.resolve_branch(name).await else {
            return OperationOutcome::failure(
                "unknown",
                OperationKind::Push,
                "Cannot determine branch to push",
                "detached HEAD state",
            );
        };

        let mut args = vec!["push"];
        if set_upstream {
            args.push("-u");
        }
        args.push(remote);
        args.push(&branch);

        let result = self.retrying(&args, TRANSFER_TIMEOUT).await;
        OperationOutcome::from_cmd(
            &branch,
            OperationKind::Push,
            &result,
            &format!("Pushed '{branch}' to '{remote}'"),
            "Failed to push branch",
        )
    }

    /// Merge `source` into `target` (the current branch when `None`) using
    /// the given strategy. Conflict output is reported like any other merge
    /// failure, with the tool's stderr preserved verbatim.
    pub async fn merge_branch(
        &self,
        source: &str,
        target: Option<&str>,
        strategy: MergeStrategy,
    ) -> OperationOutcome {
        let current = self.current_branch().await;
        let Some(target_name) = target.map(str::to_string).or_else(|| current.clone()) else {
            return OperationOutcome::failure(
                "unknown",
                OperationKind::Merge,
                "Cannot determine target branch",
                "detached HEAD state",
            );
        };

        if let Some(explicit) = target
            && current.as_deref() != Some(explicit)
        {
            let switched = self.switch_branch(explicit, false).await;
            if !switched.success {
                return switched;
            }
        }

        let args = match strategy {
            MergeStrategy::Rebase => vec!["rebase", source],
            MergeStrategy::Squash => vec!["merge", "--squash", source],
            MergeStrategy::Merge => vec!["merge", source],
        };

        let result = self.git(&args, DEFAULT_TIMEOUT).await;
        OperationOutcome::from_cmd(
            &format!("{source} -> {target_name}"),
            OperationKind::Merge,
            &result,
            &format!("Merged '{source}' into '{target_name}' ({strategy})"),
            "Failed to merge",
        )
    }

    /// Cherry-pick a commit, optionally switching to `branch` first.
    pub async fn cherry_pick(&self, commit: &str, branch: Option<&str>) -> OperationOutcome {
        let label = branch.unwrap_or("current");

        if let Some(branch) = branch {
            let switched = self.switch_branch(branch, false).await;
            if !switched.success {
                return switched;
            }
        }

        let short = commit.get(..8).unwrap_or(commit);
        let result = self.git(&["cherry-pick", commit], DEFAULT_TIMEOUT).await;
        OperationOutcome::from_cmd(
            label,
            OperationKind::CherryPick,
            &result,
            &format!("Cherry-picked {short}"),
            "Cherry-pick failed",
        )
    }

    pub async fn stash_save(&self, message: Option<&str>) -> OperationOutcome {
        let mut args = vec!["stash", "push"];
        if let Some(message) = message {
            args.push("-m");
            args.push(message);
        }

        let result = self.git(&args, DEFAULT_TIMEOUT).await;
        OperationOutcome::from_cmd(
            "current",
            OperationKind::StashSave,
            &result,
            "Changes stashed",
            "Failed to stash",
        )
    }

    pub async fn stash_pop(&self, index: usize) -> OperationOutcome {
        let entry = format!("stash@{{{index}}}");
        let result = self.git(&["stash", "pop", &entry], DEFAULT_TIMEOUT).await;
        OperationOutcome::from_cmd(
            "current",
            OperationKind::StashPop,
            &result,
            &format!("Applied and dropped {entry}"),
            "Failed to pop stash",
        )
    }

    /// Create a tag; a message makes it an annotated tag.
    pub async fn tag_create(&self, name: &str, message: Option<&str>) -> OperationOutcome {
        let args = match message {
            Some(message) => vec!["tag", "-a", name, "-m", message],
            None => vec!["tag", name],
        };

        let result = self.git(&args, DEFAULT_TIMEOUT).await;
        OperationOutcome::from_cmd(
            name,
            OperationKind::TagCreate,
            &result,
            &format!("Tag '{name}' created"),
            "Failed to create tag",
        )
    }

    pub async fn tag_delete(&self, name: &str) -> OperationOutcome {
        let result = self.git(&["tag", "-d", name], DEFAULT_TIMEOUT).await;
        OperationOutcome::from_cmd(
            name,
            OperationKind::TagDelete,
            &result,
            &format!("Tag '{name}' deleted"),
            "Failed to delete tag",
        )
    }

    /// Push a tag to a remote. Network operation, so it retries.
    pub async fn tag_push(&self, name: &str, remote: &str) -> OperationOutcome {
        let result = self.retrying(&["push", remote, name], TRANSFER_TIMEOUT).await;
        OperationOutcome::from_cmd(
            name,
            OperationKind::TagPush,
            &result,
            &format!("Tag '{name}' pushed to '{remote}'"),
            "Failed to push tag",
        )
    }

    /// Snapshot a branch's commit count and last-commit metadata.
    pub async fn branch_status(&self, name: &str) -> BranchStatus {
        let count = self.git(&["rev-list", "--count", name], DEFAULT_TIMEOUT).await;
        if !count.success {
            return BranchStatus::missing(name);
        }

        let commit_count = count.stdout.trim().parse().unwrap_or_else(|_| {
            warn!("unparseable commit count for '{name}': {}", count.stdout);
            0
        });

        let log = self
            .git(
                &["log", "-1", "--format=%H|%an|%ae|%ad|%s", name],
                DEFAULT_TIMEOUT,
            )
            .await;
        let last_commit = log.success.then(|| parse_commit_meta(&log.stdout)).flatten();

        BranchStatus {
            branch: name.to_string(),
            exists: true,
            commit_count,
            last_commit,
        }
    }

    /// Snapshot several branches concurrently.
    pub async fn statuses(&self, names: &[String]) -> Vec<BranchStatus> {
        join_all(names.iter().map(|name| self.branch_status(name))).await
    }

    async fn branch_exists(&self, name: &str) -> bool {
        self.list_branches(false).await.iter().any(|b| b.name == name)
    }

    async fn resolve_branch(&self, name: Option<&str>) -> Option<String> {
        match name {
            Some(name) => Some(name.to_string()),
            None => self.current_branch().await,
        }
    }
}

// -----------------------------------------------------------------------------
// Listing parsers

/// Parse one `git branch -vv` line. Returns `None` for anything that does not
/// look like a branch entry (blank lines, detached HEAD markers, noise).
fn parse_branch_line(line: &str) -> Option<BranchInfo> {
    let trimmed = line.trim_end();
    if trimmed.trim().is_empty() {
        return None;
    }

    let current = trimmed.starts_with('*');
    let body = trimmed.trim_start_matches(['*', '+']).trim_start();

    // Detached HEAD renders as "(HEAD detached at ...)".
    if body.starts_with('(') {
        return None;
    }

    let mut parts = body.split_whitespace();
    let name = parts.next()?.to_string();
    let last_commit = parts.next().map(str::to_string);

    let mut remote = None;
    let mut ahead = 0;
    let mut behind = 0;

    if let Some(tracking) = TRACKING_RE.captures(body).and_then(|c| c.get(1)) {
        let tracking = tracking.as_str();
        remote = Some(
            tracking
                .split_once(':')
                .map_or(tracking, |(head, _)| head)
                .to_string(),
        );
        if let Some(m) = AHEAD_RE.captures(tracking).and_then(|c| c.get(1)) {
            ahead = m.as_str().parse().unwrap_or(0);
        }
        if let Some(m) = BEHIND_RE.captures(tracking).and_then(|c| c.get(1)) {
            behind = m.as_str().parse().unwrap_or(0);
        }
    }

    Some(BranchInfo {
        name,
        current,
        remote,
        last_commit,
        ahead,
        behind,
    })
}

fn parse_commit_meta(line: &str) -> Option<CommitMeta> {
    let parts: Vec<&str> = line.trim().splitn(5, '|').collect();
    if parts.len() != 5 {
        return None;
    }

    Some(CommitMeta {
        hash: parts[0].to_string(),
        author_name: parts[1].to_string(),
        author_email: parts[2].to_string(),
        date: parts[3].to_string(),
        message: parts[4].to_string(),
    })
}
