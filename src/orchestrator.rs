use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::batch::BatchRunner;
use crate::branch::BranchOps;
use crate::config::BranchConfig;
use crate::config::Config;
use crate::config::RepositoryConfig;
use crate::ops::git::GitRunner;
use crate::outcome::OperationKind;
use crate::outcome::OperationOutcome;
use crate::report::BranchReport;
use crate::report::Report;

// -----------------------------------------------------------------------------
// Operation

/// A branch operation the orchestrator can run, with its parameters.
///
/// Dispatch is an exhaustive match, so adding a variant forces every dispatch
/// site to handle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    Pull,
    Push { set_upstream: bool },
    /// Merge the configured branch into `target` (current branch when `None`)
    /// using the branch's configured strategy.
    Merge { target: Option<String> },
    Create { from: Option<String> },
    Switch { create_if_missing: bool },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Fetch => OperationKind::Fetch,
            Self::Pull => OperationKind::Pull,
            Self::Push { .. } => OperationKind::Push,
            Self::Merge { .. } => OperationKind::Merge,
            Self::Create { .. } => OperationKind::Create,
            Self::Switch { .. } => OperationKind::Switch,
        }
    }

    async fn apply(&self, ops: &BranchOps, branch: &BranchConfig) -> OperationOutcome {
        match self {
            Self::Fetch => ops.fetch_branch(&branch.name, &branch.remote).await,
            Self::Pull => ops.pull_branch(Some(&branch.name), &branch.remote).await,
            Self::Push { set_upstream } => {
                ops.push_branch(Some(&branch.name), &branch.remote, *set_upstream)
                    .await
            }
            Self::Merge { target } => {
                ops.merge_branch(&branch.name, target.as_deref(), branch.merge_strategy)
                    .await
            }
            Self::Create { from } => ops.create_branch(&branch.name, from.as_deref()).await,
            Self::Switch { create_if_missing } => {
                ops.switch_branch(&branch.name, *create_if_missing).await
            }
        }
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fetch" => Ok(Self::Fetch),
            "pull" => Ok(Self::Pull),
            "push" => Ok(Self::Push { set_upstream: false }),
            "merge" => Ok(Self::Merge { target: None }),
            "create" => Ok(Self::Create { from: None }),
            "switch" => Ok(Self::Switch {
                create_if_missing: false,
            }),
            other => Err(anyhow!(
                "unknown operation '{other}' (expected fetch, pull, push, merge, create, or switch)"
            )),
        }
    }
}

/// Parse a list of operation names, e.g. from the command line.
pub fn parse_operations(names: &[String]) -> Result<Vec<Operation>> {
    names.iter().map(|name| name.parse()).collect()
}

// -----------------------------------------------------------------------------
// BranchProcedure

/// The per-branch unit of work a workflow runs.
///
/// Implementations return the outcomes they produced; an `Err` means the
/// procedure itself broke and is recorded as a run-level error for that
/// branch. The built-in operation-list workflow and caller-supplied custom
/// workflows both go through this seam.
#[async_trait]
pub trait BranchProcedure: Send + Sync {
    async fn run(&self, ops: &BranchOps, branch: &BranchConfig) -> Result<Vec<OperationOutcome>>;
}

/// Built-in procedure: run a fixed operation list in order.
struct OperationList {
    operations: Vec<Operation>,
}

#[async_trait]
impl BranchProcedure for OperationList {
    async fn run(&self, ops: &BranchOps, branch: &BranchConfig) -> Result<Vec<OperationOutcome>> {
        let mut outcomes = Vec::with_capacity(self.operations.len());

        for operation in &self.operations {
            info!(
                "executing {} on {} in {}",
                operation.kind(),
                branch.name,
                ops.repo_name()
            );

            let outcome = operation.apply(ops, branch).await;
            if !outcome.success {
                // Record the failure and keep going; later operations still
                // run so the report is as complete as possible.
                warn!(
                    "operation {} failed on {}: {}",
                    outcome.kind,
                    branch.name,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

// -----------------------------------------------------------------------------
// Orchestrator

/// Builds a [`GitRunner`] for a repository; the seam for substituting the
/// external tool in tests and embeddings.
pub type RunnerFactory = dyn Fn(&RepositoryConfig) -> Arc<dyn GitRunner> + Send + Sync;

/// Coordinates branch operations across every configured repository and folds
/// the results into one [`Report`].
///
/// Failures stay inside their own scope: a failed operation is recorded on
/// its branch, a broken branch never stops its siblings, and a broken
/// repository becomes one run-level error while the rest of the run
/// continues. A workflow call always returns a report.
pub struct Orchestrator {
    config: Config,
    runner_factory: Option<Arc<RunnerFactory>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("runner_factory", &self.runner_factory.is_some())
            .finish()
    }
}

impl Orchestrator {
    /// Validates the configuration; the only error a workflow run can raise
    /// happens here, before any work starts.
    pub fn new(config: Config) -> Result<Self> {
        Self::build(config, None)
    }

    pub fn with_runner_factory(config: Config, factory: Arc<RunnerFactory>) -> Result<Self> {
        Self::build(config, Some(factory))
    }

    fn build(config: Config, runner_factory: Option<Arc<RunnerFactory>>) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            bail!("configuration errors: {}", problems.join(", "));
        }

        Ok(Self {
            config,
            runner_factory,
        })
    }

    fn facade(&self, repo: &RepositoryConfig) -> BranchOps {
        let retry = self.config.retry_policy();
        match &self.runner_factory {
            Some(factory) => BranchOps::with_runner(repo.clone(), factory(repo), retry),
            None => BranchOps::new(repo.clone(), retry),
        }
    }

    /// Run an operation list over the targeted repositories and branches.
    #[instrument(skip(self))]
    pub async fn run_workflow(
        &self,
        operations: &[Operation],
        repositories: Option<&[String]>,
        branches: Option<&[String]>,
    ) -> Report {
        let procedure = Arc::new(OperationList {
            operations: operations.to_vec(),
        });
        self.run_with(procedure, repositories, branches).await
    }

    /// Run a caller-supplied per-branch procedure over the targeted
    /// repositories and branches.
    #[instrument(skip(self, procedure))]
    pub async fn run_custom_workflow(
        &self,
        procedure: Arc<dyn BranchProcedure>,
        repositories: Option<&[String]>,
        branches: Option<&[String]>,
    ) -> Report {
        self.run_with(procedure, repositories, branches).await
    }

    /// Fetch every configured branch.
    pub async fn fetch_all(&self) -> Report {
        info!("starting fetch workflow for all branches");
        self.run_workflow(&[Operation::Fetch], None, None).await
    }

    /// Fetch and pull every configured branch.
    pub async fn sync_all(&self) -> Report {
        info!("starting sync workflow for all branches");
        self.run_workflow(&[Operation::Fetch, Operation::Pull], None, None)
            .await
    }

    async fn run_with(
        &self,
        procedure: Arc<dyn BranchProcedure>,
        repositories: Option<&[String]>,
        branches: Option<&[String]>,
    ) -> Report {
        let started_at = Utc::now();
        let mut errors: Vec<String> = Vec::new();

        let targets = resolve_repositories(&self.config.repositories, repositories);
        if targets.is_empty() {
            error!("no repositories to operate on");
            errors.push("no repositories configured or matched the filter".to_string());
            return Report::assemble(Vec::new(), started_at, Utc::now(), errors);
        }

        let branch_filter: Option<Vec<String>> = branches.map(|names| names.to_vec());
        let mut collected: Vec<BranchReport> = Vec::new();

        if self.config.parallel_operations && targets.len() > 1 {
            info!("processing {} repositories in parallel", targets.len());

            let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
            let mut join_set = JoinSet::new();
            let mut names: HashMap<tokio::task::Id, String> = HashMap::new();

            for repo in targets {
                let semaphore = Arc::clone(&semaphore);
                let facade = Arc::new(self.facade(&repo));
                let procedure = Arc::clone(&procedure);
                let branch_filter = branch_filter.clone();
                let repo_name = repo.name.clone();

                let handle = join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    run_on_repository(facade, repo, procedure, branch_filter).await
                });
                names.insert(handle.id(), repo_name);
            }

            while let Some(joined) = join_set.join_next_with_id().await {
                match joined {
                    Ok((id, (reports, repo_errors))) => {
                        if let Some(name) = names.remove(&id) {
                            info!("completed operations on repository: {name}");
                        }
                        collected.extend(reports);
                        errors.extend(repo_errors);
                    }
                    Err(err) => {
                        let name = names
                            .remove(&err.id())
                            .unwrap_or_else(|| "unknown".to_string());
                        error!("error processing repository {name}: {err}");
                        errors.push(format!("repository '{name}' failed: {err}"));
                    }
                }
            }
        } else {
            info!("processing repositories sequentially");

            for repo in targets {
                let facade = Arc::new(self.facade(&repo));
                let procedure = Arc::clone(&procedure);
                let branch_filter = branch_filter.clone();
                let repo_name = repo.name.clone();

                // Spawned even here so a dying repository task is isolated
                // exactly as in parallel mode, just strictly one at a time.
                let task = tokio::spawn(async move {
                    run_on_repository(facade, repo, procedure, branch_filter).await
                });

                match task.await {
                    Ok((reports, repo_errors)) => {
                        info!("completed operations on repository: {repo_name}");
                        collected.extend(reports);
                        errors.extend(repo_errors);
                    }
                    Err(err) => {
                        error!("error processing repository {repo_name}: {err}");
                        errors.push(format!("repository '{repo_name}' failed: {err}"));
                    }
                }
            }
        }

        Report::assemble(collected, started_at, Utc::now(), errors)
    }
}

// -----------------------------------------------------------------------------
// Per-repository workflow

/// Run the procedure for every targeted branch of one repository, then
/// snapshot each branch. Returns the branch reports plus any errors that
/// prevented a branch from producing one.
async fn run_on_repository(
    facade: Arc<BranchOps>,
    repo: RepositoryConfig,
    procedure: Arc<dyn BranchProcedure>,
    branch_filter: Option<Vec<String>>,
) -> (Vec<BranchReport>, Vec<String>) {
    let repo_name = repo.name.clone();

    // A repository's work tree is only ever touched by one task at a time;
    // the single-worker batch still isolates each branch's task.
    let batch = BatchRunner::new(1);

    if let Err(err) = facade.verify_repository().await {
        return (
            Vec::new(),
            vec![format!("repository '{repo_name}' failed: {err}")],
        );
    }

    let targets = resolve_branches(&repo.branches, branch_filter.as_deref());
    if targets.is_empty() {
        warn!("no branches configured for repository: {repo_name}");
        return (Vec::new(), Vec::new());
    }

    let configs: HashMap<String, BranchConfig> = targets
        .iter()
        .map(|branch| (branch.name.clone(), branch.clone()))
        .collect();
    let names: Vec<String> = targets.iter().map(|branch| branch.name.clone()).collect();

    let task_facade = Arc::clone(&facade);
    let task_repo = repo_name.clone();
    let results = batch
        .run(names, move |branch_name| {
            let facade = Arc::clone(&task_facade);
            let procedure = Arc::clone(&procedure);
            let branch = configs.get(&branch_name).cloned();
            let repo_name = task_repo.clone();
            async move {
                let Some(branch) = branch else {
                    return Err(format!("unknown branch '{branch_name}'"));
                };

                match procedure.run(&facade, &branch).await {
                    Ok(outcomes) => {
                        let status = facade.branch_status(&branch.name).await;
                        Ok(BranchReport::new(
                            &branch.name,
                            &repo_name,
                            outcomes,
                            Some(status),
                        ))
                    }
                    Err(err) => Err(format!(
                        "workflow failed for branch '{}' in repository '{repo_name}': {err}",
                        branch.name
                    )),
                }
            }
        })
        .await;

    let mut reports = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result.result {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(message)) => {
                error!("{message}");
                errors.push(message);
            }
            Err(detail) => errors.push(format!(
                "branch '{}' task failed in repository '{repo_name}': {detail}",
                result.target
            )),
        }
    }

    (reports, errors)
}

// -----------------------------------------------------------------------------
// Target resolution

fn resolve_repositories(
    configured: &[RepositoryConfig],
    filter: Option<&[String]>,
) -> Vec<RepositoryConfig> {
    match filter {
        Some(names) => configured
            .iter()
            .filter(|repo| names.contains(&repo.name))
            .cloned()
            .collect(),
        None => configured.to_vec(),
    }
}

fn resolve_branches(configured: &[BranchConfig], filter: Option<&[String]>) -> Vec<BranchConfig> {
    match filter {
        Some(names) => configured
            .iter()
            .filter(|branch| names.contains(&branch.name))
            .cloned()
            .collect(),
        None => configured.to_vec(),
    }
}
