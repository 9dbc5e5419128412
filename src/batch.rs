use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::outcome::OperationKind;
use crate::outcome::OperationOutcome;

// -----------------------------------------------------------------------------
// Types

/// The result of one target's task within a batch.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub target: String,
    /// `Err` carries the join-failure text when the task itself died
    /// (panicked or was cancelled) instead of returning.
    pub result: Result<T, String>,
}

/// Fans independent per-target tasks out across a bounded pool.
///
/// Each target runs in its own task; one target dying never disturbs the
/// others, and results come back in completion order, not submission order.
pub struct BatchRunner {
    workers: usize,
}

// -----------------------------------------------------------------------------
// BatchRunner impl

impl BatchRunner {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Run `task` once per target, at most `workers` at a time.
    pub async fn run<T, F, Fut>(&self, targets: Vec<String>, task: F) -> Vec<BatchResult<T>>
    where
        T: Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let task = Arc::new(task);
        let mut join_set = JoinSet::new();
        let mut names: HashMap<tokio::task::Id, String> = HashMap::new();

        for target in targets {
            let semaphore = Arc::clone(&semaphore);
            let task = Arc::clone(&task);
            let name = target.clone();
            let handle = join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (name.clone(), task(name).await)
            });
            names.insert(handle.id(), target);
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((id, (target, value))) => {
                    names.remove(&id);
                    results.push(BatchResult {
                        target,
                        result: Ok(value),
                    });
                }
                Err(err) => {
                    let target = names
                        .remove(&err.id())
                        .unwrap_or_else(|| "unknown".to_string());
                    warn!("batch task for '{target}' died: {err}");
                    results.push(BatchResult {
                        target,
                        result: Err(err.to_string()),
                    });
                }
            }
        }

        results
    }

    /// Run the same operation across every target, producing exactly one
    /// outcome per target. A task that dies instead of returning is reported
    /// as a failed outcome attributed to its target.
    pub async fn execute<F, Fut>(
        &self,
        kind: OperationKind,
        targets: Vec<String>,
        op: F,
    ) -> Vec<OperationOutcome>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationOutcome> + Send + 'static,
    {
        self.run(targets, op)
            .await
            .into_iter()
            .map(|batch| match batch.result {
                Ok(outcome) => outcome,
                Err(detail) => OperationOutcome::failure(
                    &batch.target,
                    kind,
                    "Operation task failed",
                    &detail,
                ),
            })
            .collect()
    }
}
